use brand_pdf::brand::{BrandRegistry, ProtectionLevel};
use brand_pdf::config::{self, ConfigError, EngineConfig};
use brand_pdf::pdf::PdfOverrides;
use brand_pdf::pipeline::{ErrorKind, Pipeline, PipelineError};
use brand_pdf::{content, output, render, telemetry};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "brand-pdf")]
#[command(about = "Render Markdown into branded PDFs")]
#[command(long_about = "\
Render Markdown into branded PDFs

Each brand lives in its own directory under the brands root:

  brands/
  └── acme/
      ├── brand.toml              # Name, colors, fonts, assets, templates, [pdf]
      ├── protection.toml         # Written by lock/unlock
      ├── assets/
      │   ├── logo.svg
      │   └── brand.css
      └── templates/
          └── letter.html         # Overrides the built-in letter template

Content is Markdown with optional YAML front-matter:

  ---
  title: Quarterly Report
  author: Dana
  template: report
  ---
  # Summary

Template precedence: --template, then front-matter `template`, then the
brand's default_template.

Run 'brand-pdf gen-config' to generate a documented brand-pdf.toml.")]
#[command(version)]
struct Cli {
    /// Engine config file (default: ./brand-pdf.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Brands root directory (overrides paths.brands_root)
    #[arg(long, global = true)]
    brands: Option<PathBuf>,

    /// Output root directory (overrides paths.output_root)
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Page-setup flags shared by commands that produce PDFs.
#[derive(clap::Args, Clone, Default)]
struct PageArgs {
    /// Paper size: A3, A4, A5, Letter, Legal, Tabloid
    #[arg(long)]
    page_size: Option<String>,
    /// portrait or landscape
    #[arg(long)]
    orientation: Option<String>,
    /// Margin on all sides, e.g. 1in, 2cm, 18mm, 72pt
    #[arg(long)]
    margin: Option<String>,
    /// Print the brand header band
    #[arg(long, overrides_with = "no_header")]
    header: bool,
    #[arg(long, hide = true)]
    no_header: bool,
    /// Print the page-number footer band
    #[arg(long, overrides_with = "no_footer")]
    footer: bool,
    #[arg(long, hide = true)]
    no_footer: bool,
    /// Skip CSS backgrounds
    #[arg(long)]
    no_background: bool,
    /// Render scale, 0.1 to 2.0
    #[arg(long)]
    scale: Option<f64>,
}

fn toggle(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

impl PageArgs {
    fn overrides(&self) -> PdfOverrides {
        PdfOverrides {
            page_size: self.page_size.clone(),
            orientation: self.orientation.clone(),
            margin: self.margin.clone(),
            header: toggle(self.header, self.no_header),
            footer: toggle(self.footer, self.no_footer),
            print_background: self.no_background.then_some(false),
            scale: self.scale,
            ..PdfOverrides::default()
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum LockLevel {
    Moderate,
    Strict,
}

impl From<LockLevel> for ProtectionLevel {
    fn from(level: LockLevel) -> Self {
        match level {
            LockLevel::Moderate => ProtectionLevel::Moderate,
            LockLevel::Strict => ProtectionLevel::Strict,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Render a Markdown file to PDF and store it under the output root
    Generate {
        /// Brand id
        #[arg(long, short)]
        brand: String,
        /// Markdown input file
        input: PathBuf,
        /// Template name (overrides front-matter and brand default)
        #[arg(long, short)]
        template: Option<String>,
        #[command(flatten)]
        page: PageArgs,
    },
    /// Load and validate a brand, then print a summary
    Check {
        brand: String,
    },
    /// List brands under the brands root
    ListBrands,
    /// List templates available to a brand
    Templates {
        brand: String,
    },
    /// Lock a brand against asset changes
    Lock {
        brand: String,
        /// Who is locking
        #[arg(long)]
        by: String,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long, value_enum, default_value = "moderate")]
        level: LockLevel,
    },
    /// Remove a brand lock
    Unlock {
        brand: String,
        /// Who is unlocking
        #[arg(long)]
        by: String,
    },
    /// Print a stock brand-pdf.toml with all options documented
    GenConfig,
}

fn load_engine_config(cli: &Cli) -> Result<EngineConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) if !path.exists() => {
            return Err(ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("config file not found: {}", path.display()),
            )));
        }
        Some(path) => config::load_config_file(path)?,
        None => config::load_config(&std::env::current_dir()?)?,
    };
    if let Some(brands) = &cli.brands {
        config.paths.brands_root = brands.clone();
    }
    if let Some(output) = &cli.output {
        config.paths.output_root = output.clone();
    }
    Ok(config)
}

fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::PoolExhausted | ErrorKind::PoolClosed | ErrorKind::PdfGeneration => 3,
        ErrorKind::Storage | ErrorKind::Io => 4,
        _ => 2,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return ExitCode::SUCCESS;
    }

    let config = match load_engine_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            output::print_error(&PipelineError::from(err));
            return ExitCode::from(2);
        }
    };
    if let Err(err) = telemetry::init(&config.logging) {
        eprintln!("warning: {err}");
    }

    match run(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            output::print_error(&err);
            ExitCode::from(exit_code(err.kind()))
        }
    }
}

async fn run(command: Command, config: &EngineConfig) -> Result<(), PipelineError> {
    let registry = BrandRegistry::new(&config.paths.brands_root);
    match command {
        Command::Generate {
            brand,
            input,
            template,
            page,
        } => {
            let record = content::parse_file(&input)
                .map_err(|err| PipelineError::content(&brand, err))?;
            let pipeline = Pipeline::from_config(config);
            let result = pipeline
                .generate_record(&record, &brand, template.as_deref(), &page.overrides())
                .await;
            pipeline.shutdown().await;
            let outcome = result?;
            let name = pipeline.registry().load_brand(&brand)?.name.clone();
            output::print_generate_output(&outcome, &name, &config.paths.output_root);
        }
        Command::Check { brand } => {
            let loaded = registry.load_brand(&brand)?;
            let templates = registry.available_templates(&brand)?;
            let mut warnings = Vec::new();
            for name in &templates {
                warnings.push((name.clone(), render::validate_template(&loaded, name)?));
            }
            output::print_check_output(&loaded, &templates, &warnings);
        }
        Command::ListBrands => {
            let entries: Vec<_> = registry
                .list_brands()?
                .into_iter()
                .map(|id| {
                    let loaded = registry
                        .load_brand(&id)
                        .map(|b| b.name.clone())
                        .map_err(|err| err.to_string());
                    (id, loaded)
                })
                .collect();
            output::print_brand_list(&entries);
        }
        Command::Templates { brand } => {
            let loaded = registry.load_brand(&brand)?;
            let templates = registry.available_templates(&brand)?;
            output::print_templates(&loaded, &templates);
        }
        Command::Lock {
            brand,
            by,
            reason,
            level,
        } => {
            let state = registry.lock_brand(&brand, &by, reason.as_deref(), level.into())?;
            output::print_protection(&brand, &state);
        }
        Command::Unlock { brand, by } => {
            let state = registry.unlock_brand(&brand, &by)?;
            output::print_protection(&brand, &state);
        }
        Command::GenConfig => print!("{}", config::stock_config_toml()),
    }
    Ok(())
}
