//! Headless Chrome backend built on `headless_chrome`.
//!
//! `headless_chrome` is synchronous, so launch and print run on tokio's
//! blocking pool. Each print writes the HTML to a temp file and loads it via
//! `file://` so relative `file://` asset URLs (logos, fonts) resolve.
//!
//! A print abandoned by a render timeout keeps running on the blocking pool
//! and holds its own browser handle. Closing such a session kills the Chrome
//! process by pid so the hung print cannot keep it alive.

use super::backend::{BackendError, BackendSession, PrintJob, RenderBackend};
use crate::config::ChromeSettings;
use async_trait::async_trait;
use headless_chrome::types::PrintToPdfOptions;
use headless_chrome::{Browser, LaunchOptions};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

pub struct ChromeBackend {
    settings: ChromeSettings,
    /// The browser drops its connection after this long without CDP traffic.
    idle_timeout: Duration,
    next_id: AtomicUsize,
}

impl ChromeBackend {
    pub fn new(settings: ChromeSettings, idle_timeout: Duration) -> Self {
        Self {
            settings,
            idle_timeout,
            next_id: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RenderBackend for ChromeBackend {
    async fn launch(&self) -> Result<Box<dyn BackendSession>, BackendError> {
        let settings = self.settings.clone();
        let idle_timeout = self.idle_timeout;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let browser = tokio::task::spawn_blocking(move || {
            Browser::new(LaunchOptions {
                headless: true,
                sandbox: settings.sandbox,
                window_size: Some((settings.window_width, settings.window_height)),
                path: settings.executable.clone(),
                idle_browser_timeout: idle_timeout,
                ..Default::default()
            })
        })
        .await
        .map_err(|err| BackendError::Launch(err.to_string()))?
        .map_err(|err| BackendError::Launch(format!("{err:#}")))?;
        let pid = browser.get_process_id();
        debug!(session_id = id, pid = ?pid, "chrome launched");
        Ok(Box::new(ChromeSession {
            id,
            pid,
            browser: Some(Arc::new(browser)),
            navigation_timeout: self.settings.navigation_timeout(),
        }))
    }
}

pub struct ChromeSession {
    id: usize,
    pid: Option<u32>,
    browser: Option<Arc<Browser>>,
    navigation_timeout: Duration,
}

/// CDP page setup for `job`.
pub fn print_options(job: &PrintJob) -> PrintToPdfOptions {
    let options = &job.options;
    let (width, height) = options.paper_in();
    let decorated = job.header_html.is_some() || job.footer_html.is_some();
    // Chrome prints its own title/url band unless given an empty one.
    let band = |html: &Option<String>| {
        decorated.then(|| html.clone().unwrap_or_else(|| "<span></span>".into()))
    };
    PrintToPdfOptions {
        landscape: Some(false),
        display_header_footer: Some(decorated),
        print_background: Some(options.print_background),
        scale: Some(options.scale),
        paper_width: Some(width),
        paper_height: Some(height),
        margin_top: Some(options.margins.top.to_inches()),
        margin_right: Some(options.margins.right.to_inches()),
        margin_bottom: Some(options.margins.bottom.to_inches()),
        margin_left: Some(options.margins.left.to_inches()),
        header_template: band(&job.header_html),
        footer_template: band(&job.footer_html),
        prefer_css_page_size: Some(false),
        ..Default::default()
    }
}

fn classify(stage: &str, err: impl std::fmt::Display) -> BackendError {
    let message = format!("{stage}: {err}");
    if message.to_ascii_lowercase().contains("timeout")
        || message.to_ascii_lowercase().contains("timed out")
    {
        BackendError::Transient(message)
    } else {
        BackendError::Fatal(message)
    }
}

fn print_blocking(
    browser: &Browser,
    job: &PrintJob,
    navigation_timeout: Duration,
) -> Result<Vec<u8>, BackendError> {
    let page = tempfile::Builder::new()
        .prefix("brand-pdf-")
        .suffix(".html")
        .tempfile()
        .map_err(|err| BackendError::Fatal(format!("temp page: {err}")))?;
    std::fs::write(page.path(), &job.html)
        .map_err(|err| BackendError::Fatal(format!("temp page: {err}")))?;

    let tab = browser.new_tab().map_err(|err| classify("new tab", err))?;
    tab.set_default_timeout(navigation_timeout);
    let printed = tab
        .navigate_to(&format!("file://{}", page.path().display()))
        .and_then(|tab| tab.wait_until_navigated())
        .map_err(|err| classify("navigate", err))
        .and_then(|tab| {
            tab.print_to_pdf(Some(print_options(job)))
                .map_err(|err| classify("print", err))
        });
    let _ = tab.close(true);
    printed
}

/// SIGKILL `pid`. The browser's child handle is not reaped until its last
/// `Arc` drops, so the pid cannot have been reused.
#[cfg(unix)]
fn kill_process(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: kill(2) takes plain integers and touches no memory.
    unsafe { libc::kill(pid, libc::SIGKILL) == 0 }
}

#[cfg(not(unix))]
fn kill_process(_pid: u32) -> bool {
    false
}

#[async_trait]
impl BackendSession for ChromeSession {
    async fn print(&mut self, job: &PrintJob) -> Result<Vec<u8>, BackendError> {
        let browser = self
            .browser
            .clone()
            .ok_or_else(|| BackendError::Fatal("session closed".into()))?;
        let job = job.clone();
        let timeout = self.navigation_timeout;
        tokio::task::spawn_blocking(move || print_blocking(&browser, &job, timeout))
            .await
            .map_err(|err| BackendError::Fatal(err.to_string()))?
    }

    async fn close(&mut self) {
        let Some(browser) = self.browser.take() else {
            return;
        };
        match Arc::try_unwrap(browser) {
            Ok(browser) => {
                debug!(session_id = self.id, "chrome closing");
                // Dropping the last handle kills the process, which blocks.
                let _ = tokio::task::spawn_blocking(move || drop(browser)).await;
            }
            Err(_in_use) => {
                let killed = self.pid.is_some_and(kill_process);
                warn!(
                    session_id = self.id,
                    pid = ?self.pid,
                    killed,
                    "chrome still printing at close; killing process"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::options::{PdfOptions, PdfOverrides};

    fn job(overrides: PdfOverrides, header: bool) -> PrintJob {
        PrintJob {
            html: String::new(),
            options: PdfOptions::resolve(&[&overrides]).unwrap(),
            header_html: header.then(|| "<div>Acme</div>".to_string()),
            footer_html: None,
        }
    }

    #[test]
    fn print_options_use_resolved_paper_and_margins() {
        let opts = print_options(&job(
            PdfOverrides {
                page_size: Some("A4".into()),
                orientation: Some("landscape".into()),
                margin: Some("2.54cm".into()),
                ..Default::default()
            },
            false,
        ));
        let (w, h) = (opts.paper_width.unwrap(), opts.paper_height.unwrap());
        assert!(w > h, "landscape swaps dimensions: {w} x {h}");
        assert!((opts.margin_left.unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(opts.display_header_footer, Some(false));
        assert!(opts.header_template.is_none());
    }

    #[test]
    fn header_only_gets_blank_footer() {
        let opts = print_options(&job(
            PdfOverrides {
                header: Some(true),
                ..Default::default()
            },
            true,
        ));
        assert_eq!(opts.display_header_footer, Some(true));
        assert_eq!(opts.header_template.as_deref(), Some("<div>Acme</div>"));
        assert_eq!(opts.footer_template.as_deref(), Some("<span></span>"));
    }

    #[cfg(unix)]
    #[test]
    fn kill_process_terminates_child() {
        use std::os::unix::process::ExitStatusExt;

        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        assert!(kill_process(child.id()));
        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(libc::SIGKILL));
    }

    #[test]
    fn timeouts_are_transient() {
        assert!(classify("navigate", "Timeout while waiting").is_transient());
        assert!(classify("navigate", "the event waited for never came: timed out").is_transient());
        assert!(!classify("print", "connection closed").is_transient());
    }
}
