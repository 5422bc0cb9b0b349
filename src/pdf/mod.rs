//! PDF generation: page options, session backends, the session pool and the
//! engine that ties them together.

pub mod backend;
pub mod chrome;
pub mod engine;
pub mod options;
pub mod pool;

pub use backend::{BackendError, BackendSession, PrintJob, RenderBackend};
pub use engine::{GenerationCause, PdfArtifact, PdfEngine, PdfError};
pub use options::{Orientation, PageSize, PdfOptions, PdfOverrides};
pub use pool::{Lease, PoolError, PoolStats, SessionPool, SessionState};
