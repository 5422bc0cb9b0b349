//! Rendering session backend trait and shared types.
//!
//! A [`RenderBackend`] launches [`BackendSession`]s; each session turns one
//! [`PrintJob`] at a time into PDF bytes. The pool owns sessions and never
//! shares one between two jobs.
//!
//! The production implementation is
//! [`ChromeBackend`](super::chrome::ChromeBackend). Tests use
//! [`mock::MockBackend`], which scripts outcomes and counts concurrency.

use super::options::PdfOptions;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Session launch failed: {0}")]
    Launch(String),
    /// Worth one more attempt in the same session (navigation timeout).
    #[error("Transient render failure: {0}")]
    Transient(String),
    #[error("Render failed: {0}")]
    Fatal(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

/// Everything a session needs to print one document.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintJob {
    pub html: String,
    pub options: PdfOptions,
    pub header_html: Option<String>,
    pub footer_html: Option<String>,
}

#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Start a new headless session.
    async fn launch(&self) -> Result<Box<dyn BackendSession>, BackendError>;
}

#[async_trait]
pub trait BackendSession: Send {
    /// Print `job` to PDF bytes. Called for one job at a time.
    async fn print(&mut self, job: &PrintJob) -> Result<Vec<u8>, BackendError>;

    /// Release the underlying process. Must tolerate repeated calls.
    async fn close(&mut self);
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::Semaphore;

    /// A minimal document with `pages` page objects.
    pub fn fake_pdf(pages: usize) -> Vec<u8> {
        let mut pdf = b"%PDF-1.7\n1 0 obj << /Type /Pages /Count 0 >> endobj\n".to_vec();
        for n in 0..pages {
            pdf.extend_from_slice(format!("{} 0 obj << /Type /Page >> endobj\n", n + 2).as_bytes());
        }
        pdf.extend_from_slice(b"%%EOF\n");
        pdf
    }

    /// What the next `print` call does.
    #[derive(Debug, Clone, PartialEq)]
    pub enum MockOutcome {
        Pdf(Vec<u8>),
        Transient,
        Fatal,
        /// Never completes; only a timeout or cancellation ends it.
        Hang,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct RecordedPrint {
        pub session_id: usize,
        pub job: PrintJob,
    }

    pub struct MockState {
        pub launches: AtomicUsize,
        pub closes: AtomicUsize,
        pub prints: AtomicUsize,
        pub in_flight: AtomicUsize,
        pub peak_in_flight: AtomicUsize,
        /// Sessions launched and not yet closed.
        pub open: AtomicUsize,
        pub peak_open: AtomicUsize,
        pub failing_launches: AtomicUsize,
        pub script: Mutex<VecDeque<MockOutcome>>,
        pub recorded: Mutex<Vec<RecordedPrint>>,
        gated: AtomicBool,
        gate: Semaphore,
    }

    impl Default for MockState {
        fn default() -> Self {
            Self {
                launches: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                prints: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
                open: AtomicUsize::new(0),
                peak_open: AtomicUsize::new(0),
                failing_launches: AtomicUsize::new(0),
                script: Mutex::new(VecDeque::new()),
                recorded: Mutex::new(Vec::new()),
                gated: AtomicBool::new(false),
                gate: Semaphore::new(0),
            }
        }
    }

    /// Records prints without running a browser. Uses atomics and a Mutex so
    /// it is `Sync` and can be shared with the pool's background tasks.
    #[derive(Clone, Default)]
    pub struct MockBackend {
        pub state: Arc<MockState>,
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        /// Prints block until [`release`](Self::release) hands out permits.
        pub fn gated() -> Self {
            let backend = Self::default();
            backend.state.gated.store(true, Ordering::SeqCst);
            backend
        }

        pub fn with_script(outcomes: Vec<MockOutcome>) -> Self {
            let backend = Self::default();
            *backend.state.script.lock().unwrap() = outcomes.into();
            backend
        }

        pub fn release(&self, prints: usize) {
            self.state.gate.add_permits(prints);
        }

        pub fn fail_next_launches(&self, count: usize) {
            self.state.failing_launches.store(count, Ordering::SeqCst);
        }

        pub fn launches(&self) -> usize {
            self.state.launches.load(Ordering::SeqCst)
        }

        pub fn closes(&self) -> usize {
            self.state.closes.load(Ordering::SeqCst)
        }

        pub fn prints(&self) -> usize {
            self.state.prints.load(Ordering::SeqCst)
        }

        pub fn in_flight(&self) -> usize {
            self.state.in_flight.load(Ordering::SeqCst)
        }

        pub fn peak_in_flight(&self) -> usize {
            self.state.peak_in_flight.load(Ordering::SeqCst)
        }

        pub fn peak_open(&self) -> usize {
            self.state.peak_open.load(Ordering::SeqCst)
        }

        pub fn recorded(&self) -> Vec<RecordedPrint> {
            self.state.recorded.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RenderBackend for MockBackend {
        async fn launch(&self) -> Result<Box<dyn BackendSession>, BackendError> {
            let failing = self.state.failing_launches.load(Ordering::SeqCst);
            if failing > 0 {
                self.state.failing_launches.store(failing - 1, Ordering::SeqCst);
                return Err(BackendError::Launch("mock launch failure".into()));
            }
            let id = self.state.launches.fetch_add(1, Ordering::SeqCst);
            let open = self.state.open.fetch_add(1, Ordering::SeqCst) + 1;
            self.state.peak_open.fetch_max(open, Ordering::SeqCst);
            Ok(Box::new(MockSession {
                id,
                state: Arc::clone(&self.state),
                closed: false,
            }))
        }
    }

    pub struct MockSession {
        id: usize,
        state: Arc<MockState>,
        closed: bool,
    }

    /// Decrements the in-flight counter even when the print future is dropped.
    struct InFlight<'a>(&'a MockState);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl BackendSession for MockSession {
        async fn print(&mut self, job: &PrintJob) -> Result<Vec<u8>, BackendError> {
            let state = &*self.state;
            let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            state.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            let _guard = InFlight(state);

            state.recorded.lock().unwrap().push(RecordedPrint {
                session_id: self.id,
                job: job.clone(),
            });
            if state.gated.load(Ordering::SeqCst) {
                state.gate.acquire().await.unwrap().forget();
            }
            let outcome = state.script.lock().unwrap().pop_front();
            state.prints.fetch_add(1, Ordering::SeqCst);
            match outcome.unwrap_or_else(|| MockOutcome::Pdf(fake_pdf(1))) {
                MockOutcome::Pdf(bytes) => Ok(bytes),
                MockOutcome::Transient => Err(BackendError::Transient("navigation timed out".into())),
                MockOutcome::Fatal => Err(BackendError::Fatal("session crashed".into())),
                MockOutcome::Hang => std::future::pending().await,
            }
        }

        async fn close(&mut self) {
            if !self.closed {
                self.closed = true;
                // Shutting a browser down takes time; let other tasks run.
                tokio::task::yield_now().await;
                self.state.open.fetch_sub(1, Ordering::SeqCst);
                self.state.closes.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn default_state_is_ungated_and_empty() {
        let backend = MockBackend::new();
        assert_eq!(backend.state.gate.available_permits(), 0);
        assert!(!backend.state.gated.load(Ordering::SeqCst));
        assert_eq!((backend.launches(), backend.peak_open()), (0, 0));
    }

    #[tokio::test]
    async fn mock_scripts_outcomes_in_order() {
        let backend = MockBackend::with_script(vec![MockOutcome::Transient, MockOutcome::Fatal]);
        let mut session = backend.launch().await.unwrap();
        let job = PrintJob {
            html: "<p>x</p>".into(),
            options: PdfOptions::default(),
            header_html: None,
            footer_html: None,
        };

        assert!(session.print(&job).await.unwrap_err().is_transient());
        assert_eq!(
            session.print(&job).await.unwrap_err(),
            BackendError::Fatal("session crashed".into())
        );
        assert!(session.print(&job).await.unwrap().starts_with(b"%PDF-"));
        assert_eq!(backend.prints(), 3);
        assert_eq!(backend.in_flight(), 0);

        session.close().await;
        session.close().await;
        assert_eq!(backend.closes(), 1);
    }
}
