//! Bounded pool of headless rendering sessions.
//!
//! ## Resource model
//!
//! - A fair [`Semaphore`] with `max_sessions` permits bounds concurrent
//!   leases. Waiters are served FIFO and a dropped wait leaves the queue
//!   without taking a permit.
//! - `Mutex<PoolState>` guards the idle queue and counters. It is never held
//!   across an await; launches and renders happen outside it.
//! - `live` counts every session that exists or is being launched, so it
//!   never exceeds `max_sessions`.
//!
//! ## Session lifecycle
//!
//! ```text
//! Idle -> Acquired -> Rendering -> Acquired -> Releasing -> Idle
//!            |            |
//!            +----------> Failed -> Closed
//! ```
//!
//! A lease dropped while `Rendering` (cancelled request, render timeout) is
//! treated as failed. Failed sessions stay counted in `live` until their close
//! finishes; only then is a replacement launched in the background.

use super::backend::{BackendError, BackendSession, PrintJob, RenderBackend};
use crate::config::PoolSettings;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("No rendering session became free within {waited_ms}ms")]
    Exhausted { waited_ms: u64 },
    #[error("Session pool is closed")]
    Closed,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Acquired,
    Rendering,
    Releasing,
    Failed,
    Closed,
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PoolStats {
    pub max: usize,
    pub idle: usize,
    pub active: usize,
    pub live: usize,
    pub peak_active: usize,
    pub launched: u64,
    pub closed: u64,
    pub renders: u64,
}

struct PooledSession {
    id: u64,
    session: Box<dyn BackendSession>,
    renders: u64,
    idle_since: Instant,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<PooledSession>,
    /// Leases plus acquirers holding a permit.
    active: usize,
    live: usize,
    /// Background replacements in flight.
    launching: usize,
    /// Sessions out of service whose close has not finished; still in `live`.
    retiring: usize,
    peak_active: usize,
    launched: u64,
    closed: u64,
    renders: u64,
    closing: bool,
}

struct Inner {
    backend: Arc<dyn RenderBackend>,
    settings: PoolSettings,
    permits: Arc<Semaphore>,
    state: Mutex<PoolState>,
    session_ready: Notify,
    drained: Notify,
    maintenance: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake_all(&self) {
        self.session_ready.notify_waiters();
        self.drained.notify_waiters();
    }

    async fn launch_session(&self) -> Result<PooledSession, BackendError> {
        let session = self.backend.launch().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().launched += 1;
        debug!(session_id = id, "session launched");
        Ok(PooledSession {
            id,
            session,
            renders: 0,
            idle_since: Instant::now(),
        })
    }

    /// Launch one session into the idle queue if the pool is below its bound.
    async fn replenish_one(self: Arc<Self>) {
        {
            let mut state = self.lock();
            if state.closing || state.live >= self.settings.max_sessions {
                return;
            }
            state.live += 1;
            state.launching += 1;
        }
        let launched = self.launch_session().await;
        let leftover = {
            let mut state = self.lock();
            state.launching -= 1;
            match launched {
                Ok(pooled) if !state.closing => {
                    state.idle.push_back(pooled);
                    None
                }
                Ok(pooled) => {
                    state.live -= 1;
                    state.closed += 1;
                    Some(pooled)
                }
                Err(err) => {
                    state.live -= 1;
                    warn!(error = %err, "replacement session failed to launch");
                    None
                }
            }
        };
        if let Some(mut pooled) = leftover {
            pooled.session.close().await;
        }
        self.session_ready.notify_one();
        self.drained.notify_waiters();
    }

    /// Close a session taken out of service, then free its slot.
    async fn retire(self: Arc<Self>, mut pooled: PooledSession, replace: bool) {
        pooled.session.close().await;
        self.forget(pooled.id, replace);
    }

    fn forget(self: &Arc<Self>, session_id: u64, replace: bool) {
        let replace = {
            let mut state = self.lock();
            state.live -= 1;
            state.retiring -= 1;
            state.closed += 1;
            replace && !state.closing
        };
        debug!(session_id, "session closed");
        self.wake_all();
        if replace {
            spawn_replenish(self);
        }
    }

    async fn maintain(self: &Arc<Self>) -> usize {
        let max_renders = self.settings.max_renders_per_session;
        let max_idle = self.settings.max_idle();
        let expired: Vec<PooledSession> = {
            let mut state = self.lock();
            if state.closing {
                return 0;
            }
            let (expired, keep): (Vec<_>, Vec<_>) = state
                .idle
                .drain(..)
                .partition(|s| s.renders >= max_renders || s.idle_since.elapsed() >= max_idle);
            state.idle = keep.into();
            state.retiring += expired.len();
            expired
        };
        let recycled = expired.len();
        for mut pooled in expired {
            debug!(
                session_id = pooled.id,
                renders = pooled.renders,
                "recycling session"
            );
            pooled.session.close().await;
            self.forget(pooled.id, false);
            Arc::clone(self).replenish_one().await;
        }
        recycled
    }
}

fn spawn_replenish(inner: &Arc<Inner>) {
    if let Ok(handle) = Handle::try_current() {
        handle.spawn(Arc::clone(inner).replenish_one());
    }
}

/// Undoes a counter reservation on drop, so a cancelled `acquire` leaves the
/// counts consistent.
struct Reservation {
    inner: Arc<Inner>,
    slot: Slot,
    armed: bool,
}

#[derive(Clone, Copy)]
enum Slot {
    Active,
    Live,
}

impl Reservation {
    fn new(inner: &Arc<Inner>, slot: Slot) -> Self {
        Self {
            inner: Arc::clone(inner),
            slot,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut state = self.inner.lock();
            match self.slot {
                Slot::Active => state.active -= 1,
                Slot::Live => state.live -= 1,
            }
        }
        self.inner.wake_all();
    }
}

#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<Inner>,
}

impl SessionPool {
    /// An empty pool. Sessions launch on first demand.
    pub fn new(backend: Arc<dyn RenderBackend>, settings: PoolSettings) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_sessions));
        Self {
            inner: Arc::new(Inner {
                backend,
                settings,
                permits,
                state: Mutex::new(PoolState::default()),
                session_ready: Notify::new(),
                drained: Notify::new(),
                maintenance: Mutex::new(None),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.inner.settings
    }

    /// Start the periodic recycling task. Needs a running tokio runtime.
    pub fn spawn_maintenance(&self) {
        let Ok(handle) = Handle::try_current() else {
            warn!("no tokio runtime; session maintenance disabled");
            return;
        };
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.settings.maintenance_interval();
        let task = handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let recycled = inner.maintain().await;
                if recycled > 0 {
                    debug!(recycled, "maintenance pass");
                }
            }
        });
        let previous = self
            .inner
            .maintenance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Fill the pool up to `max_sessions` idle sessions.
    pub async fn warm_up(&self) {
        for _ in 0..self.inner.settings.max_sessions {
            Arc::clone(&self.inner).replenish_one().await;
        }
    }

    /// Run one recycling pass now. Returns how many sessions were replaced.
    pub async fn run_maintenance(&self) -> usize {
        self.inner.maintain().await
    }

    /// Wait for a free session, up to `acquire_timeout`.
    pub async fn acquire(&self) -> Result<Lease, PoolError> {
        let inner = &self.inner;
        if inner.lock().closing {
            return Err(PoolError::Closed);
        }
        let started = Instant::now();
        let waited = tokio::time::timeout(
            inner.settings.acquire_timeout(),
            Arc::clone(&inner.permits).acquire_owned(),
        )
        .await;
        let permit = match waited {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                return Err(PoolError::Exhausted {
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
        };

        let active = {
            let mut state = inner.lock();
            if state.closing {
                return Err(PoolError::Closed);
            }
            state.active += 1;
            state.peak_active = state.peak_active.max(state.active);
            Reservation::new(inner, Slot::Active)
        };

        let pooled = loop {
            let ready = inner.session_ready.notified();
            let launch = {
                let mut state = inner.lock();
                if state.closing {
                    return Err(PoolError::Closed);
                }
                if let Some(pooled) = state.idle.pop_front() {
                    break pooled;
                }
                if state.live < inner.settings.max_sessions {
                    state.live += 1;
                    Some(Reservation::new(inner, Slot::Live))
                } else {
                    None
                }
            };
            match launch {
                Some(slot) => {
                    let pooled = inner.launch_session().await?;
                    slot.disarm();
                    break pooled;
                }
                // A background replacement is in flight.
                None => ready.await,
            }
        };

        active.disarm();
        debug!(session_id = pooled.id, "session acquired");
        Ok(Lease {
            inner: Arc::clone(inner),
            session: Some(pooled),
            state: SessionState::Acquired,
            _permit: permit,
        })
    }

    /// Reject new acquisitions, wait for in-flight leases, then close every
    /// session. Safe to call more than once.
    pub async fn close(&self) {
        let inner = &self.inner;
        let first = !std::mem::replace(&mut inner.lock().closing, true);
        if first {
            info!("closing session pool");
            inner.permits.close();
            let task = inner
                .maintenance
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(task) = task {
                task.abort();
            }
            inner.session_ready.notify_waiters();
        }

        loop {
            let drained = inner.drained.notified();
            {
                let state = inner.lock();
                if state.active == 0 && state.launching == 0 && state.retiring == 0 {
                    break;
                }
            }
            drained.await;
        }

        let idle: Vec<PooledSession> = {
            let mut state = inner.lock();
            let idle: Vec<_> = state.idle.drain(..).collect();
            state.live -= idle.len();
            state.closed += idle.len() as u64;
            idle
        };
        for mut pooled in idle {
            pooled.session.close().await;
        }
        if first {
            info!(closed = inner.lock().closed, "session pool closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closing
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        PoolStats {
            max: self.inner.settings.max_sessions,
            idle: state.idle.len(),
            active: state.active,
            live: state.live,
            peak_active: state.peak_active,
            launched: state.launched,
            closed: state.closed,
            renders: state.renders,
        }
    }
}

/// Exclusive use of one session. Return it with [`release`](Self::release)
/// or [`discard`](Self::discard); dropping it releases a healthy session and
/// discards one that was mid-render.
pub struct Lease {
    inner: Arc<Inner>,
    session: Option<PooledSession>,
    state: SessionState,
    _permit: OwnedSemaphorePermit,
}

impl Lease {
    pub fn session_id(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub async fn print(&mut self, job: &PrintJob) -> Result<Vec<u8>, BackendError> {
        let pooled = self
            .session
            .as_mut()
            .ok_or_else(|| BackendError::Fatal("lease already settled".into()))?;
        self.state = SessionState::Rendering;
        let result = pooled.session.print(job).await;
        pooled.renders += 1;
        self.inner.lock().renders += 1;
        self.state = SessionState::Acquired;
        result
    }

    /// Return the session to the idle queue.
    pub async fn release(mut self) {
        self.state = SessionState::Releasing;
        if let Some((pooled, replace)) = self.settle(true) {
            Arc::clone(&self.inner).retire(pooled, replace).await;
        }
    }

    /// Close the session, then launch a replacement in the background.
    pub async fn discard(mut self) {
        self.state = SessionState::Failed;
        if let Some((pooled, replace)) = self.settle(false) {
            Arc::clone(&self.inner).retire(pooled, replace).await;
        }
    }

    /// Update counters. Returns the session when it must be retired, and
    /// whether it should be replaced once closed.
    fn settle(&mut self, healthy: bool) -> Option<(PooledSession, bool)> {
        let mut pooled = self.session.take()?;
        let session_id = pooled.id;
        let retired = {
            let mut state = self.inner.lock();
            state.active -= 1;
            if healthy && !state.closing {
                pooled.idle_since = Instant::now();
                state.idle.push_back(pooled);
                None
            } else {
                state.retiring += 1;
                Some((pooled, !state.closing))
            }
        };
        if retired.is_none() {
            debug!(session_id, "session released");
            self.state = SessionState::Idle;
            self.inner.session_ready.notify_one();
        } else {
            debug!(session_id, healthy, "session retiring");
            self.state = SessionState::Closed;
        }
        self.inner.drained.notify_waiters();
        retired
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.session.is_none() {
            return;
        }
        let healthy = self.state == SessionState::Acquired;
        if !healthy {
            warn!(session_id = ?self.session_id(), "lease dropped mid-render; discarding session");
        }
        if let Some((pooled, replace)) = self.settle(healthy) {
            let inner = Arc::clone(&self.inner);
            match Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(inner.retire(pooled, replace));
                }
                Err(_) => {
                    let session_id = pooled.id;
                    drop(pooled);
                    inner.forget(session_id, false);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::backend::mock::{MockBackend, MockOutcome};
    use crate::pdf::options::PdfOptions;

    fn settings(max_sessions: usize) -> PoolSettings {
        PoolSettings {
            max_sessions,
            acquire_timeout_ms: 2_000,
            ..PoolSettings::default()
        }
    }

    fn job() -> PrintJob {
        PrintJob {
            html: "<h1>Hi</h1>".into(),
            options: PdfOptions::default(),
            header_html: None,
            footer_html: None,
        }
    }

    async fn eventually(what: &str, check: impl Fn() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test]
    async fn released_session_is_reused() {
        let backend = MockBackend::new();
        let pool = SessionPool::new(Arc::new(backend.clone()), settings(2));

        let mut lease = pool.acquire().await.unwrap();
        assert_eq!(lease.state(), SessionState::Acquired);
        let first = lease.session_id();
        lease.print(&job()).await.unwrap();
        lease.release().await;

        let lease = pool.acquire().await.unwrap();
        assert_eq!(lease.session_id(), first);
        drop(lease);

        assert_eq!(backend.launches(), 1);
        let stats = pool.stats();
        assert_eq!((stats.live, stats.idle, stats.active), (1, 1, 0));
        assert_eq!(stats.renders, 1);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_bound() {
        let backend = MockBackend::gated();
        let pool = SessionPool::new(Arc::new(backend.clone()), settings(2));

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move {
                    let mut lease = pool.acquire().await.unwrap();
                    let bytes = lease.print(&job()).await.unwrap();
                    lease.release().await;
                    bytes
                })
            })
            .collect();

        eventually("two renders in flight", || backend.in_flight() == 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(backend.in_flight(), 2);
        assert_eq!(pool.stats().active, 2);

        backend.release(3);
        for task in tasks {
            assert!(task.await.unwrap().starts_with(b"%PDF-"));
        }
        assert_eq!(backend.peak_in_flight(), 2);
        assert_eq!(backend.launches(), 2);
        assert!(pool.stats().live <= 2);
        assert_eq!(pool.stats().peak_active, 2);
    }

    #[tokio::test]
    async fn acquire_times_out_without_consuming_a_session() {
        let backend = MockBackend::new();
        let pool = SessionPool::new(
            Arc::new(backend.clone()),
            PoolSettings {
                max_sessions: 1,
                acquire_timeout_ms: 30,
                ..PoolSettings::default()
            },
        );
        let held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, PoolError::Exhausted { waited_ms } if waited_ms >= 25));
        assert_eq!(pool.stats().active, 1);

        held.release().await;
        pool.acquire().await.unwrap().release().await;
        assert_eq!(backend.launches(), 1);
    }

    #[tokio::test]
    async fn waiters_are_served_in_order() {
        let pool = SessionPool::new(Arc::new(MockBackend::new()), settings(1));
        let held = pool.acquire().await.unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for n in 0..3 {
            let pool = pool.clone();
            let order = Arc::clone(&order);
            tasks.push(tokio::spawn(async move {
                let lease = pool.acquire().await.unwrap();
                order.lock().unwrap().push(n);
                lease.release().await;
            }));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        held.release().await;
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn cancelled_wait_leaves_the_queue() {
        let pool = SessionPool::new(Arc::new(MockBackend::new()), settings(1));
        let held = pool.acquire().await.unwrap();
        let abandoned = tokio::time::timeout(Duration::from_millis(20), pool.acquire()).await;
        assert!(abandoned.is_err());
        held.release().await;

        let lease = tokio::time::timeout(Duration::from_millis(200), pool.acquire())
            .await
            .expect("abandoned waiter still queued")
            .unwrap();
        lease.release().await;
        assert_eq!(pool.stats().active, 0);
    }

    #[tokio::test]
    async fn lease_dropped_mid_render_is_discarded_and_replaced() {
        let backend = MockBackend::with_script(vec![MockOutcome::Hang]);
        let pool = SessionPool::new(Arc::new(backend.clone()), settings(1));

        let render = async {
            let mut lease = pool.acquire().await.unwrap();
            lease.print(&job()).await
        };
        assert!(tokio::time::timeout(Duration::from_millis(30), render).await.is_err());

        eventually("replacement session", || pool.stats().idle == 1).await;
        eventually("discarded session closed", || backend.closes() == 1).await;
        let stats = pool.stats();
        assert_eq!((stats.live, stats.active, stats.closed), (1, 0, 1));
        assert_eq!(backend.launches(), 2);
    }

    #[tokio::test]
    async fn discard_closes_and_replaces() {
        let backend = MockBackend::new();
        let pool = SessionPool::new(Arc::new(backend.clone()), settings(1));
        let lease = pool.acquire().await.unwrap();
        let first = lease.session_id();
        lease.discard().await;
        assert_eq!(backend.closes(), 1);

        eventually("replacement session", || pool.stats().idle == 1).await;
        let lease = pool.acquire().await.unwrap();
        assert_ne!(lease.session_id(), first);
        lease.release().await;
    }

    #[tokio::test]
    async fn replacement_waits_for_the_failed_session_to_close() {
        let backend = MockBackend::new();
        let pool = SessionPool::new(Arc::new(backend.clone()), settings(1));
        for _ in 0..3 {
            pool.acquire().await.unwrap().discard().await;
            eventually("replacement session", || pool.stats().idle == 1).await;
        }
        assert_eq!(backend.peak_open(), 1);
        assert_eq!(pool.stats().live, 1);
    }

    #[tokio::test]
    async fn dropped_render_is_closed_before_replacement() {
        let backend = MockBackend::with_script(vec![MockOutcome::Hang]);
        let pool = SessionPool::new(Arc::new(backend.clone()), settings(1));
        let render = async {
            let mut lease = pool.acquire().await.unwrap();
            lease.print(&job()).await
        };
        assert!(tokio::time::timeout(Duration::from_millis(20), render).await.is_err());

        eventually("replacement session", || pool.stats().idle == 1).await;
        assert_eq!(backend.peak_open(), 1);
    }

    #[tokio::test]
    async fn launch_failure_surfaces_and_frees_the_slot() {
        let backend = MockBackend::new();
        backend.fail_next_launches(1);
        let pool = SessionPool::new(Arc::new(backend.clone()), settings(1));

        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, PoolError::Backend(BackendError::Launch(_))));
        let stats = pool.stats();
        assert_eq!((stats.live, stats.active, stats.launched), (0, 0, 0));

        pool.acquire().await.unwrap().release().await;
        assert_eq!(pool.stats().live, 1);
    }

    #[tokio::test]
    async fn maintenance_recycles_worn_sessions() {
        let backend = MockBackend::new();
        let pool = SessionPool::new(
            Arc::new(backend.clone()),
            PoolSettings {
                max_renders_per_session: 2,
                ..settings(1)
            },
        );
        let mut lease = pool.acquire().await.unwrap();
        lease.print(&job()).await.unwrap();
        lease.release().await;
        assert_eq!(pool.run_maintenance().await, 0);

        let mut lease = pool.acquire().await.unwrap();
        lease.print(&job()).await.unwrap();
        lease.release().await;
        assert_eq!(pool.run_maintenance().await, 1);

        let stats = pool.stats();
        assert_eq!((stats.live, stats.idle, stats.closed), (1, 1, 1));
        assert_eq!(backend.launches(), 2);
    }

    #[tokio::test]
    async fn maintenance_recycles_idle_sessions() {
        let backend = MockBackend::new();
        let pool = SessionPool::new(
            Arc::new(backend.clone()),
            PoolSettings {
                max_idle_secs: 0,
                ..settings(2)
            },
        );
        pool.warm_up().await;
        assert_eq!(pool.stats().idle, 2);
        assert_eq!(pool.run_maintenance().await, 2);
        assert_eq!(pool.stats().live, 2);
        assert_eq!(pool.stats().launched, 4);
        assert_eq!(backend.peak_open(), 2);
    }

    #[tokio::test]
    async fn close_waits_for_in_flight_and_leaves_nothing_live() {
        let backend = MockBackend::new();
        let pool = SessionPool::new(Arc::new(backend.clone()), settings(2));
        pool.warm_up().await;
        let mut lease = pool.acquire().await.unwrap();

        let closing = tokio::spawn({
            let pool = pool.clone();
            async move { pool.close().await }
        });
        eventually("pool closing", || pool.is_closed()).await;
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));
        assert!(!closing.is_finished());

        lease.print(&job()).await.unwrap();
        lease.release().await;
        closing.await.unwrap();

        let stats = pool.stats();
        assert_eq!((stats.live, stats.idle, stats.active), (0, 0, 0));
        assert_eq!(backend.closes(), backend.launches());

        pool.close().await;
        assert_eq!(pool.stats().live, 0);
    }

    #[tokio::test]
    async fn close_wakes_queued_waiters() {
        let pool = SessionPool::new(Arc::new(MockBackend::new()), settings(1));
        let held = pool.acquire().await.unwrap();
        let waiter = tokio::spawn({
            let pool = pool.clone();
            async move { pool.acquire().await.err() }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let closing = tokio::spawn({
            let pool = pool.clone();
            async move { pool.close().await }
        });
        assert!(matches!(waiter.await.unwrap(), Some(PoolError::Closed)));
        held.release().await;
        closing.await.unwrap();
        assert_eq!(pool.stats().live, 0);
    }
}
