//! Poll cadence selection and cancellable recurring tasks.
//!
//! Shorter viewing windows refresh faster; explicit date ranges never
//! poll. `PollTask` wraps a recurring tokio task behind an explicit
//! `stop()` contract so a consumer going away can never leak its timer,
//! and `RequestEpoch` lets consumers discard responses that arrive after
//! a newer request generation has started.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{task::JoinHandle, time};
use tracing::info;

/// Refresh cadence for a viewing window, `None` when polling should not
/// run at all (explicit date range active, or window longer than an hour).
pub fn refresh_interval(window_minutes: u32, explicit_range: bool) -> Option<Duration> {
    if explicit_range {
        return None;
    }
    match window_minutes {
        0..=1 => Some(Duration::from_secs(5)),
        2..=5 => Some(Duration::from_secs(15)),
        6..=60 => Some(Duration::from_secs(60)),
        _ => None,
    }
}

/// Monotonic request-generation counter.
///
/// `begin()` starts a new generation and hands back a ticket; a response
/// computed under an older ticket reports `!is_current()` and must be
/// discarded rather than applied over fresher state.
#[derive(Clone, Debug, Default)]
pub struct RequestEpoch {
    current: Arc<AtomicU64>,
}

impl RequestEpoch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation, invalidating every earlier ticket.
    pub fn begin(&self) -> PollTicket {
        let generation = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        PollTicket {
            epoch: self.clone(),
            generation,
        }
    }

    /// Invalidate all outstanding tickets without starting a new request.
    pub fn invalidate(&self) {
        self.current.fetch_add(1, Ordering::SeqCst);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.current.load(Ordering::SeqCst) == generation
    }
}

/// Proof of belonging to a request generation.
#[derive(Clone, Debug)]
pub struct PollTicket {
    epoch: RequestEpoch,
    generation: u64,
}

impl PollTicket {
    /// True while no newer generation has started.
    pub fn is_current(&self) -> bool {
        self.epoch.is_current(self.generation)
    }
}

/// Handle to a recurring background task.
///
/// The task is cancelled by `stop()` or by dropping the handle; `stop()`
/// additionally invalidates the current ticket so an in-flight iteration
/// cannot apply its result after cancellation.
pub struct PollTask {
    handle: JoinHandle<()>,
    epoch: RequestEpoch,
}

impl PollTask {
    /// Spawns `work` on a fixed cadence. Each iteration receives a fresh
    /// ticket from the task's epoch.
    pub fn spawn<F, Fut>(interval: Duration, mut work: F) -> Self
    where
        F: FnMut(PollTicket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let epoch = RequestEpoch::new();
        let task_epoch = epoch.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            loop {
                ticker.tick().await;
                work(task_epoch.begin()).await;
            }
        });
        Self { handle, epoch }
    }

    pub fn stop(self) {
        info!("Poll task stopped");
        self.epoch.invalidate();
        // Drop aborts the task.
    }
}

impl Drop for PollTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
