//! Process shutdown: one cancellation signal, then a bounded drain of the
//! tasks that listen for it.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// How the tracked tasks ended during [`ShutdownCoordinator::drain`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Returned before the deadline.
    pub finished: usize,
    /// Panicked or were cancelled elsewhere.
    pub failed: usize,
    /// Still running at the deadline and aborted.
    pub aborted: usize,
}

/// Owns the server, socket, and metrics tasks until the process exits.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    drain_timeout: Duration,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    /// Coordinator with a 10 second drain window.
    pub fn new() -> Self {
        Self::with_drain_timeout(DEFAULT_DRAIN_TIMEOUT)
    }

    /// Coordinator with a custom drain window.
    pub fn with_drain_timeout(drain_timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Vec::new(),
            drain_timeout,
        }
    }

    /// Token cancelled when draining starts.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Number of tracked tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Track an already spawned task.
    pub fn track(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    /// Spawn `future` and track it.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.track(tokio::spawn(future));
    }

    /// Cancel the token and wait for every tracked task, sharing one deadline.
    pub async fn drain(self) -> DrainOutcome {
        self.token.cancel();
        let deadline = Instant::now() + self.drain_timeout;
        info!(
            tasks = self.tasks.len(),
            timeout_ms = u64::try_from(self.drain_timeout.as_millis()).unwrap_or(u64::MAX),
            "draining tasks"
        );

        let mut outcome = DrainOutcome::default();
        for mut task in self.tasks {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => outcome.finished += 1,
                Ok(Err(e)) => {
                    warn!(error = %e, "task failed during shutdown");
                    outcome.failed += 1;
                }
                Err(_) => {
                    task.abort();
                    outcome.aborted += 1;
                }
            }
        }

        if outcome.aborted > 0 {
            warn!(aborted = outcome.aborted, "drain deadline passed, tasks aborted");
        }
        info!(finished = outcome.finished, failed = outcome.failed, "shutdown drained");
        outcome
    }
}
