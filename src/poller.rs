//! Background glucose polling.
//!
//! One tokio task fetches a reading, reports exactly one [`PollOutcome`] to
//! its sink, then waits for the next tick. The next tick is measured from the
//! moment the previous fetch completed, so ticks never overlap.

use std::{sync::Arc, time::Duration};

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, sleep_until},
};
use tokio_util::sync::CancellationToken;

use crate::source::{FetchError, Reading, SourceHandle};

/// Result of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Updated(Reading),
    Failed(FetchError),
}

/// Receiver of poll outcomes. Called from the poller task.
pub trait OutcomeSink: Send + Sync + 'static {
    fn deliver(&self, outcome: PollOutcome);
}

/// Lifecycle stage of the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    /// Stop requested, task not yet joined.
    Stopping,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollerError {
    #[error("no reading source configured")]
    MissingSource,
    #[error("poll interval must be greater than zero")]
    InvalidInterval,
    #[error("previous poll loop is still stopping")]
    Stopping,
}

/// Values the worker re-reads at the start of every tick.
#[derive(Clone)]
struct TickSettings {
    interval: Duration,
    source: Option<SourceHandle>,
}

struct Worker {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// Owns the poll loop task.
///
/// # Example
///
/// ```no_run
/// use std::{sync::Arc, time::Duration};
/// use dextop::poller::{OutcomeSink, PollOutcome, Poller};
/// use dextop::source::SourceHandle;
///
/// struct Print;
///
/// impl OutcomeSink for Print {
///     fn deliver(&self, outcome: PollOutcome) {
///         println!("{outcome:?}");
///     }
/// }
///
/// # async fn example(source: SourceHandle) -> anyhow::Result<()> {
/// let mut poller = Poller::new();
/// poller.start(Some(source), Duration::from_secs(60), Arc::new(Print))?;
/// poller.reconfigure(Duration::from_secs(300))?;
/// poller.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct Poller {
    phase: Phase,
    settings: watch::Sender<TickSettings>,
    worker: Option<Worker>,
}

impl Default for Poller {
    fn default() -> Self {
        Self::new()
    }
}

impl Poller {
    pub fn new() -> Self {
        let (settings, _) = watch::channel(TickSettings {
            interval: Duration::from_secs(60),
            source: None,
        });
        Self {
            phase: Phase::Idle,
            settings,
            worker: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn interval(&self) -> Duration {
        self.settings.borrow().interval
    }

    pub fn has_source(&self) -> bool {
        self.settings.borrow().source.is_some()
    }

    /// Starts the loop. The first fetch happens immediately.
    ///
    /// Does nothing if the loop is already running. `source` replaces the
    /// current source when given; starting without any source fails.
    pub fn start(
        &mut self,
        source: Option<SourceHandle>,
        interval: Duration,
        sink: Arc<dyn OutcomeSink>,
    ) -> Result<(), PollerError> {
        match self.phase {
            Phase::Running => {
                debug!("Poller already running, start ignored");
                return Ok(());
            }
            Phase::Stopping => return Err(PollerError::Stopping),
            Phase::Idle => {}
        }

        if interval.is_zero() {
            return Err(PollerError::InvalidInterval);
        }
        if source.is_none() && !self.has_source() {
            return Err(PollerError::MissingSource);
        }

        self.settings.send_modify(|current| {
            current.interval = interval;
            if let Some(source) = source {
                current.source = Some(source);
            }
        });

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(run_poll_loop(
            self.settings.subscribe(),
            sink,
            cancel_token.clone(),
        ));

        self.worker = Some(Worker {
            handle,
            cancel_token,
        });
        self.phase = Phase::Running;
        info!("Poller started with interval {}s", interval.as_secs());
        Ok(())
    }

    /// Stops the loop and waits for the task to exit.
    ///
    /// A fetch in flight is allowed to finish and report its outcome before
    /// this returns; nothing is reported afterwards.
    pub async fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            self.phase = Phase::Idle;
            return;
        };

        self.phase = Phase::Stopping;
        worker.cancel_token.cancel();
        if let Err(e) = worker.handle.await {
            error!("Poll loop task failed: {e}");
        }
        self.phase = Phase::Idle;
        info!("Poller stopped");
    }

    /// Changes the interval used for the next wait.
    pub fn reconfigure(&self, interval: Duration) -> Result<(), PollerError> {
        if interval.is_zero() {
            return Err(PollerError::InvalidInterval);
        }
        self.settings.send_if_modified(|current| {
            let changed = current.interval != interval;
            current.interval = interval;
            changed
        });
        debug!("Poll interval set to {}s", interval.as_secs());
        Ok(())
    }

    /// Replaces the source used from the next tick on.
    pub fn set_source(&self, source: SourceHandle) {
        self.settings.send_modify(|current| current.source = Some(source));
        debug!("Reading source replaced");
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Some(worker) = &self.worker {
            warn!("Poller dropped while running, cancelling loop");
            worker.cancel_token.cancel();
        }
    }
}

async fn run_poll_loop(
    mut settings: watch::Receiver<TickSettings>,
    sink: Arc<dyn OutcomeSink>,
    cancel_token: CancellationToken,
) {
    while !cancel_token.is_cancelled() {
        let tick = settings.borrow_and_update().clone();
        let Some(source) = tick.source else {
            error!("Poll loop has no reading source, exiting");
            break;
        };

        let outcome = match source.fetch().await {
            Ok(reading) => {
                debug!("Fetched reading {} ({:?})", reading.value, reading.trend);
                PollOutcome::Updated(reading)
            }
            Err(e) => {
                warn!("{}: {e}", e.category());
                PollOutcome::Failed(e)
            }
        };
        sink.deliver(outcome);

        let completed = Instant::now();
        loop {
            let deadline = completed + settings.borrow_and_update().interval;
            tokio::select! {
                biased;
                () = cancel_token.cancelled() => {
                    debug!("Poll loop cancelled");
                    return;
                }
                () = sleep_until(deadline) => break,
                changed = settings.changed() => {
                    if changed.is_err() {
                        debug!("Poller handle dropped, exiting loop");
                        return;
                    }
                }
            }
        }
    }
}
