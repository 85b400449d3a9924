use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::join_all;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{CollectorConfig, TargetSpec, DEFAULT_COLLECTION_INTERVAL};
use crate::error::{ConfigError, PollError, SchedulerError};
use crate::poller::TargetPoller;
use crate::sink::Sink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

/// The result of polling one target during a round
#[derive(Debug)]
pub struct PollOutcome {
    pub endpoint: String,
    pub result: Result<usize, PollError>,
}

/// Polls every target on a fixed interval until shut down. Each round spawns one task per
/// target and waits for all of them before the next round can start, so there are never
/// more requests in flight than there are targets. A failed poll is logged and otherwise
/// ignored.
///
/// The lifecycle is one way: Idle -> Running -> Stopped. A stopped scheduler can't be
/// started again.
pub struct Scheduler {
    targets: Vec<Arc<TargetSpec>>,
    interval: Duration,
    poller: Arc<TargetPoller>,
    state: Mutex<SchedulerState>,
    cancel: CancellationToken,
    done: CancellationToken,
}

impl Scheduler {
    /// Validate `config` and build a scheduler that delivers to `sink`
    pub fn from_config(
        mut config: CollectorConfig,
        sink: Arc<dyn Sink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(config, TargetPoller::new(sink)))
    }

    /// Build a scheduler from an already validated config. A zero interval still gets
    /// the default.
    pub fn new(config: CollectorConfig, poller: TargetPoller) -> Self {
        let interval = if config.collection_interval.is_zero() {
            DEFAULT_COLLECTION_INTERVAL
        } else {
            config.collection_interval
        };
        Scheduler {
            targets: config.targets.into_iter().map(Arc::new).collect(),
            interval,
            poller: Arc::new(poller),
            state: Mutex::new(SchedulerState::Idle),
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.lock_state()
    }

    /// Start polling in the background. Returns straight away; the first round starts
    /// immediately. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut state = self.lock_state();
        match *state {
            SchedulerState::Running => return Err(SchedulerError::AlreadyRunning),
            SchedulerState::Stopped => return Err(SchedulerError::Stopped),
            SchedulerState::Idle => *state = SchedulerState::Running,
        }

        let targets = self.targets.clone();
        let poller = self.poller.clone();
        let cancel = self.cancel.clone();
        let done = self.done.clone();
        let interval = self.interval;
        tokio::spawn(async move {
            // Released however the loop ends, so shutdown never waits on a dead task
            let _done = done.drop_guard();
            run(targets, poller, interval, cancel).await;
        });

        info!(
            collection_interval = ?self.interval,
            targets = self.targets.len(),
            "Logs receiver started"
        );
        Ok(())
    }

    /// Cancel polling and wait for the loop, and any polls it has in flight, to finish.
    /// Calling this again just waits for the same thing.
    pub async fn shutdown(&self) {
        let previous = {
            let mut state = self.lock_state();
            std::mem::replace(&mut *state, SchedulerState::Stopped)
        };
        if previous == SchedulerState::Idle {
            self.done.cancel();
        }

        self.cancel.cancel();
        self.done.cancelled().await;

        if previous != SchedulerState::Stopped {
            info!("Logs receiver stopped");
        }
    }

    /// Run a single round over every target, outside of the interval loop
    pub async fn poll_all(&self) -> Vec<PollOutcome> {
        poll_targets(&self.targets, &self.poller, &self.cancel).await
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[instrument(level = "debug", skip_all)]
async fn run(
    targets: Vec<Arc<TargetSpec>>,
    poller: Arc<TargetPoller>,
    interval: Duration,
    cancel: CancellationToken,
) {
    // The first tick completes immediately, giving us the poll-on-start
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                poll_targets(&targets, &poller, &cancel).await;
            }
        }
    }
    debug!("Polling loop exited");
}

async fn poll_targets(
    targets: &[Arc<TargetSpec>],
    poller: &Arc<TargetPoller>,
    cancel: &CancellationToken,
) -> Vec<PollOutcome> {
    let handles: Vec<_> = targets
        .iter()
        .map(|target| {
            let target = target.clone();
            let poller = poller.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(PollError::Cancelled),
                    result = poller.poll_once(&target) => result,
                }
            })
        })
        .collect();

    let mut succeeded = 0;
    let mut outcomes = Vec::with_capacity(targets.len());
    for (target, joined) in targets.iter().zip(join_all(handles).await) {
        let result = joined.unwrap_or_else(|e| {
            warn!(endpoint = %target.endpoint, "Poll task did not complete: {}", e);
            Err(PollError::Aborted(e.to_string()))
        });
        match &result {
            Ok(_) => succeeded += 1,
            Err(PollError::Cancelled) => {
                debug!(endpoint = %target.endpoint, "Poll cancelled")
            }
            Err(e) => error!(endpoint = %target.endpoint, error = %e, "Failed to poll target"),
        }
        outcomes.push(PollOutcome {
            endpoint: target.endpoint.clone(),
            result,
        });
    }

    debug!(
        succeeded,
        failed = outcomes.len() - succeeded,
        "Finished polling targets"
    );
    outcomes
}
