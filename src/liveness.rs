//! Probe / bootstrap / retry cycle used before the panel does any work.
//!
//! One cycle confirms one endpoint (the relay, or the background API):
//!
//! ```text
//! Idle -> Probing -> Available
//!            |
//!            +-> Bootstrapping -> (delay) -> Probing -> ...
//!            |
//!            +-> Exhausted (after `max_attempts` failed probes)
//! ```
//!
//! `Exhausted` only ends the current run; calling [`LivenessCycle::run`]
//! again starts over from `Idle` with a fresh counter.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Probes per run. A run always probes at least once.
    pub max_attempts: u32,
    /// Fixed pause between a failed probe and the next one
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(2),
        }
    }
}

/// Failed-probe counter for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    pub attempt: u32,
    pub max: u32,
}

impl RetryState {
    pub fn new(max: u32) -> Self {
        Self { attempt: 0, max }
    }

    /// Count a failed probe. Returns true once the run is exhausted.
    pub fn record_failure(&mut self) -> bool {
        self.attempt += 1;
        self.is_exhausted()
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    Idle,
    Probing,
    Bootstrapping,
    Available,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// `attempts` counts probes, including the successful one.
    Available { attempts: u32 },
    Exhausted { attempts: u32, last_error: String },
}

impl CycleOutcome {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }
}

pub struct LivenessCycle {
    name: String,
    policy: RetryPolicy,
    retry: RetryState,
    state: watch::Sender<LivenessState>,
}

impl LivenessCycle {
    pub fn new(name: impl Into<String>, policy: RetryPolicy) -> Self {
        let (state, _) = watch::channel(LivenessState::Idle);
        Self {
            name: name.into(),
            policy,
            retry: RetryState::new(policy.max_attempts),
            state,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LivenessState {
        *self.state.borrow()
    }

    pub fn retry_state(&self) -> RetryState {
        self.retry
    }

    /// Watch state transitions (e.g. to drive a status line).
    pub fn subscribe(&self) -> watch::Receiver<LivenessState> {
        self.state.subscribe()
    }

    fn set(&self, next: LivenessState) {
        tracing::debug!(cycle = %self.name, state = ?next, "liveness transition");
        self.state.send_replace(next);
    }

    /// Run one cycle to completion.
    ///
    /// `probe` confirms the endpoint. `bootstrap` is called after each failed
    /// probe except the last, with the number of failures so far; its errors
    /// are logged and otherwise ignored, since the next probe is the judge.
    pub async fn run<P, PF, B, BF>(&mut self, mut probe: P, mut bootstrap: B) -> CycleOutcome
    where
        P: FnMut() -> PF,
        PF: Future<Output = Result<(), String>>,
        B: FnMut(u32) -> BF,
        BF: Future<Output = Result<(), String>>,
    {
        self.retry = RetryState::new(self.policy.max_attempts);
        self.set(LivenessState::Idle);

        loop {
            self.set(LivenessState::Probing);
            let err = match probe().await {
                Ok(()) => {
                    let attempts = self.retry.attempt + 1;
                    self.retry.reset();
                    self.set(LivenessState::Available);
                    tracing::info!(cycle = %self.name, attempts, "endpoint available");
                    return CycleOutcome::Available { attempts };
                }
                Err(e) => e,
            };

            if self.retry.record_failure() {
                self.set(LivenessState::Exhausted);
                tracing::warn!(
                    cycle = %self.name,
                    attempts = self.retry.attempt,
                    "giving up: {err}"
                );
                return CycleOutcome::Exhausted {
                    attempts: self.retry.attempt,
                    last_error: err,
                };
            }

            tracing::info!(
                cycle = %self.name,
                attempt = self.retry.attempt,
                max = self.retry.max,
                "probe failed ({err}), bootstrapping"
            );
            self.set(LivenessState::Bootstrapping);
            if let Err(e) = bootstrap(self.retry.attempt).await {
                tracing::warn!(cycle = %self.name, "bootstrap failed: {e}");
            }
            tokio::time::sleep(self.policy.delay).await;
        }
    }
}
