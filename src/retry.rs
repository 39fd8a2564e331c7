//! Declarative retry policies.
//!
//! Every retried device sequence in the orchestrator is an instance of the
//! same shape: a bounded number of attempts, a pacing schedule, and a
//! predicate deciding whether a reply counts as success. [`run_retry`]
//! implements that shape once, so each policy is data and each caller is
//! testable under `tokio`'s paused clock without real delays.

use log::{debug, warn};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::AppResult;

/// Pacing and bounds for a retried operation.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of attempts before giving up.
    pub max_attempts: u32,
    /// Pause before every attempt, including the first.
    pub pre_pause: Duration,
    /// Pause after an attempt whose reply was rejected by the predicate.
    pub pause: Duration,
    /// Pause after an attempt that failed with a transport fault.
    pub fault_pause: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, pause: Duration) -> Self {
        Self {
            max_attempts,
            pre_pause: Duration::ZERO,
            pause,
            fault_pause: pause,
        }
    }

    pub const fn with_pre_pause(mut self, pre_pause: Duration) -> Self {
        self.pre_pause = pre_pause;
        self
    }

    pub const fn with_fault_pause(mut self, fault_pause: Duration) -> Self {
        self.fault_pause = fault_pause;
        self
    }
}

/// Outcome of a bounded retry loop.
///
/// Exhaustion is not an error: the lifecycle policies treat a spent retry
/// budget as a logged, observable condition, never as a crash.
pub async fn run_retry<T, F, Fut, P>(
    label: &str,
    policy: &RetryPolicy,
    mut attempt: F,
    mut accept: P,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
    P: FnMut(&T) -> bool,
{
    for n in 1..=policy.max_attempts {
        if !policy.pre_pause.is_zero() {
            sleep(policy.pre_pause).await;
        }

        match attempt().await {
            Ok(value) if accept(&value) => {
                debug!("{}: succeeded on attempt {}/{}", label, n, policy.max_attempts);
                return Some(value);
            }
            Ok(_) => {
                debug!("{}: attempt {}/{} rejected", label, n, policy.max_attempts);
                if n < policy.max_attempts && !policy.pause.is_zero() {
                    sleep(policy.pause).await;
                }
            }
            Err(e) => {
                warn!("{}: attempt {}/{} failed: {}", label, n, policy.max_attempts, e);
                if n < policy.max_attempts && !policy.fault_pause.is_zero() {
                    sleep(policy.fault_pause).await;
                }
            }
        }
    }

    warn!("{}: giving up after {} attempts", label, policy.max_attempts);
    None
}
