//! Communication gate.
//!
//! The detector control unit mishandles interleaved requests, so every
//! discrete device call in the session is funneled through one async mutex.
//! The single deliberate exception is the mid-exposure `trigger` call: it
//! blocks on the device for the whole count time and must not starve the
//! status and temperature pollers, nor a later abort path.

use tokio::sync::Mutex;

/// Session-wide mutual exclusion for device API calls.
///
/// The gate never fails; it only serializes.
#[derive(Debug, Default)]
pub struct CommGate {
    lock: Mutex<()>,
}

impl CommGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` to completion while holding the gate.
    pub async fn with_exclusive_access<T>(&self, operation: impl std::future::Future<Output = T>) -> T {
        let _guard = self.lock.lock().await;
        operation.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_gated_operations_never_overlap() {
        let gate = Arc::new(CommGate::new());
        let in_flight = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                gate.with_exclusive_access(async {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
            }));
        }
        for task in tasks {
            task.await.expect("task");
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
