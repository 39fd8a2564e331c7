//! Periodic background tasks.
//!
//! Two independent loops: the device status poller mirrors detector state,
//! temperature, time and the timing readbacks onto the point bus, and the
//! countdown task publishes the exposure countdown at 1 Hz. Both are plain
//! tokio tasks; the status poller's device reads go through the gate inside
//! the orchestrator, so they interleave safely with lifecycle operations
//! and keep running during an exposure.

use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::orchestrator::Orchestrator;

const COUNTDOWN_PERIOD: Duration = Duration::from_secs(1);

/// Spawn the device status poller.
pub fn spawn_status_poller(
    orchestrator: Arc<Orchestrator>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            debug!("polling device status");
            orchestrator.poll_device_status().await;
        }
    })
}

/// Spawn the 1 Hz exposure countdown task.
pub fn spawn_countdown(orchestrator: Arc<Orchestrator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(COUNTDOWN_PERIOD);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            orchestrator.countdown_tick();
        }
    })
}

/// Spawn the periodic file scanner, which dumps new store files locally
/// between exposures without clearing the store.
pub fn spawn_file_scanner(
    orchestrator: Arc<Orchestrator>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            orchestrator.scan_files().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockDetector;
    use crate::config::{
        ApplicationSettings, DetectorSettings, Settings, StorageSettings, TimingSettings,
    };
    use crate::exposure::COUNTDOWN_IDLE_SENTINEL;
    use crate::points::{names, PointValue};

    fn test_settings(dir: &tempfile::TempDir) -> Settings {
        Settings {
            application: ApplicationSettings::default(),
            detector: DetectorSettings {
                host: "127.0.0.1".to_string(),
                port: 80,
            },
            storage: StorageSettings {
                data_dir: dir.path().to_path_buf(),
                output_file_prefix: "eiger_".to_string(),
            },
            timing: TimingSettings::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_poller_publishes_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mock = MockDetector::new();
        mock.set_detector_state("idle");
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(mock),
            &test_settings(&dir),
        ));
        let mut rx = orchestrator.points().subscribe();

        let handle = spawn_status_poller(Arc::clone(&orchestrator), Duration::from_secs(5));

        let update = rx.recv().await.expect("state update");
        assert_eq!(update.name, names::DETECTOR_STATE);
        assert_eq!(update.value, PointValue::Text("idle".to_string()));

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_idles_at_sentinel() {
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(MockDetector::new()),
            &test_settings(&dir),
        ));
        let mut rx = orchestrator.points().subscribe();

        let handle = spawn_countdown(Arc::clone(&orchestrator));

        let update = rx.recv().await.expect("countdown update");
        assert_eq!(update.name, names::SECONDS_REMAINING);
        assert_eq!(update.value, PointValue::Int(COUNTDOWN_IDLE_SENTINEL));

        handle.abort();
    }
}
