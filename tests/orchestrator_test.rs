//! Integration tests driving the orchestrator against the mock detector.

use std::sync::Arc;

use serde_json::json;
use tokio_test::assert_err;

use eiger_orch::client::MockDetector;
use eiger_orch::config::{
    ApplicationSettings, DetectorSettings, Settings, StorageSettings, TimingSettings,
};
use eiger_orch::orchestrator::Orchestrator;
use eiger_orch::points::PointValue;

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

fn build(dir: &tempfile::TempDir) -> (MockDetector, Arc<Orchestrator>) {
    let mock = MockDetector::new();
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(mock.clone()),
        &test_settings(dir),
    ));
    (mock, orchestrator)
}

#[tokio::test(start_paused = true)]
async fn initialize_gives_up_after_five_attempts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mock, orchestrator) = build(&dir);
    // The detector lands in `error` after every initialize.
    mock.script_initialize_states(["error", "error", "error", "error", "error"]);

    orchestrator.initialize().await;

    assert_eq!(mock.command_count("detector/initialize"), 5);
    assert!(!orchestrator.readiness().detector_initialized());
}

#[tokio::test(start_paused = true)]
async fn initialize_recovers_from_transient_faults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mock, orchestrator) = build(&dir);
    mock.inject_faults("initialize", 2);

    orchestrator.initialize().await;

    assert!(orchestrator.readiness().detector_initialized());
    // Two faulted attempts plus the successful third.
    assert_eq!(mock.command_count("detector/initialize"), 1);
}

#[tokio::test(start_paused = true)]
async fn configure_initializes_an_uninitialized_detector_first() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mock, orchestrator) = build(&dir);
    assert!(!orchestrator.readiness().detector_initialized());

    orchestrator.configure().await;

    assert_eq!(mock.command_count("detector/initialize"), 1);
    assert!(orchestrator.readiness().detector_configured());
    // Configuration values arrived on the hardware.
    assert_eq!(
        mock.detector_config_value("photon_energy"),
        Some(json!(8050.0))
    );
    assert_eq!(mock.detector_config_value("trigger_mode"), Some(json!("ints")));
    assert_eq!(
        mock.filewriter_config_value("name_pattern"),
        Some(json!("eiger_$id"))
    );
}

#[tokio::test(start_paused = true)]
async fn configure_pushes_derived_frame_count() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mock, orchestrator) = build(&dir);

    orchestrator
        .handle_write("CountTime", PointValue::Float(600.0))
        .await
        .expect("count time write");
    orchestrator
        .handle_write("FrameTime", PointValue::Float(10.0))
        .await
        .expect("frame time write");
    orchestrator.configure().await;

    assert_eq!(mock.detector_config_value("nimages"), Some(json!(60)));
    assert_eq!(mock.detector_config_value("count_time"), Some(json!(600.0)));
    assert_eq!(mock.detector_config_value("ntrigger"), Some(json!(1)));
}

#[tokio::test(start_paused = true)]
async fn parameter_writes_stay_pending_until_configured() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mock, orchestrator) = build(&dir);

    orchestrator
        .handle_write("PhotonEnergy", PointValue::Float(12000.0))
        .await
        .expect("photon energy write");
    assert!(orchestrator.readiness().parameters_pending());
    // Nothing reached the hardware yet.
    assert_eq!(mock.detector_config_value("photon_energy"), None);

    orchestrator.configure().await;

    assert!(!orchestrator.readiness().parameters_pending());
    assert_eq!(
        mock.detector_config_value("photon_energy"),
        Some(json!(12000.0))
    );
}

#[tokio::test(start_paused = true)]
async fn unknown_and_mistyped_writes_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_mock, orchestrator) = build(&dir);

    assert_err!(
        orchestrator
            .handle_write("NoSuchPoint", PointValue::Bool(true))
            .await
    );
    assert_err!(
        orchestrator
            .handle_write("PhotonEnergy", PointValue::Text("high".to_string()))
            .await
    );
    assert_err!(
        orchestrator
            .handle_write("FramesPerFile", PointValue::Int(0))
            .await
    );
}

#[tokio::test(start_paused = true)]
async fn trigger_runs_the_full_sequence_and_harvests() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mock, orchestrator) = build(&dir);

    orchestrator
        .handle_write("Trigger", PointValue::Bool(true))
        .await
        .expect("trigger write");

    // The fresh detector reported `na`, so recovery ran first.
    let log = mock.command_log();
    let position = |needle: &str| {
        log.iter()
            .position(|c| c == needle)
            .unwrap_or_else(|| panic!("'{}' missing from {:?}", needle, log))
    };
    assert!(position("detector/initialize") < position("detector/arm"));
    assert!(position("detector/arm") < position("detector/trigger"));
    assert!(position("detector/trigger") < position("detector/disarm"));

    // Both output files were dumped locally and tracked by role.
    let latest = orchestrator.latest_files();
    assert_eq!(latest.main.as_deref(), Some("eiger_1_master.h5"));
    assert_eq!(latest.data.as_deref(), Some("eiger_1_data_000001.h5"));
    assert!(dir.path().join("eiger_1_master.h5").is_file());
    assert!(dir.path().join("eiger_1_data_000001.h5").is_file());

    // The remote store was cleared and re-enabled for the next run.
    assert!(mock.files_in_store().is_empty());
    assert_eq!(
        mock.filewriter_config_value("mode"),
        Some(json!("enabled"))
    );
}

#[tokio::test(start_paused = true)]
async fn trigger_restarts_an_errored_detector() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mock, orchestrator) = build(&dir);
    mock.set_detector_state("error");

    orchestrator.trigger().await;

    let log = mock.command_log();
    let restart = log
        .iter()
        .position(|c| c == "system/restart")
        .expect("restart issued");
    let initialize = log
        .iter()
        .position(|c| c == "detector/initialize")
        .expect("initialize issued");
    let arm = log
        .iter()
        .position(|c| c == "detector/arm")
        .expect("arm issued");
    assert!(restart < initialize);
    assert!(initialize < arm);
}

#[tokio::test(start_paused = true)]
async fn second_harvest_skips_files_already_dumped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mock, orchestrator) = build(&dir);

    orchestrator.trigger().await;
    assert_eq!(mock.saved_files().len(), 2);

    // Same names reappear in the store; nothing is fetched again.
    mock.push_file("eiger_1_master.h5");
    mock.push_file("eiger_1_data_000001.h5");
    orchestrator.trigger().await;

    let downloads_of_first_run: usize = mock
        .saved_files()
        .iter()
        .filter(|(name, _)| name.starts_with("eiger_1_"))
        .count();
    assert_eq!(downloads_of_first_run, 2);
}

#[tokio::test(start_paused = true)]
async fn post_exposure_hooks_run_after_harvest() {
    use async_trait::async_trait;
    use eiger_orch::error::AppResult;
    use eiger_orch::harvest::HarvestOutcome;
    use eiger_orch::orchestrator::PostExposureHook;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHook {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl PostExposureHook for CountingHook {
        async fn execute(&self, outcome: &HarvestOutcome) -> AppResult<()> {
            self.seen.fetch_add(outcome.files.len(), Ordering::SeqCst);
            Ok(())
        }
    }

    let dir = tempfile::tempdir().expect("tempdir");
    let mock = MockDetector::new();
    let hook = Arc::new(CountingHook {
        seen: AtomicUsize::new(0),
    });
    let orchestrator =
        Orchestrator::new(Arc::new(mock.clone()), &test_settings(&dir)).with_hook(hook.clone());

    orchestrator.trigger().await;

    assert_eq!(hook.seen.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn stuck_phases_never_block_the_sequence() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mock, orchestrator) = build(&dir);
    // Arm never returns a usable sequence id.
    mock.script_sequence_ids("arm", std::iter::repeat(None).take(10));

    orchestrator.trigger().await;

    assert_eq!(mock.command_count("detector/arm"), 10);
    assert_eq!(mock.command_count("detector/disarm"), 1);
    assert!(!orchestrator.phases().is_active(eiger_orch::state::Phase::Trigger));
}
