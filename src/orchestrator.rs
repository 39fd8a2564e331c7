//! Orchestrator façade.
//!
//! The entry point the external point layer drives: point writes arrive
//! through [`Orchestrator::handle_write`], get resolved against the point
//! table, and run the matching lifecycle operation. Readbacks leave on the
//! point bus as side effects.
//!
//! Every discrete device call goes through the communication gate; the one
//! exception is the trigger call inside the sequencer, which runs ungated
//! so the status pollers stay responsive during a long exposure.

use async_trait::async_trait;
use chrono::Utc;
use log::{error, info, warn};
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::sleep;

use crate::client::DeviceClient;
use crate::config::{Settings, TimingSettings};
use crate::error::{AppResult, EigerError};
use crate::exposure::{ExposureConfig, ExposureRun, COUNTDOWN_IDLE_SENTINEL};
use crate::gate::CommGate;
use crate::harvest::{FileHarvester, FileRole, HarvestOutcome};
use crate::points::{names, PointBus, PointValue, WritePoint};
use crate::retry::{run_retry, RetryPolicy};
use crate::sequencer;
use crate::state::{LifecyclePhases, LifecycleStatus, Phase, ReadinessFlags};

const INITIALIZE_ATTEMPTS: u32 = 5;
const INITIALIZE_PAUSE: Duration = Duration::from_secs(1);

/// Runs after a harvest completes, best-effort. A failing hook logs and
/// never aborts the exposure sequence.
#[async_trait]
pub trait PostExposureHook: Send + Sync {
    async fn execute(&self, outcome: &HarvestOutcome) -> AppResult<()>;
}

/// Most recent harvested file names, by role.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatestFiles {
    pub any: Option<String>,
    pub main: Option<String>,
    pub data: Option<String>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Single-detector control orchestrator.
pub struct Orchestrator {
    client: Arc<dyn DeviceClient>,
    gate: CommGate,
    phases: LifecyclePhases,
    readiness: ReadinessFlags,
    exposure: Mutex<ExposureConfig>,
    active_run: Mutex<Option<ExposureRun>>,
    latest: Mutex<LatestFiles>,
    harvester: FileHarvester,
    points: PointBus,
    hooks: Vec<Arc<dyn PostExposureHook>>,
    timing: TimingSettings,
}

impl Orchestrator {
    pub fn new(client: Arc<dyn DeviceClient>, settings: &Settings) -> Self {
        let harvester = FileHarvester::new(settings.storage.data_dir.clone())
            .with_poll_interval(Duration::from_millis(settings.timing.harvest_poll_ms))
            .with_timeout(Duration::from_secs(settings.timing.harvest_timeout_s));

        let exposure = ExposureConfig {
            output_file_prefix: settings.storage.output_file_prefix.clone(),
            ..ExposureConfig::default()
        };

        Self {
            client,
            gate: CommGate::new(),
            phases: LifecyclePhases::new(),
            readiness: ReadinessFlags::new(),
            exposure: Mutex::new(exposure),
            active_run: Mutex::new(None),
            latest: Mutex::new(LatestFiles::default()),
            harvester,
            points: PointBus::default(),
            hooks: Vec::new(),
            timing: settings.timing.clone(),
        }
    }

    /// Register a post-exposure hook.
    pub fn with_hook(mut self, hook: Arc<dyn PostExposureHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn points(&self) -> &PointBus {
        &self.points
    }

    pub fn readiness(&self) -> &ReadinessFlags {
        &self.readiness
    }

    pub fn phases(&self) -> &LifecyclePhases {
        &self.phases
    }

    /// Current exposure parameter snapshot.
    pub fn exposure_config(&self) -> ExposureConfig {
        lock(&self.exposure).clone()
    }

    /// Most recent harvested file names.
    pub fn latest_files(&self) -> LatestFiles {
        lock(&self.latest).clone()
    }

    // ---- point dispatch ----------------------------------------------------

    /// Resolve a named point write and run the matching operation.
    pub async fn handle_write(&self, name: &str, value: PointValue) -> AppResult<()> {
        let point = WritePoint::from_name(name).ok_or_else(|| {
            EigerError::Validation(format!("unknown control point '{}'", name))
        })?;
        self.dispatch_write(point, value).await
    }

    /// Uniform dispatcher from the point table to façade operations.
    pub async fn dispatch_write(&self, point: WritePoint, value: PointValue) -> AppResult<()> {
        match point {
            WritePoint::Restart => {
                if value.as_bool().unwrap_or(false) {
                    self.restart().await;
                }
                Ok(())
            }
            WritePoint::Initialize => {
                if value.as_bool().unwrap_or(false) {
                    self.initialize().await;
                }
                Ok(())
            }
            WritePoint::Configure => {
                if value.as_bool().unwrap_or(false) {
                    self.configure().await;
                }
                Ok(())
            }
            WritePoint::Trigger => {
                if value.as_bool().unwrap_or(false) {
                    self.trigger().await;
                }
                Ok(())
            }
            WritePoint::PhotonEnergy => {
                let v = self.require_f64(&value)?;
                self.update_exposure(|cfg| cfg.photon_energy = v);
                Ok(())
            }
            WritePoint::ThresholdEnergy => {
                let v = self.require_f64(&value)?;
                self.update_exposure(|cfg| cfg.threshold_energy = v);
                Ok(())
            }
            WritePoint::CountTime => {
                let v = self.require_f64(&value)?;
                self.update_exposure(|cfg| cfg.count_time = v);
                Ok(())
            }
            WritePoint::FrameTime => {
                let v = self.require_f64(&value)?;
                self.update_exposure(|cfg| cfg.frame_time = v);
                Ok(())
            }
            WritePoint::CountRateCorrection => {
                let v = self.require_bool(&value)?;
                self.update_exposure(|cfg| cfg.count_rate_correction = v);
                Ok(())
            }
            WritePoint::FlatFieldCorrection => {
                let v = self.require_bool(&value)?;
                self.update_exposure(|cfg| cfg.flat_field_correction = v);
                Ok(())
            }
            WritePoint::PixelMaskCorrection => {
                let v = self.require_bool(&value)?;
                self.update_exposure(|cfg| cfg.pixel_mask_correction = v);
                Ok(())
            }
            WritePoint::OutputFilePrefix => {
                let v = value
                    .as_text()
                    .ok_or_else(|| EigerError::Validation("prefix must be text".to_string()))?
                    .to_string();
                self.update_exposure(|cfg| cfg.output_file_prefix = v);
                Ok(())
            }
            WritePoint::FramesPerFile => {
                let v = value.as_u32().filter(|v| *v > 0).ok_or_else(|| {
                    EigerError::Validation("frames per file must be a positive integer".to_string())
                })?;
                self.update_exposure(|cfg| cfg.frames_per_file = v);
                Ok(())
            }
        }
    }

    fn require_f64(&self, value: &PointValue) -> AppResult<f64> {
        value
            .as_f64()
            .ok_or_else(|| EigerError::Validation("expected a numeric value".to_string()))
    }

    fn require_bool(&self, value: &PointValue) -> AppResult<bool> {
        value
            .as_bool()
            .ok_or_else(|| EigerError::Validation("expected a boolean value".to_string()))
    }

    /// Apply a parameter edit and mark the configuration as not yet pushed.
    fn update_exposure(&self, edit: impl FnOnce(&mut ExposureConfig)) {
        {
            let mut exposure = lock(&self.exposure);
            edit(&mut exposure);
        }
        self.readiness.set_parameters_pending(true);
        self.points
            .publish(names::PARAMETERS_PENDING_RBV, PointValue::Bool(true));
    }

    // ---- lifecycle operations ----------------------------------------------

    /// Fire-and-forget system restart. Not retried; the settle pause gives
    /// the control unit time to accept the command before anything else is
    /// sent.
    pub async fn restart(&self) {
        let Some(_guard) = self.phases.try_begin(Phase::Restart) else {
            warn!("restart already in flight, ignoring request");
            return;
        };
        self.points.publish(names::RESTART_RBV, PointValue::Bool(true));
        info!("restarting detector");

        if let Err(e) = self
            .gate
            .with_exclusive_access(self.client.system_command("restart"))
            .await
        {
            warn!("restart command failed: {}", e);
        }
        self.readiness.set_detector_initialized(false);
        self.readiness.set_detector_configured(false);
        sleep(Duration::from_millis(self.timing.restart_settle_ms)).await;

        self.points.publish(names::RESTART_RBV, PointValue::Bool(false));
    }

    /// Initialize the detector, retrying on transport faults and on a
    /// post-command `na`/`error` state. Exhausting the retry budget leaves
    /// the detector uninitialized and is not an error: the operation can be
    /// requested again.
    pub async fn initialize(&self) {
        let Some(_guard) = self.phases.try_begin(Phase::Initialize) else {
            info!("initialize already in flight, ignoring request");
            return;
        };
        self.points
            .publish(names::INITIALIZE_RBV, PointValue::Bool(true));
        self.readiness.set_detector_initialized(false);

        let policy = RetryPolicy::new(INITIALIZE_ATTEMPTS, INITIALIZE_PAUSE);
        let outcome = run_retry(
            "initialize",
            &policy,
            || {
                let this = self;
                async move {
                    this.gate
                        .with_exclusive_access(this.client.detector_command("initialize"))
                        .await?;
                    this.read_state_gated().await
                }
            },
            LifecycleStatus::initialize_succeeded,
        )
        .await;

        match outcome {
            Some(status) => {
                info!("detector initialized, state {:?}", status);
                self.readiness.set_detector_initialized(true);
            }
            None => error!(
                "initialize failed after {} attempts, detector remains uninitialized",
                INITIALIZE_ATTEMPTS
            ),
        }

        self.points
            .publish(names::INITIALIZE_RBV, PointValue::Bool(false));
    }

    /// Push the full exposure configuration to the hardware.
    ///
    /// Individual pushes are not retried here; on failure the whole
    /// operation is expected to be re-invoked through the Configure point.
    pub async fn configure(&self) {
        let Some(_guard) = self.phases.try_begin(Phase::Configure) else {
            info!("configure already in flight, ignoring request");
            return;
        };
        self.points
            .publish(names::CONFIGURE_RBV, PointValue::Bool(true));

        if !self.readiness.detector_initialized() {
            info!("detector not initialized, initializing before configure");
            self.initialize().await;
        }

        let snapshot = self.exposure_config();
        match self.push_configuration(&snapshot).await {
            Ok(()) => {
                info!(
                    "detector configured: {} frames of {} s",
                    snapshot.frame_count(),
                    snapshot.frame_time
                );
                self.readiness.set_detector_configured(true);
                self.readiness.set_parameters_pending(false);
                self.points
                    .publish(names::PARAMETERS_PENDING_RBV, PointValue::Bool(false));
            }
            Err(e) => {
                self.readiness.set_detector_configured(false);
                warn!("configure failed, re-invoke Configure to retry: {}", e);
            }
        }

        self.points
            .publish(names::CONFIGURE_RBV, PointValue::Bool(false));
    }

    async fn push_configuration(&self, cfg: &ExposureConfig) -> AppResult<()> {
        // Energy values
        self.set_detector("photon_energy", json!(cfg.photon_energy))
            .await?;
        self.set_detector("energy_threshold", json!(cfg.threshold_energy))
            .await?;

        // Timing values; nimages is derived, never stored
        self.set_detector("count_time", json!(cfg.count_time)).await?;
        self.set_detector("frame_time", json!(cfg.frame_time)).await?;
        self.set_detector("nimages", json!(cfg.frame_count())).await?;
        self.set_detector("ntrigger", json!(1)).await?;
        self.set_detector("trigger_mode", json!("ints")).await?;

        // Clearing the store disables writing, so it must precede the
        // file writer configuration that re-enables it.
        self.harvester.clear_store(self.client.as_ref(), &self.gate).await?;

        self.set_filewriter("mode", json!("enabled")).await?;
        self.set_filewriter(
            "name_pattern",
            json!(format!("{}$id", cfg.output_file_prefix)),
        )
        .await?;
        self.set_filewriter("compression_enabled", json!(true)).await?;
        self.set_filewriter("nimages_per_file", json!(cfg.frames_per_file))
            .await?;
        self.set_detector("compression", json!("bslz4")).await?;

        // Correction flags
        self.set_detector(
            "countrate_correction_applied",
            json!(cfg.count_rate_correction),
        )
        .await?;
        self.set_detector(
            "flatfield_correction_applied",
            json!(cfg.flat_field_correction),
        )
        .await?;
        self.set_detector("pixel_mask_applied", json!(cfg.pixel_mask_correction))
            .await?;

        // Monitor and stream interfaces stay off; files are the only output
        self.gate
            .with_exclusive_access(self.client.set_monitor_config("mode", json!("disabled")))
            .await?;
        self.gate
            .with_exclusive_access(self.client.set_stream_config("mode", json!("disabled")))
            .await?;

        Ok(())
    }

    /// Run a full exposure: precondition recovery, arm, trigger, disarm,
    /// then harvest. Never raises; progress and failures surface on the
    /// readback points and the log.
    pub async fn trigger(&self) {
        let Some(_guard) = self.phases.try_begin(Phase::Trigger) else {
            warn!("trigger already in flight, ignoring request");
            return;
        };
        self.points.publish(names::TRIGGER_RBV, PointValue::Bool(true));

        self.ensure_armable().await;
        self.await_quiescence().await;

        let snapshot = self.exposure_config();
        let template = ExposureRun {
            start_time: Utc::now(),
            count_time: snapshot.count_time,
            frame_count: snapshot.frame_count(),
            frames_per_file: snapshot.frames_per_file,
        };

        let report = sequencer::run_arm_trigger_disarm(self.client.as_ref(), &self.gate, || {
            *lock(&self.active_run) = Some(ExposureRun {
                start_time: Utc::now(),
                ..template
            });
        })
        .await;
        if !report.all_succeeded() {
            warn!(
                "exposure sequence incomplete (armed: {}, triggered: {}, disarmed: {})",
                report.armed, report.triggered, report.disarmed
            );
        }

        match self
            .harvester
            .harvest_and_clear(
                self.client.as_ref(),
                &self.gate,
                &snapshot.output_file_prefix,
                template.expected_files(),
            )
            .await
        {
            Ok(outcome) => {
                self.record_harvest(&outcome);
                for hook in &self.hooks {
                    if let Err(e) = hook.execute(&outcome).await {
                        warn!("post-exposure hook failed: {}", e);
                    }
                }
            }
            Err(e) => warn!("harvest failed: {}", e),
        }

        *lock(&self.active_run) = None;
        self.points.publish(
            names::SECONDS_REMAINING,
            PointValue::Int(COUNTDOWN_IDLE_SENTINEL),
        );
        self.points.publish(names::TRIGGER_RBV, PointValue::Bool(false));
    }

    /// Precondition recovery before arming: an errored detector is
    /// restarted first; any not-armable state forces re-initialize and
    /// re-configure.
    async fn ensure_armable(&self) {
        let status = match self.read_state_gated().await {
            Ok(status) => status,
            Err(e) => {
                warn!("state read before arming failed: {}", e);
                LifecycleStatus::Unknown
            }
        };

        if status == LifecycleStatus::Error {
            warn!("detector in error state, restarting before exposure");
            self.restart().await;
            sleep(Duration::from_millis(self.timing.recovery_settle_ms)).await;
            self.initialize().await;
            self.configure().await;
        } else if status.needs_recovery() {
            info!(
                "detector state {:?} is not armable, reinitializing",
                status
            );
            self.readiness.set_detector_initialized(false);
            self.initialize().await;
            self.configure().await;
        }
    }

    /// Bounded wait for concurrent initialize/configure operations to
    /// clear. Soft timeout: arming proceeds anyway and the arm phase's own
    /// validation catches whatever remains.
    async fn await_quiescence(&self) {
        for _ in 0..self.timing.quiescence_attempts {
            if !self.phases.lifecycle_in_flight() {
                return;
            }
            sleep(Duration::from_millis(self.timing.quiescence_poll_ms)).await;
        }
        warn!("lifecycle operations still pending, proceeding to arm anyway");
    }

    fn record_harvest(&self, outcome: &HarvestOutcome) {
        let mut latest = lock(&self.latest);
        for file in &outcome.files {
            latest.any = Some(file.name.clone());
            self.points
                .publish(names::LATEST_FILE, PointValue::Text(file.name.clone()));
            match file.role {
                FileRole::Main => {
                    latest.main = Some(file.name.clone());
                    self.points
                        .publish(names::LATEST_FILE_MAIN, PointValue::Text(file.name.clone()));
                }
                FileRole::Data => {
                    latest.data = Some(file.name.clone());
                    self.points
                        .publish(names::LATEST_FILE_DATA, PointValue::Text(file.name.clone()));
                }
                FileRole::Other => {}
            }
        }
    }

    /// One pass of the periodic file scanner: dump any new store files
    /// matching the prefix, without clearing the store. Failures degrade to
    /// a log line so the scanner keeps its cadence.
    pub async fn scan_files(&self) {
        let prefix = lock(&self.exposure).output_file_prefix.clone();
        match self
            .harvester
            .dump_new_files(self.client.as_ref(), &self.gate, &prefix)
            .await
        {
            Ok(files) if !files.is_empty() => {
                self.record_harvest(&HarvestOutcome {
                    files,
                    complete: true,
                });
            }
            Ok(_) => {}
            Err(e) => warn!("file scan failed: {}", e),
        }
    }

    // ---- device reads ------------------------------------------------------

    async fn read_state_gated(&self) -> AppResult<LifecycleStatus> {
        let value = self
            .gate
            .with_exclusive_access(self.client.detector_status("state"))
            .await?;
        Ok(LifecycleStatus::from_device(value.as_str().unwrap_or("na")))
    }

    /// Read a status key, degrading to a default on any failure.
    pub async fn read_status_text(&self, key: &str, default: &str) -> String {
        match self
            .gate
            .with_exclusive_access(self.client.detector_status(key))
            .await
        {
            Ok(value) => value
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| default.to_string()),
            Err(_) => default.to_string(),
        }
    }

    /// Read a numeric status key, degrading to a default on any failure.
    pub async fn read_status_f64(&self, key: &str, default: f64) -> f64 {
        match self
            .gate
            .with_exclusive_access(self.client.detector_status(key))
            .await
        {
            Ok(value) => value.as_f64().unwrap_or(default),
            Err(_) => default,
        }
    }

    /// Read a numeric configuration key, degrading to a default on failure.
    pub async fn read_config_f64(&self, key: &str, default: f64) -> f64 {
        match self
            .gate
            .with_exclusive_access(self.client.detector_config(key))
            .await
        {
            Ok(value) => value.as_f64().unwrap_or(default),
            Err(_) => default,
        }
    }

    /// Publish the device-sourced readback points.
    pub async fn poll_device_status(&self) {
        let state = self.read_status_text("state", "unknown").await;
        self.points
            .publish(names::DETECTOR_STATE, PointValue::Text(state));

        let temperature = self.read_status_f64("temperature", -999.0).await;
        self.points
            .publish(names::DETECTOR_TEMPERATURE, PointValue::Float(temperature));

        let time = self.read_status_text("time", "unknown").await;
        self.points
            .publish(names::DETECTOR_TIME, PointValue::Text(time));

        let count_time = self.read_config_f64("count_time", -999.0).await;
        self.points
            .publish(names::COUNT_TIME_RBV, PointValue::Float(count_time));

        let frame_time = self.read_config_f64("frame_time", -999.0).await;
        self.points
            .publish(names::FRAME_TIME_RBV, PointValue::Float(frame_time));
    }

    /// Publish the exposure countdown, or the idle sentinel when no
    /// exposure is active.
    pub fn countdown_tick(&self) {
        let active = *lock(&self.active_run);
        let remaining = active
            .map(|run| run.seconds_remaining(Utc::now()))
            .unwrap_or(COUNTDOWN_IDLE_SENTINEL);
        self.points
            .publish(names::SECONDS_REMAINING, PointValue::Int(remaining));
    }

    async fn set_detector(&self, key: &str, value: serde_json::Value) -> AppResult<()> {
        self.gate
            .with_exclusive_access(self.client.set_detector_config(key, value))
            .await
    }

    async fn set_filewriter(&self, key: &str, value: serde_json::Value) -> AppResult<()> {
        self.gate
            .with_exclusive_access(self.client.set_filewriter_config(key, value))
            .await
    }
}
