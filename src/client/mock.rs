//! Scriptable mock detector.
//!
//! Implements [`DeviceClient`] against an in-memory detector model so the
//! orchestrator can be exercised without hardware, both from the test suite
//! and from `--mock` runs. Tests script the mock by queueing per-command
//! replies and injecting transport faults.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use super::{CommandReply, DeviceClient};
use crate::error::{AppResult, EigerError};

#[derive(Debug, Default)]
struct MockState {
    /// Value served for the `state` status key.
    detector_state: String,
    /// Other status keys (`temperature`, `time`, ...).
    status: HashMap<String, Value>,
    /// Detector configuration written so far.
    config: HashMap<String, Value>,
    /// File writer configuration written so far.
    filewriter_config: HashMap<String, Value>,
    monitor_config: HashMap<String, Value>,
    stream_config: HashMap<String, Value>,
    /// Names currently in the data store.
    files: Vec<String>,
    /// Chronological log of every command issued, e.g. `detector/arm`.
    command_log: Vec<String>,
    /// Scripted sequence ids for arm/trigger/disarm; when a queue is empty
    /// the mock answers with the happy-path id for that command.
    sequence_replies: HashMap<String, VecDeque<Option<i64>>>,
    /// Scripted detector states to enter after each `initialize`.
    initialize_states: VecDeque<String>,
    /// Remaining transport faults to inject, per operation name.
    faults: HashMap<String, u32>,
    /// Files saved locally as `(name, destination)`.
    saved: Vec<(String, PathBuf)>,
    /// Exposure series counter, substituted for `$id` in the name pattern.
    series: u64,
}

/// In-memory detector double. Cloning shares the underlying state.
#[derive(Debug, Clone)]
pub struct MockDetector {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDetector {
    pub fn new() -> Self {
        let mut state = MockState {
            detector_state: "na".to_string(),
            ..MockState::default()
        };
        state
            .status
            .insert("temperature".to_string(), json!(23.5));
        state
            .status
            .insert("time".to_string(), json!("2024-01-01T00:00:00Z"));
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consume one scripted fault for `operation`, if any.
    fn take_fault(&self, operation: &str) -> Option<EigerError> {
        let mut state = self.lock();
        match state.faults.get_mut(operation) {
            Some(n) if *n > 0 => {
                *n -= 1;
                Some(EigerError::Transport(format!(
                    "mock fault injected for '{}'",
                    operation
                )))
            }
            _ => None,
        }
    }

    // ---- scripting surface -------------------------------------------------

    /// Set the value served for the `state` status key.
    pub fn set_detector_state(&self, state: &str) {
        self.lock().detector_state = state.to_string();
    }

    /// Set an arbitrary status key.
    pub fn set_status(&self, key: &str, value: Value) {
        self.lock().status.insert(key.to_string(), value);
    }

    /// Queue the detector states entered after each successive `initialize`.
    pub fn script_initialize_states<I: IntoIterator<Item = &'static str>>(&self, states: I) {
        let mut guard = self.lock();
        guard
            .initialize_states
            .extend(states.into_iter().map(str::to_string));
    }

    /// Queue sequence-id replies for a command (`arm`, `trigger`, `disarm`).
    pub fn script_sequence_ids<I: IntoIterator<Item = Option<i64>>>(&self, command: &str, ids: I) {
        let mut guard = self.lock();
        guard
            .sequence_replies
            .entry(command.to_string())
            .or_default()
            .extend(ids);
    }

    /// Inject `count` transport faults for an operation name (`initialize`,
    /// `arm`, `files`, `save`, ...).
    pub fn inject_faults(&self, operation: &str, count: u32) {
        self.lock().faults.insert(operation.to_string(), count);
    }

    /// Put a file name into the data store.
    pub fn push_file(&self, name: &str) {
        self.lock().files.push(name.to_string());
    }

    // ---- inspection surface ------------------------------------------------

    /// Every command issued so far, as `subsystem/command` strings.
    pub fn command_log(&self) -> Vec<String> {
        self.lock().command_log.clone()
    }

    /// How many times `command` was issued.
    pub fn command_count(&self, command: &str) -> usize {
        let needle = command.to_string();
        self.lock()
            .command_log
            .iter()
            .filter(|c| **c == needle)
            .count()
    }

    /// A detector config value written by the orchestrator.
    pub fn detector_config_value(&self, key: &str) -> Option<Value> {
        self.lock().config.get(key).cloned()
    }

    /// A file writer config value written by the orchestrator.
    pub fn filewriter_config_value(&self, key: &str) -> Option<Value> {
        self.lock().filewriter_config.get(key).cloned()
    }

    /// Names currently in the data store.
    pub fn files_in_store(&self) -> Vec<String> {
        self.lock().files.clone()
    }

    /// Files saved locally, in download order.
    pub fn saved_files(&self) -> Vec<(String, PathBuf)> {
        self.lock().saved.clone()
    }

    fn happy_path_id(command: &str) -> Option<i64> {
        match command {
            "arm" | "disarm" => Some(1),
            "trigger" => Some(-1),
            _ => None,
        }
    }
}

#[async_trait]
impl DeviceClient for MockDetector {
    async fn system_command(&self, command: &str) -> AppResult<CommandReply> {
        if let Some(err) = self.take_fault(command) {
            return Err(err);
        }
        let mut state = self.lock();
        state.command_log.push(format!("system/{}", command));
        if command == "restart" {
            state.detector_state = "na".to_string();
        }
        Ok(CommandReply::default())
    }

    async fn detector_command(&self, command: &str) -> AppResult<CommandReply> {
        if let Some(err) = self.take_fault(command) {
            return Err(err);
        }
        let mut state = self.lock();
        state.command_log.push(format!("detector/{}", command));

        if command == "initialize" {
            state.detector_state = state
                .initialize_states
                .pop_front()
                .unwrap_or_else(|| "idle".to_string());
            return Ok(CommandReply::default());
        }

        let scripted = state
            .sequence_replies
            .get_mut(command)
            .and_then(VecDeque::pop_front);
        let sequence_id = match scripted {
            Some(id) => id,
            None => Self::happy_path_id(command),
        };

        // A completed exposure deposits its output files in the store, named
        // after the file writer's pattern.
        if command == "trigger" && sequence_id == Some(-1) {
            state.series += 1;
            let pattern = state
                .filewriter_config
                .get("name_pattern")
                .and_then(Value::as_str)
                .unwrap_or("series_$id")
                .to_string();
            let stem = pattern.replace("$id", &state.series.to_string());
            state.files.push(format!("{}_master.h5", stem));
            state.files.push(format!("{}_data_000001.h5", stem));
        }

        Ok(CommandReply { sequence_id })
    }

    async fn set_detector_config(&self, key: &str, value: Value) -> AppResult<()> {
        if let Some(err) = self.take_fault("set_detector_config") {
            return Err(err);
        }
        self.lock().config.insert(key.to_string(), value);
        Ok(())
    }

    async fn detector_config(&self, key: &str) -> AppResult<Value> {
        self.lock()
            .config
            .get(key)
            .cloned()
            .ok_or_else(|| EigerError::Protocol(format!("no config key '{}'", key)))
    }

    async fn detector_status(&self, key: &str) -> AppResult<Value> {
        if let Some(err) = self.take_fault("status") {
            return Err(err);
        }
        let state = self.lock();
        if key == "state" {
            return Ok(json!(state.detector_state));
        }
        state
            .status
            .get(key)
            .cloned()
            .ok_or_else(|| EigerError::Protocol(format!("no status key '{}'", key)))
    }

    async fn set_filewriter_config(&self, key: &str, value: Value) -> AppResult<()> {
        self.lock()
            .filewriter_config
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn filewriter_command(&self, command: &str) -> AppResult<()> {
        let mut state = self.lock();
        state.command_log.push(format!("filewriter/{}", command));
        if command == "clear" {
            state.files.clear();
            // Clearing the store also disables writing on the device.
            state
                .filewriter_config
                .insert("mode".to_string(), json!("disabled"));
        }
        Ok(())
    }

    async fn filewriter_files(&self) -> AppResult<Vec<String>> {
        if let Some(err) = self.take_fault("files") {
            return Err(err);
        }
        Ok(self.lock().files.clone())
    }

    async fn filewriter_save(&self, filename: &str, destination: &Path) -> AppResult<()> {
        if let Some(err) = self.take_fault("save") {
            return Err(err);
        }
        tokio::fs::write(destination.join(filename), b"mock frame data").await?;
        self.lock()
            .saved
            .push((filename.to_string(), destination.to_path_buf()));
        Ok(())
    }

    async fn set_monitor_config(&self, key: &str, value: Value) -> AppResult<()> {
        self.lock().monitor_config.insert(key.to_string(), value);
        Ok(())
    }

    async fn set_stream_config(&self, key: &str, value: Value) -> AppResult<()> {
        self.lock().stream_config.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_sequence_ids_then_happy_path() {
        let mock = MockDetector::new();
        mock.script_sequence_ids("arm", [None, Some(7)]);

        let first = mock.detector_command("arm").await.expect("arm");
        assert_eq!(first.sequence_id, None);
        let second = mock.detector_command("arm").await.expect("arm");
        assert_eq!(second.sequence_id, Some(7));
        // Queue drained: happy path answer.
        let third = mock.detector_command("arm").await.expect("arm");
        assert_eq!(third.sequence_id, Some(1));
    }

    #[tokio::test]
    async fn test_fault_injection_is_consumed() {
        let mock = MockDetector::new();
        mock.inject_faults("initialize", 2);

        assert!(mock.detector_command("initialize").await.is_err());
        assert!(mock.detector_command("initialize").await.is_err());
        assert!(mock.detector_command("initialize").await.is_ok());
    }

    #[tokio::test]
    async fn test_clear_disables_file_writing() {
        let mock = MockDetector::new();
        mock.push_file("eiger_1_master.h5");
        mock.filewriter_command("clear").await.expect("clear");
        assert!(mock.files_in_store().is_empty());
        assert_eq!(
            mock.filewriter_config_value("mode"),
            Some(json!("disabled"))
        );
    }
}
