//! HTTP transport for the detector's SIMPLON REST API.
//!
//! A thin, stateless wrapper: every trait method maps to a single request
//! against `http://<host>:<port>/<subsystem>/api/1.8.0/...`. No retry, no
//! state — policy lives in the orchestrator.
//!
//! The client sets a connect timeout but no overall request timeout: the
//! `trigger` command blocks on the device until the exposure completes,
//! which can legitimately take the full configured count time.

use async_trait::async_trait;
use log::debug;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

use super::{CommandReply, DeviceClient};
use crate::error::{AppResult, EigerError};

const API_VERSION: &str = "1.8.0";
const CONNECT_TIMEOUT_MS: u64 = 2000;

/// REST client for one detector control unit.
#[derive(Debug, Clone)]
pub struct SimplonClient {
    base: String,
    http: reqwest::Client,
}

impl SimplonClient {
    /// Create a client for the detector at `host:port`.
    pub fn new(host: &str, port: u16) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(CONNECT_TIMEOUT_MS))
            .build()
            .map_err(|e| EigerError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base: format!("http://{}:{}", host, port),
            http,
        })
    }

    fn url(&self, subsystem: &str, section: &str, key: &str) -> String {
        if key.is_empty() {
            format!("{}/{}/api/{}/{}", self.base, subsystem, API_VERSION, section)
        } else {
            format!(
                "{}/{}/api/{}/{}/{}",
                self.base, subsystem, API_VERSION, section, key
            )
        }
    }

    /// PUT with an empty body; returns the reply body if one was sent.
    async fn put_command(&self, subsystem: &str, command: &str) -> AppResult<Option<Value>> {
        let url = self.url(subsystem, "command", command);
        debug!("PUT {}", url);
        let response = self.http.put(&url).send().await?;
        if !response.status().is_success() {
            return Err(EigerError::Transport(format!(
                "{} answered {}",
                url,
                response.status()
            )));
        }
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        let body: Value = serde_json::from_slice(&bytes)
            .map_err(|e| EigerError::Protocol(format!("{}: {}", url, e)))?;
        Ok(Some(body))
    }

    /// PUT `{"value": ...}` to a configuration key.
    async fn put_value(&self, subsystem: &str, section: &str, key: &str, value: Value) -> AppResult<()> {
        let url = self.url(subsystem, section, key);
        debug!("PUT {} = {}", url, value);
        let response = self
            .http
            .put(&url)
            .json(&json!({ "value": value }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(EigerError::Transport(format!(
                "{} answered {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }

    /// GET a key and unwrap the `{"value": ...}` mapping.
    async fn get_value(&self, subsystem: &str, section: &str, key: &str) -> AppResult<Value> {
        let url = self.url(subsystem, section, key);
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(EigerError::Transport(format!(
                "{} answered {}",
                url,
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| EigerError::Protocol(format!("{}: {}", url, e)))?;
        body.get("value")
            .cloned()
            .ok_or_else(|| EigerError::Protocol(format!("{}: reply has no 'value' key", url)))
    }
}

#[async_trait]
impl DeviceClient for SimplonClient {
    async fn system_command(&self, command: &str) -> AppResult<CommandReply> {
        let body = self.put_command("system", command).await?;
        Ok(CommandReply::from_body(body.as_ref()))
    }

    async fn detector_command(&self, command: &str) -> AppResult<CommandReply> {
        let body = self.put_command("detector", command).await?;
        Ok(CommandReply::from_body(body.as_ref()))
    }

    async fn set_detector_config(&self, key: &str, value: Value) -> AppResult<()> {
        self.put_value("detector", "config", key, value).await
    }

    async fn detector_config(&self, key: &str) -> AppResult<Value> {
        self.get_value("detector", "config", key).await
    }

    async fn detector_status(&self, key: &str) -> AppResult<Value> {
        self.get_value("detector", "status", key).await
    }

    async fn set_filewriter_config(&self, key: &str, value: Value) -> AppResult<()> {
        self.put_value("filewriter", "config", key, value).await
    }

    async fn filewriter_command(&self, command: &str) -> AppResult<()> {
        self.put_command("filewriter", command).await.map(|_| ())
    }

    async fn filewriter_files(&self) -> AppResult<Vec<String>> {
        let url = self.url("filewriter", "files", "");
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(EigerError::Transport(format!(
                "{} answered {}",
                url,
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| EigerError::Protocol(format!("{}: {}", url, e)))?;
        // The listing arrives either bare or wrapped in {"value": [...]}.
        let listing = body.get("value").unwrap_or(&body);
        let names = listing
            .as_array()
            .ok_or_else(|| EigerError::Protocol(format!("{}: reply is not a file list", url)))?
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        Ok(names)
    }

    async fn filewriter_save(&self, filename: &str, destination: &Path) -> AppResult<()> {
        let url = format!("{}/data/{}", self.base, filename);
        debug!("GET {}", url);
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(EigerError::Transport(format!(
                "{} answered {}",
                url,
                response.status()
            )));
        }
        let bytes = response.bytes().await?;
        tokio::fs::write(destination.join(filename), &bytes).await?;
        Ok(())
    }

    async fn set_monitor_config(&self, key: &str, value: Value) -> AppResult<()> {
        self.put_value("monitor", "config", key, value).await
    }

    async fn set_stream_config(&self, key: &str, value: Value) -> AppResult<()> {
        self.put_value("stream", "config", key, value).await
    }
}
