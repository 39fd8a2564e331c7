//! File harvesting and local deduplication.
//!
//! After an exposure the detector's file writer holds a master file plus
//! one data file per frame chunk. The harvester polls the store listing
//! until the expected count appears (or a bounded timeout elapses), dumps
//! every new file matching the configured prefix into the local destination
//! directory, and clears the remote store so it does not accumulate across
//! runs.
//!
//! The destination directory's contents ARE the deduplication ledger: a
//! name already present locally is never fetched again, and there is no
//! separate index to drift out of sync.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::json;

use crate::client::DeviceClient;
use crate::error::AppResult;
use crate::gate::CommGate;

/// Role of a harvested file within its run, derived from the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    /// Run metadata ("master") file
    Main,
    /// Frame data chunk
    Data,
    Other,
}

impl FileRole {
    pub fn classify(name: &str) -> Self {
        if name.contains("master") {
            FileRole::Main
        } else if name.contains("data") {
            FileRole::Data
        } else {
            FileRole::Other
        }
    }
}

/// One file dumped to the local destination directory.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestedFile {
    pub name: String,
    pub role: FileRole,
    pub retrieved_at: DateTime<Utc>,
}

/// Result of one harvest pass.
#[derive(Debug, Clone, Default)]
pub struct HarvestOutcome {
    /// Files downloaded this pass, in listing order.
    pub files: Vec<HarvestedFile>,
    /// Whether the expected file count appeared before the polling budget
    /// ran out. A partial harvest is usable, not an error.
    pub complete: bool,
}

/// Polls, downloads and deduplicates detector output files.
#[derive(Debug, Clone)]
pub struct FileHarvester {
    destination: PathBuf,
    poll_interval: Duration,
    timeout: Duration,
}

impl FileHarvester {
    pub fn new(destination: PathBuf) -> Self {
        Self {
            destination,
            poll_interval: Duration::from_millis(100),
            timeout: Duration::from_secs(20),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn destination(&self) -> &PathBuf {
        &self.destination
    }

    /// Wait for `expected_files` names to appear in the store, dump every
    /// new prefix-matching file locally, then clear the store and re-enable
    /// file writing (clearing disables it on the device).
    pub async fn harvest_and_clear<C>(
        &self,
        client: &C,
        gate: &CommGate,
        prefix: &str,
        expected_files: u32,
    ) -> AppResult<HarvestOutcome>
    where
        C: DeviceClient + ?Sized,
    {
        let listing = self.await_listing(client, gate, expected_files).await;
        let complete = listing.len() >= expected_files as usize;
        if !complete {
            warn!(
                "harvest timed out with {}/{} files listed, keeping partial results",
                listing.len(),
                expected_files
            );
        }

        let files = self.dump_listing(client, gate, prefix, listing).await?;
        self.clear_store(client, gate).await?;
        Ok(HarvestOutcome { files, complete })
    }

    /// Dump any new prefix-matching files from the current store listing
    /// without waiting for a complete set and without clearing the store.
    /// This is the periodic file-scanner path; deduplication makes it safe
    /// to run while an exposure is being written.
    pub async fn dump_new_files<C>(
        &self,
        client: &C,
        gate: &CommGate,
        prefix: &str,
    ) -> AppResult<Vec<HarvestedFile>>
    where
        C: DeviceClient + ?Sized,
    {
        let listing = gate.with_exclusive_access(client.filewriter_files()).await?;
        self.dump_listing(client, gate, prefix, listing).await
    }

    async fn dump_listing<C>(
        &self,
        client: &C,
        gate: &CommGate,
        prefix: &str,
        listing: Vec<String>,
    ) -> AppResult<Vec<HarvestedFile>>
    where
        C: DeviceClient + ?Sized,
    {
        let already_present = self.local_names().await?;

        let mut files = Vec::new();
        for name in listing {
            if already_present.contains(&name) {
                debug!("skipping '{}': already dumped locally", name);
                continue;
            }
            if !name.starts_with(prefix) {
                debug!("skipping '{}': does not match prefix '{}'", name, prefix);
                continue;
            }

            let saved = gate
                .with_exclusive_access(client.filewriter_save(&name, &self.destination))
                .await;
            match saved {
                Ok(()) => {
                    info!("dumped '{}' to {}", name, self.destination.display());
                    files.push(HarvestedFile {
                        role: FileRole::classify(&name),
                        name,
                        retrieved_at: Utc::now(),
                    });
                }
                Err(e) => warn!("failed to dump '{}': {}", name, e),
            }
        }
        Ok(files)
    }

    /// Clear the remote store and re-enable file writing.
    pub async fn clear_store<C>(&self, client: &C, gate: &CommGate) -> AppResult<()>
    where
        C: DeviceClient + ?Sized,
    {
        gate.with_exclusive_access(client.filewriter_command("clear"))
            .await?;
        gate.with_exclusive_access(client.set_filewriter_config("mode", json!("enabled")))
            .await
    }

    /// Poll the store listing until it reaches the expected size or the
    /// polling budget elapses; returns the last listing seen either way.
    async fn await_listing<C>(
        &self,
        client: &C,
        gate: &CommGate,
        expected_files: u32,
    ) -> Vec<String>
    where
        C: DeviceClient + ?Sized,
    {
        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut listing = Vec::new();

        loop {
            match gate.with_exclusive_access(client.filewriter_files()).await {
                Ok(names) => listing = names,
                Err(e) => debug!("file listing failed, will re-poll: {}", e),
            }

            if listing.len() >= expected_files as usize {
                return listing;
            }
            if tokio::time::Instant::now() >= deadline {
                return listing;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Names already present in the destination directory.
    async fn local_names(&self) -> AppResult<HashSet<String>> {
        let mut names = HashSet::new();
        let mut entries = tokio::fs::read_dir(&self.destination).await?;
        while let Some(entry) = entries.next_entry().await? {
            names.insert(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }
}
