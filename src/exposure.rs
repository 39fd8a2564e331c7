//! Exposure parameters and timing math.
//!
//! [`ExposureConfig`] is the operator-writable parameter set, pushed to the
//! hardware as a block by the configure operation. The frame count is never
//! stored: it is always derived as `ceil(count_time / frame_time)` so the
//! two timing inputs can be written in either order without going stale.
//!
//! [`ExposureRun`] is the ephemeral record of an exposure in progress; the
//! countdown task reads it at ~1 Hz and the harvester sizes its expectation
//! from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Published on the SecondsRemaining point while no exposure is active,
/// distinguishing "idle" from "zero seconds left."
pub const COUNTDOWN_IDLE_SENTINEL: i64 = -999;

/// Operator-settable exposure parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureConfig {
    /// Photon energy in eV
    pub photon_energy: f64,
    /// Detection threshold energy in eV, nominally half the photon energy
    pub threshold_energy: f64,
    /// Total exposure time in seconds
    pub count_time: f64,
    /// Single frame time in seconds, nominally <= count_time
    pub frame_time: f64,
    pub count_rate_correction: bool,
    pub flat_field_correction: bool,
    pub pixel_mask_correction: bool,
    /// Prefix of the main and data output files
    pub output_file_prefix: String,
    /// Frame cap per data file on the device file writer
    pub frames_per_file: u32,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            photon_energy: 8050.0,
            threshold_energy: 4025.0,
            count_time: 1.0,
            frame_time: 1.0,
            count_rate_correction: true,
            flat_field_correction: true,
            pixel_mask_correction: true,
            output_file_prefix: "eiger_".to_string(),
            frames_per_file: 1800,
        }
    }
}

impl ExposureConfig {
    /// Number of frames in one exposure: `ceil(count_time / frame_time)`,
    /// never below 1.
    pub fn frame_count(&self) -> u32 {
        if self.count_time <= 0.0 || self.frame_time <= 0.0 {
            return 1;
        }
        let frames = (self.count_time / self.frame_time).ceil();
        (frames as u32).max(1)
    }
}

/// Ephemeral record of an exposure in progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureRun {
    /// Captured immediately before the trigger command is issued.
    pub start_time: DateTime<Utc>,
    pub count_time: f64,
    pub frame_count: u32,
    pub frames_per_file: u32,
}

impl ExposureRun {
    /// Files the run is expected to produce: one data file per
    /// `frames_per_file` chunk, plus the run's master file.
    pub fn expected_files(&self) -> u32 {
        if self.frames_per_file == 0 {
            return 2;
        }
        self.frame_count.div_ceil(self.frames_per_file) + 1
    }

    /// Whole seconds left in the exposure, floored at zero.
    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> i64 {
        let elapsed = (now - self.start_time).num_milliseconds() as f64 / 1000.0;
        (self.count_time - elapsed).max(0.0) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn config(count_time: f64, frame_time: f64) -> ExposureConfig {
        ExposureConfig {
            count_time,
            frame_time,
            ..ExposureConfig::default()
        }
    }

    #[test]
    fn test_frame_count_is_ceiling() {
        assert_eq!(config(600.0, 10.0).frame_count(), 60);
        assert_eq!(config(601.0, 10.0).frame_count(), 61);
    }

    #[test]
    fn test_frame_count_floors_at_one() {
        assert_eq!(config(0.1, 10.0).frame_count(), 1);
        assert_eq!(config(0.0, 10.0).frame_count(), 1);
        assert_eq!(config(1.0, 0.0).frame_count(), 1);
    }

    #[test]
    fn test_expected_files_includes_master() {
        let run = ExposureRun {
            start_time: Utc::now(),
            count_time: 3600.0,
            frame_count: 3600,
            frames_per_file: 1800,
        };
        assert_eq!(run.expected_files(), 3);

        let uneven = ExposureRun {
            frame_count: 3601,
            ..run
        };
        assert_eq!(uneven.expected_files(), 4);
    }

    #[test]
    fn test_countdown_floors_at_zero() {
        let start = Utc::now();
        let run = ExposureRun {
            start_time: start,
            count_time: 10.0,
            frame_count: 10,
            frames_per_file: 1800,
        };

        assert_eq!(run.seconds_remaining(start), 10);
        assert_eq!(run.seconds_remaining(start + TimeDelta::seconds(4)), 6);
        assert_eq!(run.seconds_remaining(start + TimeDelta::seconds(10)), 0);
        assert_eq!(run.seconds_remaining(start + TimeDelta::seconds(60)), 0);
    }

    #[test]
    fn test_countdown_monotonic_non_increasing() {
        let start = Utc::now();
        let run = ExposureRun {
            start_time: start,
            count_time: 5.0,
            frame_count: 5,
            frames_per_file: 1800,
        };

        let mut last = i64::MAX;
        for tick in 0..8 {
            let remaining = run.seconds_remaining(start + TimeDelta::seconds(tick));
            assert!(remaining <= last);
            assert!(remaining >= 0);
            last = remaining;
        }
    }
}
