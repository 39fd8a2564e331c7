//! Control and readback points.
//!
//! The process-variable layer that exposes named points to operators is an
//! external collaborator; this module is its contract. Writes arrive as a
//! `(name, value)` pair, resolved through an explicit table to a
//! [`WritePoint`] the orchestrator dispatches on. Readbacks leave as
//! [`PointUpdate`]s on a broadcast channel any number of consumers may
//! subscribe to.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

/// Point names exposed to the external point layer.
pub mod names {
    pub const RESTART: &str = "Restart";
    pub const RESTART_RBV: &str = "Restart_RBV";
    pub const INITIALIZE: &str = "Initialize";
    pub const INITIALIZE_RBV: &str = "Initialize_RBV";
    pub const CONFIGURE: &str = "Configure";
    pub const CONFIGURE_RBV: &str = "Configure_RBV";
    pub const TRIGGER: &str = "Trigger";
    pub const TRIGGER_RBV: &str = "Trigger_RBV";

    pub const PHOTON_ENERGY: &str = "PhotonEnergy";
    pub const THRESHOLD_ENERGY: &str = "ThresholdEnergy";
    pub const COUNT_TIME: &str = "CountTime";
    pub const FRAME_TIME: &str = "FrameTime";
    pub const COUNT_RATE_CORRECTION: &str = "CountRateCorrection";
    pub const FLAT_FIELD_CORRECTION: &str = "FlatFieldCorrection";
    pub const PIXEL_MASK_CORRECTION: &str = "PixelMaskCorrection";
    pub const OUTPUT_FILE_PREFIX: &str = "OutputFilePrefix";
    pub const FRAMES_PER_FILE: &str = "FramesPerFile";

    pub const DETECTOR_STATE: &str = "DetectorState";
    pub const DETECTOR_TEMPERATURE: &str = "DetectorTemperature";
    pub const DETECTOR_TIME: &str = "DetectorTime";
    pub const COUNT_TIME_RBV: &str = "CountTime_RBV";
    pub const FRAME_TIME_RBV: &str = "FrameTime_RBV";
    pub const SECONDS_REMAINING: &str = "SecondsRemaining";

    pub const LATEST_FILE: &str = "LatestFile";
    pub const LATEST_FILE_MAIN: &str = "LatestFileMain";
    pub const LATEST_FILE_DATA: &str = "LatestFileData";

    pub const PARAMETERS_PENDING_RBV: &str = "ParametersPending_RBV";
}

/// Value carried by a point write or readback update.
#[derive(Debug, Clone, PartialEq)]
pub enum PointValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Text(String),
}

impl PointValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PointValue::Float(v) => Some(*v),
            PointValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PointValue::Bool(v) => Some(*v),
            PointValue::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            PointValue::Int(v) if *v >= 0 => u32::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PointValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

/// Writable control points, resolved from point names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePoint {
    Restart,
    Initialize,
    Configure,
    Trigger,
    PhotonEnergy,
    ThresholdEnergy,
    CountTime,
    FrameTime,
    CountRateCorrection,
    FlatFieldCorrection,
    PixelMaskCorrection,
    OutputFilePrefix,
    FramesPerFile,
}

/// Name-to-handler table; the dispatcher resolves writes against this and
/// nothing else, so the set of accepted points is visible in one place.
pub const WRITE_TABLE: &[(&str, WritePoint)] = &[
    (names::RESTART, WritePoint::Restart),
    (names::INITIALIZE, WritePoint::Initialize),
    (names::CONFIGURE, WritePoint::Configure),
    (names::TRIGGER, WritePoint::Trigger),
    (names::PHOTON_ENERGY, WritePoint::PhotonEnergy),
    (names::THRESHOLD_ENERGY, WritePoint::ThresholdEnergy),
    (names::COUNT_TIME, WritePoint::CountTime),
    (names::FRAME_TIME, WritePoint::FrameTime),
    (names::COUNT_RATE_CORRECTION, WritePoint::CountRateCorrection),
    (names::FLAT_FIELD_CORRECTION, WritePoint::FlatFieldCorrection),
    (names::PIXEL_MASK_CORRECTION, WritePoint::PixelMaskCorrection),
    (names::OUTPUT_FILE_PREFIX, WritePoint::OutputFilePrefix),
    (names::FRAMES_PER_FILE, WritePoint::FramesPerFile),
];

impl WritePoint {
    pub fn from_name(name: &str) -> Option<Self> {
        WRITE_TABLE
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, point)| *point)
    }
}

/// One readback update.
#[derive(Debug, Clone)]
pub struct PointUpdate {
    pub name: &'static str,
    pub value: PointValue,
    pub timestamp: DateTime<Utc>,
}

/// Broadcast bus for readback updates.
///
/// A receiver is kept internally so publishing never observes a closed
/// channel when no external consumer is subscribed yet.
#[derive(Debug)]
pub struct PointBus {
    tx: broadcast::Sender<PointUpdate>,
    _rx_keeper: broadcast::Receiver<PointUpdate>,
}

impl PointBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = broadcast::channel(capacity);
        Self { tx, _rx_keeper: rx }
    }

    pub fn publish(&self, name: &'static str, value: PointValue) {
        let update = PointUpdate {
            name,
            value,
            timestamp: Utc::now(),
        };
        let _ = self.tx.send(update);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PointUpdate> {
        self.tx.subscribe()
    }
}

impl Default for PointBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_table_resolution() {
        assert_eq!(WritePoint::from_name("Trigger"), Some(WritePoint::Trigger));
        assert_eq!(
            WritePoint::from_name("PhotonEnergy"),
            Some(WritePoint::PhotonEnergy)
        );
        assert_eq!(WritePoint::from_name("NoSuchPoint"), None);
        // Readback names are not writable.
        assert_eq!(WritePoint::from_name("Trigger_RBV"), None);
    }

    #[tokio::test]
    async fn test_bus_delivers_updates_to_subscribers() {
        let bus = PointBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(names::SECONDS_REMAINING, PointValue::Int(42));
        let update = rx.recv().await.expect("update");
        assert_eq!(update.name, names::SECONDS_REMAINING);
        assert_eq!(update.value, PointValue::Int(42));
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let bus = PointBus::new(8);
        bus.publish(names::DETECTOR_STATE, PointValue::Text("idle".into()));
    }
}
