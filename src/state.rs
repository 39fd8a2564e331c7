//! Lifecycle state tracking.
//!
//! Two kinds of memory live here:
//!
//! - [`LifecycleStatus`], the detector-side view, parsed from the device's
//!   `state` status key on every poll;
//! - [`LifecyclePhases`] and [`ReadinessFlags`], the orchestrator-side view:
//!   which lifecycle operation is in flight, and whether initialize and
//!   configure have ever completed.
//!
//! Phase entry is a single atomic compare-and-set, so overlapping point
//! writes cannot both claim the same operation; the loser observes the busy
//! flag and backs off.

use std::sync::atomic::{AtomicBool, Ordering};

/// Detector lifecycle state as reported by the device's `state` status key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStatus {
    Idle,
    Initializing,
    Configuring,
    /// Device is armed (reports `ready`) from a previous sequence.
    Armed,
    /// Exposure in progress (`acquire`).
    Triggering,
    Error,
    /// `na` or anything unrecognized.
    Unknown,
}

impl LifecycleStatus {
    /// Parse the device's `state` string.
    pub fn from_device(state: &str) -> Self {
        match state {
            "idle" => LifecycleStatus::Idle,
            "initialize" => LifecycleStatus::Initializing,
            "configure" => LifecycleStatus::Configuring,
            "ready" => LifecycleStatus::Armed,
            "acquire" => LifecycleStatus::Triggering,
            "error" => LifecycleStatus::Error,
            _ => LifecycleStatus::Unknown,
        }
    }

    /// Whether an initialize attempt landed the detector in a usable state.
    pub fn initialize_succeeded(&self) -> bool {
        !matches!(self, LifecycleStatus::Error | LifecycleStatus::Unknown)
    }

    /// Whether the detector must be re-initialized and re-configured before
    /// it can be armed for a new exposure.
    pub fn needs_recovery(&self) -> bool {
        matches!(
            self,
            LifecycleStatus::Error | LifecycleStatus::Unknown | LifecycleStatus::Armed
        )
    }
}

/// One orchestrator-side lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Restart,
    Initialize,
    Configure,
    Trigger,
}

/// Busy flags for the four lifecycle operations.
#[derive(Debug, Default)]
pub struct LifecyclePhases {
    restarting: AtomicBool,
    initializing: AtomicBool,
    configuring: AtomicBool,
    triggering: AtomicBool,
}

/// Clears its phase flag when dropped, so a phase cannot stay claimed
/// across an early return.
#[derive(Debug)]
pub struct PhaseGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl LifecyclePhases {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self, phase: Phase) -> &AtomicBool {
        match phase {
            Phase::Restart => &self.restarting,
            Phase::Initialize => &self.initializing,
            Phase::Configure => &self.configuring,
            Phase::Trigger => &self.triggering,
        }
    }

    /// Atomically claim a phase. Returns `None` if it is already in flight.
    pub fn try_begin(&self, phase: Phase) -> Option<PhaseGuard<'_>> {
        let flag = self.flag(phase);
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| PhaseGuard { flag })
    }

    pub fn is_active(&self, phase: Phase) -> bool {
        self.flag(phase).load(Ordering::SeqCst)
    }

    /// True while an initialize or configure is in flight anywhere in the
    /// session; arming must wait for both to clear.
    pub fn lifecycle_in_flight(&self) -> bool {
        self.is_active(Phase::Initialize) || self.is_active(Phase::Configure)
    }
}

/// Advisory memory of which lifecycle milestones have been reached.
#[derive(Debug, Default)]
pub struct ReadinessFlags {
    detector_initialized: AtomicBool,
    detector_configured: AtomicBool,
    parameters_pending: AtomicBool,
}

impl ReadinessFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detector_initialized(&self) -> bool {
        self.detector_initialized.load(Ordering::SeqCst)
    }

    pub fn set_detector_initialized(&self, value: bool) {
        self.detector_initialized.store(value, Ordering::SeqCst);
    }

    pub fn detector_configured(&self) -> bool {
        self.detector_configured.load(Ordering::SeqCst)
    }

    pub fn set_detector_configured(&self, value: bool) {
        self.detector_configured.store(value, Ordering::SeqCst);
    }

    /// Whether exposure parameters have been written since the last
    /// successful configure. Advisory only: the orchestrator surfaces this
    /// but never reapplies configuration on its own.
    pub fn parameters_pending(&self) -> bool {
        self.parameters_pending.load(Ordering::SeqCst)
    }

    pub fn set_parameters_pending(&self, value: bool) {
        self.parameters_pending.store(value, Ordering::SeqCst);
    }
}
