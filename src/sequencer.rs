//! Arm / trigger / disarm sequencer.
//!
//! The exposure command sequence is three independently-bounded phases.
//! Arm and disarm run under the communication gate; the trigger call is
//! deliberately ungated because it blocks on the device for the whole
//! exposure and must not starve the status pollers.
//!
//! Success criteria differ per phase and mirror the device API contract:
//! arm and disarm answer with a non-negative sequence id, trigger answers
//! with the completion sentinel `-1`. A phase that exhausts its attempts
//! logs and hands over to the next phase anyway: a stuck arm must not
//! prevent an attempted disarm, and the sequence as a whole completes
//! within a bounded wall-clock budget.

use log::{error, info};
use std::time::Duration;

use crate::client::{CommandReply, DeviceClient};
use crate::gate::CommGate;
use crate::retry::{run_retry, RetryPolicy};

const PHASE_ATTEMPTS: u32 = 10;
const ARM_PAUSE: Duration = Duration::from_millis(100);
const TRIGGER_PRE_PAUSE: Duration = Duration::from_millis(500);
const FAULT_PAUSE: Duration = Duration::from_secs(1);

fn arm_policy() -> RetryPolicy {
    RetryPolicy::new(PHASE_ATTEMPTS, ARM_PAUSE).with_fault_pause(FAULT_PAUSE)
}

fn trigger_policy() -> RetryPolicy {
    RetryPolicy::new(PHASE_ATTEMPTS, Duration::ZERO)
        .with_pre_pause(TRIGGER_PRE_PAUSE)
        .with_fault_pause(FAULT_PAUSE)
}

/// Arm and disarm succeed on any non-negative sequence id.
pub fn arm_accepted(reply: &CommandReply) -> bool {
    matches!(reply.sequence_id, Some(id) if id >= 0)
}

/// Trigger succeeds only on the device's completion sentinel.
pub fn trigger_accepted(reply: &CommandReply) -> bool {
    reply.sequence_id == Some(-1)
}

/// Which phases of a sequence produced a valid reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceReport {
    pub armed: bool,
    pub triggered: bool,
    pub disarmed: bool,
}

impl SequenceReport {
    pub fn all_succeeded(&self) -> bool {
        self.armed && self.triggered && self.disarmed
    }
}

/// Run the full arm → trigger → disarm sequence.
///
/// `on_trigger_start` is invoked immediately before each trigger attempt so
/// the caller can stamp the exposure start time for the countdown.
pub async fn run_arm_trigger_disarm<C>(
    client: &C,
    gate: &CommGate,
    on_trigger_start: impl Fn() + Send + Sync,
) -> SequenceReport
where
    C: DeviceClient + ?Sized,
{
    let mut report = SequenceReport::default();

    let armed = run_retry(
        "arm",
        &arm_policy(),
        move || gate.with_exclusive_access(client.detector_command("arm")),
        arm_accepted,
    )
    .await;
    match &armed {
        Some(reply) => {
            info!("detector armed, sequence id {:?}", reply.sequence_id);
            report.armed = true;
        }
        None => error!("arm phase exhausted its retry budget, continuing to trigger"),
    }

    // Ungated on purpose: the exposure may run for the full count time.
    let triggered = run_retry(
        "trigger",
        &trigger_policy(),
        move || {
            on_trigger_start();
            client.detector_command("trigger")
        },
        trigger_accepted,
    )
    .await;
    match triggered {
        Some(_) => {
            info!("exposure complete");
            report.triggered = true;
        }
        None => error!("trigger phase exhausted its retry budget, continuing to disarm"),
    }

    let disarmed = run_retry(
        "disarm",
        &arm_policy(),
        move || gate.with_exclusive_access(client.detector_command("disarm")),
        arm_accepted,
    )
    .await;
    match disarmed {
        Some(_) => report.disarmed = true,
        None => error!("disarm phase exhausted its retry budget"),
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockDetector;

    #[test]
    fn test_sentinel_asymmetry() {
        let non_negative = CommandReply {
            sequence_id: Some(0),
        };
        let completed = CommandReply {
            sequence_id: Some(-1),
        };
        let silent = CommandReply { sequence_id: None };

        assert!(arm_accepted(&non_negative));
        assert!(!arm_accepted(&completed));
        assert!(!arm_accepted(&silent));

        assert!(trigger_accepted(&completed));
        assert!(!trigger_accepted(&non_negative));
        assert!(!trigger_accepted(&silent));
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_sequence() {
        let mock = MockDetector::new();
        let gate = CommGate::new();

        let report = run_arm_trigger_disarm(&mock, &gate, || {}).await;

        assert!(report.all_succeeded());
        assert_eq!(mock.command_count("detector/arm"), 1);
        assert_eq!(mock.command_count("detector/trigger"), 1);
        assert_eq!(mock.command_count("detector/disarm"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_arm_still_reaches_disarm() {
        let mock = MockDetector::new();
        let gate = CommGate::new();
        // Arm never produces a valid id.
        mock.script_sequence_ids("arm", std::iter::repeat(None).take(PHASE_ATTEMPTS as usize));

        let report = run_arm_trigger_disarm(&mock, &gate, || {}).await;

        assert!(!report.armed);
        assert!(report.triggered);
        assert!(report.disarmed);
        assert_eq!(mock.command_count("detector/arm"), PHASE_ATTEMPTS as usize);
        assert_eq!(mock.command_count("detector/disarm"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_start_stamped_before_each_attempt() {
        let mock = MockDetector::new();
        let gate = CommGate::new();
        // First two trigger attempts answer with a foreign id.
        mock.script_sequence_ids("trigger", [Some(5), Some(9), Some(-1)]);

        let stamps = std::sync::atomic::AtomicU32::new(0);
        let report = run_arm_trigger_disarm(&mock, &gate, || {
            stamps.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        })
        .await;

        assert!(report.triggered);
        assert_eq!(stamps.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_faults_consume_trigger_budget() {
        let mock = MockDetector::new();
        let gate = CommGate::new();
        mock.inject_faults("trigger", PHASE_ATTEMPTS);

        let report = run_arm_trigger_disarm(&mock, &gate, || {}).await;

        assert!(report.armed);
        assert!(!report.triggered);
        assert!(report.disarmed);
        assert_eq!(
            mock.command_count("detector/trigger"),
            0,
            "faulted attempts never reach the device log"
        );
    }
}
