//! Direct halt of the board: STOP, then RESET to neutral

use crate::config::TimingConfig;
use fretbot_core::ACTUATOR_COUNT;
use fretbot_link::{Link, LinkError, Packet, Reply};
use std::thread;
use std::time::Duration;

/// Halt all pending moves and drive every actuator to its neutral angle
///
/// Returns whether the controller acknowledged the reset within the wait.
pub fn stop_and_reset(
    link: &Link,
    neutral: [i16; ACTUATOR_COUNT],
    config: &TimingConfig,
) -> Result<bool, LinkError> {
    link.send(&Packet::Stop)?;
    log::info!("[stop] Sent STOP_MARKER (0xEE)");
    thread::sleep(Duration::from_millis(config.stop_settle_ms));

    link.send(&Packet::Reset { angles: neutral })?;
    log::info!("[reset] Sent RESET packet: {:?}", neutral);
    thread::sleep(Duration::from_millis(config.reset_ack_wait_ms));

    let acknowledged = link
        .drain_replies()?
        .iter()
        .any(|reply| *reply == Reply::ResetDone);
    if acknowledged {
        log::debug!("[reset] Controller acknowledged RESET");
    } else {
        log::warn!("[reset] No RESET_DONE within {} ms", config.reset_ack_wait_ms);
    }
    Ok(acknowledged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fretbot_link::{Connector, SimulatedController};

    #[test]
    fn test_stop_then_reset_in_order() {
        let device = SimulatedController::stepped(0, 0);
        let link = device.connect().unwrap();
        let mut neutral = [90i16; ACTUATOR_COUNT];
        neutral[12] = 88;

        let config = TimingConfig {
            stop_settle_ms: 0,
            reset_ack_wait_ms: 0,
            ..Default::default()
        };
        assert!(stop_and_reset(&link, neutral, &config).unwrap());

        assert_eq!(
            device.received(),
            vec![Packet::Stop, Packet::Reset { angles: neutral }]
        );
        assert_eq!(device.angles(), neutral);
    }

    #[test]
    fn test_missing_ack_is_not_an_error() {
        let device = SimulatedController::stepped(0, 0);
        device.set_mute(true);
        let link = device.connect().unwrap();
        let config = TimingConfig {
            stop_settle_ms: 0,
            reset_ack_wait_ms: 0,
            ..Default::default()
        };
        assert!(!stop_and_reset(&link, [90; ACTUATOR_COUNT], &config).unwrap());
    }
}
