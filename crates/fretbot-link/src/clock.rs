//! Clock synchronisation with the controller
//!
//! Every time the host sends is a controller-clock millisecond value. The
//! host reads the controller's counter, adds a lead time and declares that
//! instant the session origin with a SYNC packet.

use crate::error::{LinkError, Result};
use crate::protocol::{Packet, Reply};
use crate::transport::Link;

/// Silent reads tolerated while waiting for `TIME:`
pub const DEFAULT_TIME_REPLY_ATTEMPTS: u32 = 5;

/// Ask the controller for its millisecond counter
///
/// Lines other than `TIME:` are logged and skipped. Gives up with
/// [`LinkError::ReplyTimeout`] after `attempts` consecutive reads time out.
pub fn remote_time(link: &Link, attempts: u32) -> Result<u32> {
    link.send(&Packet::GetTime)?;

    let mut silent = 0;
    loop {
        match link.read_reply()? {
            Some(Reply::Time(ms)) => {
                log::debug!("[sync] Controller time = {} ms", ms);
                return Ok(ms);
            }
            Some(other) => log::debug!("From controller: {}", other),
            None => {
                silent += 1;
                if silent >= attempts {
                    return Err(LinkError::ReplyTimeout {
                        expected: "TIME",
                        attempts,
                    });
                }
            }
        }
    }
}

pub fn send_sync(link: &Link, origin_ms: u32) -> Result<()> {
    link.send(&Packet::Sync { origin_ms })?;
    log::info!("[sync] Sent SYNC @ {} ms", origin_ms);
    Ok(())
}

/// Establish the session origin `sync_delay_ms` after the controller's current time
pub fn synchronize(link: &Link, sync_delay_ms: u32, attempts: u32) -> Result<u32> {
    let now = remote_time(link, attempts)?;
    let origin = now.saturating_add(sync_delay_ms);
    send_sync(link, origin)?;
    Ok(origin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{SimClock, SimulatedController, SimulatorOptions};

    fn stepped(start_ms: u32) -> SimulatedController {
        SimulatedController::new(SimulatorOptions {
            start_ms,
            clock: SimClock::Stepped { step_ms: 0 },
            ..Default::default()
        })
    }

    #[test]
    fn test_synchronize_adds_delay_to_remote_time() {
        let device = stepped(4_200);
        let link = Link::new(device.clone());

        let origin = synchronize(&link, 1_000, 3).unwrap();
        assert_eq!(origin, 5_200);
        assert_eq!(device.sync_origin(), Some(5_200));
        assert_eq!(
            device.received(),
            vec![Packet::GetTime, Packet::Sync { origin_ms: 5_200 }]
        );
    }

    #[test]
    fn test_remote_time_skips_debug_lines() {
        let device = stepped(77);
        device.inject_line("RemoteControl: Servo drivers initialised.");
        let link = Link::new(device);
        assert_eq!(remote_time(&link, 1).unwrap(), 77);
    }

    #[test]
    fn test_silent_controller_times_out() {
        let device = stepped(0);
        device.set_mute(true);
        let link = Link::new(device);
        assert!(matches!(
            remote_time(&link, 3),
            Err(LinkError::ReplyTimeout { attempts: 3, .. })
        ));
    }
}
