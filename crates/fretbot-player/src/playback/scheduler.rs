//! Windowed streaming of one song to the controller

use super::{CancelToken, PlaybackError, SessionPhase};
use crate::config::TimingConfig;
use fretbot_core::{Arrangement, CommandCatalog, PerformanceState, ScheduledEvent, Song, Timing};
use fretbot_link::{remote_time, synchronize, Link, Packet, Reply};
use std::thread;
use std::time::Duration;

/// How a session ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The controller reported `DONE`
    Completed,
    /// A stop request was observed
    Cancelled,
}

/// Play `song` over an open link
///
/// Synchronises clocks, then streams every event whose controller time falls
/// within `window_ms` of the controller's current time, re-checking every
/// `check_interval_ms`. END goes out exactly once after the last event, even
/// for an empty song. Returns when the controller answers `DONE` or the
/// cancel token is set. A token that is already set returns before any
/// packet goes out.
/// `on_phase` sees every phase change, in order.
pub fn perform(
    song: &Song,
    link: &Link,
    catalog: &CommandCatalog,
    config: &TimingConfig,
    cancel: &CancelToken,
    on_phase: &mut dyn FnMut(SessionPhase),
) -> Result<Outcome, PlaybackError> {
    on_phase(SessionPhase::Syncing);
    if cancel.is_cancelled() {
        return Ok(Outcome::Cancelled);
    }

    let origin = match synchronize(link, config.sync_delay_ms, config.time_reply_attempts) {
        Ok(origin) => origin,
        Err(_) if cancel.is_cancelled() => return Ok(Outcome::Cancelled),
        Err(e) => return Err(e.into()),
    };
    on_phase(SessionPhase::Streaming);
    if !cancel.sleep(Duration::from_millis(config.post_sync_pause_ms)) {
        return Ok(Outcome::Cancelled);
    }

    let arrangement = Arrangement::new(song, catalog, config.timing())?;
    for resolved in &arrangement.events {
        log::debug!(
            "[debug] beat={}, cmd='{}', duration={:?}",
            resolved.event.beat,
            resolved.event.command,
            resolved.event.duration
        );
    }
    let plan = arrangement.place(origin, config.end_slack_ms);
    log::debug!("[debug] end-of-song at {} ms", plan.end_ms);

    let mut state = PerformanceState::new();
    let mut next = 0;

    loop {
        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        // A concurrent stop may consume the TIME reply
        let now = match remote_time(link, config.time_reply_attempts) {
            Ok(now) => now,
            Err(_) if cancel.is_cancelled() => return Ok(Outcome::Cancelled),
            Err(e) => return Err(e.into()),
        };
        while let Some(event) = plan.events.get(next) {
            if !event.is_due(now, config.window_ms) {
                break;
            }
            if cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            send_event(link, event, &plan.timing, &mut state, config)?;
            next += 1;
        }

        if next == plan.events.len() {
            link.send(&Packet::End { end_ms: plan.end_ms })?;
            log::info!("[end] Sent END_MARKER @ {} ms - awaiting DONE", plan.end_ms);
            break;
        }

        if !cancel.sleep(Duration::from_millis(config.check_interval_ms)) {
            return Ok(Outcome::Cancelled);
        }
    }

    on_phase(SessionPhase::AwaitingCompletion);
    await_done(link, cancel)
}

fn send_event(
    link: &Link,
    event: &ScheduledEvent,
    timing: &Timing,
    state: &mut PerformanceState,
    config: &TimingConfig,
) -> Result<(), PlaybackError> {
    log::debug!(
        "[cmd] Scheduling '{}' @ {} ms",
        event.command.name(),
        event.at_ms
    );

    for mv in event.moves(timing, state) {
        let packet = Packet::from(mv);
        link.send(&packet)?;
        log::debug!("[pick] {}", packet);

        if config.packet_pause_ms > 0 {
            thread::sleep(Duration::from_millis(config.packet_pause_ms));
        }
        link.drain_replies()?;
    }
    Ok(())
}

fn await_done(link: &Link, cancel: &CancelToken) -> Result<Outcome, PlaybackError> {
    loop {
        if cancel.is_cancelled() {
            log::info!("[end] Stop requested while awaiting DONE");
            return Ok(Outcome::Cancelled);
        }
        let reply = match link.read_reply() {
            Ok(reply) => reply,
            Err(_) if cancel.is_cancelled() => return Ok(Outcome::Cancelled),
            Err(e) => return Err(e.into()),
        };
        match reply {
            Some(Reply::Done) => {
                log::info!("[end] Received DONE - playback complete");
                return Ok(Outcome::Completed);
            }
            Some(Reply::BufferFull) => log::warn!("[end] Controller command buffer full"),
            Some(other) => log::debug!("From controller: {}", other),
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fretbot_core::{Calibration, SongEvent};
    use fretbot_link::{Connector, SimulatedController};

    const CALIBRATION: &str = include_str!("../../../../assets/calibration.example.json");

    fn catalog() -> CommandCatalog {
        CommandCatalog::from_calibration(&Calibration::from_json_str(CALIBRATION).unwrap())
    }

    fn fast_config() -> TimingConfig {
        TimingConfig {
            check_interval_ms: 1,
            packet_pause_ms: 0,
            post_sync_pause_ms: 0,
            ..Default::default()
        }
    }

    fn song(events: Vec<SongEvent>) -> Song {
        Song {
            timeline: events,
            ..Default::default()
        }
    }

    fn run(device: &SimulatedController, song: &Song, config: &TimingConfig) -> (Outcome, Vec<SessionPhase>) {
        let link = device.connect().unwrap();
        let mut phases = Vec::new();
        let outcome = perform(
            song,
            &link,
            &catalog(),
            config,
            &CancelToken::new(),
            &mut |phase| phases.push(phase),
        )
        .unwrap();
        (outcome, phases)
    }

    fn ends(packets: &[Packet]) -> Vec<u32> {
        packets
            .iter()
            .filter_map(|p| match p {
                Packet::End { end_ms } => Some(*end_ms),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_single_note_session() {
        let device = SimulatedController::stepped(10_000, 100);
        let s = song(vec![SongEvent::new(0.0, "e1").with_duration(1.0)]);
        let (outcome, phases) = run(&device, &s, &fast_config());

        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(
            phases,
            vec![
                SessionPhase::Syncing,
                SessionPhase::Streaming,
                SessionPhase::AwaitingCompletion
            ]
        );

        let packets = device.received();
        // GET_TIME answered with 10_100, origin one second later
        assert_eq!(packets[1], Packet::Sync { origin_ms: 11_100 });
        let commands: Vec<Packet> = packets
            .iter()
            .copied()
            .filter(|p| matches!(p, Packet::Command { .. }))
            .collect();
        assert_eq!(
            commands,
            vec![
                Packet::Command { actuator: 6, angle: 55, delay_ms: 11_100 },
                Packet::Command { actuator: 6, angle: 90, delay_ms: 11_600 },
                Packet::Command { actuator: 0, angle: 68, delay_ms: 11_150 },
            ]
        );
        assert_eq!(ends(&packets), vec![11_100 + 500 + 1_500]);
    }

    #[test]
    fn test_window_withholds_far_events() {
        // Clock only moves on GET_TIME and idle reads
        let device = SimulatedController::stepped(0, 500);
        let config = TimingConfig {
            window_ms: 2_000,
            ..fast_config()
        };
        let s = song(vec![SongEvent::new(0.0, "A0"), SongEvent::new(20.0, "A0")]);
        let (outcome, _) = run(&device, &s, &config);
        assert_eq!(outcome, Outcome::Completed);

        // origin = 500 + 1000; the second event sits at 1500 + 10000
        let packets = device.received();
        let mut now = 0;
        for packet in &packets {
            match *packet {
                Packet::GetTime => now += 500,
                Packet::Command { delay_ms, .. } => {
                    assert!(delay_ms - 50 <= now + config.window_ms, "sent {} at {}", delay_ms, now);
                }
                _ => {}
            }
        }
        let time_queries = packets.iter().filter(|p| **p == Packet::GetTime).count();
        assert!(time_queries > 2);
    }

    #[test]
    fn test_end_is_sent_once_after_last_event() {
        let device = SimulatedController::stepped(0, 250);
        let config = TimingConfig {
            window_ms: 1_000,
            ..fast_config()
        };
        let s = song(vec![
            SongEvent::new(0.0, "Chord_G"),
            SongEvent::new(0.0, "STRUM"),
            SongEvent::new(6.0, "STRUM"),
        ]);
        run(&device, &s, &config);

        let packets = device.received();
        assert_eq!(ends(&packets).len(), 1);
        let end_at = packets.iter().position(|p| matches!(p, Packet::End { .. })).unwrap();
        let last_command = packets
            .iter()
            .rposition(|p| matches!(p, Packet::Command { .. }))
            .unwrap();
        assert!(end_at > last_command);
    }

    #[test]
    fn test_empty_song_still_sends_end() {
        let device = SimulatedController::stepped(0, 100);
        let (outcome, _) = run(&device, &Song::default(), &fast_config());
        assert_eq!(outcome, Outcome::Completed);
        // GET_TIME at 100 => origin 1100, END at origin + slack
        assert_eq!(ends(&device.received()), vec![2_600]);
    }

    #[test]
    fn test_unknown_command_aborts_before_streaming() {
        let device = SimulatedController::stepped(0, 100);
        let link = device.connect().unwrap();
        let result = perform(
            &song(vec![SongEvent::new(0.0, "e1"), SongEvent::new(1.0, "X9")]),
            &link,
            &catalog(),
            &fast_config(),
            &CancelToken::new(),
            &mut |_| {},
        );
        assert!(matches!(
            result,
            Err(PlaybackError::Core(fretbot_core::CoreError::UnknownCommand { .. }))
        ));
        assert!(!device
            .received()
            .iter()
            .any(|p| matches!(p, Packet::Command { .. })));
    }

    #[test]
    fn test_cancel_during_stream() {
        let device = SimulatedController::stepped(0, 10);
        let link = device.connect().unwrap();
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let config = TimingConfig {
            window_ms: 0,
            check_interval_ms: 5,
            ..fast_config()
        };

        let mut streaming_seen = false;
        let outcome = perform(
            &song(vec![SongEvent::new(0.0, "e0"), SongEvent::new(400.0, "e0")]),
            &link,
            &catalog(),
            &config,
            &cancel,
            &mut |phase| {
                if phase == SessionPhase::Streaming {
                    streaming_seen = true;
                    trigger.cancel();
                }
            },
        )
        .unwrap();

        assert!(streaming_seen);
        assert_eq!(outcome, Outcome::Cancelled);
        assert!(ends(&device.received()).is_empty());
    }

    #[test]
    fn test_cancelled_token_sends_nothing() {
        let device = SimulatedController::stepped(0, 10);
        let link = device.connect().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = perform(
            &song(vec![SongEvent::new(0.0, "e0")]),
            &link,
            &catalog(),
            &fast_config(),
            &cancel,
            &mut |_| {},
        )
        .unwrap();

        assert_eq!(outcome, Outcome::Cancelled);
        assert!(device.received().is_empty());
    }

    #[test]
    fn test_silent_controller_fails_session() {
        let device = SimulatedController::stepped(0, 10);
        device.set_mute(true);
        let link = device.connect().unwrap();
        let result = perform(
            &Song::default(),
            &link,
            &catalog(),
            &fast_config(),
            &CancelToken::new(),
            &mut |_| {},
        );
        assert!(matches!(
            result,
            Err(PlaybackError::Link(fretbot_link::LinkError::ReplyTimeout { .. }))
        ));
    }
}
