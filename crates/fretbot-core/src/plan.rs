//! Flatten, resolve and place a song on the controller clock
//!
//! [`Arrangement`] is a song after flattening and command resolution, still
//! relative to beat 0. It answers the duration question once: the pre-flight
//! estimate and the in-session end marker both go through
//! [`Arrangement::end_time_ms`]. [`Arrangement::place`] fixes the arrangement
//! to a sync origin and yields the [`Plan`] the scheduler streams.

use crate::action::{PerformanceState, ServoMove};
use crate::catalog::CommandCatalog;
use crate::command::Command;
use crate::error::Result;
use crate::song::{flatten, FlatEvent, Song};
use crate::timing::Timing;

/// A flat event together with the command it resolved to
#[derive(Debug, Clone)]
pub struct ResolvedEvent {
    pub event: FlatEvent,
    pub command: Command,
    /// Event start relative to the sync origin
    pub relative_ms: u32,
}

impl ResolvedEvent {
    /// Latest move of this event relative to the sync origin
    pub fn last_move_ms(&self, timing: &Timing) -> u32 {
        self.relative_ms
            .saturating_add(self.command.span_ms(self.event.duration, timing))
    }
}

#[derive(Debug, Clone)]
pub struct Arrangement {
    pub timing: Timing,
    pub events: Vec<ResolvedEvent>,
}

impl Arrangement {
    /// Flatten `song` and resolve every event against `catalog`
    ///
    /// The song's own tempo, if any, replaces the tempo of `base`. An
    /// unusable tempo or the first event that fails to resolve aborts the
    /// whole pass.
    pub fn new(song: &Song, catalog: &CommandCatalog, base: Timing) -> Result<Self> {
        let timing = song.timing(base);
        timing.validate()?;
        let events = flatten(song)
            .into_iter()
            .map(|event| {
                let command = catalog.resolve(&event)?;
                let relative_ms = timing.beats_to_ms(event.beat);
                Ok(ResolvedEvent {
                    event,
                    command,
                    relative_ms,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        log::debug!(
            "[plan] Resolved {} events at {} BPM",
            events.len(),
            timing.bpm
        );
        Ok(Self { timing, events })
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Largest time any action contributes, relative to the sync origin
    pub fn max_relative_ms(&self) -> u32 {
        self.events
            .iter()
            .map(|e| e.last_move_ms(&self.timing))
            .max()
            .unwrap_or(0)
    }

    /// `origin + max_relative + end_slack`
    pub fn end_time_ms(&self, origin_ms: u32, end_slack_ms: u32) -> u32 {
        origin_ms
            .saturating_add(self.max_relative_ms())
            .saturating_add(end_slack_ms)
    }

    /// Song length as seen from the play request, sync delay included
    pub fn estimate_duration_ms(&self, sync_delay_ms: u32, end_slack_ms: u32) -> u32 {
        self.end_time_ms(sync_delay_ms, end_slack_ms)
    }

    /// Pin the arrangement to a controller-clock origin
    pub fn place(self, origin_ms: u32, end_slack_ms: u32) -> Plan {
        let end_ms = self.end_time_ms(origin_ms, end_slack_ms);
        let events = self
            .events
            .into_iter()
            .map(|resolved| ScheduledEvent {
                at_ms: origin_ms.saturating_add(resolved.relative_ms),
                event: resolved.event,
                command: resolved.command,
            })
            .collect();

        Plan {
            origin_ms,
            timing: self.timing,
            events,
            end_ms,
        }
    }
}

/// An event at an absolute controller time
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub event: FlatEvent,
    pub command: Command,
    pub at_ms: u32,
}

impl ScheduledEvent {
    /// Whether the event falls inside the lookahead window ending at `now + window`
    pub fn is_due(&self, now_ms: u32, window_ms: u32) -> bool {
        i64::from(self.at_ms) <= i64::from(now_ms) + i64::from(window_ms)
    }

    pub fn moves(&self, timing: &Timing, state: &mut PerformanceState) -> Vec<ServoMove> {
        self.command
            .schedule(self.at_ms, self.event.duration, timing, state)
    }
}

/// Events in send order plus the end marker time, all on the controller clock
#[derive(Debug, Clone)]
pub struct Plan {
    pub origin_ms: u32,
    pub timing: Timing,
    pub events: Vec<ScheduledEvent>,
    pub end_ms: u32,
}
