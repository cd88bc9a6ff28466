//! In-process model of the servo controller firmware
//!
//! [`SimulatedController`] parses the real wire format and behaves like the
//! board: COMMAND and END packets go into a bounded buffer and run once
//! `origin + delay` is reached on its clock, SYNC resets the buffer, STOP
//! clears everything. Replies travel back over a flume channel, the way
//! device callbacks reach the reader elsewhere in this workspace.
//!
//! Handles are cheap clones sharing one device, so a test can keep one to
//! inspect the device while the player owns another.

use crate::error::{LinkError, Result};
use crate::protocol::{
    Packet, Reply, BUFFER_FULL_LINE, DONE_LINE, RESET_DONE_LINE, STOPPED_LINE,
};
use crate::transport::{Connector, Link, Transport};
use flume::{Receiver, Sender};
use fretbot_core::{ServoMove, ACTUATOR_COUNT};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Sleep between polls while a real-time read waits for a reply
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// How the simulated millisecond counter advances
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimClock {
    /// Follows the host's monotonic clock
    Realtime,
    /// Advances by `step_ms` on every GET_TIME and every idle read
    Stepped { step_ms: u32 },
}

#[derive(Debug, Clone)]
pub struct SimulatorOptions {
    /// Counter value when the device is created
    pub start_ms: u32,
    pub clock: SimClock,
    /// Slots shared by buffered COMMAND and END packets
    pub buffer_capacity: usize,
    /// Longest a real-time read waits before reporting a timeout
    pub read_timeout: Duration,
    /// Print firmware-style debug lines for buffered and executed moves
    pub debug_lines: bool,
}

impl Default for SimulatorOptions {
    fn default() -> Self {
        Self {
            start_ms: 0,
            clock: SimClock::Realtime,
            buffer_capacity: 64,
            read_timeout: Duration::from_millis(100),
            debug_lines: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Buffered {
    Move { actuator: u8, angle: u8, delay_ms: u32 },
    End { end_ms: u32 },
}

impl Buffered {
    fn delay_ms(&self) -> u32 {
        match *self {
            Buffered::Move { delay_ms, .. } => delay_ms,
            Buffered::End { end_ms } => end_ms,
        }
    }
}

struct DeviceState {
    created: Instant,
    stepped_ms: u32,
    rx: Vec<u8>,
    buffer: Vec<Buffered>,
    origin: Option<u32>,
    angles: [i16; ACTUATOR_COUNT],
    received: Vec<Packet>,
    executed: Vec<ServoMove>,
    connections: usize,
    mute: bool,
}

/// Simulated controller, usable as a [`Transport`] and as a [`Connector`]
#[derive(Clone)]
pub struct SimulatedController {
    options: SimulatorOptions,
    state: Arc<Mutex<DeviceState>>,
    replies_tx: Sender<String>,
    replies_rx: Receiver<String>,
}

impl SimulatedController {
    pub fn new(options: SimulatorOptions) -> Self {
        let (replies_tx, replies_rx) = flume::unbounded();
        let state = DeviceState {
            created: Instant::now(),
            stepped_ms: options.start_ms,
            rx: Vec::new(),
            buffer: Vec::with_capacity(options.buffer_capacity),
            origin: None,
            angles: [0; ACTUATOR_COUNT],
            received: Vec::new(),
            executed: Vec::new(),
            connections: 0,
            mute: false,
        };
        Self {
            options,
            state: Arc::new(Mutex::new(state)),
            replies_tx,
            replies_rx,
        }
    }

    /// Device whose clock advances `step_ms` per query, for deterministic tests
    pub fn stepped(start_ms: u32, step_ms: u32) -> Self {
        Self::new(SimulatorOptions {
            start_ms,
            clock: SimClock::Stepped { step_ms },
            ..Default::default()
        })
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now_ms(&self, state: &DeviceState) -> u32 {
        match self.options.clock {
            SimClock::Realtime => {
                let elapsed = state.created.elapsed().as_millis();
                self.options
                    .start_ms
                    .wrapping_add(u32::try_from(elapsed).unwrap_or(u32::MAX))
            }
            SimClock::Stepped { .. } => state.stepped_ms,
        }
    }

    fn step(&self, state: &mut DeviceState) {
        if let SimClock::Stepped { step_ms } = self.options.clock {
            state.stepped_ms = state.stepped_ms.wrapping_add(step_ms);
        }
    }

    fn reply(&self, state: &DeviceState, line: impl Into<String>) -> Result<()> {
        if state.mute {
            return Ok(());
        }
        self.replies_tx
            .send(line.into())
            .map_err(|_| LinkError::Disconnected)
    }

    fn handle(&self, state: &mut DeviceState, packet: Packet) -> Result<()> {
        state.received.push(packet);
        match packet {
            Packet::GetTime => {
                self.step(state);
                let now = self.now_ms(state);
                self.reply(state, Reply::Time(now).to_string())?;
            }
            Packet::Sync { origin_ms } => {
                state.origin = Some(origin_ms);
                state.buffer.clear();
                if self.options.debug_lines {
                    self.reply(state, format!("RemoteControl: Sync at {}", origin_ms))?;
                }
            }
            Packet::Command {
                actuator,
                angle,
                delay_ms,
            } => {
                if state.buffer.len() < self.options.buffer_capacity {
                    state.buffer.push(Buffered::Move {
                        actuator,
                        angle,
                        delay_ms,
                    });
                    if self.options.debug_lines {
                        self.reply(
                            state,
                            format!(
                                "RemoteControl: Buffered PICK T={} A={} D={}ms",
                                actuator, angle, delay_ms
                            ),
                        )?;
                    }
                } else {
                    self.reply(state, BUFFER_FULL_LINE)?;
                }
            }
            Packet::End { end_ms } => {
                // A full buffer drops END silently, like the board does
                if state.buffer.len() < self.options.buffer_capacity {
                    state.buffer.push(Buffered::End { end_ms });
                }
            }
            Packet::Stop => {
                state.buffer.clear();
                state.origin = None;
                self.reply(state, STOPPED_LINE)?;
            }
            Packet::Reset { angles } => {
                state.angles = angles;
                self.reply(state, RESET_DONE_LINE)?;
            }
        }
        Ok(())
    }

    /// Run every buffered entry whose time has come
    fn run_due(&self, state: &mut DeviceState) -> Result<()> {
        let Some(origin) = state.origin else {
            return Ok(());
        };
        let now = u64::from(self.now_ms(state));

        let mut i = 0;
        while i < state.buffer.len() {
            let due = u64::from(origin) + u64::from(state.buffer[i].delay_ms()) <= now;
            if !due {
                i += 1;
                continue;
            }
            match state.buffer.remove(i) {
                Buffered::End { .. } => {
                    self.reply(state, DONE_LINE)?;
                    state.origin = None;
                }
                Buffered::Move {
                    actuator,
                    angle,
                    delay_ms,
                } => {
                    if let Some(slot) = state.angles.get_mut(actuator as usize) {
                        *slot = i16::from(angle);
                    }
                    state.executed.push(ServoMove {
                        actuator,
                        angle,
                        at_ms: origin.wrapping_add(delay_ms),
                    });
                    if self.options.debug_lines {
                        self.reply(
                            state,
                            format!("Executing PICK: index={} angle={}", actuator, angle),
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Queue a line as if the firmware had printed it
    pub fn inject_line(&self, line: &str) {
        let _ = self.replies_tx.send(line.to_string());
    }

    /// Swallow all replies, modelling an unresponsive board
    pub fn set_mute(&self, mute: bool) {
        self.state().mute = mute;
    }

    /// Current counter value
    pub fn clock_ms(&self) -> u32 {
        let state = self.state();
        self.now_ms(&state)
    }

    /// Move the stepped clock forward and run whatever became due
    pub fn advance(&self, ms: u32) -> Result<()> {
        let mut state = self.state();
        state.stepped_ms = state.stepped_ms.wrapping_add(ms);
        self.run_due(&mut state)
    }

    pub fn sync_origin(&self) -> Option<u32> {
        self.state().origin
    }

    /// Every packet decoded so far, in arrival order
    pub fn received(&self) -> Vec<Packet> {
        self.state().received.clone()
    }

    /// Moves the device has carried out
    pub fn executed(&self) -> Vec<ServoMove> {
        self.state().executed.clone()
    }

    /// Last angle commanded per actuator
    pub fn angles(&self) -> [i16; ACTUATOR_COUNT] {
        self.state().angles
    }

    /// Entries waiting in the command buffer
    pub fn buffered(&self) -> usize {
        self.state().buffer.len()
    }

    /// Number of links opened through [`Connector::connect`]
    pub fn connections(&self) -> usize {
        self.state().connections
    }
}

impl Transport for SimulatedController {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let mut state = self.state();
        self.run_due(&mut state)?;
        state.rx.extend_from_slice(bytes);

        loop {
            match Packet::decode(&state.rx) {
                Ok(Some((packet, used))) => {
                    state.rx.drain(..used);
                    self.handle(&mut state, packet)?;
                }
                Ok(None) => break,
                Err(e) => {
                    state.rx.clear();
                    return Err(e);
                }
            }
        }
        self.run_due(&mut state)
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let deadline = Instant::now() + self.options.read_timeout;
        loop {
            {
                let mut state = self.state();
                self.run_due(&mut state)?;
            }
            if let Ok(line) = self.replies_rx.try_recv() {
                return Ok(Some(line));
            }

            match self.options.clock {
                SimClock::Stepped { .. } => {
                    let mut state = self.state();
                    self.step(&mut state);
                    self.run_due(&mut state)?;
                    drop(state);
                    return Ok(self.replies_rx.try_recv().ok());
                }
                SimClock::Realtime => {
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }
        }
    }

    fn has_pending_input(&mut self) -> Result<bool> {
        let mut state = self.state();
        self.run_due(&mut state)?;
        Ok(!self.replies_rx.is_empty())
    }
}

impl Connector for SimulatedController {
    fn connect(&self) -> Result<Link> {
        self.state().connections += 1;
        Ok(Link::new(self.clone()))
    }

    fn describe(&self) -> String {
        match self.options.clock {
            SimClock::Realtime => "simulated controller".to_string(),
            SimClock::Stepped { step_ms } => {
                format!("simulated controller (stepped {} ms)", step_ms)
            }
        }
    }
}
