//! Binary packet codec and controller reply lines
//!
//! Host to controller, fixed-size packets:
//!
//! | Packet | Bytes | Layout |
//! |--------|-------|--------|
//! | GET_TIME | 1 | `0xCC` |
//! | SYNC | 6 | `0xAA 0x01` origin:u32 BE |
//! | COMMAND | 7 | `0xBB` actuator:u8 angle:u8 delay:u32 LE |
//! | END | 5 | `0xDD` end:u32 LE |
//! | STOP | 1 | `0xEE` |
//! | RESET | 37 | `0xEF` 18 x angle:i16 BE |
//!
//! Controller to host, newline-terminated ASCII: `TIME:<ms>`, `DONE`,
//! `RESET_DONE`, `STOPPED`, `ERROR: command buffer full`, plus free-form
//! debug output.

use fretbot_core::{ServoMove, ACTUATOR_COUNT, MAX_ANGLE};
use std::fmt;

use crate::error::{LinkError, Result};

pub const GET_TIME_MARKER: u8 = 0xCC;
pub const SYNC_MARKER: u8 = 0xAA;
pub const SYNC_TYPE: u8 = 0x01;
pub const COMMAND_MARKER: u8 = 0xBB;
pub const END_MARKER: u8 = 0xDD;
pub const STOP_MARKER: u8 = 0xEE;
pub const RESET_MARKER: u8 = 0xEF;

const SYNC_LEN: usize = 6;
const COMMAND_LEN: usize = 7;
const END_LEN: usize = 5;
const RESET_LEN: usize = 1 + ACTUATOR_COUNT * 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet {
    GetTime,
    Sync { origin_ms: u32 },
    /// Move `actuator` to `angle` at controller time `delay_ms`
    Command { actuator: u8, angle: u8, delay_ms: u32 },
    End { end_ms: u32 },
    Stop,
    /// Neutral angle per actuator, indexed by actuator id
    Reset { angles: [i16; ACTUATOR_COUNT] },
}

impl From<ServoMove> for Packet {
    fn from(mv: ServoMove) -> Self {
        Packet::Command {
            actuator: mv.actuator,
            angle: mv.angle,
            delay_ms: mv.at_ms,
        }
    }
}

impl Packet {
    /// Reject packets the controller would misinterpret
    pub fn validate(&self) -> Result<()> {
        match *self {
            Packet::Command { actuator, angle, .. } if angle > MAX_ANGLE => {
                Err(LinkError::AngleOutOfRange { actuator, angle })
            }
            _ => Ok(()),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match *self {
            Packet::GetTime => vec![GET_TIME_MARKER],
            Packet::Sync { origin_ms } => {
                let mut out = Vec::with_capacity(SYNC_LEN);
                out.extend_from_slice(&[SYNC_MARKER, SYNC_TYPE]);
                out.extend_from_slice(&origin_ms.to_be_bytes());
                out
            }
            Packet::Command {
                actuator,
                angle,
                delay_ms,
            } => {
                let mut out = Vec::with_capacity(COMMAND_LEN);
                out.extend_from_slice(&[COMMAND_MARKER, actuator, angle]);
                out.extend_from_slice(&delay_ms.to_le_bytes());
                out
            }
            Packet::End { end_ms } => {
                let mut out = Vec::with_capacity(END_LEN);
                out.push(END_MARKER);
                out.extend_from_slice(&end_ms.to_le_bytes());
                out
            }
            Packet::Stop => vec![STOP_MARKER],
            Packet::Reset { angles } => {
                let mut out = Vec::with_capacity(RESET_LEN);
                out.push(RESET_MARKER);
                for angle in angles {
                    out.extend_from_slice(&angle.to_be_bytes());
                }
                out
            }
        }
    }

    /// Decode the packet at the front of `bytes`
    ///
    /// Returns the packet and the number of bytes it used, or `None` while
    /// the packet is still incomplete.
    pub fn decode(bytes: &[u8]) -> Result<Option<(Packet, usize)>> {
        let Some(&marker) = bytes.first() else {
            return Ok(None);
        };

        let needed = match marker {
            GET_TIME_MARKER | STOP_MARKER => 1,
            SYNC_MARKER => SYNC_LEN,
            COMMAND_MARKER => COMMAND_LEN,
            END_MARKER => END_LEN,
            RESET_MARKER => RESET_LEN,
            other => {
                return Err(LinkError::MalformedPacket(format!(
                    "unknown marker {:#04x}",
                    other
                )))
            }
        };
        if bytes.len() < needed {
            return Ok(None);
        }

        let u32_at = |at: usize| [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]];

        let packet = match marker {
            GET_TIME_MARKER => Packet::GetTime,
            STOP_MARKER => Packet::Stop,
            SYNC_MARKER => {
                if bytes[1] != SYNC_TYPE {
                    return Err(LinkError::MalformedPacket(format!(
                        "unexpected sync type {:#04x}",
                        bytes[1]
                    )));
                }
                Packet::Sync {
                    origin_ms: u32::from_be_bytes(u32_at(2)),
                }
            }
            COMMAND_MARKER => Packet::Command {
                actuator: bytes[1],
                angle: bytes[2],
                delay_ms: u32::from_le_bytes(u32_at(3)),
            },
            END_MARKER => Packet::End {
                end_ms: u32::from_le_bytes(u32_at(1)),
            },
            _ => {
                let mut angles = [0i16; ACTUATOR_COUNT];
                for (i, angle) in angles.iter_mut().enumerate() {
                    let at = 1 + i * 2;
                    *angle = i16::from_be_bytes([bytes[at], bytes[at + 1]]);
                }
                Packet::Reset { angles }
            }
        };
        Ok(Some((packet, needed)))
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Packet::GetTime => write!(f, "GET_TIME"),
            Packet::Sync { origin_ms } => write!(f, "SYNC @ {} ms", origin_ms),
            Packet::Command {
                actuator,
                angle,
                delay_ms,
            } => write!(f, "T={} A={} D={} ms", actuator, angle, delay_ms),
            Packet::End { end_ms } => write!(f, "END @ {} ms", end_ms),
            Packet::Stop => write!(f, "STOP"),
            Packet::Reset { angles } => write!(f, "RESET {:?}", angles),
        }
    }
}

pub const DONE_LINE: &str = "DONE";
pub const RESET_DONE_LINE: &str = "RESET_DONE";
pub const STOPPED_LINE: &str = "STOPPED";
pub const BUFFER_FULL_LINE: &str = "ERROR: command buffer full";
const TIME_PREFIX: &str = "TIME:";

/// One line from the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Time(u32),
    Done,
    ResetDone,
    Stopped,
    BufferFull,
    /// Anything else the firmware prints
    Debug(String),
}

impl Reply {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if let Some(ms) = line.strip_prefix(TIME_PREFIX) {
            if let Ok(ms) = ms.trim().parse() {
                return Reply::Time(ms);
            }
        }
        match line {
            DONE_LINE => Reply::Done,
            RESET_DONE_LINE => Reply::ResetDone,
            STOPPED_LINE => Reply::Stopped,
            BUFFER_FULL_LINE => Reply::BufferFull,
            other => Reply::Debug(other.to_string()),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Time(ms) => write!(f, "{}{}", TIME_PREFIX, ms),
            Reply::Done => f.write_str(DONE_LINE),
            Reply::ResetDone => f.write_str(RESET_DONE_LINE),
            Reply::Stopped => f.write_str(STOPPED_LINE),
            Reply::BufferFull => f.write_str(BUFFER_FULL_LINE),
            Reply::Debug(line) => f.write_str(line),
        }
    }
}

/// Space-separated hex, for trace logging
pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_is_big_endian() {
        let bytes = Packet::Sync { origin_ms: 0x0102_0304 }.encode();
        assert_eq!(bytes, vec![0xAA, 0x01, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_command_delay_is_little_endian() {
        let bytes = Packet::Command {
            actuator: 7,
            angle: 120,
            delay_ms: 0x0102_0304,
        }
        .encode();
        assert_eq!(bytes, vec![0xBB, 7, 120, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_end_is_little_endian() {
        assert_eq!(
            Packet::End { end_ms: 5_000 }.encode(),
            vec![0xDD, 0x88, 0x13, 0x00, 0x00]
        );
    }

    #[test]
    fn test_reset_layout() {
        let mut angles = [90i16; ACTUATOR_COUNT];
        angles[0] = -1;
        angles[17] = 300;
        let bytes = Packet::Reset { angles }.encode();
        assert_eq!(bytes.len(), 37);
        assert_eq!(bytes[0], 0xEF);
        assert_eq!(&bytes[1..3], &[0xFF, 0xFF]);
        assert_eq!(&bytes[3..5], &[0x00, 90]);
        assert_eq!(&bytes[35..37], &[0x01, 0x2C]);
    }

    #[test]
    fn test_decode_waits_for_complete_packet() {
        let bytes = Packet::Command {
            actuator: 1,
            angle: 2,
            delay_ms: 3,
        }
        .encode();
        assert_eq!(Packet::decode(&bytes[..4]).unwrap(), None);
        assert_eq!(Packet::decode(&[]).unwrap(), None);
    }

    #[test]
    fn test_decode_stream_of_mixed_packets() {
        let packets = [
            Packet::GetTime,
            Packet::Sync { origin_ms: 1_000 },
            Packet::Command {
                actuator: 12,
                angle: 60,
                delay_ms: 1_500,
            },
            Packet::End { end_ms: 4_000 },
            Packet::Stop,
            Packet::Reset { angles: [45; ACTUATOR_COUNT] },
        ];
        let mut stream: Vec<u8> = packets.iter().flat_map(|p| p.encode()).collect();

        let mut decoded = Vec::new();
        while let Some((packet, used)) = Packet::decode(&stream).unwrap() {
            decoded.push(packet);
            stream.drain(..used);
        }
        assert_eq!(decoded, packets);
        assert!(stream.is_empty());
    }

    #[test]
    fn test_decode_rejects_unknown_marker_and_sync_type() {
        assert!(matches!(
            Packet::decode(&[0x42]),
            Err(LinkError::MalformedPacket(_))
        ));
        assert!(matches!(
            Packet::decode(&[0xAA, 0x02, 0, 0, 0, 0]),
            Err(LinkError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_validate_rejects_angle_above_180() {
        let packet = Packet::Command {
            actuator: 3,
            angle: 181,
            delay_ms: 0,
        };
        assert!(matches!(
            packet.validate(),
            Err(LinkError::AngleOutOfRange { actuator: 3, angle: 181 })
        ));
        assert!(Packet::Stop.validate().is_ok());
    }

    #[test]
    fn test_parse_replies() {
        assert_eq!(Reply::parse("TIME:123456\r"), Reply::Time(123_456));
        assert_eq!(Reply::parse("DONE"), Reply::Done);
        assert_eq!(Reply::parse(" RESET_DONE "), Reply::ResetDone);
        assert_eq!(Reply::parse("STOPPED"), Reply::Stopped);
        assert_eq!(Reply::parse("ERROR: command buffer full"), Reply::BufferFull);
        assert_eq!(
            Reply::parse("TIME:abc"),
            Reply::Debug("TIME:abc".to_string())
        );
        assert_eq!(
            Reply::parse("RemoteControl: Sync at 10"),
            Reply::Debug("RemoteControl: Sync at 10".to_string())
        );
    }

    #[test]
    fn test_reply_display_parses_back() {
        for reply in [Reply::Time(42), Reply::Done, Reply::BufferFull] {
            assert_eq!(Reply::parse(&reply.to_string()), reply);
        }
    }
}
