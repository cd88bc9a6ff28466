//! Byte transports and the shared link handle
//!
//! A [`Transport`] moves raw bytes and reply lines. [`Link`] wraps one behind
//! a mutex so the playback worker and a concurrent stop request can share
//! the single serial port; the lock is held for one write or one read, never
//! across a whole session.

use crate::error::{LinkError, Result};
use crate::protocol::{hex, Packet, Reply};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// Raw controller I/O
pub trait Transport: Send {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Next complete reply line, or `None` if the read timed out
    fn read_line(&mut self) -> Result<Option<String>>;

    /// Whether a reply can be read without waiting
    fn has_pending_input(&mut self) -> Result<bool>;
}

/// Opens links to the controller
///
/// Each playback session and each stop request connects on its own.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Link>;

    /// Human-readable target, for logs
    fn describe(&self) -> String;
}

/// Shared handle to an open controller connection
#[derive(Clone)]
pub struct Link {
    transport: Arc<Mutex<Box<dyn Transport>>>,
}

impl Link {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Arc::new(Mutex::new(Box::new(transport))),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Box<dyn Transport>>> {
        self.transport.lock().map_err(|_| LinkError::Poisoned)
    }

    /// Validate, encode and write one packet
    pub fn send(&self, packet: &Packet) -> Result<()> {
        packet.validate()?;
        let bytes = packet.encode();
        log::trace!("[link] -> {} ({})", packet, hex(&bytes));
        self.lock()?.write_all(&bytes)
    }

    pub fn read_reply(&self) -> Result<Option<Reply>> {
        let line = self.lock()?.read_line()?;
        Ok(line.map(|line| {
            log::trace!("[link] <- {}", line);
            Reply::parse(&line)
        }))
    }

    /// Read every reply that is already waiting
    ///
    /// Firmware debug output is logged and returned with the rest.
    pub fn drain_replies(&self) -> Result<Vec<Reply>> {
        let mut replies = Vec::new();
        loop {
            let mut transport = self.lock()?;
            if !transport.has_pending_input()? {
                break;
            }
            let Some(line) = transport.read_line()? else {
                break;
            };
            drop(transport);

            let reply = Reply::parse(&line);
            match &reply {
                Reply::Debug(text) => log::debug!("From controller: {}", text),
                Reply::BufferFull => log::warn!("[link] Controller command buffer full"),
                other => log::debug!("From controller: {}", other),
            }
            replies.push(reply);
        }
        Ok(replies)
    }
}

/// Serial port parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    /// Pause after opening while the controller reboots
    pub settle: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 115_200,
            read_timeout: Duration::from_secs(1),
            settle: Duration::from_secs(1),
        }
    }
}

/// Transport over a real serial port
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
    /// Bytes read past the last returned line
    pending: Vec<u8>,
}

impl SerialTransport {
    /// Open the port and discard anything left in its buffers
    pub fn open(settings: &SerialSettings) -> Result<Self> {
        let open_err = |e: serialport::Error| LinkError::Open {
            port: settings.port.clone(),
            reason: e.to_string(),
        };

        let port = serialport::new(&settings.port, settings.baud_rate)
            .timeout(settings.read_timeout)
            .open()
            .map_err(open_err)?;
        port.clear(serialport::ClearBuffer::All).map_err(open_err)?;

        log::info!(
            "[link] Opened {} at {} baud",
            settings.port,
            settings.baud_rate
        );
        Ok(Self {
            port,
            pending: Vec::new(),
        })
    }

    fn take_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|b| *b == b'\n')?;
        let raw: Vec<u8> = self.pending.drain(..=end).collect();
        Some(String::from_utf8_lossy(&raw).trim().to_string())
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let mut chunk = [0u8; 64];
        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }
            match self.port.read(&mut chunk) {
                Ok(0) => return Err(LinkError::Disconnected),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn has_pending_input(&mut self) -> Result<bool> {
        if self.pending.contains(&b'\n') {
            return Ok(true);
        }
        let waiting = self
            .port
            .bytes_to_read()
            .map_err(|e| LinkError::Io(e.into()))?;
        Ok(waiting > 0)
    }
}

/// Connects to the controller over a serial port
#[derive(Debug, Clone)]
pub struct SerialConnector {
    settings: SerialSettings,
}

impl SerialConnector {
    pub fn new(settings: SerialSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }
}

impl Connector for SerialConnector {
    fn connect(&self) -> Result<Link> {
        let transport = SerialTransport::open(&self.settings)?;
        // Opening the port resets most boards
        thread::sleep(self.settings.settle);
        Ok(Link::new(transport))
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.settings.port, self.settings.baud_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted transport recording writes
    struct Script {
        written: Arc<Mutex<Vec<u8>>>,
        lines: VecDeque<String>,
    }

    impl Transport for Script {
        fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
            self.written.lock().unwrap().extend_from_slice(bytes);
            Ok(())
        }

        fn read_line(&mut self) -> Result<Option<String>> {
            Ok(self.lines.pop_front())
        }

        fn has_pending_input(&mut self) -> Result<bool> {
            Ok(!self.lines.is_empty())
        }
    }

    fn script(lines: &[&str]) -> (Link, Arc<Mutex<Vec<u8>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let link = Link::new(Script {
            written: Arc::clone(&written),
            lines: lines.iter().map(|l| l.to_string()).collect(),
        });
        (link, written)
    }

    #[test]
    fn test_send_writes_encoded_packet() {
        let (link, written) = script(&[]);
        link.send(&Packet::Stop).unwrap();
        link.send(&Packet::End { end_ms: 1 }).unwrap();
        assert_eq!(*written.lock().unwrap(), vec![0xEE, 0xDD, 1, 0, 0, 0]);
    }

    #[test]
    fn test_send_refuses_bad_angle_without_writing() {
        let (link, written) = script(&[]);
        let result = link.send(&Packet::Command {
            actuator: 0,
            angle: 200,
            delay_ms: 0,
        });
        assert!(matches!(result, Err(LinkError::AngleOutOfRange { .. })));
        assert!(written.lock().unwrap().is_empty());
    }

    #[test]
    fn test_drain_reads_all_waiting_lines() {
        let (link, _) = script(&["RemoteControl: Buffered PICK", "DONE"]);
        let replies = link.drain_replies().unwrap();
        assert_eq!(
            replies,
            vec![
                Reply::Debug("RemoteControl: Buffered PICK".to_string()),
                Reply::Done
            ]
        );
        assert!(link.drain_replies().unwrap().is_empty());
    }

    #[test]
    fn test_cloned_links_share_transport() {
        let (link, written) = script(&[]);
        let other = link.clone();
        link.send(&Packet::GetTime).unwrap();
        other.send(&Packet::Stop).unwrap();
        assert_eq!(*written.lock().unwrap(), vec![0xCC, 0xEE]);
    }
}
