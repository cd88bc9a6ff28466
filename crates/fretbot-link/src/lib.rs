//! # fretbot-link
//!
//! Host side of the serial protocol spoken by the fretbot servo controller:
//! packet encoding, reply parsing, clock synchronisation and the transports
//! that carry them.
//!
//! ## Architecture
//!
//! ```text
//! Connector ──connect()──▶ Link (Arc<Mutex<Box<dyn Transport>>>)
//!                            │
//!            ┌───────────────┴────────────────┐
//!     SerialTransport                  SimulatedController
//!     (serialport crate)               (firmware model, tests / dry runs)
//! ```

pub mod clock;
pub mod error;
pub mod protocol;
pub mod simulator;
pub mod transport;

pub use clock::{remote_time, send_sync, synchronize, DEFAULT_TIME_REPLY_ATTEMPTS};
pub use error::{LinkError, Result};
pub use protocol::{Packet, Reply};
pub use simulator::{SimClock, SimulatedController, SimulatorOptions};
pub use transport::{Connector, Link, SerialConnector, SerialSettings, SerialTransport, Transport};
