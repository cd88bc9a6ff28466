//! # fretbot-core
//!
//! Song model and command planning for a servo-driven string robot.
//!
//! A song is a timeline of beat-positioned command names. The crate turns it
//! into servo moves on the controller's clock:
//!
//! ```text
//! Song ──flatten──▶ FlatEvent* ──CommandCatalog::resolve──▶ Arrangement
//!                                                             │ place(origin)
//!                                                             ▼
//!                     ServoMove* ◀──Command::schedule──── Plan
//! ```
//!
//! Nothing here touches the serial link; see the `fretbot-link` crate.

pub mod action;
pub mod actuator;
pub mod calibration;
pub mod catalog;
pub mod command;
pub mod config;
pub mod error;
pub mod plan;
pub mod song;
pub mod timing;

pub use action::{Action, Offset, PerformanceState, ServoMove};
pub use actuator::{ACTUATOR_COUNT, MAX_ANGLE, STRING_COUNT, STRING_KEYS};
pub use calibration::Calibration;
pub use catalog::{CatalogEntry, CommandCatalog, Factory, Resolution};
pub use command::{Command, Strum};
pub use error::{CoreError, Result};
pub use plan::{Arrangement, Plan, ResolvedEvent, ScheduledEvent};
pub use song::{flatten, EventParams, FlatEvent, Song, SongEvent};
pub use timing::Timing;
