//! Shared configuration utilities
//!
//! - Generic YAML config loading/saving
//! - Standard config locations
//!
//! ```ignore
//! use fretbot_core::config::{load_config, save_config, default_config_path};
//!
//! let config: PlayerConfig = load_config(&default_config_path("config.yaml"));
//! save_config(&config, &path)?;
//! ```

mod io;
mod paths;

pub use io::{load_config, save_config};
pub use paths::{default_config_dir, default_config_path};
