//! Configuration for the Tether client.
//!
//! Settings persist to disk as a RON file, can be overridden from the command
//! line via clap, and stay forward/backward compatible through
//! `#[serde(default)]` on every section.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{Config, LogConfig, NetworkConfig, ReconnectConfig, SessionConfig};
pub use error::ConfigError;
