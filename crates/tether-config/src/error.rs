//! Configuration error types.

use std::io;
use std::path::PathBuf;

/// Why a configuration file could not be loaded or stored.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The directory or file could not be written.
    #[error("cannot write {}: {source}", path.display())]
    Write {
        /// File or directory that was being written.
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file is not valid RON for [`Config`](crate::Config).
    #[error("{} is not a valid config: {source}", path.display())]
    Parse {
        /// File that was being parsed.
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },

    /// The config could not be rendered as RON.
    #[error("cannot serialize config: {0}")]
    Serialize(#[from] ron::Error),

    /// A setting is out of range.
    #[error("invalid setting {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending setting.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}
