//! Error types for the race server.

use shared::{ProtocolError, RaceStatus};
use std::path::PathBuf;
use thiserror::Error;

/// Problems loading or validating a race definition
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse race definition: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid race definition: {0}")]
    Invalid(String),
}

/// Why a participant identity could not be granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocationError {
    #[error("race is not accepting participants while {0:?}")]
    JoiningClosed(RaceStatus),

    #[error("no free participant identity")]
    RosterExhausted,

    #[error("source id {0} is not on the roster")]
    UnknownSourceId(u32),
}

/// Why a connection's handshake did not complete
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("connection closed before a join request arrived")]
    Disconnected,

    #[error("malformed join request: {0}")]
    Malformed(#[from] ProtocolError),

    #[error("outbound queue closed before the join acceptance was sent")]
    OutboundClosed,
}
