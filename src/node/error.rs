//! Node messaging errors and convenience types.

use super::transport::TransportError;
use serde_json::Error as JsonError;
use std::{error::Error as StdError, fmt};

/// Errors encountered while sending a message to a Lavalink node.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The node's runner task hung up before replying, either because the
    /// cluster was dropped or the task crashed.
    AttemptDiscarded,
    /// The message could not be serialized.
    Json(JsonError),
    /// The node is not currently connected.
    NotConnected,
    /// The transport failed to deliver the message.
    Transport(TransportError),
}

impl From<JsonError> for Error {
    fn from(e: JsonError) -> Error {
        Error::Json(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Error {
        Error::Transport(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to message Lavalink node: ")?;
        use Error::*;
        match self {
            AttemptDiscarded => write!(f, "node task was aborted/discarded"),
            Json(e) => e.fmt(f),
            NotConnected => write!(f, "node is not connected"),
            Transport(e) => e.fmt(f),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::AttemptDiscarded | Error::NotConnected => None,
            Error::Json(e) => Some(e),
            Error::Transport(e) => Some(e),
        }
    }
}

/// Convenience type for node message error handling.
pub type Result<T> = std::result::Result<T, Error>;
