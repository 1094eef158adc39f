//! Abstraction over the persistent socket held open to each node.
//!
//! A [`Connector`] opens one [`Transport`] per connection attempt. The default
//! connector, [`WsConnector`], speaks websockets via `async-tungstenite`; tests
//! and alternative runtimes may provide their own.
//!
//! [`WsConnector`]: super::WsConnector

use async_trait::async_trait;
use async_tungstenite::tungstenite::error::Error as TungsteniteError;
use std::{error::Error as StdError, fmt, io::Error as IoError};
use url::{ParseError, Url};

/// Everything needed to open a connection to one node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectRequest {
    /// `host:port` of the node.
    pub address: String,
    /// Whether to connect over TLS.
    pub secure: bool,
    /// Handshake headers, in the order they should be sent.
    ///
    /// These include the node password under `Authorization`.
    pub headers: Vec<(&'static str, String)>,
}

impl ConnectRequest {
    /// Builds the websocket URL for this node.
    pub fn url(&self) -> Result<Url, TransportError> {
        let scheme = if self.secure { "wss" } else { "ws" };

        Url::parse(&format!("{}://{}", scheme, self.address)).map_err(Into::into)
    }

    /// Returns the value of the first header named `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A freshly opened connection.
pub struct Connected {
    /// The connection itself.
    pub transport: Box<dyn Transport>,
    /// Whether the node reports that it resumed a previous session.
    pub resumed: bool,
}

impl fmt::Debug for Connected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connected")
            .field("resumed", &self.resumed)
            .finish()
    }
}

/// Opens connections to nodes.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new connection, completing any handshake.
    async fn connect(&self, request: ConnectRequest) -> Result<Connected, TransportError>;
}

/// Something received on, or happening to, an open connection.
#[derive(Debug)]
pub enum TransportEvent {
    /// A text frame.
    Message(String),
    /// A non-fatal error. The connection is closed by a later [`Closed`] event.
    ///
    /// [`Closed`]: TransportEvent::Closed
    Error(TransportError),
    /// The connection is gone.
    Closed {
        /// Close code sent by the node, if any.
        code: Option<u16>,
        /// Close reason sent by the node.
        reason: String,
        /// Whether the closing handshake completed.
        clean: bool,
    },
}

/// One open connection to a node.
///
/// A transport is only ever driven by its node's runner task.
#[async_trait]
pub trait Transport: Send {
    /// Sends a text frame.
    ///
    /// `prioritized` hints that this message should jump any internal queue;
    /// implementations are free to ignore it.
    async fn send(&mut self, text: String, prioritized: bool) -> Result<(), TransportError>;

    /// Waits for the next event on this connection.
    ///
    /// After a [`TransportEvent::Closed`] is returned, this will not be called again.
    async fn recv(&mut self) -> TransportEvent;

    /// Closes the connection with the given close code.
    async fn close(&mut self, code: u16);
}

/// Errors raised by a transport.
#[derive(Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// The connection is already closed.
    Closed,
    /// A handshake header had a value which cannot be sent.
    InvalidHeader(&'static str),
    /// Miscellaneous I/O error.
    Io(IoError),
    /// The node address does not form a valid URL.
    Url(ParseError),
    /// Error communicating with the node over WebSocket.
    Ws(TungsteniteError),
}

impl From<IoError> for TransportError {
    fn from(e: IoError) -> Self {
        TransportError::Io(e)
    }
}

impl From<ParseError> for TransportError {
    fn from(e: ParseError) -> Self {
        TransportError::Url(e)
    }
}

impl From<TungsteniteError> for TransportError {
    fn from(e: TungsteniteError) -> Self {
        TransportError::Ws(e)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Closed => write!(f, "connection is closed"),
            TransportError::InvalidHeader(name) => write!(f, "invalid value for header {}", name),
            TransportError::Io(e) => e.fmt(f),
            TransportError::Url(e) => write!(f, "invalid node address ({})", e),
            TransportError::Ws(e) => write!(f, "websocket issue ({:?}).", e),
        }
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            TransportError::Io(e) => Some(e),
            TransportError::Url(e) => Some(e),
            TransportError::Ws(e) => Some(e),
            _ => None,
        }
    }
}
