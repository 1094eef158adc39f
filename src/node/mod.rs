//! Connections to individual Lavalink nodes.
//!
//! Each [`Node`] is a cheap handle onto a background runner task which owns the
//! node's socket and drives its connection lifecycle:
//!
//! ```text
//! Connecting -> Connected -> { Reconnecting <-> Connected } -> Disconnected
//! ```
//!
//! Status, stats and penalty are only ever written by the runner task; handles
//! observe them through shared state.

pub mod error;
pub mod penalty;
pub mod retry;
pub(crate) mod tasks;
#[cfg(test)]
pub(crate) mod test_impls;
pub mod transport;
mod ws;

pub use self::ws::WsConnector;

use self::error::{Error, Result};
use crate::{
    config::{Config, NodeConfig},
    id::NodeId,
    model::{IncomingMessage, OutgoingMessage, Stats},
};
use derivative::Derivative;
use flume::Sender;
use parking_lot::RwLock;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::instrument;

/// Lifecycle state of a node connection.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum NodeStatus {
    /// The first connection attempt is in progress.
    Connecting,
    /// The node is connected and may be sent messages.
    Connected,
    /// The connection dropped, and a reconnection attempt is pending or in progress.
    Reconnecting,
    /// The node is not connected and will not reconnect by itself.
    Disconnected,
}

/// Messages sent from a [`Node`] handle to its runner task.
pub(crate) enum NodeMessage {
    Connect,
    Close,
    Send {
        message: OutgoingMessage,
        prioritized: bool,
        result: Sender<Result<()>>,
    },
}

/// Lifecycle signals sent from a node's runner task to its cluster.
#[derive(Debug)]
pub(crate) enum NodeEvent {
    Ready {
        resumed: bool,
    },
    Closed {
        code: Option<u16>,
        reason: String,
        clean: bool,
    },
    Error(String),
    Reconnecting {
        attempt: usize,
        delay: Duration,
    },
    /// Reconnection gave up after the configured number of attempts.
    Exhausted {
        attempts: usize,
    },
    /// The connection was closed and reconnection is disabled, or the
    /// caller closed it.
    Disconnected,
    Message(IncomingMessage),
}

#[derive(Debug)]
pub(crate) struct NodeShared {
    state: RwLock<NodeState>,
    penalty: AtomicU64,
}

#[derive(Clone, Debug)]
struct NodeState {
    status: NodeStatus,
    reconnect_attempts: usize,
    stats: Option<Stats>,
    last_error: Option<String>,
}

impl NodeShared {
    fn new(status: NodeStatus) -> Self {
        Self {
            state: RwLock::new(NodeState {
                status,
                reconnect_attempts: 0,
                stats: None,
                last_error: None,
            }),
            penalty: AtomicU64::new(0),
        }
    }
}

/// Handle to one Lavalink node.
///
/// Handles are cheap to clone, and all refer to the same connection.
#[derive(Clone, Debug)]
pub struct Node {
    inner: Arc<NodeInner>,
}

#[derive(Derivative)]
#[derivative(Debug)]
struct NodeInner {
    config: NodeConfig,
    index: usize,
    shared: Arc<NodeShared>,
    #[derivative(Debug = "ignore")]
    sender: Sender<NodeMessage>,
}

impl Node {
    /// Creates a node and starts its runner task, without connecting.
    pub(crate) fn spawn(
        node: NodeConfig,
        index: usize,
        config: Config,
        events: Sender<(NodeId, NodeEvent)>,
    ) -> Self {
        let (tx, rx) = flume::unbounded();
        let shared = Arc::new(NodeShared::new(NodeStatus::Disconnected));

        tasks::start(node.clone(), shared.clone(), config, rx, events);

        Self {
            inner: Arc::new(NodeInner {
                config: node,
                index,
                shared,
                sender: tx,
            }),
        }
    }

    /// Name of this node.
    pub fn id(&self) -> &NodeId {
        &self.inner.config.id
    }

    /// `host:port` of this node.
    pub fn address(&self) -> &str {
        &self.inner.config.address
    }

    /// Whether this node is reached over TLS.
    pub fn secure(&self) -> bool {
        self.inner.config.secure
    }

    /// Position of this node in the cluster configuration.
    pub fn index(&self) -> usize {
        self.inner.index
    }

    /// Current lifecycle state of this node.
    pub fn status(&self) -> NodeStatus {
        self.inner.shared.state.read().status
    }

    /// Whether this node can currently be sent messages.
    pub fn is_connected(&self) -> bool {
        self.status() == NodeStatus::Connected
    }

    /// Load penalty computed from this node's latest stats, where lower is better.
    ///
    /// This is 0 until the node first reports its stats.
    pub fn penalty(&self) -> u64 {
        self.inner.shared.penalty.load(Ordering::Acquire)
    }

    /// Number of reconnection attempts made in the current outage.
    pub fn reconnect_attempts(&self) -> usize {
        self.inner.shared.state.read().reconnect_attempts
    }

    /// The most recent load report from this node.
    pub fn stats(&self) -> Option<Stats> {
        self.inner.shared.state.read().stats.clone()
    }

    /// Description of the most recent connection error.
    pub fn last_error(&self) -> Option<String> {
        self.inner.shared.state.read().last_error.clone()
    }

    /// Starts connecting to this node, if it is disconnected.
    ///
    /// This resets the reconnection counter, and is how a node which exhausted
    /// its reconnection attempts is brought back.
    pub fn connect(&self) {
        // The runner only exits once every handle is dropped.
        let _ = self.inner.sender.send(NodeMessage::Connect);
    }

    /// Closes this node's connection, without reconnecting.
    ///
    /// The cluster treats this node as lost.
    pub fn close(&self) {
        let _ = self.inner.sender.send(NodeMessage::Close);
    }

    /// Sends a message to this node.
    ///
    /// Messages are delivered in the order this method is called. `prioritized`
    /// is passed on to the transport as a hint.
    #[instrument(skip(self, message), fields(node = %self.id(), op = message.op()))]
    pub async fn send(&self, message: OutgoingMessage, prioritized: bool) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let (tx, rx) = flume::bounded(1);

        self.inner
            .sender
            .send(NodeMessage::Send {
                message,
                prioritized,
                result: tx,
            })
            .map_err(|_| Error::AttemptDiscarded)?;

        rx.recv_async()
            .await
            .map_err(|_| Error::AttemptDiscarded)?
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Node {}

#[cfg(test)]
impl Node {
    /// Creates a node with a fixed status and penalty, and no runner task.
    pub(crate) fn detached(id: &str, index: usize, status: NodeStatus, penalty: u64) -> Self {
        let (tx, _rx) = flume::unbounded();
        let shared = Arc::new(NodeShared::new(status));
        shared.penalty.store(penalty, Ordering::Release);

        Self {
            inner: Arc::new(NodeInner {
                config: NodeConfig::new(id, "localhost:2333", "youshallnotpass"),
                index,
                shared,
                sender: tx,
            }),
        }
    }
}
