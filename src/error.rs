//! Cluster, configuration, and gateway error handling.

use crate::id::NodeId;
use std::{error::Error, fmt};

pub use crate::{
    migrate::RelocateError,
    node::{
        error::{Error as NodeError, Result as NodeResult},
        transport::TransportError,
    },
};

/// Error returned by [`Cluster::new`] when its configuration is unusable.
///
/// These are never retried.
///
/// [`Cluster::new`]: crate::Cluster::new
#[derive(Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// No gateway [`Sharder`] was provided, so players could never join
    /// or leave voice channels.
    ///
    /// [`Sharder`]: crate::shards::Sharder
    NoSender,
    /// The shard count was zero.
    InvalidShardCount,
    /// No nodes were configured.
    NoNodes,
    /// Two configured nodes share the same name.
    DuplicateNode(NodeId),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid cluster configuration: ")?;
        match self {
            ConfigError::NoSender => write!(f, "no gateway sender was provided."),
            ConfigError::InvalidShardCount => write!(f, "shard count must be at least 1."),
            ConfigError::NoNodes => write!(f, "at least one node must be configured."),
            ConfigError::DuplicateNode(id) => write!(f, "node name {} is used twice.", id),
        }
    }
}

impl Error for ConfigError {}

/// Error returned when a gateway sender cannot deliver a voice state update.
#[derive(Debug)]
#[non_exhaustive]
pub enum GatewayError {
    /// The sharder has no handle for the shard owning this guild.
    NoShard(u64),
    /// The underlying gateway library failed to send the update.
    Send(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to update voice state: ")?;
        match self {
            GatewayError::NoShard(id) => write!(f, "no handle for shard {}.", id),
            GatewayError::Send(e) => write!(f, "gateway send failed ({}).", e),
        }
    }
}

impl Error for GatewayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GatewayError::NoShard(_) => None,
            GatewayError::Send(e) => Some(e.as_ref()),
        }
    }
}

/// Convenience type for gateway sender results.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Error returned by cluster and player operations requested directly by a caller.
#[derive(Debug)]
#[non_exhaustive]
pub enum ClusterError {
    /// No node is currently connected, or the requested node does not exist.
    NoAvailableNode,
    /// Tried to operate on a player which was not found.
    NoPlayer,
    /// The gateway sender could not deliver a voice state update.
    Gateway(GatewayError),
    /// The player's node could not deliver a message.
    Node(NodeError),
    /// Moving the player to another node did not fully succeed.
    Relocate(RelocateError),
}

impl ClusterError {
    /// Indicates whether this failure may clear up once a node (re)connects.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            ClusterError::NoAvailableNode | ClusterError::Node(NodeError::NotConnected)
        )
    }
}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterError::NoAvailableNode => write!(f, "no node is available."),
            ClusterError::NoPlayer => write!(f, "no player exists for this guild."),
            ClusterError::Gateway(e) => e.fmt(f),
            ClusterError::Node(e) => e.fmt(f),
            ClusterError::Relocate(e) => e.fmt(f),
        }
    }
}

impl Error for ClusterError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ClusterError::NoAvailableNode | ClusterError::NoPlayer => None,
            ClusterError::Gateway(e) => Some(e),
            ClusterError::Node(e) => Some(e),
            ClusterError::Relocate(e) => Some(e),
        }
    }
}

impl From<GatewayError> for ClusterError {
    fn from(e: GatewayError) -> Self {
        ClusterError::Gateway(e)
    }
}

impl From<NodeError> for ClusterError {
    fn from(e: NodeError) -> Self {
        ClusterError::Node(e)
    }
}

impl From<RelocateError> for ClusterError {
    fn from(e: RelocateError) -> Self {
        ClusterError::Relocate(e)
    }
}

/// Convenience type for cluster and player error handling.
pub type ClusterResult<T> = Result<T, ClusterError>;
