//! Events raised by a [`Cluster`] about its nodes and players.
//!
//! Register an [`EventHandler`] with [`Cluster::add_event_handler`] to receive them.
//! Handlers are called in registration order, one event at a time per source.
//!
//! [`Cluster`]: crate::Cluster
//! [`Cluster::add_event_handler`]: crate::Cluster::add_event_handler

use crate::{
    id::{ChannelId, GuildId, NodeId},
    migrate::RelocationReport,
    model::{PlayerState, Stats, TrackEvent},
};
use async_trait::async_trait;
use std::time::Duration;

/// Something which happened to a node or a player.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum ClusterEvent {
    /// A node connected.
    NodeReady {
        /// The connected node.
        node: NodeId,
        /// Whether the node kept this client's players from an earlier connection.
        resumed: bool,
    },
    /// A node's connection closed, whether or not it will reconnect.
    NodeClosed {
        /// The node whose connection closed.
        node: NodeId,
        /// Close code sent by the node, if any.
        code: Option<u16>,
        /// Close reason sent by the node.
        reason: String,
        /// Whether the closing handshake completed.
        clean: bool,
    },
    /// A node's connection reported an error.
    ///
    /// This does not change the node's state.
    NodeError {
        /// The node which errored.
        node: NodeId,
        /// Description of the error.
        error: String,
    },
    /// A node will attempt to reconnect after `delay`.
    NodeReconnecting {
        /// The reconnecting node.
        node: NodeId,
        /// Attempt number within this outage, counting from 1.
        attempt: usize,
        /// Time until the attempt.
        delay: Duration,
    },
    /// A node is lost: it is disconnected and will not reconnect by itself.
    ///
    /// Its players are moved to other nodes according to the cluster's [`Failover`] policy.
    ///
    /// [`Failover`]: crate::failover::Failover
    NodeLost {
        /// The lost node.
        node: NodeId,
        /// Reconnection attempts made before giving up, or `None` if the node was closed
        /// by the client or reconnection is disabled.
        attempts: Option<usize>,
    },
    /// A node sent its load report.
    Stats {
        /// The reporting node.
        node: NodeId,
        /// Latest load report.
        stats: Stats,
    },
    /// A node sent a player's playback position.
    PlayerUpdate {
        /// Guild of the player.
        guild_id: GuildId,
        /// Reported state.
        state: PlayerState,
    },
    /// A node sent a track or voice event for a player.
    Track {
        /// Guild of the player.
        guild_id: GuildId,
        /// The event.
        event: TrackEvent,
    },
    /// The bot was moved out of a voice channel, or disconnected from voice.
    PlayerMove {
        /// Guild of the player.
        guild_id: GuildId,
        /// Channel the bot was in.
        old: ChannelId,
        /// Channel the bot is now in, or `None` if it left voice.
        new: Option<ChannelId>,
    },
    /// A player was moved to another node.
    PlayerRelocated {
        /// Every step taken, and whether it succeeded.
        report: RelocationReport,
    },
    /// A player was destroyed by the cluster, rather than by a call to
    /// [`Cluster::destroy_player`].
    ///
    /// [`Cluster::destroy_player`]: crate::Cluster::destroy_player
    PlayerDestroyed {
        /// Guild of the player.
        guild_id: GuildId,
        /// Node the player was bound to.
        node: NodeId,
    },
}

/// Trait to handle an event which can be fired by a cluster.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Respond to one received event.
    async fn act(&self, event: &ClusterEvent);
}
