//! Recovery of players whose node was lost.

use crate::{
    constants::{DEFAULT_FAILOVER_GRACE, DEFAULT_FAILOVER_POLL},
    events::ClusterEvent,
    id::GuildId,
    manager::Cluster,
    migrate::{relocate, RelocateError},
    player::Player,
};
use std::{
    convert::TryFrom,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{
    select,
    sync::Mutex,
    time::{sleep, Instant},
};
use tracing::{debug, info, instrument, warn};

/// What a cluster does with the players of a lost node.
#[derive(Clone, Copy, Debug, PartialEq)]
#[non_exhaustive]
pub enum Failover {
    /// Players stay bound to the lost node, and fail every request until it
    /// reconnects or they are moved manually.
    Disabled,
    /// Each player waits for any node to become available, and is then moved
    /// there with its track resumed where it left off.
    ///
    /// Players which are not in a voice channel are destroyed instead.
    Relocate(RelocateConfig),
}

impl Default for Failover {
    fn default() -> Self {
        Failover::Relocate(RelocateConfig::default())
    }
}

/// Settings for [`Failover::Relocate`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RelocateConfig {
    /// How often a waiting player checks for an available node.
    ///
    /// Players wait indefinitely, until a node is found or they are destroyed.
    ///
    /// Defaults to [`DEFAULT_FAILOVER_POLL`].
    ///
    /// [`DEFAULT_FAILOVER_POLL`]: crate::constants::DEFAULT_FAILOVER_POLL
    pub poll_interval: Duration,
    /// Extra time added to a track's position when it resumes, on top of the
    /// time spent waiting.
    ///
    /// Defaults to [`DEFAULT_FAILOVER_GRACE`].
    ///
    /// [`DEFAULT_FAILOVER_GRACE`]: crate::constants::DEFAULT_FAILOVER_GRACE
    pub grace: Duration,
}

impl Default for RelocateConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_FAILOVER_POLL,
            grace: DEFAULT_FAILOVER_GRACE,
        }
    }
}

/// Moves one player off its lost node.
///
/// The wait for an available node ends early if the player is destroyed
/// or the cluster is dropped.
#[instrument(skip(cluster, player, config))]
pub(crate) async fn recover(
    cluster: Weak<Cluster>,
    guild_id: GuildId,
    player: Arc<Mutex<Player>>,
    config: RelocateConfig,
) {
    let (lifetime, channel, handshake, position, lost) = {
        let handler = player.lock().await;
        (
            handler.lifetime().clone(),
            handler.current_channel(),
            handler.current_connection().is_some(),
            handler.position(),
            handler.node_id().clone(),
        )
    };

    if lifetime.is_cancelled() {
        return;
    }

    // Torn down while still bound to the lost node.
    if channel.is_none() || !handshake {
        if let Some(cluster) = cluster.upgrade() {
            if channel.is_none() {
                info!("Player is not in a voice channel: destroying.");
            } else {
                info!("Player never completed its voice handshake: destroying.");
            }
            cluster.discard_player(guild_id, &player).await;
        }
        return;
    }

    let anchor_position = u64::try_from(position).unwrap_or(0);
    let anchor_time = Instant::now();

    let node = loop {
        match cluster.upgrade() {
            Some(cluster) =>
                if let Some(node) = cluster.select_node() {
                    break node;
                },
            None => return,
        }

        select! {
            () = lifetime.cancelled() => {
                debug!("Player destroyed while waiting for a node.");
                return;
            },
            () = sleep(config.poll_interval) => {},
        }
    };

    let elapsed = anchor_time.elapsed() + config.grace;
    let start_time =
        anchor_position.saturating_add(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));

    let result = {
        let mut handler = player.lock().await;

        // Destroyed, or moved by someone else, since the wait began.
        if handler.lifetime().is_cancelled() || handler.node_id() != &lost {
            return;
        }

        relocate(&mut handler, node, start_time).await
    };

    let cluster = match cluster.upgrade() {
        Some(cluster) => cluster,
        None => return,
    };

    match result {
        Ok(report) => {
            info!("Moved from {} to {}.", report.from, report.to);
            cluster
                .fire(ClusterEvent::PlayerRelocated { report })
                .await;
        },
        Err(RelocateError::IncompleteHandshake(_)) => {
            // Left voice during the wait, so the player is still on the lost node.
            info!("Player left voice while waiting: destroying.");
            cluster.discard_player(guild_id, &player).await;
        },
        Err(RelocateError::Partial(report)) => {
            warn!("Moved from {} to {} with errors.", report.from, report.to);
            cluster
                .fire(ClusterEvent::PlayerRelocated { report })
                .await;
        },
    }
}
