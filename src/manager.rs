use crate::{
    error::{ClusterError, ClusterResult, ConfigError, NodeError},
    events::{ClusterEvent, EventHandler},
    failover::{self, Failover},
    id::{ChannelId, GuildId, NodeId},
    info::VoiceEvent,
    migrate::{relocate, RelocationReport},
    model::IncomingMessage,
    node::{Node, NodeEvent},
    player::Player,
    Config,
};
use dashmap::DashMap;
use derivative::Derivative;
use flume::Receiver;
use parking_lot::RwLock as PRwLock;
use std::{
    convert::TryFrom,
    sync::{Arc, Weak},
};
use tokio::{spawn, sync::Mutex};
use tracing::{debug, debug_span, info, instrument, trace, warn};
use tracing_futures::Instrument;

/// A shard-aware struct responsible for managing Lavalink nodes and the
/// [`Player`]s bound to them.
///
/// The cluster keeps every node connected, hands new players to the least
/// loaded node, forwards voice state updates to players, and moves players
/// off nodes which are lost.
///
/// [`Player`]: Player
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Cluster {
    config: Config,
    nodes: Vec<Node>,
    players: DashMap<GuildId, Arc<Mutex<Player>>>,
    #[derivative(Debug = "ignore")]
    handlers: PRwLock<Vec<Arc<dyn EventHandler>>>,
    #[derivative(Debug = "ignore")]
    me: Weak<Cluster>,
}

impl Cluster {
    /// Creates a cluster, and starts connecting to each of its nodes.
    ///
    /// This must be called from within a Tokio runtime.
    #[instrument(skip(config))]
    pub fn new(config: Config) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;

        let (tx, rx) = flume::unbounded();
        let nodes = config
            .nodes
            .iter()
            .enumerate()
            .map(|(index, node)| Node::spawn(node.clone(), index, config.clone(), tx.clone()))
            .collect();

        let cluster = Self::from_parts(config, nodes);

        let me = Arc::downgrade(&cluster);
        spawn(
            async move {
                trace!("Event processor started.");
                runner(me, rx).await;
                trace!("Event processor finished.");
            }
            .instrument(debug_span!("cluster")),
        );

        for node in &cluster.nodes {
            node.connect();
        }

        info!("Cluster started with {} node(s).", cluster.nodes.len());

        Ok(cluster)
    }

    fn from_parts(config: Config, nodes: Vec<Node>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            config,
            nodes,
            players: DashMap::new(),
            handlers: PRwLock::new(Vec::new()),
            me: me.clone(),
        })
    }

    /// The configuration this cluster was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Every node, in configuration order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Retrieves a node by name.
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id() == id)
    }

    /// Registers a handler for every subsequent [`ClusterEvent`].
    pub fn add_event_handler<H: EventHandler + 'static>(&self, handler: H) {
        self.handlers.write().push(Arc::new(handler));
    }

    /// Returns the connected node with the lowest score, or `None` if no node
    /// is connected.
    ///
    /// Ties go to the node configured first.
    pub fn select_node(&self) -> Option<Node> {
        self.nodes
            .iter()
            .filter(|node| node.is_connected())
            .min_by_key(|node| (self.config.scorer.score(node), node.index()))
            .cloned()
    }

    /// Retrieves a [`Player`] for the given guild, if one already exists.
    ///
    /// [`Player`]: Player
    pub fn get<G: Into<GuildId>>(&self, guild_id: G) -> Option<Arc<Mutex<Player>>> {
        self.players
            .get(&guild_id.into())
            .map(|mapref| Arc::clone(&mapref))
    }

    /// Retrieves the [`Player`] for the given guild, creating one if none is found.
    ///
    /// A new player is bound to `node` if given, or to the [best available node]
    /// otherwise. An existing player is returned as-is, keeping its node.
    ///
    /// This will not join any voice channel.
    ///
    /// [`Player`]: Player
    /// [best available node]: Cluster::select_node
    #[inline]
    pub fn create_player<G>(
        &self,
        guild_id: G,
        node: Option<&NodeId>,
    ) -> ClusterResult<Arc<Mutex<Player>>>
    where
        G: Into<GuildId>,
    {
        self._create_player(guild_id.into(), node)
    }

    fn _create_player(
        &self,
        guild_id: GuildId,
        node: Option<&NodeId>,
    ) -> ClusterResult<Arc<Mutex<Player>>> {
        if let Some(player) = self.get(guild_id) {
            return Ok(player);
        }

        let node = match node {
            Some(id) => self.node(id).cloned(),
            None => self.select_node(),
        }
        .ok_or(ClusterError::NoAvailableNode)?;

        let player = self
            .players
            .entry(guild_id)
            .or_insert_with(|| {
                let shard = shard_id(guild_id.get(), self.config.shard_count);
                let shard_handle = self
                    .config
                    .sharder
                    .as_ref()
                    .and_then(|sharder| sharder.get_shard(shard));

                debug!("Creating player for guild {} on node {}.", guild_id, node.id());

                Arc::new(Mutex::new(Player::new(guild_id, node, shard, shard_handle)))
            })
            .clone();

        Ok(player)
    }

    /// Creates an iterator for all [`Player`]s currently managed.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            inner: self.players.iter().map(|x| (*x.key(), Arc::clone(x.value()))),
        }
    }

    /// Retrieves or creates the player for a guild, then asks Discord to move
    /// the bot into the given voice channel.
    ///
    /// NOTE: an `Err(..)` from the gateway will still create a [`Player`] accessible via [`get`].
    ///
    /// [`Player`]: Player
    /// [`get`]: Cluster::get
    #[inline]
    pub async fn join<C, G>(&self, guild_id: G, channel_id: C) -> ClusterResult<Arc<Mutex<Player>>>
    where
        C: Into<ChannelId>,
        G: Into<GuildId>,
    {
        self._join(guild_id.into(), channel_id.into()).await
    }

    #[instrument(skip(self))]
    async fn _join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> ClusterResult<Arc<Mutex<Player>>> {
        let player = self.create_player(guild_id, None)?;

        {
            let mut handler = player.lock().await;
            handler.join(channel_id).await?;
        }

        Ok(player)
    }

    /// Asks Discord to remove the bot from voice in this guild, keeping its player.
    #[inline]
    pub async fn leave<G: Into<GuildId>>(&self, guild_id: G) -> ClusterResult<()> {
        self._leave(guild_id.into()).await
    }

    async fn _leave(&self, guild_id: GuildId) -> ClusterResult<()> {
        if let Some(player) = self.get(guild_id) {
            let mut handler = player.lock().await;
            handler.leave().await.map_err(Into::into)
        } else {
            Err(ClusterError::NoPlayer)
        }
    }

    /// Removes the player for a guild, returning whether one existed.
    ///
    /// The player is destroyed on its node and leaves voice, and any failover
    /// waiting on its behalf stops. The player is removed even if either of
    /// these messages fails to send, in which case the error is returned.
    #[inline]
    pub async fn destroy_player<G: Into<GuildId>>(&self, guild_id: G) -> ClusterResult<bool> {
        self._destroy_player(guild_id.into()).await
    }

    #[instrument(skip(self))]
    async fn _destroy_player(&self, guild_id: GuildId) -> ClusterResult<bool> {
        let player = match self.players.remove(&guild_id) {
            Some((_, player)) => player,
            None => return Ok(false),
        };

        let mut handler = player.lock().await;
        handler.destroy().await?;

        Ok(true)
    }

    /// Moves a guild's player onto another node, resuming its track there.
    #[inline]
    pub async fn move_player<G: Into<GuildId>>(
        &self,
        guild_id: G,
        node: &NodeId,
    ) -> ClusterResult<RelocationReport> {
        self._move_player(guild_id.into(), node).await
    }

    #[instrument(skip(self))]
    async fn _move_player(
        &self,
        guild_id: GuildId,
        node: &NodeId,
    ) -> ClusterResult<RelocationReport> {
        let player = self.get(guild_id).ok_or(ClusterError::NoPlayer)?;
        let node = self
            .node(node)
            .cloned()
            .ok_or(ClusterError::NoAvailableNode)?;

        if !node.is_connected() {
            return Err(NodeError::NotConnected.into());
        }

        let report = {
            let mut handler = player.lock().await;
            let start_time = u64::try_from(handler.estimated_position()).unwrap_or(0);
            relocate(&mut handler, node, start_time).await?
        };

        self.fire(ClusterEvent::PlayerRelocated {
            report: report.clone(),
        })
        .await;

        Ok(report)
    }

    /// Handles voice signaling received on the gateway.
    ///
    /// You are required to call this with all inbound voice server and voice state
    /// updates. Voice state updates for users other than the bot are ignored.
    #[instrument(skip(self, event))]
    pub async fn process(&self, event: &VoiceEvent) {
        match event {
            VoiceEvent::Server {
                guild_id,
                token,
                endpoint,
            } => {
                let endpoint = match endpoint {
                    Some(endpoint) => endpoint,
                    None => {
                        debug!("Voice server for guild {} is unavailable.", guild_id);
                        return;
                    },
                };

                if let Some(player) = self.get(*guild_id) {
                    let mut handler = player.lock().await;
                    let change = handler.update_server(token.clone(), endpoint.clone());

                    if change.dispatch {
                        if let Err(e) = handler.send_voice_update().await {
                            warn!("Failed to hand voice server to node: {}.", e);
                        }
                    }
                }
            },
            VoiceEvent::State {
                guild_id,
                channel_id,
                session_id,
                user_id,
            } => {
                if *user_id != self.config.user_id {
                    return;
                }

                let player = match self.get(*guild_id) {
                    Some(player) => player,
                    None => return,
                };

                let change = {
                    let mut handler = player.lock().await;
                    let change = handler.update_state(session_id.clone(), *channel_id);

                    if change.dispatch {
                        if let Err(e) = handler.send_voice_update().await {
                            warn!("Failed to hand voice state to node: {}.", e);
                        }
                    }

                    change
                };

                if let Some((old, new)) = change.moved {
                    self.fire(ClusterEvent::PlayerMove {
                        guild_id: *guild_id,
                        old,
                        new,
                    })
                    .await;
                }
            },
        }
    }

    /// Starts failover for every player bound to `node`, returning how many
    /// players are affected.
    ///
    /// This is called automatically whenever a node is lost, and runs the
    /// configured [`Failover`] policy for each player on its own task.
    #[instrument(skip(self))]
    pub async fn on_node_lost(&self, node: &NodeId) -> usize {
        let config = match self.config.failover {
            Failover::Relocate(config) => config,
            Failover::Disabled => {
                info!("Failover disabled: players stay on node {}.", node);
                return 0;
            },
        };

        let mut affected = 0;
        for (guild_id, player) in self.iter().collect::<Vec<_>>() {
            if player.lock().await.node_id() != node {
                continue;
            }

            affected += 1;
            spawn(
                failover::recover(self.me.clone(), guild_id, player, config)
                    .instrument(debug_span!("failover", guild = %guild_id)),
            );
        }

        info!("Node {} lost: recovering {} player(s).", node, affected);

        affected
    }

    /// Removes and destroys a player which cannot be recovered.
    pub(crate) async fn discard_player(&self, guild_id: GuildId, player: &Arc<Mutex<Player>>) {
        // A replacement may have been created in the meantime.
        if self
            .players
            .remove_if(&guild_id, |_, current| Arc::ptr_eq(current, player))
            .is_none()
        {
            return;
        }

        let node = {
            let mut handler = player.lock().await;
            if let Err(e) = handler.destroy().await {
                debug!("Teardown of guild {} incomplete: {}.", guild_id, e);
            }
            handler.node_id().clone()
        };

        self.fire(ClusterEvent::PlayerDestroyed { guild_id, node })
            .await;
    }

    pub(crate) async fn fire(&self, event: ClusterEvent) {
        let handlers = self.handlers.read().clone();

        for handler in handlers {
            handler.act(&event).await;
        }
    }

    async fn handle_node_event(&self, node: NodeId, event: NodeEvent) {
        match event {
            NodeEvent::Ready { resumed } =>
                self.fire(ClusterEvent::NodeReady { node, resumed })
                    .await,
            NodeEvent::Closed {
                code,
                reason,
                clean,
            } =>
                self.fire(ClusterEvent::NodeClosed {
                    node,
                    code,
                    reason,
                    clean,
                })
                .await,
            NodeEvent::Error(error) => self.fire(ClusterEvent::NodeError { node, error }).await,
            NodeEvent::Reconnecting { attempt, delay } =>
                self.fire(ClusterEvent::NodeReconnecting {
                    node,
                    attempt,
                    delay,
                })
                .await,
            NodeEvent::Exhausted { attempts } => {
                self.fire(ClusterEvent::NodeLost {
                    node: node.clone(),
                    attempts: Some(attempts),
                })
                .await;
                self.on_node_lost(&node).await;
            },
            NodeEvent::Disconnected => {
                self.fire(ClusterEvent::NodeLost {
                    node: node.clone(),
                    attempts: None,
                })
                .await;
                self.on_node_lost(&node).await;
            },
            NodeEvent::Message(IncomingMessage::Stats(stats)) =>
                self.fire(ClusterEvent::Stats { node, stats }).await,
            NodeEvent::Message(IncomingMessage::PlayerUpdate(update)) => {
                let guild_id = match update.guild_id.parse::<GuildId>() {
                    Ok(guild_id) => guild_id,
                    Err(_) => return,
                };

                if let Some(player) = self.get(guild_id) {
                    let mut handler = player.lock().await;
                    // Reports from a node the player has since left are stale.
                    if handler.node_id() == &node {
                        handler.handle_update(&update.state);
                    }
                }

                self.fire(ClusterEvent::PlayerUpdate {
                    guild_id,
                    state: update.state,
                })
                .await;
            },
            NodeEvent::Message(IncomingMessage::Event(event)) => {
                let guild_id = match event.guild_id.parse::<GuildId>() {
                    Ok(guild_id) => guild_id,
                    Err(_) => return,
                };

                if let Some(player) = self.get(guild_id) {
                    let mut handler = player.lock().await;
                    if handler.node_id() == &node {
                        handler.handle_event(&event);
                    }
                }

                self.fire(ClusterEvent::Track { guild_id, event }).await;
            },
            NodeEvent::Message(IncomingMessage::Unknown) => {},
        }
    }
}

impl<'a> IntoIterator for &'a Cluster {
    type Item = <Iter<'a> as Iterator>::Item;

    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

async fn runner(cluster: Weak<Cluster>, rx: Receiver<(NodeId, NodeEvent)>) {
    while let Ok((node, event)) = rx.recv_async().await {
        match cluster.upgrade() {
            Some(cluster) => cluster.handle_node_event(node, event).await,
            None => break,
        }
    }
}

type DashMapIter<'a> = dashmap::iter::Iter<'a, GuildId, Arc<Mutex<Player>>>;

type InnerIter<'a> = std::iter::Map<
    DashMapIter<'a>,
    fn(<DashMapIter<'a> as Iterator>::Item) -> (GuildId, Arc<Mutex<Player>>),
>;

/// An iterator over all [`Player`]s currently stored in the cluster.
pub struct Iter<'a> {
    inner: InnerIter<'a>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (GuildId, Arc<Mutex<Player>>);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }

    fn count(self) -> usize {
        self.inner.count()
    }

    fn fold<B, F>(self, init: B, f: F) -> B
    where
        Self: Sized,
        F: FnMut(B, Self::Item) -> B,
    {
        self.inner.fold(init, f)
    }
}

#[inline]
fn shard_id(guild_id: u64, shard_count: u64) -> u64 {
    (guild_id >> 22) % shard_count
}
