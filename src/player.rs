use crate::{
    error::{ClusterResult, GatewayError, GatewayResult, NodeResult},
    filters::FilterState,
    id::{ChannelId, GuildId, NodeId},
    info::{StateChange, VoiceInfo, VoiceProgress},
    model::{
        Filters,
        GuildTarget,
        OutgoingMessage,
        Pause,
        Play,
        PlayerState,
        Seek,
        TrackEvent,
        Volume,
    },
    node::Node,
    shards::{Shard, VoiceUpdate},
};
use std::{convert::TryFrom, time::Duration};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// The Player is responsible for a single guild's audio on a Lavalink node,
/// acting as a clean API above the node messages and voice handshake.
///
/// A player is bound to exactly one node at a time. Playback state is tracked
/// locally, so that it can be recreated on another node if its node is lost.
#[derive(Debug)]
pub struct Player {
    guild_id: GuildId,
    node: Node,
    progress: VoiceProgress,

    track: Option<String>,
    /// Last known playback position, in milliseconds.
    position: i64,
    position_at: Instant,
    paused: bool,
    volume: u16,
    filters: FilterState,

    /// Whether the current handler is set to deafen voice connections.
    self_deaf: bool,
    /// Whether the current handler is set to mute voice connections.
    self_mute: bool,
    shard_id: u64,
    ws: Option<Shard>,
    lifetime: CancellationToken,
}

impl Player {
    pub(crate) fn new(guild_id: GuildId, node: Node, shard_id: u64, ws: Option<Shard>) -> Self {
        Self {
            guild_id,
            node,
            progress: VoiceProgress::default(),

            track: None,
            position: 0,
            position_at: Instant::now(),
            paused: false,
            volume: 100,
            filters: FilterState::new(),

            self_deaf: false,
            self_mute: false,
            shard_id,
            ws,
            lifetime: CancellationToken::new(),
        }
    }

    /// ID of this player's guild.
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// The node this player is bound to.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Name of the node this player is bound to.
    pub fn node_id(&self) -> &NodeId {
        self.node.id()
    }

    /// The voice channel this player is in, if any.
    ///
    /// `None` once the bot has left voice: such a player is removed rather than
    /// moved when its node is lost.
    pub fn current_channel(&self) -> Option<ChannelId> {
        self.progress.channel_id()
    }

    /// The voice connection details handed to the node, once both halves of the
    /// voice handshake have arrived.
    pub fn current_connection(&self) -> Option<VoiceInfo> {
        self.progress.info(self.guild_id)
    }

    /// The currently playing track, if any.
    pub fn track(&self) -> Option<&str> {
        self.track.as_deref()
    }

    /// Last playback position reported by the node, in milliseconds.
    pub fn position(&self) -> i64 {
        self.position
    }

    /// Playback position extrapolated to the present, in milliseconds.
    pub fn estimated_position(&self) -> i64 {
        if self.track.is_none() || self.paused {
            return self.position;
        }

        let elapsed = self.position_at.elapsed().as_millis();
        self.position
            .saturating_add(i64::try_from(elapsed).unwrap_or(i64::MAX))
    }

    /// Whether playback is paused.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Current volume, where 100 is unmodified.
    pub fn volume(&self) -> u16 {
        self.volume
    }

    /// Current audio filters.
    pub fn filters(&self) -> &FilterState {
        &self.filters
    }

    /// Returns whether the current connection is self-deafened in this server.
    pub fn is_deaf(&self) -> bool {
        self.self_deaf
    }

    /// Returns whether the current connection is self-muted in this server.
    pub fn is_mute(&self) -> bool {
        self.self_mute
    }

    /// Asks Discord to move the bot into `channel_id`.
    ///
    /// The node is attached to the call once Discord's voice server and
    /// voice state updates are passed to [`Cluster::process`].
    ///
    /// [`Cluster::process`]: crate::Cluster::process
    #[instrument(skip(self))]
    pub async fn join(&mut self, channel_id: ChannelId) -> GatewayResult<()> {
        self.progress.expect_channel(channel_id);
        self.update().await
    }

    /// Asks Discord to remove the bot from voice in this guild.
    ///
    /// The player is kept, with its playback state.
    #[instrument(skip(self))]
    pub async fn leave(&mut self) -> GatewayResult<()> {
        self.progress.clear();
        self.update().await
    }

    /// Sets whether the current connection is to be deafened.
    #[instrument(skip(self))]
    pub async fn deafen(&mut self, deaf: bool) -> GatewayResult<()> {
        self.self_deaf = deaf;
        self.update().await
    }

    /// Sets whether the current connection is to be muted.
    #[instrument(skip(self))]
    pub async fn mute(&mut self, mute: bool) -> GatewayResult<()> {
        self.self_mute = mute;
        self.update().await
    }

    /// Plays a track from its start, replacing any current track.
    pub async fn play(&mut self, track: impl Into<String>) -> NodeResult<()> {
        self.play_from(track, Duration::ZERO).await
    }

    /// Plays a track from `start`, replacing any current track.
    #[instrument(skip(self, track))]
    pub async fn play_from(&mut self, track: impl Into<String>, start: Duration) -> NodeResult<()> {
        let track = track.into();
        let start_time = u64::try_from(start.as_millis()).unwrap_or(u64::MAX);

        self.track = Some(track.clone());
        self.paused = false;
        self.set_position(i64::try_from(start_time).unwrap_or(i64::MAX));

        self.node
            .send(
                OutgoingMessage::Play(Play {
                    guild_id: self.guild_id.to_string(),
                    track,
                    start_time: (start_time > 0).then(|| start_time),
                    end_time: None,
                    no_replace: false,
                    pause: false,
                }),
                false,
            )
            .await
    }

    /// Stops the current track.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> NodeResult<()> {
        self.track = None;
        self.set_position(0);

        self.node
            .send(OutgoingMessage::Stop(self.target()), false)
            .await
    }

    /// Pauses or resumes playback.
    #[instrument(skip(self))]
    pub async fn pause(&mut self, pause: bool) -> NodeResult<()> {
        let position = self.estimated_position();
        self.paused = pause;
        self.set_position(position);

        self.node
            .send(
                OutgoingMessage::Pause(Pause {
                    guild_id: self.guild_id.to_string(),
                    pause,
                }),
                false,
            )
            .await
    }

    /// Seeks within the current track.
    #[instrument(skip(self))]
    pub async fn seek(&mut self, position: Duration) -> NodeResult<()> {
        let position = u64::try_from(position.as_millis()).unwrap_or(u64::MAX);
        self.set_position(i64::try_from(position).unwrap_or(i64::MAX));

        self.node
            .send(
                OutgoingMessage::Seek(Seek {
                    guild_id: self.guild_id.to_string(),
                    position,
                }),
                false,
            )
            .await
    }

    /// Sets the player volume, where 100 is unmodified. This is clamped to 1000.
    #[instrument(skip(self))]
    pub async fn set_volume(&mut self, volume: u16) -> NodeResult<()> {
        self.volume = volume.min(1000);

        self.node
            .send(
                OutgoingMessage::Volume(Volume {
                    guild_id: self.guild_id.to_string(),
                    volume: self.volume,
                }),
                false,
            )
            .await
    }

    /// Replaces every audio filter, and sends them to the node.
    #[instrument(skip(self, filters))]
    pub async fn set_filters(&mut self, filters: FilterState) -> NodeResult<()> {
        self.filters = filters;
        self.send_filters().await
    }

    /// Modifies the audio filters in place, then sends them to the node.
    pub async fn update_filters<F>(&mut self, update: F) -> NodeResult<()>
    where
        F: FnOnce(&mut FilterState),
    {
        update(&mut self.filters);
        self.send_filters().await
    }

    pub(crate) async fn send_filters(&self) -> NodeResult<()> {
        self.node
            .send(
                OutgoingMessage::Filters(Filters {
                    guild_id: self.guild_id.to_string(),
                    filters: self.filters.payload(),
                }),
                true,
            )
            .await
    }

    /// Stores the voice server half of the handshake.
    ///
    /// Callers send the voice update if `dispatch` is set on the result.
    pub(crate) fn update_server(&mut self, token: String, endpoint: String) -> StateChange {
        StateChange {
            dispatch: self.progress.apply_server_update(token, endpoint),
            moved: None,
        }
    }

    /// Stores the voice state half of the handshake.
    ///
    /// Callers send the voice update if `dispatch` is set on the result.
    pub(crate) fn update_state(
        &mut self,
        session_id: String,
        channel_id: Option<ChannelId>,
    ) -> StateChange {
        let change = self.progress.apply_state_update(session_id, channel_id);

        if channel_id.is_none() {
            // Likely that we were disconnected by an admin.
            debug!("Left voice in guild {}.", self.guild_id);
        }

        change
    }

    pub(crate) async fn send_voice_update(&self) -> NodeResult<()> {
        match self.current_connection() {
            Some(info) =>
                self.node
                    .send(OutgoingMessage::VoiceUpdate((&info).into()), false)
                    .await,
            None => Ok(()),
        }
    }

    /// Applies a `playerUpdate` sent by the node.
    pub(crate) fn handle_update(&mut self, state: &PlayerState) {
        if let Some(position) = state.position {
            self.set_position(position);
        }
    }

    /// Applies a track event sent by the node.
    pub(crate) fn handle_event(&mut self, event: &TrackEvent) {
        if event.clears_track() {
            self.track = None;
            self.set_position(0);
        }
    }

    /// Binds this player to `node`, returning the node it was bound to.
    pub(crate) fn bind(&mut self, node: Node) -> Node {
        std::mem::replace(&mut self.node, node)
    }

    pub(crate) fn set_position(&mut self, position: i64) {
        self.position = position;
        self.position_at = Instant::now();
    }

    /// Cancelled once this player is destroyed.
    pub(crate) fn lifetime(&self) -> &CancellationToken {
        &self.lifetime
    }

    /// Tears this player down on its node and the gateway.
    ///
    /// Both are attempted; the first failure is returned.
    #[instrument(skip(self))]
    pub(crate) async fn destroy(&mut self) -> ClusterResult<()> {
        self.lifetime.cancel();

        let node = self
            .node
            .send(OutgoingMessage::Destroy(self.target()), false)
            .await;
        let gateway = if self.progress.channel_id().is_some() {
            self.leave().await
        } else {
            Ok(())
        };

        node?;
        gateway.map_err(Into::into)
    }

    fn target(&self) -> GuildTarget {
        GuildTarget {
            guild_id: self.guild_id.to_string(),
        }
    }

    /// Send an update for the current session over the gateway.
    #[instrument(skip(self))]
    async fn update(&mut self) -> GatewayResult<()> {
        if let Some(ws) = self.ws.as_ref() {
            ws.update_voice_state(
                self.guild_id,
                self.progress.channel_id(),
                self.self_deaf,
                self.self_mute,
            )
            .await
        } else {
            Err(GatewayError::NoShard(self.shard_id))
        }
    }
}
