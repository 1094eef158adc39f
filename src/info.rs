use crate::id::{ChannelId, GuildId, UserId};
use std::fmt;

/// Result of applying a voice state update to a [`VoiceProgress`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct StateChange {
    /// Both halves are present and differ from what was last dispatched.
    pub dispatch: bool,
    /// The bot was moved out of a known channel: `(old, new)`.
    pub moved: Option<(ChannelId, Option<ChannelId>)>,
}

/// Buffers the two independent halves of the voice handshake for one guild.
///
/// Discord delivers a voice server update (token and endpoint) and a voice
/// state update (session and channel) in no particular order. A node can only
/// attach to the call once it holds both.
#[derive(Clone, Default)]
pub(crate) struct VoiceProgress {
    channel_id: Option<ChannelId>,
    session_id: Option<String>,
    server: Option<(String, String)>,
}

impl VoiceProgress {
    pub(crate) fn channel_id(&self) -> Option<ChannelId> {
        self.channel_id
    }

    pub(crate) fn has_server(&self) -> bool {
        self.server.is_some()
    }

    pub(crate) fn has_session(&self) -> bool {
        self.session_id.is_some()
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.has_server() && self.has_session()
    }

    /// Records the channel a join was requested for, before Discord confirms it.
    pub(crate) fn expect_channel(&mut self, channel_id: ChannelId) {
        self.channel_id = Some(channel_id);
    }

    /// Returns the complete voice update for a node, if both halves are present.
    pub(crate) fn info(&self, guild_id: GuildId) -> Option<VoiceInfo> {
        match (&self.session_id, &self.server) {
            (Some(session_id), Some((token, endpoint))) => Some(VoiceInfo {
                channel_id: self.channel_id,
                endpoint: endpoint.clone(),
                guild_id,
                session_id: session_id.clone(),
                token: token.clone(),
            }),
            _ => None,
        }
    }

    /// Stores the server half, returning whether a voice update should now be sent.
    pub(crate) fn apply_server_update(&mut self, token: String, endpoint: String) -> bool {
        let changed = self
            .server
            .as_ref()
            .map_or(true, |(t, e)| *t != token || *e != endpoint);

        self.server = Some((token, endpoint));

        changed && self.is_complete()
    }

    /// Stores the state half.
    ///
    /// A `None` channel means the bot left (or was removed from) voice: the
    /// session is forgotten, and the player is left pending removal.
    pub(crate) fn apply_state_update(
        &mut self,
        session_id: String,
        channel_id: Option<ChannelId>,
    ) -> StateChange {
        let moved = match self.channel_id {
            Some(old) if Some(old) != channel_id => Some((old, channel_id)),
            _ => None,
        };

        self.channel_id = channel_id;

        if channel_id.is_none() {
            self.session_id = None;
            self.server = None;

            return StateChange {
                dispatch: false,
                moved,
            };
        }

        let changed = self.session_id.as_ref() != Some(&session_id);
        self.session_id = Some(session_id);

        StateChange {
            dispatch: changed && self.is_complete(),
            moved,
        }
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }
}

impl fmt::Debug for VoiceProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceProgress")
            .field("channel_id", &self.channel_id)
            .field("session_id", &self.session_id)
            .field("endpoint", &self.server.as_ref().map(|(_, e)| e))
            .field("token_is_some", &self.server.is_some())
            .finish()
    }
}

/// Voice signaling received from the Discord gateway, to be passed to [`Cluster::process`].
///
/// [`Cluster::process`]: crate::Cluster::process
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum VoiceEvent {
    /// A `VOICE_SERVER_UPDATE` event.
    Server {
        /// Guild the voice server serves.
        guild_id: GuildId,
        /// Voice connection token.
        token: String,
        /// Voice server host, or `None` if the server is unavailable.
        endpoint: Option<String>,
    },
    /// A `VOICE_STATE_UPDATE` event.
    State {
        /// Guild of the voice state.
        guild_id: GuildId,
        /// Channel the user is now in, or `None` if they left voice.
        channel_id: Option<ChannelId>,
        /// Voice session of the user.
        session_id: String,
        /// User whose voice state changed.
        user_id: UserId,
    },
}

/// Parameters a Lavalink node needs to join a Discord voice call on the bot's behalf.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct VoiceInfo {
    /// ID of the voice channel being joined, if it is known.
    ///
    /// This is not needed by the node, but is useful for book-keeping.
    pub channel_id: Option<ChannelId>,
    /// URL of the voice websocket gateway server assigned to this call.
    pub endpoint: String,
    /// ID of the target voice channel's parent guild.
    pub guild_id: GuildId,
    /// Unique string describing this session for validation/authentication purposes.
    pub session_id: String,
    /// Ephemeral secret used to validate the above session.
    pub token: String,
}

impl fmt::Debug for VoiceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceInfo")
            .field("channel_id", &self.channel_id)
            .field("endpoint", &self.endpoint)
            .field("guild_id", &self.guild_id)
            .field("session_id", &self.session_id)
            .field("token", &"<secret>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::test_ids::*;

    #[test]
    fn server_half_alone_is_buffered() {
        let mut progress = VoiceProgress::default();

        assert!(!progress.apply_server_update("tok".into(), "ep".into()));
        assert!(progress.info(guild(1)).is_none());

        let change = progress.apply_state_update("sess".into(), Some(channel(7)));
        assert!(change.dispatch);
        assert_eq!(change.moved, None);

        let info = progress.info(guild(1)).unwrap();
        assert_eq!(info.token, "tok");
        assert_eq!(info.session_id, "sess");
        assert_eq!(info.channel_id, Some(channel(7)));
    }

    #[test]
    fn state_half_first_then_server() {
        let mut progress = VoiceProgress::default();

        assert!(
            !progress
                .apply_state_update("sess".into(), Some(channel(7)))
                .dispatch
        );
        assert!(progress.apply_server_update("tok".into(), "ep".into()));
    }

    #[test]
    fn repeated_halves_do_not_redispatch() {
        let mut progress = VoiceProgress::default();
        progress.apply_server_update("tok".into(), "ep".into());
        progress.apply_state_update("sess".into(), Some(channel(7)));

        assert!(!progress.apply_server_update("tok".into(), "ep".into()));
        assert!(
            !progress
                .apply_state_update("sess".into(), Some(channel(7)))
                .dispatch
        );

        // Region change.
        assert!(progress.apply_server_update("tok2".into(), "ep2".into()));
    }

    #[test]
    fn channel_change_is_a_move() {
        let mut progress = VoiceProgress::default();
        progress.expect_channel(channel(7));

        let change = progress.apply_state_update("sess".into(), Some(channel(8)));
        assert_eq!(change.moved, Some((channel(7), Some(channel(8)))));

        let change = progress.apply_state_update("sess".into(), None);
        assert_eq!(change.moved, Some((channel(8), None)));
        assert_eq!(progress.channel_id(), None);
        assert!(!progress.has_session());
        assert!(!progress.has_server());
    }
}
