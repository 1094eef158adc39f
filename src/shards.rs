//! Handlers for sending voice state updates over sharded gateway connections.

use crate::{error::GatewayResult, id::*};
use async_trait::async_trait;
use derivative::Derivative;
use std::sync::Arc;

#[derive(Clone, Derivative)]
#[derivative(Debug)]
#[non_exhaustive]
/// Source of individual shard connection handles.
pub enum Sharder {
    /// A generic shard handle source.
    Generic(#[derivative(Debug = "ignore")] Arc<dyn GenericSharder + Send + Sync>),
}

/// Trait for a generic shard cluster or other handle source.
///
/// This allows any Discord library to be integrated with the cluster, and offers a source
/// of generic shard handles.
pub trait GenericSharder {
    /// Get access to a new shard
    fn get_shard(&self, shard_id: u64) -> Option<Arc<dyn VoiceUpdate + Send + Sync>>;
}

impl Sharder {
    /// Returns a new handle to the required inner shard.
    #[must_use]
    pub fn get_shard(&self, shard_id: u64) -> Option<Shard> {
        match self {
            Sharder::Generic(src) => src.get_shard(shard_id).map(Shard::Generic),
        }
    }
}

#[derive(Derivative, Clone)]
#[derivative(Debug)]
#[non_exhaustive]
/// A reference to an individual gateway connection.
pub enum Shard {
    /// Handle to a generic shard instance.
    Generic(#[derivative(Debug = "ignore")] Arc<dyn VoiceUpdate + Send + Sync>),
}

#[async_trait]
impl VoiceUpdate for Shard {
    async fn update_voice_state(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        self_deaf: bool,
        self_mute: bool,
    ) -> GatewayResult<()> {
        match self {
            Shard::Generic(g) =>
                g.update_voice_state(guild_id, channel_id, self_deaf, self_mute)
                    .await,
        }
    }
}

/// Trait for a generic shard handle to send voice state updates to Discord.
///
/// This allows any Discord library to be integrated with the cluster, and is intended to
/// wrap a message channel to a single shard. The cluster only needs to send
/// `VoiceStateUpdate`s to Discord to function.
///
/// Libraries must be sure to call [`Cluster::process`] in response to their own
/// received voice server and voice state updates.
///
/// [`Cluster::process`]: crate::Cluster::process
#[async_trait]
pub trait VoiceUpdate {
    /// Send a voice update message to the inner shard handle.
    async fn update_voice_state(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        self_deaf: bool,
        self_mute: bool,
    ) -> GatewayResult<()>;
}

#[cfg(test)]
pub(crate) mod test_impls {
    use super::*;
    use parking_lot::Mutex;

    /// Gateway which records every voice state update it is asked to send.
    #[derive(Clone, Default)]
    pub(crate) struct MockGateway {
        updates: Arc<Mutex<Vec<(GuildId, Option<ChannelId>)>>>,
    }

    impl MockGateway {
        pub(crate) fn sharder(&self) -> Sharder {
            Sharder::Generic(Arc::new(self.clone()))
        }

        pub(crate) fn updates(&self) -> Vec<(GuildId, Option<ChannelId>)> {
            self.updates.lock().clone()
        }
    }

    impl GenericSharder for MockGateway {
        fn get_shard(&self, _shard_id: u64) -> Option<Arc<dyn VoiceUpdate + Send + Sync>> {
            Some(Arc::new(self.clone()))
        }
    }

    #[async_trait]
    impl VoiceUpdate for MockGateway {
        async fn update_voice_state(
            &self,
            guild_id: GuildId,
            channel_id: Option<ChannelId>,
            _self_deaf: bool,
            _self_mute: bool,
        ) -> GatewayResult<()> {
            self.updates.lock().push((guild_id, channel_id));
            Ok(())
        }
    }
}
