use crate::{
    constants::*,
    error::ConfigError,
    failover::Failover,
    id::{NodeId, UserId},
    node::{
        penalty::{PenaltyScorer, Scorer},
        retry::Retry,
        transport::Connector,
        WsConnector,
    },
    shards::Sharder,
};
use derivative::Derivative;
use serde::Deserialize;
use std::{collections::HashSet, fmt, sync::Arc, time::Duration};

/// Connection details for one Lavalink node.
///
/// This can be deserialized from configuration files:
///
/// ```json
/// { "id": "eu-1", "address": "lavalink.example.com:2333", "secure": true, "password": "youshallnotpass" }
/// ```
#[derive(Clone, Deserialize, Eq, PartialEq)]
pub struct NodeConfig {
    /// Name of this node, unique within the cluster.
    pub id: NodeId,
    /// `host:port` of the node's websocket server.
    pub address: String,
    /// Whether to connect over TLS.
    #[serde(default)]
    pub secure: bool,
    /// Password sent in the `Authorization` header.
    pub password: String,
}

impl NodeConfig {
    /// Creates the connection details for a plaintext node.
    pub fn new(
        id: impl Into<NodeId>,
        address: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            secure: false,
            password: password.into(),
        }
    }

    /// Sets whether this node is reached over TLS.
    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }
}

impl fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeConfig")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("secure", &self.secure)
            .field("password", &"<secret>")
            .finish()
    }
}

/// Session resumption settings shared by every node.
#[derive(Clone, Eq, PartialEq)]
pub struct ResumeConfig {
    /// Shared secret identifying this client's session to a node.
    pub key: String,
    /// How long a node retains players after the connection drops.
    ///
    /// This is sent to nodes at second precision.
    pub timeout: Duration,
}

impl ResumeConfig {
    /// Creates resume settings using [`DEFAULT_RESUME_TIMEOUT`].
    ///
    /// [`DEFAULT_RESUME_TIMEOUT`]: crate::constants::DEFAULT_RESUME_TIMEOUT
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            timeout: DEFAULT_RESUME_TIMEOUT,
        }
    }
}

impl fmt::Debug for ResumeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumeConfig")
            .field("key", &"<secret>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Configuration for a [`Cluster`] and its nodes.
///
/// [`Cluster`]: crate::Cluster
#[derive(Clone, Derivative)]
#[derivative(Debug)]
#[non_exhaustive]
pub struct Config {
    /// ID of the bot user whose voice sessions are handed to nodes.
    pub user_id: UserId,

    /// Nodes making up the cluster.
    ///
    /// Their order is used to break ties during node selection.
    pub nodes: Vec<NodeConfig>,

    /// Total number of gateway shards the bot runs.
    ///
    /// Defaults to 1.
    pub shard_count: u64,

    /// Session resumption settings.
    ///
    /// Defaults to `None`: nodes discard players when the connection drops.
    pub resume: Option<ResumeConfig>,

    /// Whether nodes reconnect automatically after their connection drops.
    ///
    /// Defaults to `true`.
    pub auto_reconnect: bool,

    /// Connection retry logic for nodes, used when [`auto_reconnect`] is set.
    ///
    /// Defaults to 5 attempts, 15 seconds apart.
    ///
    /// [`auto_reconnect`]: Config::auto_reconnect
    pub reconnect: Retry,

    /// What happens to a lost node's players.
    ///
    /// Defaults to [`Failover::Relocate`] with default settings.
    pub failover: Failover,

    /// Scoring used to choose the best node, where lower is better.
    ///
    /// Defaults to [`PenaltyScorer`].
    #[derivative(Debug = "ignore")]
    pub scorer: Arc<dyn Scorer>,

    /// Opens connections to nodes.
    ///
    /// Defaults to [`WsConnector`].
    #[derivative(Debug = "ignore")]
    pub connector: Arc<dyn Connector>,

    /// Gateway handle used to join and leave voice channels.
    ///
    /// This must be set before building a [`Cluster`].
    ///
    /// [`Cluster`]: crate::Cluster
    pub sharder: Option<Sharder>,

    /// Name sent in each node's `Client-Name` header.
    ///
    /// Defaults to [`CLIENT_NAME`].
    ///
    /// [`CLIENT_NAME`]: crate::constants::CLIENT_NAME
    pub client_name: String,
}

impl Config {
    /// Creates a configuration for `user_id` with no nodes and default settings.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            nodes: Vec::new(),
            shard_count: 1,
            resume: None,
            auto_reconnect: true,
            reconnect: Retry::default(),
            failover: Failover::default(),
            scorer: Arc::new(PenaltyScorer),
            connector: Arc::new(WsConnector),
            sharder: None,
            client_name: CLIENT_NAME.into(),
        }
    }

    /// Adds a node to the cluster.
    #[must_use]
    pub fn node(mut self, node: NodeConfig) -> Self {
        self.nodes.push(node);
        self
    }

    /// Sets this `Config`'s node list.
    #[must_use]
    pub fn nodes(mut self, nodes: Vec<NodeConfig>) -> Self {
        self.nodes = nodes;
        self
    }

    /// Sets this `Config`'s total shard count.
    #[must_use]
    pub fn shard_count(mut self, shard_count: u64) -> Self {
        self.shard_count = shard_count;
        self
    }

    /// Sets this `Config`'s session resumption settings.
    #[must_use]
    pub fn resume(mut self, resume: Option<ResumeConfig>) -> Self {
        self.resume = resume;
        self
    }

    /// Sets whether nodes reconnect automatically.
    #[must_use]
    pub fn auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    /// Sets this `Config`'s node reconnection logic.
    #[must_use]
    pub fn reconnect(mut self, reconnect: Retry) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets this `Config`'s failover policy.
    #[must_use]
    pub fn failover(mut self, failover: Failover) -> Self {
        self.failover = failover;
        self
    }

    /// Sets this `Config`'s node scoring function.
    #[must_use]
    pub fn scorer(mut self, scorer: Arc<dyn Scorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Sets this `Config`'s connection factory.
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Sets this `Config`'s gateway handle.
    #[must_use]
    pub fn sharder(mut self, sharder: Sharder) -> Self {
        self.sharder = Some(sharder);
        self
    }

    /// Sets the name sent to nodes in the `Client-Name` header.
    #[must_use]
    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    /// Checks that a cluster can be built from this configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sharder.is_none() {
            return Err(ConfigError::NoSender);
        }

        if self.shard_count == 0 {
            return Err(ConfigError::InvalidShardCount);
        }

        if self.nodes.is_empty() {
            return Err(ConfigError::NoNodes);
        }

        let mut seen = HashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if !seen.insert(&node.id) {
                return Err(ConfigError::DuplicateNode(node.id.clone()));
            }
        }

        Ok(())
    }
}
