//! Constants affecting node connections, failover, and player defaults.

use std::time::Duration;

/// Name sent to each node in the `Client-Name` header.
pub const CLIENT_NAME: &str = concat!("lavalink-cluster/", env!("CARGO_PKG_VERSION"));

/// Delay between attempts to reconnect to a dropped node.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(15_000);

/// Number of reconnection attempts made before a node is considered lost.
pub const DEFAULT_RECONNECT_TRIES: usize = 5;

/// Length of time a node retains player state after a dropped connection,
/// if resuming is enabled.
pub const DEFAULT_RESUME_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval at which a failing-over player checks for an available node.
pub const DEFAULT_FAILOVER_POLL: Duration = Duration::from_millis(1_000);

/// Extra playback offset added when resuming a track on a new node.
pub const DEFAULT_FAILOVER_GRACE: Duration = Duration::from_millis(1_000);

/// Number of bands in a node's equalizer.
pub const EQUALIZER_BANDS: usize = 15;

/// Close code sent when a node connection is closed by the client.
pub const CLOSE_NORMAL: u16 = 1000;
