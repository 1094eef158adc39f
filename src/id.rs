//! Newtypes around Discord and node IDs.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    num::NonZeroU64,
    str::FromStr,
    sync::Arc,
};

macro_rules! impl_id {
    ($Id:ident) => {
        impl $Id {
            /// Returns the u64 representation of this Id.
            pub fn get(self) -> u64 {
                self.0.get()
            }
        }

        impl Display for $Id {
            fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
                Display::fmt(&self.0, f)
            }
        }

        impl From<NonZeroU64> for $Id {
            fn from(id: NonZeroU64) -> Self {
                Self(id)
            }
        }

        impl FromStr for $Id {
            type Err = <NonZeroU64 as FromStr>::Err;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map(Self)
            }
        }
    };
}

/// ID of a Discord voice/text channel.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ChannelId(pub NonZeroU64);

/// ID of a Discord guild (colloquially, "server").
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct GuildId(pub NonZeroU64);

/// ID of a Discord user.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UserId(pub NonZeroU64);

impl_id! {ChannelId}
impl_id! {GuildId}
impl_id! {UserId}

/// Name of a Lavalink node, unique within one cluster.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct NodeId(Arc<str>);

impl NodeId {
    /// Creates a new node name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().into())
    }

    /// Returns this node's name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for NodeId {
    fn from(name: String) -> Self {
        Self(name.into())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_plain_strings_on_the_wire() {
        let id: NodeId = serde_json::from_str(r#""eu-1""#).unwrap();

        assert_eq!(id, NodeId::new("eu-1"));
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""eu-1""#);
    }

    #[test]
    fn guild_ids_parse_from_wire_strings() {
        assert_eq!(
            "41771983423143937".parse::<GuildId>().map(GuildId::get),
            Ok(41771983423143937)
        );
        assert!("0".parse::<GuildId>().is_err());
    }
}
