#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
//! An async client for clusters of [Lavalink] audio nodes, written in Rust.
//!
//! The library offers:
//!  * A [`Cluster`] which keeps a websocket open to every configured node,
//!  reconnecting (and optionally resuming sessions) when a connection drops.
//!  * Penalty-based load balancing: new [`Player`]s are placed on the connected
//!  node reporting the least load, or by any custom [`Scorer`].
//!  * Failover: players on a node which cannot be reached are moved to a
//!  healthy node, and their track continues close to where it stopped.
//!  * Handling of Discord's two-part voice handshake, so that a node is only told
//!  about a call once both halves have arrived.
//!
//! This crate does not connect to Discord itself. Provide a [`GenericSharder`]
//! which can send voice state updates on your gateway library's shards, and pass
//! every voice server and voice state update you receive to [`Cluster::process`].
//!
//! ## Intents
//! The voice handshake requires the `GUILD_VOICE_STATES` intent.
//!
//! [Lavalink]: https://github.com/freyacodes/Lavalink
//! [`Scorer`]: node::penalty::Scorer
//! [`GenericSharder`]: shards::GenericSharder

#![warn(clippy::pedantic)]
#![allow(
    // Allowed as they are too pedantic
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::too_many_lines,
    clippy::cast_lossless,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::missing_errors_doc,
)]

mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod failover;
pub mod filters;
pub mod id;
mod info;
mod manager;
pub mod migrate;
pub mod model;
pub mod node;
mod player;
pub mod shards;

pub use crate::{
    config::{Config, NodeConfig, ResumeConfig},
    events::{ClusterEvent, EventHandler},
    filters::FilterState,
    info::{VoiceEvent, VoiceInfo},
    manager::*,
    node::{Node, NodeStatus},
    player::Player,
};
