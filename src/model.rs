//! Lavalink websocket messages sent and received by this client.
//!
//! Every message is a JSON object tagged by its `op` field.

use crate::{filters::FiltersPayload, info::VoiceInfo};
use serde::{Deserialize, Serialize};

/// Message sent from this client to a node.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
#[non_exhaustive]
pub enum OutgoingMessage {
    /// Hands a completed voice handshake to the node.
    VoiceUpdate(VoiceUpdate),
    /// Starts playing a track, optionally from an offset.
    Play(Play),
    /// Stops the current track.
    Stop(GuildTarget),
    /// Pauses or resumes playback.
    Pause(Pause),
    /// Seeks within the current track.
    Seek(Seek),
    /// Sets the player volume.
    Volume(Volume),
    /// Replaces every audio filter of a player.
    Filters(Filters),
    /// Destroys the node-side player.
    Destroy(GuildTarget),
    /// Asks the node to keep session state after the connection drops.
    ConfigureResuming(ConfigureResuming),
}

impl OutgoingMessage {
    /// Short name of this message's opcode, for logging.
    pub fn op(&self) -> &'static str {
        match self {
            Self::VoiceUpdate(_) => "voiceUpdate",
            Self::Play(_) => "play",
            Self::Stop(_) => "stop",
            Self::Pause(_) => "pause",
            Self::Seek(_) => "seek",
            Self::Volume(_) => "volume",
            Self::Filters(_) => "filters",
            Self::Destroy(_) => "destroy",
            Self::ConfigureResuming(_) => "configureResuming",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct GuildTarget {
    pub guild_id: String,
}

/// Body of a `voiceUpdate` message.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct VoiceUpdate {
    pub guild_id: String,
    pub session_id: String,
    pub event: VoiceServerEvent,
}

/// The raw voice server update, forwarded as Discord sent it.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[allow(missing_docs)]
pub struct VoiceServerEvent {
    pub token: String,
    pub guild_id: String,
    pub endpoint: String,
}

impl From<&VoiceInfo> for VoiceUpdate {
    fn from(info: &VoiceInfo) -> Self {
        Self {
            guild_id: info.guild_id.to_string(),
            session_id: info.session_id.clone(),
            event: VoiceServerEvent {
                token: info.token.clone(),
                guild_id: info.guild_id.to_string(),
                endpoint: info.endpoint.clone(),
            },
        }
    }
}

/// Body of a `play` message.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Play {
    #[allow(missing_docs)]
    pub guild_id: String,
    /// Base64-encoded track, as returned by a node's track search.
    pub track: String,
    /// Offset to start playing from, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u64>,
    /// Offset to stop playing at, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
    /// Ignore this message if a track is already playing.
    pub no_replace: bool,
    /// Start the track paused.
    pub pause: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Pause {
    pub guild_id: String,
    pub pause: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Seek {
    pub guild_id: String,
    pub position: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Volume {
    pub guild_id: String,
    pub volume: u16,
}

/// Body of a `filters` message.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Filters {
    pub guild_id: String,
    #[serde(flatten)]
    pub filters: FiltersPayload,
}

/// Body of a `configureResuming` message.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConfigureResuming {
    /// Shared secret used to resume the session.
    pub key: String,
    /// How long the node retains the session, in seconds.
    pub timeout: u64,
}

/// Message received by this client from a node.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "camelCase")]
#[non_exhaustive]
pub enum IncomingMessage {
    /// Periodic load report.
    Stats(Stats),
    /// Periodic playback position report for one player.
    PlayerUpdate(PlayerUpdate),
    /// Track or voice event for one player.
    Event(TrackEvent),
    /// Any opcode this client does not handle.
    #[serde(other)]
    Unknown,
}

/// Load report sent by a node roughly once per minute.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Stats {
    pub players: u32,
    pub playing_players: u32,
    pub uptime: u64,
    pub memory: Memory,
    pub cpu: Cpu,
    #[serde(default)]
    pub frame_stats: Option<FrameStats>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
#[allow(missing_docs)]
pub struct Memory {
    pub free: u64,
    pub used: u64,
    pub allocated: u64,
    pub reservable: u64,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Cpu {
    pub cores: u32,
    pub system_load: f64,
    pub lavalink_load: f64,
}

/// Audio frame counts over the last minute, averaged per player.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
#[allow(missing_docs)]
pub struct FrameStats {
    pub sent: i64,
    pub nulled: i64,
    pub deficit: i64,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct PlayerUpdate {
    pub guild_id: String,
    pub state: PlayerState,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[allow(missing_docs)]
pub struct PlayerState {
    /// Node wall-clock time of this report, in Unix milliseconds.
    pub time: i64,
    /// Playback position, in milliseconds.
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default)]
    pub connected: Option<bool>,
}

/// A `TrackStartEvent`, `TrackEndEvent`, `TrackExceptionEvent`,
/// `TrackStuckEvent`, or `WebSocketClosedEvent`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackEvent {
    #[allow(missing_docs)]
    pub guild_id: String,
    /// Event name, such as `TrackEndEvent`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Track the event refers to.
    #[serde(default)]
    pub track: Option<String>,
    /// Why a track ended, such as `FINISHED` or `REPLACED`.
    #[serde(default)]
    pub reason: Option<String>,
}

impl TrackEvent {
    /// Whether this event means the player no longer has an active track.
    pub fn clears_track(&self) -> bool {
        self.kind == "TrackEndEvent" && self.reason.as_deref() != Some("REPLACED")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::FilterState;
    use serde_json::json;

    #[test]
    fn outgoing_messages_are_op_tagged() {
        let msg = OutgoingMessage::Play(Play {
            guild_id: "41771983423143937".into(),
            track: "QAAA".into(),
            start_time: Some(43_000),
            end_time: None,
            no_replace: false,
            pause: false,
        });

        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "op": "play",
                "guildId": "41771983423143937",
                "track": "QAAA",
                "startTime": 43000,
                "noReplace": false,
                "pause": false,
            })
        );
    }

    #[test]
    fn filters_are_flattened() {
        let msg = OutgoingMessage::Filters(Filters {
            guild_id: "1".into(),
            filters: FilterState::new().payload(),
        });

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["op"], "filters");
        assert_eq!(value["volume"], 1.0);
        assert_eq!(value["equalizer"].as_array().unwrap().len(), 15);
        assert!(value.get("timescale").is_none());
    }

    #[test]
    fn resume_configuration_uses_op_name() {
        let msg = OutgoingMessage::ConfigureResuming(ConfigureResuming {
            key: "secret".into(),
            timeout: 60,
        });

        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "op": "configureResuming", "key": "secret", "timeout": 60 })
        );
        assert_eq!(msg.op(), "configureResuming");
    }

    #[test]
    fn incoming_messages_parse() {
        let stats: IncomingMessage = serde_json::from_value(json!({
            "op": "stats",
            "players": 3,
            "playingPlayers": 2,
            "uptime": 1000,
            "memory": { "free": 1, "used": 2, "allocated": 3, "reservable": 4 },
            "cpu": { "cores": 4, "systemLoad": 0.1, "lavalinkLoad": 0.05 },
        }))
        .unwrap();
        match stats {
            IncomingMessage::Stats(s) => {
                assert_eq!(s.playing_players, 2);
                assert!(s.frame_stats.is_none());
            },
            other => panic!("expected stats, got {:?}", other),
        }

        let update: IncomingMessage = serde_json::from_value(json!({
            "op": "playerUpdate",
            "guildId": "5",
            "state": { "time": 1500, "position": 42000 },
        }))
        .unwrap();
        assert_eq!(
            update,
            IncomingMessage::PlayerUpdate(PlayerUpdate {
                guild_id: "5".into(),
                state: PlayerState {
                    time: 1500,
                    position: Some(42000),
                    connected: None,
                },
            })
        );

        let unknown: IncomingMessage =
            serde_json::from_value(json!({ "op": "somethingNew" })).unwrap();
        assert_eq!(unknown, IncomingMessage::Unknown);
    }

    #[test]
    fn replaced_tracks_stay_active() {
        let mut evt = TrackEvent {
            guild_id: "1".into(),
            kind: "TrackEndEvent".into(),
            track: Some("QAAA".into()),
            reason: Some("REPLACED".into()),
        };
        assert!(!evt.clears_track());

        evt.reason = Some("FINISHED".into());
        assert!(evt.clears_track());
    }
}
