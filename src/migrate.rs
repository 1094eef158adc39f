//! Moving a player from one node to another.
//!
//! Relocation runs a fixed sequence of steps, recording the outcome of each in a
//! [`RelocationReport`]. It is not transactional: a failed step does not stop
//! later steps which still make sense, and nothing is rolled back.

use crate::{
    id::{GuildId, NodeId},
    model::{OutgoingMessage, Play},
    node::Node,
    player::Player,
};
use std::{convert::TryFrom, error::Error, fmt};
use tracing::{debug, instrument, warn};

/// One step of a relocation, in the order they are run.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum RelocationStep {
    /// The player stops sending to its old node.
    Unbind,
    /// The player is bound to its new node.
    Rebind,
    /// The voice connection details are handed to the new node.
    VoiceUpdate,
    /// Every audio filter is sent to the new node.
    Filters,
    /// The current track restarts on the new node, at its old position.
    Resume,
}

/// Outcome of one [`RelocationStep`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StepOutcome {
    /// The step succeeded.
    Done,
    /// The step had nothing to do.
    Skipped,
    /// The step failed.
    Failed(String),
}

impl StepOutcome {
    /// Whether this step failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }
}

/// Record of every step taken while moving a player between nodes.
#[derive(Clone, Debug)]
pub struct RelocationReport {
    /// Guild of the moved player.
    pub guild_id: GuildId,
    /// Node the player was moved from.
    pub from: NodeId,
    /// Node the player was moved to.
    pub to: NodeId,
    /// Position the current track was restarted at, in milliseconds.
    pub start_time: Option<u64>,
    steps: Vec<(RelocationStep, StepOutcome)>,
}

impl RelocationReport {
    fn new(guild_id: GuildId, from: NodeId, to: NodeId) -> Self {
        Self {
            guild_id,
            from,
            to,
            start_time: None,
            steps: Vec::with_capacity(5),
        }
    }

    fn record(&mut self, step: RelocationStep, outcome: StepOutcome) {
        if let StepOutcome::Failed(e) = &outcome {
            warn!("Relocation step {:?} failed: {}.", step, e);
        }

        self.steps.push((step, outcome));
    }

    /// Every step taken, in order.
    pub fn steps(&self) -> &[(RelocationStep, StepOutcome)] {
        &self.steps
    }

    /// Outcome of `step`, if it was reached.
    pub fn outcome(&self, step: RelocationStep) -> Option<&StepOutcome> {
        self.steps.iter().find(|(s, _)| *s == step).map(|(_, o)| o)
    }

    /// Whether every step taken succeeded or was skipped.
    pub fn is_complete(&self) -> bool {
        !self.steps.iter().any(|(_, o)| o.is_failed())
    }
}

/// Error returned when a relocation did not fully succeed.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum RelocateError {
    /// The player never completed its voice handshake, so the new node cannot
    /// join its call. No other step was run, and the player keeps its node.
    IncompleteHandshake(RelocationReport),
    /// At least one step failed. The player is bound to its new node.
    Partial(RelocationReport),
}

impl RelocateError {
    /// Steps taken before and after the failure.
    pub fn report(&self) -> &RelocationReport {
        match self {
            RelocateError::IncompleteHandshake(r) | RelocateError::Partial(r) => r,
        }
    }
}

impl fmt::Display for RelocateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.report();
        write!(
            f,
            "failed to move player for guild {} from node {} to {}: ",
            report.guild_id, report.from, report.to
        )?;
        match self {
            RelocateError::IncompleteHandshake(_) => write!(f, "voice handshake is incomplete"),
            RelocateError::Partial(r) => {
                let failed: Vec<_> = r
                    .steps()
                    .iter()
                    .filter(|(_, o)| o.is_failed())
                    .map(|(s, _)| *s)
                    .collect();
                write!(f, "steps {:?} failed", failed)
            },
        }
    }
}

impl Error for RelocateError {}

/// Moves `player` onto `node`.
///
/// If a track is playing, it is restarted at `start_time` milliseconds.
#[instrument(skip(player, node), fields(guild = %player.guild_id(), to = %node.id()))]
pub async fn relocate(
    player: &mut Player,
    node: Node,
    start_time: u64,
) -> Result<RelocationReport, RelocateError> {
    let mut report = RelocationReport::new(
        player.guild_id(),
        player.node_id().clone(),
        node.id().clone(),
    );

    // The new node could never join the call, so the player stays put.
    if player.current_connection().is_none() {
        report.record(
            RelocationStep::VoiceUpdate,
            StepOutcome::Failed("voice handshake is incomplete".into()),
        );
        return Err(RelocateError::IncompleteHandshake(report));
    }

    // The old node is never messaged again.
    let old = player.bind(node);
    report.record(RelocationStep::Unbind, StepOutcome::Done);
    debug!("Unbound from {}.", old.id());

    report.record(
        RelocationStep::Rebind,
        if player.node().is_connected() {
            StepOutcome::Done
        } else {
            StepOutcome::Failed("new node is not connected".into())
        },
    );

    report.record(
        RelocationStep::VoiceUpdate,
        outcome(player.send_voice_update().await),
    );

    report.record(RelocationStep::Filters, outcome(player.send_filters().await));

    let resume = match player.track() {
        Some(track) => {
            report.start_time = Some(start_time);
            let paused = player.is_paused();
            let msg = OutgoingMessage::Play(Play {
                guild_id: player.guild_id().to_string(),
                track: track.to_string(),
                start_time: Some(start_time),
                end_time: None,
                no_replace: false,
                pause: paused,
            });

            player.set_position(i64::try_from(start_time).unwrap_or(i64::MAX));
            outcome(player.node().send(msg, false).await)
        },
        None => StepOutcome::Skipped,
    };
    report.record(RelocationStep::Resume, resume);

    if report.is_complete() {
        Ok(report)
    } else {
        Err(RelocateError::Partial(report))
    }
}

fn outcome<E: fmt::Display>(result: Result<(), E>) -> StepOutcome {
    match result {
        Ok(()) => StepOutcome::Done,
        Err(e) => StepOutcome::Failed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{id::test_ids::*, node::test_impls::*, shards::test_impls::MockGateway};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn relocation_replays_state_on_new_node() {
        let old_conn = MockConnector::default();
        let new_conn = MockConnector::default();
        let gateway = MockGateway::default();
        let old = connected_node("old", 0, &old_conn).await;
        let new = connected_node("new", 1, &new_conn).await;

        let mut player = Player::new(guild(5), old, 0, gateway.sharder().get_shard(0));
        player.join(channel(7)).await.unwrap();
        let _ = player.update_server("tok".into(), "ep".into());
        let _ = player.update_state("sess".into(), Some(channel(7)));
        player.send_voice_update().await.unwrap();
        player
            .play_from("QAAA", Duration::from_secs(42))
            .await
            .unwrap();
        old_conn.clear_sent();

        let report = relocate(&mut player, new, 43_000).await.unwrap();

        assert_eq!(player.node_id().as_str(), "new");
        assert!(report.is_complete());
        assert_eq!(report.start_time, Some(43_000));
        assert_eq!(
            report.steps().iter().map(|(s, _)| *s).collect::<Vec<_>>(),
            vec![
                RelocationStep::Unbind,
                RelocationStep::Rebind,
                RelocationStep::VoiceUpdate,
                RelocationStep::Filters,
                RelocationStep::Resume,
            ]
        );

        let ops: Vec<_> = new_conn
            .sent()
            .into_iter()
            .map(|v| v["op"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(ops, vec!["voiceUpdate", "filters", "play"]);
        assert_eq!(new_conn.sent_op("play")[0].0["startTime"], 43_000);
        assert!(old_conn.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn incomplete_handshake_stops_relocation() {
        let old_conn = MockConnector::default();
        let new_conn = MockConnector::default();
        let old = connected_node("old", 0, &old_conn).await;
        let new = connected_node("new", 1, &new_conn).await;

        let mut player = Player::new(guild(5), old, 0, None);
        let _ = player.update_server("tok".into(), "ep".into());

        let err = relocate(&mut player, new, 0).await.unwrap_err();

        assert!(matches!(err, RelocateError::IncompleteHandshake(_)));
        assert!(err
            .report()
            .outcome(RelocationStep::VoiceUpdate)
            .map_or(false, StepOutcome::is_failed));
        assert_eq!(err.report().outcome(RelocationStep::Rebind), None);
        assert_eq!(err.report().outcome(RelocationStep::Filters), None);
        assert_eq!(player.node_id().as_str(), "old");
        assert!(new_conn.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_steps_do_not_stop_later_ones() {
        let old_conn = MockConnector::default();
        let gateway = MockGateway::default();
        let old = connected_node("old", 0, &old_conn).await;
        let dead = Node::detached("dead", 1, crate::node::NodeStatus::Disconnected, 0);

        let mut player = Player::new(guild(5), old, 0, gateway.sharder().get_shard(0));
        let _ = player.update_server("tok".into(), "ep".into());
        let _ = player.update_state("sess".into(), Some(channel(7)));

        let err = relocate(&mut player, dead, 0).await.unwrap_err();
        let report = err.report();

        assert!(matches!(err, RelocateError::Partial(_)));
        assert!(report
            .outcome(RelocationStep::Filters)
            .map_or(false, StepOutcome::is_failed));
        assert_eq!(
            report.outcome(RelocationStep::Resume),
            Some(&StepOutcome::Skipped)
        );
        assert_eq!(player.node_id().as_str(), "dead");
    }
}
