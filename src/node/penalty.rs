//! Load scoring for node selection.

use super::Node;
use crate::model::Stats;

/// Computes a node's load score, where lower is better.
///
/// Scores are only compared between connected nodes.
pub trait Scorer: Send + Sync {
    /// Scores `node`.
    fn score(&self, node: &Node) -> u64;
}

impl<F> Scorer for F
where
    F: Fn(&Node) -> u64 + Send + Sync,
{
    fn score(&self, node: &Node) -> u64 {
        self(node)
    }
}

/// Default [`Scorer`], using the penalty computed from each node's latest stats.
#[derive(Clone, Copy, Debug, Default)]
pub struct PenaltyScorer;

impl Scorer for PenaltyScorer {
    fn score(&self, node: &Node) -> u64 {
        node.penalty()
    }
}

/// Converts a node's load report into a penalty.
///
/// The penalty counts playing players, plus an exponential CPU term. When the
/// node reports frame statistics, missing (deficit) and silent (nulled) frames
/// over the last minute add further exponential terms.
pub fn penalty(stats: &Stats) -> u64 {
    let players = u64::from(stats.playing_players);
    let cpu = rounded(1.05_f64.powf(100.0 * stats.cpu.system_load) * 10.0 - 10.0);

    let (deficit, nulled) = stats.frame_stats.map_or((0, 0), |frames| {
        let deficit = 1.03_f64.powf(500.0 * (frames.deficit as f64 / 3000.0)) * 600.0 - 600.0;
        let nulled =
            (1.03_f64.powf(500.0 * (frames.nulled as f64 / 3000.0)) * 300.0 - 300.0) * 2.0;

        (rounded(deficit), rounded(nulled))
    });

    players
        .saturating_add(cpu)
        .saturating_add(deficit)
        .saturating_add(nulled)
}

// Negative terms (from unknown, negative frame counts) contribute nothing.
fn rounded(term: f64) -> u64 {
    if term > 0.0 {
        term.round() as u64
    } else {
        0
    }
}
