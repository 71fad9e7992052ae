/*!
 * Randomized wait-time source selection
 *
 * Estimates, per source, how long a new transfer would sit behind the
 * bytes already queued toward that source, then assigns a selection
 * probability: the below-average-wait group shares most of the mass, the
 * above-average group keeps a fixed exploration share so slow sources
 * still see occasional traffic and their estimates stay fresh. Within a
 * group, probability is inversely proportional to wait.
 */

use super::{RankedCandidate, SelectionContext, Strategy, StrategyKind};
use crate::error::Result;

pub(crate) fn transfer_wait_time() -> Strategy {
    Strategy {
        name: "TransferWaitTime",
        kind: StrategyKind::Sample(Box::new(weights)),
    }
}

fn weights(ctx: &SelectionContext, candidates: &[RankedCandidate]) -> Result<Vec<f64>> {
    let overhead = ctx.config.wait_overhead_secs;
    let throughput = ctx.config.wait_throughput_bytes_per_sec;

    let mut waits = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let snapshot = ctx.queues.queued_snapshot(candidate.path.source.endpoint)?;
        let wait = snapshot.queued_files as f64 * overhead
            + snapshot.queued_bytes as f64 / throughput;
        // an idle source still waits out its own per-file overhead
        waits.push(wait.max(overhead));
    }
    Ok(distribute(&waits, ctx.config.exploration_probability))
}

/// Probability per source given estimated waits. Sources split at the
/// mean; an empty group forfeits its mass to the other.
pub(crate) fn distribute(waits: &[f64], exploration: f64) -> Vec<f64> {
    if waits.is_empty() {
        return Vec::new();
    }
    let mean = waits.iter().sum::<f64>() / waits.len() as f64;

    let below_inverse: f64 = waits.iter().filter(|w| **w < mean).map(|w| 1.0 / *w).sum();
    let above_inverse: f64 = waits.iter().filter(|w| **w >= mean).map(|w| 1.0 / *w).sum();

    let (below_mass, above_mass) = if below_inverse == 0.0 {
        (0.0, 1.0)
    } else if above_inverse == 0.0 {
        (1.0, 0.0)
    } else {
        (1.0 - exploration, exploration)
    };

    waits
        .iter()
        .map(|w| {
            if *w < mean {
                below_mass * (1.0 / w) / below_inverse
            } else {
                above_mass * (1.0 / w) / above_inverse
            }
        })
        .collect()
}
