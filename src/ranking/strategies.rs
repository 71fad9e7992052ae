/*!
 * Filter and comparator strategies
 */

use chrono::Duration;

use super::{RankedCandidate, SelectionContext, Strategy, StrategyKind};
use crate::error::Result;
use crate::protocol::common_schemes;
use crate::transfer::CandidatePath;

fn retain<F>(
    ctx: &SelectionContext,
    candidates: &mut Vec<RankedCandidate>,
    mut keep: F,
) -> Result<()>
where
    F: FnMut(&SelectionContext, &CandidatePath) -> Result<bool>,
{
    let mut kept = Vec::with_capacity(candidates.len());
    for candidate in candidates.drain(..) {
        if keep(ctx, &candidate.path)? {
            kept.push(candidate);
        }
    }
    *candidates = kept;
    Ok(())
}

/// Honor the request's source replica expression, if one is set
pub(crate) fn enforce_source_expression() -> Strategy {
    Strategy {
        name: "EnforceSourceRSEExpression",
        kind: StrategyKind::Filter(Box::new(|ctx, candidates| {
            let Some(members) = ctx.request.attributes.source_expression_members() else {
                return Ok(());
            };
            retain(ctx, candidates, |ctx, path| {
                let endpoint = ctx.topology.endpoint(path.source.endpoint)?;
                Ok(members.contains(&endpoint.name))
            })
        })),
    }
}

/// Drop sources whose endpoint is blocklisted for reads
pub(crate) fn skip_blocklisted() -> Strategy {
    Strategy {
        name: "SkipBlocklistedRSEs",
        kind: StrategyKind::Filter(Box::new(|ctx, candidates| {
            retain(ctx, candidates, |ctx, path| {
                Ok(ctx.topology.endpoint(path.source.endpoint)?.available_for_read)
            })
        })),
    }
}

/// Drop restricted source endpoints
pub(crate) fn skip_restricted() -> Strategy {
    Strategy {
        name: "SkipRestrictedRSEs",
        kind: StrategyKind::Filter(Box::new(|ctx, candidates| {
            retain(ctx, candidates, |ctx, path| {
                Ok(!ctx.topology.endpoint(path.source.endpoint)?.restricted)
            })
        })),
    }
}

/// A staging request is only served from an endpoint fronted by a
/// staging buffer
pub(crate) fn enforce_staging_buffer() -> Strategy {
    Strategy {
        name: "EnforceStagingBuffer",
        kind: StrategyKind::Filter(Box::new(|ctx, candidates| {
            if !ctx.request.attributes.requires_staging {
                return Ok(());
            }
            retain(ctx, candidates, |ctx, path| {
                Ok(ctx
                    .topology
                    .endpoint(path.source.endpoint)?
                    .staging_buffer
                    .is_some())
            })
        })),
    }
}

/// Tape sources are restricted to the top ranking tier: a tape replica
/// that already failed more often than the best tape candidate is never
/// retried while the better one is available.
pub(crate) fn restrict_tape_sources() -> Strategy {
    Strategy {
        name: "RestrictTapeSources",
        kind: StrategyKind::Filter(Box::new(|ctx, candidates| {
            let mut max_tape_ranking: Option<i32> = None;
            for candidate in candidates.iter() {
                let endpoint = ctx.topology.endpoint(candidate.path.source.endpoint)?;
                if endpoint.is_tape() {
                    let ranking = candidate.path.source.ranking;
                    max_tape_ranking =
                        Some(max_tape_ranking.map_or(ranking, |m| m.max(ranking)));
                }
            }
            let Some(max_ranking) = max_tape_ranking else {
                return Ok(());
            };
            retain(ctx, candidates, |ctx, path| {
                let endpoint = ctx.topology.endpoint(path.source.endpoint)?;
                Ok(!endpoint.is_tape() || path.source.ranking == max_ranking)
            })
        })),
    }
}

/// Every hop must share a scheme between its two endpoints; the first hop
/// additionally honors the replica's own scheme list when present
pub(crate) fn skip_scheme_mismatch() -> Strategy {
    Strategy {
        name: "SkipSchemeMismatch",
        kind: StrategyKind::Filter(Box::new(|ctx, candidates| {
            retain(ctx, candidates, |ctx, path| {
                let mut first = true;
                for hop in &path.hops {
                    let src = ctx.topology.endpoint(hop.src)?;
                    let dst = ctx.topology.endpoint(hop.dst)?;
                    let compatible = if first && !path.source.schemes.is_empty() {
                        dst.protocols
                            .iter()
                            .any(|p| path.source.schemes.contains(&p.scheme))
                    } else {
                        !common_schemes(&src.protocols, &dst.protocols).is_empty()
                    };
                    if !compatible {
                        return Ok(false);
                    }
                    first = false;
                }
                Ok(true)
            })
        })),
    }
}

/// Tape never relays traffic: drop multihop candidates with a tape
/// intermediate
pub(crate) fn skip_intermediate_tape() -> Strategy {
    Strategy {
        name: "SkipIntermediateTape",
        kind: StrategyKind::Filter(Box::new(|ctx, candidates| {
            retain(ctx, candidates, |ctx, path| {
                for id in path.intermediates() {
                    if ctx.topology.endpoint(id)?.is_tape() {
                        return Ok(false);
                    }
                }
                Ok(true)
            })
        })),
    }
}

/// Descending adjusted ranking. Disk sources get a bonus of
/// `tape_deficit_threshold - 1`, so tape overtakes disk only once disk has
/// accumulated `tape_deficit_threshold` more failures.
pub(crate) fn highest_adjusted_ranking_first() -> Strategy {
    Strategy {
        name: "HighestAdjustedRankingFirst",
        kind: StrategyKind::Order(Box::new(|ctx, path| {
            let endpoint = ctx.topology.endpoint(path.source.endpoint)?;
            let bonus = if endpoint.is_disk() {
                ctx.config.tape_deficit_threshold - 1
            } else {
                0
            };
            Ok(-f64::from(path.source.ranking + bonus))
        })),
    }
}

/// Disk strictly before tape at equal preceding keys
pub(crate) fn prefer_disk_over_tape() -> Strategy {
    Strategy {
        name: "PreferDiskOverTape",
        kind: StrategyKind::Order(Box::new(|ctx, path| {
            let endpoint = ctx.topology.endpoint(path.source.endpoint)?;
            Ok(if endpoint.is_disk() { 0.0 } else { 1.0 })
        })),
    }
}

/// Ascending weighted path cost, hop penalty included
pub(crate) fn path_distance() -> Strategy {
    Strategy {
        name: "PathDistance",
        kind: StrategyKind::Order(Box::new(|_ctx, path| Ok(path.cost as f64))),
    }
}

/// Fewer hops first
pub(crate) fn prefer_single_hop() -> Strategy {
    Strategy {
        name: "PreferSingleHop",
        kind: StrategyKind::Order(Box::new(|_ctx, path| Ok(path.hop_count() as f64))),
    }
}

/// Ascending aggregate failure rate over the stats lookback window.
/// Sources without recorded traffic count as never having failed.
pub(crate) fn failure_rate() -> Strategy {
    Strategy {
        name: "FailureRate",
        kind: StrategyKind::Order(Box::new(|ctx, path| {
            let lookback = Duration::seconds(ctx.config.stats_lookback_secs as i64);
            Ok(ctx
                .stats
                .failure_rate(path.source.endpoint, lookback)
                .unwrap_or(0.0))
        })),
    }
}
