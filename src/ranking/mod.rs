/*!
 * Source ranking pipeline
 *
 * An ordered, composable set of named strategies that filter and order the
 * candidate (source, path) pairs of a single request. Strategy names are
 * resolved against a registry once at configuration-load time; there is no
 * runtime reflection. Three strategy shapes exist:
 *
 * - filters drop candidates outright
 * - comparators contribute one component of a lexicographic sort key, in
 *   configuration order of significance
 * - the sampler assigns a probability distribution that is sampled once
 *   per request to pick the head of the order
 */

mod strategies;
mod wait_time;

use std::cmp::Ordering;

use rand::Rng;

use crate::config::ResolveConfig;
use crate::error::{Result, SlingshotError};
use crate::request::Request;
use crate::stats::StatsProvider;
use crate::store::QueueEstimator;
use crate::topology::Topology;
use crate::transfer::CandidatePath;

/// Everything a strategy may consult while judging candidates
pub struct SelectionContext<'a> {
    pub topology: &'a Topology,
    pub request: &'a Request,
    pub stats: &'a dyn StatsProvider,
    pub queues: &'a dyn QueueEstimator,
    pub config: &'a ResolveConfig,
}

/// A candidate with its accumulated sort key
pub struct RankedCandidate {
    pub path: CandidatePath,
    key: Vec<f64>,
}

pub(crate) type FilterFn =
    Box<dyn Fn(&SelectionContext, &mut Vec<RankedCandidate>) -> Result<()> + Send + Sync>;
pub(crate) type OrderFn = Box<dyn Fn(&SelectionContext, &CandidatePath) -> Result<f64> + Send + Sync>;
pub(crate) type WeightFn =
    Box<dyn Fn(&SelectionContext, &[RankedCandidate]) -> Result<Vec<f64>> + Send + Sync>;

pub(crate) enum StrategyKind {
    Filter(FilterFn),
    Order(OrderFn),
    Sample(WeightFn),
}

/// A named, resolved strategy
pub struct Strategy {
    pub name: &'static str,
    pub(crate) kind: StrategyKind,
}

fn build_strategy(name: &str) -> Result<Strategy> {
    match name {
        "EnforceSourceRSEExpression" => Ok(strategies::enforce_source_expression()),
        "SkipBlocklistedRSEs" => Ok(strategies::skip_blocklisted()),
        "SkipRestrictedRSEs" => Ok(strategies::skip_restricted()),
        "EnforceStagingBuffer" => Ok(strategies::enforce_staging_buffer()),
        "RestrictTapeSources" => Ok(strategies::restrict_tape_sources()),
        "SkipSchemeMismatch" => Ok(strategies::skip_scheme_mismatch()),
        "SkipIntermediateTape" => Ok(strategies::skip_intermediate_tape()),
        "HighestAdjustedRankingFirst" => Ok(strategies::highest_adjusted_ranking_first()),
        "PreferDiskOverTape" => Ok(strategies::prefer_disk_over_tape()),
        "PathDistance" => Ok(strategies::path_distance()),
        "PreferSingleHop" => Ok(strategies::prefer_single_hop()),
        "FailureRate" => Ok(strategies::failure_rate()),
        "TransferWaitTime" => Ok(wait_time::transfer_wait_time()),
        _ => Err(SlingshotError::config(format!(
            "unknown source ranking strategy: {}",
            name
        ))),
    }
}

/// The configured strategy sequence, resolved and ready to apply
pub struct RankingPipeline {
    strategies: Vec<Strategy>,
}

impl std::fmt::Debug for RankingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RankingPipeline")
            .field("strategies", &self.strategy_names())
            .finish()
    }
}

impl RankingPipeline {
    /// Resolve the configured strategy names against the registry
    pub fn from_config(config: &ResolveConfig) -> Result<Self> {
        let strategies = config
            .strategy_names()
            .into_iter()
            .map(build_strategy)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { strategies })
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name).collect()
    }

    /// Filter and order candidates. The head of the returned list is the
    /// winner; the remainder keeps the pipeline's preference order.
    pub fn select<R: Rng + ?Sized>(
        &self,
        ctx: &SelectionContext,
        candidates: Vec<CandidatePath>,
        rng: &mut R,
    ) -> Result<Vec<CandidatePath>> {
        let mut ranked: Vec<RankedCandidate> = candidates
            .into_iter()
            .map(|path| RankedCandidate {
                path,
                key: Vec::new(),
            })
            .collect();

        let mut sampler: Option<&WeightFn> = None;
        for strategy in &self.strategies {
            if ranked.is_empty() {
                break;
            }
            match &strategy.kind {
                StrategyKind::Filter(filter) => filter(ctx, &mut ranked)?,
                StrategyKind::Order(order) => {
                    for candidate in &mut ranked {
                        let component = order(ctx, &candidate.path)?;
                        candidate.key.push(component);
                    }
                }
                StrategyKind::Sample(weight) => sampler = Some(weight),
            }
        }

        ranked.sort_by(|a, b| compare_keys(&a.key, &b.key));

        if let Some(weight) = sampler {
            if ranked.len() > 1 {
                let weights = weight(ctx, &ranked)?;
                if let Some(winner) = sample_index(&weights, rng) {
                    let head = ranked.remove(winner);
                    ranked.insert(0, head);
                }
            }
        }

        Ok(ranked.into_iter().map(|c| c.path).collect())
    }
}

fn compare_keys(a: &[f64], b: &[f64]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match x.partial_cmp(y).unwrap_or(Ordering::Equal) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Weighted sample over non-negative weights; None when no mass
fn sample_index<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Option<usize> {
    let total: f64 = weights.iter().filter(|w| w.is_finite() && **w > 0.0).sum();
    if total <= 0.0 {
        return None;
    }
    let mut roll = rng.random_range(0.0..total);
    for (idx, weight) in weights.iter().enumerate() {
        if !weight.is_finite() || *weight <= 0.0 {
            continue;
        }
        if roll < *weight {
            return Some(idx);
        }
        roll -= weight;
    }
    // floating point drift: fall back to the last weighted entry
    weights
        .iter()
        .rposition(|w| w.is_finite() && *w > 0.0)
}
