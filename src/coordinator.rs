/*!
 * Submission coordinator
 *
 * Turns ranked candidate paths into persisted work: one winning path per
 * request, synthetic queued requests for the intermediate segments of a
 * multihop chain, and a conditional state transition that lets many
 * concurrent workers converge on a single submission without any
 * cross-process locks. Correctness rests entirely on the store's atomic
 * conditional writes.
 */

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ResolveConfig;
use crate::error::{Result, SlingshotError};
use crate::protocol::ProtocolFactory;
use crate::ranking::{RankingPipeline, SelectionContext};
use crate::request::{Request, RequestAttributes, RequestWithSources};
use crate::stats::StatsProvider;
use crate::store::RequestStore;
use crate::topology::{EndpointId, Topology};
use crate::transfer::{build_candidate_paths, CandidatePath, HopDescriptor, TransferDescriptor};

/// Outcome counters for one resolution cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub fetched: usize,
    pub resolved: usize,
    pub submitted: usize,
    pub lost_races: usize,
}

pub struct SubmissionCoordinator<S: RequestStore> {
    store: Arc<S>,
    stats: Arc<dyn StatsProvider>,
    pipeline: RankingPipeline,
    config: ResolveConfig,
}

impl<S: RequestStore> SubmissionCoordinator<S> {
    pub fn new(
        store: Arc<S>,
        stats: Arc<dyn StatsProvider>,
        config: ResolveConfig,
    ) -> Result<Self> {
        config.validate()?;
        let pipeline = RankingPipeline::from_config(&config)?;
        Ok(Self {
            store,
            stats,
            pipeline,
            config,
        })
    }

    pub fn config(&self) -> &ResolveConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Resolve every request of the batch to its winning path(s) and
    /// persist the side effects (hop requests, chosen sources).
    ///
    /// One failing request never aborts the rest: its error is logged and
    /// the request stays queued for a future cycle.
    pub fn pick_and_prepare_submission_path<R: Rng + ?Sized>(
        &self,
        requests_with_sources: &[RequestWithSources],
        topology: &Topology,
        protocol_factory: &dyn ProtocolFactory,
        default_tombstone_delay: Duration,
        rng: &mut R,
    ) -> HashMap<Uuid, Vec<TransferDescriptor>> {
        let mut resolved = HashMap::new();
        for rws in requests_with_sources {
            let request_id = rws.request.id;
            match self.resolve_one(rws, topology, protocol_factory, default_tombstone_delay, rng)
            {
                Ok(Some(descriptor)) => {
                    resolved.insert(request_id, vec![descriptor]);
                }
                Ok(None) => {
                    debug!(request = %request_id, "no viable source this cycle");
                }
                Err(err) => {
                    warn!(request = %request_id, %err,
                          "resolution failed, leaving request for a future cycle");
                }
            }
        }
        resolved
    }

    fn resolve_one<R: Rng + ?Sized>(
        &self,
        rws: &RequestWithSources,
        topology: &Topology,
        protocol_factory: &dyn ProtocolFactory,
        default_tombstone_delay: Duration,
        rng: &mut R,
    ) -> Result<Option<TransferDescriptor>> {
        let candidates = build_candidate_paths(topology, rws);
        if candidates.is_empty() {
            return Ok(None);
        }

        let ctx = SelectionContext {
            topology,
            request: &rws.request,
            stats: self.stats.as_ref(),
            queues: self.store.as_ref(),
            config: &self.config,
        };
        let ordered = self.pipeline.select(&ctx, candidates, rng)?;
        let Some(winner) = ordered.first() else {
            return Ok(None);
        };

        let hop_request_ids =
            self.ensure_hop_requests(&rws.request, winner, topology, default_tombstone_delay)?;

        let alternates = self.pick_alternates(topology, winner, &ordered)?;

        let final_hop = winner.hops.len() - 1;
        let mut hops = Vec::with_capacity(winner.hops.len());
        for (idx, hop) in winner.hops.iter().enumerate() {
            let src = topology.endpoint(hop.src)?;
            let dst = topology.endpoint(hop.dst)?;
            let scheme = protocol_factory.protocol_for(src, dst)?;
            let request_id = if idx == final_hop {
                rws.request.id
            } else {
                hop_request_ids[idx]
            };
            hops.push(HopDescriptor {
                request_id,
                src: hop.src,
                dst: hop.dst,
                scheme,
            });
        }

        let chosen: Vec<(EndpointId, i32)> = std::iter::once(&winner.source)
            .chain(alternates.iter().copied())
            .map(|s| (s.endpoint, s.ranking))
            .collect();
        match self.store.attach_sources(rws.request.id, &chosen) {
            Ok(()) => {}
            Err(
                err @ (SlingshotError::UnknownRequest(_) | SlingshotError::EndpointVanished(_)),
            ) => {
                // referential failure: leave the request unassigned and move on
                warn!(request = %rws.request.id, %err, "skipping request after referential failure");
                return Ok(None);
            }
            Err(err) => return Err(err),
        }

        Ok(Some(TransferDescriptor {
            request_id: rws.request.id,
            hops,
            source: winner.source.clone(),
            alternates: alternates.into_iter().cloned().collect(),
        }))
    }

    /// Redundant failover sources for the first hop. Disk replicas with a
    /// direct path may run in parallel; tape never does, and a multihop
    /// chain is pinned to its single origin.
    fn pick_alternates<'a>(
        &self,
        topology: &Topology,
        winner: &CandidatePath,
        ordered: &'a [CandidatePath],
    ) -> Result<Vec<&'a crate::request::Source>> {
        if winner.is_multihop() || topology.endpoint(winner.source.endpoint)?.is_tape() {
            return Ok(Vec::new());
        }
        let mut alternates = Vec::new();
        for candidate in ordered.iter().skip(1) {
            if candidate.is_multihop() {
                continue;
            }
            if topology.endpoint(candidate.source.endpoint)?.is_disk() {
                alternates.push(&candidate.source);
            }
        }
        Ok(alternates)
    }

    /// Create the queued request backing every non-final hop of a multihop
    /// chain. Insert-if-absent keyed on (data id, hop destination); losing
    /// the creation race to a concurrent worker is recovered by re-reading
    /// the surviving row, so the chain converges on one request per segment.
    fn ensure_hop_requests(
        &self,
        request: &Request,
        winner: &CandidatePath,
        topology: &Topology,
        default_tombstone_delay: Duration,
    ) -> Result<Vec<Uuid>> {
        let mut ids = Vec::new();
        let final_hop = winner.hops.len() - 1;
        for hop in &winner.hops[..final_hop] {
            let source_name = topology.endpoint(hop.src)?.name.clone();
            let attributes = RequestAttributes {
                is_intermediate_hop: true,
                source_replica_expression: Some(source_name),
                activity: request.attributes.activity.clone(),
                requires_staging: false,
                tombstone_delay_secs: Some(default_tombstone_delay.num_seconds()),
            };
            let hop_request = Request::queued(request.data_id, hop.dst, request.bytes)
                .with_attributes(attributes);
            let hop_request_id = hop_request.id;

            match self.store.insert_queued(hop_request) {
                Ok(()) => {
                    debug!(request = %request.id, hop_request = %hop_request_id,
                           intermediate = %hop.dst, "created intermediate hop request");
                    ids.push(hop_request_id);
                }
                Err(SlingshotError::Conflict { .. }) => {
                    let existing = self
                        .store
                        .find_nonterminal(request.data_id, hop.dst)?
                        .ok_or_else(|| {
                            SlingshotError::store("conflicting hop request vanished mid-cycle")
                        })?;
                    ids.push(existing.id);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(ids)
    }

    /// Conditionally commit `queued → submitted` for a resolved descriptor.
    /// `Ok(false)` means another worker already claimed the request; the
    /// candidate is simply abandoned.
    pub fn commit_submission(&self, descriptor: &TransferDescriptor) -> Result<bool> {
        self.store.transition_to_submitted(
            descriptor.request_id,
            descriptor.source.endpoint,
            Utc::now(),
        )
    }

    /// Resolve and commit one already-fetched batch end-to-end, then
    /// release the processing marks. A failing commit is logged and
    /// skipped; it never poisons the rest of the batch.
    pub fn process_batch<R: Rng + ?Sized>(
        &self,
        batch: &[RequestWithSources],
        topology: &Topology,
        protocol_factory: &dyn ProtocolFactory,
        default_tombstone_delay: Duration,
        rng: &mut R,
    ) -> Result<CycleStats> {
        let mut stats = CycleStats {
            fetched: batch.len(),
            ..Default::default()
        };
        if batch.is_empty() {
            return Ok(stats);
        }

        let resolved = self.pick_and_prepare_submission_path(
            batch,
            topology,
            protocol_factory,
            default_tombstone_delay,
            rng,
        );
        stats.resolved = resolved.len();

        for descriptor in resolved.values().flatten() {
            match self.commit_submission(descriptor) {
                Ok(true) => stats.submitted += 1,
                Ok(false) => stats.lost_races += 1,
                Err(err) => {
                    warn!(request = %descriptor.request_id, %err, "commit failed");
                }
            }
        }

        let fetched_ids: Vec<Uuid> = batch.iter().map(|rws| rws.request.id).collect();
        self.store.release_processing(&fetched_ids)?;
        Ok(stats)
    }

    /// One full resolution cycle: fetch a batch, resolve, commit, release.
    pub fn run_cycle<R: Rng + ?Sized>(
        &self,
        topology: &Topology,
        protocol_factory: &dyn ProtocolFactory,
        default_tombstone_delay: Duration,
        rng: &mut R,
    ) -> Result<CycleStats> {
        let batch = self.store.list_and_mark_processing(self.config.batch_size)?;
        let stats = self.process_batch(
            &batch,
            topology,
            protocol_factory,
            default_tombstone_delay,
            rng,
        )?;

        if stats.fetched > 0 {
            info!(
                fetched = stats.fetched,
                resolved = stats.resolved,
                submitted = stats.submitted,
                lost_races = stats.lost_races,
                "resolution cycle complete"
            );
        }
        Ok(stats)
    }
}
