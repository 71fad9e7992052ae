/*!
 * Candidate transfer paths
 *
 * A candidate path pairs one source replica with the cheapest hop chain
 * from its endpoint to the request destination. Candidates are ephemeral:
 * computed per resolution cycle, ranked, and discarded — only the effects
 * of the winning path (hop requests, chosen sources) are persisted.
 */

use tracing::debug;
use uuid::Uuid;

use crate::request::{RequestWithSources, Source};
use crate::topology::{EndpointId, Hop, Topology};

/// One source replica with its best path to the destination
#[derive(Debug, Clone)]
pub struct CandidatePath {
    pub source: Source,
    pub hops: Vec<Hop>,
    /// Weighted path cost, hop penalty included
    pub cost: u64,
}

impl CandidatePath {
    pub fn hop_count(&self) -> usize {
        self.hops.len()
    }

    pub fn is_multihop(&self) -> bool {
        self.hops.len() > 1
    }

    /// Endpoints traversed between source and destination
    pub fn intermediates(&self) -> impl Iterator<Item = EndpointId> + '_ {
        let count = self.hops.len().saturating_sub(1);
        self.hops.iter().take(count).map(|hop| hop.dst)
    }
}

/// Best path per source for one request. Sources with no route under the
/// current multihop policy are dropped silently; that is a per-source
/// condition, never a batch failure.
pub fn build_candidate_paths(topology: &Topology, rws: &RequestWithSources) -> Vec<CandidatePath> {
    let dest = rws.request.dest;
    let mut candidates = Vec::with_capacity(rws.sources.len());

    for source in &rws.sources {
        if source.endpoint == dest {
            continue;
        }
        match topology.get_hops(source.endpoint, dest, Some(topology.multihop_nodes())) {
            Ok(hops) => {
                let cost = topology.path_cost(&hops);
                candidates.push(CandidatePath {
                    source: source.clone(),
                    hops,
                    cost,
                });
            }
            Err(err) => {
                debug!(request = %rws.request.id, source = %source.endpoint, %err,
                       "dropping unroutable source");
            }
        }
    }
    candidates
}

/// One hop of a resolved transfer, carrying the request it belongs to
#[derive(Debug, Clone)]
pub struct HopDescriptor {
    /// The request this hop fulfills: an intermediate hop request for
    /// non-final hops, the original request for the final hop
    pub request_id: Uuid,
    pub src: EndpointId,
    pub dst: EndpointId,
    pub scheme: String,
}

/// A resolved transfer ready for handoff to the submission layer
#[derive(Debug, Clone)]
pub struct TransferDescriptor {
    /// The original request this descriptor resolves
    pub request_id: Uuid,
    pub hops: Vec<HopDescriptor>,
    /// The winning source replica
    pub source: Source,
    /// Redundant failover sources for the first hop (disk only)
    pub alternates: Vec<Source>,
}

impl TransferDescriptor {
    pub fn is_multihop(&self) -> bool {
        self.hops.len() > 1
    }

    /// All sources, winner first
    pub fn all_sources(&self) -> impl Iterator<Item = &Source> {
        std::iter::once(&self.source).chain(self.alternates.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;
    use crate::topology::{Distance, Endpoint, EndpointKind};

    #[test]
    fn test_unroutable_sources_dropped_silently() {
        let a = Endpoint::new("A", EndpointKind::Disk);
        let b = Endpoint::new("B", EndpointKind::Disk);
        let isolated = Endpoint::new("ISOLATED", EndpointKind::Disk);
        let (a_id, b_id, isolated_id) = (a.id, b.id, isolated.id);

        let topo = Topology::new(
            vec![a, b, isolated],
            &[Distance::new(a_id, b_id, 10)],
        )
        .configure_multihop();

        let request = Request::queued(Uuid::new_v4(), b_id, 1);
        let rws = RequestWithSources::new(
            request,
            vec![Source::new(a_id), Source::new(isolated_id)],
        );

        let candidates = build_candidate_paths(&topo, &rws);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].source.endpoint, a_id);
        assert_eq!(candidates[0].cost, 10);
    }

    #[test]
    fn test_source_at_destination_skipped() {
        let a = Endpoint::new("A", EndpointKind::Disk);
        let a_id = a.id;
        let topo = Topology::new(vec![a], &[]).configure_multihop();

        let request = Request::queued(Uuid::new_v4(), a_id, 1);
        let rws = RequestWithSources::new(request, vec![Source::new(a_id)]);
        assert!(build_candidate_paths(&topo, &rws).is_empty());
    }

    #[test]
    fn test_intermediates() {
        let hop = |src: EndpointId, dst: EndpointId| Hop { src, dst, cost: 1 };
        let (a, b, c) = (
            EndpointId::generate(),
            EndpointId::generate(),
            EndpointId::generate(),
        );
        let path = CandidatePath {
            source: Source::new(a),
            hops: vec![hop(a, b), hop(b, c)],
            cost: 12,
        };
        assert!(path.is_multihop());
        assert_eq!(path.intermediates().collect::<Vec<_>>(), vec![b]);

        let single = CandidatePath {
            source: Source::new(a),
            hops: vec![hop(a, c)],
            cost: 1,
        };
        assert!(!single.is_multihop());
        assert_eq!(single.intermediates().count(), 0);
    }
}
