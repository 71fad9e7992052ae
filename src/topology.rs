/*!
 * Endpoint graph and multihop path search
 *
 * The topology is an immutable snapshot built once per resolution cycle:
 * storage endpoints, directed weighted edges, and the subset of endpoints
 * eligible to act as multihop intermediates. Path search is Dijkstra with
 * a fixed per-additional-hop penalty, so a direct link beats a marginally
 * cheaper chain while a much cheaper chain still wins.
 */

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SlingshotError};
use crate::protocol::ProtocolDescriptor;

/// Identity of a storage endpoint
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct EndpointId(Uuid);

impl EndpointId {
    /// Mint a fresh random id
    pub fn generate() -> Self {
        EndpointId(Uuid::new_v4())
    }

    pub fn nil() -> Self {
        EndpointId(Uuid::nil())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage media class of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Disk,
    Tape,
}

/// A storage location in the federation.
///
/// Immutable for the duration of a resolution cycle; the flags mirror the
/// externally maintained endpoint attributes.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub id: EndpointId,
    pub name: String,
    pub kind: EndpointKind,
    /// Cleared when the endpoint is blocklisted for reads
    pub available_for_read: bool,
    /// Restricted endpoints only serve explicitly whitelisted traffic
    pub restricted: bool,
    /// Name of the staging buffer fronting this endpoint, if any
    pub staging_buffer: Option<String>,
    /// Whether this endpoint may act as a multihop intermediate
    pub available_for_multihop: bool,
    pub protocols: Vec<ProtocolDescriptor>,
}

impl Endpoint {
    pub fn new<S: Into<String>>(name: S, kind: EndpointKind) -> Self {
        Self {
            id: EndpointId::generate(),
            name: name.into(),
            kind,
            available_for_read: true,
            restricted: false,
            staging_buffer: None,
            available_for_multihop: false,
            protocols: vec![ProtocolDescriptor::new("posix", 1)],
        }
    }

    pub fn with_protocols(mut self, protocols: Vec<ProtocolDescriptor>) -> Self {
        self.protocols = protocols;
        self
    }

    pub fn with_multihop(mut self) -> Self {
        self.available_for_multihop = true;
        self
    }

    pub fn with_staging_buffer<S: Into<String>>(mut self, buffer: S) -> Self {
        self.staging_buffer = Some(buffer.into());
        self
    }

    pub fn blocklisted(mut self) -> Self {
        self.available_for_read = false;
        self
    }

    pub fn restricted(mut self) -> Self {
        self.restricted = true;
        self
    }

    pub fn is_tape(&self) -> bool {
        self.kind == EndpointKind::Tape
    }

    pub fn is_disk(&self) -> bool {
        self.kind == EndpointKind::Disk
    }
}

/// Directed weighted link between two endpoints.
///
/// Zero cost means "no link": distance maintenance uses 0 to tombstone an
/// edge without deleting the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distance {
    pub src: EndpointId,
    pub dst: EndpointId,
    pub cost: u32,
}

impl Distance {
    pub fn new(src: EndpointId, dst: EndpointId, cost: u32) -> Self {
        Self { src, dst, cost }
    }
}

/// One directed source→destination segment of a transfer path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hop {
    pub src: EndpointId,
    pub dst: EndpointId,
    pub cost: u32,
}

/// Immutable endpoint/edge snapshot for one resolution cycle.
///
/// Concurrent readers are safe without locking: nothing is mutated after
/// construction.
#[derive(Debug, Clone)]
pub struct Topology {
    endpoints: HashMap<EndpointId, Endpoint>,
    by_name: HashMap<String, EndpointId>,
    /// Out-adjacency, neighbor lists sorted by endpoint id for determinism
    edges: HashMap<EndpointId, Vec<(EndpointId, u32)>>,
    multihop_nodes: HashSet<EndpointId>,
    hop_penalty: u32,
}

impl Topology {
    /// Build the endpoint/edge index from external metadata
    pub fn new(endpoints: Vec<Endpoint>, distances: &[Distance]) -> Self {
        Self::build(endpoints, distances, None)
    }

    /// Build the index restricted to a working set of endpoint ids
    pub fn restricted(
        endpoints: Vec<Endpoint>,
        distances: &[Distance],
        working_set: &HashSet<EndpointId>,
    ) -> Self {
        Self::build(endpoints, distances, Some(working_set))
    }

    fn build(
        endpoints: Vec<Endpoint>,
        distances: &[Distance],
        working_set: Option<&HashSet<EndpointId>>,
    ) -> Self {
        let endpoints: HashMap<EndpointId, Endpoint> = endpoints
            .into_iter()
            .filter(|e| working_set.map_or(true, |ws| ws.contains(&e.id)))
            .map(|e| (e.id, e))
            .collect();

        let by_name = endpoints
            .values()
            .map(|e| (e.name.clone(), e.id))
            .collect();

        let mut edges: HashMap<EndpointId, Vec<(EndpointId, u32)>> = HashMap::new();
        for d in distances {
            // zero or undefined cost means unreachable; self-edges never route
            if d.cost == 0 || d.src == d.dst {
                continue;
            }
            if !endpoints.contains_key(&d.src) || !endpoints.contains_key(&d.dst) {
                continue;
            }
            edges.entry(d.src).or_default().push((d.dst, d.cost));
        }
        for neighbors in edges.values_mut() {
            neighbors.sort_by_key(|(id, _)| *id);
        }

        Self {
            endpoints,
            by_name,
            edges,
            multihop_nodes: HashSet::new(),
            hop_penalty: crate::config::DEFAULT_HOP_PENALTY,
        }
    }

    pub fn with_hop_penalty(mut self, hop_penalty: u32) -> Self {
        self.hop_penalty = hop_penalty;
        self
    }

    /// Mark every endpoint carrying the multihop attribute as eligible
    pub fn configure_multihop(mut self) -> Self {
        self.multihop_nodes = self
            .endpoints
            .values()
            .filter(|e| e.available_for_multihop)
            .map(|e| e.id)
            .collect();
        self
    }

    /// Mark as eligible only attribute-flagged endpoints whose name is in
    /// `allow` (the resolved form of the external eligibility expression)
    pub fn configure_multihop_among(mut self, allow: &HashSet<String>) -> Self {
        self.multihop_nodes = self
            .endpoints
            .values()
            .filter(|e| e.available_for_multihop && allow.contains(&e.name))
            .map(|e| e.id)
            .collect();
        self
    }

    pub fn multihop_nodes(&self) -> &HashSet<EndpointId> {
        &self.multihop_nodes
    }

    pub fn hop_penalty(&self) -> u32 {
        self.hop_penalty
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn contains(&self, id: EndpointId) -> bool {
        self.endpoints.contains_key(&id)
    }

    pub fn endpoint(&self, id: EndpointId) -> Result<&Endpoint> {
        self.endpoints
            .get(&id)
            .ok_or(SlingshotError::UnknownEndpoint(id))
    }

    pub fn endpoint_by_name(&self, name: &str) -> Option<&Endpoint> {
        self.by_name.get(name).and_then(|id| self.endpoints.get(id))
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }

    /// Cost of the direct edge, if one exists
    pub fn edge_cost(&self, src: EndpointId, dst: EndpointId) -> Option<u32> {
        self.edges
            .get(&src)?
            .iter()
            .find(|(id, _)| *id == dst)
            .map(|(_, cost)| *cost)
    }

    /// Weighted cost of a hop chain, hop penalty included
    pub fn path_cost(&self, hops: &[Hop]) -> u64 {
        let edge_sum: u64 = hops.iter().map(|h| h.cost as u64).sum();
        edge_sum + self.hop_penalty as u64 * hops.len().saturating_sub(1) as u64
    }

    /// Cheapest path from `src` to `dst`.
    ///
    /// Total cost is the sum of edge costs plus `hop_penalty` for every hop
    /// after the first. Intermediates must be members of `multihop`; the
    /// source and the destination are exempt from that check. Ties are
    /// broken by fewer hops, then by endpoint id order of the expansion.
    pub fn get_hops(
        &self,
        src: EndpointId,
        dst: EndpointId,
        multihop: Option<&HashSet<EndpointId>>,
    ) -> Result<Vec<Hop>> {
        self.endpoint(src)?;
        self.endpoint(dst)?;
        if src == dst {
            // a replica already at the destination is upstream's bug,
            // never a routable transfer
            return Err(SlingshotError::NoPath { src, dst });
        }

        let empty = HashSet::new();
        let allow = multihop.unwrap_or(&empty);

        // (cost, hops) per settled endpoint; lexicographic order makes the
        // fewer-hops tie-break fall out of the comparison
        let mut best: HashMap<EndpointId, (u64, u32)> = HashMap::new();
        let mut prev: HashMap<EndpointId, EndpointId> = HashMap::new();
        let mut heap: BinaryHeap<Reverse<(u64, u32, EndpointId)>> = BinaryHeap::new();

        best.insert(src, (0, 0));
        heap.push(Reverse((0, 0, src)));

        while let Some(Reverse((cost, hops, node))) = heap.pop() {
            if best.get(&node) != Some(&(cost, hops)) {
                continue; // stale heap entry
            }
            if node == dst {
                break;
            }
            if node != src && !allow.contains(&node) {
                // reachable, but not allowed to relay traffic
                continue;
            }
            let Some(neighbors) = self.edges.get(&node) else {
                continue;
            };
            for &(next, weight) in neighbors {
                let penalty = if hops > 0 { self.hop_penalty as u64 } else { 0 };
                let next_cost = cost + weight as u64 + penalty;
                let next_hops = hops + 1;
                let better = match best.get(&next) {
                    None => true,
                    Some(&(c, h)) => (next_cost, next_hops) < (c, h),
                };
                if better {
                    best.insert(next, (next_cost, next_hops));
                    prev.insert(next, node);
                    heap.push(Reverse((next_cost, next_hops, next)));
                }
            }
        }

        if !best.contains_key(&dst) {
            return Err(SlingshotError::NoPath { src, dst });
        }

        let mut chain = Vec::new();
        let mut node = dst;
        while node != src {
            let from = prev[&node];
            let cost = self
                .edge_cost(from, node)
                .expect("settled path must follow existing edges");
            chain.push(Hop {
                src: from,
                dst: node,
                cost,
            });
            node = from;
        }
        chain.reverse();
        Ok(chain)
    }
}
