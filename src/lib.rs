/*!
 * Slingshot - multihop route resolution for federated storage transfers
 *
 * For each pending data-movement request, Slingshot resolves the best
 * (possibly multi-segment) path from candidate source endpoints to the
 * destination and safely commits that decision:
 * - a weighted endpoint graph with Dijkstra-style multihop search and a
 *   per-additional-hop penalty
 * - a configurable pipeline of named source ranking strategies, including
 *   randomized wait-time based selection
 * - a submission coordinator that guarantees at most one live transfer
 *   task per request under concurrent resolution, using only the store's
 *   atomic conditional writes
 *
 * The byte-moving transfer tools, the authentication layer and the
 * persistent schema live behind the interfaces in `protocol`, `client`
 * and `store`.
 */

pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod ranking;
pub mod request;
pub mod stats;
pub mod store;
pub mod topology;
pub mod transfer;
pub mod worker;

// Re-export commonly used types
pub use config::{LogLevel, ResolveConfig, DEFAULT_STRATEGIES};
pub use coordinator::{CycleStats, SubmissionCoordinator};
pub use error::{Result, SlingshotError};
pub use protocol::{DefaultProtocolFactory, ProtocolDescriptor, ProtocolFactory};
pub use ranking::{RankingPipeline, SelectionContext};
pub use request::{Request, RequestAttributes, RequestState, RequestWithSources, Source};
pub use stats::{MemoryStats, StatsCounters, StatsKey, StatsProvider};
pub use store::{MemoryRequestStore, QueueSnapshot, RequestStore};
pub use topology::{Distance, Endpoint, EndpointId, EndpointKind, Hop, Topology};
pub use transfer::{CandidatePath, HopDescriptor, TransferDescriptor};
pub use worker::{ResolverPool, TopologySource};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
