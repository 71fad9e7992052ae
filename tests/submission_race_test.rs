/*!
 * Integration tests for concurrency-safe submission coordination
 */

use std::sync::Arc;
use std::thread;

use chrono::Duration;
use rand::rngs::StdRng;
use rand::SeedableRng;
use uuid::Uuid;

use slingshot::stats::NoStats;
use slingshot::{
    DefaultProtocolFactory, Distance, Endpoint, EndpointId, EndpointKind, MemoryRequestStore,
    Request, RequestState, RequestStore, RequestWithSources, ResolveConfig, Source,
    SubmissionCoordinator, Topology,
};

fn chain_topology() -> (Topology, EndpointId, EndpointId, EndpointId) {
    let src = Endpoint::new("SRC", EndpointKind::Disk);
    let jump = Endpoint::new("JUMP", EndpointKind::Disk).with_multihop();
    let dst = Endpoint::new("DST", EndpointKind::Disk);
    let (src_id, jump_id, dst_id) = (src.id, jump.id, dst.id);
    let topology = Topology::new(
        vec![src, jump, dst],
        &[
            Distance::new(src_id, jump_id, 10),
            Distance::new(jump_id, dst_id, 10),
        ],
    )
    .configure_multihop();
    (topology, src_id, jump_id, dst_id)
}

fn coordinator(
    store: Arc<MemoryRequestStore>,
) -> SubmissionCoordinator<MemoryRequestStore> {
    SubmissionCoordinator::new(store, Arc::new(NoStats), ResolveConfig::default()).unwrap()
}

#[test]
fn test_multihop_request_created_through_batch_flow() {
    let (topology, src_id, jump_id, dst_id) = chain_topology();
    let store = Arc::new(MemoryRequestStore::new());
    let coordinator = coordinator(store.clone());

    let request = Request::queued(Uuid::new_v4(), dst_id, 64);
    let data_id = request.data_id;
    store.add_request(request, vec![Source::new(src_id)]);

    let batch = store.list_and_mark_processing(10).unwrap();
    let mut rng = StdRng::seed_from_u64(9);
    let resolved = coordinator.pick_and_prepare_submission_path(
        &batch,
        &topology,
        &DefaultProtocolFactory,
        Duration::zero(),
        &mut rng,
    );
    assert_eq!(resolved.len(), 1);

    // the intermediate request was created in queued state
    let hop_request = store.find_nonterminal(data_id, jump_id).unwrap().unwrap();
    assert_eq!(hop_request.state, RequestState::Queued);
    assert!(hop_request.attributes.is_intermediate_hop);
    assert_eq!(
        hop_request.attributes.source_replica_expression.as_deref(),
        Some("SRC")
    );
}

/// Many workers racing on the same multihop chain must converge to
/// exactly one intermediate request and one final request, both queued.
#[test]
fn test_multihop_concurrent_submitters() {
    let (topology, src_id, jump_id, dst_id) = chain_topology();
    let store = Arc::new(MemoryRequestStore::new());
    let coordinator = Arc::new(coordinator(store.clone()));
    let topology = Arc::new(topology);

    let request = Request::queued(Uuid::new_v4(), dst_id, 64);
    let data_id = request.data_id;
    let request_id = request.id;
    store.add_request(request.clone(), vec![Source::new(src_id)]);
    let rws = RequestWithSources::new(request, vec![Source::new(src_id)]);

    let nb_threads = 9;
    let nb_executions = 18;
    let mut handles = Vec::new();
    for worker in 0..nb_threads {
        let coordinator = coordinator.clone();
        let topology = topology.clone();
        let rws = rws.clone();
        handles.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(worker);
            for _ in 0..nb_executions / nb_threads + 1 {
                coordinator.pick_and_prepare_submission_path(
                    &[rws.clone()],
                    &topology,
                    &DefaultProtocolFactory,
                    Duration::zero(),
                    &mut rng,
                );
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // exactly one intermediate request survived all the racing inserts
    assert_eq!(store.nonterminal_count(data_id, jump_id), 1);
    assert_eq!(store.nonterminal_count(data_id, dst_id), 1);

    let jump_request = store.find_nonterminal(data_id, jump_id).unwrap().unwrap();
    let final_request = store.get(request_id).unwrap().unwrap();
    assert_eq!(jump_request.state, RequestState::Queued);
    assert_eq!(final_request.state, RequestState::Queued);
    assert!(jump_request.attributes.is_intermediate_hop);
    assert_eq!(
        jump_request.attributes.source_replica_expression.as_deref(),
        Some("SRC")
    );
}

/// Concurrent commits of the same resolved request: exactly one wins,
/// the others observe a lost race
#[test]
fn test_concurrent_commit_single_winner() {
    let src = Endpoint::new("SRC", EndpointKind::Disk);
    let dst = Endpoint::new("DST", EndpointKind::Disk);
    let (src_id, dst_id) = (src.id, dst.id);
    let topology =
        Topology::new(vec![src, dst], &[Distance::new(src_id, dst_id, 5)]).configure_multihop();

    let store = Arc::new(MemoryRequestStore::new());
    let coordinator = Arc::new(coordinator(store.clone()));

    let request = Request::queued(Uuid::new_v4(), dst_id, 1);
    let request_id = request.id;
    store.add_request(request.clone(), vec![Source::new(src_id)]);
    let rws = RequestWithSources::new(request, vec![Source::new(src_id)]);

    let mut rng = StdRng::seed_from_u64(9);
    let resolved = coordinator.pick_and_prepare_submission_path(
        &[rws],
        &topology,
        &DefaultProtocolFactory,
        Duration::zero(),
        &mut rng,
    );
    let descriptor = Arc::new(resolved.values().next().unwrap()[0].clone());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let coordinator = coordinator.clone();
        let descriptor = descriptor.clone();
        handles.push(thread::spawn(move || {
            coordinator.commit_submission(&descriptor).unwrap()
        }));
    }
    let wins: usize = handles
        .into_iter()
        .map(|h| usize::from(h.join().unwrap()))
        .sum();
    assert_eq!(wins, 1);

    let request = store.get(request_id).unwrap().unwrap();
    assert_eq!(request.state, RequestState::Submitted);
    assert_eq!(request.source, Some(src_id));
}

/// A referential failure while persisting chosen sources must drop that
/// one request from the submission payload, not abort the batch
#[test]
fn test_referential_failure_leaves_request_unassigned() {
    let src = Endpoint::new("SRC", EndpointKind::Disk);
    let dst = Endpoint::new("DST", EndpointKind::Disk);
    let (src_id, dst_id) = (src.id, dst.id);
    let topology =
        Topology::new(vec![src, dst], &[Distance::new(src_id, dst_id, 5)]).configure_multihop();

    let store = Arc::new(MemoryRequestStore::new());
    let coordinator = coordinator(store.clone());

    // a request the store has never seen: attach_sources will fail
    let phantom = Request::queued(Uuid::new_v4(), dst_id, 1);
    let phantom_rws = RequestWithSources::new(phantom, vec![Source::new(src_id)]);

    // a healthy request in the same batch
    let healthy = Request::queued(Uuid::new_v4(), dst_id, 1);
    let healthy_id = healthy.id;
    store.add_request(healthy.clone(), vec![Source::new(src_id)]);
    let healthy_rws = RequestWithSources::new(healthy, vec![Source::new(src_id)]);

    let mut rng = StdRng::seed_from_u64(9);
    let resolved = coordinator.pick_and_prepare_submission_path(
        &[phantom_rws, healthy_rws],
        &topology,
        &DefaultProtocolFactory,
        Duration::zero(),
        &mut rng,
    );
    assert_eq!(resolved.len(), 1);
    assert!(resolved.contains_key(&healthy_id));
}
