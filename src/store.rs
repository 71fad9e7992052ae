/*!
 * Persistence interface for requests
 *
 * Cross-worker coordination happens exclusively through these operations.
 * The two conditional writes — insert-if-absent keyed on (data id,
 * destination) and update-if-still-queued — must each be a single atomic
 * operation of the backing store; workers never take locks of their own.
 */

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Result, SlingshotError};
use crate::request::{Request, RequestState, RequestWithSources, Source};
use crate::topology::EndpointId;

/// Queue pressure already routed toward one source endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub queued_files: u64,
    pub queued_bytes: u64,
}

/// Read access to per-source queue pressure, input to the wait-time model
pub trait QueueEstimator: Send + Sync {
    fn queued_snapshot(&self, source: EndpointId) -> Result<QueueSnapshot>;
}

/// Estimator reporting empty queues everywhere
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyQueues;

impl QueueEstimator for EmptyQueues {
    fn queued_snapshot(&self, _source: EndpointId) -> Result<QueueSnapshot> {
        Ok(QueueSnapshot::default())
    }
}

/// Transactional request persistence
pub trait RequestStore: QueueEstimator {
    /// The "list and lock" batch query: returns queued requests with their
    /// candidate sources and marks them as being processed, so independent
    /// batches never fetch the same request twice.
    fn list_and_mark_processing(&self, limit: usize) -> Result<Vec<RequestWithSources>>;

    /// Release the processing mark, making requests fetchable again
    fn release_processing(&self, ids: &[Uuid]) -> Result<()>;

    /// Insert-if-absent. Fails with `Conflict` when a non-terminal request
    /// already exists for the same (data id, destination) pair.
    fn insert_queued(&self, request: Request) -> Result<()>;

    /// The non-terminal request for (data id, destination), if any
    fn find_nonterminal(&self, data_id: Uuid, dest: EndpointId) -> Result<Option<Request>>;

    /// Conditional `queued → submitted` transition, assigning the winning
    /// source. `Ok(false)` means another worker won the race; callers must
    /// not treat that as an error.
    fn transition_to_submitted(
        &self,
        id: Uuid,
        source: EndpointId,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Conditional `submitted → done` transition
    fn mark_done(&self, id: Uuid) -> Result<bool>;

    /// Conditional `submitted → failed` transition
    fn mark_failed(&self, id: Uuid) -> Result<bool>;

    /// Persist the chosen sources for a request ahead of handoff to the
    /// transfer tool. Referential failures surface as `UnknownRequest` or
    /// `EndpointVanished`.
    fn attach_sources(&self, request_id: Uuid, sources: &[(EndpointId, i32)]) -> Result<()>;

    fn get(&self, id: Uuid) -> Result<Option<Request>>;
}

#[derive(Debug, Default)]
struct MemoryState {
    requests: HashMap<Uuid, Request>,
    candidate_sources: HashMap<Uuid, Vec<Source>>,
    chosen_sources: HashMap<Uuid, Vec<(EndpointId, i32)>>,
    processing: HashSet<Uuid>,
    /// When set, referential integrity is enforced against this set
    known_endpoints: Option<HashSet<EndpointId>>,
}

/// In-process store for tests and embedders.
///
/// One mutex around the whole state makes every conditional operation
/// atomic: the check and the write happen under the same guard.
#[derive(Debug, Default)]
pub struct MemoryRequestStore {
    state: Mutex<MemoryState>,
}

impl MemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enforce endpoint referential integrity against this set
    pub fn register_endpoints<I: IntoIterator<Item = EndpointId>>(&self, ids: I) {
        let mut state = self.lock();
        state.known_endpoints = Some(ids.into_iter().collect());
    }

    /// Seed a request together with its candidate sources
    pub fn add_request(&self, request: Request, sources: Vec<Source>) {
        let mut state = self.lock();
        state.candidate_sources.insert(request.id, sources);
        state.requests.insert(request.id, request);
    }

    /// Chosen sources persisted for a request, in ranking order
    pub fn chosen_sources(&self, request_id: Uuid) -> Vec<(EndpointId, i32)> {
        self.lock()
            .chosen_sources
            .get(&request_id)
            .cloned()
            .unwrap_or_default()
    }

    /// All non-terminal requests targeting a destination for a data item
    pub fn nonterminal_count(&self, data_id: Uuid, dest: EndpointId) -> usize {
        self.lock()
            .requests
            .values()
            .filter(|r| r.data_id == data_id && r.dest == dest && !r.is_terminal())
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().expect("store mutex poisoned")
    }

    fn check_endpoint(state: &MemoryState, id: EndpointId) -> Result<()> {
        if let Some(known) = &state.known_endpoints {
            if !known.contains(&id) {
                return Err(SlingshotError::EndpointVanished(id));
            }
        }
        Ok(())
    }
}

impl QueueEstimator for MemoryRequestStore {
    fn queued_snapshot(&self, source: EndpointId) -> Result<QueueSnapshot> {
        let state = self.lock();
        let mut snapshot = QueueSnapshot::default();
        for request in state.requests.values() {
            if request.state == RequestState::Queued && request.source == Some(source) {
                snapshot.queued_files += 1;
                snapshot.queued_bytes += request.bytes;
            }
        }
        Ok(snapshot)
    }
}

impl RequestStore for MemoryRequestStore {
    fn list_and_mark_processing(&self, limit: usize) -> Result<Vec<RequestWithSources>> {
        let mut state = self.lock();

        let mut ids: Vec<Uuid> = state
            .requests
            .values()
            .filter(|r| r.state == RequestState::Queued && !state.processing.contains(&r.id))
            .map(|r| r.id)
            .collect();
        // oldest first, id as the deterministic tie-break
        ids.sort_by_key(|id| (state.requests[id].created_at, *id));
        ids.truncate(limit);

        let mut batch = Vec::with_capacity(ids.len());
        for id in ids {
            state.processing.insert(id);
            let request = state.requests[&id].clone();
            let sources = state.candidate_sources.get(&id).cloned().unwrap_or_default();
            batch.push(RequestWithSources::new(request, sources));
        }
        Ok(batch)
    }

    fn release_processing(&self, ids: &[Uuid]) -> Result<()> {
        let mut state = self.lock();
        for id in ids {
            state.processing.remove(id);
        }
        Ok(())
    }

    fn insert_queued(&self, request: Request) -> Result<()> {
        let mut state = self.lock();
        Self::check_endpoint(&state, request.dest)?;

        let duplicate = state
            .requests
            .values()
            .any(|r| r.data_id == request.data_id && r.dest == request.dest && !r.is_terminal());
        if duplicate {
            return Err(SlingshotError::Conflict {
                data_id: request.data_id,
                dest: request.dest,
            });
        }
        state.requests.insert(request.id, request);
        Ok(())
    }

    fn find_nonterminal(&self, data_id: Uuid, dest: EndpointId) -> Result<Option<Request>> {
        let state = self.lock();
        Ok(state
            .requests
            .values()
            .find(|r| r.data_id == data_id && r.dest == dest && !r.is_terminal())
            .cloned())
    }

    fn transition_to_submitted(
        &self,
        id: Uuid,
        source: EndpointId,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.lock();
        Self::check_endpoint(&state, source)?;

        match state.requests.get_mut(&id) {
            Some(request) if request.state == RequestState::Queued => {
                request.state = RequestState::Submitted;
                request.source = Some(source);
                request.submitted_at = Some(at);
                Ok(true)
            }
            // missing row or already claimed: the race was lost
            _ => Ok(false),
        }
    }

    fn mark_done(&self, id: Uuid) -> Result<bool> {
        let mut state = self.lock();
        match state.requests.get_mut(&id) {
            Some(request) if request.state == RequestState::Submitted => {
                request.state = RequestState::Done;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn mark_failed(&self, id: Uuid) -> Result<bool> {
        let mut state = self.lock();
        match state.requests.get_mut(&id) {
            Some(request) if request.state == RequestState::Submitted => {
                request.state = RequestState::Failed;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn attach_sources(&self, request_id: Uuid, sources: &[(EndpointId, i32)]) -> Result<()> {
        let mut state = self.lock();
        if !state.requests.contains_key(&request_id) {
            return Err(SlingshotError::UnknownRequest(request_id));
        }
        for (endpoint, _) in sources {
            Self::check_endpoint(&state, *endpoint)?;
        }
        state.chosen_sources.insert(request_id, sources.to_vec());
        Ok(())
    }

    fn get(&self, id: Uuid) -> Result<Option<Request>> {
        Ok(self.lock().requests.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_if_absent_conflicts() {
        let store = MemoryRequestStore::new();
        let data_id = Uuid::new_v4();
        let dest = EndpointId::generate();

        store
            .insert_queued(Request::queued(data_id, dest, 1))
            .unwrap();
        let err = store
            .insert_queued(Request::queued(data_id, dest, 1))
            .unwrap_err();
        assert!(matches!(err, SlingshotError::Conflict { .. }));

        // a different destination is fine
        store
            .insert_queued(Request::queued(data_id, EndpointId::generate(), 1))
            .unwrap();
    }

    #[test]
    fn test_terminal_rows_do_not_conflict() {
        let store = MemoryRequestStore::new();
        let data_id = Uuid::new_v4();
        let dest = EndpointId::generate();
        let source = EndpointId::generate();

        let first = Request::queued(data_id, dest, 1);
        let first_id = first.id;
        store.insert_queued(first).unwrap();
        assert!(store
            .transition_to_submitted(first_id, source, Utc::now())
            .unwrap());
        assert!(store.mark_done(first_id).unwrap());

        store
            .insert_queued(Request::queued(data_id, dest, 1))
            .unwrap();
    }

    #[test]
    fn test_conditional_transition_lost_race() {
        let store = MemoryRequestStore::new();
        let request = Request::queued(Uuid::new_v4(), EndpointId::generate(), 1);
        let id = request.id;
        let source = EndpointId::generate();
        store.add_request(request, vec![]);

        assert!(store.transition_to_submitted(id, source, Utc::now()).unwrap());
        // second attempt observes zero rows affected
        assert!(!store.transition_to_submitted(id, source, Utc::now()).unwrap());
        // unknown row is also a lost race, not an error
        assert!(!store
            .transition_to_submitted(Uuid::new_v4(), source, Utc::now())
            .unwrap());
    }

    #[test]
    fn test_list_and_mark_prevents_duplicate_fetch() {
        let store = MemoryRequestStore::new();
        let request = Request::queued(Uuid::new_v4(), EndpointId::generate(), 1);
        let id = request.id;
        store.add_request(request, vec![Source::new(EndpointId::generate())]);

        let batch = store.list_and_mark_processing(10).unwrap();
        assert_eq!(batch.len(), 1);
        assert!(store.list_and_mark_processing(10).unwrap().is_empty());

        store.release_processing(&[id]).unwrap();
        assert_eq!(store.list_and_mark_processing(10).unwrap().len(), 1);
    }

    #[test]
    fn test_queued_snapshot_sums_assigned_bytes() {
        let store = MemoryRequestStore::new();
        let source = EndpointId::generate();
        let dest = EndpointId::generate();

        store.add_request(
            Request::queued(Uuid::new_v4(), dest, 100).with_source(source),
            vec![],
        );
        store.add_request(
            Request::queued(Uuid::new_v4(), dest, 250).with_source(source),
            vec![],
        );
        store.add_request(Request::queued(Uuid::new_v4(), dest, 999), vec![]);

        let snapshot = store.queued_snapshot(source).unwrap();
        assert_eq!(snapshot.queued_files, 2);
        assert_eq!(snapshot.queued_bytes, 350);
    }

    #[test]
    fn test_attach_sources_referential_errors() {
        let store = MemoryRequestStore::new();
        let endpoint = EndpointId::generate();
        store.register_endpoints([endpoint]);

        let request = Request::queued(Uuid::new_v4(), endpoint, 1);
        let id = request.id;
        store.add_request(request, vec![]);

        store.attach_sources(id, &[(endpoint, 0)]).unwrap();
        assert_eq!(store.chosen_sources(id), vec![(endpoint, 0)]);

        let err = store
            .attach_sources(Uuid::new_v4(), &[(endpoint, 0)])
            .unwrap_err();
        assert!(matches!(err, SlingshotError::UnknownRequest(_)));

        let vanished = EndpointId::generate();
        let err = store.attach_sources(id, &[(vanished, 0)]).unwrap_err();
        assert!(matches!(err, SlingshotError::EndpointVanished(_)));
    }
}
