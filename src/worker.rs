/*!
 * Resolver worker pool
 *
 * A bounded pool of workers pulling request batches and processing each
 * end-to-end. One producer performs the list-and-mark fetch so no two
 * batches overlap; the bounded channel gives natural backpressure.
 * Cancellation is cooperative: the stop flag is checked between batches,
 * never mid-batch, so in-flight conditional writes always complete.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration as StdDuration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, error, info};

use crate::coordinator::SubmissionCoordinator;
use crate::error::Result;
use crate::protocol::ProtocolFactory;
use crate::request::RequestWithSources;
use crate::store::RequestStore;
use crate::topology::Topology;

/// Sleep between fetches when the queue is drained
const IDLE_WAIT: StdDuration = StdDuration::from_millis(500);

/// How often idle workers wake up to notice a shutdown
const RECV_TIMEOUT: StdDuration = StdDuration::from_millis(200);

/// Supplies a fresh topology snapshot per resolution cycle
pub trait TopologySource: Send + Sync {
    fn snapshot(&self) -> Result<Topology>;
}

impl<F> TopologySource for F
where
    F: Fn() -> Result<Topology> + Send + Sync,
{
    fn snapshot(&self) -> Result<Topology> {
        self()
    }
}

/// Handle to a running resolver pool
pub struct ResolverPool {
    stop: Arc<AtomicBool>,
    producer: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl ResolverPool {
    /// Spawn one producer and `config.workers` resolver workers
    pub fn spawn<S, T, P>(
        coordinator: Arc<SubmissionCoordinator<S>>,
        topology: Arc<T>,
        protocols: Arc<P>,
        default_tombstone_delay: chrono::Duration,
    ) -> Self
    where
        S: RequestStore + Send + Sync + 'static,
        T: TopologySource + 'static,
        P: ProtocolFactory + 'static,
    {
        let config = coordinator.config();
        let batch_size = config.batch_size;
        let sampler_seed = config.sampler_seed;
        let worker_count = if config.workers == 0 {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            config.workers
        };

        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = bounded::<Vec<RequestWithSources>>(worker_count);

        let producer = {
            let coordinator = coordinator.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    match coordinator.store().list_and_mark_processing(batch_size) {
                        Ok(batch) if batch.is_empty() => thread::sleep(IDLE_WAIT),
                        Ok(batch) => {
                            debug!(requests = batch.len(), "dispatching batch");
                            if tx.send(batch).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            error!(%err, "batch fetch failed");
                            thread::sleep(IDLE_WAIT);
                        }
                    }
                }
                // sender drops here; workers drain and exit
            })
        };

        let workers = (0..worker_count)
            .map(|index| {
                let coordinator = coordinator.clone();
                let topology = topology.clone();
                let protocols = protocols.clone();
                let stop = stop.clone();
                let rx = rx.clone();
                let mut rng = match sampler_seed {
                    Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
                    None => StdRng::from_os_rng(),
                };
                thread::spawn(move || loop {
                    match rx.recv_timeout(RECV_TIMEOUT) {
                        Ok(batch) => {
                            let snapshot = match topology.snapshot() {
                                Ok(snapshot) => snapshot,
                                Err(err) => {
                                    error!(worker = index, %err, "topology snapshot failed");
                                    let ids: Vec<_> =
                                        batch.iter().map(|rws| rws.request.id).collect();
                                    if let Err(err) =
                                        coordinator.store().release_processing(&ids)
                                    {
                                        error!(worker = index, %err, "release failed");
                                    }
                                    continue;
                                }
                            };
                            match coordinator.process_batch(
                                &batch,
                                &snapshot,
                                protocols.as_ref(),
                                default_tombstone_delay,
                                &mut rng,
                            ) {
                                Ok(stats) => {
                                    debug!(
                                        worker = index,
                                        submitted = stats.submitted,
                                        lost_races = stats.lost_races,
                                        "batch processed"
                                    );
                                }
                                Err(err) => error!(worker = index, %err, "batch failed"),
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            if stop.load(Ordering::Relaxed) {
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                })
            })
            .collect();

        info!(workers = worker_count, "resolver pool started");
        Self {
            stop,
            producer: Some(producer),
            workers,
        }
    }

    /// Shared stop flag, for wiring to an external signal handler
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Request a graceful stop and wait for every worker to finish its
    /// current batch
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(producer) = self.producer.take() {
            let _ = producer.join();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        info!("resolver pool stopped");
    }
}
