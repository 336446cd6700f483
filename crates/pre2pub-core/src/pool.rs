//! Worker pool for resolving many preprints concurrently.
//!
//! Each worker pulls one preprint at a time from a shared queue and runs its
//! whole pipeline to completion before taking the next, so a preprint's
//! stages never interleave with each other. Source rate limits are shared
//! through the resolver's config.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::orchestrator::Resolver;
use crate::{BatchStatus, MatchVerdict, ProgressEvent, ResolveError, Server};

/// One preprint to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequest {
    pub doi: String,
    pub server: Server,
}

impl ResolveRequest {
    pub fn new(doi: impl Into<String>, server: Server) -> Self {
        Self {
            doi: doi.into(),
            server,
        }
    }
}

/// Result for one request, tagged with its position in the input.
#[derive(Debug)]
pub struct ResolveOutcome {
    pub index: usize,
    pub doi: String,
    pub result: Result<MatchVerdict, ResolveError>,
}

impl ResolveOutcome {
    pub fn status(&self) -> BatchStatus {
        match &self.result {
            Ok(v) if v.is_matched() => BatchStatus::Matched,
            Ok(_) => BatchStatus::Unmatched,
            Err(_) => BatchStatus::Failed,
        }
    }
}

/// A resolution job submitted to the pool.
pub struct ResolveJob {
    pub request: ResolveRequest,
    pub result_tx: oneshot::Sender<ResolveOutcome>,
    pub index: usize,
    pub total: usize,
    /// Progress callback for this job (emits Started and Finished).
    pub progress: Arc<dyn Fn(ProgressEvent) + Send + Sync>,
}

/// A pool of worker tasks that process resolution jobs.
///
/// Submit jobs via [`submit()`](ResolverPool::submit), receive results via
/// the oneshot receiver sent with each job.
pub struct ResolverPool {
    job_tx: async_channel::Sender<ResolveJob>,
    pool_handle: JoinHandle<()>,
}

impl ResolverPool {
    /// Create a new pool with `num_workers` worker tasks.
    pub fn new(resolver: Arc<Resolver>, cancel: CancellationToken, num_workers: usize) -> Self {
        let (job_tx, job_rx) = async_channel::unbounded::<ResolveJob>();

        let pool_handle = tokio::spawn(async move {
            let mut handles = Vec::with_capacity(num_workers.max(1));
            for _ in 0..num_workers.max(1) {
                handles.push(tokio::spawn(worker_loop(
                    job_rx.clone(),
                    resolver.clone(),
                    cancel.clone(),
                )));
            }

            // Workers hold the remaining receivers
            drop(job_rx);

            for h in handles {
                let _ = h.await;
            }
        });

        Self {
            job_tx,
            pool_handle,
        }
    }

    /// Submit a job to the pool.
    pub async fn submit(&self, job: ResolveJob) {
        let _ = self.job_tx.send(job).await;
    }

    /// Close the queue and wait for all workers to finish.
    pub async fn shutdown(self) {
        self.job_tx.close();
        let _ = self.pool_handle.await;
    }
}

async fn worker_loop(
    job_rx: async_channel::Receiver<ResolveJob>,
    resolver: Arc<Resolver>,
    cancel: CancellationToken,
) {
    while let Ok(job) = job_rx.recv().await {
        // Drain without running; dropping the job closes its result channel
        if cancel.is_cancelled() {
            continue;
        }

        let ResolveJob {
            request,
            result_tx,
            index,
            total,
            progress,
        } = job;

        progress(ProgressEvent::Started {
            index,
            total,
            doi: request.doi.clone(),
        });

        let result = resolver.resolve_doi(&request.doi, request.server).await;
        if let Err(ref e) = result {
            tracing::warn!(doi = %request.doi, error = %e, "resolution failed");
        }

        let outcome = ResolveOutcome {
            index,
            doi: request.doi,
            result,
        };

        progress(ProgressEvent::Finished {
            index,
            total,
            doi: outcome.doi.clone(),
            status: outcome.status(),
        });

        let _ = result_tx.send(outcome);
    }
}

/// Resolve a list of preprints on a pool of `config.num_workers` workers.
///
/// Results come back in input order. Requests not yet started when `cancel`
/// fires are left out of the returned list.
pub async fn resolve_all(
    requests: Vec<ResolveRequest>,
    resolver: Arc<Resolver>,
    progress: impl Fn(ProgressEvent) + Send + Sync + 'static,
    cancel: CancellationToken,
) -> Vec<ResolveOutcome> {
    let total = requests.len();
    if total == 0 {
        return vec![];
    }

    let num_workers = resolver.config().num_workers.max(1);
    let progress: Arc<dyn Fn(ProgressEvent) + Send + Sync> = Arc::new(progress);
    let pool = ResolverPool::new(resolver, cancel.clone(), num_workers);

    let mut receivers = Vec::with_capacity(total);
    for (index, request) in requests.into_iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }

        let (result_tx, result_rx) = oneshot::channel();
        pool.submit(ResolveJob {
            request,
            result_tx,
            index,
            total,
            progress: progress.clone(),
        })
        .await;
        receivers.push(result_rx);
    }

    let mut results = Vec::with_capacity(receivers.len());
    for rx in receivers {
        if let Ok(outcome) = rx.await {
            results.push(outcome);
        }
    }

    pool.shutdown().await;
    results
}
