use std::sync::Arc;

use tokio::{
    sync::{mpsc, Semaphore},
    task::JoinSet,
};
use thiserror::Error;
use tracing::{debug, error, info};

use super::inserter::{BatchInserter, TransferTask};

/// Sending half used by the orchestrator to schedule jobs.
#[derive(Clone)]
pub struct TransferQueue {
    sender: mpsc::UnboundedSender<TransferTask>,
}

impl TransferQueue {
    /// Creates the queue and the worker that drains it.
    ///
    /// The worker does nothing until [`TransferWorker::spawn`] is called.
    pub fn new(inserter: BatchInserter, max_concurrent_jobs: usize) -> (Self, TransferWorker) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = TransferWorker {
            inserter,
            receiver,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
        };
        (Self { sender }, worker)
    }

    /// Hands a task to the worker without waiting for it to start.
    pub fn enqueue(&self, task: TransferTask) -> Result<(), EnqueueError> {
        self.sender
            .send(task)
            .map_err(|_| EnqueueError::ChannelClosed)
    }
}

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("transfer worker channel closed")]
    ChannelClosed,
}

/// Executes queued transfers, at most `max_concurrent_jobs` at a time.
pub struct TransferWorker {
    inserter: BatchInserter,
    receiver: mpsc::UnboundedReceiver<TransferTask>,
    permits: Arc<Semaphore>,
}

impl TransferWorker {
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(mut self) {
        let mut running = JoinSet::new();
        loop {
            tokio::select! {
                Some(task) = self.receiver.recv() => {
                    let Ok(permit) = self.permits.clone().acquire_owned().await else {
                        break;
                    };
                    debug!(stage = "transfer", job_id = %task.job_id, companies = task.company_ids.len(), "dispatching transfer job");
                    let inserter = self.inserter.clone();
                    running.spawn(async move {
                        let _permit = permit;
                        inserter.execute(task).await;
                    });
                }
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    if let Err(err) = joined {
                        error!(stage = "transfer", error = %err, "transfer job task aborted");
                    }
                }
                else => break,
            }
        }
        info!(stage = "transfer", "transfer worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;
    use collections_core::{CollectionId, JobId, NewTransferJob, TransferJob, TransferStatus};
    use collections_storage::Database;

    use crate::transfer::registry::{InMemoryJobStore, JobStore};

    #[tokio::test]
    async fn enqueue_fails_once_worker_is_gone() {
        let database = Database::connect("sqlite::memory:").await.expect("connect");
        let inserter = BatchInserter::new(
            database,
            Arc::new(InMemoryJobStore::new()),
            Arc::new(Utc::now),
            20,
        );
        let (queue, worker) = TransferQueue::new(inserter, 1);
        drop(worker);

        let result = queue.enqueue(TransferTask {
            job_id: JobId::new(),
            target_collection_id: CollectionId::new(),
            company_ids: vec![1],
        });
        assert!(matches!(result, Err(EnqueueError::ChannelClosed)));
    }

    #[tokio::test]
    async fn worker_runs_queued_jobs_to_completion() {
        let database = Database::connect("sqlite::memory:").await.expect("connect");
        database.run_migrations().await.expect("migrations");
        let target = database
            .collections()
            .create("Target", Utc::now())
            .await
            .unwrap()
            .id;
        let mut companies = Vec::new();
        for n in 0..3 {
            companies.push(
                database
                    .companies()
                    .create(&format!("Company {n}"), Utc::now())
                    .await
                    .unwrap(),
            );
        }

        let jobs = Arc::new(InMemoryJobStore::new());
        let inserter = BatchInserter::new(database.clone(), jobs.clone(), Arc::new(Utc::now), 2);
        let (queue, worker) = TransferQueue::new(inserter, 2);
        let handle = worker.spawn();

        let mut job_ids = Vec::new();
        for ids in [&companies[..2], &companies[1..]] {
            let job = TransferJob::new(
                NewTransferJob {
                    source_collection_id: CollectionId::new(),
                    target_collection_id: target,
                    source_collection_name: "Source".to_string(),
                    target_collection_name: "Target".to_string(),
                    total: ids.len() as u64,
                },
                Utc::now(),
            );
            let job_id = job.job_id;
            jobs.create(job).expect("create");
            job_ids.push(job_id);
            queue
                .enqueue(TransferTask {
                    job_id,
                    target_collection_id: target,
                    company_ids: ids.to_vec(),
                })
                .expect("enqueue");
        }

        for job_id in &job_ids {
            let job = tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    if let Some(job) = jobs.get(job_id).filter(|job| job.is_terminal()) {
                        break job;
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .expect("job finished in time");
            assert_eq!(job.status, TransferStatus::Completed);
            assert_eq!(job.progress, 2);
        }

        let members = database.associations().list_company_ids(&target).await.unwrap();
        assert_eq!(members, companies);

        drop(queue);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker stops after queue is dropped")
            .expect("worker task");
    }
}
