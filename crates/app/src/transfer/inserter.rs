use std::{collections::HashSet, sync::Arc, time::Instant};

use thiserror::Error;
use tracing::{error, info, warn};

use collections_core::{CollectionId, CompanyId, JobId, JobUpdate, TransferStatus};
use collections_storage::{AssociationError, Database};

use super::registry::{JobStore, JobStoreError};
use super::Clock;
use crate::telemetry;

/// Unit of work handed from the orchestrator to the transfer worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    pub job_id: JobId,
    pub target_collection_id: CollectionId,
    pub company_ids: Vec<CompanyId>,
}

/// Copies memberships into the target collection in committed batches,
/// recording progress on the job as it goes.
#[derive(Clone)]
pub struct BatchInserter {
    database: Database,
    jobs: Arc<dyn JobStore>,
    clock: Clock,
    batch_size: usize,
}

#[derive(Debug, Error)]
enum InsertError {
    #[error(transparent)]
    Association(#[from] AssociationError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Registry(#[from] JobStoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InsertOutcome {
    added: u64,
    already_present: u64,
}

impl BatchInserter {
    pub fn new(
        database: Database,
        jobs: Arc<dyn JobStore>,
        clock: Clock,
        batch_size: usize,
    ) -> Self {
        Self {
            database,
            jobs,
            clock,
            batch_size: batch_size.max(1),
        }
    }

    /// Runs one job to a terminal state. Failures end up on the job record.
    pub async fn execute(&self, task: TransferTask) {
        let job_id = task.job_id;
        telemetry::record_job_started();

        let status = match self.run(&task).await {
            Ok(outcome) => self.finish(
                &job_id,
                JobUpdate::Complete {
                    added: outcome.added,
                    already_present: outcome.already_present,
                },
            ),
            Err(InsertError::Registry(err)) => {
                error!(stage = "transfer", job_id = %job_id, error = %err, "transfer job record rejected update");
                TransferStatus::Failed
            }
            Err(err) => {
                warn!(stage = "transfer", job_id = %job_id, error = %err, "transfer job failed");
                self.finish(
                    &job_id,
                    JobUpdate::Fail {
                        reason: err.to_string(),
                    },
                )
            }
        };

        telemetry::record_job_finished(status);
    }

    fn finish(&self, job_id: &JobId, update: JobUpdate) -> TransferStatus {
        match self.jobs.apply(job_id, update, (self.clock)()) {
            Ok(job) => {
                info!(
                    stage = "transfer",
                    job_id = %job_id,
                    status = job.status.as_str(),
                    progress = job.progress,
                    total = job.total,
                    "transfer job finished"
                );
                job.status
            }
            Err(err) => {
                error!(stage = "transfer", job_id = %job_id, error = %err, "failed to record final job state");
                TransferStatus::Failed
            }
        }
    }

    async fn run(&self, task: &TransferTask) -> Result<InsertOutcome, InsertError> {
        let job_id = &task.job_id;
        let target = &task.target_collection_id;
        let total = task.company_ids.len() as u64;
        self.jobs.apply(job_id, JobUpdate::Start, (self.clock)())?;

        let associations = self.database.associations();
        let present: HashSet<CompanyId> = associations
            .find_present(target, &task.company_ids)
            .await?
            .into_iter()
            .collect();
        if !present.is_empty() {
            self.jobs.apply(
                job_id,
                JobUpdate::Advance {
                    processed: present.len() as u64,
                },
                (self.clock)(),
            )?;
        }

        let to_insert: Vec<CompanyId> = task
            .company_ids
            .iter()
            .copied()
            .filter(|id| !present.contains(id))
            .collect();

        let mut added = 0u64;
        for batch in to_insert.chunks(self.batch_size) {
            let started = Instant::now();
            let mut tx = associations.begin().await?;
            let inserted = associations
                .insert_ignoring_duplicates(&mut tx, target, batch, (self.clock)())
                .await?;
            tx.commit().await?;
            telemetry::record_batch(inserted, started.elapsed());

            added += inserted;
            self.jobs.apply(
                job_id,
                JobUpdate::Advance {
                    processed: batch.len() as u64,
                },
                (self.clock)(),
            )?;
        }

        // Rows skipped by the conflict clause count as already present.
        Ok(InsertOutcome {
            added,
            already_present: total - added,
        })
    }
}
