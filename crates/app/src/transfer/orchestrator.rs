use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use collections_core::{
    Collection, CollectionId, CompanyId, ErrorKind, JobId, JobUpdate, NewTransferJob,
    RequestShapeError, TransferJob, TransferRequest, TransferSelection,
};
use collections_storage::{AssociationError, CollectionError, Database};

use super::inserter::TransferTask;
use super::registry::{JobStore, JobStoreError};
use super::worker::{EnqueueError, TransferQueue};
use super::Clock;

/// Accepted transfer, returned before any association is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferStarted {
    pub job_id: JobId,
    pub total: u64,
}

/// Validates transfer requests, registers jobs and schedules their execution.
#[derive(Clone)]
pub struct TransferService {
    database: Database,
    jobs: Arc<dyn JobStore>,
    queue: TransferQueue,
    clock: Clock,
}

impl TransferService {
    pub fn new(
        database: Database,
        jobs: Arc<dyn JobStore>,
        queue: TransferQueue,
        clock: Clock,
    ) -> Self {
        Self {
            database,
            jobs,
            queue,
            clock,
        }
    }

    /// Validates the request against the current store contents and schedules
    /// the copy. Nothing is written to the store here.
    pub async fn start_transfer(
        &self,
        source_id: CollectionId,
        request: &TransferRequest,
    ) -> Result<TransferStarted, TransferError> {
        let source = self.load_collection(&source_id).await?;
        let target = self.load_collection(&request.target_collection_id).await?;

        let associations = self.database.associations();
        let company_ids = match request.selection()? {
            TransferSelection::All => associations.list_company_ids(&source.id).await?,
            TransferSelection::Companies(ids) => {
                let missing = associations.find_missing(&source.id, &ids).await?;
                if !missing.is_empty() {
                    return Err(TransferError::CompaniesNotInSource(missing));
                }
                ids
            }
        };

        if company_ids.is_empty() {
            return Err(TransferError::EmptyTransfer);
        }

        let total = company_ids.len() as u64;
        let job = TransferJob::new(
            NewTransferJob {
                source_collection_id: source.id,
                target_collection_id: target.id,
                source_collection_name: source.collection_name,
                target_collection_name: target.collection_name,
                total,
            },
            (self.clock)(),
        );
        let job_id = job.job_id;
        self.jobs.create(job)?;

        let task = TransferTask {
            job_id,
            target_collection_id: target.id,
            company_ids,
        };
        if let Err(err) = self.queue.enqueue(task) {
            error!(stage = "transfer", job_id = %job_id, error = %err, "failed to schedule transfer job");
            self.jobs.apply(
                &job_id,
                JobUpdate::Fail {
                    reason: err.to_string(),
                },
                (self.clock)(),
            )?;
            return Err(err.into());
        }

        info!(
            stage = "transfer",
            job_id = %job_id,
            source = %source.id,
            target = %target.id,
            total,
            "transfer job scheduled"
        );
        Ok(TransferStarted { job_id, total })
    }

    /// Returns the current snapshot of a job. Ids that do not parse are
    /// reported as unknown.
    pub fn status(&self, raw_job_id: &str) -> Result<TransferJob, TransferError> {
        raw_job_id
            .parse::<JobId>()
            .ok()
            .and_then(|job_id| self.jobs.get(&job_id))
            .ok_or_else(|| TransferError::JobNotFound(raw_job_id.to_string()))
    }

    async fn load_collection(&self, id: &CollectionId) -> Result<Collection, TransferError> {
        self.database
            .collections()
            .fetch(id)
            .await
            .map_err(TransferError::from)
    }
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("collection {0} not found")]
    CollectionNotFound(CollectionId),
    #[error("companies not found in source collection: {}", format_ids(.0))]
    CompaniesNotInSource(Vec<CompanyId>),
    #[error(transparent)]
    InvalidRequest(#[from] RequestShapeError),
    #[error("no companies to transfer")]
    EmptyTransfer,
    #[error("transfer job {0} not found")]
    JobNotFound(String),
    #[error("failed to schedule transfer: {0}")]
    Schedule(#[from] EnqueueError),
    #[error("failed to load collection: {0}")]
    Collection(CollectionError),
    #[error("failed to read memberships: {0}")]
    Association(#[from] AssociationError),
    #[error("failed to record transfer job: {0}")]
    Registry(#[from] JobStoreError),
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CollectionNotFound(_) | Self::CompaniesNotInSource(_) | Self::JobNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::InvalidRequest(_) | Self::EmptyTransfer => ErrorKind::InvalidArgument,
            Self::Schedule(_) | Self::Collection(_) | Self::Association(_) | Self::Registry(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Machine readable problem type for the HTTP layer.
    pub fn problem_type(&self) -> &'static str {
        match self {
            Self::CollectionNotFound(_) => "collection_not_found",
            Self::CompaniesNotInSource(_) => "company_not_in_collection",
            Self::InvalidRequest(_) => "invalid_transfer_request",
            Self::EmptyTransfer => "empty_transfer",
            Self::JobNotFound(_) => "transfer_job_not_found",
            _ => "internal_error",
        }
    }
}

impl From<CollectionError> for TransferError {
    fn from(err: CollectionError) -> Self {
        match err {
            CollectionError::NotFound(id) => Self::CollectionNotFound(id),
            other => Self::Collection(other),
        }
    }
}

fn format_ids(ids: &[CompanyId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
