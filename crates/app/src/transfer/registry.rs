use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use chrono::{DateTime, Utc};
use thiserror::Error;

use collections_core::{JobId, JobUpdate, TransferJob, TransitionError};

/// Storage for transfer job records.
///
/// Each job has a single writer (the batch inserter running it) and any
/// number of readers. Implementations must hand out whole-record snapshots
/// so readers never observe a half-applied update.
pub trait JobStore: Send + Sync {
    /// Registers a freshly created job.
    fn create(&self, job: TransferJob) -> Result<(), JobStoreError>;

    /// Returns a snapshot of the job, if known.
    fn get(&self, job_id: &JobId) -> Option<TransferJob>;

    /// Applies a state transition and returns the updated snapshot.
    fn apply(
        &self,
        job_id: &JobId,
        update: JobUpdate,
        at: DateTime<Utc>,
    ) -> Result<TransferJob, JobStoreError>;
}

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("transfer job {0} already exists")]
    Duplicate(JobId),
    #[error("transfer job {0} not found")]
    NotFound(JobId),
    #[error("invalid transition for job {job_id}: {source}")]
    Transition {
        job_id: JobId,
        #[source]
        source: TransitionError,
    },
}

/// Process-local job table. Records are lost on restart.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, TransferJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl JobStore for InMemoryJobStore {
    fn create(&self, job: TransferJob) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if jobs.contains_key(&job.job_id) {
            return Err(JobStoreError::Duplicate(job.job_id));
        }
        jobs.insert(job.job_id, job);
        Ok(())
    }

    fn get(&self, job_id: &JobId) -> Option<TransferJob> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .cloned()
    }

    fn apply(
        &self,
        job_id: &JobId,
        update: JobUpdate,
        at: DateTime<Utc>,
    ) -> Result<TransferJob, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let job = jobs
            .get_mut(job_id)
            .ok_or(JobStoreError::NotFound(*job_id))?;
        job.apply(update, at)
            .map_err(|source| JobStoreError::Transition {
                job_id: *job_id,
                source,
            })?;
        Ok(job.clone())
    }
}
