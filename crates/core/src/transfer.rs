use std::{collections::HashSet, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{CollectionId, CompanyId};

pub const MESSAGE_STARTED: &str = "Transfer started";
pub const MESSAGE_IN_PROGRESS: &str = "Transferring companies";

/// Identifier of an asynchronous transfer job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value).map(Self)
    }
}

/// Lifecycle state of a transfer job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// `completed` and `failed` accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Snapshot of one transfer job as exposed to pollers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferJob {
    pub job_id: JobId,
    pub status: TransferStatus,
    pub progress: u64,
    pub total: u64,
    pub message: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub source_collection_id: CollectionId,
    pub target_collection_id: CollectionId,
    pub source_collection_name: String,
    pub target_collection_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub already_present_count: Option<u64>,
}

/// Inputs required to register a job before it is scheduled.
#[derive(Debug, Clone)]
pub struct NewTransferJob {
    pub source_collection_id: CollectionId,
    pub target_collection_id: CollectionId,
    pub source_collection_name: String,
    pub target_collection_name: String,
    pub total: u64,
}

/// Mutation applied to a job record by its single writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobUpdate {
    Start,
    Advance { processed: u64 },
    Complete { added: u64, already_present: u64 },
    Fail { reason: String },
}

impl JobUpdate {
    fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Advance { .. } => "advance",
            Self::Complete { .. } => "complete",
            Self::Fail { .. } => "fail",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot apply {update} to a job in state {from}")]
pub struct TransitionError {
    pub from: &'static str,
    pub update: &'static str,
}

impl TransferJob {
    /// Creates a `pending` job with zero progress.
    pub fn new(job: NewTransferJob, now: DateTime<Utc>) -> Self {
        Self {
            job_id: JobId::new(),
            status: TransferStatus::Pending,
            progress: 0,
            total: job.total,
            message: MESSAGE_STARTED.to_string(),
            started_at: now,
            completed_at: None,
            source_collection_id: job.source_collection_id,
            target_collection_id: job.target_collection_id,
            source_collection_name: job.source_collection_name,
            target_collection_name: job.target_collection_name,
            added_count: None,
            already_present_count: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Applies `update`, enforcing `pending -> in_progress -> completed|failed`.
    ///
    /// `pending -> failed` is accepted so a job whose scheduling failed can
    /// still reach a terminal state. Progress never exceeds `total` and never
    /// moves backwards.
    pub fn apply(&mut self, update: JobUpdate, at: DateTime<Utc>) -> Result<(), TransitionError> {
        let rejected = TransitionError {
            from: self.status.as_str(),
            update: update.name(),
        };

        match (self.status, update) {
            (TransferStatus::Pending, JobUpdate::Start) => {
                self.status = TransferStatus::InProgress;
                self.message = MESSAGE_IN_PROGRESS.to_string();
            }
            (TransferStatus::InProgress, JobUpdate::Advance { processed }) => {
                self.progress = self.progress.saturating_add(processed).min(self.total);
                self.message = progress_message(self.progress, self.total);
            }
            (
                TransferStatus::InProgress,
                JobUpdate::Complete {
                    added,
                    already_present,
                },
            ) => {
                self.status = TransferStatus::Completed;
                self.progress = self.total;
                self.added_count = Some(added);
                self.already_present_count = Some(already_present);
                self.message = completion_message(added, already_present);
                self.completed_at = Some(at);
            }
            (TransferStatus::Pending | TransferStatus::InProgress, JobUpdate::Fail { reason }) => {
                self.status = TransferStatus::Failed;
                self.message = format!("Transfer failed: {reason}");
                self.completed_at = Some(at);
            }
            _ => return Err(rejected),
        }

        Ok(())
    }
}

pub fn progress_message(progress: u64, total: u64) -> String {
    format!("Transferred {progress}/{total} companies")
}

pub fn completion_message(added: u64, already_present: u64) -> String {
    format!("Transfer completed: {added} added, {already_present} already existed")
}

/// Body of `POST /collections/{id}/transfer`.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferRequest {
    pub target_collection_id: CollectionId,
    #[serde(default)]
    pub company_ids: Option<Vec<CompanyId>>,
    #[serde(default)]
    pub transfer_all: Option<bool>,
}

/// Which companies a transfer request asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferSelection {
    All,
    Companies(Vec<CompanyId>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestShapeError {
    #[error("either company_ids or transfer_all must be provided")]
    NothingSelected,
    #[error("company_ids and transfer_all are mutually exclusive")]
    Ambiguous,
}

impl TransferRequest {
    /// Resolves the request into exactly one selection mode.
    ///
    /// An empty `company_ids` list counts as absent. Repeated ids are
    /// collapsed, keeping the first occurrence.
    pub fn selection(&self) -> Result<TransferSelection, RequestShapeError> {
        let transfer_all = self.transfer_all.unwrap_or(false);
        let ids = self
            .company_ids
            .as_deref()
            .filter(|ids| !ids.is_empty());

        match (ids, transfer_all) {
            (Some(_), true) => Err(RequestShapeError::Ambiguous),
            (None, false) => Err(RequestShapeError::NothingSelected),
            (None, true) => Ok(TransferSelection::All),
            (Some(ids), false) => {
                let mut seen = HashSet::with_capacity(ids.len());
                let unique = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
                Ok(TransferSelection::Companies(unique))
            }
        }
    }
}
