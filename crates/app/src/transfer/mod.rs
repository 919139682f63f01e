//! Asynchronous copying of company memberships between collections.
//!
//! [`orchestrator::TransferService`] validates a request on the caller's task
//! and registers a job in a [`registry::JobStore`]. The job is queued on a
//! [`worker::TransferWorker`], which runs [`inserter::BatchInserter`] for it
//! while clients poll the job record through the status endpoint.

pub mod api;
pub mod inserter;
pub mod orchestrator;
pub mod registry;
pub mod worker;

use std::sync::Arc;

use chrono::{DateTime, Utc};

pub use orchestrator::{TransferError, TransferService};
pub use registry::{InMemoryJobStore, JobStore};
pub use worker::{TransferQueue, TransferWorker};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;
