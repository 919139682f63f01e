//! Domain types shared by the storage layer and the HTTP application.
//!
//! The crate has no I/O: it describes collections and companies, the
//! lifecycle of a transfer job and the validation rules applied to an
//! incoming transfer request.

pub mod error;
pub mod transfer;
pub mod types;

pub use error::ErrorKind;
pub use transfer::{
    JobId, JobUpdate, NewTransferJob, RequestShapeError, TransferJob, TransferRequest,
    TransferSelection, TransferStatus, TransitionError,
};
pub use types::{Collection, CollectionId, Company, CompanyId, CompanyPage};
