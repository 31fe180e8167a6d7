//! Core domain model types.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Submissions and the payload type carried between stages
//! - Normalized validator results
//! - Run status, error kinds and audit reports

mod report;
mod result;
mod status;
mod submission;

pub use report::{RunReport, StageRecord};
pub use result::StageResult;
pub use status::{ErrorKind, RunStatus, StageVerdict};
pub use submission::{Payload, Submission, ID_FIELD, METADATA_FIELD};
