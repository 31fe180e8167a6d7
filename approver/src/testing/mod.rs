//! Testing utilities for approver pipelines.
//!
//! This module provides:
//! - Scripted validators plus flaky and stalled stores
//! - Sample validators and submissions
//! - Assertions over run reports

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_accepted, assert_errored_with, assert_rejected_at, assert_stages_invoked,
};
pub use fixtures::{
    email_validator, invalid_email_submission, invalid_pincode_submission, pincode_validator,
    valid_submission, TestHarness,
};
pub use mocks::{CallOrder, FlakyRecordStore, ScriptedValidator, StalledRecordStore, Step};
