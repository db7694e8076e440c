//! Core domain types and utilities for the operion platform.
//!
//! This crate provides the strongly-typed identifiers and the error-handling
//! foundation shared by every other operion crate.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ConnectionId, EventId, ExecutionId, ParseIdError, WorkflowGroupId, WorkflowId};
