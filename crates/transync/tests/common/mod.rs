//! Shared test utilities for transync integration tests.
//!
//! This module provides:
//! - `SyncHarness` running a full engine against the in-memory backend
//! - `JobBuilder` for creating job records programmatically

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::SyncHarness;
