//! Shared test utilities for intake integration tests.
//!
//! This module provides:
//! - `TestQueue` wired to scripted in-memory collaborators
//! - Builders for source files, poll answers and agent events

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::*;
