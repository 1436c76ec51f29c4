//! Shared test utilities for contract-relay integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs against temp storage and output directories
//! - Fake collaborators (passes, renderer, channel) and message builders

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{PipelineOptions, TestHarness};
