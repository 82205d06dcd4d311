//! Shared test utilities for contentgate integration tests.
//!
//! This module provides:
//! - `TestHarness` with a file-backed database in a temp directory and a
//!   clock the test controls
//! - Builders for principals, config and seeded records

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
