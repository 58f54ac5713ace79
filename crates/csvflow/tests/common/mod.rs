//! Shared test utilities for csvflow integration tests.
//!
//! This module provides:
//! - `TestHarness` for running the pipeline against a temporary database
//! - `FlakyStore`, an in-memory store with scripted write failures
//! - `CsvBuilder` for generating uploads

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::*;
