//! Shared test utilities for vidstyle integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated pipeline runs in temp directories
//! - Fake executors that need neither network access nor ffmpeg

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::{HarnessOptions, TestHarness};
