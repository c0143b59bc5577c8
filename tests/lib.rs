//! Test suite for the perflayer performance layer
//!
//! This test suite covers:
//! - Unit tests for the cache, task queue and configuration surfaces
//! - Integration tests for the coordinator and the end-to-end scenarios
//! - Property-based tests for cache bounds, priority ordering and presets
//! - Mock sessions for exercising the connection pool

// Test modules
pub mod mocks;
pub mod unit;
pub mod integration;
pub mod property;

// Re-export mocks for use in other test files
pub use mocks::*;
