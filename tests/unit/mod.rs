//! Component-level tests through the public API

pub mod cache_tests;
pub mod config_tests;
pub mod task_queue_tests;
