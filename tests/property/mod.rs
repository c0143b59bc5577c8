//! Property-based tests

pub mod cache_properties;
pub mod config_properties;
pub mod priority_properties;
