//! Cross-component tests, including the end-to-end host scenarios

pub mod manager_tests;
pub mod pool_tests;
pub mod scenario_tests;
