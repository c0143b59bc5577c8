//! Mock implementations for testing

pub mod session;

pub use session::{MockRequest, MockSession, MockSessionFactory};
