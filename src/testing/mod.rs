//! Testing utilities and mock implementations
//!
//! Provides an in-memory broker so the publisher can be exercised without
//! a running RabbitMQ.

pub mod mocks;

pub use mocks::*;
