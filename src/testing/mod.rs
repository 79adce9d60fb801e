//! Testing utilities and mock implementations
//!
//! Mocks for exercising sessions without a network or an MQTT broker.

pub mod mocks;

pub use mocks::*;
