//! Testing utilities and mock implementations
//!
//! Lets the connection manager be driven deterministically without a broker
//! or a real clock.

pub mod mocks;

pub use mocks::*;
