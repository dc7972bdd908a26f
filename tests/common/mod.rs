//! Common test utilities and fixtures for cindex integration tests
//!
//! This module provides:
//! - `TestRepo` for temporary source trees
//! - `StubParser`, a recording parser with failure injection and a gate

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod stub_parser;
pub mod test_repo;

pub use stub_parser::{StubParser, StubUnit};
pub use test_repo::TestRepo;
