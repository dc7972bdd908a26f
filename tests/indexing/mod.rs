//! Indexing core tests
//!
//! - `registry_tests` - id allocation, persistence, location encoding
//! - `unit_store_tests` - parse/dispose accounting, save/load
//! - `watcher_tests` - change coalescing
//! - `job_tests` - worker pool delivery
//! - `daemon_tests` - end-to-end command dispatch

mod daemon_tests;
mod job_tests;
mod registry_tests;
mod unit_store_tests;
mod watcher_tests;
