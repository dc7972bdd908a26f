//! Live indexing core
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                             Daemon                               │
//! │  ┌──────────────┐   ┌─────────────────┐   ┌──────────────────┐   │
//! │  │ FileRegistry │<──│    UnitStore    │<──│  WatcherBridge   │   │
//! │  │ (path <-> id)│   │ (parsed units)  │   │ (change events)  │   │
//! │  └──────────────┘   └─────────────────┘   └──────────────────┘   │
//! │                            ^                       │             │
//! │                            │                       v             │
//! │                     ┌─────────────┐        ┌──────────────┐      │
//! │                     │  job pool   │        │  parse pool  │      │
//! │                     └─────────────┘        └──────────────┘      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Locking Order
//!
//! 1. `UnitStore` slot map (RwLock), only to find a slot
//! 2. per-path parse lock
//! 3. per-path state lock
//! 4. `FileRegistry` maps (RwLock)
//!
//! The watcher's subscription lock is never held while calling into the store.
//! Parser calls and registry persistence happen with no map lock held.
//!
//! # Modules
//!
//! - `unit_store` - parsed translation units keyed by canonical path
//! - `watcher` - change notifications and coalesced reparses
//! - `jobs` - fixed-size worker pools
//! - `status` - read-only status reports

pub mod jobs;
pub mod status;
pub mod unit_store;
pub mod watcher;

pub use jobs::{Job, JobHandle, JobId, JobOutcome, JobRunner};
pub use status::{StatusJob, StatusQuery, StatusReport};
pub use unit_store::{
    FileFilter, FileList, LoadOutcome, ReparseOutcome, ReparseRequest, UnitEntry, UnitStore,
    UnitSummary,
};
pub use watcher::{ChangeSource, NotifySource, NullSource, WatcherBridge, WatcherHandle};
