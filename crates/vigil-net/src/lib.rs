//! vigil-net: per-target store of captured network traffic
//!
//! The capture pipeline that fills the store lives outside this workspace;
//! the agent only depends on the read-side query API.

pub mod cache;
pub mod entry;

pub use cache::{CacheStatistics, EntryFilter, NetworkCache};
pub use entry::{EntryMetadata, NetworkEntry, RequestRecord, ResponseRecord, Timing};
