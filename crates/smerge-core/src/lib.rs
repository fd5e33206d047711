//! Core merge engine for the push-based shuffle merge service: the
//! partition state machine, the application/attempt registry, the
//! weight-bounded index cache, and the background directory cleaner.
//!
//! `MergeManager` is the crate's single public façade. It owns no socket or
//! RPC framing of its own — `smerge-daemon` drives it over the wire codecs
//! defined in `smerge-proto`.

mod cache;
mod cleaner;
mod manager;
mod path;

pub use manager::{FileSegment, MergeConfig, MergeManager, MergedBlockMeta, Result};
pub use path::{AppPathsInfo, PartitionFileKind};
