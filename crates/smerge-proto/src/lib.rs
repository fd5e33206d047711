//! Wire protocol for the push-based shuffle merge service.
//!
//! This crate defines the control messages of the merge service (register,
//! push-open, finalize, fetch) and the two framing codecs used to carry them:
//! a small fixed-header codec for control frames, and a length-prefixed codec
//! for the (potentially large) streamed block-data bytes. Neither codec nor
//! message shape is specific to one transport; `smerge-daemon` is the only
//! consumer that opens sockets.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod framing;

/// Non-fatal and fatal outcomes a push or finalize can produce, matching the
/// legacy wire integer assignments exactly. These values are normative: they
/// are observed by clients outside this crate and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum BlockPushReturnCode {
    TooLateBlockPush = 1,
    StaleBlockPush = 2,
    BlockAppendCollisionDetected = 3,
    TooOldAttemptPush = 4,
}

impl BlockPushReturnCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::TooLateBlockPush),
            2 => Some(Self::StaleBlockPush),
            3 => Some(Self::BlockAppendCollisionDetected),
            4 => Some(Self::TooOldAttemptPush),
            _ => None,
        }
    }
}

impl fmt::Display for BlockPushReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TooLateBlockPush => "TOO_LATE_BLOCK_PUSH",
            Self::StaleBlockPush => "STALE_BLOCK_PUSH",
            Self::BlockAppendCollisionDetected => "BLOCK_APPEND_COLLISION_DETECTED",
            Self::TooOldAttemptPush => "TOO_OLD_ATTEMPT_PUSH",
        };
        write!(f, "{s}")
    }
}

/// The full error taxonomy of the merge service, shared by core and wire
/// layers so a `SmergeError` can be mapped directly to a reply message.
#[derive(Debug, Error)]
pub enum SmergeError {
    #[error("too late block push")]
    TooLateBlockPush,
    #[error("stale block push")]
    StaleBlockPush,
    #[error("block append collision detected")]
    BlockAppendCollisionDetected,
    #[error("too old attempt push")]
    TooOldAttemptPush,
    #[error("partition aborted: IOExceptions exceeded the threshold ({threshold})")]
    PartitionAborted { threshold: u32 },
    #[error("invalid merge meta: {0}")]
    InvalidMergeMeta(String),
    #[error("app not registered: {app_id}")]
    AppNotRegistered { app_id: String },
    #[error("stale merge finalize")]
    StaleMergeFinalize,
    #[error("stale block fetch")]
    StaleBlockFetch,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("closed channel")]
    ClosedChannel,
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SmergeError>;

impl SmergeError {
    /// Maps the four non-fatal kinds onto their normative wire code.
    /// Returns `None` for fatal/resource errors, which have no
    /// `BlockPushReturnCode` representation and must propagate as a
    /// transport-level failure instead.
    pub fn as_return_code(&self) -> Option<BlockPushReturnCode> {
        match self {
            Self::TooLateBlockPush => Some(BlockPushReturnCode::TooLateBlockPush),
            Self::StaleBlockPush => Some(BlockPushReturnCode::StaleBlockPush),
            Self::BlockAppendCollisionDetected => {
                Some(BlockPushReturnCode::BlockAppendCollisionDetected)
            }
            Self::TooOldAttemptPush => Some(BlockPushReturnCode::TooOldAttemptPush),
            _ => None,
        }
    }

    /// Non-fatal outcomes must not be logged at error level (see error
    /// handling design); this flags which kinds are merely routine.
    pub fn is_non_fatal(&self) -> bool {
        self.as_return_code().is_some()
    }
}

/// `PushBlockStream{ appId, attemptId, shuffleId, mergeId, mapIndex, reduceId, index }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushBlockStream {
    pub app_id: String,
    pub attempt_id: i32,
    pub shuffle_id: i32,
    pub merge_id: i32,
    pub map_index: i32,
    pub reduce_id: i32,
    pub index: i32,
}

impl PushBlockStream {
    /// `shufflePush_{shuffleId}_{mapIndex}_{reduceId}`, the stable id format
    /// the stream-callback contract requires of `get_id`.
    pub fn stream_id(&self) -> String {
        format!(
            "shufflePush_{}_{}_{}",
            self.shuffle_id, self.map_index, self.reduce_id
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeShuffleMerge {
    pub app_id: String,
    pub attempt_id: i32,
    pub shuffle_id: i32,
    pub merge_id: i32,
}

/// Per-chunk map-presence bitmap: a sorted list of contributing map indices.
/// Serialized on disk per the count-prefixed sorted-`i32` encoding fixed in
/// this crate's `framing` module; carried here as a plain `Vec` on the wire.
pub type ChunkBitmap = Vec<i32>;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MergeStatuses {
    pub shuffle_id: i32,
    pub bitmaps: Vec<ChunkBitmap>,
    pub reduce_ids: Vec<i32>,
    pub sizes: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorShuffleInfo {
    pub local_dirs: Vec<String>,
    pub sub_dirs_per_local_dir: i32,
    pub shuffle_manager_meta: String,
}

/// Decoded form of the `shuffleManager:{"mergeDir": "...", "attemptId": "..."}`
/// key-prefixed JSON blob carried in `shuffle_manager_meta`.
#[derive(Debug, Clone, Deserialize)]
pub struct ShuffleManagerMeta {
    pub merge_dir: String,
    #[serde(default)]
    pub attempt_id: Option<i32>,
}

const SHUFFLE_MANAGER_META_PREFIX: &str = "shuffleManager:";

impl ShuffleManagerMeta {
    /// Parses the `shuffleManager:{...}` blob. Fails with `InvalidMergeMeta`
    /// if the prefix is missing, the JSON is malformed, or `mergeDir` is
    /// absent.
    pub fn parse(raw: &str) -> Result<Self> {
        let json = raw
            .strip_prefix(SHUFFLE_MANAGER_META_PREFIX)
            .ok_or_else(|| {
                SmergeError::InvalidMergeMeta(format!(
                    "missing '{SHUFFLE_MANAGER_META_PREFIX}' prefix"
                ))
            })?;
        serde_json::from_str(json)
            .map_err(|e| SmergeError::InvalidMergeMeta(format!("malformed meta json: {e}")))
    }
}

/// Reply carrying a non-fatal `BlockPushReturnCode` for a specific push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockPushReturnCodeMsg {
    pub return_code: i32,
    pub failure_block_id: String,
}

impl BlockPushReturnCodeMsg {
    pub fn new(code: BlockPushReturnCode, failure_block_id: impl Into<String>) -> Self {
        Self {
            return_code: code.code(),
            failure_block_id: failure_block_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_code_values_are_normative() {
        assert_eq!(BlockPushReturnCode::TooLateBlockPush.code(), 1);
        assert_eq!(BlockPushReturnCode::StaleBlockPush.code(), 2);
        assert_eq!(BlockPushReturnCode::BlockAppendCollisionDetected.code(), 3);
        assert_eq!(BlockPushReturnCode::TooOldAttemptPush.code(), 4);
    }

    #[test]
    fn return_code_round_trips_through_code() {
        for code in 1..=4 {
            let rc = BlockPushReturnCode::from_code(code).unwrap();
            assert_eq!(rc.code(), code);
        }
        assert!(BlockPushReturnCode::from_code(0).is_none());
        assert!(BlockPushReturnCode::from_code(5).is_none());
    }

    #[test]
    fn non_fatal_errors_map_to_return_codes() {
        assert_eq!(
            SmergeError::TooLateBlockPush.as_return_code(),
            Some(BlockPushReturnCode::TooLateBlockPush)
        );
        assert!(SmergeError::TooLateBlockPush.is_non_fatal());
        assert!(SmergeError::PartitionAborted { threshold: 4 }
            .as_return_code()
            .is_none());
        assert!(!SmergeError::PartitionAborted { threshold: 4 }.is_non_fatal());
    }

    #[test]
    fn stream_id_matches_format() {
        let push = PushBlockStream {
            app_id: "app-1".into(),
            attempt_id: 0,
            shuffle_id: 0,
            merge_id: 0,
            map_index: 1,
            reduce_id: 0,
            index: 0,
        };
        assert_eq!(push.stream_id(), "shufflePush_0_1_0");
    }

    #[test]
    fn shuffle_manager_meta_parses_prefixed_json() {
        let raw_numeric = r#"shuffleManager:{"mergeDir": "merge_manager_2", "attemptId": 3}"#;
        let meta = ShuffleManagerMeta::parse(raw_numeric).unwrap();
        assert_eq!(meta.merge_dir, "merge_manager_2");
        assert_eq!(meta.attempt_id, Some(3));
    }

    #[test]
    fn shuffle_manager_meta_requires_merge_dir() {
        let raw = r#"shuffleManager:{"attemptId": 3}"#;
        assert!(ShuffleManagerMeta::parse(raw).is_err());
    }

    #[test]
    fn shuffle_manager_meta_requires_prefix() {
        let raw = r#"{"mergeDir": "merge_manager_2"}"#;
        assert!(ShuffleManagerMeta::parse(raw).is_err());
    }
}
