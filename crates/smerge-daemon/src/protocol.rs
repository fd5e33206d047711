//! Connection-level request/reply envelopes carried inside control frames.
//! These wrap the bare domain types from `smerge-proto` with the
//! identifiers a request needs that aren't part of the domain type itself
//! (e.g. `app_id` alongside `ExecutorShuffleInfo`).

use serde::{Deserialize, Serialize};
use smerge_proto::{ExecutorShuffleInfo, FinalizeShuffleMerge, MergeStatuses, PushBlockStream};

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterExecutorRequest {
    pub app_id: String,
    pub info: ExecutorShuffleInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OpenPushRequest {
    pub push: PushBlockStream,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub finalize: FinalizeShuffleMerge,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FinalizeReply {
    pub statuses: MergeStatuses,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FetchMetaRequest {
    pub app_id: String,
    pub shuffle_id: i32,
    pub merge_id: i32,
    pub reduce_id: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FetchMetaReply {
    pub num_chunks: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FetchDataRequest {
    pub app_id: String,
    pub shuffle_id: i32,
    pub merge_id: i32,
    pub reduce_id: i32,
    pub chunk_id: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FetchDataReply {
    pub length: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorReply {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Ack;
