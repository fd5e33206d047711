//! Resolves the three per-partition file paths for a given
//! `(appId, shuffleId, mergeId, reduceId)`. Pure: all I/O happens in callers.

use std::path::PathBuf;

/// Active local directories and fanout width registered for one app attempt.
/// Immutable once set for an attempt (see application registry).
///
/// `merge_dir_name` is the fixed sub-folder name supplied at registration
/// time (the `mergeDir` field of `shuffle_manager_meta`), e.g.
/// `merge_manager` or `merge_manager_2` — the `[_<attemptId>]` suffix named
/// in the on-disk layout is whatever the registering executor encodes into
/// this string, not something this resolver computes itself.
#[derive(Debug, Clone)]
pub struct AppPathsInfo {
    pub local_dirs: Vec<PathBuf>,
    pub sub_dirs_per_local_dir: i32,
    pub merge_dir_name: String,
}

/// Extensions of the three coupled per-partition files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionFileKind {
    Data,
    Index,
    Meta,
}

impl PartitionFileKind {
    fn extension(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Index => "index",
            Self::Meta => "meta",
        }
    }
}

/// `mergedShuffle_{appId}_{shuffleId}_{mergeId}_{reduceId}.{data|index|meta}`.
pub fn partition_filename(
    app_id: &str,
    shuffle_id: i32,
    merge_id: i32,
    reduce_id: i32,
    kind: PartitionFileKind,
) -> String {
    format!(
        "mergedShuffle_{app_id}_{shuffle_id}_{merge_id}_{reduce_id}.{}",
        kind.extension()
    )
}

/// Hashes `filename` with blake3 and returns two independent little-endian
/// `u32`s drawn from disjoint byte ranges of the digest, used to pick a
/// local dir and a fanout subdirectory without correlating the two choices.
/// No legacy resolver was available to match bit-for-bit (see
/// `examples/original_source/`, which retained zero source files for this
/// spec); this hash is fixed here and used consistently by every call site.
fn fanout_hash(filename: &str) -> (u32, u32) {
    let digest = blake3::hash(filename.as_bytes());
    let bytes = digest.as_bytes();
    let dir_word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let sub_word = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    (dir_word, sub_word)
}

/// Resolves the absolute path for one of the three per-partition files under
/// `{local_dir}/{merge_dir_name}/{hash%subdirs:02}/{filename}`.
///
/// `paths.local_dirs` must be non-empty; callers are expected to have
/// already verified the app is registered (`AppNotRegistered` is raised one
/// layer up, where the app lookup itself happens).
pub fn resolve_partition_path(
    paths: &AppPathsInfo,
    app_id: &str,
    shuffle_id: i32,
    merge_id: i32,
    reduce_id: i32,
    kind: PartitionFileKind,
) -> PathBuf {
    let filename = partition_filename(app_id, shuffle_id, merge_id, reduce_id, kind);
    let (dir_word, sub_word) = fanout_hash(&filename);

    let dir_index = (dir_word as usize) % paths.local_dirs.len();
    let sub_dirs = paths.sub_dirs_per_local_dir.max(1) as u32;
    let sub_index = sub_word % sub_dirs;

    paths.local_dirs[dir_index]
        .join(&paths.merge_dir_name)
        .join(format!("{sub_index:02}"))
        .join(filename)
}

/// Resolves all three per-partition file paths in one call.
pub fn resolve_partition_paths(
    paths: &AppPathsInfo,
    app_id: &str,
    shuffle_id: i32,
    merge_id: i32,
    reduce_id: i32,
) -> (PathBuf, PathBuf, PathBuf) {
    let data = resolve_partition_path(paths, app_id, shuffle_id, merge_id, reduce_id, PartitionFileKind::Data);
    let index = resolve_partition_path(paths, app_id, shuffle_id, merge_id, reduce_id, PartitionFileKind::Index);
    let meta = resolve_partition_path(paths, app_id, shuffle_id, merge_id, reduce_id, PartitionFileKind::Meta);
    (data, index, meta)
}
