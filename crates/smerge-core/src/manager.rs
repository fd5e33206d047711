//! The merge manager façade: application registry, partition state machine,
//! stream callback, and the two read APIs, all wired over one concurrent
//! map of apps. Each partition owns its own mutex (§5); the `DashMap`s here
//! give lock-free lookups for apps and shuffles the way the façade is
//! specified to behave.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use smerge_proto::{ExecutorShuffleInfo, MergeStatuses, ShuffleManagerMeta, SmergeError};

use crate::cache::WeightedIndexCache;
use crate::cleaner::Cleaner;
use crate::path::{self, AppPathsInfo};

pub type Result<T> = std::result::Result<T, SmergeError>;

/// Recognized options from the external-interfaces section: chunk-cut
/// threshold, per-partition I/O exception budget, and the index cache's
/// byte-weight bound.
#[derive(Debug, Clone, Copy)]
pub struct MergeConfig {
    pub min_chunk_size_in_merged_shuffle_file: u64,
    pub io_exceptions_threshold: u32,
    pub merged_index_cache_size: u64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            min_chunk_size_in_merged_shuffle_file: 2 * 1024 * 1024,
            io_exceptions_threshold: 4,
            merged_index_cache_size: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetireReason {
    Finalized,
    Superseded,
    AttemptClosed,
}

/// Ephemeral per-push bookkeeping. `length` accumulates across every
/// `on_data` call regardless of whether bytes were written immediately or
/// deferred, since it feeds `updated_pos = position + length` at completion.
struct StreamState {
    length: u64,
    deferred_bufs: Vec<Vec<u8>>,
    has_been_active: bool,
}

impl StreamState {
    fn new() -> Self {
        Self {
            length: 0,
            deferred_bufs: Vec::new(),
            has_been_active: false,
        }
    }
}

/// The mutex-guarded body of a partition: open file handles, the write
/// cursor, and the state-machine bookkeeping of §3's `PartitionInfo`.
struct PartitionState {
    data: File,
    index: File,
    meta: File,
    cursor: u64,
    index_len: u64,
    meta_len: u64,

    position: u64,
    last_chunk_offset: u64,
    last_merged_map_index: i32,
    current_map_index: i32,
    encountered_failure: bool,
    map_tracker: HashSet<i32>,
    chunk_tracker: HashSet<i32>,
    io_exception_count: u32,
    aborted: bool,
    retired: Option<RetireReason>,
    streams: HashMap<i32, StreamState>,
}

impl PartitionState {
    /// `local_dirs` are the app attempt's registered (already-normalized)
    /// local directories; each of the three paths must resolve to somewhere
    /// underneath one of them once its parent directory exists, guarding
    /// against a malicious executor-supplied `appId`/`mergeDir` string
    /// smuggling a `..`/`/` component into the fanout-hashed filename.
    fn create(
        data_path: &std::path::Path,
        index_path: &std::path::Path,
        meta_path: &std::path::Path,
        local_dirs: &[std::path::PathBuf],
    ) -> Result<Self> {
        for p in [data_path, index_path, meta_path] {
            if let Some(parent) = p.parent() {
                std::fs::create_dir_all(parent)?;
                if !local_dirs.iter().any(|dir| smerge_config::path::is_within_directory(parent, dir)) {
                    return Err(SmergeError::InvalidPath(format!(
                        "resolved partition path {} escapes its registered local directories",
                        p.display()
                    )));
                }
            }
        }
        let mut data = OpenOptions::new().create(true).read(true).write(true).truncate(true).open(data_path)?;
        let mut index = OpenOptions::new().create(true).read(true).write(true).truncate(true).open(index_path)?;
        let meta = OpenOptions::new().create(true).read(true).write(true).truncate(true).open(meta_path)?;

        // Leading index entry of 0, per I4.
        index.write_all(&0u64.to_be_bytes())?;
        index.flush()?;
        data.seek(SeekFrom::Start(0))?;

        Ok(Self {
            data,
            index,
            meta,
            cursor: 0,
            index_len: 8,
            meta_len: 0,
            position: 0,
            last_chunk_offset: 0,
            last_merged_map_index: -1,
            current_map_index: -1,
            encountered_failure: false,
            map_tracker: HashSet::new(),
            chunk_tracker: HashSet::new(),
            io_exception_count: 0,
            aborted: false,
            retired: None,
            streams: HashMap::new(),
        })
    }

    fn record_io_error(&mut self, threshold: u32) {
        self.io_exception_count += 1;
        if self.io_exception_count >= threshold {
            self.aborted = true;
        }
    }

    fn write_data_at(&mut self, buf: &[u8], pos: u64) -> std::io::Result<()> {
        self.data.seek(SeekFrom::Start(pos))?;
        self.data.write_all(buf)?;
        self.cursor = pos + buf.len() as u64;
        Ok(())
    }

    fn write_data(&mut self, buf: &[u8]) -> std::io::Result<()> {
        let cursor = self.cursor;
        self.write_data_at(buf, cursor)
    }

    /// Two-phase: meta first, then index. On index failure the meta write
    /// is rolled back; on meta failure nothing is appended.
    fn update_chunk_info(&mut self, chunk_offset: u64, map_indices: &[i32]) -> std::io::Result<()> {
        let bitmap = smerge_proto::framing::encode_chunk_bitmap(map_indices);
        self.meta.seek(SeekFrom::Start(self.meta_len))?;
        self.meta.write_all(&bitmap)?;
        self.meta_len += bitmap.len() as u64;

        let index_result = self
            .index
            .seek(SeekFrom::Start(self.index_len))
            .and_then(|_| self.index.write_all(&chunk_offset.to_be_bytes()));

        match index_result {
            Ok(()) => {
                self.index_len += 8;
                Ok(())
            }
            Err(e) => {
                self.meta_len -= bitmap.len() as u64;
                let _ = self.meta.set_len(self.meta_len);
                Err(e)
            }
        }
    }

    fn truncate_data(&mut self, new_len: u64) -> std::io::Result<()> {
        self.data.set_len(new_len)?;
        self.cursor = new_len;
        Ok(())
    }
}

struct Partition {
    app_id: String,
    shuffle_id: i32,
    merge_id: i32,
    reduce_id: i32,
    data_path: PathBuf,
    index_path: PathBuf,
    meta_path: PathBuf,
    state: Mutex<PartitionState>,
}

#[derive(Debug, Clone, Copy)]
struct MergeState {
    merge_id: i32,
    finalized: bool,
}

struct ShuffleEntry {
    merge: RwLock<MergeState>,
    partitions: DashMap<i32, Arc<Partition>>,
}

struct AttemptState {
    attempt_id: i32,
    paths: AppPathsInfo,
}

struct AppEntry {
    attempt: RwLock<AttemptState>,
    shuffles: DashMap<i32, Arc<ShuffleEntry>>,
}

/// Index-file/meta-file contents for the reader-side `get_merged_block_meta`
/// API.
pub struct MergedBlockMeta {
    pub num_chunks: u32,
    pub meta_bytes: Arc<Vec<u8>>,
}

/// A byte-range reference into a merged data file, returned by
/// `get_merged_block_data`.
pub struct FileSegment {
    pub path: PathBuf,
    pub offset: u64,
    pub length: u64,
}

struct Inner {
    apps: DashMap<String, Arc<AppEntry>>,
    cleaner: Cleaner,
    index_cache: Mutex<WeightedIndexCache>,
    config: MergeConfig,
}

/// Public entry points: `receive_block_data_as_stream`, `finalize_shuffle_merge`,
/// `get_merged_block_meta`, `get_merged_block_data`, `register_executor`,
/// `application_removed`.
#[derive(Clone)]
pub struct MergeManager(Arc<Inner>);

impl MergeManager {
    pub fn new(config: MergeConfig) -> Self {
        Self(Arc::new(Inner {
            apps: DashMap::new(),
            cleaner: Cleaner::spawn(),
            index_cache: Mutex::new(WeightedIndexCache::new(config.merged_index_cache_size)),
            config,
        }))
    }

    /// §4.5: parses `shuffle_manager_meta`, registers or supersedes the
    /// app's active attempt. First writer wins within an attempt.
    pub fn register_executor(&self, app_id: &str, info: ExecutorShuffleInfo) -> Result<()> {
        let meta = ShuffleManagerMeta::parse(&info.shuffle_manager_meta)?;
        let attempt_id = meta.attempt_id.unwrap_or(0);
        let local_dirs = info
            .local_dirs
            .iter()
            .map(|d| {
                smerge_config::path::normalize_for_ipc(d)
                    .map_err(|e| SmergeError::InvalidPath(format!("registered local dir {d}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let paths = AppPathsInfo {
            local_dirs,
            sub_dirs_per_local_dir: info.sub_dirs_per_local_dir,
            merge_dir_name: meta.merge_dir,
        };

        let entry = self
            .0
            .apps
            .entry(app_id.to_string())
            .or_insert_with(|| {
                Arc::new(AppEntry {
                    attempt: RwLock::new(AttemptState { attempt_id, paths: paths.clone() }),
                    shuffles: DashMap::new(),
                })
            })
            .clone();

        let mut attempt = entry.attempt.write().unwrap();
        if attempt_id > attempt.attempt_id {
            // Supersede: close all open partitions of the prior attempt
            // asynchronously and install the new paths.
            for shuffle in entry.shuffles.iter() {
                for partition in shuffle.partitions.iter() {
                    let mut state = partition.state.lock().unwrap();
                    state.retired = Some(RetireReason::AttemptClosed);
                }
            }
            entry.shuffles.clear();
            attempt.attempt_id = attempt_id;
            attempt.paths = paths;
        }
        // Same-attempt re-registration from another executor: first writer
        // wins, paths list is not mutated.
        Ok(())
    }

    /// §4.5: removes the app, closes its partitions, and optionally queues
    /// its directories for background recursive deletion.
    pub fn application_removed(&self, app_id: &str, cleanup_local_dirs: bool) {
        if let Some((_, entry)) = self.0.apps.remove(app_id) {
            let attempt = entry.attempt.read().unwrap();
            for shuffle in entry.shuffles.iter() {
                for partition in shuffle.partitions.iter() {
                    let mut state = partition.state.lock().unwrap();
                    state.retired = Some(RetireReason::AttemptClosed);
                }
            }
            if cleanup_local_dirs {
                for dir in &attempt.paths.local_dirs {
                    self.0.cleaner.queue_delete(dir.join(&attempt.paths.merge_dir_name));
                }
            }
        }
    }

    fn app_entry(&self, app_id: &str) -> Result<Arc<AppEntry>> {
        self.0
            .apps
            .get(app_id)
            .map(|e| e.clone())
            .ok_or_else(|| SmergeError::AppNotRegistered { app_id: app_id.to_string() })
    }

    fn check_attempt(&self, app: &AppEntry, attempt_id: i32) -> Result<AppPathsInfo> {
        let attempt = app.attempt.read().unwrap();
        if attempt_id < attempt.attempt_id {
            return Err(SmergeError::TooOldAttemptPush);
        }
        Ok(attempt.paths.clone())
    }

    fn shuffle_entry(&self, app: &AppEntry, shuffle_id: i32) -> Arc<ShuffleEntry> {
        app.shuffles
            .entry(shuffle_id)
            .or_insert_with(|| {
                Arc::new(ShuffleEntry {
                    merge: RwLock::new(MergeState { merge_id: 0, finalized: false }),
                    partitions: DashMap::new(),
                })
            })
            .clone()
    }

    /// Resolves/creates the partition for `reduce_id`, handling the
    /// too-late, stale, and higher-mergeId-supersedes transitions of §4.3.
    /// Returns `None` only when the push is rejected outright (the caller
    /// turns that into the appropriate `SmergeError`).
    fn resolve_partition(
        &self,
        app_id: &str,
        paths: &AppPathsInfo,
        shuffle: &Arc<ShuffleEntry>,
        merge_id: i32,
        shuffle_id: i32,
        reduce_id: i32,
    ) -> Result<Arc<Partition>> {
        {
            let state = shuffle.merge.read().unwrap();
            if state.finalized {
                return Err(SmergeError::TooLateBlockPush);
            }
            if merge_id < state.merge_id {
                return Err(SmergeError::StaleBlockPush);
            }
        }

        {
            let mut state = shuffle.merge.write().unwrap();
            if state.finalized {
                return Err(SmergeError::TooLateBlockPush);
            }
            if merge_id < state.merge_id {
                return Err(SmergeError::StaleBlockPush);
            }
            if merge_id > state.merge_id {
                // First observation of a higher mergeId: retire the old
                // generation's partitions and delete their files off the
                // hot path.
                for entry in shuffle.partitions.iter() {
                    let partition = entry.value();
                    let mut pstate = partition.state.lock().unwrap();
                    pstate.retired = Some(RetireReason::Superseded);
                    drop(pstate);
                    self.0.cleaner.queue_delete_file(partition.data_path.clone());
                    self.0.cleaner.queue_delete_file(partition.index_path.clone());
                    self.0.cleaner.queue_delete_file(partition.meta_path.clone());
                }
                shuffle.partitions.clear();
                state.merge_id = merge_id;
            }
        }

        if let Some(existing) = shuffle.partitions.get(&reduce_id) {
            return Ok(existing.clone());
        }

        let (data_path, index_path, meta_path) =
            path::resolve_partition_paths(paths, app_id, shuffle_id, merge_id, reduce_id);
        let partition = Arc::new(Partition {
            app_id: app_id.to_string(),
            shuffle_id,
            merge_id,
            reduce_id,
            data_path: data_path.clone(),
            index_path: index_path.clone(),
            meta_path: meta_path.clone(),
            state: Mutex::new(PartitionState::create(&data_path, &index_path, &meta_path, &paths.local_dirs)?),
        });
        Ok(shuffle
            .partitions
            .entry(reduce_id)
            .or_insert(partition)
            .clone())
    }

    /// §4.3/§4.4 `on_data`. Returns `Ok(())` on success (including
    /// duplicate-drop and defer); errors are fatal to this `on_data` call.
    pub fn on_data(&self, app_id: &str, attempt_id: i32, shuffle_id: i32, merge_id: i32, reduce_id: i32, map_index: i32, buf: &[u8]) -> Result<()> {
        let app = self.app_entry(app_id)?;
        let paths = self.check_attempt(&app, attempt_id)?;
        let shuffle = self.shuffle_entry(&app, shuffle_id);
        let partition = match self.resolve_partition(app_id, &paths, &shuffle, merge_id, shuffle_id, reduce_id) {
            Ok(p) => p,
            Err(SmergeError::TooLateBlockPush) | Err(SmergeError::StaleBlockPush) => return Ok(()),
            Err(e) => return Err(e),
        };

        let mut state = partition.state.lock().unwrap();
        if state.aborted {
            return Err(SmergeError::PartitionAborted { threshold: self.0.config.io_exceptions_threshold });
        }
        match state.retired {
            Some(RetireReason::Finalized) | Some(RetireReason::Superseded) => {
                state.streams.remove(&map_index);
                return Ok(());
            }
            Some(RetireReason::AttemptClosed) => return Err(SmergeError::ClosedChannel),
            None => {}
        }

        if state.map_tracker.contains(&map_index) {
            // Duplicate: drop bytes, no write, no state mutation.
            return Ok(());
        }

        let allowed = state.current_map_index == -1 || state.current_map_index == map_index;
        if !allowed {
            let stream = state.streams.entry(map_index).or_insert_with(StreamState::new);
            stream.length += buf.len() as u64;
            stream.deferred_bufs.push(buf.to_vec());
            return Ok(());
        }

        state.current_map_index = map_index;
        let had_failure = state.encountered_failure;
        let threshold = self.0.config.io_exceptions_threshold;

        let deferred = state
            .streams
            .get_mut(&map_index)
            .map(|s| std::mem::take(&mut s.deferred_bufs))
            .unwrap_or_default();

        for chunk in &deferred {
            if let Err(e) = state.write_data(chunk) {
                state.record_io_error(threshold);
                state.encountered_failure = true;
                return Err(SmergeError::Io(e));
            }
        }

        let write_result = if had_failure && deferred.is_empty() {
            let target = state.position + state.streams.get(&map_index).map(|s| s.length).unwrap_or(0);
            state.write_data_at(buf, target)
        } else {
            state.write_data(buf)
        };

        match write_result {
            Ok(()) => {
                state.encountered_failure = false;
                let stream = state.streams.entry(map_index).or_insert_with(StreamState::new);
                stream.length += buf.len() as u64;
                stream.has_been_active = true;
                Ok(())
            }
            Err(e) => {
                state.record_io_error(threshold);
                state.encountered_failure = true;
                Err(SmergeError::Io(e))
            }
        }
    }

    /// §4.3 active-completion protocol / collision / too-late / stale.
    pub fn on_complete(&self, app_id: &str, attempt_id: i32, shuffle_id: i32, merge_id: i32, reduce_id: i32, map_index: i32) -> Result<()> {
        let app = self.app_entry(app_id)?;
        let paths = self.check_attempt(&app, attempt_id)?;
        let shuffle = self.shuffle_entry(&app, shuffle_id);
        let partition = match self.resolve_partition(app_id, &paths, &shuffle, merge_id, shuffle_id, reduce_id) {
            Ok(p) => p,
            Err(e @ SmergeError::TooLateBlockPush) | Err(e @ SmergeError::StaleBlockPush) => return Err(e),
            Err(e) => return Err(e),
        };

        let mut state = partition.state.lock().unwrap();
        if state.aborted {
            return Err(SmergeError::PartitionAborted { threshold: self.0.config.io_exceptions_threshold });
        }
        match state.retired {
            Some(RetireReason::Finalized) => return Err(SmergeError::TooLateBlockPush),
            Some(RetireReason::Superseded) => return Err(SmergeError::StaleBlockPush),
            Some(RetireReason::AttemptClosed) => return Err(SmergeError::ClosedChannel),
            None => {}
        }

        if state.map_tracker.contains(&map_index) {
            state.streams.remove(&map_index);
            return Ok(());
        }

        let has_been_active = state.streams.get(&map_index).map(|s| s.has_been_active).unwrap_or(false);
        let acquireable = state.current_map_index == -1 || state.current_map_index == map_index;

        if !acquireable && !has_been_active {
            state.streams.remove(&map_index);
            return Err(SmergeError::BlockAppendCollisionDetected);
        }

        if state.current_map_index == -1 {
            state.current_map_index = map_index;
        }

        let threshold = self.0.config.io_exceptions_threshold;
        let stream = state.streams.remove(&map_index).unwrap_or_else(StreamState::new);

        // Flush any leftover deferred bytes (normally already flushed by a
        // prior on_data call that promoted the stream to active).
        for chunk in &stream.deferred_bufs {
            if let Err(e) = state.write_data(chunk) {
                state.record_io_error(threshold);
                state.current_map_index = -1;
                return Err(SmergeError::Io(e));
            }
        }

        let updated_pos = state.position + stream.length;
        state.chunk_tracker.insert(map_index);

        if updated_pos.saturating_sub(state.last_chunk_offset) >= self.0.config.min_chunk_size_in_merged_shuffle_file {
            let members: Vec<i32> = state.chunk_tracker.iter().copied().collect();
            if let Err(e) = state.update_chunk_info(updated_pos, &members) {
                // Non-fatal: bump the counter, keep accepting writes unless
                // the partition is now aborted. The byte data itself is
                // intact even though the chunk boundary wasn't recorded.
                state.record_io_error(threshold);
                tracing::debug!(app_id, shuffle_id, reduce_id, error = %e, "update_chunk_info failed, will retry at next boundary or finalize");
            } else {
                state.last_chunk_offset = updated_pos;
                state.chunk_tracker.clear();
            }
        }

        state.position = updated_pos;
        state.current_map_index = -1;
        state.map_tracker.insert(map_index);
        state.last_merged_map_index = map_index;
        Ok(())
    }

    /// §4.4 `on_failure`: idempotent, releases the write slot if held.
    pub fn on_failure(&self, app_id: &str, attempt_id: i32, shuffle_id: i32, merge_id: i32, reduce_id: i32, map_index: i32) {
        let Ok(app) = self.app_entry(app_id) else { return };
        let Ok(paths) = self.check_attempt(&app, attempt_id) else { return };
        let shuffle = self.shuffle_entry(&app, shuffle_id);
        let Ok(partition) = self.resolve_partition(app_id, &paths, &shuffle, merge_id, shuffle_id, reduce_id) else {
            return;
        };
        let mut state = partition.state.lock().unwrap();
        let was_writing = state.streams.get(&map_index).map(|s| s.has_been_active).unwrap_or(false);
        if was_writing {
            state.encountered_failure = true;
            state.current_map_index = -1;
        }
        state.streams.remove(&map_index);
    }

    /// §4.3 `finalize_shuffle_merge`.
    pub fn finalize_shuffle_merge(&self, app_id: &str, attempt_id: i32, shuffle_id: i32, merge_id: i32) -> Result<MergeStatuses> {
        let app = self.app_entry(app_id)?;
        self.check_attempt(&app, attempt_id)?;
        let shuffle = self.shuffle_entry(&app, shuffle_id);

        {
            let mut mstate = shuffle.merge.write().unwrap();
            if merge_id < mstate.merge_id {
                return Err(SmergeError::StaleMergeFinalize);
            }
            if mstate.finalized && merge_id <= mstate.merge_id {
                return Err(SmergeError::StaleMergeFinalize);
            }
            mstate.merge_id = merge_id;

            if shuffle.partitions.is_empty() {
                mstate.finalized = true;
                return Ok(MergeStatuses { shuffle_id, ..Default::default() });
            }
        }

        let mut statuses = MergeStatuses { shuffle_id, ..Default::default() };
        let threshold = self.0.config.io_exceptions_threshold;

        for entry in shuffle.partitions.iter() {
            let partition = entry.value().clone();
            let mut state = partition.state.lock().unwrap();

            if state.aborted {
                continue;
            }

            let _ = state.truncate_data(state.position);

            if state.position != state.last_chunk_offset {
                let members: Vec<i32> = if state.chunk_tracker.is_empty() {
                    vec![state.last_merged_map_index]
                } else {
                    state.chunk_tracker.iter().copied().collect()
                };
                if let Err(e) = state.update_chunk_info(state.position, &members) {
                    state.record_io_error(threshold);
                    tracing::warn!(app_id, shuffle_id, reduce_id = partition.reduce_id, error = %e, "final chunk commit failed during finalize");
                } else {
                    state.last_chunk_offset = state.position;
                    state.chunk_tracker.clear();
                }
            }

            if state.position > 0 {
                statuses.reduce_ids.push(partition.reduce_id);
                statuses.sizes.push(state.position);
                statuses.bitmaps.push(state.map_tracker.iter().copied().collect());
            }

            state.retired = Some(RetireReason::Finalized);
        }

        shuffle.partitions.clear();
        let mut mstate = shuffle.merge.write().unwrap();
        mstate.finalized = true;

        Ok(statuses)
    }

    /// §4.6 `get_merged_block_meta`.
    pub fn get_merged_block_meta(&self, app_id: &str, shuffle_id: i32, merge_id: i32, reduce_id: i32) -> Result<MergedBlockMeta> {
        let app = self.app_entry(app_id)?;
        let attempt = app.attempt.read().unwrap();
        let paths = attempt.paths.clone();
        drop(attempt);

        let shuffle = self.shuffle_entry(&app, shuffle_id);
        {
            let mstate = shuffle.merge.read().unwrap();
            if merge_id < mstate.merge_id {
                return Err(SmergeError::StaleBlockFetch);
            }
        }

        let (_, index_path, meta_path) = path::resolve_partition_paths(&paths, app_id, shuffle_id, merge_id, reduce_id);

        let index_len = std::fs::metadata(&index_path)
            .map_err(|_| SmergeError::NotFound(format!("index file missing for reduce {reduce_id}")))?
            .len();
        if index_len < 8 || index_len % 8 != 0 {
            return Err(SmergeError::NotFound(format!("malformed index file for reduce {reduce_id}")));
        }
        let num_chunks = (index_len / 8 - 1) as u32;

        let meta_bytes = {
            let mut cache = self.0.index_cache.lock().unwrap();
            if let Some(bytes) = cache.get(&meta_path) {
                bytes
            } else {
                let mut buf = Vec::new();
                File::open(&meta_path)
                    .map_err(|_| SmergeError::NotFound(format!("meta file missing for reduce {reduce_id}")))?
                    .read_to_end(&mut buf)?;
                let bytes = Arc::new(buf);
                cache.insert(meta_path.clone(), bytes.clone());
                bytes
            }
        };

        Ok(MergedBlockMeta { num_chunks, meta_bytes })
    }

    /// §4.6 `get_merged_block_data`.
    pub fn get_merged_block_data(&self, app_id: &str, shuffle_id: i32, merge_id: i32, reduce_id: i32, chunk_id: u32) -> Result<FileSegment> {
        let app = self.app_entry(app_id)?;
        let attempt = app.attempt.read().unwrap();
        let paths = attempt.paths.clone();
        drop(attempt);

        let shuffle = self.shuffle_entry(&app, shuffle_id);
        {
            let mstate = shuffle.merge.read().unwrap();
            if merge_id < mstate.merge_id {
                return Err(SmergeError::StaleBlockFetch);
            }
        }

        let (data_path, index_path, _) = path::resolve_partition_paths(&paths, app_id, shuffle_id, merge_id, reduce_id);

        let index_bytes = {
            let mut cache = self.0.index_cache.lock().unwrap();
            if let Some(bytes) = cache.get(&index_path) {
                bytes
            } else {
                let mut buf = Vec::new();
                File::open(&index_path)
                    .map_err(|_| SmergeError::NotFound(format!("index file missing for reduce {reduce_id}")))?
                    .read_to_end(&mut buf)?;
                let bytes = Arc::new(buf);
                cache.insert(index_path.clone(), bytes.clone());
                bytes
            }
        };

        let read_entry = |i: u32| -> Result<u64> {
            let off = i as usize * 8;
            let slice = index_bytes
                .get(off..off + 8)
                .ok_or_else(|| SmergeError::NotFound(format!("chunk {chunk_id} out of range")))?;
            Ok(u64::from_be_bytes(slice.try_into().unwrap()))
        };

        let start = read_entry(chunk_id)?;
        let end = read_entry(chunk_id + 1)?;

        Ok(FileSegment { path: data_path, offset: start, length: end - start })
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod manager_tests;
