//! Integration tests for smerge-config
//!
//! These drive the real three-tier load pipeline (`Config::load_for_project`)
//! against global and project config files on disk, rather than re-deriving
//! its merge/override behavior inline.

use std::path::PathBuf;
use tempfile::tempdir;

/// Serializes tests that mutate `HOME`/`SMERGE_*` env vars, which are
/// process-global state `load_for_project` reads.
static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

fn write_smerge_config(dir: &std::path::Path, contents: &str) {
    let smerge_dir = dir.join(".smerge");
    std::fs::create_dir_all(&smerge_dir).unwrap();
    std::fs::write(smerge_dir.join("config.toml"), contents).unwrap();
}

/// Points `global_config_path()` at `home` for the duration of `f`, restoring
/// the previous `HOME` afterwards even if `f` panics.
fn with_home<R>(home: &std::path::Path, f: impl FnOnce() -> R) -> R {
    let prev = std::env::var("HOME").ok();
    std::env::set_var("HOME", home);
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
    match prev {
        Some(h) => std::env::set_var("HOME", h),
        None => std::env::remove_var("HOME"),
    }
    match result {
        Ok(r) => r,
        Err(e) => std::panic::resume_unwind(e),
    }
}

#[test]
fn load_for_project_picks_up_global_config_with_no_project_override() {
    let _guard = ENV_LOCK.lock().unwrap();
    let home = tempdir().unwrap();
    let project = tempdir().unwrap();

    write_smerge_config(
        home.path(),
        r#"
[merge]
min_chunk_size_in_merged_shuffle_file = 1048576
io_exceptions_threshold = 6
local_dirs = ["/data/0", "/data/1"]
"#,
    );

    let config = with_home(home.path(), || {
        smerge_config::Config::load_for_project(project.path()).unwrap()
    });

    assert_eq!(config.merge.min_chunk_size_in_merged_shuffle_file, 1_048_576);
    assert_eq!(config.merge.io_exceptions_threshold, 6);
    assert_eq!(
        config.merge.local_dirs,
        vec![PathBuf::from("/data/0"), PathBuf::from("/data/1")]
    );
}

#[test]
fn load_for_project_merges_project_over_global() {
    let _guard = ENV_LOCK.lock().unwrap();
    let home = tempdir().unwrap();
    let project = tempdir().unwrap();

    write_smerge_config(
        home.path(),
        r#"
[merge]
local_dirs = ["/global/a"]
io_exceptions_threshold = 5
"#,
    );
    write_smerge_config(
        project.path(),
        r#"
[merge]
local_dirs = ["/project/a", "/project/b"]
"#,
    );

    let config = with_home(home.path(), || {
        smerge_config::Config::load_for_project(project.path()).unwrap()
    });

    // Project overrides the field it sets...
    assert_eq!(
        config.merge.local_dirs,
        vec![PathBuf::from("/project/a"), PathBuf::from("/project/b")]
    );
    // ...and the global value survives the merge for the field project left untouched.
    assert_eq!(config.merge.io_exceptions_threshold, 5);
}

#[test]
fn load_for_project_applies_env_override_over_both_files() {
    let _guard = ENV_LOCK.lock().unwrap();
    let home = tempdir().unwrap();
    let project = tempdir().unwrap();

    write_smerge_config(
        home.path(),
        r#"
[merge]
io_exceptions_threshold = 2
"#,
    );
    write_smerge_config(
        project.path(),
        r#"
[merge]
io_exceptions_threshold = 3
"#,
    );

    std::env::set_var("SMERGE_IO_EXCEPTIONS_THRESHOLD", "16");
    let config = with_home(home.path(), || {
        smerge_config::Config::load_for_project(project.path()).unwrap()
    });
    std::env::remove_var("SMERGE_IO_EXCEPTIONS_THRESHOLD");

    assert_eq!(config.merge.io_exceptions_threshold, 16);
}

#[test]
fn load_for_project_fills_in_defaults_for_fields_no_tier_sets() {
    let _guard = ENV_LOCK.lock().unwrap();
    let home = tempdir().unwrap();
    let project = tempdir().unwrap();

    write_smerge_config(
        project.path(),
        r#"
[merge]
io_exceptions_threshold = 9
"#,
    );

    // No global config.toml is written, so that tier is a no-op.
    let config = with_home(home.path(), || {
        smerge_config::Config::load_for_project(project.path()).unwrap()
    });

    assert_eq!(config.merge.io_exceptions_threshold, 9);
    assert_eq!(
        config.merge.merged_index_cache_size,
        smerge_config::MergeConfig::default().merged_index_cache_size
    );
    assert!(!config.daemon.debug);
}

#[test]
fn load_for_project_with_no_files_and_no_env_returns_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    let home = tempdir().unwrap();
    let project = tempdir().unwrap();

    let config = with_home(home.path(), || {
        smerge_config::Config::load_for_project(project.path()).unwrap()
    });

    let default = smerge_config::Config::default();
    assert_eq!(
        config.merge.io_exceptions_threshold,
        default.merge.io_exceptions_threshold
    );
    assert_eq!(config.merge.local_dirs, default.merge.local_dirs);
    assert_eq!(config.daemon.debug, default.daemon.debug);
}
