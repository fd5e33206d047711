//! # smerge-config
//!
//! Configuration management for the shuffle merge service.
//!
//! Loads configuration from:
//! 1. `~/.smerge/config.toml` (global)
//! 2. `.smerge/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod path;
pub mod testing;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| {
    RwLock::new(Config::load().unwrap_or_else(|e| {
        eprintln!(
            "[smerge-config] WARNING: Failed to load config: {}. Using defaults.",
            e
        );
        Config::default()
    }))
});

/// Default Unix socket path for `smerged`.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/smerged.sock";

/// Get global config (read-only)
pub fn config() -> std::sync::RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap()
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap() = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Current config schema version
pub const CONFIG_VERSION: u32 = 1;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Config schema version (for forward compatibility)
    pub config_version: u32,
    pub merge: MergeConfig,
    pub daemon: DaemonConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: CONFIG_VERSION,
            merge: MergeConfig::default(),
            daemon: DaemonConfig::default(),
        }
    }
}

impl Config {
    /// Load config from standard locations (CWD-relative project config)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_for_project(Path::new("."))
    }

    /// Load config for a specific project root directory.
    /// Resolution order: global → project → env vars.
    pub fn load_for_project(project_root: &Path) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Load global config (~/.smerge/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                let contents = std::fs::read_to_string(&global_path)?;
                config = toml::from_str(&contents)?;
            }
        }

        // 2. Load project config (<project_root>/.smerge/config.toml)
        let project_config_path = project_root.join(".smerge/config.toml");
        if project_config_path.exists() {
            debug!("Loading project config from {:?}", project_config_path);
            let contents = std::fs::read_to_string(&project_config_path)?;
            let project_config: Config = toml::from_str(&contents)?;
            config.merge(project_config);
        }

        // 3. Apply environment variable overrides
        config.apply_env_overrides();

        // 4. Validate socket path: if parent dir doesn't exist and can't be
        //    created, fall back to the default so all components resolve to
        //    the same socket.
        if let Some(parent) = config.daemon.socket.parent() {
            if !parent.as_os_str().is_empty()
                && !parent.exists()
                && std::fs::create_dir_all(parent).is_err()
            {
                debug!(
                    "Socket directory {:?} unavailable, falling back to {}",
                    parent, DEFAULT_SOCKET_PATH
                );
                config.daemon.socket = PathBuf::from(DEFAULT_SOCKET_PATH);
            }
        }

        Ok(config)
    }

    /// Global config path: ~/.smerge/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".smerge/config.toml"))
    }

    /// Merge another config (project overrides global). Non-default values
    /// from `other` replace values in `self`.
    fn merge(&mut self, other: Config) {
        let default_merge = MergeConfig::default();
        if other.merge.min_chunk_size_in_merged_shuffle_file
            != default_merge.min_chunk_size_in_merged_shuffle_file
        {
            self.merge.min_chunk_size_in_merged_shuffle_file =
                other.merge.min_chunk_size_in_merged_shuffle_file;
        }
        if other.merge.io_exceptions_threshold != default_merge.io_exceptions_threshold {
            self.merge.io_exceptions_threshold = other.merge.io_exceptions_threshold;
        }
        if other.merge.merged_index_cache_size != default_merge.merged_index_cache_size {
            self.merge.merged_index_cache_size = other.merge.merged_index_cache_size;
        }
        if !other.merge.local_dirs.is_empty() {
            self.merge.local_dirs = other.merge.local_dirs;
        }
        if other.merge.sub_dirs_per_local_dir != default_merge.sub_dirs_per_local_dir {
            self.merge.sub_dirs_per_local_dir = other.merge.sub_dirs_per_local_dir;
        }

        let default_daemon = DaemonConfig::default();
        if other.daemon.socket != default_daemon.socket {
            self.daemon.socket = other.daemon.socket;
        }
        if other.daemon.debug != default_daemon.debug {
            self.daemon.debug = other.daemon.debug;
        }
    }

    /// Apply environment variable overrides (highest priority)
    fn apply_env_overrides(&mut self) {
        if let Ok(bytes) = std::env::var("SMERGE_MIN_CHUNK_SIZE") {
            if let Ok(n) = bytes.parse() {
                self.merge.min_chunk_size_in_merged_shuffle_file = n;
            }
        }
        if let Ok(n) = std::env::var("SMERGE_IO_EXCEPTIONS_THRESHOLD") {
            if let Ok(n) = n.parse() {
                self.merge.io_exceptions_threshold = n;
            }
        }
        if let Ok(bytes) = std::env::var("SMERGE_INDEX_CACHE_SIZE") {
            if let Ok(n) = bytes.parse() {
                self.merge.merged_index_cache_size = n;
            }
        }
        if let Ok(dirs) = std::env::var("SMERGE_LOCAL_DIRS") {
            self.merge.local_dirs = std::env::split_paths(&dirs).collect();
        }
        if let Ok(socket) = std::env::var("SMERGE_SOCKET_PATH") {
            self.daemon.socket = PathBuf::from(socket);
        }
        if std::env::var("SMERGE_DEBUG").is_ok() {
            self.daemon.debug = true;
        }
    }

    /// Generate TOML template for a new deployment.
    pub fn init_toml() -> String {
        let default = Config::default();
        format!(
            r#"# smerged configuration
config_version = 1

[merge]
min_chunk_size_in_merged_shuffle_file = {min_chunk}
io_exceptions_threshold = {threshold}
merged_index_cache_size = {cache_size}
local_dirs = ["/tmp/smerge"]
sub_dirs_per_local_dir = {sub_dirs}

[daemon]
# socket = "{socket}"
# debug = false
"#,
            min_chunk = default.merge.min_chunk_size_in_merged_shuffle_file,
            threshold = default.merge.io_exceptions_threshold,
            cache_size = default.merge.merged_index_cache_size,
            sub_dirs = default.merge.sub_dirs_per_local_dir,
            socket = default.daemon.socket.display(),
        )
    }

    // ========== Convenience Accessors ==========

    pub fn socket_path(&self) -> &Path {
        &self.daemon.socket
    }

    pub fn debug_mode(&self) -> bool {
        self.daemon.debug
    }
}

/// Merge-engine tuning knobs (§6 external interfaces).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Minimum bytes accumulated before a chunk boundary is cut in the
    /// merged file's index/meta sidecars.
    pub min_chunk_size_in_merged_shuffle_file: u64,
    /// Number of swallowed I/O exceptions a partition tolerates before it
    /// is permanently aborted.
    pub io_exceptions_threshold: u32,
    /// Byte-weight bound of the shared index/meta read cache.
    pub merged_index_cache_size: u64,
    /// Local directories partitions fan out across.
    pub local_dirs: Vec<PathBuf>,
    /// Subdirectory fanout width within each local directory.
    pub sub_dirs_per_local_dir: i32,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            min_chunk_size_in_merged_shuffle_file: 2 * 1024 * 1024,
            io_exceptions_threshold: 4,
            merged_index_cache_size: 16 * 1024 * 1024,
            local_dirs: vec![std::env::temp_dir().join("smerge")],
            sub_dirs_per_local_dir: 64,
        }
    }
}

/// Daemon transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Unix socket path `smerged` listens on
    pub socket: PathBuf,
    /// Enable debug mode
    pub debug: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from(DEFAULT_SOCKET_PATH),
            debug: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn test_default_config_has_all_sections() {
        let config = Config::default();
        assert_eq!(config.merge.min_chunk_size_in_merged_shuffle_file, 2 * 1024 * 1024);
        assert_eq!(config.merge.io_exceptions_threshold, 4);
        assert_eq!(config.merge.merged_index_cache_size, 16 * 1024 * 1024);
        assert_eq!(config.merge.sub_dirs_per_local_dir, 64);
        assert!(!config.daemon.debug);
        assert_eq!(config.daemon.socket, PathBuf::from(DEFAULT_SOCKET_PATH));
    }

    #[test]
    fn test_toml_roundtrip_preserves_all_values() {
        let original = Config::default();
        let toml_str = toml::to_string(&original).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(
            original.merge.min_chunk_size_in_merged_shuffle_file,
            parsed.merge.min_chunk_size_in_merged_shuffle_file
        );
        assert_eq!(original.merge.io_exceptions_threshold, parsed.merge.io_exceptions_threshold);
        assert_eq!(original.daemon.debug, parsed.daemon.debug);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let partial_toml = r#"
[merge]
io_exceptions_threshold = 10
"#;
        let config: Config = toml::from_str(partial_toml).unwrap();
        assert_eq!(config.merge.io_exceptions_threshold, 10);
        assert_eq!(
            config.merge.min_chunk_size_in_merged_shuffle_file,
            MergeConfig::default().min_chunk_size_in_merged_shuffle_file
        );
    }

    #[test]
    fn test_merge_replaces_non_default_local_dirs() {
        let mut base = Config::default();
        let mut overlay = Config::default();
        overlay.merge.local_dirs = vec![PathBuf::from("/custom/dir")];
        base.merge(overlay);
        assert_eq!(base.merge.local_dirs, vec![PathBuf::from("/custom/dir")]);
    }

    #[test]
    fn test_merge_preserves_base_when_overlay_empty() {
        let mut base = Config::default();
        base.merge.local_dirs = vec![PathBuf::from("/kept")];
        let mut overlay = Config::default();
        overlay.merge.local_dirs = vec![];
        base.merge(overlay);
        assert_eq!(base.merge.local_dirs, vec![PathBuf::from("/kept")]);
    }

    #[test]
    fn test_env_override_io_exceptions_threshold() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut config = Config::default();
        std::env::set_var("SMERGE_IO_EXCEPTIONS_THRESHOLD", "9");
        config.apply_env_overrides();
        std::env::remove_var("SMERGE_IO_EXCEPTIONS_THRESHOLD");
        assert_eq!(config.merge.io_exceptions_threshold, 9);
    }

    #[test]
    fn test_env_override_invalid_threshold_ignored() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut config = Config::default();
        std::env::set_var("SMERGE_IO_EXCEPTIONS_THRESHOLD", "not_a_number");
        config.apply_env_overrides();
        std::env::remove_var("SMERGE_IO_EXCEPTIONS_THRESHOLD");
        assert_eq!(config.merge.io_exceptions_threshold, MergeConfig::default().io_exceptions_threshold);
    }

    #[test]
    fn test_global_config_path_exists() {
        let path = Config::global_config_path();
        assert!(path.is_some());
        assert!(path.unwrap().ends_with(".smerge/config.toml"));
    }

    #[test]
    fn test_empty_config_uses_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        let default_config = Config::default();
        assert_eq!(
            config.merge.io_exceptions_threshold,
            default_config.merge.io_exceptions_threshold
        );
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let result: Result<Config, _> = toml::from_str("invalid { toml }");
        assert!(result.is_err());
    }

    #[test]
    fn test_init_toml_includes_all_sections() {
        let toml_str = Config::init_toml();
        assert!(toml_str.contains("[merge]"));
        assert!(toml_str.contains("[daemon]"));
    }
}
