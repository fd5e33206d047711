//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage an isolated socket path, local
//! directories, and working directory per test.
//!
//! # Usage
//!
//! ```ignore
//! use smerge_config::testing::TestEnvironment;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     // env.socket_path, env.local_dirs are isolated per test
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths.
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Unique socket path for this test
    pub socket_path: PathBuf,
    /// Isolated local directories partitions fan out across
    pub local_dirs: Vec<PathBuf>,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let local_dir = root.join("local0");
        std::fs::create_dir_all(&local_dir)?;

        let socket_path = root.join(format!("smerge-test-{}.sock", test_id));

        Ok(Self {
            _temp_dir: temp_dir,
            socket_path,
            local_dirs: vec![local_dir],
            test_id,
        })
    }

    /// Build a `Config` pointed at this test environment's paths.
    pub fn config(&self) -> crate::Config {
        let mut cfg = crate::Config::default();
        cfg.daemon.socket = self.socket_path.clone();
        cfg.merge.local_dirs = self.local_dirs.clone();
        cfg
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
