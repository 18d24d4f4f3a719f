//! Test environment abstraction for isolated extraction tests.
//!
//! Provides `TestEnvironment` to manage:
//! - An isolated checkout root
//! - A content directory holding dedup/copy sources
//! - An "outside" directory that adversarial entries try to reach
//!
//! # Usage
//!
//! ```ignore
//! use strata_config::testing::TestEnvironment;
//!
//! let env = TestEnvironment::new()?;
//! let root = env.open_root()?;
//! // materialize entries under `root`, then:
//! assert!(env.outside_is_untouched()?);
//! ```

use std::fs::File;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Name of the canary file planted in the outside directory
pub const CANARY: &str = "canary";

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Checkout root every entry must stay under
    pub root: PathBuf,
    /// Directory holding content sources
    pub content_dir: PathBuf,
    /// Sibling of the root, the escape target for adversarial entries
    pub outside: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let base = temp_dir.path();

        let root = base.join(format!("rootfs-{}", test_id));
        let content_dir = base.join("content");
        let outside = base.join("outside");

        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(&content_dir)?;
        std::fs::create_dir_all(&outside)?;
        std::fs::write(outside.join(CANARY), b"untouched")?;

        Ok(Self {
            _temp_dir: temp_dir,
            root,
            content_dir,
            outside,
            test_id,
        })
    }

    /// Open the checkout root as a directory handle
    pub fn open_root(&self) -> anyhow::Result<OwnedFd> {
        Ok(OwnedFd::from(File::open(&self.root)?))
    }

    /// Create a content source file and return an open handle to it
    pub fn create_content(&self, name: &str, content: &[u8]) -> anyhow::Result<File> {
        let path = self.content_dir.join(name);
        std::fs::write(&path, content)?;
        Ok(File::open(path)?)
    }

    /// Create a file directly under the root, bypassing confinement
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.root.join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Create a directory directly under the root
    pub fn create_dir(&self, relative_path: &str) -> anyhow::Result<PathBuf> {
        let path = self.root.join(relative_path);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Absolute path of an entry under the root
    pub fn path(&self, relative_path: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative_path)
    }

    /// True when the outside directory still holds only the untouched canary
    pub fn outside_is_untouched(&self) -> anyhow::Result<bool> {
        let entries: Vec<_> = std::fs::read_dir(&self.outside)?.collect::<Result<_, _>>()?;
        let canary = std::fs::read(self.outside.join(CANARY))?;
        Ok(entries.len() == 1 && canary == b"untouched")
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
