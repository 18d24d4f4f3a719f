//! Whiteout markers for overlay-style layer storage.
//!
//! Layer converters express deletions as overlay whiteouts: a `0:0` character
//! device for a removed entry, and an "opaque" xattr on a directory whose
//! lower contents are hidden. The [`WhiteoutOps`] seam lets converters emit
//! those markers without knowing how paths are confined.

use std::ffi::CString;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::Path;

use strata_config::log_fs_trace;

use crate::confine::{open_under_root, IMPLICIT_DIR_MODE};
use crate::ensure::open_or_create_dir_under_root;
use crate::error::{chown_error, FsError, Result};
use crate::path::{clean_relative, split_name};
use crate::sys;

/// Xattr marking a directory opaque (privileged overlay)
pub const OVERLAY_OPAQUE_XATTR: &str = "trusted.overlay.opaque";

/// Xattr marking a directory opaque (unprivileged overlay with `userxattr`)
pub const OVERLAY_USER_OPAQUE_XATTR: &str = "user.overlay.opaque";

/// Operations a layer converter needs to write whiteouts
pub trait WhiteoutOps {
    /// Set an xattr on the directory at `path`, creating it if missing
    fn setxattr(&self, path: &Path, name: &str, value: &[u8]) -> Result<()>;

    /// Create a device node or FIFO at `path`, creating missing parents
    fn mknod(&self, path: &Path, mode: u32, dev: u64) -> Result<()>;

    /// Change the owner of the entry at `path` without following a symlink leaf
    fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()>;

    /// Mark `path` as deleted
    fn whiteout(&self, path: &Path) -> Result<()> {
        self.mknod(path, libc::S_IFCHR, 0)
    }

    /// Hide the lower layers' contents of directory `path`
    fn mark_opaque(&self, path: &Path, xattr: &str) -> Result<()> {
        self.setxattr(path, xattr, b"y")
    }
}

/// [`WhiteoutOps`] confined to a checkout root
pub struct WhiteoutHandler<'a> {
    root: BorrowedFd<'a>,
}

impl<'a> WhiteoutHandler<'a> {
    pub fn new(root: BorrowedFd<'a>) -> Self {
        Self { root }
    }
}

impl WhiteoutOps for WhiteoutHandler<'_> {
    fn setxattr(&self, path: &Path, name: &str, value: &[u8]) -> Result<()> {
        let dir = open_or_create_dir_under_root(self.root, path, IMPLICIT_DIR_MODE)?;
        let c_name = CString::new(name).map_err(|_| FsError::XattrName { name: name.to_string() })?;
        sys::fsetxattr(dir.as_fd(), &c_name, value).map_err(|source| FsError::SetXattr {
            name: name.to_string(),
            path: clean_relative(path).to_path_buf(),
            source,
        })
    }

    fn mknod(&self, path: &Path, mode: u32, dev: u64) -> Result<()> {
        let name = clean_relative(path);
        let (dir, base) = split_name(name);
        let parent = open_or_create_dir_under_root(self.root, dir, IMPLICIT_DIR_MODE)?;
        sys::mknodat(parent.as_fd(), base, mode, dev).map_err(|e| FsError::io("mknod", name, e))
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        let name = clean_relative(path);
        let fd = open_under_root(self.root, name, libc::O_PATH | libc::O_NOFOLLOW, 0)?;
        let Err(err) = sys::fchown_empty_path(fd.as_fd(), uid, gid) else {
            return Ok(());
        };

        // Already owned as requested (e.g. a rootless run that cannot chown
        // at all): nothing to do.
        if let Ok(st) = sys::fstat(fd.as_fd()) {
            if st.st_uid == uid && st.st_gid == gid {
                log_fs_trace!(
                    "Chown failed but ownership already matches",
                    path = tracing::field::display(name.display())
                );
                return Ok(());
            }
        }
        Err(chown_error(name, uid, gid, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::os::fd::OwnedFd;
    use std::os::unix::fs::{FileTypeExt, MetadataExt};
    use tempfile::TempDir;

    fn root(tmp: &TempDir) -> OwnedFd {
        OwnedFd::from(File::open(tmp.path()).unwrap())
    }

    #[test]
    fn test_mknod_fifo_creates_parents() {
        let tmp = TempDir::new().unwrap();
        let root = root(&tmp);
        let handler = WhiteoutHandler::new(root.as_fd());

        handler
            .mknod(Path::new("run/a/pipe"), libc::S_IFIFO | 0o644, 0)
            .unwrap();
        let meta = std::fs::symlink_metadata(tmp.path().join("run/a/pipe")).unwrap();
        assert!(meta.file_type().is_fifo());
    }

    #[test]
    fn test_chown_to_current_owner_succeeds() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("f"), b"x").unwrap();
        let meta = std::fs::metadata(tmp.path().join("f")).unwrap();
        let root = root(&tmp);

        WhiteoutHandler::new(root.as_fd())
            .chown(Path::new("/f"), meta.uid(), meta.gid())
            .unwrap();
    }

    #[test]
    fn test_chown_does_not_follow_symlink_leaf() {
        let tmp = TempDir::new().unwrap();
        std::os::unix::fs::symlink("/nonexistent", tmp.path().join("dangling")).unwrap();
        let meta = std::fs::symlink_metadata(tmp.path().join("dangling")).unwrap();
        let root = root(&tmp);

        WhiteoutHandler::new(root.as_fd())
            .chown(Path::new("dangling"), meta.uid(), meta.gid())
            .unwrap();
    }

    #[test]
    fn test_chown_missing_entry_fails() {
        let tmp = TempDir::new().unwrap();
        let root = root(&tmp);
        let err = WhiteoutHandler::new(root.as_fd())
            .chown(Path::new("missing"), 0, 0)
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
