//! Directory chains under a root.

use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::Path;

use crate::confine::open_under_root_raw;
use crate::error::{FsError, Result};
use crate::path::{clean_relative, split_name};
use crate::sys;

const DIR_FLAGS: i32 = libc::O_DIRECTORY | libc::O_RDONLY;

/// Open directory `name` beneath `root`, creating it and any missing
/// ancestors with `mode`.
///
/// Idempotent: existing directories are reused, and losing a creation race
/// to a concurrent caller (`EEXIST`) is not an error.
pub fn open_or_create_dir_under_root(
    root: BorrowedFd<'_>,
    name: &Path,
    mode: u32,
) -> Result<OwnedFd> {
    let name = clean_relative(name);
    let err = match open_under_root_raw(root, name, DIR_FLAGS, 0) {
        Ok(fd) => return Ok(fd),
        Err(err) if err.is_not_found() => err,
        Err(err) => return Err(err),
    };

    let (parent, base) = split_name(name);
    if base.is_empty() {
        return Err(err);
    }
    let parent_fd = open_or_create_dir_under_root(root, parent, mode)?;

    match sys::mkdirat(parent_fd.as_fd(), base, mode) {
        Ok(()) => {}
        Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {}
        Err(e) => return Err(FsError::io("mkdir", name, e)),
    }

    open_under_root_raw(parent_fd.as_fd(), Path::new(base), DIR_FLAGS, 0)
}
