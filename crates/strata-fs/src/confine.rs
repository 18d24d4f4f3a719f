//! Root-confined path resolution.
//!
//! Every name is resolved as if the checkout root were `/`, with symlinks and
//! `..` never leaving it. Two strategies implement this:
//!
//! - **openat2**: the kernel resolves with `RESOLVE_BENEATH`, refusing any
//!   walk that would leave the root (reported as `EXDEV`).
//! - **userspace**: on kernels without `openat2` the name is joined onto the
//!   root's real path with `strict-path`, then the opened handle's real path
//!   is checked against the root's real path. Exclusive and no-follow opens
//!   only resolve the parent that way; the leaf goes to `openat` untouched.
//!
//! The first `ENOSYS` from `openat2` switches the whole process to the
//! userspace strategy for good.

use std::error::Error as _;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use strata_config::{log_confine_debug, log_confine_warn};
use strict_path::{PathBoundary, StrictPathError};

use crate::ensure::open_or_create_dir_under_root;
use crate::error::{FsError, Result};
use crate::path::{clean_relative, proc_path_for_fd, split_name};
use crate::sys;

/// Mode for parent directories created on demand; the layer's own
/// directory entry sets the final mode later.
pub const IMPLICIT_DIR_MODE: u32 = 0o755;

/// Flags whose leaf must never be resolved through a symlink
const LEAF_NOFOLLOW_FLAGS: i32 = libc::O_NOFOLLOW | libc::O_EXCL;

static OPENAT2_UNAVAILABLE: AtomicBool = AtomicBool::new(false);

/// Whether the kernel strategy is still in use
pub fn openat2_available() -> bool {
    !OPENAT2_UNAVAILABLE.load(Ordering::Relaxed)
}

/// Permanently switch this process to userspace resolution.
pub fn disable_openat2() {
    if !OPENAT2_UNAVAILABLE.swap(true, Ordering::Relaxed) {
        log_confine_warn!("openat2 unavailable, falling back to userspace path resolution");
    }
}

fn openat2_beneath(
    dirfd: BorrowedFd<'_>,
    name: &Path,
    flags: i32,
    mode: u32,
) -> io::Result<OwnedFd> {
    let c_name = sys::to_cstring(name.as_os_str())?;
    let flags = flags | libc::O_CLOEXEC;
    let creates = flags & (libc::O_CREAT | libc::O_TMPFILE) != 0;
    // SAFETY: open_how is plain data; all-zero is its "no options" value.
    let mut how: libc::open_how = unsafe { std::mem::zeroed() };
    how.flags = flags as u64;
    // openat2 rejects a mode without O_CREAT/O_TMPFILE
    how.mode = if creates { (mode & 0o7777) as u64 } else { 0 };
    how.resolve = libc::RESOLVE_BENEATH | libc::RESOLVE_NO_MAGICLINKS;
    let ret = unsafe {
        libc::syscall(
            libc::SYS_openat2,
            dirfd.as_raw_fd(),
            c_name.as_ptr(),
            &how as *const libc::open_how,
            std::mem::size_of::<libc::open_how>(),
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: openat2 returned a fresh descriptor.
    Ok(unsafe { OwnedFd::from_raw_fd(ret as i32) })
}

/// Open `name` beneath `root` without any create-retry.
///
/// An empty name (after stripping leading `/` and `./`) yields a duplicate
/// of the root handle. `O_CLOEXEC` is always added.
pub fn open_under_root_raw(
    root: BorrowedFd<'_>,
    name: &Path,
    flags: i32,
    mode: u32,
) -> Result<OwnedFd> {
    let name = clean_relative(name);
    if name.as_os_str().is_empty() {
        return root.try_clone_to_owned().map_err(|e| FsError::io("dup", name, e));
    }

    if openat2_available() {
        match openat2_beneath(root, name, flags, mode) {
            Ok(fd) => return Ok(fd),
            Err(e) if e.raw_os_error() == Some(libc::ENOSYS) => disable_openat2(),
            Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
                return Err(FsError::Escape { path: name.to_path_buf() });
            }
            Err(e) => return Err(FsError::io("open", name, e)),
        }
    }

    open_userspace(root, name, flags, mode)
}

/// Open `name` beneath `root`, creating missing parents when `O_CREAT` is set.
///
/// On `ENOENT` with `O_CREAT` the parent directory chain is created once and
/// the final component is opened relative to it.
pub fn open_under_root(
    root: BorrowedFd<'_>,
    name: &Path,
    flags: i32,
    mode: u32,
) -> Result<OwnedFd> {
    let name = clean_relative(name);
    match open_under_root_raw(root, name, flags, mode) {
        Err(err) if err.is_not_found() && flags & libc::O_CREAT != 0 => {
            let (dir, base) = split_name(name);
            let parent = match open_or_create_dir_under_root(root, dir, IMPLICIT_DIR_MODE) {
                Ok(parent) => parent,
                Err(parent_err) => {
                    log_confine_debug!(
                        "Could not create parent directories",
                        path = tracing::field::display(dir.display()),
                        error = tracing::field::display(&parent_err)
                    );
                    return Err(err);
                }
            };
            open_under_root_raw(parent.as_fd(), Path::new(base), flags, mode).map_err(|e| match e {
                FsError::Io { op, source, .. } => FsError::io(op, name, source),
                other => other,
            })
        }
        other => other,
    }
}

fn open_userspace(root: BorrowedFd<'_>, name: &Path, flags: i32, mode: u32) -> Result<OwnedFd> {
    let root_proc = proc_path_for_fd(root.as_raw_fd());
    let root_real =
        std::fs::read_link(&root_proc).map_err(|e| FsError::io("readlink", &root_proc, e))?;

    let fd = if flags & LEAF_NOFOLLOW_FLAGS != 0 {
        // Resolve only the parent; the leaf is handed to the kernel as is.
        let (dir, base) = split_name(name);
        let parent = if dir.as_os_str().is_empty() {
            root.try_clone_to_owned()
                .map_err(|e| FsError::io("dup", name, e))?
        } else {
            let parent_path = secure_join(&root_real, dir)?;
            sys::open(&parent_path, libc::O_PATH | libc::O_DIRECTORY, 0)
                .map_err(|e| FsError::io("open", dir, e))?
        };
        sys::openat(parent.as_fd(), base, flags, mode).map_err(|e| FsError::io("open", name, e))?
    } else {
        let joined = secure_join(&root_real, name)?;
        sys::open(&joined, flags, mode).map_err(|e| FsError::io("open", name, e))?
    };

    // The join above races with concurrent renames; make sure the handle we
    // ended up with still lives under the root.
    let fd_proc = proc_path_for_fd(fd.as_raw_fd());
    let real = std::fs::read_link(&fd_proc).map_err(|e| FsError::io("readlink", &fd_proc, e))?;
    if !real.as_os_str().as_bytes().starts_with(root_real.as_os_str().as_bytes()) {
        return Err(FsError::Escape { path: name.to_path_buf() });
    }
    Ok(fd)
}

/// Resolve `unsafe_path` under the directory `root` with `strict-path`.
///
/// Symlinks are followed (with cycle detection) and missing trailing
/// components are kept lexically so callers can create them. Anything that
/// resolves outside `root` is an escape.
pub(crate) fn secure_join(root: &Path, unsafe_path: &Path) -> Result<PathBuf> {
    let boundary: PathBoundary = PathBoundary::try_new(root).map_err(|e| join_error(root, e))?;
    let joined = boundary
        .strict_join(unsafe_path)
        .map_err(|e| join_error(unsafe_path, e))?;
    Ok(joined.unstrict())
}

fn join_error(path: &Path, err: StrictPathError) -> FsError {
    if let StrictPathError::PathEscapesBoundary { .. } = err {
        return FsError::Escape { path: path.to_path_buf() };
    }
    let errno = err
        .source()
        .and_then(|source| source.downcast_ref::<io::Error>())
        .and_then(io::Error::raw_os_error);
    let source = match errno {
        Some(errno) => io::Error::from_raw_os_error(errno),
        None => io::Error::other(err.to_string()),
    };
    FsError::io("resolve", path, source)
}
