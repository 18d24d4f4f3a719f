//! Creating layer entries beneath a root.
//!
//! Each function creates exactly one entry. Parents are created on demand;
//! attributes are applied after the entry exists (and, for regular files,
//! only after the caller has finished writing content).

use std::ffi::OsStr;
use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::path::Path;

use nix::sys::stat::makedev;
use strata_config::{log_fs_debug, log_fs_trace, ExtractOptions};

use crate::attrs::set_file_attrs;
use crate::confine::{open_under_root, open_under_root_raw, IMPLICIT_DIR_MODE};
use crate::copy::{copy_contents, CopyMethod};
use crate::ensure::open_or_create_dir_under_root;
use crate::entry::FileMetadata;
use crate::error::{FsError, Result};
use crate::path::{clean_relative, proc_path_for_fd, split_name};
use crate::sys;

/// Flags for a brand new regular file
pub const NEW_FILE_FLAGS: i32 = libc::O_CREAT | libc::O_EXCL | libc::O_TRUNC | libc::O_WRONLY;

/// A regular file that has been put in place
#[derive(Debug)]
pub struct Materialized {
    /// Writable handle to the new file; `None` when the content was hardlinked
    pub file: Option<File>,
    pub size: u64,
    pub method: CopyMethod,
}

/// Hardlink the object behind `src` to `base` inside `dest_dir`.
///
/// Goes through `/proc/self/fd` so `src` may be an `O_PATH` handle, including
/// one to a symlink. An existing entry at the destination is replaced once.
pub(crate) fn link_fd(
    src: BorrowedFd<'_>,
    dest_dir: BorrowedFd<'_>,
    base: &OsStr,
) -> io::Result<()> {
    let src_path = proc_path_for_fd(src.as_raw_fd());
    match sys::linkat_follow(&src_path, dest_dir, base) {
        Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
            let _ = sys::unlinkat(dest_dir, base);
            sys::linkat_follow(&src_path, dest_dir, base)
        }
        other => other,
    }
}

/// Remove a non-directory entry beneath `root`; a missing entry is fine.
fn remove_under_root(root: BorrowedFd<'_>, name: &Path) -> Result<()> {
    let (dir, base) = split_name(name);
    let parent = open_under_root(root, dir, libc::O_PATH | libc::O_DIRECTORY, 0)?;
    match sys::unlinkat(parent.as_fd(), base) {
        Err(e) if e.raw_os_error() != Some(libc::ENOENT) => Err(FsError::io("unlink", name, e)),
        _ => Ok(()),
    }
}

/// Create a fresh, empty regular file, replacing an existing non-directory
/// entry once.
pub fn create_empty_file(root: BorrowedFd<'_>, metadata: &FileMetadata) -> Result<File> {
    let name = clean_relative(metadata.path());
    let mode = metadata.permissions();
    let fd = match open_under_root(root, name, NEW_FILE_FLAGS, mode) {
        Err(err) if err.errno() == Some(libc::EEXIST) => {
            remove_under_root(root, name)?;
            open_under_root(root, name, NEW_FILE_FLAGS, mode)?
        }
        other => other?,
    };
    Ok(File::from(fd))
}

/// Put a regular file's content in place from an open `source`.
///
/// With `use_hardlinks` the source itself is linked into place first; on
/// success `metadata.skip_set_attrs` is set, because the inode is shared and
/// its attributes belong to whoever created it. Otherwise a new file is
/// created and the content copied (reflink, `copy_file_range`, then
/// read/write), and the returned handle is ready for attributes.
pub fn create_regular_file(
    root: BorrowedFd<'_>,
    metadata: &mut FileMetadata,
    source: BorrowedFd<'_>,
    use_hardlinks: bool,
) -> Result<Materialized> {
    let name = clean_relative(metadata.path()).to_path_buf();
    let src = File::from(
        source
            .try_clone_to_owned()
            .map_err(|e| FsError::io("dup", &name, e))?,
    );
    let size = src
        .metadata()
        .map_err(|e| FsError::io("stat", &name, e))?
        .len();

    if use_hardlinks {
        let (dir, base) = split_name(&name);
        let linked = open_or_create_dir_under_root(root, dir, IMPLICIT_DIR_MODE)
            .and_then(|dest_dir| {
                link_fd(source, dest_dir.as_fd(), base).map_err(|e| FsError::io("link", &name, e))
            });
        match linked {
            Ok(()) => {
                metadata.skip_set_attrs = true;
                log_fs_trace!(
                    "Deduplicated by hardlink",
                    path = tracing::field::display(name.display()),
                    size = size
                );
                return Ok(Materialized {
                    file: None,
                    size,
                    method: CopyMethod::Hardlink,
                });
            }
            Err(e) => log_fs_debug!(
                "Hardlink dedup failed, copying content",
                path = tracing::field::display(name.display()),
                error = tracing::field::display(&e)
            ),
        }
    }

    let dst = create_empty_file(root, metadata)?;
    let method = copy_contents(&src, &dst, size).map_err(|e| FsError::io("copy", &name, e))?;
    log_fs_trace!(
        "Copied content",
        path = tracing::field::display(name.display()),
        size = size,
        method = tracing::field::display(method)
    );
    Ok(Materialized {
        file: Some(dst),
        size,
        method,
    })
}

/// Create a hardlink entry at `metadata.name` to the existing
/// `metadata.linkname`, then apply attributes.
///
/// The link target is never followed: a hardlink to a symlink links the
/// symlink itself, and attributes are then applied through the parent.
pub fn create_hardlink(
    root: BorrowedFd<'_>,
    metadata: &FileMetadata,
    options: &ExtractOptions,
) -> Result<()> {
    let name = clean_relative(metadata.path());
    let target = clean_relative(Path::new(&metadata.linkname));
    if target.as_os_str().is_empty() {
        return Err(FsError::InvalidEntry {
            path: name.to_path_buf(),
            reason: "hardlink without a target",
        });
    }

    let source_flags = libc::O_PATH | libc::O_RDONLY | libc::O_NOFOLLOW;
    let source = open_under_root(root, target, source_flags, 0)?;

    let (dir, base) = split_name(name);
    let dest_dir = open_or_create_dir_under_root(root, dir, IMPLICIT_DIR_MODE)?;
    link_fd(source.as_fd(), dest_dir.as_fd(), base).map_err(|source| FsError::Link {
        name: name.to_path_buf(),
        target: target.to_path_buf(),
        source,
    })?;

    let mode = metadata.permissions();
    match open_under_root(root, name, libc::O_RDONLY | libc::O_NONBLOCK | libc::O_NOFOLLOW, 0) {
        Ok(fd) => set_file_attrs(root, fd.as_fd(), mode, metadata, options, false),
        Err(err) if err.errno() == Some(libc::ELOOP) => {
            let fd = open_under_root(root, name, libc::O_PATH | libc::O_NOFOLLOW, 0)?;
            set_file_attrs(root, fd.as_fd(), mode, metadata, options, true)
        }
        Err(err) => Err(err),
    }
}

/// Create a symlink entry. The target is stored as written and never
/// resolved; only the link's own parent is confined.
pub fn create_symlink(
    root: BorrowedFd<'_>,
    metadata: &FileMetadata,
    options: &ExtractOptions,
) -> Result<()> {
    let name = clean_relative(metadata.path());
    let (dir, base) = split_name(name);
    let parent = open_or_create_dir_under_root(root, dir, IMPLICIT_DIR_MODE)?;

    sys::symlinkat(OsStr::new(&metadata.linkname), parent.as_fd(), base).map_err(|source| {
        FsError::Symlink {
            name: name.to_path_buf(),
            target: metadata.linkname.clone().into(),
            source,
        }
    })?;

    let link = open_under_root_raw(
        parent.as_fd(),
        Path::new(base),
        libc::O_PATH | libc::O_NOFOLLOW,
        0,
    )?;
    set_file_attrs(root, link.as_fd(), metadata.permissions(), metadata, options, true)
}

/// Create (or reuse) a directory entry and apply its attributes.
pub fn create_directory(
    root: BorrowedFd<'_>,
    metadata: &FileMetadata,
    options: &ExtractOptions,
) -> Result<()> {
    let name = clean_relative(metadata.path());
    let mode = metadata.permissions();
    let (dir, base) = split_name(name);

    let fd = if base.is_empty() {
        // the root itself
        root.try_clone_to_owned().map_err(|e| FsError::io("dup", name, e))?
    } else {
        let parent = open_or_create_dir_under_root(root, dir, IMPLICIT_DIR_MODE)?;
        match sys::mkdirat(parent.as_fd(), base, mode) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {}
            Err(e) => return Err(FsError::io("mkdir", name, e)),
        }
        open_under_root_raw(parent.as_fd(), Path::new(base), libc::O_DIRECTORY | libc::O_RDONLY, 0)?
    };

    set_file_attrs(root, fd.as_fd(), mode, metadata, options, false)
}

/// Create a character device, block device or FIFO entry.
pub fn create_special(
    root: BorrowedFd<'_>,
    metadata: &FileMetadata,
    options: &ExtractOptions,
) -> Result<()> {
    let name = clean_relative(metadata.path());
    let Some(type_bits) = metadata.entry_type.node_type_bits() else {
        return Err(FsError::InvalidEntry {
            path: name.to_path_buf(),
            reason: "not a device or fifo entry",
        });
    };

    let (dir, base) = split_name(name);
    let parent = open_or_create_dir_under_root(root, dir, IMPLICIT_DIR_MODE)?;
    let dev = makedev(metadata.dev_major.into(), metadata.dev_minor.into());
    sys::mknodat(parent.as_fd(), base, type_bits | metadata.permissions(), dev)
        .map_err(|e| FsError::io("mknod", name, e))?;

    let node = open_under_root_raw(
        parent.as_fd(),
        Path::new(base),
        libc::O_PATH | libc::O_NOFOLLOW,
        0,
    )?;
    set_file_attrs(root, node.as_fd(), metadata.permissions(), metadata, options, true)
}

/// Extend `file` by `size` bytes of hole from its current position.
///
/// The file ends up exactly `position + size` bytes long and the cursor sits
/// at the new end, ready for the next chunk.
pub fn append_hole(file: &mut File, size: u64) -> io::Result<()> {
    let delta = i64::try_from(size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "hole too large"))?;
    let end = file.seek(SeekFrom::Current(delta))?;
    file.set_len(end)
}
