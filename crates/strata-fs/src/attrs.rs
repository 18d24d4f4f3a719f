//! Ownership, xattrs, timestamps and mode for a materialized entry.
//!
//! Applied in a fixed order: chown, xattrs, utimes, chmod. chmod goes last so
//! a chown cannot clear setuid/setgid bits afterwards. Filesystems that lack
//! xattr, timestamp or mode support are tolerated; a failed chown is not,
//! unless the caller opted into ignoring it.

use std::ffi::{CStr, CString, OsString};
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use nix::sys::time::TimeSpec;
use strata_config::{log_fs_debug, ExtractOptions};

use crate::confine::open_under_root;
use crate::entry::{to_timespec, EntryType, FileMetadata};
use crate::error::{chown_error, is_unsupported_errno, FsError, Result};
use crate::path::{clean_relative, proc_path_for_fd, split_name};
use crate::sys;

/// Extended attributes never copied from a layer
pub const XATTRS_TO_IGNORE: &[&str] = &["security.selinux"];

/// Where attribute syscalls are aimed.
enum AttrTarget<'a> {
    /// An open, non-`O_PATH` handle to the object itself
    Handle(BorrowedFd<'a>),
    /// Parent directory plus final name, never following a symlink leaf
    At { parent: OwnedFd, base: OsString },
}

impl AttrTarget<'_> {
    fn chown(&self, uid: u32, gid: u32) -> io::Result<()> {
        match self {
            AttrTarget::Handle(fd) => sys::fchown(*fd, uid, gid),
            AttrTarget::At { parent, base } => {
                sys::fchownat_nofollow(parent.as_fd(), base, uid, gid)
            }
        }
    }

    fn set_xattr(&self, name: &CStr, value: &[u8]) -> io::Result<()> {
        match self {
            AttrTarget::Handle(fd) => sys::fsetxattr(*fd, name, value),
            AttrTarget::At { parent, base } => {
                let path = proc_path_for_fd(parent.as_raw_fd()).join(base);
                sys::lsetxattr(&path, name, value)
            }
        }
    }

    fn set_times(&self, atime: &TimeSpec, mtime: &TimeSpec) -> io::Result<()> {
        match self {
            AttrTarget::Handle(fd) => {
                sys::utimensat_path(&proc_path_for_fd(fd.as_raw_fd()), atime, mtime)
            }
            AttrTarget::At { parent, base } => {
                sys::utimensat_nofollow(parent.as_fd(), base, atime, mtime)
            }
        }
    }

    /// The kernel refuses `user.*` xattrs on symlinks and device nodes with
    /// `EPERM`; only the path route can reach those.
    fn tolerates(&self, xattr: &str, err: &io::Error) -> bool {
        match err.raw_os_error() {
            Some(errno) if is_unsupported_errno(errno) => true,
            Some(libc::EPERM) => {
                matches!(self, AttrTarget::At { .. }) && xattr.starts_with("user.")
            }
            _ => false,
        }
    }

    fn chmod(&self, mode: u32) -> io::Result<()> {
        match self {
            AttrTarget::Handle(fd) => sys::fchmod(*fd, mode),
            AttrTarget::At { parent, base } => sys::fchmodat_nofollow(parent.as_fd(), base, mode),
        }
    }
}

/// Decode every xattr up front so a malformed value fails the entry before
/// anything on disk changes.
fn decode_xattrs(metadata: &FileMetadata) -> Result<Vec<(String, CString, Vec<u8>)>> {
    metadata
        .xattrs
        .iter()
        .filter(|(name, _)| !XATTRS_TO_IGNORE.contains(&name.as_str()))
        .map(|(name, encoded)| {
            let value = STANDARD.decode(encoded).map_err(|source| FsError::XattrDecode {
                name: name.clone(),
                source,
            })?;
            let c_name = CString::new(name.as_bytes())
                .map_err(|_| FsError::XattrName { name: name.clone() })?;
            Ok((name.clone(), c_name, value))
        })
        .collect()
}

fn soft_fail(op: &'static str, name: &Path, result: io::Result<()>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error().is_some_and(is_unsupported_errno) => {
            log_fs_debug!(
                "Filesystem does not support operation, skipping",
                op = op,
                path = tracing::field::display(name.display())
            );
            Ok(())
        }
        Err(e) => Err(FsError::io(op, name, e)),
    }
}

/// Apply the entry's ownership, xattrs, timestamps and `mode` to `file`.
///
/// `file` must not be an `O_PATH` handle unless `use_path` is set. With
/// `use_path` (always for symlinks) the entry is addressed through its parent
/// directory and name instead, without following a symlink leaf.
///
/// Does nothing when `metadata.skip_set_attrs` is set.
pub fn set_file_attrs(
    root: BorrowedFd<'_>,
    file: BorrowedFd<'_>,
    mode: u32,
    metadata: &FileMetadata,
    options: &ExtractOptions,
    use_path: bool,
) -> Result<()> {
    if metadata.skip_set_attrs {
        return Ok(());
    }

    let name = clean_relative(metadata.path());
    let xattrs = decode_xattrs(metadata)?;

    let target = if use_path || metadata.entry_type == EntryType::Symlink {
        let (dir, base) = split_name(name);
        let parent = open_under_root(root, dir, libc::O_PATH | libc::O_DIRECTORY, 0)?;
        AttrTarget::At {
            parent,
            base: base.to_os_string(),
        }
    } else {
        AttrTarget::Handle(file)
    };

    if let Err(e) = target.chown(metadata.uid, metadata.gid) {
        if !options.ignore_chown_errors {
            return Err(chown_error(name, metadata.uid, metadata.gid, e));
        }
        log_fs_debug!(
            "Ignoring chown failure",
            path = tracing::field::display(name.display()),
            uid = metadata.uid,
            gid = metadata.gid,
            error = tracing::field::display(&e)
        );
    }

    for (xattr, c_name, value) in &xattrs {
        match target.set_xattr(c_name, value) {
            Ok(()) => {}
            Err(e) if target.tolerates(xattr, &e) => {
                log_fs_debug!(
                    "Xattr not supported here, skipping",
                    xattr = xattr.as_str(),
                    path = tracing::field::display(name.display()),
                    error = tracing::field::display(&e)
                );
            }
            Err(source) => {
                return Err(FsError::SetXattr {
                    name: xattr.clone(),
                    path: name.to_path_buf(),
                    source,
                });
            }
        }
    }

    let atime = to_timespec(metadata.access_time.as_ref());
    let mtime = to_timespec(metadata.mod_time.as_ref());
    soft_fail("utimes", name, target.set_times(&atime, &mtime))?;

    soft_fail("chmod", name, target.chmod(mode))
}
