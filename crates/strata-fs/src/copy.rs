//! Descriptor-to-descriptor content copy with automatic fallback:
//! 1. Try reflink (FICLONE ioctl; btrfs, xfs, bcachefs)
//! 2. Try `copy_file_range` (in-kernel, may be offloaded by NFS/overlayfs)
//! 3. Fall back to a userspace read/write loop
//!
//! Copies use explicit offsets, so neither handle's file position moves.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;

use nix::fcntl::copy_file_range;

/// FICLONE ioctl number
const FICLONE: libc::c_ulong = 0x40049409;

const COPY_BUF_SIZE: usize = 128 * 1024;

/// How an entry's content ended up in place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMethod {
    /// Shared inode with an existing file (dedup)
    Hardlink,
    /// Copy-on-write clone
    Reflink,
    /// In-kernel copy
    CopyRange,
    /// Full userspace copy
    Copy,
}

impl std::fmt::Display for CopyMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CopyMethod::Hardlink => write!(f, "hardlink"),
            CopyMethod::Reflink => write!(f, "reflink"),
            CopyMethod::CopyRange => write!(f, "copy_file_range"),
            CopyMethod::Copy => write!(f, "copy"),
        }
    }
}

/// Errors that mean "this mechanism is not available here", not "the copy failed"
fn should_fall_back(err: &io::Error) -> bool {
    // EOPNOTSUPP and ENOTSUP have the same value on Linux
    #[allow(unreachable_patterns)]
    let fall_back = matches!(
        err.raw_os_error(),
        Some(libc::EXDEV)
            | Some(libc::EOPNOTSUPP)
            | Some(libc::ENOTSUP)
            | Some(libc::EINVAL)
            | Some(libc::ENOTTY)
            | Some(libc::ENOSYS)
            | Some(libc::EBADF)
    );
    fall_back
}

/// Copy the first `size` bytes of `src` into the empty file `dst`.
pub fn copy_contents(src: &File, dst: &File, size: u64) -> io::Result<CopyMethod> {
    match try_reflink(src, dst) {
        Ok(()) => return Ok(CopyMethod::Reflink),
        Err(e) if should_fall_back(&e) => {}
        Err(e) => return Err(e),
    }

    match try_copy_range(src, dst, size) {
        Ok(()) => return Ok(CopyMethod::CopyRange),
        Err(RangeError::Unsupported) => {}
        Err(RangeError::Io(e)) => return Err(e),
    }

    copy_userspace(src, dst, size)?;
    Ok(CopyMethod::Copy)
}

fn try_reflink(src: &File, dst: &File) -> io::Result<()> {
    let result = unsafe { libc::ioctl(dst.as_raw_fd(), FICLONE as _, src.as_raw_fd()) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

enum RangeError {
    /// Nothing was copied and the syscall is not usable for this pair
    Unsupported,
    Io(io::Error),
}

fn try_copy_range(src: &File, dst: &File, size: u64) -> Result<(), RangeError> {
    let mut off_in: i64 = 0;
    let mut off_out: i64 = 0;
    let mut copied: u64 = 0;

    while copied < size {
        let want = usize::try_from(size - copied).unwrap_or(usize::MAX).min(1 << 30);
        let n = match copy_file_range(src, Some(&mut off_in), dst, Some(&mut off_out), want) {
            Ok(n) => n,
            Err(errno) => {
                let err = io::Error::from(errno);
                if copied == 0 && should_fall_back(&err) {
                    return Err(RangeError::Unsupported);
                }
                return Err(RangeError::Io(err));
            }
        };
        if n == 0 {
            // source shorter than expected
            break;
        }
        copied += n as u64;
    }
    Ok(())
}

fn copy_userspace(src: &File, dst: &File, size: u64) -> io::Result<()> {
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut offset = 0u64;
    while offset < size {
        let want = usize::try_from(size - offset).unwrap_or(usize::MAX).min(buf.len());
        let n = match src.read_at(&mut buf[..want], offset) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        dst.write_all_at(&buf[..n], offset)?;
        offset += n as u64;
    }
    Ok(())
}
