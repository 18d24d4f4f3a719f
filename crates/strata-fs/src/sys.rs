//! Descriptor adapters over the `nix` `*at` calls.
//!
//! Callers hold `BorrowedFd`/`OwnedFd` while nix 0.28 still takes raw
//! descriptors; errors come back as `io::Error` and path context is attached
//! by the callers. The xattr setters have no `nix` counterpart and call
//! `libc` directly.

use std::ffi::{CStr, CString, OsStr};
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::errno::Errno;
use nix::fcntl::{self, AtFlags, OFlag};
use nix::sys::stat::{self, FchmodatFlags, FileStat, Mode, SFlag, UtimensatFlags};
use nix::sys::time::TimeSpec;
use nix::unistd::{self, Gid, Uid, UnlinkatFlags};

pub(crate) fn to_cstring(s: &OsStr) -> io::Result<CString> {
    CString::new(s.as_bytes()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "path contains an interior NUL byte")
    })
}

fn owned(fd: RawFd) -> OwnedFd {
    // SAFETY: the kernel just handed us this descriptor and nobody else owns it.
    unsafe { OwnedFd::from_raw_fd(fd) }
}

fn oflags(flags: libc::c_int) -> OFlag {
    OFlag::from_bits_retain(flags | libc::O_CLOEXEC)
}

fn mode(bits: u32) -> Mode {
    Mode::from_bits_truncate(bits as libc::mode_t)
}

pub(crate) fn open(path: &Path, flags: libc::c_int, perm: u32) -> io::Result<OwnedFd> {
    Ok(owned(fcntl::open(path, oflags(flags), mode(perm))?))
}

pub(crate) fn openat(
    dirfd: BorrowedFd<'_>,
    name: &OsStr,
    flags: libc::c_int,
    perm: u32,
) -> io::Result<OwnedFd> {
    let fd = fcntl::openat(Some(dirfd.as_raw_fd()), name, oflags(flags), mode(perm))?;
    Ok(owned(fd))
}

pub(crate) fn mkdirat(dirfd: BorrowedFd<'_>, name: &OsStr, perm: u32) -> io::Result<()> {
    Ok(stat::mkdirat(Some(dirfd.as_raw_fd()), name, mode(perm))?)
}

/// `mode` carries both the node type (`S_IFCHR`, ...) and permission bits.
pub(crate) fn mknodat(
    dirfd: BorrowedFd<'_>,
    name: &OsStr,
    mode_bits: u32,
    dev: u64,
) -> io::Result<()> {
    let kind = SFlag::from_bits_truncate(mode_bits & libc::S_IFMT);
    Ok(stat::mknodat(
        Some(dirfd.as_raw_fd()),
        name,
        kind,
        mode(mode_bits & 0o7777),
        dev as libc::dev_t,
    )?)
}

pub(crate) fn symlinkat(target: &OsStr, dirfd: BorrowedFd<'_>, name: &OsStr) -> io::Result<()> {
    Ok(unistd::symlinkat(target, Some(dirfd.as_raw_fd()), name)?)
}

/// `linkat(AT_FDCWD, src, dirfd, name, AT_SYMLINK_FOLLOW)`
///
/// With `src` pointing into `/proc/self/fd` this links an open descriptor
/// without needing `CAP_DAC_READ_SEARCH` (which `AT_EMPTY_PATH` requires).
pub(crate) fn linkat_follow(src: &Path, dirfd: BorrowedFd<'_>, name: &OsStr) -> io::Result<()> {
    Ok(unistd::linkat(
        None,
        src,
        Some(dirfd.as_raw_fd()),
        Path::new(name),
        AtFlags::AT_SYMLINK_FOLLOW,
    )?)
}

/// Remove a non-directory entry.
pub(crate) fn unlinkat(dirfd: BorrowedFd<'_>, name: &OsStr) -> io::Result<()> {
    Ok(unistd::unlinkat(
        Some(dirfd.as_raw_fd()),
        name,
        UnlinkatFlags::NoRemoveDir,
    )?)
}

fn ids(uid: u32, gid: u32) -> (Option<Uid>, Option<Gid>) {
    (Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
}

pub(crate) fn fchown(fd: BorrowedFd<'_>, uid: u32, gid: u32) -> io::Result<()> {
    let (owner, group) = ids(uid, gid);
    Ok(unistd::fchown(fd.as_raw_fd(), owner, group)?)
}

pub(crate) fn fchownat_nofollow(
    dirfd: BorrowedFd<'_>,
    name: &OsStr,
    uid: u32,
    gid: u32,
) -> io::Result<()> {
    let (owner, group) = ids(uid, gid);
    Ok(unistd::fchownat(
        Some(dirfd.as_raw_fd()),
        name,
        owner,
        group,
        AtFlags::AT_SYMLINK_NOFOLLOW,
    )?)
}

/// Chown the object behind `fd` itself, which may be an `O_PATH` handle.
pub(crate) fn fchown_empty_path(fd: BorrowedFd<'_>, uid: u32, gid: u32) -> io::Result<()> {
    let (owner, group) = ids(uid, gid);
    Ok(unistd::fchownat(
        Some(fd.as_raw_fd()),
        "",
        owner,
        group,
        AtFlags::AT_EMPTY_PATH,
    )?)
}

pub(crate) fn fsetxattr(fd: BorrowedFd<'_>, name: &CStr, value: &[u8]) -> io::Result<()> {
    let ret = unsafe {
        libc::fsetxattr(
            fd.as_raw_fd(),
            name.as_ptr(),
            value.as_ptr().cast(),
            value.len(),
            0,
        )
    };
    Ok(Errno::result(ret).map(drop)?)
}

pub(crate) fn lsetxattr(path: &Path, name: &CStr, value: &[u8]) -> io::Result<()> {
    let c_path = to_cstring(path.as_os_str())?;
    let ret = unsafe {
        libc::lsetxattr(
            c_path.as_ptr(),
            name.as_ptr(),
            value.as_ptr().cast(),
            value.len(),
            0,
        )
    };
    Ok(Errno::result(ret).map(drop)?)
}

/// Set times on whatever `path` resolves to, following symlinks.
pub(crate) fn utimensat_path(path: &Path, atime: &TimeSpec, mtime: &TimeSpec) -> io::Result<()> {
    Ok(stat::utimensat(None, path, atime, mtime, UtimensatFlags::FollowSymlink)?)
}

pub(crate) fn utimensat_nofollow(
    dirfd: BorrowedFd<'_>,
    name: &OsStr,
    atime: &TimeSpec,
    mtime: &TimeSpec,
) -> io::Result<()> {
    Ok(stat::utimensat(
        Some(dirfd.as_raw_fd()),
        name,
        atime,
        mtime,
        UtimensatFlags::NoFollowSymlink,
    )?)
}

pub(crate) fn fchmod(fd: BorrowedFd<'_>, perm: u32) -> io::Result<()> {
    Ok(stat::fchmod(fd.as_raw_fd(), mode(perm))?)
}

pub(crate) fn fchmodat_nofollow(dirfd: BorrowedFd<'_>, name: &OsStr, perm: u32) -> io::Result<()> {
    Ok(stat::fchmodat(
        Some(dirfd.as_raw_fd()),
        name,
        mode(perm),
        FchmodatFlags::NoFollowSymlink,
    )?)
}

pub(crate) fn fstat(fd: BorrowedFd<'_>) -> io::Result<FileStat> {
    Ok(stat::fstat(fd.as_raw_fd())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::os::fd::AsFd;
    use std::os::unix::fs::FileTypeExt;
    use tempfile::TempDir;

    #[test]
    fn test_interior_nul_is_rejected() {
        let err = to_cstring(OsStr::new("a\0b")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_open_sets_cloexec() {
        let tmp = TempDir::new().unwrap();
        let fd = open(tmp.path(), libc::O_DIRECTORY | libc::O_RDONLY, 0).unwrap();
        let flags = fcntl::fcntl(fd.as_raw_fd(), fcntl::FcntlArg::F_GETFD).unwrap();
        assert_ne!(flags & libc::FD_CLOEXEC, 0);
    }

    #[test]
    fn test_mknodat_splits_kind_and_permissions() {
        let tmp = TempDir::new().unwrap();
        let dir = File::open(tmp.path()).unwrap();
        mknodat(dir.as_fd(), OsStr::new("pipe"), libc::S_IFIFO | 0o640, 0).unwrap();

        let meta = std::fs::symlink_metadata(tmp.path().join("pipe")).unwrap();
        assert!(meta.file_type().is_fifo());
        let st = fstat(open(&tmp.path().join("pipe"), libc::O_PATH, 0).unwrap().as_fd()).unwrap();
        assert_eq!(st.st_mode & libc::S_IFMT, libc::S_IFIFO);
    }

    #[test]
    fn test_unlinkat_refuses_directories() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("d")).unwrap();
        let dir = File::open(tmp.path()).unwrap();
        let err = unlinkat(dir.as_fd(), OsStr::new("d")).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EISDIR));
    }
}
