use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while materializing entries under a root
#[derive(Error, Debug)]
pub enum FsError {
    #[error("{path:?} resolves outside the root directory")]
    Escape { path: PathBuf },

    #[error("{op} {path:?}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("create hardlink {name:?} pointing to {target:?}: {source}")]
    Link {
        name: PathBuf,
        target: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("create symlink {name:?} pointing to {target:?}: {source}")]
    Symlink {
        name: PathBuf,
        target: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("decode xattr {name:?}: {source}")]
    XattrDecode {
        name: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("invalid xattr name {name:?}")]
    XattrName { name: String },

    #[error("set xattr {name:?} on {path:?}: {source}")]
    SetXattr {
        name: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("chown {path:?} to {uid}:{gid}: {source}")]
    Ownership {
        path: PathBuf,
        uid: u32,
        gid: u32,
        #[source]
        source: io::Error,
    },

    #[error(
        "potentially insufficient UIDs or GIDs available in user namespace \
         (requested {uid}:{gid} for {path:?}): check /etc/subuid and /etc/subgid \
         if configured locally: {source}"
    )]
    IdRange {
        path: PathBuf,
        uid: u32,
        gid: u32,
        #[source]
        source: io::Error,
    },

    #[error("invalid entry {path:?}: {reason}")]
    InvalidEntry { path: PathBuf, reason: &'static str },
}

pub type Result<T> = std::result::Result<T, FsError>;

impl FsError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        FsError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// Underlying OS error number, if this error came from a syscall
    pub fn errno(&self) -> Option<i32> {
        match self {
            FsError::Io { source, .. }
            | FsError::Link { source, .. }
            | FsError::Symlink { source, .. }
            | FsError::SetXattr { source, .. }
            | FsError::Ownership { source, .. }
            | FsError::IdRange { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.errno() == Some(libc::ENOENT)
    }

    pub fn is_escape(&self) -> bool {
        matches!(self, FsError::Escape { .. })
    }

    /// True when the filesystem or kernel lacks the requested feature
    pub fn is_unsupported(&self) -> bool {
        self.errno().is_some_and(is_unsupported_errno)
    }
}

pub(crate) fn is_unsupported_errno(errno: i32) -> bool {
    errno == libc::ENOSYS || errno == libc::ENOTSUP || errno == libc::EOPNOTSUPP
}

/// Classify a failed chown: `EINVAL` means the id is not mapped in the
/// current user namespace, which deserves a hint about subordinate ids.
pub(crate) fn chown_error(
    path: impl Into<PathBuf>,
    uid: u32,
    gid: u32,
    source: io::Error,
) -> FsError {
    let path = path.into();
    if source.raw_os_error() == Some(libc::EINVAL) {
        FsError::IdRange {
            path,
            uid,
            gid,
            source,
        }
    } else {
        FsError::Ownership {
            path,
            uid,
            gid,
            source,
        }
    }
}
