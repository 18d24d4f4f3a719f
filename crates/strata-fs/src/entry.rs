//! Layer entry description, in the shape used by chunked-layer TOC manifests.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use nix::sys::time::TimeSpec;
use serde::{Deserialize, Serialize};
use strata_blob::ImageSourceChunk;

/// `0001-01-01T00:00:00Z`, the zero value some producers write for "unset".
const ZERO_TIME_UNIX_SECS: i64 = -62_135_596_800;

/// Kind of a layer entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EntryType {
    #[default]
    #[serde(rename = "reg")]
    Regular,
    #[serde(rename = "dir")]
    Directory,
    #[serde(rename = "symlink")]
    Symlink,
    #[serde(rename = "hardlink")]
    Hardlink,
    #[serde(rename = "char")]
    CharDevice,
    #[serde(rename = "block")]
    BlockDevice,
    #[serde(rename = "fifo")]
    Fifo,
}

impl EntryType {
    /// `S_IF*` bits for entries created with `mknod`
    pub fn node_type_bits(self) -> Option<u32> {
        match self {
            EntryType::CharDevice => Some(libc::S_IFCHR),
            EntryType::BlockDevice => Some(libc::S_IFBLK),
            EntryType::Fifo => Some(libc::S_IFIFO),
            _ => None,
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryType::Regular => "reg",
            EntryType::Directory => "dir",
            EntryType::Symlink => "symlink",
            EntryType::Hardlink => "hardlink",
            EntryType::CharDevice => "char",
            EntryType::BlockDevice => "block",
            EntryType::Fifo => "fifo",
        };
        f.write_str(name)
    }
}

/// Description of one entry to materialize.
///
/// `xattrs` values are base64 encoded. `skip_set_attrs` is never read from a
/// manifest; it is set when content was deduplicated by hardlinking an
/// existing file whose attributes must not be touched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileMetadata {
    #[serde(rename = "type")]
    pub entry_type: EntryType,

    pub name: String,

    #[serde(rename = "linkName", default, skip_serializing_if = "String::is_empty")]
    pub linkname: String,

    #[serde(default)]
    pub mode: u32,

    #[serde(default)]
    pub size: u64,

    #[serde(default)]
    pub uid: u32,

    #[serde(default)]
    pub gid: u32,

    #[serde(rename = "modtime", default, skip_serializing_if = "Option::is_none")]
    pub mod_time: Option<DateTime<Utc>>,

    #[serde(rename = "accesstime", default, skip_serializing_if = "Option::is_none")]
    pub access_time: Option<DateTime<Utc>>,

    #[serde(rename = "devMajor", default)]
    pub dev_major: u32,

    #[serde(rename = "devMinor", default)]
    pub dev_minor: u32,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub xattrs: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<ImageSourceChunk>,

    #[serde(skip)]
    pub skip_set_attrs: bool,
}

impl FileMetadata {
    pub fn new(entry_type: EntryType, name: impl Into<String>) -> Self {
        Self {
            entry_type,
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    pub fn with_link(mut self, target: impl Into<String>) -> Self {
        self.linkname = target.into();
        self
    }

    pub fn with_mod_time(mut self, time: DateTime<Utc>) -> Self {
        self.mod_time = Some(time);
        self
    }

    pub fn with_device(mut self, major: u32, minor: u32) -> Self {
        self.dev_major = major;
        self.dev_minor = minor;
        self
    }

    pub fn with_xattr(mut self, name: impl Into<String>, base64_value: impl Into<String>) -> Self {
        self.xattrs.insert(name.into(), base64_value.into());
        self
    }

    /// Entry name as a path, relative or absolute as written in the layer
    pub fn path(&self) -> &Path {
        Path::new(&self.name)
    }

    /// Permission bits, including setuid/setgid/sticky
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    /// Parse one TOC entry
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Convert an optional timestamp to a `TimeSpec`, `UTIME_OMIT` when unset.
pub(crate) fn to_timespec(time: Option<&DateTime<Utc>>) -> TimeSpec {
    match time {
        Some(t) if t.timestamp() != ZERO_TIME_UNIX_SECS => TimeSpec::new(
            t.timestamp() as libc::time_t,
            t.timestamp_subsec_nanos() as _,
        ),
        _ => TimeSpec::UTIME_OMIT,
    }
}
