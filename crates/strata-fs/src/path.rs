//! Lexical path helpers for names relative to a checkout root.

use std::ffi::OsStr;
use std::os::fd::RawFd;
use std::path::{Component, Path, PathBuf};

/// Strip leading `/` and `./` so an entry name is always relative to the root.
///
/// Layer entry names are written as `./usr/bin`, `/usr/bin` or `usr/bin`
/// depending on the producer; all three mean the same entry.
pub fn clean_relative(name: &Path) -> &Path {
    let mut components = name.components();
    while let Some(first) = components.clone().next() {
        match first {
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {
                components.next();
            }
            _ => break,
        }
    }
    components.as_path()
}

/// Split a relative name into its parent and final component.
///
/// `split_name("a/b/c") == ("a/b", "c")`, `split_name("c") == ("", "c")`.
/// The final component may be `..`; confinement rejects it later.
pub fn split_name(name: &Path) -> (&Path, &OsStr) {
    let mut components = name.components();
    match components.next_back() {
        Some(last) => (components.as_path(), last.as_os_str()),
        None => (Path::new(""), OsStr::new("")),
    }
}

/// The `/proc` magic link naming an open descriptor.
pub fn proc_path_for_fd(fd: RawFd) -> PathBuf {
    PathBuf::from(format!("/proc/self/fd/{fd}"))
}
