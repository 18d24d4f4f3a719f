//! Containment checks shared by the openat2 and userspace test binaries.

#![allow(dead_code)]

use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::fs::{symlink, MetadataExt};
use std::path::Path;

use strata_config::testing::TestEnvironment;
use strata_config::ExtractOptions;
use strata_fs::{
    open_or_create_dir_under_root, open_under_root, Checkout, EntryType, FileMetadata,
    NEW_FILE_FLAGS,
};
use walkdir::WalkDir;

pub fn current_owner() -> (u32, u32) {
    (nix::unistd::getuid().as_raw(), nix::unistd::getgid().as_raw())
}

pub fn checkout(env: &TestEnvironment) -> Checkout {
    Checkout::new(env.open_root().unwrap(), Default::default())
}

/// Everything next to the root except the content directory must still be
/// exactly the untouched canary.
pub fn assert_nothing_outside(env: &TestEnvironment) {
    let base = env.root.parent().unwrap();
    for entry in WalkDir::new(base).min_depth(1) {
        let entry = entry.unwrap();
        let path = entry.path();
        if path.starts_with(&env.root) || path.starts_with(&env.content_dir) {
            continue;
        }
        assert!(
            path == env.outside || path == env.outside.join(strata_config::testing::CANARY),
            "unexpected entry outside the root: {}",
            path.display()
        );
    }
    assert!(env.outside_is_untouched().unwrap());
}

fn same_inode(a: &OwnedFd, b: &Path) -> bool {
    let fa = std::fs::File::from(a.try_clone().unwrap()).metadata().unwrap();
    let fb = std::fs::metadata(b).unwrap();
    fa.ino() == fb.ino() && fa.dev() == fb.dev()
}

pub fn dotdot_cannot_escape() {
    let env = TestEnvironment::new().unwrap();
    let root = env.open_root().unwrap();

    for name in ["../outside/canary", "a/../../outside/canary", "/../outside/canary"] {
        let err = open_under_root(root.as_fd(), Path::new(name), libc::O_RDONLY, 0).unwrap_err();
        assert!(err.is_escape(), "{name}: {err}");
    }

    let err = open_under_root(
        root.as_fd(),
        Path::new("../outside/pwned"),
        libc::O_CREAT | libc::O_WRONLY,
        0o644,
    )
    .unwrap_err();
    assert!(err.is_escape());
    assert_nothing_outside(&env);
}

pub fn lexical_symlink_escape_is_rejected() {
    let env = TestEnvironment::new().unwrap();
    let checkout = checkout(&env);
    let (uid, gid) = current_owner();

    let mut link = FileMetadata::new(EntryType::Symlink, "a/b")
        .with_link("../../etc/passwd")
        .with_owner(uid, gid);
    checkout.materialize(&mut link, None).unwrap();

    // Created verbatim, never resolved
    assert_eq!(
        std::fs::read_link(env.path("a/b")).unwrap(),
        Path::new("../../etc/passwd")
    );

    let err = checkout.open_file("a/b", libc::O_RDONLY, 0).unwrap_err();
    assert!(err.is_escape(), "{err}");
}

pub fn escaping_symlink_directory_blocks_writes() {
    let env = TestEnvironment::new().unwrap();
    let root = env.open_root().unwrap();
    symlink("../outside", env.path("up")).unwrap();
    symlink("/", env.path("abs")).unwrap();

    for name in ["up/pwned", "abs/tmp/pwned"] {
        let flags = libc::O_CREAT | libc::O_WRONLY;
        let result = open_under_root(root.as_fd(), Path::new(name), flags, 0o644);
        assert!(result.unwrap_err().is_escape(), "{name}");
    }
    let result = open_or_create_dir_under_root(root.as_fd(), Path::new("up/newdir"), 0o755);
    assert!(result.is_err());
    assert_nothing_outside(&env);
}

pub fn symlinks_inside_root_resolve() {
    let env = TestEnvironment::new().unwrap();
    env.create_file("usr/lib/libz.so.1", b"zlib").unwrap();
    symlink("usr/lib", env.path("lib")).unwrap();
    symlink("../lib/libz.so.1", env.path("usr/libz")).unwrap();
    let root = env.open_root().unwrap();

    let direct =
        open_under_root(root.as_fd(), Path::new("lib/libz.so.1"), libc::O_RDONLY, 0).unwrap();
    assert!(same_inode(&direct, &env.path("usr/lib/libz.so.1")));

    let chained =
        open_under_root(root.as_fd(), Path::new("./usr/libz"), libc::O_RDONLY, 0).unwrap();
    assert!(same_inode(&chained, &env.path("usr/lib/libz.so.1")));
}

pub fn empty_name_duplicates_root() {
    let env = TestEnvironment::new().unwrap();
    let root = env.open_root().unwrap();
    for name in ["", "/", "./"] {
        let fd = open_under_root(root.as_fd(), Path::new(name), libc::O_RDONLY, 0).unwrap();
        assert!(same_inode(&fd, &env.root), "{name:?}");
    }
}

pub fn create_makes_missing_parents() {
    let env = TestEnvironment::new().unwrap();
    let root = env.open_root().unwrap();
    let fd = open_under_root(
        root.as_fd(),
        Path::new("/var/lib/app/state"),
        libc::O_CREAT | libc::O_EXCL | libc::O_WRONLY,
        0o600,
    )
    .unwrap();
    assert!(same_inode(&fd, &env.path("var/lib/app/state")));

    // Without O_CREAT a missing parent is just NotFound
    let missing = Path::new("opt/missing/file");
    let err = open_under_root(root.as_fd(), missing, libc::O_RDONLY, 0).unwrap_err();
    assert!(err.is_not_found());
    assert!(!env.path("opt").exists());
}

pub fn nofollow_opens_the_link_itself() {
    let env = TestEnvironment::new().unwrap();
    let root = env.open_root().unwrap();
    std::fs::create_dir(env.path("etc")).unwrap();
    symlink("../../outside/canary", env.path("etc/shadow")).unwrap();

    let err = open_under_root(
        root.as_fd(),
        Path::new("etc/shadow"),
        libc::O_RDONLY | libc::O_NOFOLLOW,
        0,
    )
    .unwrap_err();
    assert_eq!(err.errno(), Some(libc::ELOOP));

    let link = open_under_root(
        root.as_fd(),
        Path::new("etc/shadow"),
        libc::O_PATH | libc::O_NOFOLLOW,
        0,
    )
    .unwrap();
    let st = std::fs::File::from(link).metadata().unwrap();
    assert!(st.file_type().is_symlink());
}

pub fn ensure_dir_is_idempotent() {
    let env = TestEnvironment::new().unwrap();
    let checkout = checkout(&env);
    let first = checkout.ensure_dir("a/b/c", 0o755).unwrap();
    let second = checkout.ensure_dir("/a/b/c", 0o700).unwrap();
    assert!(same_inode(&first, &env.path("a/b/c")));
    assert!(same_inode(&second, &env.path("a/b/c")));
}

fn copying_checkout(env: &TestEnvironment) -> Checkout {
    let options = ExtractOptions {
        use_hardlinks: false,
        ..Default::default()
    };
    Checkout::new(env.open_root().unwrap(), options)
}

pub fn exclusive_create_does_not_follow_leaf_symlink() {
    let env = TestEnvironment::new().unwrap();
    let root = env.open_root().unwrap();
    symlink("other", env.path("a")).unwrap();
    symlink("../outside/planted", env.path("up")).unwrap();

    for name in ["a", "up"] {
        let err =
            open_under_root(root.as_fd(), Path::new(name), NEW_FILE_FLAGS, 0o644).unwrap_err();
        assert_eq!(err.errno(), Some(libc::EEXIST), "{name}: {err}");
    }
    assert!(!env.path("other").exists());
    assert_nothing_outside(&env);
}

pub fn regular_entry_replaces_leaf_symlink() {
    let env = TestEnvironment::new().unwrap();
    let checkout = copying_checkout(&env);
    let (uid, gid) = current_owner();
    std::fs::create_dir(env.path("etc")).unwrap();
    symlink("other", env.path("a")).unwrap();
    symlink("../../outside/canary", env.path("etc/passwd")).unwrap();

    for name in ["a", "etc/passwd"] {
        let source = env.create_content("payload", b"layer content").unwrap();
        let mut entry = FileMetadata::new(EntryType::Regular, name)
            .with_mode(0o644)
            .with_owner(uid, gid);
        checkout.materialize(&mut entry, Some(source.as_fd())).unwrap();

        let meta = std::fs::symlink_metadata(env.path(name)).unwrap();
        assert!(meta.file_type().is_file(), "{name} is still a symlink");
        assert_eq!(std::fs::read(env.path(name)).unwrap(), b"layer content");
    }
    assert!(!env.path("other").exists());
    assert_nothing_outside(&env);
}

pub fn regular_entry_does_not_replace_directory() {
    let env = TestEnvironment::new().unwrap();
    let checkout = copying_checkout(&env);
    let (uid, gid) = current_owner();
    env.create_file("d/keep", b"x").unwrap();
    let source = env.create_content("payload", b"layer content").unwrap();

    let mut entry = FileMetadata::new(EntryType::Regular, "d")
        .with_mode(0o644)
        .with_owner(uid, gid);
    assert!(checkout.materialize(&mut entry, Some(source.as_fd())).is_err());
    assert!(env.path("d").is_dir());
    assert!(env.path("d/keep").exists());
}
