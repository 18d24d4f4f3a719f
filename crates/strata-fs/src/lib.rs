//! # strata-fs
//!
//! Root-confined materialization of container layer entries.
//!
//! Every entry of a layer is created beneath one open root directory, and no
//! entry (however crafted: `..` segments, symlinks pointing up, hardlinks to
//! outside paths) can make this crate read or write outside of it.
//!
//! ## Layers
//!
//! ```text
//! Checkout::materialize(entry)
//!   ├── materialize  create_regular_file / create_hardlink / create_symlink
//!   │                create_directory / create_special / append_hole
//!   │     └── attrs  set_file_attrs (chown, xattrs, utimes, chmod)
//!   ├── ensure       open_or_create_dir_under_root
//!   └── confine      open_under_root (openat2, or userspace resolution)
//! ```
//!
//! Whiteout markers go through [`WhiteoutOps`], and chunk content comes from
//! [`strata_blob`].

mod attrs;
mod checkout;
mod confine;
mod copy;
mod ensure;
mod entry;
mod error;
mod materialize;
mod path;
mod sys;
mod whiteout;

pub use attrs::{set_file_attrs, XATTRS_TO_IGNORE};
pub use checkout::Checkout;
pub use confine::{
    disable_openat2, open_under_root, open_under_root_raw, openat2_available, IMPLICIT_DIR_MODE,
};
pub use copy::CopyMethod;
pub use ensure::open_or_create_dir_under_root;
pub use entry::{EntryType, FileMetadata};
pub use error::{FsError, Result};
pub use materialize::{
    append_hole, create_directory, create_empty_file, create_hardlink, create_regular_file,
    create_special, create_symlink, Materialized, NEW_FILE_FLAGS,
};
pub use path::{clean_relative, proc_path_for_fd, split_name};
pub use whiteout::{WhiteoutHandler, WhiteoutOps, OVERLAY_OPAQUE_XATTR, OVERLAY_USER_OPAQUE_XATTR};

pub use strata_config::ExtractOptions;
