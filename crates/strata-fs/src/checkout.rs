//! One extraction session: a root handle plus the options it runs with.

use std::fs::File;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::Path;

use strata_config::ExtractOptions;
use tracing::instrument;

use crate::attrs::set_file_attrs;
use crate::confine::open_under_root;
use crate::ensure::open_or_create_dir_under_root;
use crate::entry::{EntryType, FileMetadata};
use crate::error::{FsError, Result};
use crate::materialize::{
    create_directory, create_empty_file, create_hardlink, create_regular_file, create_special,
    create_symlink, Materialized,
};
use crate::sys;
use crate::whiteout::WhiteoutHandler;

/// Materializes layer entries beneath one checkout root.
///
/// Entries for disjoint paths may be materialized from several threads at
/// once; the session itself holds no mutable state.
#[derive(Debug)]
pub struct Checkout {
    root: OwnedFd,
    options: ExtractOptions,
}

impl Checkout {
    pub fn new(root: OwnedFd, options: ExtractOptions) -> Self {
        Self { root, options }
    }

    /// Open the directory at `path` as the checkout root.
    pub fn open<P: AsRef<Path>>(path: P, options: ExtractOptions) -> Result<Self> {
        let path = path.as_ref();
        let root = sys::open(path, libc::O_DIRECTORY | libc::O_RDONLY, 0)
            .map_err(|e| FsError::io("open root", path, e))?;
        Ok(Self::new(root, options))
    }

    /// Use the process-wide configuration's extraction options.
    pub fn with_global_config(root: OwnedFd) -> Self {
        let options = strata_config::config().extract.clone();
        Self::new(root, options)
    }

    pub fn root(&self) -> BorrowedFd<'_> {
        self.root.as_fd()
    }

    pub fn options(&self) -> &ExtractOptions {
        &self.options
    }

    /// Open `name` beneath the root, creating missing parents for `O_CREAT`.
    pub fn open_file<P: AsRef<Path>>(&self, name: P, flags: i32, mode: u32) -> Result<OwnedFd> {
        open_under_root(self.root(), name.as_ref(), flags, mode)
    }

    /// Open directory `name`, creating it and its ancestors if missing.
    pub fn ensure_dir<P: AsRef<Path>>(&self, name: P, mode: u32) -> Result<OwnedFd> {
        open_or_create_dir_under_root(self.root(), name.as_ref(), mode)
    }

    pub fn whiteouts(&self) -> WhiteoutHandler<'_> {
        WhiteoutHandler::new(self.root())
    }

    /// Materialize one entry and restore its attributes.
    ///
    /// `content` is used only for regular files; without it the file is
    /// created empty.
    #[instrument(
        skip(self, metadata, content),
        fields(entry = %metadata.name, kind = %metadata.entry_type),
        level = "debug"
    )]
    pub fn materialize(
        &self,
        metadata: &mut FileMetadata,
        content: Option<BorrowedFd<'_>>,
    ) -> Result<()> {
        match metadata.entry_type {
            EntryType::Regular => match content {
                Some(source) => self.write_regular(metadata, source).map(drop),
                None => {
                    let file = create_empty_file(self.root(), metadata)?;
                    self.finish(&file, metadata)
                }
            },
            EntryType::Directory => create_directory(self.root(), metadata, &self.options),
            EntryType::Symlink => create_symlink(self.root(), metadata, &self.options),
            EntryType::Hardlink => create_hardlink(self.root(), metadata, &self.options),
            EntryType::CharDevice | EntryType::BlockDevice | EntryType::Fifo => {
                create_special(self.root(), metadata, &self.options)
            }
        }
    }

    /// Put a regular file in place from `source` and restore its attributes.
    ///
    /// Attributes are skipped when the content was deduplicated by hardlink.
    pub fn write_regular(
        &self,
        metadata: &mut FileMetadata,
        source: BorrowedFd<'_>,
    ) -> Result<Materialized> {
        let materialized =
            create_regular_file(self.root(), metadata, source, self.options.use_hardlinks)?;
        if let Some(file) = &materialized.file {
            self.finish(file, metadata)?;
        }
        Ok(materialized)
    }

    /// Create an empty regular file to be filled chunk by chunk.
    ///
    /// Call [`Checkout::finish`] once every chunk and hole has been written.
    pub fn create_for_chunks(&self, metadata: &FileMetadata) -> Result<File> {
        create_empty_file(self.root(), metadata)
    }

    /// Restore the attributes of a regular file whose content is complete.
    pub fn finish(&self, file: &File, metadata: &FileMetadata) -> Result<()> {
        set_file_attrs(
            self.root(),
            file.as_fd(),
            metadata.permissions(),
            metadata,
            &self.options,
            false,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_with_global_config_uses_loaded_options() {
        let tmp = TempDir::new().unwrap();
        let root = OwnedFd::from(File::open(tmp.path()).unwrap());
        let checkout = Checkout::with_global_config(root);
        assert_eq!(checkout.options(), &strata_config::config().extract);
    }

    #[test]
    fn test_special_entry_without_node_type_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let checkout = Checkout::open(tmp.path(), ExtractOptions::default()).unwrap();
        let entry = FileMetadata::new(EntryType::Directory, "d");
        let err = create_special(checkout.root(), &entry, checkout.options()).unwrap_err();
        assert!(matches!(err, FsError::InvalidEntry { .. }));
    }

    #[test]
    fn test_hardlink_without_target_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let checkout = Checkout::open(tmp.path(), ExtractOptions::default()).unwrap();
        let mut entry = FileMetadata::new(EntryType::Hardlink, "h");
        let err = checkout.materialize(&mut entry, None).unwrap_err();
        assert!(matches!(err, FsError::InvalidEntry { .. }));
    }
}
