//! Source of the raw allow-list payload.

use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// Errors raised while reading the allow-list.
#[derive(Debug, Error)]
pub enum AllowListError {
    /// The allow-list file could not be read.
    #[error("failed to read allow-list '{path}': {source}")]
    Read {
        /// Path that was read.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Supplies the bytes handed to [`PermissionRegistry::reload`].
///
/// [`PermissionRegistry::reload`]: crate::PermissionRegistry::reload
#[cfg_attr(test, mockall::automock)]
pub trait AllowListSource: Send + Sync {
    /// Reads the whole allow-list stored at `path`.
    fn read(&self, path: &Utf8Path) -> Result<Vec<u8>, AllowListError>;
}

/// Reads the allow-list from the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileAllowListSource;

impl AllowListSource for FileAllowListSource {
    fn read(&self, path: &Utf8Path) -> Result<Vec<u8>, AllowListError> {
        fs::read(path).map_err(|source| AllowListError::Read {
            path: path.to_path_buf(),
            source,
        })
    }
}
