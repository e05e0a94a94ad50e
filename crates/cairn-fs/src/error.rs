use cairn_cache::LockError;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileAccessError {
    #[error("file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FileAccessError {
    /// Classifies a filesystem error on `path`, splitting out `NotFound`.
    pub(crate) fn from_io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::FileNotFound { .. })
    }

    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::Lock(LockError::Timeout { .. }))
    }
}
