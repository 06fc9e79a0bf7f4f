//! Errors raised by path resolution and tree operations

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VfsError {
    #[error("{}: no such file or directory", .0.display())]
    NotFound(PathBuf),

    #[error("{}: already exists", .0.display())]
    AlreadyExists(PathBuf),

    #[error("{}: outside of the root folder", .0.display())]
    OutsideRoot(PathBuf),

    #[error("the root folder cannot be removed")]
    RootProtected,

    #[error("{}: not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("{}: cannot copy a directory into itself", .0.display())]
    CopyIntoSelf(PathBuf),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl VfsError {
    /// Classify an I/O error against the path it happened on
    pub fn io(path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => VfsError::NotFound(path.to_path_buf()),
            io::ErrorKind::AlreadyExists => VfsError::AlreadyExists(path.to_path_buf()),
            _ => VfsError::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    /// Message without the absolute path, safe to show to a shell client
    pub fn reason(&self) -> String {
        match self {
            VfsError::NotFound(_) => "no such file or directory".to_string(),
            VfsError::AlreadyExists(_) => "already exists".to_string(),
            VfsError::OutsideRoot(_) => "outside of the root folder".to_string(),
            VfsError::RootProtected => "the root folder cannot be removed".to_string(),
            VfsError::NotADirectory(_) => "not a directory".to_string(),
            VfsError::CopyIntoSelf(_) => "cannot copy a directory into itself".to_string(),
            VfsError::Io { source, .. } => source.to_string(),
        }
    }
}
