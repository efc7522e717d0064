use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Write access to the media library, as granted by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Authorization {
    Authorized,
    Denied,
    Restricted,
    NotDetermined,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("media library access is {0:?}")]
    Permission(Authorization),
    #[error("recording has no file name: {0}")]
    InvalidRecording(PathBuf),
    #[error("failed to save recording: {0}")]
    Io(#[from] io::Error),
}

/// Persistent storage the finished recordings are exported into.
pub trait MediaLibrary: Send + Sync + 'static {
    fn authorization(&self) -> Authorization;

    /// Copies the recording at `path` into the library, returning its new
    /// location. May block.
    fn save_video(&self, path: &Path) -> Result<PathBuf, ExportError>;
}

/// A media library backed by a plain directory.
pub struct DirectoryLibrary {
    root: PathBuf,
    authorization: Authorization,
}

impl DirectoryLibrary {
    pub fn new(root: impl Into<PathBuf>, authorization: Authorization) -> Self {
        Self {
            root: root.into(),
            authorization,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn map_io(err: io::Error) -> ExportError {
    if err.kind() == io::ErrorKind::PermissionDenied {
        ExportError::Permission(Authorization::Denied)
    } else {
        ExportError::Io(err)
    }
}

impl MediaLibrary for DirectoryLibrary {
    fn authorization(&self) -> Authorization {
        self.authorization
    }

    fn save_video(&self, path: &Path) -> Result<PathBuf, ExportError> {
        if self.authorization != Authorization::Authorized {
            return Err(ExportError::Permission(self.authorization));
        }

        let Some(name) = path.file_name() else {
            return Err(ExportError::InvalidRecording(path.to_path_buf()));
        };
        fs::create_dir_all(&self.root).map_err(map_io)?;
        let destination = self.root.join(name);
        fs::copy(path, &destination).map_err(map_io)?;
        info!(path = %destination.display(), "recording saved to library");
        Ok(destination)
    }
}
