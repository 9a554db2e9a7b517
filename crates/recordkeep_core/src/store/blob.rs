//! Binary upload collaborator for photo/document fields.
//!
//! # Invariants
//! - Upload paths are relative and never escape the store root.
//! - A failed upload leaves no partially written file behind.

use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Failure reported by a blob upload.
#[derive(Debug)]
pub enum UploadError {
    /// Target path is empty, absolute, or escapes the root.
    InvalidPath(String),
    /// Payload has no bytes.
    EmptyPayload,
    Io(io::Error),
}

impl Display for UploadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPath(path) => write!(f, "invalid upload path: `{path}`"),
            Self::EmptyPayload => write!(f, "upload payload is empty"),
            Self::Io(err) => write!(f, "upload failed: {err}"),
        }
    }
}

impl Error for UploadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for UploadError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Accepts bytes plus a logical path and returns a retrievable URL.
pub trait BlobStore {
    fn upload(&self, bytes: &[u8], path: &str) -> Result<String, UploadError>;
}

impl<B: BlobStore + ?Sized> BlobStore for &B {
    fn upload(&self, bytes: &[u8], path: &str) -> Result<String, UploadError> {
        (**self).upload(bytes, path)
    }
}

/// Blob store writing files under a local root directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Creates the root directory when missing.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, UploadError> {
        let root = root.into();
        if !root.is_absolute() {
            return Err(UploadError::InvalidPath(root.display().to_string()));
        }
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, UploadError> {
        let relative = Path::new(path);
        let is_clean = !path.trim().is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !is_clean {
            return Err(UploadError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl BlobStore for FsBlobStore {
    fn upload(&self, bytes: &[u8], path: &str) -> Result<String, UploadError> {
        if bytes.is_empty() {
            return Err(UploadError::EmptyPayload);
        }
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let staging = target.with_extension("partial");
        let result = fs::write(&staging, bytes).and_then(|()| fs::rename(&staging, &target));
        if let Err(err) = result {
            let _ = fs::remove_file(&staging);
            error!(
                "event=blob_upload module=store status=error size_bytes={} error={err}",
                bytes.len()
            );
            return Err(err.into());
        }

        info!(
            "event=blob_upload module=store status=ok size_bytes={}",
            bytes.len()
        );
        Ok(format!("file://{}", target.display()))
    }
}
