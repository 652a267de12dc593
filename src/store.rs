// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Kubeconfig document persistence.
//!
//! Load a [`Document`] from disk, or start from an empty one when the file
//! does not exist yet, and write it back in one piece.
//!
//! # Atomic Writes
//!
//! The document is first written to a temporary file that sits next to the
//! target, and then renamed over it. Readers either see the old document or
//! the new one, never a half-written file. A new document is created with
//! owner-only permissions on Unix, since it may inline private keys. An
//! existing document keeps the permissions it already had.
//!
//! Symlinks are resolved before writing, so a kubeconfig linked in from a
//! dotfile repository stays a link and the linked file gets the update.

use crate::document::{Document, DocumentError};

use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

/// Read document at target path, or construct an empty one if missing.
///
/// # Errors
///
/// - Return [`StoreError::Read`] if the file exists but cannot be read.
/// - Return [`StoreError::Parse`] if the file exists but is not a valid
///   document. The file is left untouched.
#[instrument(skip(path), level = "debug")]
pub fn read_or_new(path: impl AsRef<Path>) -> Result<Document> {
    let path = path.as_ref();
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!("no document at {:?}, starting empty", path.display());
            return Ok(Document::new());
        }
        Err(err) => {
            return Err(StoreError::Read {
                source: err,
                path: path.into(),
            })
        }
    };

    content.parse().map_err(|err| StoreError::Parse {
        source: err,
        path: path.into(),
    })
}

/// Write document to target path atomically.
///
/// Creates missing parent directories. When the target is a symlink, the
/// file it points at is replaced and the link itself is kept. An existing
/// file keeps its permissions.
///
/// # Errors
///
/// - Return [`StoreError::Render`] if document cannot be serialized.
/// - Return [`StoreError::Write`] if the temporary file cannot be created,
///   written, or renamed over the target. The previous file is left intact.
#[instrument(skip(document, path), level = "debug")]
pub fn write_to_file(document: &Document, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let contents = document.to_yaml().map_err(|err| StoreError::Render {
        source: err,
        path: path.into(),
    })?;

    let write_error = |err: std::io::Error| StoreError::Write {
        source: err,
        path: path.into(),
    };

    // INVARIANT: Write through symlinks onto the document they point at.
    let target = match fs::canonicalize(path) {
        Ok(resolved) => resolved,
        Err(err) if err.kind() == ErrorKind::NotFound => path.to_path_buf(),
        Err(err) => return Err(write_error(err)),
    };

    // INVARIANT: Temporary file must live on the same file system as target.
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(write_error)?;

    let mut temp = NamedTempFile::new_in(dir).map_err(write_error)?;
    if let Ok(metadata) = fs::metadata(&target) {
        temp.as_file()
            .set_permissions(metadata.permissions())
            .map_err(write_error)?;
    }
    temp.write_all(contents.as_bytes()).map_err(write_error)?;
    temp.as_file().sync_all().map_err(write_error)?;
    temp.persist(&target).map_err(|err| write_error(err.error))?;
    debug!("wrote document to {:?}", path.display());

    Ok(())
}

/// Document persistence error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Existing document cannot be read.
    #[error("failed to read kubeconfig at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Existing document is malformed.
    #[error("failed to parse kubeconfig at {:?}", path.display())]
    Parse {
        #[source]
        source: DocumentError,
        path: PathBuf,
    },

    /// Document cannot be serialized.
    #[error("failed to render kubeconfig for {:?}", path.display())]
    Render {
        #[source]
        source: DocumentError,
        path: PathBuf,
    },

    /// Document cannot be written.
    #[error("failed to write kubeconfig at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
