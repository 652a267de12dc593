// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Locked kubeconfig update.
//!
//! Merging settings into a shared document is a read, modify, write cycle.
//! The whole cycle runs under a named lock derived from the document's path,
//! so updates to the same document from independent processes are fully
//! serialized: each update observes the document as the previous one left
//! it. Updates to different documents never wait on each other.
//!
//! The document is only written back after projection finished without
//! error. A failed update leaves the file on disk exactly as it was.

use crate::{
    lock::{FileMutex, LockError, MutexSpec, NamedMutex},
    populate::{populate_with_reader, CertReader, FsReader, PopulateError},
    settings::{Settings, SettingsError},
    store::{read_or_new, write_to_file, StoreError},
};

use tracing::{debug, info, instrument};

/// Operation tag mixed into the lock name.
pub const UPDATE_TAG: &str = "settings.Update";

/// Read document from disk, merge settings into it, and write it back.
///
/// Serializes against other updates of the same path through a [`FileMutex`].
///
/// # Errors
///
/// - Return [`UpdateError::Settings`] if the settings carry no path.
/// - Return [`UpdateError::Lock`] if the lock cannot be acquired.
/// - Return [`UpdateError::Store`] if the document cannot be loaded or
///   written back.
/// - Return [`UpdateError::Populate`] if projection fails.
pub fn update(settings: &Settings) -> Result<()> {
    update_with(settings, &FileMutex::new(), &FsReader)
}

/// Read document from disk, merge settings into it, and write it back,
/// using target lock backend and certificate reader.
///
/// # Errors
///
/// - Return [`UpdateError::Settings`] if the settings carry no path.
/// - Return [`UpdateError::Lock`] if the lock cannot be acquired.
/// - Return [`UpdateError::Store`] if the document cannot be loaded or
///   written back.
/// - Return [`UpdateError::Populate`] if projection fails.
#[instrument(skip_all, fields(cluster = %settings.cluster_name), level = "debug")]
pub fn update_with(
    settings: &Settings,
    mutex: &impl NamedMutex,
    reader: &impl CertReader,
) -> Result<()> {
    let path = settings.file_path()?;
    let spec = MutexSpec::for_operation(path, UPDATE_TAG);

    info!("acquiring lock: {spec}");
    // INVARIANT: Lock is held until `_releaser` drops, on every return path.
    let _releaser = mutex.acquire(&spec)?;

    info!("updating kubeconfig: {:?}", path.display());
    let mut document = read_or_new(path)?;
    populate_with_reader(settings, &mut document, reader)?;

    // INVARIANT: Persist only once the whole projection succeeded.
    write_to_file(&document, path)?;
    debug!("kubeconfig {:?} updated", path.display());

    Ok(())
}

/// Update error types.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Settings are incomplete.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Lock cannot be acquired.
    #[error("unable to acquire lock for {}", .0.spec())]
    Lock(#[from] LockError),

    /// Document cannot be loaded or written back.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Settings cannot be projected into document.
    #[error(transparent)]
    Populate(#[from] PopulateError),
}

/// Friendly result alias :3
pub type Result<T, E = UpdateError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{document::Document, lock::ProcessMutex};
    use pretty_assertions::assert_eq;
    use std::{
        fs,
        path::{Path, PathBuf},
        time::Duration,
    };

    fn settings_at(name: &str, path: &Path) -> anyhow::Result<Settings> {
        let mut settings = Settings::new(name);
        settings.cluster_server_address = format!("https://{name}:8443");
        settings.certificate_authority = format!("/certs/{name}/ca.crt");
        Ok(settings.with_path(path)?)
    }

    #[test]
    fn update_without_path_fails() {
        let result = update(&Settings::new("foo"));
        assert!(matches!(
            result,
            Err(UpdateError::Settings(SettingsError::PathNotSet))
        ));
    }

    #[test]
    fn update_creates_missing_document() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(".kube").join("config");

        update_with(&settings_at("foo", &path)?, &ProcessMutex::new(), &FsReader)?;

        let document = read_or_new(&path)?;
        assert_eq!(document.current_context, "foo");
        assert_eq!(document.clusters["foo"].server, "https://foo:8443");

        Ok(())
    }

    #[test]
    fn malformed_document_is_left_alone() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config");
        let garbage = "users: {{{ nope\n";
        fs::write(&path, garbage)?;

        let result = update_with(&settings_at("foo", &path)?, &ProcessMutex::new(), &FsReader);

        assert!(matches!(
            result,
            Err(UpdateError::Store(StoreError::Parse { .. }))
        ));
        assert_eq!(fs::read_to_string(&path)?, garbage);

        Ok(())
    }

    #[test]
    fn failed_projection_is_not_persisted() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config");
        update_with(&settings_at("bar", &path)?, &ProcessMutex::new(), &FsReader)?;
        let before = fs::read_to_string(&path)?;

        let mut settings = settings_at("foo", &path)?;
        settings.embed_certs = true;
        let result = update_with(&settings, &ProcessMutex::new(), &FsReader);

        assert!(matches!(result, Err(UpdateError::Populate(_))));
        assert_eq!(fs::read_to_string(&path)?, before);

        Ok(())
    }

    #[test]
    fn lock_is_released_on_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config");
        let mutex = ProcessMutex::new();

        let mut settings = settings_at("foo", &path)?;
        settings.embed_certs = true;
        assert!(update_with(&settings, &mutex, &FsReader).is_err());

        let spec = MutexSpec::for_operation(&path, UPDATE_TAG);
        assert!(mutex.try_acquire(&spec)?.is_some());

        Ok(())
    }

    /// Turns the kubeconfig's parent directory into a regular file while
    /// certificates are read, so the document cannot be written back.
    struct ParentTurnsIntoFile {
        parent: PathBuf,
    }

    impl CertReader for ParentTurnsIntoFile {
        fn read(&self, _path: &Path) -> std::io::Result<Vec<u8>> {
            if self.parent.is_dir() {
                fs::remove_dir_all(&self.parent)?;
                fs::write(&self.parent, "")?;
            }
            Ok(b"cert".to_vec())
        }
    }

    #[test]
    fn write_failure_is_surfaced_and_lock_released() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let parent = dir.path().join(".kube");
        fs::create_dir_all(&parent)?;
        let path = parent.join("config");
        let mutex = ProcessMutex::new();

        let mut settings = settings_at("foo", &path)?;
        settings.embed_certs = true;
        let reader = ParentTurnsIntoFile {
            parent: parent.clone(),
        };
        let result = update_with(&settings, &mutex, &reader);

        assert!(matches!(
            result,
            Err(UpdateError::Store(StoreError::Write { .. }))
        ));
        let spec = MutexSpec::for_operation(&path, UPDATE_TAG);
        assert!(mutex.try_acquire(&spec)?.is_some());

        Ok(())
    }

    #[test]
    fn busy_lock_fails_update() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config");
        let mutex = ProcessMutex::new();
        let spec = MutexSpec::for_operation(&path, UPDATE_TAG);
        let _held = mutex.acquire(&spec)?;

        // Default timeout is long, so hold the lock through a backend that
        // gives up immediately.
        struct Impatient<'a>(&'a ProcessMutex);
        impl NamedMutex for Impatient<'_> {
            fn try_acquire(&self, spec: &MutexSpec) -> crate::lock::Result<Option<crate::lock::Releaser>> {
                self.0.try_acquire(spec)
            }

            fn acquire(&self, spec: &MutexSpec) -> crate::lock::Result<crate::lock::Releaser> {
                self.0
                    .acquire(&spec.clone().with_timeout(Duration::from_millis(20)))
            }
        }

        let result = update_with(&settings_at("foo", &path)?, &Impatient(&mutex), &FsReader);
        assert!(matches!(
            result,
            Err(UpdateError::Lock(LockError::Timeout { .. }))
        ));
        assert_eq!(read_or_new(&path)?, Document::new());

        let message = result.map(|_| String::new()).unwrap_or_else(|err| err.to_string());
        assert!(message.starts_with("unable to acquire lock for kubestitch-"));
        assert!(message.contains(&spec.name));

        Ok(())
    }
}
