// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Cluster entry settings.
//!
//! A [`Settings`] record describes one cluster entry to install into a
//! kubeconfig document. The cluster name doubles as the name of the
//! credential entry and the context entry, so one record always produces
//! exactly one cluster, credential, and context triple sharing one name.
//!
//! # Profiles
//!
//! Settings can be kept on disk as TOML profiles:
//!
//! ```toml
//! cluster_name = "minikube"
//! namespace = "default"
//! cluster_server_address = "https://192.168.49.2:8443"
//! certificate_authority = "~/.minikube/ca.crt"
//! client_certificate = "~/.minikube/profiles/minikube/client.crt"
//! client_key = "~/.minikube/profiles/minikube/client.key"
//! embed_certs = true
//! ```
//!
//! Certificate paths undergo shell expansion when a profile is parsed.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
    sync::OnceLock,
};

/// Settings for one cluster entry.
#[derive(Default, Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Name of the cluster, credential, and context entries.
    pub cluster_name: String,

    /// Default namespace for the context entry.
    pub namespace: String,

    /// Address of the API server.
    pub cluster_server_address: String,

    /// Path to client certificate file.
    pub client_certificate: String,

    /// Path to certificate authority file.
    pub certificate_authority: String,

    /// Path to client key file.
    pub client_key: String,

    /// Keep the document's current context instead of selecting this one.
    pub keep_context: bool,

    /// Inline certificate content instead of referencing files by path.
    pub embed_certs: bool,

    /// Path of the target kubeconfig document. Written once, read many.
    #[serde(skip)]
    kubeconfig_path: OnceLock<PathBuf>,
}

impl Settings {
    /// Construct new settings for target cluster name.
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            ..Default::default()
        }
    }

    /// Set path of the target kubeconfig document.
    ///
    /// Safe to call from any thread, but only once.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError::PathAlreadySet`] if the path was set before.
    pub fn set_path(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        self.kubeconfig_path
            .set(path)
            .map_err(|rejected| SettingsError::PathAlreadySet {
                current: self.kubeconfig_path.get().cloned().unwrap_or_default(),
                rejected,
            })
    }

    /// Set path of the target kubeconfig document while constructing.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError::PathAlreadySet`] if the path was set before.
    pub fn with_path(self, path: impl Into<PathBuf>) -> Result<Self> {
        self.set_path(path)?;
        Ok(self)
    }

    pub(crate) fn file_path(&self) -> Result<&Path> {
        self.kubeconfig_path
            .get()
            .map(PathBuf::as_path)
            .ok_or(SettingsError::PathNotSet)
    }
}

impl FromStr for Settings {
    type Err = SettingsError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(SettingsError::Deserialize)?;

        // INVARIANT: Perform shell expansion on certificate paths.
        for path in [
            &mut settings.client_certificate,
            &mut settings.certificate_authority,
            &mut settings.client_key,
        ] {
            *path = shellexpand::full(path.as_str())
                .map_err(SettingsError::ShellExpansion)?
                .into_owned();
        }

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(SettingsError::Serialize)?
                .as_str(),
        )
    }
}

/// Settings error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SettingsError {
    /// Kubeconfig path was read before being set.
    #[error("kubeconfig path has not been set")]
    PathNotSet,

    /// Kubeconfig path was set twice.
    #[error(
        "kubeconfig path already set to {:?}, refusing {:?}",
        current.display(),
        rejected.display()
    )]
    PathAlreadySet { current: PathBuf, rejected: PathBuf },

    /// Failed to deserialize settings profile.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize settings profile.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on settings profile.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<SettingsError> for FmtError {
    fn from(_: SettingsError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
pub type Result<T, E = SettingsError> = std::result::Result<T, E>;
