// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Project settings into a kubeconfig document.
//!
//! One [`Settings`] record becomes three entries that all share the cluster
//! name: a cluster entry, a credential entry, and a context entry binding the
//! two. Existing entries under that name are replaced wholesale. Entries
//! under other names are never touched.
//!
//! # Embedding
//!
//! Certificates are either referenced by path, or read from disk and inlined
//! into the document. Reading goes through a [`CertReader`], so callers
//! decide where bytes come from. When certificates are referenced by path, no
//! file is ever read.
//!
//! # Partial Projection
//!
//! Each entry is built in full before it is written into the document, but
//! the three entries are written one after another. A failure while reading
//! the client certificate leaves the new cluster entry in the document
//! already. Callers that persist the document must only do so after
//! projection returned successfully.

use crate::{
    document::{
        AuthInfo, Cluster, Context, Document, Extension, CLUSTER_EXTENSION, CONTEXT_EXTENSION,
    },
    settings::Settings,
};

use std::{
    fs,
    io,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Source of certificate bytes.
pub trait CertReader {
    /// Read full content of file at target path.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// Read certificates straight from the file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsReader;

impl CertReader for FsReader {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }
}

/// Populate document with entries described by settings.
///
/// Reads certificates from the file system when embedding.
///
/// # Errors
///
/// - Return [`PopulateError::EmptyClusterName`] if settings have no cluster
///   name. The document is untouched.
/// - Return [`PopulateError::ReadCert`] if a certificate cannot be read.
pub fn populate_from_settings(settings: &Settings, document: &mut Document) -> Result<()> {
    populate_with_reader(settings, document, &FsReader)
}

/// Populate document with entries described by settings, reading
/// certificates through target reader.
///
/// # Errors
///
/// - Return [`PopulateError::EmptyClusterName`] if settings have no cluster
///   name. The document is untouched.
/// - Return [`PopulateError::ReadCert`] if a certificate cannot be read.
#[instrument(skip_all, fields(cluster = %settings.cluster_name), level = "debug")]
pub fn populate_with_reader(
    settings: &Settings,
    document: &mut Document,
    reader: &impl CertReader,
) -> Result<()> {
    let name = settings.cluster_name.as_str();
    if name.is_empty() {
        return Err(PopulateError::EmptyClusterName);
    }

    let stamp = Extension::stamp();

    let mut cluster = Cluster {
        server: settings.cluster_server_address.clone(),
        ..Default::default()
    };
    if settings.embed_certs {
        cluster.certificate_authority_data = read_cert(
            reader,
            CertKind::CertificateAuthority,
            &settings.certificate_authority,
        )?;
    } else {
        cluster.certificate_authority = settings.certificate_authority.clone();
    }
    cluster
        .extensions
        .insert(CLUSTER_EXTENSION.into(), stamp.clone().into());
    document.clusters.insert(name.into(), cluster);
    debug!("wrote cluster entry {name:?}");

    let mut auth_info = AuthInfo::default();
    if settings.embed_certs {
        auth_info.client_certificate_data = read_cert(
            reader,
            CertKind::ClientCertificate,
            &settings.client_certificate,
        )?;
        auth_info.client_key_data =
            read_cert(reader, CertKind::ClientKey, &settings.client_key)?;
    } else {
        auth_info.client_certificate = settings.client_certificate.clone();
        auth_info.client_key = settings.client_key.clone();
    }
    document.auth_infos.insert(name.into(), auth_info);
    debug!("wrote credential entry {name:?}");

    let mut context = Context {
        cluster: name.into(),
        auth_info: name.into(),
        namespace: settings.namespace.clone(),
        ..Default::default()
    };
    context
        .extensions
        .insert(CONTEXT_EXTENSION.into(), stamp.into());
    document.contexts.insert(name.into(), context);
    debug!("wrote context entry {name:?}");

    if !settings.keep_context {
        debug!("select current context {name:?}");
        document.current_context = name.into();
    }

    Ok(())
}

fn read_cert(reader: &impl CertReader, kind: CertKind, path: &str) -> Result<Vec<u8>> {
    reader
        .read(Path::new(path))
        .map_err(|err| PopulateError::ReadCert {
            source: err,
            kind,
            path: path.into(),
        })
}

/// Kind of certificate file being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertKind {
    CertificateAuthority,
    ClientCertificate,
    ClientKey,
}

impl std::fmt::Display for CertKind {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.write_str(match self {
            Self::CertificateAuthority => "CertificateAuthority",
            Self::ClientCertificate => "ClientCertificate",
            Self::ClientKey => "ClientKey",
        })
    }
}

/// Projection error types.
#[derive(Debug, thiserror::Error)]
pub enum PopulateError {
    /// Settings carry no cluster name to key entries by.
    #[error("cluster name must not be empty")]
    EmptyClusterName,

    /// Certificate file cannot be read for embedding.
    #[error("reading {kind} {:?}", path.display())]
    ReadCert {
        #[source]
        source: io::Error,
        kind: CertKind,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = PopulateError> = std::result::Result<T, E>;
