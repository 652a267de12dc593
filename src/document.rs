// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Kubeconfig document layout.
//!
//! Specify the layout of the client configuration document shared by
//! Kubernetes-compatible tooling to simplify the process of serialization and
//! deserialization. File I/O is left to [`store`](crate::store).
//!
//! # General Layout
//!
//! A kubeconfig document is composed of three named sections: clusters,
//! users, and contexts. A cluster describes how to reach an API server, a
//! user describes how to authenticate against it, and a context binds one
//! cluster and one user together with a default namespace. A top-level
//! `current-context` selects which context clients use by default.
//!
//! On disk each section is a list of `{name, <entry>}` pairs. In memory each
//! section is a map keyed by name, so a later entry with the same name wins.
//!
//! # Foreign Fields
//!
//! The document is shared with other tools that may write fields this crate
//! knows nothing about, e.g., exec plugins, bearer tokens, proxy settings.
//! Every entry keeps such fields around untouched so that rewriting the
//! document never drops somebody else's configuration.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Creator tag stamped into extension metadata.
pub const CREATED_BY: &str = "kubestitch";

/// Extension key used on cluster entries.
pub const CLUSTER_EXTENSION: &str = "cluster_info";

/// Extension key used on context entries.
pub const CONTEXT_EXTENSION: &str = "context_info";

/// Named extension blobs attached to an entry.
pub type Extensions = BTreeMap<String, Value>;

/// Fields of an entry that this crate does not model.
pub type Foreign = BTreeMap<String, Value>;

/// Multi-cluster client configuration document.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(from = "RawDocument", into = "RawDocument")]
pub struct Document {
    /// Cluster entries keyed by name.
    pub clusters: BTreeMap<String, Cluster>,

    /// Credential entries keyed by name.
    pub auth_infos: BTreeMap<String, AuthInfo>,

    /// Context entries keyed by name.
    pub contexts: BTreeMap<String, Context>,

    /// Name of the context clients select by default. Empty when unset.
    pub current_context: String,

    /// Client preferences, kept as-is.
    pub preferences: Mapping,

    /// Top-level fields not modeled above, kept as-is.
    pub foreign: Foreign,
}

impl Document {
    /// Construct new empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Render document into its on-disk YAML form.
    ///
    /// # Errors
    ///
    /// - Return [`DocumentError::Serialize`] if serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(DocumentError::Serialize)
    }
}

impl FromStr for Document {
    type Err = DocumentError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        // INVARIANT: A blank document is an empty document, not a parse error.
        if data.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(data).map_err(DocumentError::Deserialize)
    }
}

impl Display for Document {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.to_yaml()?.as_str())
    }
}

/// Cluster entry.
///
/// Describes how to reach an API server, and what authority to trust when
/// doing so.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Cluster {
    /// Address of the API server.
    #[serde(default)]
    pub server: String,

    /// Path to certificate authority file.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub certificate_authority: String,

    /// Inlined certificate authority content.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "base64_bytes")]
    pub certificate_authority_data: Vec<u8>,

    /// Provenance metadata and other extensions.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", with = "named_extensions")]
    pub extensions: Extensions,

    #[serde(flatten)]
    pub foreign: Foreign,
}

/// Credential entry.
///
/// Describes the client certificate and key used to authenticate.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct AuthInfo {
    /// Path to client certificate file.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_certificate: String,

    /// Inlined client certificate content.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "base64_bytes")]
    pub client_certificate_data: Vec<u8>,

    /// Path to client key file.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_key: String,

    /// Inlined client key content.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "base64_bytes")]
    pub client_key_data: Vec<u8>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", with = "named_extensions")]
    pub extensions: Extensions,

    #[serde(flatten)]
    pub foreign: Foreign,
}

/// Context entry.
///
/// Binds a cluster entry, a credential entry, and a namespace into one
/// selectable unit.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Context {
    /// Name of referenced cluster entry.
    #[serde(default)]
    pub cluster: String,

    /// Name of referenced credential entry.
    #[serde(default, rename = "user")]
    pub auth_info: String,

    /// Default namespace.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", with = "named_extensions")]
    pub extensions: Extensions,

    #[serde(flatten)]
    pub foreign: Foreign,
}

/// Provenance stamp attached to cluster and context entries.
///
/// Always generated fresh. Never read back from a previous write and merged.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Extension {
    pub created_by: String,
    pub last_update: String,
}

impl Extension {
    /// Stamp new extension with the current local time.
    pub fn stamp() -> Self {
        Self {
            created_by: CREATED_BY.into(),
            last_update: chrono::Local::now()
                .format("%a, %d %b %Y %H:%M:%S%.9f %z")
                .to_string(),
        }
    }

    /// Interpret extension blob as provenance stamp.
    ///
    /// Returns `None` if blob was written by somebody else in another shape.
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_yaml::from_value(value.clone()).ok()
    }
}

impl From<Extension> for Value {
    fn from(extension: Extension) -> Self {
        let mut mapping = Mapping::new();
        mapping.insert("created_by".into(), extension.created_by.into());
        mapping.insert("last_update".into(), extension.last_update.into());
        Value::Mapping(mapping)
    }
}

/// On-disk shape of [`Document`].
#[derive(Default, Deserialize, Serialize)]
struct RawDocument {
    #[serde(rename = "apiVersion", default)]
    api_version: Option<String>,

    #[serde(default)]
    clusters: Option<Vec<NamedCluster>>,

    #[serde(default)]
    contexts: Option<Vec<NamedContext>>,

    #[serde(rename = "current-context", default)]
    current_context: Option<String>,

    #[serde(default)]
    kind: Option<String>,

    #[serde(default)]
    preferences: Option<Mapping>,

    #[serde(default)]
    users: Option<Vec<NamedAuthInfo>>,

    #[serde(flatten)]
    foreign: Foreign,
}

#[derive(Deserialize, Serialize)]
struct NamedCluster {
    name: String,
    #[serde(default)]
    cluster: Option<Cluster>,
}

#[derive(Deserialize, Serialize)]
struct NamedAuthInfo {
    name: String,
    #[serde(default)]
    user: Option<AuthInfo>,
}

#[derive(Deserialize, Serialize)]
struct NamedContext {
    name: String,
    #[serde(default)]
    context: Option<Context>,
}

impl From<RawDocument> for Document {
    fn from(raw: RawDocument) -> Self {
        // INVARIANT: Later entries with the same name win.
        Self {
            clusters: raw
                .clusters
                .unwrap_or_default()
                .into_iter()
                .map(|named| (named.name, named.cluster.unwrap_or_default()))
                .collect(),
            auth_infos: raw
                .users
                .unwrap_or_default()
                .into_iter()
                .map(|named| (named.name, named.user.unwrap_or_default()))
                .collect(),
            contexts: raw
                .contexts
                .unwrap_or_default()
                .into_iter()
                .map(|named| (named.name, named.context.unwrap_or_default()))
                .collect(),
            current_context: raw.current_context.unwrap_or_default(),
            preferences: raw.preferences.unwrap_or_default(),
            foreign: raw.foreign,
        }
    }
}

impl From<Document> for RawDocument {
    fn from(document: Document) -> Self {
        Self {
            api_version: Some("v1".into()),
            clusters: Some(
                document
                    .clusters
                    .into_iter()
                    .map(|(name, cluster)| NamedCluster {
                        name,
                        cluster: Some(cluster),
                    })
                    .collect(),
            ),
            contexts: Some(
                document
                    .contexts
                    .into_iter()
                    .map(|(name, context)| NamedContext {
                        name,
                        context: Some(context),
                    })
                    .collect(),
            ),
            current_context: Some(document.current_context),
            kind: Some("Config".into()),
            preferences: Some(document.preferences),
            users: Some(
                document
                    .auth_infos
                    .into_iter()
                    .map(|(name, user)| NamedAuthInfo {
                        name,
                        user: Some(user),
                    })
                    .collect(),
            ),
            foreign: document.foreign,
        }
    }
}

/// Inlined file content is base64 on disk, raw bytes in memory.
mod base64_bytes {
    use super::*;
    use serde::{de::Error as _, Deserializer, Serializer};

    pub(super) fn serialize<S, T>(bytes: T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        serializer.serialize_str(STANDARD.encode(bytes).as_str())
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD.decode(encoded.trim()).map_err(D::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

/// Extensions are a list of `{name, extension}` pairs on disk.
mod named_extensions {
    use super::*;
    use serde::{Deserializer, Serializer};

    #[derive(Serialize)]
    struct NamedRef<'a> {
        name: &'a str,
        extension: &'a Value,
    }

    #[derive(Deserialize)]
    struct Named {
        name: String,
        #[serde(default)]
        extension: Value,
    }

    pub(super) fn serialize<S>(extensions: &Extensions, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(
            extensions
                .iter()
                .map(|(name, extension)| NamedRef { name, extension }),
        )
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Extensions, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Vec<Named>>::deserialize(deserializer)?
            .unwrap_or_default()
            .into_iter()
            .map(|named| (named.name, named.extension))
            .collect())
    }
}

/// Document layout error types.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// Failed to deserialize document.
    #[error(transparent)]
    Deserialize(serde_yaml::Error),

    /// Failed to serialize document.
    #[error(transparent)]
    Serialize(serde_yaml::Error),
}

impl From<DocumentError> for FmtError {
    fn from(_: DocumentError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = DocumentError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn deserialize_document() -> anyhow::Result<()> {
        let result: Document = indoc! {r#"
            apiVersion: v1
            kind: Config
            clusters:
            - name: foo
              cluster:
                server: https://10.0.0.1:8443
                certificate-authority-data: Y2EtYnl0ZXM=
                insecure-skip-tls-verify: false
            users:
            - name: foo
              user:
                token: s3cret
            contexts:
            - name: foo
              context:
                cluster: foo
                user: foo
                namespace: kube-system
            current-context: foo
            preferences: {}
        "#}
        .parse()?;

        let cluster = &result.clusters["foo"];
        assert_eq!(cluster.server, "https://10.0.0.1:8443");
        assert_eq!(cluster.certificate_authority_data, b"ca-bytes".to_vec());
        assert_eq!(
            cluster.foreign.get("insecure-skip-tls-verify"),
            Some(&Value::Bool(false))
        );
        assert_eq!(
            result.auth_infos["foo"].foreign.get("token"),
            Some(&Value::String("s3cret".into()))
        );
        assert_eq!(
            result.contexts["foo"],
            Context {
                cluster: "foo".into(),
                auth_info: "foo".into(),
                namespace: "kube-system".into(),
                ..Default::default()
            }
        );
        assert_eq!(result.current_context, "foo");

        Ok(())
    }

    #[test]
    fn serialize_document() -> anyhow::Result<()> {
        let mut document = Document::new();
        document.clusters.insert(
            "foo".into(),
            Cluster {
                server: "https://10.0.0.1:8443".into(),
                certificate_authority: "/certs/ca.crt".into(),
                ..Default::default()
            },
        );
        document.auth_infos.insert(
            "foo".into(),
            AuthInfo {
                client_certificate_data: b"cert".to_vec(),
                client_key_data: b"key".to_vec(),
                ..Default::default()
            },
        );
        document.contexts.insert(
            "foo".into(),
            Context {
                cluster: "foo".into(),
                auth_info: "foo".into(),
                ..Default::default()
            },
        );
        document.current_context = "foo".into();

        let expect = indoc! {r#"
            apiVersion: v1
            clusters:
            - name: foo
              cluster:
                server: https://10.0.0.1:8443
                certificate-authority: /certs/ca.crt
            contexts:
            - name: foo
              context:
                cluster: foo
                user: foo
            current-context: foo
            kind: Config
            preferences: {}
            users:
            - name: foo
              user:
                client-certificate-data: Y2VydA==
                client-key-data: a2V5
        "#};
        assert_eq!(document.to_string(), expect);

        Ok(())
    }

    #[test]
    fn foreign_fields_survive_rewrite() -> anyhow::Result<()> {
        let original: Document = indoc! {r#"
            apiVersion: v1
            kind: Config
            clusters:
            - name: other
              cluster:
                server: https://other:6443
                proxy-url: http://proxy:3128
                extensions:
                - name: vendor
                  extension:
                    anything: goes
            users:
            - name: other
              user:
                exec:
                  apiVersion: client.authentication.k8s.io/v1
                  command: aws
            contexts: []
            current-context: ""
            extensions:
            - name: top
              extension: {}
        "#}
        .parse()?;

        let reparsed: Document = original.to_yaml()?.parse()?;
        assert_eq!(reparsed, original);
        assert!(reparsed.clusters["other"].extensions.contains_key("vendor"));
        assert!(reparsed.auth_infos["other"].foreign.contains_key("exec"));
        assert!(reparsed.foreign.contains_key("extensions"));

        Ok(())
    }

    #[test]
    fn null_sections_and_blank_input_are_empty() -> anyhow::Result<()> {
        let result: Document = indoc! {r#"
            apiVersion: v1
            clusters: null
            contexts: null
            current-context: ""
            kind: Config
            preferences: {}
            users: null
        "#}
        .parse()?;
        assert_eq!(result, Document::new());

        let result: Document = "   \n".parse()?;
        assert_eq!(result, Document::new());

        Ok(())
    }

    #[test]
    fn null_entries_are_empty_entries() -> anyhow::Result<()> {
        let result: Document = indoc! {r#"
            clusters:
            - name: foo
              cluster: null
            users:
            - name: foo
              user: null
            contexts:
            - name: foo
              context: null
        "#}
        .parse()?;

        assert_eq!(result.clusters["foo"], Cluster::default());
        assert_eq!(result.auth_infos["foo"], AuthInfo::default());
        assert_eq!(result.contexts["foo"], Context::default());

        Ok(())
    }

    #[test]
    fn duplicate_names_collapse_last_wins() -> anyhow::Result<()> {
        let result: Document = indoc! {r#"
            clusters:
            - name: foo
              cluster:
                server: https://first
            - name: foo
              cluster:
                server: https://second
        "#}
        .parse()?;

        assert_eq!(result.clusters.len(), 1);
        assert_eq!(result.clusters["foo"].server, "https://second");

        Ok(())
    }

    #[test]
    fn malformed_document_is_an_error() {
        let result = "clusters: [this is: not valid".parse::<Document>();
        assert!(matches!(result, Err(DocumentError::Deserialize(_))));

        let result = "clusters: 42".parse::<Document>();
        assert!(matches!(result, Err(DocumentError::Deserialize(_))));
    }

    #[test]
    fn extension_stamp_reads_back() {
        let stamp = Extension::stamp();
        let value = Value::from(stamp.clone());
        assert_eq!(Extension::from_value(&value), Some(stamp));
        assert_eq!(Extension::from_value(&Value::Null), None);
    }
}
