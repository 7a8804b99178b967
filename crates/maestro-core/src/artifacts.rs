//! Artifacts - versioned blob storage
//!
//! Named binary/text blobs scoped to a session or a user. Every save
//! appends a new immutable version (starting at 1); loading without an
//! explicit version returns the highest one. Nothing is deleted implicitly.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Who an artifact belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "id")]
pub enum ArtifactScope {
    /// Visible within one session
    Session(String),
    /// Visible across all of a user's sessions
    User(String),
}

impl std::fmt::Display for ArtifactScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Session(id) => write!(f, "session:{id}"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// One immutable artifact version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact name
    pub name: String,
    /// Owning scope
    pub scope: ArtifactScope,
    /// Version number, starting at 1
    pub version: u64,
    /// Raw content
    pub content: Vec<u8>,
    /// SHA-256 of the content, hex encoded
    pub content_hash: String,
    /// Caller-supplied metadata
    pub metadata: serde_json::Value,
    /// When this version was saved
    pub created_at: DateTime<Utc>,
}

/// Listing entry for an artifact name within a scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSummary {
    /// Artifact name
    pub name: String,
    /// Highest stored version
    pub latest_version: u64,
    /// Hash of the latest version
    pub content_hash: String,
    /// When the latest version was saved
    pub updated_at: DateTime<Utc>,
}

fn hash_content(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// In-memory versioned artifact store.
///
/// Each save is a single atomic version append; no cross-artifact
/// transactions exist.
#[derive(Default)]
pub struct ArtifactStore {
    inner: RwLock<HashMap<(ArtifactScope, String), Vec<Artifact>>>,
}

impl ArtifactStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Save a new version. Returns the version number assigned.
    pub async fn save(
        &self,
        scope: ArtifactScope,
        name: &str,
        content: Vec<u8>,
        metadata: serde_json::Value,
    ) -> u64 {
        let mut inner = self.inner.write().await;
        let versions = inner.entry((scope.clone(), name.to_string())).or_default();
        let version = versions.len() as u64 + 1;
        let artifact = Artifact {
            name: name.to_string(),
            scope: scope.clone(),
            version,
            content_hash: hash_content(&content),
            content,
            metadata,
            created_at: Utc::now(),
        };
        versions.push(artifact);
        debug!(scope = %scope, name, version, "Artifact saved");
        version
    }

    /// Load a version. `None` loads the highest stored version.
    pub async fn load(
        &self,
        scope: &ArtifactScope,
        name: &str,
        version: Option<u64>,
    ) -> Result<Artifact> {
        let inner = self.inner.read().await;
        let versions = inner
            .get(&(scope.clone(), name.to_string()))
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::ArtifactNotFound {
                name: name.to_string(),
                version,
            })?;
        match version {
            None => Ok(versions.last().expect("non-empty").clone()),
            Some(v) => versions
                .iter()
                .find(|a| a.version == v)
                .cloned()
                .ok_or_else(|| Error::ArtifactNotFound {
                    name: name.to_string(),
                    version,
                }),
        }
    }

    /// List artifacts in a scope, sorted by name. Finite and restartable.
    pub async fn list(&self, scope: &ArtifactScope) -> Vec<ArtifactSummary> {
        let inner = self.inner.read().await;
        let mut summaries: Vec<ArtifactSummary> = inner
            .iter()
            .filter(|((s, _), versions)| s == scope && !versions.is_empty())
            .map(|((_, name), versions)| {
                let latest = versions.last().expect("non-empty");
                ArtifactSummary {
                    name: name.clone(),
                    latest_version: latest.version,
                    content_hash: latest.content_hash.clone(),
                    updated_at: latest.created_at,
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Delete all versions of an artifact. Returns whether it existed.
    pub async fn delete(&self, scope: &ArtifactScope, name: &str) -> bool {
        let mut inner = self.inner.write().await;
        inner.remove(&(scope.clone(), name.to_string())).is_some()
    }
}
