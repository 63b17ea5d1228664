use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `version_manifest_v2.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VersionManifest {
    pub latest: LatestVersions,
    pub versions: Vec<VersionDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LatestVersions {
    pub release: String,
    pub snapshot: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseType {
    Release,
    Snapshot,
    OldBeta,
    OldAlpha,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub release_type: ReleaseType,
    /// Points at the per-version [`VersionMetadata`].
    pub url: String,
    pub time: DateTime<Utc>,
    pub release_time: DateTime<Utc>,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub compliance_level: Option<u8>,
}

/// The per-version document; only the parts needed to fetch the server
/// binary are modelled.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VersionMetadata {
    pub id: String,
    pub downloads: Downloads,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Downloads {
    /// Absent for versions that never shipped a dedicated server.
    #[serde(default)]
    pub server: Option<DownloadInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DownloadInfo {
    pub sha1: String,
    pub size: u64,
    pub url: String,
}

impl VersionManifest {
    pub fn find(&self, id: &str) -> Option<&VersionDescriptor> {
        self.versions.iter().find(|v| v.id == id)
    }
}

impl VersionMetadata {
    pub fn server_download(&self) -> Option<&DownloadInfo> {
        self.downloads.server.as_ref()
    }
}
