use serde::{Deserialize, Serialize};

/// Where an application takes its manifests from
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSource {
    pub repo_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub chart: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub target_revision: String,
    /// Name other sources of a multi-source application refer to as `$<ref>`
    #[serde(rename = "ref", skip_serializing_if = "String::is_empty")]
    pub ref_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub helm: Option<HelmSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HelmSource {
    pub value_files: Vec<String>,
    pub release_name: String,
    pub values: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSpec {
    pub project: String,
    pub source: Option<ApplicationSource>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<ApplicationSource>,
}

impl ApplicationSpec {
    pub fn has_multiple_sources(&self) -> bool {
        !self.sources.is_empty()
    }

    /// Current sources, single- or multi-source
    pub fn current_sources(&self) -> Vec<&ApplicationSource> {
        if self.has_multiple_sources() {
            self.sources.iter().collect()
        } else {
            self.source.iter().collect()
        }
    }
}

/// One past sync. Multi-source entries fill `sources`/`revisions`, single-source
/// entries fill `source`/`revision`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RevisionHistory {
    pub id: i64,
    pub revision: String,
    pub revisions: Option<Vec<String>>,
    pub source: ApplicationSource,
    pub sources: Vec<ApplicationSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationStatus {
    pub history: Vec<RevisionHistory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Application {
    pub name: String,
    pub namespace: String,
    pub spec: ApplicationSpec,
    pub status: ApplicationStatus,
}
