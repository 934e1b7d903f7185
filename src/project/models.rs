use crate::glob;
use crate::repository::resolver::normalize_url;
use serde::{Deserialize, Serialize};

/// Application project: the allow-list of source repositories its applications may use
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    pub name: String,
    /// Glob patterns over repository URLs; `*` allows every repository
    pub source_repos: Vec<String>,
}

impl Project {
    pub fn is_source_permitted(&self, repo_url: &str) -> bool {
        let normalized = normalize_url(repo_url);
        self.source_repos.iter().any(|pattern| {
            pattern == "*" || glob::matches(&normalize_url(pattern), &normalized)
        })
    }
}
