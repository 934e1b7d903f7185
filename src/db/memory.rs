use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{ApplicationLister, ProjectLookup, RepoScope, RepositoryStore, StoreError};
use crate::application::models::Application;
use crate::project::Project;
use crate::repository::models::{RepoCredentials, Repository};
use crate::repository::resolver::normalize_url;

struct StoredRepo {
    scope: RepoScope,
    key: String,
    record: Repository,
}

impl StoredRepo {
    fn matches(&self, scope: RepoScope, key: &str, project: &str) -> bool {
        self.scope == scope && self.key == key && self.record.project == project
    }
}

/// In-process store. Listing order is insertion order.
#[derive(Default)]
pub struct MemoryStore {
    repositories: RwLock<Vec<StoredRepo>>,
    credentials: RwLock<Vec<RepoCredentials>>,
    applications: RwLock<HashMap<(String, String), Application>>,
    projects: RwLock<HashMap<String, Project>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_repository_credentials(&self, creds: RepoCredentials) {
        let key = normalize_url(&creds.url);
        let mut credentials = self.credentials.write().await;
        credentials.retain(|c| normalize_url(&c.url) != key);
        credentials.push(creds);
    }

    pub async fn insert_application(&self, app: Application) {
        self.applications
            .write()
            .await
            .insert((app.namespace.clone(), app.name.clone()), app);
    }

    pub async fn insert_project(&self, project: Project) {
        self.projects
            .write()
            .await
            .insert(project.name.clone(), project);
    }
}

#[async_trait]
impl RepositoryStore for MemoryStore {
    async fn list_repositories(&self, scope: RepoScope) -> Result<Vec<Repository>, StoreError> {
        Ok(self
            .repositories
            .read()
            .await
            .iter()
            .filter(|r| r.scope == scope)
            .map(|r| r.record.clone())
            .collect())
    }

    async fn list_helm_repositories(&self) -> Result<Vec<Repository>, StoreError> {
        Ok(self
            .list_repositories(RepoScope::Read)
            .await?
            .into_iter()
            .filter(|r| r.repo_type == "helm")
            .collect())
    }

    async fn get_repository(
        &self,
        scope: RepoScope,
        url: &str,
        project: &str,
    ) -> Result<Repository, StoreError> {
        let key = normalize_url(url);
        self.repositories
            .read()
            .await
            .iter()
            .find(|r| r.matches(scope, &key, project))
            .map(|r| r.record.clone())
            .ok_or_else(|| StoreError::NotFound(url.to_string()))
    }

    async fn create_repository(
        &self,
        scope: RepoScope,
        repo: &Repository,
    ) -> Result<Repository, StoreError> {
        let key = normalize_url(&repo.repo);
        let mut repositories = self.repositories.write().await;
        if repositories
            .iter()
            .any(|r| r.matches(scope, &key, &repo.project))
        {
            return Err(StoreError::AlreadyExists(repo.repo.clone()));
        }
        repositories.push(StoredRepo {
            scope,
            key,
            record: repo.clone(),
        });
        Ok(repo.clone())
    }

    async fn update_repository(
        &self,
        scope: RepoScope,
        repo: &Repository,
    ) -> Result<Repository, StoreError> {
        let key = normalize_url(&repo.repo);
        let mut repositories = self.repositories.write().await;
        let stored = repositories
            .iter_mut()
            .find(|r| r.matches(scope, &key, &repo.project))
            .ok_or_else(|| StoreError::NotFound(repo.repo.clone()))?;
        stored.record = repo.clone();
        Ok(repo.clone())
    }

    async fn delete_repository(
        &self,
        scope: RepoScope,
        url: &str,
        project: &str,
    ) -> Result<(), StoreError> {
        let key = normalize_url(url);
        let mut repositories = self.repositories.write().await;
        let before = repositories.len();
        repositories.retain(|r| !r.matches(scope, &key, project));
        if repositories.len() == before {
            return Err(StoreError::NotFound(url.to_string()));
        }
        Ok(())
    }

    async fn get_repository_credentials(
        &self,
        url: &str,
    ) -> Result<Option<RepoCredentials>, StoreError> {
        let wanted = normalize_url(url);
        Ok(self
            .credentials
            .read()
            .await
            .iter()
            .filter(|c| wanted.starts_with(&normalize_url(&c.url)))
            .max_by_key(|c| normalize_url(&c.url).len())
            .cloned())
    }
}

#[async_trait]
impl ApplicationLister for MemoryStore {
    async fn get_application(
        &self,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<Option<Application>> {
        Ok(self
            .applications
            .read()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

#[async_trait]
impl ProjectLookup for MemoryStore {
    async fn get_project(&self, name: &str) -> anyhow::Result<Option<Project>> {
        Ok(self.projects.read().await.get(name).cloned())
    }
}
