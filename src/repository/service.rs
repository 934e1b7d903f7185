use std::collections::BTreeMap;
use std::sync::Arc;

use super::connection::{ConnectionMonitor, ConnectionStateCache, CREDENTIALS_CONFIGURATION_MESSAGE};
use super::models::{
    ConnectionState, RepoAccessQuery, RepoAppDetailsQuery, RepoAppsQuery, RepoCreateRequest,
    RepoQuery, RepoResponse, RepoUpdateRequest, Repository, RepositoryList, RepositorySummary,
    RepositoryView,
};
use super::resolver;
use crate::application::models::Application;
use crate::application::{is_source_in_history, parse_qualified_name};
use crate::auth::rbac::{rbac_object, Action, Enforcer, Resource};
use crate::auth::Principal;
use crate::db::{ApplicationLister, ProjectLookup, RepoScope, RepositoryStore, StoreError};
use crate::error::{ErrorKind, ServerError, ServerErrorExt};
use crate::reposerver::models::{
    AppDetailsRequest, AppList, HelmCharts, RefTarget, Refs, RepoAppDetails, RepositoryTarget,
};
use crate::reposerver::{RepoServer, RepoServerError, RepoTester};

/// External collaborators the service is wired with
pub struct Collaborators {
    pub store: Arc<dyn RepositoryStore>,
    pub applications: Arc<dyn ApplicationLister>,
    pub projects: Arc<dyn ProjectLookup>,
    pub tester: Arc<dyn RepoTester>,
    pub repo_server: Arc<dyn RepoServer>,
    pub enforcer: Arc<dyn Enforcer>,
    pub cache: Arc<dyn ConnectionStateCache>,
}

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Enables the write-scoped operations
    pub hydrator_enabled: bool,
    /// Namespace for unqualified application names
    pub namespace: String,
    pub probe_concurrency: usize,
}

/// Repository registry operations, each gated by RBAC
pub struct RepositoryService {
    store: Arc<dyn RepositoryStore>,
    applications: Arc<dyn ApplicationLister>,
    projects: Arc<dyn ProjectLookup>,
    tester: Arc<dyn RepoTester>,
    repo_server: Arc<dyn RepoServer>,
    enforcer: Arc<dyn Enforcer>,
    monitor: ConnectionMonitor,
    options: ServiceOptions,
}

fn resource_for(scope: RepoScope) -> Resource {
    match scope {
        RepoScope::Read => Resource::Repositories,
        RepoScope::Write => Resource::WriteRepositories,
    }
}

fn kind_label(scope: RepoScope) -> &'static str {
    match scope {
        RepoScope::Read => "repository",
        RepoScope::Write => "write repository",
    }
}

/// Serialized names of the fields in which two records differ. Values are
/// never included, they may be secrets.
fn differing_fields(existing: &Repository, incoming: &Repository) -> Vec<String> {
    let (Ok(serde_json::Value::Object(a)), Ok(serde_json::Value::Object(b))) =
        (serde_json::to_value(existing), serde_json::to_value(incoming))
    else {
        return Vec::new();
    };
    a.iter()
        .filter(|(key, value)| b.get(*key) != Some(*value))
        .map(|(key, _)| key.clone())
        .collect()
}

fn spec_differs_message(kind: &str, existing: &Repository, incoming: &Repository) -> String {
    format!(
        "existing {} spec is different; use upsert flag to force update; difference in fields: {}",
        kind,
        differing_fields(existing, incoming).join(", ")
    )
}

/// Store failure for a keyed lookup, with the key attached for the server log
fn store_error(err: StoreError, url: &str, project: &str) -> ServerError {
    ServerError::from(err)
        .with_context("repo", url)
        .with_context("project", project)
}

/// Map a failed probe to what the caller may see
fn probe_error(repo: &Repository, err: RepoServerError) -> ServerError {
    match err {
        RepoServerError::CredentialsConfiguration(detail) => {
            tracing::warn!(repo = %repo.repo, project = %repo.project, "credentials configuration error: {}", detail);
            ServerError::invalid_argument(CREDENTIALS_CONFIGURATION_MESSAGE)
        }
        RepoServerError::Server { message, .. } => {
            ServerError::invalid_argument(format!("Unable to connect to repository: {}", message))
        }
        other => repo_server_error(other),
    }
}

/// Map a failed discovery call to what the caller may see
fn repo_server_error(err: RepoServerError) -> ServerError {
    match err {
        RepoServerError::CredentialsConfiguration(detail) => {
            tracing::warn!("credentials configuration error: {}", detail);
            ServerError::invalid_argument(CREDENTIALS_CONFIGURATION_MESSAGE)
        }
        RepoServerError::Unreachable(detail) => ServerError::new(
            ErrorKind::Unavailable,
            format!("failed to connect to repo-server: {}", detail),
        ),
        RepoServerError::Transport(e) => {
            ServerError::unavailable_anyhow(e.into(), "failed to connect to repo-server")
        }
        RepoServerError::Server { status, message } if status.is_client_error() => {
            ServerError::invalid_argument(message)
        }
        RepoServerError::Server { message, .. } => ServerError::internal(message),
    }
}

impl RepositoryService {
    pub fn new(collaborators: Collaborators, options: ServiceOptions) -> Self {
        let monitor = ConnectionMonitor::new(
            collaborators.store.clone(),
            collaborators.tester.clone(),
            collaborators.cache,
            options.probe_concurrency,
        );
        Self {
            store: collaborators.store,
            applications: collaborators.applications,
            projects: collaborators.projects,
            tester: collaborators.tester,
            repo_server: collaborators.repo_server,
            enforcer: collaborators.enforcer,
            monitor,
            options,
        }
    }

    /// Write-scoped operations are unreachable unless the hydrator is enabled
    fn require_scope(&self, scope: RepoScope) -> Result<(), ServerError> {
        if scope == RepoScope::Write && !self.options.hydrator_enabled {
            return Err(ServerError::unimplemented("hydrator is disabled"));
        }
        Ok(())
    }

    /// Direct lookup; a missing record is indistinguishable from a denial
    async fn lookup(&self, scope: RepoScope, url: &str, project: &str) -> Result<Repository, ServerError> {
        match self.store.get_repository(scope, url, project).await {
            Ok(repo) => Ok(repo),
            Err(StoreError::NotFound(_)) => Err(ServerError::permission_denied()),
            Err(e) => Err(store_error(e, url, project)),
        }
    }

    /// Lookup by `(url, project)` that falls back to the global record for
    /// the URL when the project has none of its own
    async fn lookup_with_fallback(
        &self,
        url: &str,
        project: &str,
    ) -> Result<Repository, StoreError> {
        match self.store.get_repository(RepoScope::Read, url, project).await {
            Err(StoreError::NotFound(_)) if !project.is_empty() => {
                self.store.get_repository(RepoScope::Read, url, "").await
            }
            other => other,
        }
    }

    async fn probe(&self, repo: &Repository) -> Result<(), ServerError> {
        self.tester
            .test_repository(repo)
            .await
            .map_err(|e| probe_error(repo, e))
    }

    /// Fill in template credentials for a global record without credentials of its own
    async fn with_inherited_credentials(&self, mut repo: Repository) -> Result<Repository, ServerError> {
        if repo.project.is_empty() && !repo.has_credentials() {
            if let Some(template) = self.store.get_repository_credentials(&repo.repo).await? {
                repo.copy_credentials_from(&template);
            }
        }
        Ok(repo)
    }

    /// Normalize, sanitize and RBAC-filter all records of a scope, then
    /// attach connection states
    async fn prepare_list(
        &self,
        principal: &Principal,
        scope: RepoScope,
        force_refresh: bool,
    ) -> Result<Vec<RepositoryView>, ServerError> {
        let resource = resource_for(scope);
        let items: Vec<RepositoryView> = self
            .store
            .list_repositories(scope)
            .await?
            .into_iter()
            .map(|repo| repo.normalize().view())
            .filter(|view| {
                self.enforcer.enforce(
                    principal,
                    resource,
                    Action::Get,
                    &rbac_object(&view.project, &view.repo),
                )
            })
            .collect();

        self.monitor.refresh_all(scope, items, force_refresh).await
    }

    pub async fn list(
        &self,
        principal: &Principal,
        scope: RepoScope,
        query: &RepoQuery,
    ) -> Result<RepositoryList, ServerError> {
        self.require_scope(scope)?;
        let items = self
            .prepare_list(principal, scope, query.force_refresh)
            .await?;
        Ok(RepositoryList { items })
    }

    pub async fn get(
        &self,
        principal: &Principal,
        scope: RepoScope,
        query: &RepoQuery,
    ) -> Result<RepositoryView, ServerError> {
        self.require_scope(scope)?;
        let items = self
            .prepare_list(principal, scope, query.force_refresh)
            .await?;
        let repo = resolver::resolve(&items, &query.repo, &query.app_project)?.clone();

        self.enforcer.enforce_err(
            principal,
            resource_for(scope),
            Action::Get,
            &rbac_object(&repo.project, &repo.repo),
        )?;

        match self
            .store
            .get_repository(scope, &query.repo, &repo.project)
            .await
        {
            Ok(_) => Ok(repo),
            Err(StoreError::NotFound(_)) => {
                let label = match scope {
                    RepoScope::Read => "repo",
                    RepoScope::Write => "write repo",
                };
                Err(ServerError::not_found(format!(
                    "{} '{}' not found",
                    label, query.repo
                )))
            }
            Err(e) => Err(store_error(e, &query.repo, &repo.project)),
        }
    }

    /// Create a repository, idempotently.
    ///
    /// An identical existing record is a no-op. A differing one is overwritten
    /// when `upsert` is set, otherwise the call fails with a conflict naming
    /// the differing fields.
    pub async fn create(
        &self,
        principal: &Principal,
        scope: RepoScope,
        request: RepoCreateRequest,
    ) -> Result<RepositorySummary, ServerError> {
        self.require_scope(scope)?;
        let repo = request
            .repo
            .ok_or_else(|| ServerError::invalid_argument("missing payload in request"))?;

        self.enforcer.enforce_err(
            principal,
            resource_for(scope),
            Action::Create,
            &rbac_object(&repo.project, &repo.repo),
        )?;
        repo.validate_credentials()
            .map_err(|e| ServerError::invalid_argument(e.to_string()))?;

        match scope {
            // Project-scoped repositories are registered without a probe
            RepoScope::Read if repo.project.is_empty() => {
                let probe_target = self.with_inherited_credentials(repo.clone()).await?;
                self.probe(&probe_target).await?;
            }
            RepoScope::Read => {}
            RepoScope::Write => {
                if !repo.has_credentials() {
                    return Err(ServerError::invalid_argument("missing credentials in request"));
                }
                self.probe(&repo).await?;
            }
        }

        let mut record = repo.normalize();
        record.connection_state = ConnectionState::default();

        match self.store.create_repository(scope, &record).await {
            Ok(stored) => {
                tracing::info!(repo = %stored.repo, project = %stored.project, scope = scope.as_str(), "Created repository");
                Ok(stored.summary())
            }
            Err(StoreError::AlreadyExists(_)) => {
                let existing = self
                    .store
                    .get_repository(scope, &record.repo, &record.project)
                    .await
                    .map_err(|e| {
                        ServerError::internal(format!(
                            "unable to check existing repository details: {}",
                            e
                        ))
                    })?;
                let mut existing = existing.normalize();
                existing.connection_state = record.connection_state.clone();

                if existing == record {
                    tracing::debug!(repo = %record.repo, "Repository already exists with identical spec");
                    Ok(existing.summary())
                } else if request.upsert {
                    record.project = existing.project.clone();
                    let stored = self.store.update_repository(scope, &record).await?;
                    self.monitor.invalidate(scope, &stored.repo, &stored.project).await;
                    tracing::info!(repo = %stored.repo, project = %stored.project, scope = scope.as_str(), "Upserted repository");
                    Ok(stored.summary())
                } else {
                    Err(ServerError::conflict(spec_differs_message(
                        kind_label(scope),
                        &existing,
                        &record,
                    )))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn update(
        &self,
        principal: &Principal,
        scope: RepoScope,
        request: RepoUpdateRequest,
    ) -> Result<RepositorySummary, ServerError> {
        self.require_scope(scope)?;
        let repo = request
            .repo
            .ok_or_else(|| ServerError::invalid_argument("missing payload in request"))?;

        let existing = self.lookup(scope, &repo.repo, &repo.project).await?;
        let resource = resource_for(scope);
        // Both where the repository is and where it will be
        self.enforcer.enforce_err(
            principal,
            resource,
            Action::Update,
            &rbac_object(&existing.project, &existing.repo),
        )?;
        self.enforcer.enforce_err(
            principal,
            resource,
            Action::Update,
            &rbac_object(&repo.project, &repo.repo),
        )?;
        repo.validate_credentials()
            .map_err(|e| ServerError::invalid_argument(e.to_string()))?;

        let mut record = repo.normalize();
        record.connection_state = ConnectionState::default();
        let stored = self.store.update_repository(scope, &record).await?;
        self.monitor.invalidate(scope, &stored.repo, &stored.project).await;

        tracing::info!(repo = %stored.repo, project = %stored.project, scope = scope.as_str(), "Updated repository");
        Ok(stored.summary())
    }

    pub async fn delete(
        &self,
        principal: &Principal,
        scope: RepoScope,
        query: &RepoQuery,
    ) -> Result<RepoResponse, ServerError> {
        self.require_scope(scope)?;
        let items = self
            .prepare_list(principal, scope, query.force_refresh)
            .await?;
        let repo = resolver::resolve(&items, &query.repo, &query.app_project)?.clone();

        self.enforcer.enforce_err(
            principal,
            resource_for(scope),
            Action::Delete,
            &rbac_object(&repo.project, &repo.repo),
        )?;

        self.monitor.invalidate(scope, &repo.repo, &repo.project).await;
        self.store
            .delete_repository(scope, &repo.repo, &repo.project)
            .await?;

        tracing::info!(repo = %repo.repo, project = %repo.project, scope = scope.as_str(), "Deleted repository");
        Ok(RepoResponse {})
    }

    /// Check that a repository is reachable with the supplied credentials
    /// without registering it
    pub async fn validate_access(
        &self,
        principal: &Principal,
        scope: RepoScope,
        query: RepoAccessQuery,
    ) -> Result<RepoResponse, ServerError> {
        self.require_scope(scope)?;
        self.enforcer.enforce_err(
            principal,
            resource_for(scope),
            Action::Create,
            &rbac_object(&query.project, &query.repo),
        )?;

        let mut repo = query.into_repository();
        repo.validate_credentials()
            .map_err(|e| ServerError::invalid_argument(e.to_string()))?;
        if scope == RepoScope::Read {
            repo = self.with_inherited_credentials(repo).await?;
        }

        self.probe(&repo).await?;
        Ok(RepoResponse {})
    }

    /// Looks up `(url, app_project)` and enforces read access on it
    async fn readable_repo(
        &self,
        principal: &Principal,
        url: &str,
        app_project: &str,
    ) -> Result<Repository, ServerError> {
        let repo = match self.lookup_with_fallback(url, app_project).await {
            Ok(repo) => repo,
            Err(StoreError::NotFound(_)) => return Err(ServerError::permission_denied()),
            Err(e) => return Err(store_error(e, url, app_project)),
        };
        self.enforcer.enforce_err(
            principal,
            Resource::Repositories,
            Action::Get,
            &rbac_object(&repo.project, &repo.repo),
        )?;
        Ok(repo)
    }

    pub async fn list_refs(&self, principal: &Principal, query: &RepoQuery) -> Result<Refs, ServerError> {
        let repo = self
            .readable_repo(principal, &query.repo, &query.app_project)
            .await?;
        self.repo_server
            .list_refs(&repo)
            .await
            .map_err(repo_server_error)
    }

    pub async fn list_oci_tags(&self, principal: &Principal, query: &RepoQuery) -> Result<Refs, ServerError> {
        let repo = self
            .readable_repo(principal, &query.repo, &query.app_project)
            .await?;
        self.repo_server
            .list_oci_tags(&repo)
            .await
            .map_err(repo_server_error)
    }

    pub async fn get_helm_charts(
        &self,
        principal: &Principal,
        query: &RepoQuery,
    ) -> Result<HelmCharts, ServerError> {
        let repo = self
            .readable_repo(principal, &query.repo, &query.app_project)
            .await?;
        self.repo_server
            .get_helm_charts(&repo)
            .await
            .map_err(repo_server_error)
    }

    /// App discovery clones the repository and runs config management tools,
    /// so it also requires the right to create or update the application.
    pub async fn list_apps(&self, principal: &Principal, query: &RepoAppsQuery) -> Result<AppList, ServerError> {
        let repo = self
            .readable_repo(principal, &query.repo, &query.app_project)
            .await?;

        let app_object = format!("{}/{}", query.app_project, query.app_name);
        if !self
            .enforcer
            .enforce(principal, Resource::Applications, Action::Create, &app_object)
            && !self
                .enforcer
                .enforce(principal, Resource::Applications, Action::Update, &app_object)
        {
            return Err(ServerError::permission_denied());
        }
        self.check_permitted_in_project(&query.repo, &query.app_project)
            .await?;

        self.repo_server
            .list_apps(&repo, &query.revision)
            .await
            .map_err(repo_server_error)
    }

    /// Parameters of one application source. For an existing application the
    /// source must be current or part of its sync history.
    pub async fn get_app_details(
        &self,
        principal: &Principal,
        query: RepoAppDetailsQuery,
    ) -> Result<RepoAppDetails, ServerError> {
        let source = query
            .source
            .ok_or_else(|| ServerError::invalid_argument("missing payload in request"))?;
        let repo = self
            .readable_repo(principal, &source.repo_url, &query.app_project)
            .await?;

        let (namespace, name) = parse_qualified_name(&query.app_name, &self.options.namespace);
        let app = self
            .applications
            .get_application(namespace, name)
            .await
            .internal_err("Failed to get application")?;

        let app_object = rbac_object(&query.app_project, &query.app_name);
        self.enforcer
            .enforce_err(principal, Resource::Applications, Action::Get, &app_object)?;

        match &app {
            // Not created yet: revealing details requires the right to create it
            None => self.enforcer.enforce_err(
                principal,
                Resource::Applications,
                Action::Create,
                &app_object,
            )?,
            Some(app) => {
                if app.spec.project != query.app_project {
                    return Err(ServerError::permission_denied());
                }
                if !is_source_in_history(app, &source, query.source_index, query.version_id) {
                    tracing::debug!(app = %query.app_name, repo = %source.repo_url, "Source not in application history");
                    return Err(ServerError::permission_denied());
                }
            }
        }
        self.check_permitted_in_project(&source.repo_url, &query.app_project)
            .await?;

        let helm_repos = self
            .store
            .list_helm_repositories()
            .await?
            .iter()
            .map(RepositoryTarget::from)
            .collect();
        let ref_sources = match &app {
            Some(app) if app.spec.has_multiple_sources() => {
                self.ref_sources(app, &query.app_project).await?
            }
            _ => BTreeMap::new(),
        };

        self.repo_server
            .get_app_details(AppDetailsRequest {
                repo: RepositoryTarget::from(&repo),
                source,
                app_name: query.app_name,
                helm_repos,
                ref_sources,
            })
            .await
            .map_err(repo_server_error)
    }

    /// `$<ref>` sources of a multi-source application. Unregistered URLs are
    /// passed on without credentials.
    async fn ref_sources(
        &self,
        app: &Application,
        project: &str,
    ) -> Result<BTreeMap<String, RefTarget>, ServerError> {
        let mut refs = BTreeMap::new();
        for source in app.spec.sources.iter().filter(|s| !s.ref_name.is_empty()) {
            let repo = match self.lookup_with_fallback(&source.repo_url, project).await {
                Ok(repo) => repo,
                Err(StoreError::NotFound(_)) => Repository {
                    repo: source.repo_url.clone(),
                    ..Default::default()
                }
                .normalize(),
                Err(e) => {
                    return Err(ServerError::internal_anyhow(
                        e.into(),
                        "failed to get ref sources",
                    ))
                }
            };
            refs.insert(
                format!("${}", source.ref_name),
                RefTarget {
                    repo: RepositoryTarget::from(&repo),
                    target_revision: source.target_revision.clone(),
                    chart: source.chart.clone(),
                },
            );
        }
        Ok(refs)
    }

    async fn check_permitted_in_project(&self, repo_url: &str, project_name: &str) -> Result<(), ServerError> {
        let project = self
            .projects
            .get_project(project_name)
            .await
            .internal_err("Failed to get project")?
            .ok_or_else(|| ServerError::not_found(format!("project '{}' not found", project_name)))?;

        if !project.is_source_permitted(repo_url) {
            return Err(ServerError::forbidden(format!(
                "repository '{}' not permitted in project '{}'",
                repo_url, project_name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::models::{
        ApplicationSource, ApplicationSpec, ApplicationStatus, RevisionHistory,
    };
    use crate::db::MemoryStore;
    use crate::project::Project;
    use crate::repository::connection::{ConnectionCacheError, MokaConnectionCache};
    use crate::repository::models::{ConnectionStatus, RepoCredentials};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Fails for the listed URLs or usernames, succeeds otherwise, and records what it probed
    #[derive(Default)]
    struct ScriptedTester {
        failing: HashSet<String>,
        failing_users: HashSet<String>,
        calls: AtomicUsize,
        probed: Mutex<Vec<Repository>>,
    }

    impl ScriptedTester {
        fn failing(urls: &[&str]) -> Self {
            Self {
                failing: urls.iter().map(|u| u.to_string()).collect(),
                ..Default::default()
            }
        }

        fn failing_users(users: &[&str]) -> Self {
            Self {
                failing_users: users.iter().map(|u| u.to_string()).collect(),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RepoTester for ScriptedTester {
        async fn test_repository(&self, repo: &Repository) -> Result<(), RepoServerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.probed.lock().unwrap().push(repo.clone());
            if self.failing.contains(&repo.repo) || self.failing_users.contains(&repo.username) {
                return Err(RepoServerError::Server {
                    status: reqwest::StatusCode::BAD_GATEWAY,
                    message: "repository not accessible".to_string(),
                });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeRepoServer {
        details_requests: Mutex<Vec<AppDetailsRequest>>,
    }

    #[async_trait]
    impl RepoServer for FakeRepoServer {
        async fn list_refs(&self, _repo: &Repository) -> Result<Refs, RepoServerError> {
            Ok(Refs {
                branches: vec!["main".to_string()],
                tags: vec![],
            })
        }

        async fn list_oci_tags(&self, _repo: &Repository) -> Result<Refs, RepoServerError> {
            Ok(Refs {
                branches: vec![],
                tags: vec!["1.0.0".to_string()],
            })
        }

        async fn list_apps(&self, _repo: &Repository, _revision: &str) -> Result<AppList, RepoServerError> {
            Ok(AppList::default())
        }

        async fn get_app_details(
            &self,
            request: AppDetailsRequest,
        ) -> Result<RepoAppDetails, RepoServerError> {
            self.details_requests.lock().unwrap().push(request);
            Ok(RepoAppDetails {
                app_type: "Helm".to_string(),
                ..Default::default()
            })
        }

        async fn get_helm_charts(&self, _repo: &Repository) -> Result<HelmCharts, RepoServerError> {
            Ok(HelmCharts::default())
        }
    }

    /// Allows everything except the listed `(resource, action, object)` triples
    #[derive(Default)]
    struct DenyListEnforcer {
        denied: Vec<(Resource, Action, String)>,
    }

    impl DenyListEnforcer {
        fn denying(denied: &[(Resource, Action, &str)]) -> Self {
            Self {
                denied: denied
                    .iter()
                    .map(|(r, a, o)| (*r, *a, o.to_string()))
                    .collect(),
            }
        }
    }

    impl Enforcer for DenyListEnforcer {
        fn enforce(&self, _principal: &Principal, resource: Resource, action: Action, object: &str) -> bool {
            !self
                .denied
                .iter()
                .any(|(r, a, o)| *r == resource && *a == action && o == object)
        }
    }

    /// Cache whose writes always fail
    struct FailingCache;

    #[async_trait]
    impl ConnectionStateCache for FailingCache {
        async fn get_state(&self, _scope: RepoScope, _url: &str, _project: &str) -> Option<ConnectionState> {
            None
        }

        async fn set_state(
            &self,
            _scope: RepoScope,
            _url: &str,
            _project: &str,
            _state: ConnectionState,
        ) -> Result<(), ConnectionCacheError> {
            Err(ConnectionCacheError::Unavailable("redis down".to_string()))
        }

        async fn invalidate(
            &self,
            _scope: RepoScope,
            _url: &str,
            _project: &str,
        ) -> Result<(), ConnectionCacheError> {
            Err(ConnectionCacheError::Unavailable("redis down".to_string()))
        }
    }

    struct Harness {
        service: RepositoryService,
        store: Arc<MemoryStore>,
        tester: Arc<ScriptedTester>,
        repo_server: Arc<FakeRepoServer>,
    }

    struct HarnessBuilder {
        tester: ScriptedTester,
        enforcer: DenyListEnforcer,
        cache: Option<Arc<dyn ConnectionStateCache>>,
        probe: Option<Arc<dyn RepoTester>>,
        probe_concurrency: usize,
        hydrator_enabled: bool,
    }

    impl HarnessBuilder {
        fn new() -> Self {
            Self {
                tester: ScriptedTester::default(),
                enforcer: DenyListEnforcer::default(),
                cache: None,
                probe: None,
                probe_concurrency: 8,
                hydrator_enabled: true,
            }
        }

        fn tester(mut self, tester: ScriptedTester) -> Self {
            self.tester = tester;
            self
        }

        fn enforcer(mut self, enforcer: DenyListEnforcer) -> Self {
            self.enforcer = enforcer;
            self
        }

        fn cache(mut self, cache: Arc<dyn ConnectionStateCache>) -> Self {
            self.cache = Some(cache);
            self
        }

        /// Probe with `tester` instead of the scripted one
        fn probe_with(mut self, tester: Arc<dyn RepoTester>) -> Self {
            self.probe = Some(tester);
            self
        }

        fn probe_concurrency(mut self, limit: usize) -> Self {
            self.probe_concurrency = limit;
            self
        }

        fn hydrator_disabled(mut self) -> Self {
            self.hydrator_enabled = false;
            self
        }

        fn build(self) -> Harness {
            let store = Arc::new(MemoryStore::new());
            let tester = Arc::new(self.tester);
            let repo_server = Arc::new(FakeRepoServer::default());
            let cache = self
                .cache
                .unwrap_or_else(|| Arc::new(MokaConnectionCache::new(Duration::from_secs(60), 1000)));
            let probe = self
                .probe
                .unwrap_or_else(|| tester.clone() as Arc<dyn RepoTester>);

            let service = RepositoryService::new(
                Collaborators {
                    store: store.clone(),
                    applications: store.clone(),
                    projects: store.clone(),
                    tester: probe,
                    repo_server: repo_server.clone(),
                    enforcer: Arc::new(self.enforcer),
                    cache,
                },
                ServiceOptions {
                    hydrator_enabled: self.hydrator_enabled,
                    namespace: "argocd".to_string(),
                    probe_concurrency: self.probe_concurrency,
                },
            );

            Harness {
                service,
                store,
                tester,
                repo_server,
            }
        }
    }

    fn alice() -> Principal {
        Principal::new("alice")
    }

    fn repo(url: &str, project: &str) -> Repository {
        Repository {
            repo: url.to_string(),
            project: project.to_string(),
            ..Default::default()
        }
    }

    fn create_request(repo: Repository, upsert: bool) -> RepoCreateRequest {
        RepoCreateRequest {
            repo: Some(repo),
            upsert,
        }
    }

    fn query(url: &str, project: &str) -> RepoQuery {
        RepoQuery {
            repo: url.to_string(),
            app_project: project.to_string(),
            ..Default::default()
        }
    }

    const URL: &str = "https://github.com/org/repo";

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let h = HarnessBuilder::new().build();
        let mut record = repo(URL, "");
        record.username = "user".to_string();
        record.password = "pass".to_string();

        let first = h
            .service
            .create(&alice(), RepoScope::Read, create_request(record.clone(), false))
            .await
            .unwrap();
        let stored = h
            .store
            .get_repository(RepoScope::Read, URL, "")
            .await
            .unwrap();

        // Second call leaves the type empty; it defaults to "git" on both sides
        let second = h
            .service
            .create(&alice(), RepoScope::Read, create_request(record, false))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.repo_type, "git");
        assert_eq!(
            h.store
                .get_repository(RepoScope::Read, URL, "")
                .await
                .unwrap(),
            stored
        );
    }

    #[tokio::test]
    async fn test_create_never_echoes_credentials() {
        let h = HarnessBuilder::new().build();
        let mut record = repo(URL, "");
        record.password = "hunter2".to_string();
        record.username = "user".to_string();

        let summary = h
            .service
            .create(&alice(), RepoScope::Read, create_request(record, false))
            .await
            .unwrap();
        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("user"));
    }

    #[tokio::test]
    async fn test_create_conflict_names_field() {
        let h = HarnessBuilder::new().build();
        h.service
            .create(&alice(), RepoScope::Read, create_request(repo(URL, ""), false))
            .await
            .unwrap();

        let mut changed = repo(URL, "");
        changed.insecure = true;
        let err = h
            .service
            .create(&alice(), RepoScope::Read, create_request(changed.clone(), false))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert!(err.message.contains("insecure"), "{}", err.message);
        assert!(!err.message.contains("type"));

        // Upsert overwrites
        h.service
            .create(&alice(), RepoScope::Read, create_request(changed, true))
            .await
            .unwrap();
        assert!(
            h.store
                .get_repository(RepoScope::Read, URL, "")
                .await
                .unwrap()
                .insecure
        );
    }

    #[tokio::test]
    async fn test_conflict_does_not_reveal_secret_values() {
        let h = HarnessBuilder::new().build();
        let mut original = repo(URL, "");
        original.username = "user".to_string();
        original.password = "old-secret".to_string();
        h.service
            .create(&alice(), RepoScope::Read, create_request(original.clone(), false))
            .await
            .unwrap();

        original.password = "new-secret".to_string();
        let err = h
            .service
            .create(&alice(), RepoScope::Read, create_request(original, false))
            .await
            .unwrap_err();
        assert!(err.message.contains("password"));
        assert!(!err.message.contains("old-secret"));
        assert!(!err.message.contains("new-secret"));
    }

    #[tokio::test]
    async fn test_create_validates_bearer_token_rules() {
        let h = HarnessBuilder::new().build();

        let mut both = repo(URL, "");
        both.bearer_token = "x".to_string();
        both.password = "y".to_string();
        let err = h
            .service
            .create(&alice(), RepoScope::Read, create_request(both, false))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        assert!(err
            .message
            .contains("only --bearer-token or --password is allowed, not both"));

        let mut ssh = repo("git@github.com:org/repo.git", "");
        ssh.bearer_token = "x".to_string();
        let err = h
            .service
            .create(&alice(), RepoScope::Read, create_request(ssh, false))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        assert!(err.message.contains("only supported for HTTPS repositories"));

        // Rejected before any probe
        assert_eq!(h.tester.calls(), 0);
    }

    #[tokio::test]
    async fn test_create_denied_before_side_effects() {
        let h = HarnessBuilder::new()
            .enforcer(DenyListEnforcer::denying(&[(
                Resource::Repositories,
                Action::Create,
                URL,
            )]))
            .build();

        let err = h
            .service
            .create(&alice(), RepoScope::Read, create_request(repo(URL, ""), false))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
        assert_eq!(h.tester.calls(), 0);
        assert!(h
            .store
            .list_repositories(RepoScope::Read)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_create_fails_when_unreachable() {
        let h = HarnessBuilder::new()
            .tester(ScriptedTester::failing(&[URL]))
            .build();

        let err = h
            .service
            .create(&alice(), RepoScope::Read, create_request(repo(URL, ""), false))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        assert!(err.message.starts_with("Unable to connect to repository"));
        assert!(h
            .store
            .list_repositories(RepoScope::Read)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_project_scoped_create_skips_probe() {
        let h = HarnessBuilder::new()
            .tester(ScriptedTester::failing(&[URL]))
            .build();

        h.service
            .create(&alice(), RepoScope::Read, create_request(repo(URL, "team-a"), false))
            .await
            .unwrap();
        assert_eq!(h.tester.calls(), 0);
    }

    #[tokio::test]
    async fn test_global_create_inherits_template_for_probe_only() {
        let h = HarnessBuilder::new().build();
        h.store
            .insert_repository_credentials(RepoCredentials {
                url: "https://github.com/org".to_string(),
                username: "template-user".to_string(),
                password: "template-pass".to_string(),
                ..Default::default()
            })
            .await;

        h.service
            .create(&alice(), RepoScope::Read, create_request(repo(URL, ""), false))
            .await
            .unwrap();

        let probed = h.tester.probed.lock().unwrap().clone();
        assert_eq!(probed.len(), 1);
        assert_eq!(probed[0].username, "template-user");
        assert!(probed[0].inherited_creds);

        // The template itself is not copied into the stored record
        let stored = h
            .store
            .get_repository(RepoScope::Read, URL, "")
            .await
            .unwrap();
        assert!(stored.username.is_empty());
    }

    #[tokio::test]
    async fn test_project_scoped_validate_never_inherits_template() {
        let h = HarnessBuilder::new().build();
        h.store
            .insert_repository_credentials(RepoCredentials {
                url: "https://github.com/org".to_string(),
                password: "template-pass".to_string(),
                ..Default::default()
            })
            .await;

        h.service
            .validate_access(
                &alice(),
                RepoScope::Read,
                RepoAccessQuery {
                    repo: URL.to_string(),
                    project: "team-a".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let probed = h.tester.probed.lock().unwrap().clone();
        assert!(probed[0].password.is_empty());
        assert!(!probed[0].inherited_creds);
    }

    #[tokio::test]
    async fn test_write_create_requires_credentials_and_probes() {
        let h = HarnessBuilder::new().build();

        let err = h
            .service
            .create(&alice(), RepoScope::Write, create_request(repo(URL, "team-a"), false))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        assert_eq!(err.message, "missing credentials in request");

        let mut with_key = repo(URL, "team-a");
        with_key.ssh_private_key = "key".to_string();
        h.service
            .create(&alice(), RepoScope::Write, create_request(with_key, false))
            .await
            .unwrap();
        // Probed even though project-scoped
        assert_eq!(h.tester.calls(), 1);
    }

    #[tokio::test]
    async fn test_write_operations_require_hydrator() {
        let h = HarnessBuilder::new()
            .hydrator_disabled()
            .enforcer(DenyListEnforcer::denying(&[(
                Resource::WriteRepositories,
                Action::Get,
                URL,
            )]))
            .build();

        let err = h
            .service
            .list(&alice(), RepoScope::Write, &RepoQuery::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unimplemented);
        assert_eq!(err.message, "hydrator is disabled");

        // Missing payload would be InvalidArgument; the flag is checked first
        let err = h
            .service
            .create(&alice(), RepoScope::Write, RepoCreateRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unimplemented);

        let err = h
            .service
            .get(&alice(), RepoScope::Write, &query(URL, ""))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unimplemented);

        // Read scope is unaffected
        h.service
            .list(&alice(), RepoScope::Read, &RepoQuery::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_payload() {
        let h = HarnessBuilder::new().build();
        let err = h
            .service
            .create(&alice(), RepoScope::Read, RepoCreateRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        assert_eq!(err.message, "missing payload in request");
    }

    #[tokio::test]
    async fn test_list_fan_out_records_individual_failures() {
        let urls: Vec<String> = (1..=50)
            .map(|i| format!("https://github.com/org/repo-{:02}", i))
            .collect();
        let h = HarnessBuilder::new()
            .tester(ScriptedTester::failing(&[urls[9].as_str()]))
            .build();
        for url in &urls {
            h.store
                .create_repository(RepoScope::Read, &repo(url, ""))
                .await
                .unwrap();
        }

        let list = h
            .service
            .list(&alice(), RepoScope::Read, &RepoQuery::default())
            .await
            .unwrap();

        assert_eq!(list.items.len(), 50);
        assert_eq!(h.tester.calls(), 50);
        for (i, item) in list.items.iter().enumerate() {
            assert_eq!(item.repo, urls[i], "sorted by project/repo");
            let expected = if i == 9 {
                ConnectionStatus::Failed
            } else {
                ConnectionStatus::Successful
            };
            assert_eq!(item.connection_state.status, expected, "{}", item.repo);
        }
    }

    /// Tracks how many probes run at the same time
    #[derive(Default)]
    struct InFlightTester {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl RepoTester for InFlightTester {
        async fn test_repository(&self, _repo: &Repository) -> Result<(), RepoServerError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Panics while probing `url`
    struct PanickingTester {
        url: String,
    }

    #[async_trait]
    impl RepoTester for PanickingTester {
        async fn test_repository(&self, repo: &Repository) -> Result<(), RepoServerError> {
            if repo.repo == self.url {
                panic!("tester crashed on {}", repo.repo);
            }
            Ok(())
        }
    }

    /// Blocks every probe until the gate is opened
    struct GatedTester {
        gate: Semaphore,
        started: AtomicUsize,
        finished: AtomicUsize,
    }

    #[async_trait]
    impl RepoTester for GatedTester {
        async fn test_repository(&self, _repo: &Repository) -> Result<(), RepoServerError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let _permit = self.gate.acquire().await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn seed_repos(h: &Harness, count: usize) {
        for i in 0..count {
            h.store
                .create_repository(
                    RepoScope::Read,
                    &repo(&format!("https://github.com/org/repo-{:02}", i), ""),
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_list_probes_concurrently_within_limit() {
        let tester = Arc::new(InFlightTester::default());
        let h = HarnessBuilder::new()
            .probe_with(tester.clone())
            .probe_concurrency(4)
            .build();
        seed_repos(&h, 20).await;

        let list = h
            .service
            .list(&alice(), RepoScope::Read, &RepoQuery::default())
            .await
            .unwrap();

        assert_eq!(list.items.len(), 20);
        let peak = tester.peak.load(Ordering::SeqCst);
        assert!(peak > 1, "probes ran one at a time");
        assert!(peak <= 4, "peak {} exceeds the limit", peak);
    }

    #[tokio::test]
    async fn test_list_fails_when_probe_task_panics() {
        let h = HarnessBuilder::new()
            .probe_with(Arc::new(PanickingTester {
                url: "https://github.com/org/repo-03".to_string(),
            }))
            .build();
        seed_repos(&h, 8).await;

        let err = h
            .service
            .list(&alice(), RepoScope::Read, &RepoQuery::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }

    #[tokio::test]
    async fn test_dropped_list_aborts_outstanding_probes() {
        let tester = Arc::new(GatedTester {
            gate: Semaphore::new(0),
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        });
        let h = HarnessBuilder::new()
            .probe_with(tester.clone())
            .probe_concurrency(4)
            .build();
        seed_repos(&h, 10).await;

        // The caller gives up while every probe is blocked
        let result = tokio::time::timeout(
            Duration::from_millis(50),
            h.service
                .list(&alice(), RepoScope::Read, &RepoQuery::default()),
        )
        .await;
        assert!(result.is_err());
        assert!(tester.started.load(Ordering::SeqCst) > 0);

        tester.gate.add_permits(100);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(tester.finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_read_and_write_states_are_cached_separately() {
        let h = HarnessBuilder::new()
            .tester(ScriptedTester::failing_users(&["bad"]))
            .build();
        let mut read = repo(URL, "");
        read.username = "bad".to_string();
        read.password = "x".to_string();
        let mut write = repo(URL, "");
        write.username = "good".to_string();
        write.password = "x".to_string();
        h.store
            .create_repository(RepoScope::Read, &read)
            .await
            .unwrap();
        h.store
            .create_repository(RepoScope::Write, &write)
            .await
            .unwrap();

        let writes = h
            .service
            .list(&alice(), RepoScope::Write, &RepoQuery::default())
            .await
            .unwrap();
        assert_eq!(
            writes.items[0].connection_state.status,
            ConnectionStatus::Successful
        );

        // Served from the cache, yet must reflect the read record's own probe
        let reads = h
            .service
            .list(&alice(), RepoScope::Read, &RepoQuery::default())
            .await
            .unwrap();
        assert_eq!(reads.items[0].connection_state.status, ConnectionStatus::Failed);
        assert_eq!(h.tester.calls(), 2);

        let writes = h
            .service
            .list(&alice(), RepoScope::Write, &RepoQuery::default())
            .await
            .unwrap();
        assert_eq!(
            writes.items[0].connection_state.status,
            ConnectionStatus::Successful
        );
        assert_eq!(h.tester.calls(), 2);
    }

    #[tokio::test]
    async fn test_list_uses_cache_unless_forced() {
        let h = HarnessBuilder::new().build();
        h.store
            .create_repository(RepoScope::Read, &repo(URL, ""))
            .await
            .unwrap();

        h.service
            .list(&alice(), RepoScope::Read, &RepoQuery::default())
            .await
            .unwrap();
        h.service
            .list(&alice(), RepoScope::Read, &RepoQuery::default())
            .await
            .unwrap();
        assert_eq!(h.tester.calls(), 1);

        let forced = RepoQuery {
            force_refresh: true,
            ..Default::default()
        };
        h.service
            .list(&alice(), RepoScope::Read, &forced)
            .await
            .unwrap();
        assert_eq!(h.tester.calls(), 2);
    }

    #[tokio::test]
    async fn test_list_filters_by_rbac_and_sorts_by_project() {
        let h = HarnessBuilder::new()
            .enforcer(DenyListEnforcer::denying(&[(
                Resource::Repositories,
                Action::Get,
                "secret/https://github.com/org/hidden",
            )]))
            .build();
        for record in [
            repo("https://github.com/org/zeta", ""),
            repo("https://github.com/org/alpha", "b"),
            repo("https://github.com/org/hidden", "secret"),
            repo("https://github.com/org/beta", "a"),
        ] {
            h.store
                .create_repository(RepoScope::Read, &record)
                .await
                .unwrap();
        }

        let list = h
            .service
            .list(&alice(), RepoScope::Read, &RepoQuery::default())
            .await
            .unwrap();
        let keys: Vec<String> = list
            .items
            .iter()
            .map(|r| format!("{}/{}", r.project, r.repo))
            .collect();
        assert_eq!(
            keys,
            vec![
                "/https://github.com/org/zeta",
                "a/https://github.com/org/beta",
                "b/https://github.com/org/alpha",
            ]
        );
    }

    #[tokio::test]
    async fn test_list_tolerates_failing_cache() {
        let h = HarnessBuilder::new().cache(Arc::new(FailingCache)).build();
        h.store
            .create_repository(RepoScope::Read, &repo(URL, ""))
            .await
            .unwrap();

        let list = h
            .service
            .list(&alice(), RepoScope::Read, &RepoQuery::default())
            .await
            .unwrap();
        assert_eq!(list.items[0].connection_state.status, ConnectionStatus::Successful);

        // Delete still succeeds even though invalidation fails
        h.service
            .delete(&alice(), RepoScope::Read, &query(URL, ""))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_never_exposes_credentials() {
        let h = HarnessBuilder::new().build();
        let mut record = repo(URL, "");
        record.password = "hunter2".to_string();
        record.ssh_private_key = "-----BEGIN KEY".to_string();
        h.store
            .create_repository(RepoScope::Read, &record)
            .await
            .unwrap();

        let list = h
            .service
            .list(&alice(), RepoScope::Read, &RepoQuery::default())
            .await
            .unwrap();
        let json = serde_json::to_string(&list).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("BEGIN KEY"));
        assert_eq!(list.items[0].repo_type, "git");
    }

    #[tokio::test]
    async fn test_get_resolves_by_project() {
        let h = HarnessBuilder::new().build();
        h.store
            .create_repository(RepoScope::Read, &repo(URL, "a"))
            .await
            .unwrap();
        h.store
            .create_repository(RepoScope::Read, &repo(URL, "b"))
            .await
            .unwrap();

        let err = h
            .service
            .get(&alice(), RepoScope::Read, &query(URL, ""))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);

        let found = h
            .service
            .get(&alice(), RepoScope::Read, &query(&format!("{}.git", URL), "a"))
            .await
            .unwrap();
        assert_eq!(found.project, "a");
    }

    #[tokio::test]
    async fn test_get_unknown_or_hidden_is_permission_denied() {
        let h = HarnessBuilder::new()
            .enforcer(DenyListEnforcer::denying(&[(
                Resource::Repositories,
                Action::Get,
                URL,
            )]))
            .build();
        h.store
            .create_repository(RepoScope::Read, &repo(URL, ""))
            .await
            .unwrap();

        let hidden = h
            .service
            .get(&alice(), RepoScope::Read, &query(URL, ""))
            .await
            .unwrap_err();
        let unknown = h
            .service
            .get(&alice(), RepoScope::Read, &query("https://github.com/org/nope", ""))
            .await
            .unwrap_err();

        assert_eq!(hidden.kind, ErrorKind::PermissionDenied);
        assert_eq!(hidden.message, unknown.message);
        assert_eq!(hidden.kind, unknown.kind);
    }

    #[tokio::test]
    async fn test_delete_invalidates_cached_state() {
        let h = HarnessBuilder::new()
            .tester(ScriptedTester::failing(&[URL]))
            .build();
        h.store
            .create_repository(RepoScope::Read, &repo(URL, ""))
            .await
            .unwrap();

        // Caches a failed state
        h.service
            .list(&alice(), RepoScope::Read, &RepoQuery::default())
            .await
            .unwrap();
        h.service
            .delete(&alice(), RepoScope::Read, &query(URL, ""))
            .await
            .unwrap();
        assert!(h
            .store
            .list_repositories(RepoScope::Read)
            .await
            .unwrap()
            .is_empty());

        // Recreated under the same key, the old failure must not be served
        h.store
            .create_repository(RepoScope::Read, &repo(URL, ""))
            .await
            .unwrap();
        let calls = h.tester.calls();
        h.service
            .list(&alice(), RepoScope::Read, &RepoQuery::default())
            .await
            .unwrap();
        assert_eq!(h.tester.calls(), calls + 1);
    }

    #[tokio::test]
    async fn test_update_checks_both_objects() {
        let h = HarnessBuilder::new()
            .enforcer(DenyListEnforcer::denying(&[(
                Resource::Repositories,
                Action::Update,
                "a/https://github.com/org/repo",
            )]))
            .build();
        h.store
            .create_repository(RepoScope::Read, &repo(URL, "a"))
            .await
            .unwrap();

        let err = h
            .service
            .update(
                &alice(),
                RepoScope::Read,
                RepoUpdateRequest {
                    repo: Some(repo(URL, "a")),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);

        let err = h
            .service
            .update(
                &alice(),
                RepoScope::Read,
                RepoUpdateRequest {
                    repo: Some(repo("https://github.com/org/missing", "")),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn test_update_persists_and_returns_summary() {
        let h = HarnessBuilder::new().build();
        h.store
            .create_repository(RepoScope::Read, &repo(URL, ""))
            .await
            .unwrap();

        let mut changed = repo(URL, "");
        changed.name = "renamed".to_string();
        let summary = h
            .service
            .update(
                &alice(),
                RepoScope::Read,
                RepoUpdateRequest {
                    repo: Some(changed),
                },
            )
            .await
            .unwrap();
        assert_eq!(summary.name, "renamed");
        assert_eq!(
            h.store
                .get_repository(RepoScope::Read, URL, "")
                .await
                .unwrap()
                .name,
            "renamed"
        );
    }

    fn app_with_history() -> Application {
        let current = ApplicationSource {
            repo_url: URL.to_string(),
            path: "guestbook".to_string(),
            target_revision: "HEAD".to_string(),
            ..Default::default()
        };
        Application {
            name: "guestbook".to_string(),
            namespace: "argocd".to_string(),
            spec: ApplicationSpec {
                project: "default".to_string(),
                source: Some(current.clone()),
                sources: vec![],
            },
            status: ApplicationStatus {
                history: vec![RevisionHistory {
                    id: 1,
                    revision: "abc123".to_string(),
                    source: ApplicationSource {
                        path: "old".to_string(),
                        ..current
                    },
                    ..Default::default()
                }],
            },
        }
    }

    async fn seed_app_details(h: &Harness) {
        h.store
            .create_repository(RepoScope::Read, &repo(URL, ""))
            .await
            .unwrap();
        h.store
            .insert_project(Project {
                name: "default".to_string(),
                source_repos: vec!["https://github.com/org/*".to_string()],
            })
            .await;
        h.store.insert_application(app_with_history()).await;
    }

    fn details_query(path: &str, revision: &str) -> RepoAppDetailsQuery {
        RepoAppDetailsQuery {
            source: Some(ApplicationSource {
                repo_url: URL.to_string(),
                path: path.to_string(),
                target_revision: revision.to_string(),
                ..Default::default()
            }),
            app_name: "guestbook".to_string(),
            app_project: "default".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_app_details_allows_current_and_historical_sources() {
        let h = HarnessBuilder::new().build();
        seed_app_details(&h).await;

        h.service
            .get_app_details(&alice(), details_query("guestbook", "HEAD"))
            .await
            .unwrap();
        h.service
            .get_app_details(&alice(), details_query("old", "abc123"))
            .await
            .unwrap();
        assert_eq!(h.repo_server.details_requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_app_details_rejects_arbitrary_source() {
        let h = HarnessBuilder::new().build();
        seed_app_details(&h).await;

        let err = h
            .service
            .get_app_details(&alice(), details_query("../../etc", "HEAD"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
        assert!(h.repo_server.details_requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_app_details_project_mismatch_denied() {
        let h = HarnessBuilder::new().build();
        seed_app_details(&h).await;
        h.store
            .insert_project(Project {
                name: "other".to_string(),
                source_repos: vec!["*".to_string()],
            })
            .await;

        let mut q = details_query("guestbook", "HEAD");
        q.app_project = "other".to_string();
        let err = h.service.get_app_details(&alice(), q).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn test_app_details_new_app_requires_create() {
        let h = HarnessBuilder::new()
            .enforcer(DenyListEnforcer::denying(&[(
                Resource::Applications,
                Action::Create,
                "default/newapp",
            )]))
            .build();
        seed_app_details(&h).await;

        let mut q = details_query("anything", "HEAD");
        q.app_name = "newapp".to_string();
        let err = h.service.get_app_details(&alice(), q).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn test_app_details_missing_source() {
        let h = HarnessBuilder::new().build();
        let err = h
            .service
            .get_app_details(&alice(), RepoAppDetailsQuery::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_app_details_repo_not_permitted_in_project() {
        let h = HarnessBuilder::new().build();
        seed_app_details(&h).await;
        h.store
            .insert_project(Project {
                name: "default".to_string(),
                source_repos: vec!["https://gitlab.com/*".to_string()],
            })
            .await;

        let err = h
            .service
            .get_app_details(&alice(), details_query("guestbook", "HEAD"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
        assert!(err.message.contains("not permitted in project 'default'"));
    }

    #[tokio::test]
    async fn test_app_details_passes_ref_sources() {
        let h = HarnessBuilder::new().build();
        seed_app_details(&h).await;
        let chart = ApplicationSource {
            repo_url: URL.to_string(),
            chart: "guestbook".to_string(),
            target_revision: "1.0.0".to_string(),
            ..Default::default()
        };
        let values = ApplicationSource {
            repo_url: "https://github.com/org/values".to_string(),
            target_revision: "main".to_string(),
            ref_name: "values".to_string(),
            ..Default::default()
        };
        let mut app = app_with_history();
        app.spec.source = None;
        app.spec.sources = vec![chart.clone(), values];
        h.store.insert_application(app).await;

        let q = RepoAppDetailsQuery {
            source: Some(chart),
            app_name: "guestbook".to_string(),
            app_project: "default".to_string(),
            ..Default::default()
        };
        h.service.get_app_details(&alice(), q).await.unwrap();

        let requests = h.repo_server.details_requests.lock().unwrap();
        let refs = &requests[0].ref_sources;
        assert_eq!(refs.len(), 1);
        assert_eq!(refs["$values"].repo.repo, "https://github.com/org/values");
        assert_eq!(refs["$values"].target_revision, "main");
    }

    #[tokio::test]
    async fn test_list_apps_requires_app_create_or_update() {
        let h = HarnessBuilder::new()
            .enforcer(DenyListEnforcer::denying(&[
                (Resource::Applications, Action::Create, "default/guestbook"),
                (Resource::Applications, Action::Update, "default/guestbook"),
            ]))
            .build();
        seed_app_details(&h).await;

        let q = RepoAppsQuery {
            repo: URL.to_string(),
            app_name: "guestbook".to_string(),
            app_project: "default".to_string(),
            ..Default::default()
        };
        let err = h.service.list_apps(&alice(), &q).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn test_discovery_unknown_repo_is_permission_denied() {
        let h = HarnessBuilder::new().build();
        let err = h
            .service
            .list_refs(&alice(), &query("https://github.com/org/unknown", ""))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);

        h.store
            .create_repository(RepoScope::Read, &repo(URL, ""))
            .await
            .unwrap();
        let refs = h.service.list_refs(&alice(), &query(URL, "")).await.unwrap();
        assert_eq!(refs.branches, vec!["main".to_string()]);
        let tags = h
            .service
            .list_oci_tags(&alice(), &query(URL, ""))
            .await
            .unwrap();
        assert_eq!(tags.tags, vec!["1.0.0".to_string()]);
    }

    #[test]
    fn test_differing_fields_lists_only_changes() {
        let a = repo(URL, "").normalize();
        let mut b = a.clone();
        b.insecure = true;
        b.name = "x".to_string();
        let mut fields = differing_fields(&a, &b);
        fields.sort();
        assert_eq!(fields, vec!["insecure".to_string(), "name".to_string()]);
    }

    /// Every call fails as if the database were down
    struct BrokenStore;

    fn backend_down() -> StoreError {
        StoreError::Backend(anyhow::anyhow!("connection refused"))
    }

    #[async_trait]
    impl RepositoryStore for BrokenStore {
        async fn list_repositories(&self, _scope: RepoScope) -> Result<Vec<Repository>, StoreError> {
            Err(backend_down())
        }

        async fn list_helm_repositories(&self) -> Result<Vec<Repository>, StoreError> {
            Err(backend_down())
        }

        async fn get_repository(
            &self,
            _scope: RepoScope,
            _url: &str,
            _project: &str,
        ) -> Result<Repository, StoreError> {
            Err(backend_down())
        }

        async fn create_repository(
            &self,
            _scope: RepoScope,
            _repo: &Repository,
        ) -> Result<Repository, StoreError> {
            Err(backend_down())
        }

        async fn update_repository(
            &self,
            _scope: RepoScope,
            _repo: &Repository,
        ) -> Result<Repository, StoreError> {
            Err(backend_down())
        }

        async fn delete_repository(
            &self,
            _scope: RepoScope,
            _url: &str,
            _project: &str,
        ) -> Result<(), StoreError> {
            Err(backend_down())
        }

        async fn get_repository_credentials(
            &self,
            _url: &str,
        ) -> Result<Option<RepoCredentials>, StoreError> {
            Err(backend_down())
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_internal_with_lookup_key() {
        let memory = Arc::new(MemoryStore::new());
        let service = RepositoryService::new(
            Collaborators {
                store: Arc::new(BrokenStore),
                applications: memory.clone(),
                projects: memory,
                tester: Arc::new(ScriptedTester::default()),
                repo_server: Arc::new(FakeRepoServer::default()),
                enforcer: Arc::new(DenyListEnforcer::default()),
                cache: Arc::new(MokaConnectionCache::new(Duration::from_secs(60), 10)),
            },
            ServiceOptions {
                hydrator_enabled: false,
                namespace: "argocd".to_string(),
                probe_concurrency: 1,
            },
        );

        let err = service
            .list_refs(&alice(), &query(URL, "team-a"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
        assert!(err.source.is_some());
        assert!(err.context.contains(&("repo", URL.to_string())));
        assert!(err.context.contains(&("project", "team-a".to_string())));
        // The backend detail stays out of the response message
        assert!(!err.message.contains("connection refused"));
    }
}
