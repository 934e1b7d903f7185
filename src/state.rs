use crate::auth::jwt::JwtValidator;
use crate::auth::rbac::PolicyEnforcer;
use crate::db::{ApplicationLister, MemoryStore, PgStore, ProjectLookup, RepositoryStore};
use crate::reposerver::RemoteRepoServer;
use crate::repository::connection::MokaConnectionCache;
use crate::repository::{Collaborators, RepositoryService, ServiceOptions};
use crate::settings::{SeedSettings, Settings, StoreSettings};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub jwt_validator: Arc<JwtValidator>,
    pub repositories: Arc<RepositoryService>,
}

struct Stores {
    repositories: Arc<dyn RepositoryStore>,
    applications: Arc<dyn ApplicationLister>,
    projects: Arc<dyn ProjectLookup>,
}

/// Load configured projects, credential templates and applications
async fn seed_memory_store(store: &MemoryStore, seed: &SeedSettings) {
    for project in &seed.projects {
        store.insert_project(project.clone()).await;
    }
    for creds in &seed.repository_credentials {
        store.insert_repository_credentials(creds.clone()).await;
    }
    for app in &seed.applications {
        store.insert_application(app.clone()).await;
    }
    tracing::info!(
        projects = seed.projects.len(),
        credential_templates = seed.repository_credentials.len(),
        applications = seed.applications.len(),
        "Seeded in-memory store"
    );
}

async fn init_stores(settings: &StoreSettings, seed: &SeedSettings) -> Result<Stores> {
    match settings {
        StoreSettings::Memory => {
            tracing::warn!("Using the in-memory store; repositories are lost on restart");
            let store = Arc::new(MemoryStore::new());
            seed_memory_store(&store, seed).await;
            if seed.projects.is_empty() {
                tracing::warn!("No projects seeded; app discovery and app details will report unknown projects");
            }
            Ok(Stores {
                repositories: store.clone(),
                applications: store.clone(),
                projects: store,
            })
        }
        StoreSettings::Postgres {
            url,
            max_connections,
        } => {
            let store = Arc::new(PgStore::connect(url, *max_connections).await?);
            tracing::info!("Successfully connected to PostgreSQL");
            if !seed.is_empty() {
                tracing::warn!("Ignoring the seed section; the PostgreSQL store is managed externally");
            }
            Ok(Stores {
                repositories: store.clone(),
                applications: store.clone(),
                projects: store,
            })
        }
    }
}

impl AppState {
    /// Construct every collaborator once; handlers only ever see these handles
    pub async fn new_for_server(settings: &Settings) -> Result<Self> {
        tracing::info!("Initializing AppState for HTTP server");

        let jwt_validator = Arc::new(
            JwtValidator::new(&settings.auth.jwt_secret, settings.auth.issuer.as_deref())
                .context("Failed to initialize JWT validator")?,
        );

        let stores = init_stores(&settings.store, &settings.seed).await?;

        let repo_server = Arc::new(
            RemoteRepoServer::new(&settings.repo_server)
                .context("Failed to initialize repo-server client")?,
        );
        tracing::info!(url = %settings.repo_server.url, "Using repo-server");

        let cache = Arc::new(MokaConnectionCache::new(
            Duration::from_secs(settings.cache.connection_state_ttl_secs),
            settings.cache.max_capacity,
        ));

        let repositories = RepositoryService::new(
            Collaborators {
                store: stores.repositories,
                applications: stores.applications,
                projects: stores.projects,
                tester: repo_server.clone(),
                repo_server,
                enforcer: Arc::new(PolicyEnforcer::new(&settings.rbac)),
                cache,
            },
            ServiceOptions {
                hydrator_enabled: settings.hydrator.enabled,
                namespace: settings.namespace.clone(),
                probe_concurrency: settings.connection.probe_concurrency,
            },
        );
        if settings.hydrator.enabled {
            tracing::info!("Hydrator enabled, write repositories are available");
        }

        Ok(Self {
            jwt_validator,
            repositories: Arc::new(repositories),
        })
    }
}
