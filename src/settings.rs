use crate::application::models::Application;
use crate::project::Project;
use crate::repository::models::RepoCredentials;
use config::{Config, ConfigError};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    pub repo_server: RepoServerSettings,
    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub hydrator: HydratorSettings,
    #[serde(default)]
    pub rbac: RbacSettings,
    #[serde(default)]
    pub seed: SeedSettings,
    /// Namespace applications live in when a query names them unqualified
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthSettings {
    /// HS256 secret used to validate caller tokens
    #[serde(default)]
    pub jwt_secret: String,
    /// Expected `iss` claim; not checked when unset
    #[serde(default)]
    pub issuer: Option<String>,
}

/// Backend for repository records, applications and projects
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreSettings {
    /// Process-local store, contents are lost on restart
    #[default]
    Memory,
    Postgres {
        #[serde(default)]
        url: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    /// How long a probed connection state is served without re-testing (default: 3600)
    #[serde(default = "default_connection_state_ttl")]
    pub connection_state_ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub max_capacity: u64,
}

fn default_connection_state_ttl() -> u64 {
    3600
}

fn default_cache_capacity() -> u64 {
    10_000
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            connection_state_ttl_secs: default_connection_state_ttl(),
            max_capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepoServerSettings {
    /// Base URL of the repo-server, e.g. "http://repo-server:8081"
    pub url: String,
    /// Upper bound for a single repo-server call (default: 60)
    #[serde(default = "default_repo_server_timeout")]
    pub timeout_secs: u64,
}

fn default_repo_server_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionSettings {
    /// Maximum number of concurrent connection probes per list request (default: 16)
    #[serde(default = "default_probe_concurrency")]
    pub probe_concurrency: usize,
}

fn default_probe_concurrency() -> usize {
    16
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            probe_concurrency: default_probe_concurrency(),
        }
    }
}

/// Write-scoped (hydrator) repositories
#[derive(Debug, Deserialize, Clone, Default)]
pub struct HydratorSettings {
    #[serde(default)]
    pub enabled: bool,
}

/// Records loaded into the in-memory store at startup. PostgreSQL
/// deployments manage these elsewhere and ignore this section.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SeedSettings {
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub repository_credentials: Vec<RepoCredentials>,
    #[serde(default)]
    pub applications: Vec<Application>,
}

impl SeedSettings {
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
            && self.repository_credentials.is_empty()
            && self.applications.is_empty()
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RbacSettings {
    /// Subjects allowed every action on every object
    #[serde(default)]
    pub admin_subjects: Vec<String>,
    #[serde(default)]
    pub policies: Vec<PolicyRule>,
}

/// A single grant. `subject` is a token subject or `group:<name>`;
/// `resource` and `action` accept `*`; `object` is a glob.
#[derive(Debug, Deserialize, Clone)]
pub struct PolicyRule {
    pub subject: String,
    pub resource: String,
    pub action: String,
    pub object: String,
}

fn default_namespace() -> String {
    "argocd".to_string()
}

impl Settings {
    /// Substitute environment variables in a string value
    /// Replaces ${VAR_NAME} or ${VAR_NAME:-default} with environment variable values
    fn substitute_env_vars_in_string(s: &str) -> String {
        let re = match regex::Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}") {
            Ok(re) => re,
            Err(_) => return s.to_string(),
        };

        re.replace_all(s, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str());

            match env::var(var_name) {
                Ok(val) => val,
                Err(_) => default_value.unwrap_or("").to_string(),
            }
        })
        .to_string()
    }

    /// Convert a config::Value to a serde_json::Value, performing environment variable substitution
    fn config_value_to_json(value: &config::Value) -> serde_json::Value {
        use config::ValueKind;

        match &value.kind {
            ValueKind::Nil => serde_json::Value::Null,
            ValueKind::Boolean(b) => serde_json::Value::Bool(*b),
            ValueKind::I64(i) => serde_json::Value::Number((*i).into()),
            ValueKind::I128(i) => serde_json::Value::Number((*i as i64).into()),
            ValueKind::U64(u) => serde_json::Value::Number((*u).into()),
            ValueKind::U128(u) => serde_json::Value::Number((*u as u64).into()),
            ValueKind::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ValueKind::String(s) => {
                serde_json::Value::String(Self::substitute_env_vars_in_string(s))
            }
            ValueKind::Table(table) => {
                let mut map = serde_json::Map::new();
                for (k, v) in table.iter() {
                    map.insert(k.clone(), Self::config_value_to_json(v));
                }
                serde_json::Value::Object(map)
            }
            ValueKind::Array(arr) => {
                let vec: Vec<serde_json::Value> =
                    arr.iter().map(Self::config_value_to_json).collect();
                serde_json::Value::Array(vec)
            }
        }
    }

    /// Try to add a config file with multiple extension attempts (.toml, .yaml, .yml)
    /// Returns Ok(true) if a file was loaded, Ok(false) if no file found (when not required)
    fn try_add_config_file(
        builder: &mut config::ConfigBuilder<config::builder::DefaultState>,
        config_dir: &str,
        name: &str,
        required: bool,
    ) -> Result<bool, ConfigError> {
        let extensions = ["toml", "yaml", "yml"];

        for ext in extensions {
            let path = format!("{}/{}.{}", config_dir, name, ext);
            if std::path::Path::new(&path).exists() {
                tracing::info!("Loading config file: {}", path);
                *builder = builder
                    .clone()
                    .add_source(config::File::with_name(&format!("{}/{}", config_dir, name)));
                return Ok(true);
            }
        }

        if required {
            Err(ConfigError::Message(format!(
                "Required config file not found: {}/{}.{{toml,yaml,yml}}",
                config_dir, name
            )))
        } else {
            tracing::debug!(
                "Optional config file not found: {}/{}.{{toml,yaml,yml}}",
                config_dir,
                name
            );
            Ok(false)
        }
    }

    pub fn new() -> Result<Self, ConfigError> {
        let run_mode =
            env::var("REPOGATE_CONFIG_RUN_MODE").unwrap_or_else(|_| "development".into());
        let config_dir = env::var("REPOGATE_CONFIG_DIR").unwrap_or_else(|_| "config".into());

        let mut builder = Config::builder();

        // default (required), then run mode, then local overrides
        Self::try_add_config_file(&mut builder, &config_dir, "default", true)?;
        Self::try_add_config_file(&mut builder, &config_dir, &run_mode, false)?;
        Self::try_add_config_file(&mut builder, &config_dir, "local", false)?;

        let config = builder.build()?;

        let root_value = config
            .cache
            .into_table()
            .map_err(|e| ConfigError::Message(format!("Failed to get config table: {}", e)))?;

        let mut json_map = serde_json::Map::new();
        for (k, v) in root_value.iter() {
            json_map.insert(k.clone(), Self::config_value_to_json(v));
        }
        let json_value = serde_json::Value::Object(json_map);

        let mut unused_fields = Vec::new();
        let mut settings: Settings = serde_ignored::deserialize(json_value, |path| {
            unused_fields.push(path.to_string());
        })
        .map_err(|e| ConfigError::Message(format!("Failed to deserialize settings: {}", e)))?;

        for field in &unused_fields {
            tracing::warn!("Unknown configuration field in config: {}", field);
        }

        // DATABASE_URL takes precedence over the configured postgres URL
        if let StoreSettings::Postgres { ref mut url, .. } = settings.store {
            if let Ok(database_url) = env::var("DATABASE_URL") {
                if !database_url.is_empty() {
                    *url = database_url;
                }
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.jwt_secret.is_empty() {
            return Err(ConfigError::Message(
                "JWT secret not configured. Set [auth] jwt_secret in config (supports ${VAR} substitution)".to_string(),
            ));
        }

        if let StoreSettings::Postgres { ref url, .. } = self.store {
            if url.is_empty() {
                return Err(ConfigError::Message(
                    "Database URL not configured. Set DATABASE_URL environment variable or [store] url in config".to_string(),
                ));
            }
        }

        if self.repo_server.url.is_empty() {
            return Err(ConfigError::Message(
                "Repo-server URL not configured. Set [repo_server] url in config".to_string(),
            ));
        }

        if self.connection.probe_concurrency == 0 {
            return Err(ConfigError::Message(
                "connection.probe_concurrency must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
