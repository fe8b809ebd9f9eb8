use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::services::providers::ProviderProfile;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    #[serde(default)]
    pub catalog: CatalogSettings,
    #[serde(default)]
    pub providers: ProvidersSettings,
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub discovery: DiscoverySettings,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

/// Where the business catalog is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogSourceKind {
    Postgres,
    Http,
    File,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogSettings {
    #[serde(default = "default_catalog_source")]
    pub source: CatalogSourceKind,
    #[serde(default = "default_catalog_file")]
    pub file_path: String,
    #[serde(default)]
    pub database: Option<DatabaseSettings>,
    #[serde(default)]
    pub http: Option<HttpCatalogSettings>,
    #[serde(default = "default_catalog_refresh_secs")]
    pub refresh_secs: u64,
    #[serde(default = "default_catalog_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Minimum wait after a failed load before the source is asked again
    #[serde(default = "default_catalog_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            source: default_catalog_source(),
            file_path: default_catalog_file(),
            database: None,
            http: None,
            refresh_secs: default_catalog_refresh_secs(),
            fetch_timeout_secs: default_catalog_fetch_timeout_secs(),
            retry_backoff_secs: default_catalog_retry_backoff_secs(),
        }
    }
}

fn default_catalog_source() -> CatalogSourceKind {
    CatalogSourceKind::File
}

fn default_catalog_file() -> String {
    "data/catalog.json".to_string()
}

fn default_catalog_refresh_secs() -> u64 {
    300
}

fn default_catalog_fetch_timeout_secs() -> u64 {
    10
}

fn default_catalog_retry_backoff_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub acquire_timeout_secs: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
}

/// Document API exposing the business collection
#[derive(Debug, Clone, Deserialize)]
pub struct HttpCatalogSettings {
    pub endpoint: String,
    pub database_id: String,
    pub collection_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersSettings {
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_generate_timeout_secs")]
    pub generate_timeout_secs: u64,
    #[serde(default = "default_selection_ttl_secs")]
    pub selection_ttl_secs: u64,
    /// How long a provider that failed a call stays out of rotation
    #[serde(default = "default_failure_cooldown_secs")]
    pub failure_cooldown_secs: u64,
    #[serde(default = "default_local_bonus")]
    pub local_bonus: f64,
    #[serde(default = "default_cost_cap")]
    pub cost_cap: f64,
    #[serde(default = "default_cost_weight")]
    pub cost_weight: f64,
    #[serde(default)]
    pub ollama: Option<ProviderEntry>,
    #[serde(default)]
    pub openai: Option<ProviderEntry>,
    #[serde(default)]
    pub anthropic: Option<ProviderEntry>,
}

impl Default for ProvidersSettings {
    fn default() -> Self {
        Self {
            probe_timeout_secs: default_probe_timeout_secs(),
            generate_timeout_secs: default_generate_timeout_secs(),
            selection_ttl_secs: default_selection_ttl_secs(),
            failure_cooldown_secs: default_failure_cooldown_secs(),
            local_bonus: default_local_bonus(),
            cost_cap: default_cost_cap(),
            cost_weight: default_cost_weight(),
            ollama: None,
            openai: None,
            anthropic: None,
        }
    }
}

fn default_probe_timeout_secs() -> u64 {
    2
}

fn default_generate_timeout_secs() -> u64 {
    10
}

fn default_selection_ttl_secs() -> u64 {
    300
}

fn default_failure_cooldown_secs() -> u64 {
    300
}

fn default_local_bonus() -> f64 {
    15.0
}

fn default_cost_cap() -> f64 {
    0.01
}

fn default_cost_weight() -> f64 {
    1000.0
}

/// One configured backend
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEntry {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub profile: ProviderProfile,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecuritySettings {
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
    #[serde(default = "default_enabled")]
    pub guardrail_enabled: bool,
    /// Extra regexes rejected as `custom_pattern`
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
    #[serde(default)]
    pub fast_path: FastPathSettings,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            max_query_chars: default_max_query_chars(),
            max_output_chars: default_max_output_chars(),
            guardrail_enabled: true,
            blocked_patterns: Vec::new(),
            fast_path: FastPathSettings::default(),
        }
    }
}

fn default_max_query_chars() -> usize {
    500
}

fn default_max_output_chars() -> usize {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct FastPathSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub allow_authenticated: bool,
    #[serde(default = "default_fast_path_max_words")]
    pub max_words: usize,
}

impl Default for FastPathSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_authenticated: false,
            max_words: default_fast_path_max_words(),
        }
    }
}

fn default_fast_path_max_words() -> usize {
    6
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverySettings {
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_max_recommendations")]
    pub max_recommendations: usize,
    #[serde(default = "default_candidate_cap")]
    pub candidate_cap: usize,
    #[serde(default = "default_exact_threshold")]
    pub exact_threshold: u32,
    #[serde(default = "default_enabled")]
    pub narrate_with_provider: bool,
    /// Total time one request may spend waiting on providers
    #[serde(default = "default_provider_budget_secs")]
    pub provider_budget_secs: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            max_recommendations: default_max_recommendations(),
            candidate_cap: default_candidate_cap(),
            exact_threshold: default_exact_threshold(),
            narrate_with_provider: true,
            provider_budget_secs: default_provider_budget_secs(),
        }
    }
}

fn default_history_window() -> usize {
    5
}

fn default_max_recommendations() -> usize {
    3
}

fn default_candidate_cap() -> usize {
    10
}

fn default_exact_threshold() -> u32 {
    15
}

fn default_provider_budget_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthSettings {
    /// HS256 secret; when unset the request body's `authenticated` flag is trusted
    #[serde(default)]
    pub jwt_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Settings {
    /// Load configuration from file and environment variables
    ///
    /// Later sources override earlier ones:
    /// 1. serde defaults
    /// 2. config/default.toml, then config/local.toml
    /// 3. `DISCOVERY__` environment variables, e.g. `DISCOVERY__SERVER__PORT`
    /// 4. well-known variables such as `DATABASE_URL` and `OPENAI_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(environment())
            .build()?;

        substitute_env_vars(settings)?.try_deserialize()
    }

    /// Load configuration from a custom path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(environment())
            .build()?;

        settings.try_deserialize()
    }
}

fn environment() -> Environment {
    Environment::with_prefix("DISCOVERY")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

/// Apply conventional environment variables on top of the loaded config
fn substitute_env_vars(settings: Config) -> Result<Config, ConfigError> {
    use std::env;

    let overrides = [
        ("DATABASE_URL", "catalog.database.url"),
        ("OPENAI_API_KEY", "providers.openai.api_key"),
        ("ANTHROPIC_API_KEY", "providers.anthropic.api_key"),
        ("OLLAMA_BASE_URL", "providers.ollama.base_url"),
        ("DISCOVERY_JWT_SECRET", "auth.jwt_secret"),
    ];

    let mut builder = Config::builder().add_source(settings);
    for (var, key) in overrides {
        if let Ok(value) = env::var(var) {
            if !value.trim().is_empty() {
                builder = builder.set_override(key, value)?;
            }
        }
    }

    builder.build()
}
