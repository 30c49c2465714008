//! CRM Sync
//!
//! Owner-scoped data access for a small CRM:
//! - Document store abstraction with an in-process implementation
//! - Live snapshot subscriptions with explicit cancellation
//! - Typed record mapping for templates, retention settings, contacts and deals
//! - Dashboard aggregates over contact and deal snapshots
//! - HTTP + WebSocket surface for a presentation layer

pub mod adapters;
pub mod api;
pub mod dashboard;
pub mod error;
pub mod events;
pub mod mapper;
pub mod notify;
pub mod owner;
pub mod state;
pub mod store;
pub mod subscription;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use error::{CrmError, Result as CrmResult};
pub use owner::OwnerId;

use adapters::{AdapterContext, ContactAdapter, DealAdapter, RetentionAdapter, TemplateAdapter};
use anyhow::Result;
use mapper::MalformedPolicy;
use notify::{Notifier, TracingNotifier};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use store::{DocumentStore, MemoryDocumentStore};

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: ServerYamlConfig,
    pub store: StoreYamlConfig,
    pub subscriptions: SubscriptionYamlConfig,
}

/// Server configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerYamlConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerYamlConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

/// Document store configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreYamlConfig {
    pub backend: StoreBackend,
    /// Buffered change events per live query before it starts lagging
    pub event_capacity: usize,
}

impl Default for StoreYamlConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            event_capacity: events::DEFAULT_CAPACITY,
        }
    }
}

/// Subscription configuration section
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SubscriptionYamlConfig {
    pub malformed_policy: MalformedPolicy,
}

/// Which DocumentStore implementation to run against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend: {other}")),
        }
    }
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub store_backend: StoreBackend,
    pub event_capacity: usize,
    pub malformed_policy: MalformedPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_yaml(YamlConfig::default())
    }
}

impl Config {
    /// Load configuration from environment variables only.
    /// Equivalent to from_yaml_and_env(None).
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "config.yaml" in CWD. A missing file
    /// falls back to env vars / defaults; an unparsable env override is an
    /// error.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        let mut config = Self::from_yaml(Self::load_yaml(yaml_path));

        if let Ok(host) = std::env::var("SERVER_HOST") {
            config.server_host = host;
        }
        if let Ok(port) = std::env::var("SERVER_PORT") {
            config.server_port = port
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid SERVER_PORT `{port}`: {e}"))?;
        }
        if let Ok(backend) = std::env::var("CRM_STORE_BACKEND") {
            config.store_backend = backend.parse().map_err(anyhow::Error::msg)?;
        }
        if let Ok(capacity) = std::env::var("CRM_EVENT_CAPACITY") {
            config.event_capacity = capacity
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid CRM_EVENT_CAPACITY `{capacity}`: {e}"))?;
        }
        if let Ok(policy) = std::env::var("CRM_MALFORMED_POLICY") {
            config.malformed_policy = policy.parse().map_err(anyhow::Error::msg)?;
        }
        Ok(config)
    }

    fn from_yaml(yaml: YamlConfig) -> Self {
        Self {
            server_host: yaml.server.host,
            server_port: yaml.server.port,
            store_backend: yaml.store.backend,
            event_capacity: yaml.store.event_capacity,
            malformed_policy: yaml.subscriptions.malformed_policy,
        }
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("config.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }
}

/// Shared application state: one store and one adapter per entity
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub templates: TemplateAdapter,
    pub retention: RetentionAdapter,
    pub contacts: ContactAdapter,
    pub deals: DealAdapter,
    pub config: Arc<Config>,
}

impl AppState {
    /// Create application state with the configured store backend
    pub fn new(config: Config) -> Result<Self> {
        let store: Arc<dyn DocumentStore> = match config.store_backend {
            StoreBackend::Memory => {
                Arc::new(MemoryDocumentStore::with_event_capacity(config.event_capacity))
            }
        };
        let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier::granted());
        Ok(Self::with_store(config, store, Some(notifier)))
    }

    /// Create application state around an existing store
    pub fn with_store(
        config: Config,
        store: Arc<dyn DocumentStore>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        let mut ctx = AdapterContext::new(store.clone(), config.malformed_policy);
        if let Some(notifier) = notifier {
            ctx = ctx.with_notifier(notifier);
        }
        Self {
            store,
            templates: TemplateAdapter::new(ctx.clone()),
            retention: RetentionAdapter::new(ctx.clone()),
            contacts: ContactAdapter::new(ctx.clone()),
            deals: DealAdapter::new(ctx),
            config: Arc::new(config),
        }
    }
}

/// Bind the configured address and serve the API until shutdown
pub async fn start_server(config: Config) -> Result<()> {
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let state = AppState::new(config)?;
    let app = api::create_router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("CRM sync server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
