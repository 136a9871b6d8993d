use std::{net::SocketAddr, time::Duration};

use catalog_notify::NotifierConfig;
use catalog_query::params::{DEFAULT_LIMIT, DEFAULT_MAX_LIMIT};
use catalog_query::{ParamLimits, QueryBudgets};
use catalog_storage::{DEFAULT_MAX_DOCUMENT_BYTES, StoreBudgets};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub query: QuerySettings,
    /// Query result cache
    #[serde(default)]
    pub cache: CacheConfig,
    /// Whole-response microcache
    #[serde(default)]
    pub microcache: MicrocacheConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        // Storage validations
        if self.storage.max_document_bytes == 0 {
            return Err("storage.max_document_bytes must be > 0".into());
        }
        let b = &self.storage.budgets;
        if b.read.is_zero() || b.count.is_zero() || b.write.is_zero() {
            return Err("storage.budgets must be > 0".into());
        }
        // Query validations
        if self.query.default_limit == 0 {
            return Err("query.default_limit must be > 0".into());
        }
        if self.query.max_limit == 0 {
            return Err("query.max_limit must be > 0".into());
        }
        if self.query.default_limit > self.query.max_limit {
            return Err("query.default_limit must be <= query.max_limit".into());
        }
        let q = &self.query.budgets;
        if q.primary.is_zero() || q.substring.is_zero() || q.simplified.is_zero() {
            return Err("query.budgets must be > 0".into());
        }
        // Cache validations
        if self.cache.ttl_ms == 0 {
            return Err("cache.ttl_ms must be > 0".into());
        }
        if self.microcache.enabled {
            if self.microcache.ttl_ms == 0 {
                return Err("microcache.ttl_ms must be > 0".into());
            }
            if self.microcache.max_entries == 0 {
                return Err("microcache.max_entries must be > 0".into());
            }
        }
        // Notifier validations
        if self.notifier.session_queue == 0 {
            return Err("notifier.session_queue must be > 0".into());
        }
        if self.notifier.privileged_room.trim().is_empty() {
            return Err("notifier.privileged_room must not be empty".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    pub fn param_limits(&self) -> ParamLimits {
        ParamLimits {
            default_limit: self.query.default_limit,
            max_limit: self.query.max_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_body_limit() -> usize {
    // Above the document limit so oversized payloads reach the handler and get a hint.
    32 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON file with an array of products loaded at startup.
    pub seed_file: Option<String>,
    /// Load the built-in demo products when no seed file is given.
    pub seed_demo: bool,
    /// Artificial latency added to every store call.
    pub simulated_latency_ms: u64,
    pub max_document_bytes: usize,
    pub budgets: StoreBudgets,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            seed_file: None,
            seed_demo: true,
            simulated_latency_ms: 0,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
            budgets: StoreBudgets::default(),
        }
    }
}

impl StorageConfig {
    pub fn simulated_latency(&self) -> Duration {
        Duration::from_millis(self.simulated_latency_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    pub default_limit: usize,
    pub max_limit: usize,
    /// Shortest search term that escalates to substring search.
    pub min_search_length: usize,
    pub budgets: QueryBudgets,
    /// Base path for media placeholder references.
    pub media_base_path: String,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: DEFAULT_MAX_LIMIT,
            min_search_length: catalog_query::engine::DEFAULT_MIN_SEARCH_LENGTH,
            budgets: QueryBudgets::default(),
            media_base_path: "/api/products".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: catalog_query::cache::DEFAULT_CAPACITY,
            ttl_ms: catalog_query::cache::DEFAULT_TTL.as_millis() as u64,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MicrocacheConfig {
    pub enabled: bool,
    pub ttl_ms: u64,
    pub max_entries: usize,
}

impl Default for MicrocacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 5_000,
            max_entries: 1_000,
        }
    }
}

impl MicrocacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    pub const DEFAULT_CONFIG_FILE: &str = "catalog.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., CATALOG__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("CATALOG")
                .prefix_separator("__")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn load_config_with_default_path<P: AsRef<Path>>(
        path: Option<P>,
    ) -> Result<AppConfig, String> {
        let p = path
            .as_ref()
            .map(|p| p.as_ref().to_string_lossy().to_string());
        load_config(p.as_deref())
    }
}
