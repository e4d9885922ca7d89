use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    profiled_env_opt(profile, key)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub engine: EngineConfig,
    pub queue: QueueConfig,
    pub aws: AwsConfig,
    pub store: StoreConfig,
    pub postgres: PostgresConfig,
    pub health: HealthConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `IFTHEN_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("IFTHEN_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            engine: EngineConfig::from_env_profiled(p),
            queue: QueueConfig::from_env_profiled(p),
            aws: AwsConfig::from_env_profiled(p),
            store: StoreConfig::from_env_profiled(p),
            postgres: PostgresConfig::from_env_profiled(p),
            health: HealthConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  engine:   max_in_flight={}, batch={}, dispatch_timeout_ms={}, grace_secs={}",
            self.engine.max_in_flight,
            self.engine.poll_batch_size,
            self.engine.dispatch_timeout_ms,
            self.engine.shutdown_grace_secs
        );
        tracing::info!(
            "  queue:    url={}, visibility_timeout_secs={}",
            if self.queue.queue_url.is_empty() { "(none)" } else { &self.queue.queue_url },
            self.queue.visibility_timeout_secs
        );
        tracing::info!("  aws:      region={}", self.aws.region);
        tracing::info!(
            "  store:    backend={}, rules_dir={}, watch={}",
            self.store.backend,
            self.store.rules_dir.display(),
            self.store.watch
        );
        tracing::info!("  postgres: host={}, db={}", self.postgres.host, self.postgres.database);
        tracing::info!("  health:   enabled={}, port={}", self.health.enabled, self.health.port);
    }

    /// Return a redacted view safe for API responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "engine": {
                "max_in_flight": self.engine.max_in_flight,
                "poll_batch_size": self.engine.poll_batch_size,
                "dispatch_timeout_ms": self.engine.dispatch_timeout_ms,
                "shutdown_grace_secs": self.engine.shutdown_grace_secs,
            },
            "queue": {
                "queue_url": self.queue.queue_url,
                "configured": self.queue.is_configured(),
            },
            "aws": { "region": self.aws.region },
            "store": { "backend": self.store.backend, "rules_dir": self.store.rules_dir },
            "postgres": {
                "host": self.postgres.host,
                "port": self.postgres.port,
                "database": self.postgres.database,
                "configured": self.postgres.is_configured(),
            },
        })
    }
}

// ── Engine ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on concurrently processed messages.
    pub max_in_flight: usize,
    pub poll_batch_size: u32,
    /// Back-off after a failed poll.
    pub poll_interval_ms: u64,
    /// Per-target dispatch timeout.
    pub dispatch_timeout_ms: u64,
    /// How long `stop()` waits for in-flight pipelines.
    pub shutdown_grace_secs: u64,
}

impl EngineConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            max_in_flight: profiled_env_u32(p, "ENGINE_MAX_IN_FLIGHT", 16).max(1) as usize,
            poll_batch_size: profiled_env_u32(p, "ENGINE_POLL_BATCH_SIZE", 10).max(1),
            poll_interval_ms: profiled_env_u64(p, "ENGINE_POLL_INTERVAL_MS", 1000),
            dispatch_timeout_ms: profiled_env_u64(p, "ENGINE_DISPATCH_TIMEOUT_MS", 10_000),
            shutdown_grace_secs: profiled_env_u64(p, "ENGINE_SHUTDOWN_GRACE_SECS", 30),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 16,
            poll_batch_size: 10,
            poll_interval_ms: 1000,
            dispatch_timeout_ms: 10_000,
            shutdown_grace_secs: 30,
        }
    }
}

// ── Queue ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub queue_url: String,
    pub dlq_url: Option<String>,
    pub visibility_timeout_secs: u32,
}

impl QueueConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            queue_url: profiled_env_or(p, "QUEUE_URL", ""),
            dlq_url: profiled_env_opt(p, "QUEUE_DLQ_URL"),
            visibility_timeout_secs: profiled_env_u32(p, "QUEUE_VISIBILITY_TIMEOUT_SECS", 60),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.queue_url.is_empty()
    }
}

// ── AWS ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub endpoint_url: Option<String>,
}

impl AwsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            region: profiled_env_or(p, "AWS_REGION", "eu-west-1"),
            access_key_id: profiled_env_opt(p, "AWS_ACCESS_KEY_ID"),
            secret_access_key: profiled_env_opt(p, "AWS_SECRET_ACCESS_KEY"),
            session_token: profiled_env_opt(p, "AWS_SESSION_TOKEN"),
            // Deliberately not AWS_ENDPOINT_URL: that one is shared with other services.
            endpoint_url: profiled_env_opt(p, "QUEUE_AWS_ENDPOINT_URL"),
        }
    }
}

// ── Rule store ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "memory" (seeded from `rules_dir`) or "postgres".
    pub backend: String,
    pub rules_dir: PathBuf,
    /// Hot-reload rule files on change (memory backend only).
    pub watch: bool,
}

impl StoreConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            backend: profiled_env_or(p, "RULE_STORE", "memory"),
            rules_dir: PathBuf::from(profiled_env_or(p, "RULES_DIR", "data/rules")),
            watch: profiled_env_bool(p, "RULES_WATCH", false),
        }
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_u16(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "ifthen"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_u32(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.username.is_some()
    }
}

// ── Health endpoint ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub enabled: bool,
    pub port: u16,
}

impl HealthConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            enabled: profiled_env_bool(p, "HEALTH_ENABLED", true),
            port: profiled_env_u16(p, "HEALTH_PORT", 8080),
        }
    }
}
