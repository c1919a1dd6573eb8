use std::env;
use std::time::Duration;

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
    match profiled_env_opt(profile, key).as_deref() {
        Some("1") | Some("true") | Some("yes") => true,
        Some("0") | Some("false") | Some("no") => false,
        _ => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub postgres: PostgresConfig,
    pub query: QueryConfig,
    pub scheduler: SchedulerConfig,
    pub live: LiveConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `TILECAST_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("TILECAST_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            postgres: PostgresConfig::from_env_profiled(p),
            query: QueryConfig::from_env_profiled(p),
            scheduler: SchedulerConfig::from_env_profiled(p),
            live: LiveConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:      {}:{}", self.server.host, self.server.port);
        tracing::info!("  postgres:    host={}, db={}", self.postgres.host, self.postgres.database);
        tracing::info!(
            "  query:       separate_db={}, timeout={}s, max_rows={}",
            self.query.database_url.is_some(),
            self.scheduler.execute_timeout_secs,
            self.query.max_rows
        );
        tracing::info!(
            "  scheduler:   check={}s, backoff={}s, concurrency={}, max_age={}s",
            self.scheduler.check_interval_secs,
            self.scheduler.error_backoff_secs,
            self.scheduler.max_concurrent,
            self.scheduler.result_max_age_secs
        );
        tracing::info!(
            "  live:        send_timeout={}ms, health={}s, pong_timeout={}s",
            self.live.send_timeout_ms,
            self.live.health_interval_secs,
            self.live.pong_timeout_secs
        );
    }

    /// Return a redacted view safe for API responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "server": { "host": self.server.host, "port": self.server.port },
            "postgres": {
                "host": self.postgres.host,
                "port": self.postgres.port,
                "database": self.postgres.database,
                "configured": self.postgres.is_configured(),
            },
            "query": {
                "separate_db": self.query.database_url.is_some(),
                "max_rows": self.query.max_rows,
            },
            "scheduler": self.scheduler,
            "live": self.live,
        })
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_u16(p, "PORT", 8000),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "*"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origin: "*".to_string(),
        }
    }
}

// ── PostgreSQL (template store) ───────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Full connection URL; overrides the individual parts when set.
    pub url: Option<String>,
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
            url: profiled_env_opt(p, "PG_URL"),
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_u16(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "tilecast"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_u32(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn connection_string(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some() || self.username.is_some()
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            database: "tilecast".to_string(),
            username: None,
            password: None,
            ssl_mode: "prefer".to_string(),
            max_connections: 10,
        }
    }
}

// ── Query executor ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Database the templates' queries run against. `None` = template store DB.
    pub database_url: Option<String>,
    pub max_rows: u32,
}

impl QueryConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            database_url: profiled_env_opt(p, "QUERY_DATABASE_URL"),
            max_rows: profiled_env_u32(p, "QUERY_MAX_ROWS", 1000),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_rows: 1000,
        }
    }
}

// ── Refresh scheduler ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between due checks.
    pub check_interval_secs: u64,
    /// Sleep after the template store fails, before ticking again.
    pub error_backoff_secs: u64,
    /// Upper bound on executions running at once within a cycle.
    pub max_concurrent: usize,
    /// Cached results older than this are evicted; 0 disables eviction.
    pub result_max_age_secs: u64,
    /// Run the first cycle at start instead of after one check interval.
    pub run_immediately: bool,
    /// Per-execution timeout; 0 disables.
    pub execute_timeout_secs: u64,
}

impl SchedulerConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            check_interval_secs: profiled_env_u64(p, "SCHEDULER_CHECK_INTERVAL_SECS", d.check_interval_secs),
            error_backoff_secs: profiled_env_u64(p, "SCHEDULER_ERROR_BACKOFF_SECS", d.error_backoff_secs),
            max_concurrent: profiled_env_u32(p, "SCHEDULER_MAX_CONCURRENT", d.max_concurrent as u32) as usize,
            result_max_age_secs: profiled_env_u64(p, "SCHEDULER_RESULT_MAX_AGE_SECS", d.result_max_age_secs),
            run_immediately: profiled_env_bool(p, "SCHEDULER_RUN_IMMEDIATELY", d.run_immediately),
            execute_timeout_secs: profiled_env_u64(p, "QUERY_TIMEOUT_SECS", d.execute_timeout_secs),
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn result_max_age(&self) -> Option<Duration> {
        (self.result_max_age_secs > 0).then(|| Duration::from_secs(self.result_max_age_secs))
    }

    pub fn execute_timeout(&self) -> Option<Duration> {
        (self.execute_timeout_secs > 0).then(|| Duration::from_secs(self.execute_timeout_secs))
    }

    /// Resolved concurrency bound (never zero).
    pub fn concurrency(&self) -> usize {
        self.max_concurrent.max(1)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 1,
            error_backoff_secs: 5,
            max_concurrent: 4,
            result_max_age_secs: 86_400,
            run_immediately: true,
            execute_timeout_secs: 30,
        }
    }
}

// ── Live delivery / health probing ────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Per-subscriber send timeout.
    pub send_timeout_ms: u64,
    /// Seconds between health probe rounds.
    pub health_interval_secs: u64,
    /// Timeout for a single probe send.
    pub probe_timeout_ms: u64,
    /// Drop subscribers silent for longer than this; 0 = pong not required.
    pub pong_timeout_secs: u64,
    /// Outbound queue depth per WebSocket connection.
    pub outbound_buffer: usize,
}

impl LiveConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            send_timeout_ms: profiled_env_u64(p, "LIVE_SEND_TIMEOUT_MS", d.send_timeout_ms),
            health_interval_secs: profiled_env_u64(p, "LIVE_HEALTH_INTERVAL_SECS", d.health_interval_secs),
            probe_timeout_ms: profiled_env_u64(p, "LIVE_PROBE_TIMEOUT_MS", d.probe_timeout_ms),
            pong_timeout_secs: profiled_env_u64(p, "LIVE_PONG_TIMEOUT_SECS", d.pong_timeout_secs),
            outbound_buffer: profiled_env_u32(p, "LIVE_OUTBOUND_BUFFER", d.outbound_buffer as u32) as usize,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn pong_timeout(&self) -> Option<Duration> {
        (self.pong_timeout_secs > 0).then(|| Duration::from_secs(self.pong_timeout_secs))
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: 2_000,
            health_interval_secs: 30,
            probe_timeout_ms: 5_000,
            pong_timeout_secs: 0,
            outbound_buffer: 64,
        }
    }
}
