use std::time::Duration;

use crate::jobs::side_effects::RetryPolicy;
use crate::store::appwrite::AppwriteSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Appwrite,
    /// In-process store; data is lost on exit. Local development and tests.
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store_backend: StoreBackend,
    pub appwrite: AppwriteSettings,
    pub admin_key: Option<String>,
    /// Comma-separated list of webhook URLs notified on deactivations.
    pub webhook_urls: Vec<String>,
    pub webhook_signing_secret: Option<String>,
    pub dashboard_origin: String,
    pub cost_cache_ttl: Duration,
    /// Repeat views of one ad from one session inside this window are not
    /// charged. Zero disables deduplication.
    pub view_dedup_window: Duration,
    /// Zero disables the sweeper.
    pub budget_sweep_interval: Duration,
    pub side_effect_retry: RetryPolicy,
    pub side_effect_queue_capacity: usize,
    pub kpi_fetch_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            store_backend: StoreBackend::Memory,
            appwrite: AppwriteSettings {
                endpoint: "https://cloud.appwrite.io/v1".into(),
                project_id: String::new(),
                api_key: String::new(),
                database_id: String::new(),
            },
            admin_key: None,
            webhook_urls: Vec::new(),
            webhook_signing_secret: None,
            dashboard_origin: "http://localhost:3000".into(),
            cost_cache_ttl: Duration::from_secs(60),
            view_dedup_window: Duration::ZERO,
            budget_sweep_interval: Duration::from_secs(300),
            side_effect_retry: RetryPolicy::default(),
            side_effect_queue_capacity: 1024,
            kpi_fetch_limit: crate::analytics::dashboard::DEFAULT_FETCH_LIMIT,
        }
    }
}

/// `NAME`, falling back to the `NEXT_PUBLIC_NAME` spelling the web app used.
fn env_or_public(name: &str) -> Option<String> {
    std::env::var(name)
        .or_else(|_| std::env::var(format!("NEXT_PUBLIC_{}", name)))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    let defaults = Config::default();

    let appwrite = AppwriteSettings {
        endpoint: env_or_public("APPWRITE_ENDPOINT").unwrap_or(defaults.appwrite.endpoint),
        project_id: env_or_public("APPWRITE_PROJECT_ID").unwrap_or_default(),
        api_key: env_or_public("APPWRITE_API_KEY").unwrap_or_default(),
        database_id: env_or_public("APPWRITE_DATABASE_ID").unwrap_or_default(),
    };

    let store_backend = match std::env::var("STORE_BACKEND").ok().as_deref() {
        Some("memory") => StoreBackend::Memory,
        Some("appwrite") => StoreBackend::Appwrite,
        Some(other) => anyhow::bail!("STORE_BACKEND must be 'appwrite' or 'memory', got '{}'", other),
        // default to the real store whenever it is configured
        None if !appwrite.project_id.is_empty() => StoreBackend::Appwrite,
        None => StoreBackend::Memory,
    };

    if store_backend == StoreBackend::Appwrite
        && (appwrite.project_id.is_empty() || appwrite.database_id.is_empty())
    {
        anyhow::bail!("APPWRITE_PROJECT_ID and APPWRITE_DATABASE_ID are required for the appwrite store backend");
    }
    if store_backend == StoreBackend::Memory {
        eprintln!("⚠️  Using the in-memory store: data is lost on exit. Set APPWRITE_* for production.");
    }

    let default_retry = RetryPolicy::default();

    Ok(Config {
        port: env_parse("VECIVENDO_PORT", defaults.port),
        store_backend,
        appwrite,
        admin_key: std::env::var("VECIVENDO_ADMIN_KEY")
            .ok()
            .filter(|k| !k.is_empty()),
        webhook_urls: std::env::var("WEBHOOK_URLS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        webhook_signing_secret: std::env::var("WEBHOOK_SIGNING_SECRET")
            .ok()
            .filter(|s| !s.is_empty()),
        dashboard_origin: std::env::var("DASHBOARD_ORIGIN").unwrap_or(defaults.dashboard_origin),
        cost_cache_ttl: Duration::from_secs(env_parse("COST_CACHE_TTL_SECS", 60)),
        view_dedup_window: Duration::from_secs(env_parse("VIEW_DEDUP_WINDOW_SECS", 0)),
        budget_sweep_interval: Duration::from_secs(env_parse("BUDGET_SWEEP_INTERVAL_SECS", 300)),
        side_effect_retry: RetryPolicy {
            max_retries: env_parse("SIDE_EFFECT_MAX_RETRIES", default_retry.max_retries),
            base_backoff_ms: env_parse("SIDE_EFFECT_BASE_BACKOFF_MS", default_retry.base_backoff_ms),
            ..default_retry
        },
        side_effect_queue_capacity: env_parse(
            "SIDE_EFFECT_QUEUE_CAPACITY",
            defaults.side_effect_queue_capacity,
        )
        .max(1),
        kpi_fetch_limit: env_parse("KPI_FETCH_LIMIT", defaults.kpi_fetch_limit).max(1),
    })
}
