//! Vecivendo Ads: library crate.
//!
//! Holds the shared application state and every module the binary and the
//! integration tests in `tests/` build on.

use std::sync::Arc;

use tokio::task::JoinHandle;

pub mod analytics;
pub mod api;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod notification;
pub mod store;

use analytics::dashboard::KpiAggregator;
use config::{Config, StoreBackend};
use jobs::budget_sweeper::BudgetSweeper;
use jobs::side_effects::SideEffectQueue;
use middleware::budget::SpendAggregator;
use middleware::eligibility::EligibilityFilter;
use middleware::metrics::AdsMetrics;
use middleware::tracker::EventTracker;
use models::cost::CostTable;
use notification::webhook::WebhookNotifier;
use store::appwrite::AppwriteStore;
use store::memory::MemoryStore;
use store::DocumentStore;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn DocumentStore>,
    pub costs: CostTable,
    pub spend: SpendAggregator,
    pub eligibility: EligibilityFilter,
    pub tracker: EventTracker,
    pub kpis: KpiAggregator,
    pub webhook: WebhookNotifier,
    pub metrics: Arc<AdsMetrics>,
}

impl AppState {
    /// Wire every component over `store` and start the side-effect worker.
    /// Must be called inside a Tokio runtime.
    pub fn new(config: Config, store: Arc<dyn DocumentStore>) -> anyhow::Result<(Self, JoinHandle<()>)> {
        let metrics = Arc::new(AdsMetrics::new()?);
        let webhook = WebhookNotifier::new(
            config.webhook_urls.clone(),
            config.webhook_signing_secret.clone(),
        );
        let costs = CostTable::new(store.clone(), config.cost_cache_ttl);
        let spend = SpendAggregator::new(store.clone(), costs.clone(), metrics.clone());
        let eligibility = EligibilityFilter::new(store.clone(), spend.clone(), metrics.clone());

        let (queue, worker) = SideEffectQueue::start(
            store.clone(),
            config.side_effect_retry.clone(),
            config.side_effect_queue_capacity,
            metrics.clone(),
        );
        let tracker = EventTracker::new(
            store.clone(),
            costs.clone(),
            queue,
            webhook.clone(),
            metrics.clone(),
        )
        .with_view_dedup(config.view_dedup_window);
        let kpis = KpiAggregator::new(store.clone(), config.kpi_fetch_limit);

        let state = Self {
            config,
            store,
            costs,
            spend,
            eligibility,
            tracker,
            kpis,
            webhook,
            metrics,
        };
        Ok((state, worker))
    }

    pub fn sweeper(&self) -> BudgetSweeper {
        BudgetSweeper::new(self.store.clone(), self.webhook.clone(), self.metrics.clone())
    }
}

/// Open the configured document store.
pub fn connect_store(config: &Config) -> anyhow::Result<Arc<dyn DocumentStore>> {
    Ok(match config.store_backend {
        StoreBackend::Appwrite => {
            tracing::info!(endpoint = %config.appwrite.endpoint, "Using Appwrite document store");
            Arc::new(AppwriteStore::new(&config.appwrite)?)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory document store");
            Arc::new(MemoryStore::new())
        }
    })
}
