//! Credit cost per event type.
//!
//! Each event type lives in its own single-document collection
//! (`costo_por_vista`, `costo_por_click`, attribute `costo`). The table keeps
//! a short-lived in-memory copy, reloaded after every admin write.
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use super::collections;
use super::log_event::EventType;
use crate::store::{DocumentStore, Query, StoreError};

pub const DEFAULT_VIEW_COST: f64 = 1.0;
pub const DEFAULT_CLICK_COST: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostSetting {
    pub view: f64,
    pub click: f64,
}

impl Default for CostSetting {
    fn default() -> Self {
        Self {
            view: DEFAULT_VIEW_COST,
            click: DEFAULT_CLICK_COST,
        }
    }
}

impl CostSetting {
    pub fn cost_for(&self, event: EventType) -> f64 {
        match event {
            EventType::View => self.view,
            EventType::Click => self.click,
        }
    }

    /// Spend of a views/clicks pair at these prices.
    pub fn spend(&self, views: u64, clicks: u64) -> f64 {
        views as f64 * self.view + clicks as f64 * self.click
    }
}

fn collection_for(event: EventType) -> &'static str {
    match event {
        EventType::View => collections::COST_PER_VIEW,
        EventType::Click => collections::COST_PER_CLICK,
    }
}

fn default_document_id(event: EventType) -> &'static str {
    match event {
        EventType::View => "default_view_cost",
        EventType::Click => "default_click_cost",
    }
}

/// Shared, cheaply-cloneable cost cache.
#[derive(Clone)]
pub struct CostTable {
    store: Arc<dyn DocumentStore>,
    ttl: Duration,
    cached: Arc<RwLock<Option<(CostSetting, Instant)>>>,
}

impl CostTable {
    pub fn new(store: Arc<dyn DocumentStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cached: Arc::new(RwLock::new(None)),
        }
    }

    /// Current costs. Served from memory while fresh; a zero TTL always reads
    /// through to the store.
    pub async fn current(&self) -> CostSetting {
        if let Some((setting, loaded_at)) = *self.cached.read().await {
            if loaded_at.elapsed() < self.ttl {
                return setting;
            }
        }
        self.reload().await
    }

    /// Replace the cached copy with a fresh read.
    pub async fn reload(&self) -> CostSetting {
        let setting = CostSetting {
            view: self.load_one(EventType::View).await,
            click: self.load_one(EventType::Click).await,
        };
        *self.cached.write().await = Some((setting, Instant::now()));
        setting
    }

    /// Missing or unreadable cost records fall back to the defaults.
    async fn load_one(&self, event: EventType) -> f64 {
        let fallback = CostSetting::default().cost_for(event);
        let collection = collection_for(event);
        match self.store.list(collection, &[Query::limit(1)]).await {
            Ok(list) => list
                .documents
                .first()
                .and_then(|doc| doc.get("costo"))
                .and_then(Value::as_f64)
                .unwrap_or(fallback),
            Err(e) => {
                tracing::warn!(collection, error = %e, "cost lookup failed, using default");
                fallback
            }
        }
    }

    /// Write new costs. `None` leaves that event type unchanged.
    pub async fn set(&self, view: Option<f64>, click: Option<f64>) -> Result<CostSetting, StoreError> {
        for (event, value) in [(EventType::View, view), (EventType::Click, click)] {
            if let Some(cost) = value {
                self.write_one(event, cost).await?;
            }
        }
        Ok(self.reload().await)
    }

    async fn write_one(&self, event: EventType, cost: f64) -> Result<(), StoreError> {
        let collection = collection_for(event);
        let existing = self.store.list(collection, &[Query::limit(1)]).await?;
        let data = json!({ "costo": cost });

        match existing
            .documents
            .first()
            .and_then(|doc| doc.get("$id"))
            .and_then(Value::as_str)
        {
            Some(id) => {
                self.store.update(collection, id, data).await?;
            }
            None => {
                self.store
                    .create(collection, default_document_id(event), data)
                    .await?;
            }
        }
        tracing::info!(collection, cost, "cost setting updated");
        Ok(())
    }
}
