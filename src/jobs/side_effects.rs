//! Best-effort side-effect queue.
//!
//! Writes that must never block or fail a tracking request (event log append,
//! daily stat bump) are submitted here after the primary ad update commits.
//! A single worker drains the queue in order, retrying each job with
//! exponential backoff plus jitter. Jobs that exhaust their retries are logged
//! and counted, never surfaced to the caller.
//!
//! Because one worker applies every daily stat bump, the read-then-write on
//! `anuncios_pago_stats` does not race within a process.
//!
//! A failed write may still have landed (lost response), so retries must not
//! apply a job twice. Document ids are fixed when the job is built, a 409 on
//! create counts as done, and a stat bump remembers the value it tried to
//! write.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::middleware::metrics::AdsMetrics;
use crate::models::daily_stat::DayWindow;
use crate::models::log_event::{EventType, LogEvent};
use crate::models::{collections, iso};
use crate::store::{unique_id, DocumentStore, Query, StoreError};

#[derive(Debug, Clone)]
pub enum SideEffect {
    /// Append one event to `logs`.
    RecordEvent { id: String, event: LogEvent },
    /// Increment the per-day counter for an ad, creating the row on first use.
    BumpDailyStat {
        ad_id: String,
        window: DayWindow,
        event: EventType,
        /// Id used if this bump creates the day's row.
        new_row_id: String,
        /// (row id, counter value) of the last update attempt.
        written: Option<(String, u64)>,
    },
}

impl SideEffect {
    pub fn record_event(event: LogEvent) -> Self {
        SideEffect::RecordEvent {
            id: unique_id(),
            event,
        }
    }

    pub fn bump_daily_stat(ad_id: &str, window: DayWindow, event: EventType) -> Self {
        SideEffect::BumpDailyStat {
            ad_id: ad_id.to_string(),
            window,
            event,
            new_row_id: unique_id(),
            written: None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SideEffect::RecordEvent { .. } => "record_event",
            SideEffect::BumpDailyStat { .. } => "bump_daily_stat",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff_ms: 200,
            max_backoff_ms: 5_000,
            jitter_ms: 100,
        }
    }
}

impl RetryPolicy {
    /// Exponential: base * 2^(attempt - 1), capped, plus random jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_backoff_ms as f64;
        let raw = base * 2_f64.powi(attempt.saturating_sub(1) as i32);
        let capped = raw.min(self.max_backoff_ms as f64);
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(capped as u64 + jitter)
    }
}

enum Envelope {
    Job(SideEffect),
    Flush(oneshot::Sender<()>),
}

/// Handle for submitting jobs. Cheap to clone.
#[derive(Clone)]
pub struct SideEffectQueue {
    tx: mpsc::Sender<Envelope>,
    metrics: Arc<AdsMetrics>,
}

impl SideEffectQueue {
    /// Spawn the worker. The worker exits once every handle is dropped.
    pub fn start(
        store: Arc<dyn DocumentStore>,
        policy: RetryPolicy,
        capacity: usize,
        metrics: Arc<AdsMetrics>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run_worker(rx, store, policy, metrics.clone()));
        (Self { tx, metrics }, worker)
    }

    /// Enqueue without waiting. A full or closed queue drops the job.
    pub fn submit(&self, job: SideEffect) -> bool {
        let name = job.name();
        match self.tx.try_send(Envelope::Job(job)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(job = name, "side-effect queue full, dropping job");
                self.metrics.record_side_effect_dropped();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(job = name, "side-effect worker stopped, dropping job");
                self.metrics.record_side_effect_dropped();
                false
            }
        }
    }

    /// Wait until every job submitted before this call has been applied or abandoned.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Envelope::Flush(done_tx)).await.is_err() {
            return;
        }
        let _ = done_rx.await;
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<Envelope>,
    store: Arc<dyn DocumentStore>,
    policy: RetryPolicy,
    metrics: Arc<AdsMetrics>,
) {
    while let Some(envelope) = rx.recv().await {
        match envelope {
            Envelope::Job(job) => run_with_retry(store.as_ref(), &policy, &metrics, job).await,
            Envelope::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("side-effect worker stopped");
}

async fn run_with_retry(
    store: &dyn DocumentStore,
    policy: &RetryPolicy,
    metrics: &AdsMetrics,
    mut job: SideEffect,
) {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match apply(store, &mut job).await {
            Ok(()) => {
                debug!(job = job.name(), attempt, "side effect applied");
                return;
            }
            Err(e) if attempt > policy.max_retries => {
                warn!(
                    job = job.name(),
                    attempts = attempt,
                    error = %e,
                    "side effect abandoned after retries"
                );
                metrics.record_side_effect_failure(job.name());
                return;
            }
            Err(e) => {
                let wait = policy.backoff(attempt);
                warn!(
                    job = job.name(),
                    attempt,
                    error = %e,
                    retry_in_ms = wait.as_millis() as u64,
                    "side effect failed, retrying"
                );
                tokio::time::sleep(wait).await;
            }
        }
    }
}

async fn apply(store: &dyn DocumentStore, job: &mut SideEffect) -> Result<(), StoreError> {
    match job {
        SideEffect::RecordEvent { id, event } => {
            let data = serde_json::to_value(&*event)?;
            create_once(store, collections::LOGS, id, data).await
        }
        SideEffect::BumpDailyStat {
            ad_id,
            window,
            event,
            new_row_id,
            written,
        } => bump_daily_stat(store, ad_id, window, *event, new_row_id, written).await,
    }
}

/// Create with a fixed id; an existing document with that id is an earlier
/// attempt that landed.
async fn create_once(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
    data: Value,
) -> Result<(), StoreError> {
    match store.create(collection, id, data).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_conflict() => {
            debug!(collection, id, "document already written by an earlier attempt");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn bump_daily_stat(
    store: &dyn DocumentStore,
    ad_id: &str,
    window: &DayWindow,
    event: EventType,
    new_row_id: &str,
    written: &mut Option<(String, u64)>,
) -> Result<(), StoreError> {
    let found = store
        .list(
            collections::PAID_AD_STATS,
            &[
                Query::equal("ad_id", ad_id),
                Query::greater_than_equal("date", iso(window.start)),
                Query::less_than("date", iso(window.end)),
                Query::limit(1),
            ],
        )
        .await?;

    let counter = event.stat_counter();
    match found.documents.first() {
        Some(doc) => {
            let id = doc
                .get("$id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if id == new_row_id {
                // our own create landed
                return Ok(());
            }
            let current = doc.get(counter).and_then(Value::as_u64).unwrap_or(0);
            if let Some((row, target)) = written.as_ref() {
                if *row == id && current >= *target {
                    return Ok(());
                }
            }
            let target = current + 1;
            *written = Some((id.clone(), target));
            let mut patch = serde_json::Map::new();
            patch.insert(counter.to_string(), json!(target));
            store
                .update(collections::PAID_AD_STATS, &id, Value::Object(patch))
                .await?;
        }
        None => {
            let (views, clicks) = match event {
                EventType::View => (1, 0),
                EventType::Click => (0, 1),
            };
            create_once(
                store,
                collections::PAID_AD_STATS,
                new_row_id,
                json!({
                    "ad_id": ad_id,
                    "date": iso(window.start),
                    "views": views,
                    "clicks": clicks,
                }),
            )
            .await?;
        }
    }
    Ok(())
}
