//! Prometheus metrics recorder for the ads engine.
//!
//! Exposes a standard `/metrics` endpoint that Prometheus can scrape.
//! Metrics live in a per-instance registry so several app states (tests,
//! CLI one-shots) can coexist in one process.

use prometheus::{
    histogram_opts, opts, Counter, CounterVec, Encoder, Histogram, Registry, TextEncoder,
};

pub struct AdsMetrics {
    registry: Registry,

    // Counters
    events_total: CounterVec,
    credits_charged_total: Counter,
    deactivations_total: CounterVec,
    side_effect_failures_total: CounterVec,
    side_effects_dropped_total: Counter,
    ads_served_total: Counter,
    spend_lookup_failures_total: Counter,

    // Histograms
    track_duration_seconds: Histogram,
}

impl AdsMetrics {
    /// Create and register all metrics in a fresh registry.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let events_total = CounterVec::new(
            opts!("vecivendo_ad_events_total", "Tracked paid-ad events"),
            &["type", "outcome"],
        )?;
        let credits_charged_total = Counter::with_opts(opts!(
            "vecivendo_credits_charged_total",
            "Credits deducted from paid ads"
        ))?;
        let deactivations_total = CounterVec::new(
            opts!("vecivendo_ad_deactivations_total", "Paid ads switched off"),
            &["reason"],
        )?;
        let side_effect_failures_total = CounterVec::new(
            opts!(
                "vecivendo_side_effect_failures_total",
                "Best-effort writes abandoned after all retries"
            ),
            &["job"],
        )?;
        let side_effects_dropped_total = Counter::with_opts(opts!(
            "vecivendo_side_effects_dropped_total",
            "Best-effort writes dropped because the queue was full"
        ))?;
        let ads_served_total = Counter::with_opts(opts!(
            "vecivendo_ads_served_total",
            "Paid ads returned by the public listing"
        ))?;
        let spend_lookup_failures_total = Counter::with_opts(opts!(
            "vecivendo_spend_lookup_failures_total",
            "Daily spend lookups that failed open"
        ))?;
        let track_duration_seconds = Histogram::with_opts(histogram_opts!(
            "vecivendo_track_duration_seconds",
            "Track request latency in seconds",
            vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
        ))?;

        registry.register(Box::new(events_total.clone()))?;
        registry.register(Box::new(credits_charged_total.clone()))?;
        registry.register(Box::new(deactivations_total.clone()))?;
        registry.register(Box::new(side_effect_failures_total.clone()))?;
        registry.register(Box::new(side_effects_dropped_total.clone()))?;
        registry.register(Box::new(ads_served_total.clone()))?;
        registry.register(Box::new(spend_lookup_failures_total.clone()))?;
        registry.register(Box::new(track_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            events_total,
            credits_charged_total,
            deactivations_total,
            side_effect_failures_total,
            side_effects_dropped_total,
            ads_served_total,
            spend_lookup_failures_total,
            track_duration_seconds,
        })
    }

    /// `outcome` is `charged` or `deduplicated`.
    pub fn record_event(&self, event_type: &str, outcome: &str, credits: f64, elapsed_secs: f64) {
        self.events_total
            .with_label_values(&[event_type, outcome])
            .inc();
        if credits > 0.0 {
            self.credits_charged_total.inc_by(credits);
        }
        self.track_duration_seconds.observe(elapsed_secs);
    }

    pub fn record_deactivation(&self, reason: &str) {
        self.deactivations_total.with_label_values(&[reason]).inc();
    }

    pub fn record_side_effect_failure(&self, job: &str) {
        self.side_effect_failures_total
            .with_label_values(&[job])
            .inc();
    }

    pub fn record_side_effect_dropped(&self) {
        self.side_effects_dropped_total.inc();
    }

    pub fn record_ads_served(&self, count: usize) {
        self.ads_served_total.inc_by(count as f64);
    }

    pub fn record_spend_lookup_failure(&self) {
        self.spend_lookup_failures_total.inc();
    }

    /// Encode all registered metrics as Prometheus text format.
    /// Called by the `/metrics` HTTP handler.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_independent_registries_do_not_collide() {
        let a = AdsMetrics::new().unwrap();
        let b = AdsMetrics::new().unwrap();
        a.record_event("view", "charged", 1.0, 0.01);
        assert!(a.encode().contains("vecivendo_ad_events_total"));
        assert!(!b.encode().contains("outcome=\"charged\""));
    }

    #[test]
    fn test_credits_counter_accumulates() {
        let m = AdsMetrics::new().unwrap();
        m.record_event("click", "charged", 5.0, 0.02);
        m.record_event("view", "deduplicated", 0.0, 0.01);
        let text = m.encode();
        assert!(text.contains("vecivendo_credits_charged_total 5"));
        assert!(text.contains("outcome=\"deduplicated\""));
    }
}
