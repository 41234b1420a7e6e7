use crate::broadcast::PublishReport;
use crate::model::{Rollup, Sample};
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at_unix: i64,
    pub telemd_cpu_usage_percent: Gauge,
    pub telemd_memory_usage_percent: Gauge,
    pub telemd_swap_usage_percent: Gauge,
    pub telemd_rollup_cpu_usage_percent: Gauge,
    pub telemd_samples_total: Counter,
    pub telemd_rollups_total: Counter,
    pub telemd_collect_errors_total: CounterVec,
    pub telemd_sink_write_errors_total: CounterVec,
    pub telemd_alerts_total: CounterVec,
    pub telemd_subscribers: Gauge,
    pub telemd_broadcast_dropped_total: Counter,
    pub telemd_subscribers_removed_total: Counter,
    pub telemd_scrape_count_total: Counter,
    pub telemd_uptime_seconds: Gauge,
    pub telemd_last_sample_timestamp_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let telemd_cpu_usage_percent = Gauge::with_opts(opts!(
            "telemd_cpu_usage_percent",
            "CPU usage of the latest sample in percent"
        ))?;
        let telemd_memory_usage_percent = Gauge::with_opts(opts!(
            "telemd_memory_usage_percent",
            "Memory usage of the latest sample in percent"
        ))?;
        let telemd_swap_usage_percent = Gauge::with_opts(opts!(
            "telemd_swap_usage_percent",
            "Swap usage of the latest sample in percent"
        ))?;
        let telemd_rollup_cpu_usage_percent = Gauge::with_opts(opts!(
            "telemd_rollup_cpu_usage_percent",
            "Average CPU usage of the latest report window in percent"
        ))?;
        let telemd_samples_total =
            Counter::with_opts(opts!("telemd_samples_total", "Samples collected"))?;
        let telemd_rollups_total =
            Counter::with_opts(opts!("telemd_rollups_total", "Rollups emitted"))?;
        let telemd_collect_errors_total = CounterVec::new(
            opts!(
                "telemd_collect_errors_total",
                "Failed collection cycles by stage"
            ),
            &["stage"],
        )?;
        let telemd_sink_write_errors_total = CounterVec::new(
            opts!(
                "telemd_sink_write_errors_total",
                "Failed or dropped sink writes by sink"
            ),
            &["sink"],
        )?;
        let telemd_alerts_total = CounterVec::new(
            opts!("telemd_alerts_total", "Threshold alerts raised by kind"),
            &["kind"],
        )?;
        let telemd_subscribers =
            Gauge::with_opts(opts!("telemd_subscribers", "Connected live subscribers"))?;
        let telemd_broadcast_dropped_total = Counter::with_opts(opts!(
            "telemd_broadcast_dropped_total",
            "Messages not delivered to lagging subscribers"
        ))?;
        let telemd_subscribers_removed_total = Counter::with_opts(opts!(
            "telemd_subscribers_removed_total",
            "Subscribers removed after a failed delivery"
        ))?;
        let telemd_scrape_count_total = Counter::with_opts(opts!(
            "telemd_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let telemd_uptime_seconds =
            Gauge::with_opts(opts!("telemd_uptime_seconds", "Collector uptime in seconds"))?;
        let telemd_last_sample_timestamp_seconds = Gauge::with_opts(opts!(
            "telemd_last_sample_timestamp_seconds",
            "Unix time of the latest successful sample"
        ))?;

        register(&registry, &telemd_cpu_usage_percent)?;
        register(&registry, &telemd_memory_usage_percent)?;
        register(&registry, &telemd_swap_usage_percent)?;
        register(&registry, &telemd_rollup_cpu_usage_percent)?;
        register(&registry, &telemd_samples_total)?;
        register(&registry, &telemd_rollups_total)?;
        register(&registry, &telemd_collect_errors_total)?;
        register(&registry, &telemd_sink_write_errors_total)?;
        register(&registry, &telemd_alerts_total)?;
        register(&registry, &telemd_subscribers)?;
        register(&registry, &telemd_broadcast_dropped_total)?;
        register(&registry, &telemd_subscribers_removed_total)?;
        register(&registry, &telemd_scrape_count_total)?;
        register(&registry, &telemd_uptime_seconds)?;
        register(&registry, &telemd_last_sample_timestamp_seconds)?;

        Ok(Arc::new(Self {
            registry,
            started_at_unix: now_unix(),
            telemd_cpu_usage_percent,
            telemd_memory_usage_percent,
            telemd_swap_usage_percent,
            telemd_rollup_cpu_usage_percent,
            telemd_samples_total,
            telemd_rollups_total,
            telemd_collect_errors_total,
            telemd_sink_write_errors_total,
            telemd_alerts_total,
            telemd_subscribers,
            telemd_broadcast_dropped_total,
            telemd_subscribers_removed_total,
            telemd_scrape_count_total,
            telemd_uptime_seconds,
            telemd_last_sample_timestamp_seconds,
        }))
    }

    pub fn observe_sample(&self, sample: &Sample) {
        self.telemd_samples_total.inc();
        self.telemd_cpu_usage_percent.set(sample.cpu_percent);
        self.telemd_memory_usage_percent.set(sample.memory_percent);
        self.telemd_swap_usage_percent.set(sample.swap_percent);
        self.telemd_last_sample_timestamp_seconds
            .set(sample.timestamp.wall.timestamp() as f64);
    }

    pub fn observe_rollup(&self, rollup: &Rollup) {
        self.telemd_rollups_total.inc();
        self.telemd_rollup_cpu_usage_percent
            .set(rollup.avg_cpu_percent);
    }

    pub fn observe_publish(&self, report: &PublishReport, subscribers: usize) {
        self.telemd_broadcast_dropped_total
            .inc_by(report.dropped as f64);
        self.telemd_subscribers_removed_total
            .inc_by(report.removed as f64);
        self.telemd_subscribers.set(subscribers as f64);
    }

    pub fn set_subscribers(&self, subscribers: usize) {
        self.telemd_subscribers.set(subscribers as f64);
    }

    pub fn inc_collect_error(&self, stage: &str) {
        self.telemd_collect_errors_total
            .with_label_values(&[stage])
            .inc();
    }

    pub fn inc_sink_error(&self, sink: &str) {
        self.telemd_sink_write_errors_total
            .with_label_values(&[sink])
            .inc();
    }

    pub fn sink_error_count(&self, sink: &str) -> u64 {
        self.telemd_sink_write_errors_total
            .with_label_values(&[sink])
            .get() as u64
    }

    pub fn inc_alert(&self, kind: &str) {
        self.telemd_alerts_total.with_label_values(&[kind]).inc();
    }

    pub fn inc_scrape_count(&self) {
        self.telemd_scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        self.telemd_uptime_seconds
            .set(now_unix().saturating_sub(self.started_at_unix) as f64);
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::sample_with_cpu;

    #[test]
    fn encoded_metrics_include_collector_series() {
        let metrics = Metrics::new().unwrap();
        metrics.observe_sample(&sample_with_cpu(37.5));
        metrics.inc_sink_error("csv");
        metrics.inc_alert("high_cpu");

        let text = String::from_utf8(metrics.encode_metrics().unwrap()).unwrap();
        assert!(text.contains("telemd_cpu_usage_percent 37.5"));
        assert!(text.contains("telemd_samples_total 1"));
        assert!(text.contains("telemd_sink_write_errors_total{sink=\"csv\"} 1"));
        assert!(text.contains("telemd_alerts_total{kind=\"high_cpu\"} 1"));
        assert!(text.contains("telemd_uptime_seconds"));
    }
}
