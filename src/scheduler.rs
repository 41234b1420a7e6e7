use crate::alerts::AlertEvaluator;
use crate::broadcast::Broadcaster;
use crate::collectors::MetricsProvider;
use crate::config::Config;
use crate::metrics::Metrics;
use crate::model::{JsonRecord, Sample};
use crate::rollup::RollupWindow;
use crate::sampler::Sampler;
use crate::sinks::{Record, SinkManager};
use chrono::{Local, NaiveDate};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Drives sampling, reporting and day rollover from a single loop.
///
/// Only the scheduler touches the rollup window and issues sink commands, so
/// neither needs locking. Sinks and subscribers receive shared immutable data
/// and never hold up the next tick.
pub struct Scheduler<P> {
    sampler: Sampler<P>,
    window: RollupWindow,
    alerts: AlertEvaluator,
    sinks: SinkManager,
    broadcaster: Arc<Broadcaster>,
    metrics: Arc<Metrics>,
    sample_interval: Duration,
    report_interval: Duration,
    shutdown_grace: Duration,
    persist_samples: bool,
    current_date: NaiveDate,
}

impl<P: MetricsProvider> Scheduler<P> {
    pub fn new(
        cfg: &Config,
        sampler: Sampler<P>,
        sinks: SinkManager,
        broadcaster: Arc<Broadcaster>,
        metrics: Arc<Metrics>,
        start_date: NaiveDate,
    ) -> Self {
        Self {
            sampler,
            window: RollupWindow::new(),
            alerts: AlertEvaluator::new(cfg.alerts),
            sinks,
            broadcaster,
            metrics,
            sample_interval: cfg.sample_interval,
            report_interval: cfg.report_interval,
            shutdown_grace: cfg.shutdown_grace,
            persist_samples: cfg.persist_samples,
            current_date: start_date,
        }
    }

    /// Runs until `cancel` fires, then flushes the open window and closes the sinks.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let cpus = self.sampler.cpu_topology();
        info!(
            physical_cores = ?cpus.physical_cores,
            logical_cores = cpus.logical_cores,
            "cpu topology"
        );
        info!(
            sample_interval = ?self.sample_interval,
            report_interval = ?self.report_interval,
            sinks = self.sinks.len(),
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(pending_samples = self.window.len(), "shutdown requested, stopping sampling loop");
                    break;
                }
                _ = ticker.tick() => self.cycle().await,
            }
        }

        self.finish().await;
    }

    async fn cycle(&mut self) {
        match self.sampler.sample().await {
            Ok(sample) => self.on_sample(sample),
            Err(err) => {
                self.metrics.inc_collect_error(err.stage());
                warn!(error = %err, "sample failed, skipping cycle");
            }
        }

        if self.window.is_due(Instant::now(), self.report_interval) {
            self.report();
        }
    }

    fn on_sample(&mut self, sample: Sample) {
        self.metrics.observe_sample(&sample);
        debug!(
            cpu_percent = sample.cpu_percent,
            memory_used_bytes = sample.memory.used_bytes,
            memory_available_bytes = sample.memory.available_bytes,
            swap_used_bytes = sample.memory.swap_used_bytes,
            "sample taken"
        );
        self.window.add(&sample);
        let sample = Arc::new(sample);

        for alert in self.alerts.evaluate(&sample) {
            warn!(
                kind = %alert.kind,
                value = alert.value,
                threshold = alert.threshold,
                "threshold exceeded"
            );
            self.metrics.inc_alert(alert.kind.as_str());
            self.sinks.write(Record::Alert(alert));
        }

        if !self.broadcaster.is_empty() {
            self.publish(&JsonRecord::from(sample.as_ref()));
        }

        if self.persist_samples {
            self.roll_to(sample.timestamp.date());
            self.sinks.write(Record::Sample(sample));
        }
    }

    fn report(&mut self) {
        if self.window.is_empty() {
            debug!("report window closed without samples");
        }
        let Some(rollup) = self.window.flush() else {
            self.roll_to(Local::now().date_naive());
            return;
        };

        info!(
            samples = rollup.sample_count,
            avg_cpu_percent = rollup.avg_cpu_percent,
            avg_memory_percent = rollup.avg_memory_percent,
            "report window closed"
        );
        self.metrics.observe_rollup(&rollup);
        self.roll_to(rollup.window_end.date());
        let rollup = Arc::new(rollup);
        self.sinks.write(Record::Rollup(rollup.clone()));
        if !self.broadcaster.is_empty() {
            self.publish(&JsonRecord::from(rollup.as_ref()));
        }
    }

    fn publish(&self, record: &JsonRecord) {
        match serde_json::to_string(record) {
            Ok(text) => {
                let report = self.broadcaster.publish(Arc::from(text));
                self.metrics
                    .observe_publish(&report, self.broadcaster.len());
                if report.dropped > 0 {
                    debug!(dropped = report.dropped, "subscribers lagging");
                }
            }
            Err(err) => error!(error = %err, "failed to encode record for subscribers"),
        }
    }

    fn roll_to(&mut self, date: NaiveDate) {
        if date == self.current_date {
            return;
        }
        info!(from = %self.current_date, to = %date, "day changed, rotating sinks");
        self.sinks.rotate(date);
        self.current_date = date;
    }

    async fn finish(mut self) {
        if let Some(rollup) = self.window.flush() {
            info!(samples = rollup.sample_count, "flushing final report window");
            self.metrics.observe_rollup(&rollup);
            self.roll_to(rollup.window_end.date());
            self.sinks.write(Record::Rollup(Arc::new(rollup)));
        }
        self.sinks.shutdown(self.shutdown_grace).await;
        info!("scheduler stopped");
    }
}
