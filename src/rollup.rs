use crate::model::{LoadAvg, ProcessAverage, Rollup, Sample, Timestamp};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct ProcessTotals {
    name: String,
    cpu_total: f64,
    memory_total: f64,
    count: u32,
}

/// Accumulates samples for one reporting window.
///
/// The window opens when the accumulator is created or flushed; `is_due`
/// measures elapsed monotonic time from that point so sampling jitter never
/// stretches or shrinks a report.
#[derive(Debug)]
pub struct RollupWindow {
    opened_at: Instant,
    first: Option<Timestamp>,
    last: Option<Timestamp>,
    sample_count: usize,
    cpu_sum: f64,
    memory_sum: f64,
    swap_sum: f64,
    cpu_peak: f64,
    load_avg: Option<LoadAvg>,
    frequency_mhz: Option<f64>,
    temperature_c: Option<f64>,
    processes: HashMap<u32, ProcessTotals>,
}

impl RollupWindow {
    pub fn new() -> Self {
        Self::opened_at(Instant::now())
    }

    fn opened_at(opened_at: Instant) -> Self {
        Self {
            opened_at,
            first: None,
            last: None,
            sample_count: 0,
            cpu_sum: 0.0,
            memory_sum: 0.0,
            swap_sum: 0.0,
            cpu_peak: f64::MIN,
            load_avg: None,
            frequency_mhz: None,
            temperature_c: None,
            processes: HashMap::new(),
        }
    }

    pub fn add(&mut self, sample: &Sample) {
        if self.first.is_none() {
            self.first = Some(sample.timestamp);
        }
        self.last = Some(sample.timestamp);
        self.sample_count += 1;
        self.cpu_sum += sample.cpu_percent;
        self.memory_sum += sample.memory_percent;
        self.swap_sum += sample.swap_percent;
        self.cpu_peak = self.cpu_peak.max(sample.cpu_percent);

        // Latest known value wins; a sensor dropping out mid-window keeps the last reading.
        self.load_avg = sample.load_avg.or(self.load_avg);
        self.frequency_mhz = sample.frequency_mhz.or(self.frequency_mhz);
        self.temperature_c = sample.temperature_c.or(self.temperature_c);

        for p in &sample.top_processes {
            let totals = self.processes.entry(p.pid).or_default();
            totals.name.clone_from(&p.name);
            totals.cpu_total += p.cpu_percent;
            totals.memory_total += p.memory_percent;
            totals.count += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.sample_count
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    pub fn is_due(&self, now: Instant, report_interval: Duration) -> bool {
        now.saturating_duration_since(self.opened_at) >= report_interval
    }

    /// Emits the window's rollup and opens a new window. Returns `None` when
    /// no sample was added.
    pub fn flush(&mut self) -> Option<Rollup> {
        let window = std::mem::replace(self, Self::opened_at(Instant::now()));
        let (Some(first), Some(last)) = (window.first, window.last) else {
            return None;
        };

        let k = window.sample_count as f64;
        let process_averages = window
            .processes
            .into_iter()
            .map(|(pid, totals)| {
                let count = totals.count.max(1) as f64;
                (
                    pid,
                    ProcessAverage {
                        name: totals.name,
                        avg_cpu_percent: totals.cpu_total / count,
                        avg_memory_percent: totals.memory_total / count,
                        count: totals.count,
                    },
                )
            })
            .collect();

        Some(Rollup {
            window_start: first,
            window_end: last,
            sample_count: window.sample_count,
            avg_cpu_percent: window.cpu_sum / k,
            avg_memory_percent: window.memory_sum / k,
            avg_swap_percent: window.swap_sum / k,
            peak_cpu_percent: window.cpu_peak,
            load_avg: window.load_avg,
            frequency_mhz: window.frequency_mhz,
            temperature_c: window.temperature_c,
            process_averages,
        })
    }
}

impl Default for RollupWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::{process, sample_with_cpu};

    #[test]
    fn averages_three_samples() {
        let mut window = RollupWindow::new();
        for cpu in [10.0, 20.0, 30.0] {
            window.add(&sample_with_cpu(cpu));
        }
        let rollup = window.flush().expect("rollup");
        assert_eq!(rollup.sample_count, 3);
        assert!((rollup.avg_cpu_percent - 20.0).abs() < 1e-9);
        assert!((rollup.avg_memory_percent - 40.0).abs() < 1e-9);
        assert_eq!(rollup.peak_cpu_percent, 30.0);
    }

    #[test]
    fn mean_matches_for_arbitrary_sequences() {
        let values: Vec<f64> = (0..97).map(|i| ((i * 37) % 101) as f64 * 0.73).collect();
        let mut window = RollupWindow::new();
        for v in &values {
            window.add(&sample_with_cpu(*v));
        }
        let rollup = window.flush().unwrap();
        let expected = values.iter().sum::<f64>() / values.len() as f64;
        assert_eq!(rollup.sample_count, values.len());
        assert!((rollup.avg_cpu_percent - expected).abs() < 1e-9);
    }

    #[test]
    fn empty_flush_returns_none() {
        let mut window = RollupWindow::new();
        assert!(window.flush().is_none());
        assert!(window.is_empty());
    }

    #[test]
    fn flush_resets_accumulator() {
        let mut window = RollupWindow::new();
        window.add(&sample_with_cpu(50.0));
        assert!(window.flush().is_some());
        window.add(&sample_with_cpu(10.0));
        let rollup = window.flush().unwrap();
        assert_eq!(rollup.sample_count, 1);
        assert_eq!(rollup.avg_cpu_percent, 10.0);
    }

    #[test]
    fn process_average_uses_own_observation_count() {
        let mut window = RollupWindow::new();
        let mut s1 = sample_with_cpu(10.0);
        s1.top_processes = vec![process(7, "nginx", 20.0, 2.0), process(8, "redis", 4.0, 1.0)];
        let mut s2 = sample_with_cpu(10.0);
        s2.top_processes = vec![process(7, "nginx", 40.0, 4.0)];
        let s3 = sample_with_cpu(10.0);
        window.add(&s1);
        window.add(&s2);
        window.add(&s3);

        let rollup = window.flush().unwrap();
        assert_eq!(rollup.sample_count, 3);
        let nginx = &rollup.process_averages[&7];
        assert_eq!(nginx.count, 2);
        assert!((nginx.avg_cpu_percent - 30.0).abs() < 1e-9);
        assert!((nginx.avg_memory_percent - 3.0).abs() < 1e-9);
        let redis = &rollup.process_averages[&8];
        assert_eq!(redis.count, 1);
        assert_eq!(redis.avg_cpu_percent, 4.0);
    }

    #[test]
    fn latest_optional_readings_survive_gaps() {
        let mut window = RollupWindow::new();
        let mut s1 = sample_with_cpu(1.0);
        s1.temperature_c = Some(55.0);
        let s2 = sample_with_cpu(1.0);
        window.add(&s1);
        window.add(&s2);
        let rollup = window.flush().unwrap();
        assert_eq!(rollup.temperature_c, Some(55.0));
        assert_eq!(rollup.frequency_mhz, None);
    }

    #[tokio::test(start_paused = true)]
    async fn due_after_report_interval_elapses() {
        let window = RollupWindow::new();
        let interval = Duration::from_secs(60);
        assert!(!window.is_due(Instant::now(), interval));
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!window.is_due(Instant::now(), interval));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(window.is_due(Instant::now(), interval));
    }
}
