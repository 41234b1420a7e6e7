use crate::model::{Alert, LoadAvg, MemoryStats, Rollup, Sample, Timestamp};
use crate::sinks::daily::DailyFile;
use crate::sinks::{Record, Sink, SinkError};
use chrono::NaiveDate;
use std::io::Write;
use std::path::PathBuf;

const RULE: &str = "==================================================";

/// Human-readable daily log: `<prefix>_<YYYYMMDD>.log`.
pub struct LogFileSink {
    file: DailyFile,
    top_n: usize,
}

impl LogFileSink {
    pub fn new(dir: impl Into<PathBuf>, prefix: &str, date: NaiveDate, top_n: usize) -> Self {
        Self {
            file: DailyFile::new(dir, prefix, "log", date),
            top_n,
        }
    }
}

impl Sink for LogFileSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn write(&mut self, record: &Record) -> Result<(), SinkError> {
        let text = match record {
            Record::Sample(sample) => format_sample(sample),
            Record::Rollup(rollup) => format_rollup(rollup, self.top_n),
            Record::Alert(alert) => format_alert(alert),
        };
        let path = self.file.path().to_path_buf();
        let (writer, _) = self.file.open()?;
        writer
            .write_all(text.as_bytes())
            .map_err(|source| SinkError::io(&path, source))?;
        self.file.flush()
    }

    fn rotate(&mut self, date: NaiveDate) -> Result<(), SinkError> {
        self.file.rotate(date).map(|_| ())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.file.close()
    }
}

fn stamp(ts: &Timestamp) -> String {
    ts.wall.format("%Y-%m-%d %H:%M:%S,%3f").to_string()
}

fn load_text(load: Option<LoadAvg>) -> String {
    match load {
        Some(l) => format!("({:.2}, {:.2}, {:.2})", l.one, l.five, l.fifteen),
        None => "n/a".to_string(),
    }
}

fn gib(bytes: u64) -> f64 {
    bytes as f64 / (1u64 << 30) as f64
}

fn memory_text(m: &MemoryStats) -> Option<String> {
    if m.total_bytes == 0 {
        return None;
    }
    Some(format!(
        "Memory Total: {:.2} GB, Used: {:.2} GB, Available: {:.2} GB, Free: {:.2} GB, Swap Used: {:.2} GB of {:.2} GB",
        gib(m.total_bytes),
        gib(m.used_bytes),
        gib(m.available_bytes),
        gib(m.free_bytes),
        gib(m.swap_used_bytes),
        gib(m.swap_total_bytes),
    ))
}

fn format_sample(sample: &Sample) -> String {
    let mut parts = vec![format!(
        "{} - CPU: {:.1}%, Memory: {:.1}%, Swap: {:.1}%, Load Average: {}",
        stamp(&sample.timestamp),
        sample.cpu_percent,
        sample.memory_percent,
        sample.swap_percent,
        load_text(sample.load_avg),
    )];
    if let Some(t) = sample.temperature_c {
        parts.push(format!("Temperature: {t:.1}°C"));
    }
    parts.extend(memory_text(&sample.memory));

    let mut line = parts.join(", ");
    for p in &sample.top_processes {
        line.push_str(&format!(
            " | {} (pid {}) cpu {:.1}% mem {:.1}%",
            p.name, p.pid, p.cpu_percent, p.memory_percent
        ));
    }
    line.push('\n');
    line
}

fn format_rollup(rollup: &Rollup, top_n: usize) -> String {
    let ts = stamp(&rollup.window_end);
    let span = (rollup.window_end.wall - rollup.window_start.wall).num_seconds();
    let mut lines = vec![
        RULE.to_string(),
        format!(
            "Last {span} seconds summary ({} samples):",
            rollup.sample_count
        ),
        format!(
            "Average CPU Usage: {:.1}% (peak {:.1}%)",
            rollup.avg_cpu_percent, rollup.peak_cpu_percent
        ),
        format!(
            "Average Memory Usage: {:.1}%, Average Swap Usage: {:.1}%",
            rollup.avg_memory_percent, rollup.avg_swap_percent
        ),
        format!("Load Average: {}", load_text(rollup.load_avg)),
        "Top CPU-Consuming Processes (Average):".to_string(),
    ];
    for (pid, avg) in rollup.top_processes(top_n) {
        lines.push(format!(
            "Process: {} (pid {pid}), Average CPU Usage: {:.1}%, Average Memory Usage: {:.1}% over {} samples",
            avg.name, avg.avg_cpu_percent, avg.avg_memory_percent, avg.count
        ));
    }
    lines.push(RULE.to_string());

    lines
        .iter()
        .map(|line| format!("{ts} - {line}\n"))
        .collect()
}

fn format_alert(alert: &Alert) -> String {
    format!(
        "{} - ALERT {}: {:.1} exceeds threshold {:.1}\n",
        stamp(&alert.timestamp),
        alert.kind,
        alert.value,
        alert.threshold
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::{process, sample_with_cpu, timestamp_at};
    use crate::model::AlertKind;
    use crate::rollup::RollupWindow;
    use std::fs;
    use std::sync::Arc;

    #[test]
    fn writes_sample_rollup_and_alert_lines() {
        let dir = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let mut sink = LogFileSink::new(dir.path(), "cpu_usage", date, 5);

        let mut sample = sample_with_cpu(42.0);
        sample.top_processes = vec![process(7, "nginx", 12.0, 3.0)];
        let mut window = RollupWindow::new();
        window.add(&sample);
        let rollup = window.flush().unwrap();

        sink.write(&Record::Sample(Arc::new(sample.clone()))).unwrap();
        sink.write(&Record::Rollup(Arc::new(rollup))).unwrap();
        sink.write(&Record::Alert(Alert {
            kind: AlertKind::HighCpu,
            value: 95.0,
            threshold: 90.0,
            timestamp: sample.timestamp,
        }))
        .unwrap();
        sink.close().unwrap();

        let text = fs::read_to_string(dir.path().join("cpu_usage_20240501.log")).unwrap();
        assert!(text.contains("CPU: 42.0%"));
        assert!(text.contains("Average CPU Usage: 42.0%"));
        assert!(text.contains("Process: nginx (pid 7)"));
        assert!(text.contains("ALERT high_cpu: 95.0 exceeds threshold 90.0"));
        assert!(text.contains("Load Average: n/a"));
        assert!(!text.contains("Memory Total:"), "no absolute figures without a total");
        assert!(text
            .lines()
            .filter(|l| l.ends_with(RULE))
            .all(|l| l.contains(" - ")));
    }

    #[test]
    fn sample_line_carries_absolute_memory_figures() {
        let mut sample = sample_with_cpu(10.0);
        sample.memory = MemoryStats {
            total_bytes: 16 << 30,
            used_bytes: 6 << 30,
            available_bytes: 10 << 30,
            free_bytes: 3 << 30,
            swap_total_bytes: 4 << 30,
            swap_used_bytes: 1 << 29,
        };
        sample.temperature_c = Some(55.0);

        let line = format_sample(&sample);
        assert!(line.contains("Temperature: 55.0°C"), "{line}");
        assert!(
            line.contains(
                "Memory Total: 16.00 GB, Used: 6.00 GB, Available: 10.00 GB, Free: 3.00 GB, Swap Used: 0.50 GB of 4.00 GB"
            ),
            "{line}"
        );
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn rotation_splits_days_without_losing_lines() {
        let dir = tempfile::tempdir().unwrap();
        let day1 = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let mut sink = LogFileSink::new(dir.path(), "m", day1, 5);

        let mut before = sample_with_cpu(11.0);
        before.timestamp = timestamp_at(2024, 5, 1, 23, 59);
        let mut after = sample_with_cpu(22.0);
        after.timestamp = timestamp_at(2024, 5, 2, 0, 0);

        sink.write(&Record::Sample(Arc::new(before))).unwrap();
        sink.rotate(day2).unwrap();
        sink.write(&Record::Sample(Arc::new(after))).unwrap();
        sink.close().unwrap();

        let first = fs::read_to_string(dir.path().join("m_20240501.log")).unwrap();
        let second = fs::read_to_string(dir.path().join("m_20240502.log")).unwrap();
        assert!(first.contains("CPU: 11.0%") && !first.contains("CPU: 22.0%"));
        assert!(second.contains("CPU: 22.0%") && !second.contains("CPU: 11.0%"));
    }
}
