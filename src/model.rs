use chrono::{DateTime, Local, NaiveDate, SecondsFormat};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tokio::time::Instant;

/// Wall-clock time for files and records, monotonic time for interval math.
#[derive(Debug, Clone, Copy)]
pub struct Timestamp {
    pub wall: DateTime<Local>,
    pub monotonic: Instant,
}

impl Timestamp {
    pub fn now() -> Self {
        Self {
            wall: Local::now(),
            monotonic: Instant::now(),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.wall.date_naive()
    }

    pub fn iso8601(&self) -> String {
        self.wall.to_rfc3339_opts(SecondsFormat::Millis, false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoadAvg {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// Absolute memory and swap figures in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MemoryStats {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub free_bytes: u64,
    pub swap_total_bytes: u64,
    pub swap_used_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessUsage {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

#[derive(Debug, Clone)]
pub struct Sample {
    pub timestamp: Timestamp,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub swap_percent: f64,
    pub memory: MemoryStats,
    pub load_avg: Option<LoadAvg>,
    pub frequency_mhz: Option<f64>,
    pub temperature_c: Option<f64>,
    pub top_processes: Vec<ProcessUsage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessAverage {
    pub name: String,
    pub avg_cpu_percent: f64,
    pub avg_memory_percent: f64,
    /// Samples of the window in which this pid was ranked.
    pub count: u32,
}

#[derive(Debug, Clone)]
pub struct Rollup {
    pub window_start: Timestamp,
    pub window_end: Timestamp,
    pub sample_count: usize,
    pub avg_cpu_percent: f64,
    pub avg_memory_percent: f64,
    pub avg_swap_percent: f64,
    pub peak_cpu_percent: f64,
    pub load_avg: Option<LoadAvg>,
    pub frequency_mhz: Option<f64>,
    pub temperature_c: Option<f64>,
    pub process_averages: HashMap<u32, ProcessAverage>,
}

impl Rollup {
    /// Process averages ordered by average CPU, highest first.
    pub fn top_processes(&self, limit: usize) -> Vec<(u32, &ProcessAverage)> {
        let mut out: Vec<(u32, &ProcessAverage)> = self
            .process_averages
            .iter()
            .map(|(pid, avg)| (*pid, avg))
            .collect();
        out.sort_by(|a, b| {
            b.1.avg_cpu_percent
                .total_cmp(&a.1.avg_cpu_percent)
                .then(a.0.cmp(&b.0))
        });
        out.truncate(limit);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    HighCpu,
    HighMemory,
    HighSwap,
    HighTemperature,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::HighCpu => "high_cpu",
            AlertKind::HighMemory => "high_memory",
            AlertKind::HighSwap => "high_swap",
            AlertKind::HighTemperature => "high_temperature",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub kind: AlertKind,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: Timestamp,
}

/// Line format shared by the JSON-lines sink, the history store and subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRecord {
    pub kind: &'static str,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_count: Option<usize>,
    pub cpu: f64,
    pub memory: f64,
    pub swap_memory: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_avg: Option<LoadAvg>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_mhz: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<f64>,
    pub processes: Vec<ProcessUsage>,
}

impl From<&Sample> for JsonRecord {
    fn from(value: &Sample) -> Self {
        Self {
            kind: "sample",
            timestamp: value.timestamp.iso8601(),
            window_start: None,
            sample_count: None,
            cpu: value.cpu_percent,
            memory: value.memory_percent,
            swap_memory: value.swap_percent,
            load_avg: value.load_avg,
            frequency_mhz: value.frequency_mhz,
            temperature_c: value.temperature_c,
            processes: value.top_processes.clone(),
        }
    }
}

impl From<&Rollup> for JsonRecord {
    fn from(value: &Rollup) -> Self {
        let processes = value
            .top_processes(usize::MAX)
            .into_iter()
            .map(|(pid, avg)| ProcessUsage {
                pid,
                name: avg.name.clone(),
                cpu_percent: avg.avg_cpu_percent,
                memory_percent: avg.avg_memory_percent,
            })
            .collect();
        Self {
            kind: "rollup",
            timestamp: value.window_end.iso8601(),
            window_start: Some(value.window_start.iso8601()),
            sample_count: Some(value.sample_count),
            cpu: value.avg_cpu_percent,
            memory: value.avg_memory_percent,
            swap_memory: value.avg_swap_percent,
            load_avg: value.load_avg,
            frequency_mhz: value.frequency_mhz,
            temperature_c: value.temperature_c,
            processes,
        }
    }
}
