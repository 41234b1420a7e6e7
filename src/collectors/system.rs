use crate::collectors::{CpuTopology, MetricsProvider, ProviderError, SystemReading};
use crate::model::{LoadAvg, MemoryStats, ProcessUsage};
#[cfg(target_os = "linux")]
use std::fs;
use sysinfo::{ComponentExt, CpuExt, PidExt, ProcessExt, System, SystemExt};
use tracing::debug;

const CPU_SENSOR_MARKERS: [&str; 6] = ["coretemp", "package", "tctl", "tdie", "k10temp", "cpu"];

/// `sysinfo`-backed provider. CPU figures are deltas between consecutive
/// refreshes, so the first reading after construction may be 0.
pub struct SysinfoProvider {
    system: System,
}

impl SysinfoProvider {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        system.refresh_processes();
        system.refresh_components_list();
        Self { system }
    }
}

impl Default for SysinfoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsProvider for SysinfoProvider {
    fn read_system(&mut self) -> Result<SystemReading, ProviderError> {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        self.system.refresh_components();

        if self.system.cpus().is_empty() {
            return Err(ProviderError::Unavailable("no CPUs reported".to_string()));
        }
        let total_memory = self.system.total_memory();
        if total_memory == 0 {
            return Err(ProviderError::Unavailable(
                "total memory reported as 0".to_string(),
            ));
        }

        let cpu_percent = self.system.global_cpu_info().cpu_usage() as f64;
        let memory = MemoryStats {
            total_bytes: total_memory,
            used_bytes: self.system.used_memory(),
            available_bytes: self.system.available_memory(),
            free_bytes: self.system.free_memory(),
            swap_total_bytes: self.system.total_swap(),
            swap_used_bytes: self.system.used_swap(),
        };
        let memory_percent = percent(memory.used_bytes, total_memory);
        let swap_percent = percent(memory.swap_used_bytes, memory.swap_total_bytes);
        let frequency_mhz = self
            .system
            .cpus()
            .first()
            .map(|c| c.frequency())
            .filter(|mhz| *mhz > 0)
            .map(|mhz| mhz as f64);

        let sensors: Vec<(String, f64)> = self
            .system
            .components()
            .iter()
            .map(|c| (c.label().to_string(), c.temperature() as f64))
            .collect();
        let temperature_c =
            cpu_temperature(&sensors).or_else(|| cpu_temperature(&collect_thermal_zones()));

        Ok(SystemReading {
            cpu_percent,
            memory_percent,
            swap_percent,
            memory,
            load_avg: load_average(&self.system),
            frequency_mhz,
            temperature_c,
        })
    }

    fn read_processes(&mut self) -> Result<Vec<ProcessUsage>, ProviderError> {
        self.system.refresh_processes();
        let total_memory = self.system.total_memory();

        let processes: Vec<ProcessUsage> = self
            .system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessUsage {
                pid: pid.as_u32(),
                name: process.name().to_string(),
                cpu_percent: process.cpu_usage() as f64,
                memory_percent: percent(process.memory(), total_memory),
            })
            .collect();
        debug!(process_count = processes.len(), "process table read");
        Ok(processes)
    }

    fn cpu_topology(&self) -> CpuTopology {
        CpuTopology {
            physical_cores: self.system.physical_core_count(),
            logical_cores: self.system.cpus().len(),
        }
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (used as f64 / total as f64) * 100.0
    }
}

#[cfg(unix)]
fn load_average(system: &System) -> Option<LoadAvg> {
    let load = system.load_average();
    Some(LoadAvg {
        one: load.one,
        five: load.five,
        fifteen: load.fifteen,
    })
}

#[cfg(not(unix))]
fn load_average(_system: &System) -> Option<LoadAvg> {
    None
}

/// Hottest plausible CPU sensor among `(label, celsius)` pairs.
fn cpu_temperature(sensors: &[(String, f64)]) -> Option<f64> {
    sensors
        .iter()
        .filter(|(_, celsius)| (0.0..=130.0).contains(celsius) && *celsius > 0.0)
        .filter(|(label, _)| {
            let s = label.to_lowercase();
            CPU_SENSOR_MARKERS.iter().any(|m| s.contains(m))
                && !s.contains("gpu")
                && !s.contains("nvidia")
                && !s.contains("amdgpu")
        })
        .map(|(_, celsius)| *celsius)
        .max_by(|a, b| a.total_cmp(b))
}

#[cfg(target_os = "linux")]
fn collect_thermal_zones() -> Vec<(String, f64)> {
    let Ok(entries) = fs::read_dir("/sys/class/thermal") else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|v| v.to_str()) else {
            continue;
        };
        if !name.starts_with("thermal_zone") {
            continue;
        }

        let Ok(temp_raw) = fs::read_to_string(path.join("temp")) else {
            continue;
        };
        let Ok(v) = temp_raw.trim().parse::<f64>() else {
            continue;
        };
        let typ = fs::read_to_string(path.join("type"))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| name.to_string());
        let celsius = if v > 1000.0 { v / 1000.0 } else { v };
        out.push((typ, celsius));
    }

    out
}

#[cfg(not(target_os = "linux"))]
fn collect_thermal_zones() -> Vec<(String, f64)> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensors(items: &[(&str, f64)]) -> Vec<(String, f64)> {
        items.iter().map(|(l, t)| (l.to_string(), *t)).collect()
    }

    #[test]
    fn cpu_temperature_prefers_cpu_sensors_over_gpu() {
        let list = sensors(&[
            ("coretemp Package id 0", 61.0),
            ("nvidia gpu", 88.0),
            ("coretemp Core 1", 64.0),
        ]);
        assert_eq!(cpu_temperature(&list), Some(64.0));
    }

    #[test]
    fn cpu_temperature_is_absent_without_matching_sensor() {
        let list = sensors(&[("acpitz", 40.0), ("nvme Composite", 35.0)]);
        assert_eq!(cpu_temperature(&list), None);
        assert_eq!(cpu_temperature(&[]), None);
    }

    #[test]
    fn cpu_temperature_ignores_implausible_values() {
        let list = sensors(&[("k10temp Tctl", 0.0), ("k10temp Tdie", 250.0)]);
        assert_eq!(cpu_temperature(&list), None);
    }

    #[test]
    fn percent_handles_zero_total() {
        assert_eq!(percent(10, 0), 0.0);
        assert!((percent(1, 4) - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn provider_reads_live_host() {
        let mut provider = SysinfoProvider::new();
        let reading = provider.read_system().expect("host metrics readable");
        assert!(reading.memory_percent > 0.0);
        assert!(reading.memory.total_bytes >= reading.memory.used_bytes);
        assert!(provider.cpu_topology().logical_cores >= 1);
        let processes = provider.read_processes().expect("process table readable");
        assert!(!processes.is_empty());
    }
}
