pub mod system;

use crate::model::{LoadAvg, MemoryStats, ProcessUsage};
use thiserror::Error;

/// Instantaneous system-wide reading; optional fields stay `None` when the
/// platform or sensor cannot provide them.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemReading {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub swap_percent: f64,
    pub memory: MemoryStats,
    pub load_avg: Option<LoadAvg>,
    pub frequency_mhz: Option<f64>,
    pub temperature_c: Option<f64>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("metrics source unavailable: {0}")]
    Unavailable(String),
    #[error("metrics read exceeded {0:?}")]
    Timeout(std::time::Duration),
    #[error("previous metrics read still in flight")]
    Busy,
}

impl ProviderError {
    /// Label for the collect-error counter.
    pub fn stage(&self) -> &'static str {
        match self {
            ProviderError::Unavailable(_) => "provider",
            ProviderError::Timeout(_) => "timeout",
            ProviderError::Busy => "busy",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTopology {
    pub physical_cores: Option<usize>,
    pub logical_cores: usize,
}

/// Source of raw host metrics.
///
/// Implementations must compute CPU percentages from the delta against their
/// previous reading instead of sleeping, and must omit processes that vanish
/// or cannot be read rather than failing the whole call.
pub trait MetricsProvider: Send + 'static {
    fn read_system(&mut self) -> Result<SystemReading, ProviderError>;
    fn read_processes(&mut self) -> Result<Vec<ProcessUsage>, ProviderError>;

    fn cpu_topology(&self) -> CpuTopology {
        CpuTopology::default()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays queued CPU readings; an empty queue or a `None` entry fails the read.
    #[derive(Clone, Default)]
    pub struct ScriptedProvider {
        pub cpu: Arc<Mutex<VecDeque<Option<f64>>>>,
        pub processes: Vec<ProcessUsage>,
    }

    impl ScriptedProvider {
        pub fn with_cpu(values: &[Option<f64>]) -> Self {
            Self {
                cpu: Arc::new(Mutex::new(values.iter().copied().collect())),
                processes: Vec::new(),
            }
        }
    }

    impl MetricsProvider for ScriptedProvider {
        fn read_system(&mut self) -> Result<SystemReading, ProviderError> {
            let next = self.cpu.lock().unwrap().pop_front().flatten();
            let cpu_percent =
                next.ok_or_else(|| ProviderError::Unavailable("scripted failure".to_string()))?;
            Ok(SystemReading {
                cpu_percent,
                memory_percent: 50.0,
                swap_percent: 1.0,
                memory: MemoryStats {
                    total_bytes: 16 << 30,
                    used_bytes: 8 << 30,
                    available_bytes: 7 << 30,
                    free_bytes: 4 << 30,
                    swap_total_bytes: 2 << 30,
                    swap_used_bytes: 1 << 20,
                },
                load_avg: None,
                frequency_mhz: Some(2400.0),
                temperature_c: None,
            })
        }

        fn read_processes(&mut self) -> Result<Vec<ProcessUsage>, ProviderError> {
            Ok(self.processes.clone())
        }

        fn cpu_topology(&self) -> CpuTopology {
            CpuTopology {
                physical_cores: Some(4),
                logical_cores: 8,
            }
        }
    }
}
