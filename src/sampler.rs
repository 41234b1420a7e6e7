use crate::collectors::{CpuTopology, MetricsProvider, ProviderError};
use crate::model::{Sample, Timestamp};
use crate::ranker::ProcessRanker;
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;
use tracing::debug;

/// Turns provider readings into ranked [`Sample`]s within a fixed time budget.
///
/// The provider runs on the blocking pool. If it overruns the budget the call
/// returns [`ProviderError::Timeout`] and the read finishes in the background;
/// until it does, further calls fail fast with [`ProviderError::Busy`].
pub struct Sampler<P> {
    provider: Arc<Mutex<P>>,
    ranker: ProcessRanker,
    timeout: Duration,
}

impl<P: MetricsProvider> Sampler<P> {
    pub fn new(provider: P, ranker: ProcessRanker, timeout: Duration) -> Self {
        Self {
            provider: Arc::new(Mutex::new(provider)),
            ranker,
            timeout,
        }
    }

    pub fn cpu_topology(&self) -> CpuTopology {
        match self.provider.try_lock() {
            Ok(guard) => guard.cpu_topology(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().cpu_topology(),
            Err(TryLockError::WouldBlock) => CpuTopology::default(),
        }
    }

    pub async fn sample(&self) -> Result<Sample, ProviderError> {
        let timestamp = Timestamp::now();
        let provider = Arc::clone(&self.provider);
        let read = tokio::task::spawn_blocking(move || {
            let mut guard = match provider.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) => return Err(ProviderError::Busy),
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            };
            let system = guard.read_system()?;
            let processes = guard.read_processes()?;
            Ok((system, processes))
        });

        let (system, processes) = match tokio::time::timeout(self.timeout, read).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join_err)) => {
                return Err(ProviderError::Unavailable(format!(
                    "provider task failed: {join_err}"
                )))
            }
            Err(_elapsed) => return Err(ProviderError::Timeout(self.timeout)),
        };

        let raw_count = processes.len();
        let top_processes = self.ranker.rank(processes);
        debug!(
            cpu_percent = system.cpu_percent,
            processes = raw_count,
            ranked = top_processes.len(),
            "sample collected"
        );

        Ok(Sample {
            timestamp,
            cpu_percent: system.cpu_percent,
            memory_percent: system.memory_percent,
            swap_percent: system.swap_percent,
            memory: system.memory,
            load_avg: system.load_avg,
            frequency_mhz: system.frequency_mhz,
            temperature_c: system.temperature_c,
            top_processes,
        })
    }
}
