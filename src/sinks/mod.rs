pub mod csv_file;
pub mod daily;
pub mod history;
pub mod json_lines;
pub mod log_file;

use crate::metrics::Metrics;
use crate::model::{Alert, Rollup, Sample};
use chrono::NaiveDate;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use std::thread;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Unit of data handed to sinks. Each sink persists the variants it cares about.
#[derive(Debug, Clone)]
pub enum Record {
    Sample(Arc<Sample>),
    Rollup(Arc<Rollup>),
    Alert(Alert),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json encoding error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("store error: {0}")]
    Store(String),
    #[error("sink queue is full, record dropped")]
    QueueFull,
    #[error("sink is closed")]
    Closed,
    #[error("failed to start worker for sink {name}: {source}")]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },
}

impl SinkError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        SinkError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// A destination for collected data. Calls happen on a dedicated worker, so
/// implementations may block.
pub trait Sink: Send + 'static {
    fn name(&self) -> &'static str;

    fn write(&mut self, record: &Record) -> Result<(), SinkError>;

    /// Switch day-scoped resources to `date`.
    fn rotate(&mut self, _date: NaiveDate) -> Result<(), SinkError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

enum Command {
    Write(Record),
    Rotate(NaiveDate),
}

struct SinkWorker {
    name: &'static str,
    tx: mpsc::Sender<Command>,
    done: oneshot::Receiver<()>,
}

/// Fans records out to independent sink workers.
///
/// Every sink has its own bounded queue and worker thread. Enqueueing never
/// waits: a sink that is slow or wedged only fills its own queue, and records
/// that do not fit are dropped for that sink and counted as write errors.
/// Workers live outside the tokio blocking pool, so a wedged sink abandoned at
/// shutdown does not hold up runtime teardown.
pub struct SinkManager {
    workers: Vec<SinkWorker>,
    queue_capacity: usize,
    metrics: Arc<Metrics>,
}

impl SinkManager {
    pub fn new(queue_capacity: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            workers: Vec::new(),
            queue_capacity: queue_capacity.max(1),
            metrics,
        }
    }

    /// Starts a worker thread for `sink`.
    pub fn register(&mut self, sink: Box<dyn Sink>) -> Result<(), SinkError> {
        let name = sink.name();
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let (done_tx, done) = oneshot::channel();
        let metrics = self.metrics.clone();
        thread::Builder::new()
            .name(format!("sink-{name}"))
            .spawn(move || {
                run_worker(sink, rx, metrics);
                let _ = done_tx.send(());
            })
            .map_err(|source| SinkError::Spawn { name, source })?;
        info!(sink = name, "sink registered");
        self.workers.push(SinkWorker { name, tx, done });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Queues `record` for every sink. Returns how many sinks accepted it.
    pub fn write(&self, record: Record) -> usize {
        self.dispatch(|| Command::Write(record.clone()))
    }

    /// Queues a day rollover for every sink.
    pub fn rotate(&self, date: NaiveDate) -> usize {
        self.dispatch(|| Command::Rotate(date))
    }

    fn dispatch(&self, mut command: impl FnMut() -> Command) -> usize {
        let mut accepted = 0;
        for worker in &self.workers {
            match worker.tx.try_send(command()) {
                Ok(()) => accepted += 1,
                Err(TrySendError::Full(_)) => {
                    self.metrics.inc_sink_error(worker.name);
                    warn!(sink = worker.name, error = %SinkError::QueueFull, "sink is not keeping up");
                }
                Err(TrySendError::Closed(_)) => {
                    self.metrics.inc_sink_error(worker.name);
                    error!(sink = worker.name, error = %SinkError::Closed, "sink worker is gone");
                }
            }
        }
        accepted
    }

    /// Closes all sinks, waiting at most `grace` for queued writes to finish.
    /// Workers still busy after the deadline are detached and left to finish
    /// on their own.
    pub async fn shutdown(self, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;
        let mut pending = Vec::with_capacity(self.workers.len());
        for worker in self.workers {
            drop(worker.tx);
            pending.push((worker.name, worker.done));
        }

        for (name, done) in pending {
            match tokio::time::timeout_at(deadline, done).await {
                Ok(Ok(())) => debug!(sink = name, "sink closed"),
                Ok(Err(_)) => error!(sink = name, "sink worker panicked"),
                Err(_elapsed) => {
                    warn!(sink = name, grace = ?grace, "sink did not drain in time, abandoning")
                }
            }
        }
    }
}

fn run_worker(mut sink: Box<dyn Sink>, mut rx: mpsc::Receiver<Command>, metrics: Arc<Metrics>) {
    let name = sink.name();
    while let Some(command) = rx.blocking_recv() {
        let result = match command {
            Command::Write(record) => sink.write(&record),
            Command::Rotate(date) => sink.rotate(date),
        };
        if let Err(err) = result {
            metrics.inc_sink_error(name);
            error!(sink = name, error = %err, "sink write failed");
        }
    }
    if let Err(err) = sink.close() {
        metrics.inc_sink_error(name);
        error!(sink = name, error = %err, "sink close failed");
    }
}
