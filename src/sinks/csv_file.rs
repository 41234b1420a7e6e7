use crate::model::Rollup;
use crate::sinks::daily::DailyFile;
use crate::sinks::{Record, Sink, SinkError};
use chrono::NaiveDate;
use std::path::PathBuf;

pub const CSV_HEADER: [&str; 7] = [
    "Timestamp",
    "CPU_Usage(%)",
    "Load_Avg_1min",
    "Load_Avg_5min",
    "Load_Avg_15min",
    "Frequency_Current(MHz)",
    "Temperature(°C)",
];

/// One row per rollup in `<prefix>_<YYYYMMDD>.csv`.
///
/// The header is written only when this sink creates the file, so restarting
/// the daemon appends to an existing day file without a second header.
pub struct CsvFileSink {
    file: DailyFile,
}

impl CsvFileSink {
    pub fn new(dir: impl Into<PathBuf>, prefix: &str, date: NaiveDate) -> Self {
        Self {
            file: DailyFile::new(dir, prefix, "csv", date),
        }
    }
}

impl Sink for CsvFileSink {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn write(&mut self, record: &Record) -> Result<(), SinkError> {
        let Record::Rollup(rollup) = record else {
            return Ok(());
        };
        let (writer, created) = self.file.open()?;
        let mut csv_writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        if created {
            csv_writer.write_record(CSV_HEADER)?;
        }
        csv_writer.write_record(row(rollup))?;
        csv_writer
            .flush()
            .map_err(|source| SinkError::Csv(source.into()))?;
        drop(csv_writer);
        self.file.flush()
    }

    fn rotate(&mut self, date: NaiveDate) -> Result<(), SinkError> {
        self.file.rotate(date).map(|_| ())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.file.close()
    }
}

fn optional(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn row(rollup: &Rollup) -> [String; 7] {
    let load = rollup.load_avg;
    [
        rollup
            .window_end
            .wall
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        format!("{:.2}", rollup.avg_cpu_percent),
        optional(load.map(|l| l.one)),
        optional(load.map(|l| l.five)),
        optional(load.map(|l| l.fifteen)),
        optional(rollup.frequency_mhz),
        optional(rollup.temperature_c),
    ]
}
