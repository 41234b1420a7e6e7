use crate::model::JsonRecord;
use crate::sinks::daily::DailyFile;
use crate::sinks::{Record, Sink, SinkError};
use chrono::NaiveDate;
use std::io::Write;
use std::path::PathBuf;

/// One JSON object per line in `<prefix>_<YYYYMMDD>.json`. Alerts are not persisted here.
pub struct JsonLinesSink {
    file: DailyFile,
}

impl JsonLinesSink {
    pub fn new(dir: impl Into<PathBuf>, prefix: &str, date: NaiveDate) -> Self {
        Self {
            file: DailyFile::new(dir, prefix, "json", date),
        }
    }
}

impl Sink for JsonLinesSink {
    fn name(&self) -> &'static str {
        "json"
    }

    fn write(&mut self, record: &Record) -> Result<(), SinkError> {
        let json = match record {
            Record::Sample(sample) => JsonRecord::from(sample.as_ref()),
            Record::Rollup(rollup) => JsonRecord::from(rollup.as_ref()),
            Record::Alert(_) => return Ok(()),
        };
        let mut line = serde_json::to_vec(&json)?;
        line.push(b'\n');

        let path = self.file.path().to_path_buf();
        let (writer, _) = self.file.open()?;
        writer
            .write_all(&line)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::{process, sample_with_cpu, timestamp_at};
    use crate::rollup::RollupWindow;
    use std::fs;
    use std::sync::Arc;

    #[test]
    fn each_record_is_one_parseable_line() {
        let dir = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        let mut sink = JsonLinesSink::new(dir.path(), "system_monitor", date);

        let mut sample = sample_with_cpu(33.0);
        sample.top_processes = vec![process(9, "java", 20.0, 15.0)];
        let mut window = RollupWindow::new();
        window.add(&sample);
        sink.write(&Record::Sample(Arc::new(sample))).unwrap();
        sink.write(&Record::Rollup(Arc::new(window.flush().unwrap())))
            .unwrap();
        sink.close().unwrap();

        let text = fs::read_to_string(dir.path().join("system_monitor_20240701.json")).unwrap();
        let values: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0]["kind"], "sample");
        assert_eq!(values[0]["cpu"], 33.0);
        assert_eq!(values[0]["memory"], 40.0);
        assert_eq!(values[0]["swap_memory"], 0.0);
        assert_eq!(values[0]["processes"][0]["name"], "java");
        assert!(values[0]["timestamp"].as_str().unwrap().contains('T'));
        assert_eq!(values[1]["kind"], "rollup");
        assert_eq!(values[1]["sample_count"], 1);
    }

    #[test]
    fn samples_on_different_days_land_in_different_files() {
        let dir = tempfile::tempdir().unwrap();
        let day1 = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        let mut sink = JsonLinesSink::new(dir.path(), "m", day1);

        let mut late = sample_with_cpu(1.0);
        late.timestamp = timestamp_at(2024, 7, 1, 23, 59);
        let mut early = sample_with_cpu(2.0);
        early.timestamp = timestamp_at(2024, 7, 2, 0, 1);

        sink.write(&Record::Sample(Arc::new(late))).unwrap();
        sink.rotate(early.timestamp.date()).unwrap();
        sink.write(&Record::Sample(Arc::new(early))).unwrap();
        sink.close().unwrap();

        let first = fs::read_to_string(dir.path().join("m_20240701.json")).unwrap();
        let second = fs::read_to_string(dir.path().join("m_20240702.json")).unwrap();
        assert_eq!(first.lines().count(), 1);
        assert_eq!(second.lines().count(), 1);
        assert!(first.contains("\"cpu\":1.0"));
        assert!(second.contains("\"cpu\":2.0"));
    }
}
