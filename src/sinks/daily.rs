use crate::sinks::SinkError;
use chrono::NaiveDate;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// An append-only file named after the calendar day it belongs to.
///
/// The file is opened lazily on first write and replaced as a whole on
/// [`DailyFile::rotate`]; the previous handle is flushed and closed before the
/// new path is used.
#[derive(Debug)]
pub struct DailyFile {
    dir: PathBuf,
    prefix: String,
    extension: &'static str,
    date: NaiveDate,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl DailyFile {
    pub fn new(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        extension: &'static str,
        date: NaiveDate,
    ) -> Self {
        let dir = dir.into();
        let prefix = prefix.into();
        let path = path_for(&dir, &prefix, extension, date);
        Self {
            dir,
            prefix,
            extension,
            date,
            path,
            writer: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Returns the open writer and whether this call created the file.
    pub fn open(&mut self) -> Result<(&mut BufWriter<File>, bool), SinkError> {
        let created = match self.writer {
            Some(_) => false,
            None => {
                fs::create_dir_all(&self.dir).map_err(|source| SinkError::io(&self.dir, source))?;
                let existed = self.path.exists();
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .map_err(|source| SinkError::io(&self.path, source))?;
                self.writer = Some(BufWriter::new(file));
                !existed
            }
        };
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        Ok((writer, created))
    }

    pub fn flush(&mut self) -> Result<(), SinkError> {
        if let Some(writer) = self.writer.as_mut() {
            writer
                .flush()
                .map_err(|source| SinkError::io(&self.path, source))?;
        }
        Ok(())
    }

    /// Switches to the file for `date`. Returns `false` if already on that day.
    ///
    /// The switch happens even when closing the old file fails; that error is
    /// returned afterwards so later writes never land in the previous day.
    pub fn rotate(&mut self, date: NaiveDate) -> Result<bool, SinkError> {
        if date == self.date {
            return Ok(false);
        }
        let closed = self.close();
        self.date = date;
        self.path = path_for(&self.dir, &self.prefix, self.extension, date);
        closed.map(|_| true)
    }

    pub fn close(&mut self) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .map_err(|source| SinkError::io(&self.path, source))?;
        }
        Ok(())
    }
}

pub fn path_for(dir: &Path, prefix: &str, extension: &str, date: NaiveDate) -> PathBuf {
    dir.join(format!("{prefix}_{}.{extension}", date.format("%Y%m%d")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn file_name_uses_prefix_and_compact_date() {
        let path = path_for(Path::new("/tmp/x"), "cpu_usage", "csv", day(9));
        assert_eq!(path, Path::new("/tmp/x/cpu_usage_20240309.csv"));
    }

    #[test]
    fn open_reports_creation_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = DailyFile::new(dir.path().join("nested"), "m", "log", day(1));
        assert!(file.open().unwrap().1);
        assert!(!file.open().unwrap().1);
        file.close().unwrap();

        let mut reopened = DailyFile::new(dir.path().join("nested"), "m", "log", day(1));
        assert!(!reopened.open().unwrap().1, "existing file is not new");
    }

    #[test]
    fn rotate_flushes_old_file_and_switches_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = DailyFile::new(dir.path(), "m", "log", day(1));
        writeln!(file.open().unwrap().0, "first").unwrap();
        let old_path = file.path().to_path_buf();

        assert!(!file.rotate(day(1)).unwrap());
        assert!(file.rotate(day(2)).unwrap());
        assert_eq!(fs::read_to_string(&old_path).unwrap(), "first\n");
        assert_ne!(file.path(), old_path.as_path());
        assert_eq!(file.date(), day(2));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn rotate_switches_day_even_when_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = DailyFile::new(dir.path(), "m", "log", day(1));
        let full = OpenOptions::new().write(true).open("/dev/full").unwrap();
        file.writer = Some(BufWriter::new(full));
        file.writer.as_mut().unwrap().write_all(b"lost").unwrap();

        assert!(file.rotate(day(2)).is_err());
        assert_eq!(file.date(), day(2));
        assert!(file.path().ends_with("m_20240302.log"));
        assert!(file.writer.is_none());

        writeln!(file.open().unwrap().0, "next").unwrap();
        file.close().unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("m_20240302.log")).unwrap(),
            "next\n"
        );
    }
}
