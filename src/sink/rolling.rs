//! A rolling file sink: size- and time-based rolls, optional gzip, bounded retention.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use failure::Error;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;

use crate::event::LogEvent;
use crate::template::OutputTemplate;

use super::file::LineFormat;
use super::{Sink, SinkError};

/// Default write buffer in front of the file.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Time-based rolling policy. Rolls happen at the boundary: top of the hour, local midnight,
/// Sunday midnight, the first of the next month.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RollingInterval {
    /// Never roll on time (size may still roll).
    Never,
    /// At the top of every hour.
    Hourly,
    /// At local midnight.
    Daily,
    /// At Sunday midnight.
    Weekly,
    /// At midnight on the first of the next month.
    Monthly,
}

impl RollingInterval {
    fn next_boundary(self, from: DateTime<Local>) -> Option<DateTime<Local>> {
        let day_start = Local
            .ymd(from.year(), from.month(), from.day())
            .and_hms(0, 0, 0);
        match self {
            RollingInterval::Never => None,
            RollingInterval::Hourly => {
                let hour_start = Local
                    .ymd(from.year(), from.month(), from.day())
                    .and_hms(from.time().hour(), 0, 0);
                Some(hour_start + chrono::Duration::hours(1))
            }
            RollingInterval::Daily => Some(day_start + chrono::Duration::days(1)),
            RollingInterval::Weekly => {
                let until_sunday = 7 - i64::from(from.weekday().num_days_from_sunday() % 7);
                Some(day_start + chrono::Duration::days(until_sunday))
            }
            RollingInterval::Monthly => {
                let (year, month) = if from.month() == 12 {
                    (from.year() + 1, 1)
                } else {
                    (from.year(), from.month() + 1)
                };
                Some(Local.ymd(year, month, 1).and_hms(0, 0, 0))
            }
        }
    }
}

/// Configures and opens a [`RollingFileSink`].
pub struct RollingFileBuilder {
    path: PathBuf,
    format: LineFormat,
    max_file_size: Option<u64>,
    interval: RollingInterval,
    retain_files: Option<usize>,
    compress: bool,
    buffer_size: usize,
}

impl RollingFileBuilder {
    /// Rolls when the current file would grow past `size` bytes.
    pub fn max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = Some(size);
        self
    }

    /// Rolls at time boundaries.
    pub fn interval(mut self, interval: RollingInterval) -> Self {
        self.interval = interval;
        self
    }

    /// Keeps at most this many rolled files; older ones are deleted after a roll.
    pub fn retain_files(mut self, count: usize) -> Self {
        self.retain_files = Some(count);
        self
    }

    /// Gzips rolled files.
    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Renders lines through an output template instead of CLEF.
    pub fn template(mut self, template: OutputTemplate) -> Self {
        self.format = LineFormat::Template(template);
        self
    }

    /// Size of the write buffer.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Opens the sink.
    pub fn build(self) -> Result<RollingFileSink, Error> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = open_append(&self.path)?;
        let size = file.metadata()?.len();
        let state = RollState {
            writer: Some(BufWriter::with_capacity(self.buffer_size, file)),
            current_size: size,
            next_roll: self.interval.next_boundary(Local::now()),
        };
        Ok(RollingFileSink {
            path: self.path,
            format: self.format,
            max_file_size: self.max_file_size,
            interval: self.interval,
            retain_files: self.retain_files,
            compress: self.compress,
            buffer_size: self.buffer_size,
            state: Mutex::new(state),
        })
    }
}

fn open_append(path: &Path) -> Result<File, std::io::Error> {
    OpenOptions::new().create(true).append(true).open(path)
}

struct RollState {
    writer: Option<BufWriter<File>>,
    current_size: u64,
    next_roll: Option<DateTime<Local>>,
}

/// The rolling file sink. One lock serializes writes and rolls.
pub struct RollingFileSink {
    path: PathBuf,
    format: LineFormat,
    max_file_size: Option<u64>,
    interval: RollingInterval,
    retain_files: Option<usize>,
    compress: bool,
    buffer_size: usize,
    state: Mutex<RollState>,
}

impl RollingFileSink {
    /// Starts a builder for the given current-file path.
    pub fn builder<P: AsRef<Path>>(path: P) -> RollingFileBuilder {
        RollingFileBuilder {
            path: path.as_ref().to_path_buf(),
            format: LineFormat::Clef,
            max_file_size: None,
            interval: RollingInterval::Never,
            retain_files: None,
            compress: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    fn stem_and_ext(&self) -> (String, String) {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "log".to_owned());
        let ext = self
            .path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        (stem, ext)
    }

    fn roll(&self, state: &mut RollState) -> Result<(), SinkError> {
        if let Some(mut writer) = state.writer.take() {
            writer.flush()?;
            let file = writer
                .into_inner()
                .map_err(|e| SinkError::Unavailable(format!("buffer flush on roll: {}", e)))?;
            file.sync_all()?;
            drop(file);
        }

        // A second roll within the same second must not clobber the first (nor its gzipped
        // remains), so the name gets a counter until it is free.
        let (stem, ext) = self.stem_and_ext();
        let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let mut rolled = self
            .path
            .with_file_name(format!("{}-{}{}", stem, stamp, ext));
        let mut n = 1;
        while occupied(&rolled) {
            rolled = self
                .path
                .with_file_name(format!("{}-{}.{}{}", stem, stamp, n, ext));
            n += 1;
        }
        fs::rename(&self.path, &rolled)?;

        if self.compress {
            if let Err(e) = gzip_file(&rolled) {
                crate::selflog!("compressing rolled file {:?} failed: {}", rolled, e);
            }
        }

        let file = open_append(&self.path)?;
        state.writer = Some(BufWriter::with_capacity(self.buffer_size, file));
        state.current_size = 0;
        state.next_roll = self.interval.next_boundary(Local::now());

        if let Some(retain) = self.retain_files {
            self.apply_retention(retain);
        }
        Ok(())
    }

    fn apply_retention(&self, retain: usize) {
        let (stem, ext) = self.stem_and_ext();
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let current = self.path.file_name().map(|f| f.to_string_lossy().into_owned());
        let mut rolled: Vec<PathBuf> = match fs::read_dir(&dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    let name = match p.file_name() {
                        Some(n) => n.to_string_lossy().into_owned(),
                        None => return false,
                    };
                    if Some(&name) == current.as_ref() {
                        return false;
                    }
                    name.starts_with(&format!("{}-", stem))
                        && (name.ends_with(&ext) || name.ends_with(&format!("{}.gz", ext)))
                })
                .collect(),
            Err(e) => {
                crate::selflog!("retention scan of {:?} failed: {}", dir, e);
                return;
            }
        };
        if rolled.len() <= retain {
            return;
        }
        // The timestamp is in the name, so lexicographic order is age order.
        rolled.sort();
        let excess = rolled.len() - retain;
        for path in rolled.into_iter().take(excess) {
            if let Err(e) = fs::remove_file(&path) {
                crate::selflog!("retention delete of {:?} failed: {}", path, e);
            }
        }
    }
}

fn occupied(path: &Path) -> bool {
    if path.exists() {
        return true;
    }
    let gz = path.file_name().map(|f| {
        let mut name = f.to_string_lossy().into_owned();
        name.push_str(".gz");
        path.with_file_name(name)
    });
    gz.map_or(false, |gz| gz.exists())
}

fn gzip_file(path: &Path) -> Result<(), std::io::Error> {
    let gz_path = {
        let mut name = path.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default();
        name.push_str(".gz");
        path.with_file_name(name)
    };
    {
        let mut input = File::open(path)?;
        let output = File::create(&gz_path)?;
        let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
        let mut buf = [0u8; 16 * 1024];
        loop {
            let n = input.read(&mut buf)?;
            if n == 0 {
                break;
            }
            encoder.write_all(&buf[..n])?;
        }
        encoder.finish()?.flush()?;
    }
    // Some platforms hold the handle a moment after close; retry the remove briefly.
    let mut last = None;
    for _ in 0..5 {
        match fs::remove_file(path) {
            Ok(()) => return Ok(()),
            Err(e) => {
                last = Some(e);
                sleep(Duration::from_millis(20));
            }
        }
    }
    Err(last.expect("retry loop ran at least once"))
}

impl Sink for RollingFileSink {
    fn emit(&self, event: &LogEvent) -> Result<(), SinkError> {
        let line = self.format.render(event);
        let mut state = self.state.lock();
        if state.writer.is_none() {
            return Err(SinkError::Closed);
        }

        let time_due = state
            .next_roll
            .map_or(false, |boundary| Local::now() >= boundary);
        let size_due = self.max_file_size.map_or(false, |max| {
            state.current_size > 0 && state.current_size + line.len() as u64 > max
        });
        if time_due || size_due {
            if let Err(e) = self.roll(&mut state) {
                crate::selflog!("rolling {:?} failed: {}", self.path, e);
                // Keep logging into the current file if it can be reopened; a failed roll is
                // retried on the next emit.
                if state.writer.is_none() {
                    match open_append(&self.path) {
                        Ok(file) => {
                            state.writer =
                                Some(BufWriter::with_capacity(self.buffer_size, file));
                        }
                        Err(_) => return Err(e),
                    }
                }
            }
        }

        let writer = state.writer.as_mut().expect("writer restored after roll");
        writer.write_all(line.as_bytes()).map_err(|e| {
            crate::selflog!("rolling file write to {:?} failed: {}", self.path, e);
            SinkError::from(e)
        })?;
        state.current_size += line.len() as u64;
        Ok(())
    }

    fn flush(&self) {
        if let Some(writer) = self.state.lock().writer.as_mut() {
            let _ = writer.flush();
        }
    }

    fn close(&self) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        if let Some(mut writer) = state.writer.take() {
            writer.flush()?;
            let file = writer
                .into_inner()
                .map_err(|e| SinkError::Unavailable(format!("buffer flush on close: {}", e)))?;
            file.sync_all()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::event::Level;
    use crate::template::OutputTemplate;

    use super::*;

    fn line_template() -> OutputTemplate {
        OutputTemplate::parse("${Message}${NewLine}").unwrap()
    }

    fn event(text: &str) -> LogEvent {
        LogEvent::new(Level::Information, text)
    }

    #[test]
    fn rolls_on_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let sink = RollingFileSink::builder(&path)
            .template(line_template())
            .max_file_size(64)
            .build()
            .unwrap();

        let payload = "x".repeat(30);
        for _ in 0..6 {
            sink.emit(&event(&payload)).unwrap();
        }
        sink.close().unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.len() > 1, "expected rolled files, got {:?}", names);
        // The current file stays within one write of the bound.
        let current = fs::metadata(&path).unwrap().len();
        assert!(current <= 64 + 31, "current file too large: {}", current);
    }

    #[test]
    fn retention_prunes_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let sink = RollingFileSink::builder(&path)
            .template(line_template())
            .max_file_size(40)
            .retain_files(2)
            .build()
            .unwrap();

        let payload = "y".repeat(30);
        for _ in 0..12 {
            sink.emit(&event(&payload)).unwrap();
        }
        sink.close().unwrap();

        let rolled: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n != "app.log")
            .collect();
        assert!(rolled.len() <= 2, "retention failed: {:?}", rolled);
    }

    #[test]
    fn compresses_rolled_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let sink = RollingFileSink::builder(&path)
            .template(line_template())
            .max_file_size(40)
            .retain_files(3)
            .compress(true)
            .build()
            .unwrap();

        let payload = "z".repeat(30);
        for _ in 0..8 {
            sink.emit(&event(&payload)).unwrap();
        }
        sink.close().unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n != "app.log")
            .collect();
        assert!(!names.is_empty());
        assert!(
            names.iter().all(|n| n.ends_with(".log.gz")),
            "uncompressed leftovers: {:?}",
            names,
        );
    }

    #[test]
    fn weekly_boundary_is_sunday() {
        let wednesday = Local.ymd(2024, 3, 6).and_hms(15, 30, 0);
        let boundary = RollingInterval::Weekly.next_boundary(wednesday).unwrap();
        assert_eq!(boundary, Local.ymd(2024, 3, 10).and_hms(0, 0, 0));
        assert_eq!(boundary.weekday().num_days_from_sunday(), 0);
    }

    #[test]
    fn hourly_boundary_is_top_of_hour() {
        let now = Local.ymd(2024, 3, 6).and_hms(15, 30, 59);
        let boundary = RollingInterval::Hourly.next_boundary(now).unwrap();
        assert_eq!(boundary, Local.ymd(2024, 3, 6).and_hms(16, 0, 0));
    }

    #[test]
    fn monthly_boundary_wraps_december() {
        let december = Local.ymd(2024, 12, 31).and_hms(23, 0, 0);
        let boundary = RollingInterval::Monthly.next_boundary(december).unwrap();
        assert_eq!(boundary, Local.ymd(2025, 1, 1).and_hms(0, 0, 0));
    }
}
