//! A plain append-mode file sink.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use failure::Error;
use parking_lot::Mutex;

use crate::clef;
use crate::event::LogEvent;
use crate::template::OutputTemplate;

use super::{Sink, SinkError};

/// How a text sink turns an event into a line.
pub enum LineFormat {
    /// CLEF NDJSON, one object per line.
    Clef,
    /// A custom output template. The rendered text is written as-is (add `${NewLine}` yourself
    /// or rely on the sink appending one when the template does not end with it).
    Template(OutputTemplate),
}

impl LineFormat {
    pub(crate) fn render(&self, event: &LogEvent) -> String {
        let mut line = match self {
            LineFormat::Clef => clef::to_clef(event, true),
            LineFormat::Template(t) => t.render(event),
        };
        if !line.ends_with('\n') {
            line.push('\n');
        }
        line
    }
}

/// Appends events to one file, creating the parent directory as needed.
///
/// Writes are serialized by an internal lock. Write failures go to the self-log; the sink keeps
/// trying, because a transiently failing disk should not take the application down with it.
pub struct FileSink {
    path: PathBuf,
    format: LineFormat,
    file: Mutex<Option<File>>,
}

impl FileSink {
    /// Opens (or creates) the file for appending, CLEF-formatted.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<FileSink, Error> {
        Self::with_format(path, LineFormat::Clef)
    }

    /// Opens with an explicit line format.
    pub fn with_format<P: AsRef<Path>>(path: P, format: LineFormat) -> Result<FileSink, Error> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(FileSink {
            path,
            format,
            file: Mutex::new(Some(file)),
        })
    }

    /// The path this sink writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Sink for FileSink {
    fn emit(&self, event: &LogEvent) -> Result<(), SinkError> {
        let line = self.format.render(event);
        let mut guard = self.file.lock();
        let file = match guard.as_mut() {
            Some(file) => file,
            None => return Err(SinkError::Closed),
        };
        file.write_all(line.as_bytes()).map_err(|e| {
            crate::selflog!("file sink write to {:?} failed: {}", self.path, e);
            SinkError::from(e)
        })
    }

    fn flush(&self) {
        if let Some(file) = self.file.lock().as_mut() {
            let _ = file.flush();
        }
    }

    fn close(&self) -> Result<(), SinkError> {
        // Taking the file out makes a second close a no-op.
        if let Some(file) = self.file.lock().take() {
            file.sync_all()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::event::Level;

    use super::*;

    #[test]
    fn appends_clef_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/app.clef");
        let sink = FileSink::new(&path).unwrap();
        sink.emit(&LogEvent::new(Level::Information, "one")).unwrap();
        sink.emit(&LogEvent::new(Level::Warning, "two")).unwrap();
        sink.close().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["@mt"], "one");
    }

    #[test]
    fn template_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let template = OutputTemplate::parse("${Level:u3} ${Message}").unwrap();
        let sink = FileSink::with_format(&path, LineFormat::Template(template)).unwrap();
        sink.emit(&LogEvent::new(Level::Error, "bad news")).unwrap();
        sink.close().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "ERR bad news\n");
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("app.clef")).unwrap();
        sink.close().unwrap();
        sink.close().unwrap();
        assert!(sink.emit(&LogEvent::new(Level::Information, "late")).is_err());
    }
}
