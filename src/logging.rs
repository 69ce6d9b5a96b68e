//! Console and run-log output.
//!
//! `env_logger` formats every record as `<timestamp> - <LEVEL> - <message>`
//! and hands it to a tee that writes to stderr and, once a run directory
//! exists, appends to its `run.log`.

use chrono::{DateTime, FixedOffset};
use env_logger::{Builder, Env, Target, WriteStyle};
use log::Level;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct LogFile {
    file: Option<File>,
    path: Option<PathBuf>,
}

/// Handle to the process-wide run log
#[derive(Clone, Default)]
pub struct RunLog {
    inner: Arc<Mutex<LogFile>>,
}

impl RunLog {
    /// Start appending log lines to `path` (created if missing)
    pub fn attach<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if let Ok(mut inner) = self.inner.lock() {
            inner.file = Some(file);
            inner.path = Some(path.to_path_buf());
        }
        Ok(())
    }

    /// Stop writing to the run log, flushing it first
    pub fn detach(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            if let Some(file) = inner.file.as_mut() {
                let _ = file.flush();
            }
            inner.file = None;
            inner.path = None;
        }
    }

    /// File currently receiving log lines
    pub fn path(&self) -> Option<PathBuf> {
        self.inner.lock().ok().and_then(|inner| inner.path.clone())
    }
}

/// Writes each formatted record to stderr and the attached run log
struct Tee {
    console: bool,
    log: RunLog,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.console {
            io::stderr().write_all(buf)?;
        }
        if let Ok(mut inner) = self.log.inner.lock() {
            if let Some(file) = inner.file.as_mut() {
                file.write_all(buf)?;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.console {
            io::stderr().flush()?;
        }
        if let Ok(mut inner) = self.log.inner.lock() {
            if let Some(file) = inner.file.as_mut() {
                file.flush()?;
            }
        }
        Ok(())
    }
}

/// Install the global logger.
///
/// `level` is the default filter; `RUST_LOG` overrides it. With `console`
/// off, records only reach the run log. If a logger is already installed the
/// returned handle is inert.
pub fn init(level: &str, console: bool) -> RunLog {
    let log = RunLog::default();
    let tee = Tee {
        console,
        log: log.clone(),
    };

    let result = Builder::from_env(Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {}",
                buf.timestamp_millis(),
                record.level(),
                record.args()
            )
        })
        .write_style(WriteStyle::Never)
        .target(Target::Pipe(Box::new(tee)))
        .try_init();

    if result.is_err() {
        log::debug!("Logger already initialized");
    }
    log
}

/// One parsed run-log line
#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    pub timestamp: DateTime<FixedOffset>,
    pub level: Level,
    pub message: String,
}

impl LogLine {
    /// Parse `"<rfc3339> - <LEVEL> - <message>"`
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.splitn(3, " - ");
        let timestamp = DateTime::parse_from_rfc3339(parts.next()?.trim()).ok()?;
        let level = parts.next()?.trim().parse().ok()?;
        let message = parts.next()?.to_string();
        Some(Self {
            timestamp,
            level,
            message,
        })
    }
}

/// Read a run log back. Lines that do not start a record continue the
/// previous one's message.
pub fn read_entries<P: AsRef<Path>>(path: P) -> io::Result<Vec<LogLine>> {
    let reader = BufReader::new(File::open(path)?);
    let mut entries: Vec<LogLine> = Vec::new();

    for line in reader.lines() {
        let line = line?;
        match LogLine::parse(&line) {
            Some(entry) => entries.push(entry),
            None => {
                if let Some(last) = entries.last_mut() {
                    last.message.push('\n');
                    last.message.push_str(&line);
                }
            }
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        let line = LogLine::parse("2024-03-01T12:00:00.123Z - INFO - Run started: seed 42").unwrap();
        assert_eq!(line.level, Level::Info);
        assert_eq!(line.message, "Run started: seed 42");
        assert!(LogLine::parse("not a log line").is_none());
    }

    #[test]
    fn test_read_entries_joins_continuations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        std::fs::write(
            &path,
            "2024-03-01T12:00:00.000Z - WARN - first\n  detail\n2024-03-01T12:00:01.000Z - ERROR - second - with dash\n",
        )
        .unwrap();

        let entries = read_entries(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "first\n  detail");
        assert_eq!(entries[1].level, Level::Error);
        assert_eq!(entries[1].message, "second - with dash");
    }

    #[test]
    fn test_tee_appends_to_attached_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        std::fs::write(&path, "existing\n").unwrap();

        let log = RunLog::default();
        log.attach(&path).unwrap();
        let mut tee = Tee {
            console: false,
            log: log.clone(),
        };
        tee.write_all(b"appended\n").unwrap();
        log.detach();
        tee.write_all(b"ignored\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "existing\nappended\n");
        assert!(log.path().is_none());
    }
}
