//! The connection event log.
//!
//! An [`EventLog`] receives four classes of plain-text lines. Recording is
//! fire-and-forget: implementations never return errors to the caller, and
//! [`FileEventLog`] falls back to stderr when the file cannot be written.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

/// Category of an event log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventClass {
    /// Lifecycle notes (connected, logged in, reset, ...).
    General,
    /// A frame written to the server.
    Sent,
    /// A frame read from the server.
    Received,
    /// A failure worth keeping in the session history.
    Error,
}

impl EventClass {
    /// Fixed-width label written in front of each line.
    pub fn label(self) -> &'static str {
        match self {
            EventClass::General => "GENERAL ",
            EventClass::Sent => "SENT    ",
            EventClass::Received => "RECEIVED",
            EventClass::Error => "ERROR   ",
        }
    }
}

/// Sink for session events.
pub trait EventLog: Send + Sync {
    /// Record one line of the given class.
    fn record(&self, class: EventClass, line: &str);

    /// Record a lifecycle note.
    fn general(&self, line: &str) {
        self.record(EventClass::General, line);
    }

    /// Record an outbound frame.
    fn sent(&self, line: &str) {
        self.record(EventClass::Sent, line);
    }

    /// Record an inbound frame.
    fn received(&self, line: &str) {
        self.record(EventClass::Received, line);
    }

    /// Record a failure.
    fn error(&self, line: &str) {
        self.record(EventClass::Error, line);
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventLog;

impl EventLog for NullEventLog {
    fn record(&self, _class: EventClass, _line: &str) {}
}

/// Forwards events to `tracing` under the `tether::events` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventLog;

impl EventLog for TracingEventLog {
    fn record(&self, class: EventClass, line: &str) {
        match class {
            EventClass::General => tracing::info!(target: "tether::events", "{line}"),
            EventClass::Sent => tracing::debug!(target: "tether::events", "-> {line}"),
            EventClass::Received => tracing::debug!(target: "tether::events", "<- {line}"),
            EventClass::Error => tracing::warn!(target: "tether::events", "{line}"),
        }
    }
}

/// Appends events to a file, one `<unix-ms> <CLASS> <line>` record per line.
///
/// The file is opened in append mode on construction and reopened lazily if
/// that failed. Failures are reported on stderr together with the event that
/// could not be persisted.
#[derive(Debug)]
pub struct FileEventLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileEventLog {
    /// Create a log appending to `path`. Parent directories are created.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let file = match Self::open_append(&path) {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!("event log: cannot open {}: {e}", path.display());
                None
            }
        };
        Self {
            path,
            file: Mutex::new(file),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_append(path: &Path) -> std::io::Result<File> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(path)
    }
}

impl EventLog for FileEventLog {
    fn record(&self, class: EventClass, line: &str) {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let record = format!("{millis} {} {}\n", class.label(), line.replace('\n', " "));

        let mut guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            *guard = Self::open_append(&self.path).ok();
        }
        let written = match guard.as_mut() {
            Some(file) => file.write_all(record.as_bytes()),
            None => Err(std::io::Error::other("event log file unavailable")),
        };
        if let Err(e) = written {
            // Drop the handle so the next record retries the open.
            *guard = None;
            eprintln!("event log: {} ({e}): {}", self.path.display(), record.trim_end());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_log_appends_all_classes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        let log = FileEventLog::open(&path);

        log.general("logged in as alice");
        log.sent(r#"{"name":"alice"}"#);
        log.received(r#"{"type":"login"}"#);
        log.error("heartbeat lost");

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("GENERAL  logged in as alice"));
        assert!(lines[1].contains(r#"SENT     {"name":"alice"}"#));
        assert!(lines[2].contains(r#"RECEIVED {"type":"login"}"#));
        assert!(lines[3].contains("ERROR    heartbeat lost"));
    }

    #[test]
    fn test_file_log_keeps_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        std::fs::write(&path, "earlier session\n").unwrap();

        FileEventLog::open(&path).general("new session");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("earlier session\n"));
        assert!(contents.contains("new session"));
    }

    #[test]
    fn test_file_log_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("events.log");
        let log = FileEventLog::open(&path);
        log.general("hello");
        assert!(path.exists());
        assert_eq!(log.path(), path.as_path());
    }

    #[test]
    fn test_embedded_newlines_stay_on_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        FileEventLog::open(&path).received("{\"a\":1}\n{\"b\":2}");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[test]
    fn test_unwritable_path_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending.
        let log = FileEventLog::open(dir.path());
        log.error("still fire-and-forget");
    }

    #[test]
    fn test_labels_are_fixed_width() {
        let widths: Vec<usize> = [
            EventClass::General,
            EventClass::Sent,
            EventClass::Received,
            EventClass::Error,
        ]
        .iter()
        .map(|c| c.label().len())
        .collect();
        assert!(widths.windows(2).all(|w| w[0] == w[1]));
    }
}
