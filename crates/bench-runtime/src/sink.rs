//! Append-only log sink.
//!
//! Each pass becomes exactly one line. A failed append is retried once after
//! a backoff; if the retry also fails the line is written to the error log
//! so the measurements are never silently lost.

use bench_common::{BenchError, BenchResult};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Append-only text destination.
pub trait LogSink {
    /// Append one newline-terminated line.
    fn append_line(&mut self, line: &str) -> BenchResult<()>;

    /// Whether nothing has been written to the sink yet.
    fn is_empty(&mut self) -> BenchResult<bool>;
}

impl<L: LogSink + ?Sized> LogSink for Box<L> {
    fn append_line(&mut self, line: &str) -> BenchResult<()> {
        (**self).append_line(line)
    }

    fn is_empty(&mut self) -> BenchResult<bool> {
        (**self).is_empty()
    }
}

/// Append `line`, retrying once after `backoff`.
///
/// # Errors
///
/// Returns the second failure. The line itself is logged at error level
/// before returning.
pub fn append_with_retry<L: LogSink + ?Sized>(
    sink: &mut L,
    line: &str,
    backoff: Duration,
) -> BenchResult<()> {
    let Err(first) = sink.append_line(line) else {
        return Ok(());
    };
    warn!(error = %first, backoff_ms = backoff.as_millis(), "Log append failed, retrying");
    std::thread::sleep(backoff);

    sink.append_line(line).map_err(|e| {
        error!(error = %e, line = line.trim_end(), "Log append failed twice, record not persisted");
        e
    })
}

/// Results file opened in append mode for every line.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    /// Sink writing to `path`. The file is created on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the results file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileSink {
    fn append_line(&mut self, line: &str) -> BenchResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| BenchError::LogSink(format!("open {}: {e}", self.path.display())))?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|e| BenchError::LogSink(format!("write {}: {e}", self.path.display())))?;
        debug!(path = %self.path.display(), bytes = line.len(), "Appended log line");
        Ok(())
    }

    fn is_empty(&mut self) -> BenchResult<bool> {
        match std::fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len() == 0),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(BenchError::LogSink(format!(
                "stat {}: {e}",
                self.path.display()
            ))),
        }
    }
}

/// In-memory sink with failure injection.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    lines: Vec<String>,
    failures: u32,
    attempts: u32,
}

impl MemorySink {
    /// Empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` appends.
    #[must_use]
    pub fn failing(mut self, count: u32) -> Self {
        self.failures = count;
        self
    }

    /// Lines written so far.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Total append attempts, failed ones included.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl LogSink for MemorySink {
    fn append_line(&mut self, line: &str) -> BenchResult<()> {
        self.attempts += 1;
        if self.failures > 0 {
            self.failures -= 1;
            return Err(BenchError::LogSink("injected failure".into()));
        }
        self.lines.push(line.to_string());
        Ok(())
    }

    fn is_empty(&mut self) -> BenchResult<bool> {
        Ok(self.lines.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.txt");
        std::fs::write(&path, "existing\n").unwrap();

        let mut sink = FileSink::new(&path);
        assert!(!sink.is_empty().unwrap());
        sink.append_line("1.0000,2.0000\n").unwrap();
        sink.append_line("3.0000,4.0000\n").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "existing\n1.0000,2.0000\n3.0000,4.0000\n");
    }

    #[test]
    fn test_file_sink_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::new(dir.path().join("new.txt"));
        assert!(sink.is_empty().unwrap());
    }

    #[test]
    fn test_file_sink_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::new(dir.path().join("missing").join("output.txt"));
        let err = sink.append_line("x\n").unwrap_err();
        assert!(matches!(err, BenchError::LogSink(_)));
    }

    #[test]
    fn test_retry_recovers_single_failure() {
        let mut sink = MemorySink::new().failing(1);
        append_with_retry(&mut sink, "line\n", Duration::from_millis(1)).unwrap();
        assert_eq!(sink.lines(), ["line\n"]);
        assert_eq!(sink.attempts(), 2);
    }

    #[test]
    fn test_retry_gives_up_after_second_failure() {
        let mut sink = MemorySink::new().failing(2);
        let err = append_with_retry(&mut sink, "line\n", Duration::from_millis(1)).unwrap_err();
        assert!(matches!(err, BenchError::LogSink(_)));
        assert!(sink.lines().is_empty());
        assert_eq!(sink.attempts(), 2);
    }
}
