//! JSONL event log: append-only line-delimited JSON for identity and trial events.
//!
//! Every line is one self-contained JSON object, assembled in memory and
//! written with a single `write_all` so a tailing reader never sees a partial
//! line.
//!
//! Degradation chain when the log cannot be written:
//! 1. Primary file path
//! 2. Fallback path
//! 3. stderr with `[MSM-JSONL]` prefix
//! 4. Silent discard (logging never fails the caller)

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions, rename};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{MsmError, Result};

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Event kinds emitted by the state manager and its collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ClientIdResolved,
    ProvisionalClientIdCreated,
    MetricsIdsReset,
    ClonedInstallDetected,
    EntropySourceSelected,
    FieldTrialsInstantiated,
    CleanExitRecorded,
    BackupStoreFailed,
    Error,
}

/// A single JSONL log entry. Only `ts`, `event`, `severity` are always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    /// How the value was obtained (client id source, entropy source type).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Reset counter after the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_count: Option<i64>,
    /// Number of trials or params affected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    #[must_use]
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            source: None,
            reset_count: None,
            count: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Entry describing a failed operation. Non-retryable failures are
    /// critical.
    #[must_use]
    pub fn from_error(event: EventType, error: &MsmError) -> Self {
        let severity = if error.is_retryable() {
            Severity::Warning
        } else {
            Severity::Critical
        };
        let mut entry = Self::new(event, severity);
        entry.ok = Some(false);
        entry.error_code = Some(error.code().to_string());
        entry.error_message = Some(error.to_string());
        entry
    }
}

/// Configuration for the JSONL writer.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    /// Rotate once the file would exceed this size.
    pub max_size_bytes: u64,
    /// Rotated generations kept (`events.jsonl.1` .. `.N`).
    pub max_rotated_files: u32,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("msm-events.jsonl"),
            fallback_path: Some(std::env::temp_dir().join("msm-events.jsonl")),
            max_size_bytes: 10 * 1024 * 1024,
            max_rotated_files: 3,
        }
    }
}

/// Where lines currently go.
enum Sink {
    File {
        path: PathBuf,
        out: BufWriter<File>,
        len: u64,
        is_fallback: bool,
    },
    Stderr,
    Discard,
}

impl Sink {
    fn open_file(path: &Path, is_fallback: bool) -> Result<Self> {
        let (file, len) = open_append(path)?;
        Ok(Self::File {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            len,
            is_fallback,
        })
    }
}

/// Shared handle to the event log.
pub type EventLog = Arc<Mutex<JsonlWriter>>;

/// Append-only JSONL log writer with rotation and multi-level fallback.
pub struct JsonlWriter {
    config: JsonlConfig,
    sink: Sink,
}

impl JsonlWriter {
    /// Open the log file, falling through the degradation chain on failure.
    #[must_use]
    pub fn open(config: JsonlConfig) -> Self {
        let sink = Sink::open_file(&config.path, false).unwrap_or_else(|_| Self::fallback_sink(&config));
        Self { config, sink }
    }

    /// Open and wrap in a shareable handle.
    #[must_use]
    pub fn shared(config: JsonlConfig) -> EventLog {
        Arc::new(Mutex::new(Self::open(config)))
    }

    /// Write one entry as one line and flush it.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(mut line) => {
                line.push('\n');
                self.append(&line);
                self.flush();
            }
            Err(error) => eprintln!("[MSM-JSONL] dropping unserializable entry: {error}"),
        }
    }

    pub fn flush(&mut self) {
        if let Sink::File { out, .. } = &mut self.sink {
            let _ = out.flush();
        }
    }

    /// Current degradation state: `normal`, `fallback`, `stderr` or `discard`.
    #[must_use]
    pub fn state(&self) -> &'static str {
        match self.sink {
            Sink::File {
                is_fallback: false, ..
            } => "normal",
            Sink::File {
                is_fallback: true, ..
            } => "fallback",
            Sink::Stderr => "stderr",
            Sink::Discard => "discard",
        }
    }

    /// Size of the active file; 0 when not writing to a file.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        match self.sink {
            Sink::File { len, .. } => len,
            Sink::Stderr | Sink::Discard => 0,
        }
    }

    // ──────────────────── internals ────────────────────

    fn fallback_sink(config: &JsonlConfig) -> Sink {
        if let Some(fallback) = &config.fallback_path
            && let Ok(sink) = Sink::open_file(fallback, true)
        {
            eprintln!(
                "[MSM-JSONL] event log unavailable, writing to {}",
                fallback.display()
            );
            return sink;
        }
        eprintln!("[MSM-JSONL] no writable event log, using stderr");
        Sink::Stderr
    }

    fn append(&mut self, line: &str) {
        let incoming = line.len() as u64;
        let needs_rotation = matches!(
            self.sink,
            Sink::File { len, .. } if len > 0 && len + incoming > self.config.max_size_bytes
        );
        if needs_rotation {
            self.rotate();
        }

        loop {
            match &mut self.sink {
                Sink::File { out, len, .. } => {
                    if out.write_all(line.as_bytes()).is_ok() {
                        *len += incoming;
                        return;
                    }
                    self.degrade();
                }
                Sink::Stderr => {
                    if io::stderr().write_all(format!("[MSM-JSONL] {line}").as_bytes()).is_ok() {
                        return;
                    }
                    self.degrade();
                }
                Sink::Discard => return,
            }
        }
    }

    /// Step one level down the chain: primary, fallback, stderr, discard.
    fn degrade(&mut self) {
        self.sink = match std::mem::replace(&mut self.sink, Sink::Discard) {
            Sink::File {
                is_fallback: false, ..
            } => Self::fallback_sink(&self.config),
            Sink::File {
                is_fallback: true, ..
            } => Sink::Stderr,
            Sink::Stderr | Sink::Discard => Sink::Discard,
        };
    }

    fn rotate(&mut self) {
        let Sink::File {
            path,
            mut out,
            is_fallback,
            ..
        } = std::mem::replace(&mut self.sink, Sink::Discard)
        else {
            return;
        };
        let _ = out.flush();
        drop(out);

        // Shift .N-1 to .N down to the live file to .1.
        for generation in (1..self.config.max_rotated_files).rev() {
            let _ = rename(
                rotated_name(&path, generation),
                rotated_name(&path, generation + 1),
            );
        }
        if self.config.max_rotated_files > 0 {
            let _ = rename(&path, rotated_name(&path, 1));
        } else {
            let _ = fs::remove_file(&path);
        }

        self.sink = match Sink::open_file(&path, is_fallback) {
            Ok(sink) => sink,
            Err(_) if is_fallback => Sink::Stderr,
            Err(_) => Self::fallback_sink(&self.config),
        };
    }
}

/// Append `entry` to an optional shared log.
pub fn log_event(log: Option<&EventLog>, entry: &LogEntry) {
    if let Some(log) = log {
        log.lock().write_entry(entry);
    }
}

// ──────────────────── helpers ────────────────────

/// Open or create a file for appending. Returns the file and its size.
fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| MsmError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| MsmError::io(path, source))?;
    let len = file.metadata().map_or(0, |meta| meta.len());
    Ok((file, len))
}

/// `events.jsonl` to `events.jsonl.3`.
fn rotated_name(base: &Path, generation: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{generation}"));
    PathBuf::from(name)
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
