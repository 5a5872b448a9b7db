//! Log setup: stdout plus three size-rotated files.
//!
//! * `events.log`   - target [`EVENTS`]
//! * `messages.log` - target [`MESSAGES`] (chat transcript)
//! * `errors.log`   - anything at ERROR level

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::{EnvFilter, LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

pub const EVENTS: &str = "events";
pub const MESSAGES: &str = "messages";

/// Append-only file that rolls over to `name.1 .. name.N` once it reaches
/// `max_bytes`. The oldest backup is dropped.
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    file: File,
    written: u64,
}

impl RotatingFile {
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64, backups: usize) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            max_bytes,
            backups,
            file,
            written,
        })
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.backups == 0 {
            self.file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)?;
            self.written = 0;
            return Ok(());
        }

        let oldest = self.backup_path(self.backups);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (1..self.backups).rev() {
            let from = self.backup_path(index);
            if from.exists() {
                fs::rename(&from, self.backup_path(index + 1))?;
            }
        }
        fs::rename(&self.path, self.backup_path(1))?;

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Keeps the background log writers alive; drop it last.
pub struct LogGuards {
    _guards: Vec<WorkerGuard>,
}

pub fn init(log_dir: &Path, max_bytes: u64, backups: usize) -> io::Result<LogGuards> {
    let open = |name: &str| RotatingFile::open(log_dir.join(name), max_bytes, backups);

    let (events_writer, events_guard) = tracing_appender::non_blocking(open("events.log")?);
    let (messages_writer, messages_guard) = tracing_appender::non_blocking(open("messages.log")?);
    let (errors_writer, errors_guard) = tracing_appender::non_blocking(open("errors.log")?);

    let events_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(events_writer)
        .with_filter(Targets::new().with_target(EVENTS, Level::INFO));
    let messages_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(messages_writer)
        .with_filter(Targets::new().with_target(MESSAGES, Level::INFO));
    let errors_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(errors_writer)
        .with_filter(LevelFilter::ERROR);
    let stdout_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(events_layer)
        .with(messages_layer)
        .with(errors_layer)
        .init();

    Ok(LogGuards {
        _guards: vec![events_guard, messages_guard, errors_guard],
    })
}
