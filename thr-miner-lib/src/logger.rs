use std::{
    fmt::Display,
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use chrono::{DateTime, Local};
use colored::*;
use log::{Level, LevelFilter, Log as LogTrait, Metadata, Record};
use once_cell::sync::OnceCell;
use thiserror::Error;

/// Severity levels for logging, mapped onto the log crate's levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSeverity {
    Debug,
    Info,
    Warn,
    Error,
    Bug,
}

impl From<Level> for LogSeverity {
    fn from(level: Level) -> Self {
        match level {
            Level::Error => LogSeverity::Error,
            Level::Warn => LogSeverity::Warn,
            Level::Info => LogSeverity::Info,
            Level::Debug | Level::Trace => LogSeverity::Debug,
        }
    }
}

impl From<LogSeverity> for Level {
    fn from(severity: LogSeverity) -> Self {
        match severity {
            LogSeverity::Debug => Level::Debug,
            LogSeverity::Info => Level::Info,
            LogSeverity::Warn => Level::Warn,
            LogSeverity::Error | LogSeverity::Bug => Level::Error,
        }
    }
}

/// A log entry containing a message, severity level, tag and timestamp
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub msg: String,
    pub severity: LogSeverity,
    pub timestamp: DateTime<Local>,
    pub tag: String,
}

impl Display for LogRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = format!("{:<9}", self.tag).bold();
        let tag_colored = match self.tag.to_lowercase().as_str() {
            "status" => tag.bright_cyan(),
            "miner" => tag.bright_yellow(),
            "chain" => tag.bright_green(),
            "hashrate" => tag.bright_magenta(),
            "share" => tag.bright_blue(),
            "shutdown" => tag.bright_red(),
            _ => tag.white(),
        };
        let level_colored = match self.severity {
            LogSeverity::Debug => "Debug".dimmed(),
            LogSeverity::Info => "Info".bright_white(),
            LogSeverity::Warn => "Warn".yellow(),
            LogSeverity::Error => "Error".red(),
            LogSeverity::Bug => "Bug".magenta(),
        };
        write!(
            f,
            "[{}] [{}] [{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            tag_colored,
            level_colored,
            self.msg
        )
    }
}

/// An entry for tracking hashrate with a timestamp
#[derive(Debug, Clone)]
pub struct HashrateEntry {
    pub hashrate: f64,
    pub timestamp: DateTime<Local>,
}

impl Display for HashrateEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} Hashrate {:.3} kH/s",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.hashrate / 1_000.0
        )
    }
}

/// Errors that can occur during logging operations
#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to acquire lock: {0}")]
    LockError(String),

    #[error("Failed to set logger: {0}")]
    SetLogger(String),
}

/// Configuration for the logger
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Whether to log to stdout
    pub console_output: bool,

    /// Whether to log to a file
    pub file_output: bool,

    /// Path to the log file (if file_output is true)
    pub log_file_path: Option<PathBuf>,

    /// Maximum number of log entries to keep in memory
    pub max_log_entries: usize,

    /// Maximum number of hashrate entries to keep in memory
    pub max_hashrate_entries: usize,

    /// Minimum log level to record
    pub level: LevelFilter,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            console_output: true,
            file_output: false,
            log_file_path: None,
            max_log_entries: 1000,
            max_hashrate_entries: 1000,
            level: LevelFilter::Info,
        }
    }
}

pub struct Logger {
    logs: RwLock<Vec<LogRecord>>,
    hashrates: RwLock<Vec<HashrateEntry>>,
    config: RwLock<LoggerConfig>,
    file: RwLock<Option<File>>,
}

fn open_log_file(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Logger {
    /// Create a new logger, opening the log file if file output is enabled
    pub fn new(config: LoggerConfig) -> Result<Arc<Self>, LoggerError> {
        let file = match (&config.log_file_path, config.file_output) {
            (Some(path), true) => Some(open_log_file(path)?),
            _ => None,
        };
        Ok(Self::with_file(config, file))
    }

    /// Create a logger that never touches the filesystem
    pub fn in_memory(config: LoggerConfig) -> Arc<Self> {
        Self::with_file(
            LoggerConfig {
                file_output: false,
                log_file_path: None,
                ..config
            },
            None,
        )
    }

    fn with_file(config: LoggerConfig, file: Option<File>) -> Arc<Self> {
        Arc::new(Self {
            logs: RwLock::new(Vec::with_capacity(config.max_log_entries)),
            hashrates: RwLock::new(Vec::with_capacity(config.max_hashrate_entries)),
            config: RwLock::new(config),
            file: RwLock::new(file),
        })
    }

    /// Install the logger as the sink of the log crate
    pub fn init(logger: Arc<Logger>) -> Result<(), LoggerError> {
        let level = logger
            .config
            .read()
            .map_err(|e| LoggerError::LockError(e.to_string()))?
            .level;

        log::set_max_level(level);
        log::set_logger(Box::leak(Box::new(LoggerWrapper(logger))))
            .map_err(|e| LoggerError::SetLogger(e.to_string()))
    }

    fn enabled(&self, severity: LogSeverity) -> bool {
        match self.config.read() {
            Ok(config) => Level::from(severity) <= config.level,
            Err(_) => true,
        }
    }

    pub fn log(&self, record: LogRecord) {
        if !self.enabled(record.severity) {
            return;
        }

        if let Ok(config) = self.config.read() {
            if config.console_output {
                println!("{}", record);
            }
            if config.file_output {
                if let Ok(mut file_guard) = self.file.write() {
                    if let Some(file) = file_guard.as_mut() {
                        let _ = writeln!(file, "{}", record);
                        let _ = file.flush();
                    }
                }
            }
        }

        if let Ok(mut logs) = self.logs.write() {
            logs.push(record);
            if let Ok(config) = self.config.read() {
                trim_front(&mut logs, config.max_log_entries);
            }
        }
    }

    pub fn log_str(&self, msg: impl ToString, severity: LogSeverity, tag: Option<&str>) {
        self.log(LogRecord {
            msg: msg.to_string(),
            severity,
            timestamp: Local::now(),
            tag: tag.unwrap_or("General").to_string(),
        });
    }

    pub fn get_logs(&self) -> Vec<LogRecord> {
        self.logs.read().map(|logs| logs.clone()).unwrap_or_default()
    }

    pub fn get_logs_and_clear(&self) -> Vec<LogRecord> {
        self.logs
            .write()
            .map(|mut logs| logs.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn report_hashrate(&self, hashrate: f64) {
        let entry = HashrateEntry {
            hashrate,
            timestamp: Local::now(),
        };
        if let Ok(mut hashrates) = self.hashrates.write() {
            hashrates.push(entry);
            if let Ok(config) = self.config.read() {
                trim_front(&mut hashrates, config.max_hashrate_entries);
            }
        }
    }

    pub fn hashrates(&self) -> Vec<HashrateEntry> {
        self.hashrates.read().map(|h| h.clone()).unwrap_or_default()
    }
}

fn trim_front<T>(entries: &mut Vec<T>, max: usize) {
    if entries.len() > max {
        let excess = entries.len() - max;
        entries.drain(0..excess);
    }
}

/// Cheap handle to a logger, passed to the driver and the search workers
#[derive(Clone)]
pub struct Log {
    inner: Arc<Logger>,
}

impl Log {
    /// Uses the global logger, or a console logger if none was installed
    pub fn new() -> Self {
        let inner = GLOBAL_LOGGER
            .get()
            .cloned()
            .unwrap_or_else(|| Logger::in_memory(LoggerConfig::default()));
        Self { inner }
    }

    pub fn from_logger(logger: Arc<Logger>) -> Self {
        Self { inner: logger }
    }

    pub fn logger(&self) -> &Arc<Logger> {
        &self.inner
    }

    pub fn log_str(&self, msg: impl ToString, severity: LogSeverity, tag: Option<&str>) {
        self.inner.log_str(msg, severity, tag);
    }

    pub fn debug(&self, msg: impl ToString, tag: Option<&str>) {
        self.inner.log_str(msg, LogSeverity::Debug, tag);
    }

    pub fn info(&self, msg: impl ToString, tag: Option<&str>) {
        self.inner.log_str(msg, LogSeverity::Info, tag);
    }

    pub fn warn(&self, msg: impl ToString, tag: Option<&str>) {
        self.inner.log_str(msg, LogSeverity::Warn, tag);
    }

    pub fn error(&self, msg: impl ToString, tag: Option<&str>) {
        self.inner.log_str(msg, LogSeverity::Error, tag);
    }

    pub fn bug(&self, msg: impl ToString, tag: Option<&str>) {
        self.inner.log_str(msg, LogSeverity::Bug, tag);
    }

    pub fn report_hashrate(&self, hashrate: f64) {
        self.inner.report_hashrate(hashrate);
    }

    pub fn hashrates(&self) -> Vec<HashrateEntry> {
        self.inner.hashrates()
    }
}

impl Default for Log {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes `log::info!` and friends into a [`Logger`]
struct LoggerWrapper(Arc<Logger>);

impl LogTrait for LoggerWrapper {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.0.enabled(LogSeverity::from(metadata.level()))
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.0.log(LogRecord {
                msg: record.args().to_string(),
                severity: LogSeverity::from(record.level()),
                timestamp: Local::now(),
                tag: "General".to_string(),
            });
        }
    }

    fn flush(&self) {
        if let Ok(file_guard) = self.0.file.read() {
            if let Some(file) = file_guard.as_ref() {
                let _ = file.sync_all();
            }
        }
    }
}

static GLOBAL_LOGGER: OnceCell<Arc<Logger>> = OnceCell::new();

/// Initialize the global logger with custom configuration
pub fn init_global_logger(config: LoggerConfig) -> Result<Arc<Logger>, LoggerError> {
    let logger = Logger::new(config)?;
    Logger::init(Arc::clone(&logger))?;
    let _ = GLOBAL_LOGGER.set(Arc::clone(&logger));
    Ok(logger)
}
