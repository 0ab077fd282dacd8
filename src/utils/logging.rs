//! Logging Module
//!
//! Provides structured logging utilities using the `tracing` crate.
//! Supports various output formats and log levels for debugging and production use.

use std::time::Instant;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Create a verbose logging config for debugging
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: true,
            ansi_colors: true,
        }
    }

    /// Create a quiet logging config (errors only)
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }

    /// Create a production logging config
    pub fn production() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: false,
        }
    }

    /// Override the level
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Parse from a string, falling back to `Info` for unknown names
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Initialize logging with the given configuration
///
/// # Returns
/// * `Result<(), String>` - Ok if logging was initialized, Err with message otherwise
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.level.to_tracing_level())
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to initialize logging: {}", e))?;

    Ok(())
}

const MIB: f64 = 1024.0 * 1024.0;

/// Progress logger for a streamed artifact download
pub struct DownloadProgress {
    /// What is being downloaded
    label: String,
    /// Expected total size, when the server announced one
    total_bytes: Option<u64>,
    /// Bytes written so far
    downloaded: u64,
    /// Log every N bytes
    log_interval: u64,
    /// Next byte count at which to log
    next_log_at: u64,
    /// Start time
    start_time: Instant,
}

impl DownloadProgress {
    /// Create a new progress logger logging every 10 MiB
    pub fn new(label: &str, total_bytes: Option<u64>) -> Self {
        let log_interval = 10 * 1024 * 1024;
        Self {
            label: label.to_string(),
            total_bytes,
            downloaded: 0,
            log_interval,
            next_log_at: log_interval,
            start_time: Instant::now(),
        }
    }

    /// Create with custom log interval (bytes)
    pub fn with_interval(mut self, interval: u64) -> Self {
        self.log_interval = interval.max(1);
        self.next_log_at = self.log_interval;
        self
    }

    /// Bytes recorded so far
    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    /// Record a chunk that was written to disk
    pub fn advance(&mut self, chunk_len: usize) {
        self.downloaded += chunk_len as u64;

        if self.downloaded >= self.next_log_at {
            while self.next_log_at <= self.downloaded {
                self.next_log_at += self.log_interval;
            }

            match self.total_bytes {
                Some(total) if total > 0 => tracing::info!(
                    "{}: {:.1}MB / {:.1}MB ({:.1}%)",
                    self.label,
                    self.downloaded as f64 / MIB,
                    total as f64 / MIB,
                    100.0 * self.downloaded as f64 / total as f64
                ),
                _ => tracing::info!(
                    "{}: {:.1}MB downloaded",
                    self.label,
                    self.downloaded as f64 / MIB
                ),
            }
        }
    }

    /// Log completion
    pub fn finish(&self) {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            self.downloaded as f64 / MIB / elapsed
        } else {
            0.0
        };

        tracing::info!(
            "{}: completed {:.1}MB in {:.1}s ({:.1} MB/s)",
            self.label,
            self.downloaded as f64 / MIB,
            elapsed,
            rate
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::parse("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::parse("Warning"), LogLevel::Warn);
        assert_eq!(LogLevel::parse("unknown"), LogLevel::Info);
    }

    #[test]
    fn test_log_config_presets() {
        assert_eq!(LogConfig::default().level, LogLevel::Info);
        assert_eq!(LogConfig::verbose().level, LogLevel::Debug);
        assert!(!LogConfig::production().ansi_colors);
        assert_eq!(
            LogConfig::quiet().with_level(LogLevel::Warn).level,
            LogLevel::Warn
        );
    }

    #[test]
    fn test_download_progress_tracks_bytes() {
        let mut progress = DownloadProgress::new("model", Some(100)).with_interval(10);
        progress.advance(25);
        progress.advance(5);
        assert_eq!(progress.downloaded(), 30);
        assert_eq!(progress.next_log_at, 40);
    }
}
