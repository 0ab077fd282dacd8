//! Utilities module for logging, error handling, and formatting helpers

pub mod error;
pub mod logging;

// Re-export main types for convenience
pub use error::{DermaError, Result, ResultExt};
pub use logging::{init_logging, DownloadProgress, LogConfig, LogLevel};

/// Round a value to a fixed number of decimal places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Format a byte count in a human-readable way
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{}B", bytes)
    } else if b < KB * KB {
        format!("{:.1}KB", b / KB)
    } else if b < KB * KB * KB {
        format!("{:.1}MB", b / (KB * KB))
    } else {
        format!("{:.2}GB", b / (KB * KB * KB))
    }
}
