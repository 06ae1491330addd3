//! # Error Handling
//!
//! Error types for the capture pipeline. The real-time path (`on_frame_rendered`
//! and everything it triggers) never returns these across a component boundary:
//! failures there are recovered locally, counted in the pipeline stats and
//! logged. `CaptureError` values surface only from construction, configuration
//! and device setup, or internally as the reason a tick was skipped.
//!
//! ## Error Classification
//!
//! - **Transient**: a GPU map that returned no data, a stale transfer slot, an
//!   exhausted pool. Skip the tick or fall back, then carry on.
//! - **Fatal**: invalid configuration or a device that cannot allocate its
//!   transfer slots. The pipeline cannot be built.
//!
//! ## Usage
//!
//! ```rust
//! use dualcam_capture::error::{CaptureError, ErrorSeverity};
//!
//! let error = CaptureError::map_failed(1).with_context("tick 42");
//! assert!(error.is_transient());
//! assert_eq!(error.severity(), ErrorSeverity::Warning);
//! ```

use std::{error::Error as StdError, fmt};

/// Severity levels for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Expected during normal operation (e.g. nothing pending on the first tick)
    Debug,
    /// Quality-of-service signal only
    Warning,
    /// Operation failed but the pipeline keeps running
    Error,
    /// Pipeline cannot be built or continue
    Fatal,
}

/// Base error type for the capture pipeline
#[derive(Debug)]
pub enum CaptureError {
    /// Configuration validation errors
    Config {
        field: String,
        value: String,
        reason: String,
        context: Option<String>,
    },
    /// GPU/device operation failures (allocation, read request)
    Device {
        operation: String,
        reason: String,
        context: Option<String>,
    },
    /// Mapping a transfer slot returned no data
    MapFailed { slot: usize, context: Option<String> },
    /// A transfer slot was issued under dimensions that no longer apply
    StaleSlot {
        slot: usize,
        generation: u64,
        context: Option<String>,
    },
    /// No pooled buffer available
    PoolExhausted {
        capacity: usize,
        context: Option<String>,
    },
    /// Colorspace conversion failure
    Conversion {
        source: cap_yuv::ConvertError,
        context: Option<String>,
    },
    /// Sink rejected or failed to accept a frame
    Sink {
        reason: String,
        context: Option<String>,
    },
    /// Worker or transmission thread failures
    Worker {
        thread: String,
        reason: String,
        context: Option<String>,
    },
    /// I/O errors
    Io {
        operation: String,
        source: std::io::Error,
        context: Option<String>,
    },
}

impl CaptureError {
    pub fn config(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Config {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
            context: None,
        }
    }

    pub fn device(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Device {
            operation: operation.into(),
            reason: reason.into(),
            context: None,
        }
    }

    pub fn map_failed(slot: usize) -> Self {
        Self::MapFailed { slot, context: None }
    }

    pub fn stale_slot(slot: usize, generation: u64) -> Self {
        Self::StaleSlot {
            slot,
            generation,
            context: None,
        }
    }

    pub fn pool_exhausted(capacity: usize) -> Self {
        Self::PoolExhausted {
            capacity,
            context: None,
        }
    }

    pub fn sink(reason: impl Into<String>) -> Self {
        Self::Sink {
            reason: reason.into(),
            context: None,
        }
    }

    pub fn worker(thread: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Worker {
            thread: thread.into(),
            reason: reason.into(),
            context: None,
        }
    }

    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
            context: None,
        }
    }

    /// Attach a free-form context string
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        *self.context_mut() = Some(context.into());
        self
    }

    pub fn context(&self) -> Option<&str> {
        match self {
            Self::Config { context, .. }
            | Self::Device { context, .. }
            | Self::MapFailed { context, .. }
            | Self::StaleSlot { context, .. }
            | Self::PoolExhausted { context, .. }
            | Self::Conversion { context, .. }
            | Self::Sink { context, .. }
            | Self::Worker { context, .. }
            | Self::Io { context, .. } => context.as_deref(),
        }
    }

    fn context_mut(&mut self) -> &mut Option<String> {
        match self {
            Self::Config { context, .. }
            | Self::Device { context, .. }
            | Self::MapFailed { context, .. }
            | Self::StaleSlot { context, .. }
            | Self::PoolExhausted { context, .. }
            | Self::Conversion { context, .. }
            | Self::Sink { context, .. }
            | Self::Worker { context, .. }
            | Self::Io { context, .. } => context,
        }
    }

    /// Short category name, used as a structured log field
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Device { .. } => "device",
            Self::MapFailed { .. } => "map_failed",
            Self::StaleSlot { .. } => "stale_slot",
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::Conversion { .. } => "conversion",
            Self::Sink { .. } => "sink",
            Self::Worker { .. } => "worker",
            Self::Io { .. } => "io",
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::StaleSlot { .. } | Self::PoolExhausted { .. } => ErrorSeverity::Debug,
            Self::MapFailed { .. } | Self::Sink { .. } => ErrorSeverity::Warning,
            Self::Device { .. } | Self::Conversion { .. } | Self::Io { .. } => {
                ErrorSeverity::Error
            }
            Self::Config { .. } | Self::Worker { .. } => ErrorSeverity::Fatal,
        }
    }

    /// Whether skipping the current frame is the whole recovery
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::MapFailed { .. }
                | Self::StaleSlot { .. }
                | Self::PoolExhausted { .. }
                | Self::Sink { .. }
        )
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config {
                field,
                value,
                reason,
                ..
            } => write!(f, "invalid config {}={}: {}", field, value, reason)?,
            Self::Device {
                operation, reason, ..
            } => write!(f, "device {} failed: {}", operation, reason)?,
            Self::MapFailed { slot, .. } => {
                write!(f, "transfer slot {} could not be mapped", slot)?
            }
            Self::StaleSlot {
                slot, generation, ..
            } => write!(
                f,
                "transfer slot {} belongs to generation {} and was discarded",
                slot, generation
            )?,
            Self::PoolExhausted { capacity, .. } => {
                write!(f, "buffer pool exhausted (capacity {})", capacity)?
            }
            Self::Conversion { source, .. } => write!(f, "conversion failed: {}", source)?,
            Self::Sink { reason, .. } => write!(f, "sink error: {}", reason)?,
            Self::Worker { thread, reason, .. } => {
                write!(f, "{} thread error: {}", thread, reason)?
            }
            Self::Io {
                operation, source, ..
            } => write!(f, "I/O error during {}: {}", operation, source)?,
        }
        if let Some(context) = self.context() {
            write!(f, " ({})", context)?;
        }
        Ok(())
    }
}

impl StdError for CaptureError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Conversion { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result type alias for convenience
pub type CaptureResult<T> = Result<T, CaptureError>;

impl From<std::io::Error> for CaptureError {
    fn from(error: std::io::Error) -> Self {
        Self::io("unknown", error)
    }
}

impl From<cap_yuv::ConvertError> for CaptureError {
    fn from(error: cap_yuv::ConvertError) -> Self {
        Self::Conversion {
            source: error,
            context: None,
        }
    }
}

/// Classification helpers used by the logging paths
pub mod classify {
    use super::{CaptureError, ErrorSeverity};
    use tracing::{debug, error, warn};

    pub fn is_fatal(error: &CaptureError) -> bool {
        error.severity() == ErrorSeverity::Fatal
    }

    /// Lower value means the error is more urgent
    pub fn priority(error: &CaptureError) -> u8 {
        match error.severity() {
            ErrorSeverity::Fatal => 0,
            ErrorSeverity::Error => 1,
            ErrorSeverity::Warning => 2,
            ErrorSeverity::Debug => 3,
        }
    }

    /// Logs `err` at the level its severity maps to and returns that severity.
    pub fn report(err: &CaptureError, message: &str) -> ErrorSeverity {
        let severity = err.severity();
        let category = err.category();
        let transient = err.is_transient();
        match severity {
            ErrorSeverity::Debug => debug!(category, transient, error = %err, "{}", message),
            ErrorSeverity::Warning => warn!(category, transient, error = %err, "{}", message),
            ErrorSeverity::Error => error!(category, transient, error = %err, "{}", message),
            ErrorSeverity::Fatal => error!(
                category,
                fatal = true,
                priority = priority(err),
                error = %err,
                "{}",
                message
            ),
        }
        severity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = CaptureError::config("queue_capacity", "0", "must be at least 1");
        assert_eq!(error.category(), "config");
        assert!(!error.is_transient());
        assert!(classify::is_fatal(&error));
        assert_eq!(
            error.to_string(),
            "invalid config queue_capacity=0: must be at least 1"
        );
    }

    #[test]
    fn test_error_with_context() {
        let error = CaptureError::map_failed(1).with_context("tick 7");
        assert_eq!(error.context(), Some("tick 7"));
        assert_eq!(error.to_string(), "transfer slot 1 could not be mapped (tick 7)");
    }

    #[test]
    fn test_error_classification() {
        assert!(CaptureError::stale_slot(0, 3).is_transient());
        assert!(CaptureError::pool_exhausted(3).is_transient());
        assert!(!CaptureError::device("allocate", "out of memory").is_transient());
        assert!(
            classify::priority(&CaptureError::worker("convert", "spawn failed"))
                < classify::priority(&CaptureError::map_failed(0))
        );
    }

    #[test]
    fn test_conversion_error_source() {
        let error: CaptureError = cap_yuv::ConvertError::OutputTooSmall {
            expected: 24,
            actual: 0,
        }
        .into();
        assert_eq!(error.category(), "conversion");
        assert!(error.source().is_some());
    }

    #[test]
    fn test_report_returns_severity_level() {
        let stale = CaptureError::stale_slot(1, 2);
        assert_eq!(classify::report(&stale, "discarding"), ErrorSeverity::Debug);
        let map = CaptureError::map_failed(0);
        assert_eq!(classify::report(&map, "skipping frame"), ErrorSeverity::Warning);
        let config = CaptureError::config("slot_count", "1", "too few");
        assert_eq!(classify::report(&config, "rejected"), ErrorSeverity::Fatal);
    }

    #[test]
    fn test_pool_exhaustion_is_quiet() {
        let error: CaptureError = crate::core::buffer_pool::PoolExhausted { capacity: 3 }.into();
        assert_eq!(error.category(), "pool_exhausted");
        assert_eq!(error.severity(), ErrorSeverity::Debug);
        assert!(error.is_transient());
    }
}
