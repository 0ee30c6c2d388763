//! Severity-tagged event stream (§6.3).
//!
//! The core emits diagnostics through a [`LogSink`] trait object rather
//! than printing directly; persistence (a rotating file in a per-user
//! temp directory) and console mirroring are the sink implementation's
//! responsibility, not the core's. The `Console` mode mirrors events
//! through the `log` crate's macros, reusing the logging facade already
//! declared in the workspace dependency table.

#[cfg(not(feature = "std"))]
use alloc::string::String;
#[cfg(feature = "std")]
use std::string::String;

/// Event severity, per §6.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
    FatalError,
}

impl Severity {
    /// Map to the `log` crate's level (there is no `FatalError` level in
    /// `log`; it is mirrored as `Error`, same as the source format's
    /// documented behavior).
    pub const fn to_log_level(self) -> ::log::Level {
        match self {
            Severity::Info => ::log::Level::Info,
            Severity::Warning => ::log::Level::Warn,
            Severity::Error | Severity::FatalError => ::log::Level::Error,
        }
    }
}

/// A single diagnostic event.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub severity: Severity,
    pub message: String,
}

impl LogEvent {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self { severity, message: message.into() }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(Severity::FatalError, message)
    }
}

/// Output mode for a sink (§6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputMode {
    Console,
    Silent,
}

/// Something that can receive [`LogEvent`]s. Passes hold a `&dyn LogSink`
/// (or `&mut`) and never know about the concrete destination — matching
/// the "recover locally, log, continue" propagation policy of §7.
pub trait LogSink {
    fn emit(&mut self, event: LogEvent);
    fn mode(&self) -> OutputMode;
}

/// Mirrors every event through the `log` crate; a no-op under
/// [`OutputMode::Silent`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn emit(&mut self, event: LogEvent) {
        ::log::log!(event.severity.to_log_level(), "{}", event.message);
    }

    fn mode(&self) -> OutputMode {
        OutputMode::Console
    }
}

/// Drops every event. Used in tests and in headless pipeline runs where
/// the caller only wants the returned validity flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentSink;

impl LogSink for SilentSink {
    fn emit(&mut self, _event: LogEvent) {}

    fn mode(&self) -> OutputMode {
        OutputMode::Silent
    }
}

/// A sink that retains every event it receives, for tests and for callers
/// (e.g. a GUI) that want to replay diagnostics after a pass completes.
#[cfg(feature = "std")]
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    pub events: std::vec::Vec<LogEvent>,
}

#[cfg(feature = "std")]
impl LogSink for RecordingSink {
    fn emit(&mut self, event: LogEvent) {
        self.events.push(event);
    }

    fn mode(&self) -> OutputMode {
        OutputMode::Console
    }
}
