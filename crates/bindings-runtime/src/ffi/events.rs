//! Boundary event logging
//!
//! Provides structured logging of library loads, bindings, native buffer
//! ownership and callback failures, so resource handling at the boundary can
//! be inspected after the fact.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Boundary event types
#[derive(Debug, Clone, PartialEq)]
pub enum BoundaryEvent {
    /// Library opened for the first time
    LibraryLoaded { path: PathBuf },
    /// Open request served from the process-wide registry
    LibraryReused { path: PathBuf },
    /// Library released
    LibraryClosed { path: PathBuf },
    /// System loader refused to unload the library
    CloseFailed { path: PathBuf, reason: String },
    /// Native symbol bound to a signature
    SymbolBound { symbol: String, signature: String },
    /// Exported global resolved
    GlobalResolved { symbol: String },
    /// Native allocation wrapped in an owning buffer
    BufferAcquired { symbol: String, count: usize },
    /// Native buffer released
    BufferReleased { address: usize, count: usize },
    /// Second release refused
    DoubleFreeRejected { address: usize },
    /// Release at drop time failed
    ReleaseFailed { address: usize, reason: String },
    /// Trampoline created
    CallbackCreated { signature: String },
    /// Local function behind a trampoline failed or panicked
    CallbackFailed { message: String },
    /// Call refused before reaching native code
    CallRejected { symbol: String, reason: String },
    /// Callback failure recorded outside any call, dropped before the next one
    FaultDiscarded { symbol: String, reason: String },
}

impl BoundaryEvent {
    /// Severity of this event
    pub fn severity(&self) -> Severity {
        match self {
            BoundaryEvent::DoubleFreeRejected { .. }
            | BoundaryEvent::CallRejected { .. }
            | BoundaryEvent::FaultDiscarded { .. } => Severity::Warning,
            BoundaryEvent::ReleaseFailed { .. }
            | BoundaryEvent::CloseFailed { .. }
            | BoundaryEvent::CallbackFailed { .. } => Severity::Error,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for BoundaryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundaryEvent::LibraryLoaded { path } => {
                write!(f, "Library loaded: {}", path.display())
            }
            BoundaryEvent::LibraryReused { path } => {
                write!(f, "Library reused: {}", path.display())
            }
            BoundaryEvent::LibraryClosed { path } => {
                write!(f, "Library closed: {}", path.display())
            }
            BoundaryEvent::CloseFailed { path, reason } => {
                write!(f, "Library close failed: {} - {}", path.display(), reason)
            }
            BoundaryEvent::SymbolBound { symbol, signature } => {
                write!(f, "Symbol bound: {} as {}", symbol, signature)
            }
            BoundaryEvent::GlobalResolved { symbol } => {
                write!(f, "Global resolved: {}", symbol)
            }
            BoundaryEvent::BufferAcquired { symbol, count } => {
                write!(f, "Buffer acquired from {} ({} elements)", symbol, count)
            }
            BoundaryEvent::BufferReleased { address, count } => {
                write!(f, "Buffer released: {:#x} ({} elements)", address, count)
            }
            BoundaryEvent::DoubleFreeRejected { address } => {
                write!(f, "Double release rejected: {:#x}", address)
            }
            BoundaryEvent::ReleaseFailed { address, reason } => {
                write!(f, "Release failed: {:#x} - {}", address, reason)
            }
            BoundaryEvent::CallbackCreated { signature } => {
                write!(f, "Callback created: {}", signature)
            }
            BoundaryEvent::CallbackFailed { message } => {
                write!(f, "Callback failed: {}", message)
            }
            BoundaryEvent::CallRejected { symbol, reason } => {
                write!(f, "Call rejected: {} - {}", symbol, reason)
            }
            BoundaryEvent::FaultDiscarded { symbol, reason } => {
                write!(f, "Stale callback fault dropped before {}: {}", symbol, reason)
            }
        }
    }
}

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    fn label(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }

    fn color(self) -> Color {
        match self {
            Severity::Info => Color::Cyan,
            Severity::Warning => Color::Yellow,
            Severity::Error => Color::Red,
        }
    }
}

impl From<bindings_config::LogLevel> for Severity {
    fn from(level: bindings_config::LogLevel) -> Self {
        match level {
            bindings_config::LogLevel::Info => Severity::Info,
            bindings_config::LogLevel::Warning => Severity::Warning,
            bindings_config::LogLevel::Error => Severity::Error,
        }
    }
}

/// Log entry with timestamp
#[derive(Debug, Clone)]
pub struct EventEntry {
    /// Event timestamp (UTC)
    pub timestamp: DateTime<Utc>,
    /// Boundary event
    pub event: BoundaryEvent,
}

impl EventEntry {
    /// Create a new entry stamped with the current time
    pub fn new(event: BoundaryEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }

    /// Format as log line
    pub fn to_log_line(&self) -> String {
        format!(
            "[{}] {}: {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.event.severity().label(),
            self.event
        )
    }
}

/// Event logger trait for customizable logging backends
pub trait EventLogger: Send + Sync {
    /// Log a boundary event
    fn log(&self, event: BoundaryEvent);

    /// Get all logged entries (for testing)
    fn entries(&self) -> Vec<EventEntry>;

    /// Clear all logged entries (for testing)
    fn clear(&self);
}

/// In-memory event logger
#[derive(Debug, Clone, Default)]
pub struct MemoryEventLogger {
    entries: Arc<Mutex<Vec<EventEntry>>>,
    min_severity: Option<Severity>,
}

impl MemoryEventLogger {
    /// Create a new in-memory event logger
    pub fn new() -> Self {
        Self::default()
    }

    /// Only keep events at or above `severity`
    pub fn with_min_severity(severity: Severity) -> Self {
        Self {
            entries: Arc::default(),
            min_severity: Some(severity),
        }
    }

    /// Logged events without timestamps
    pub fn events(&self) -> Vec<BoundaryEvent> {
        self.entries().into_iter().map(|e| e.event).collect()
    }
}

impl EventLogger for MemoryEventLogger {
    fn log(&self, event: BoundaryEvent) {
        if self.min_severity.map_or(false, |min| event.severity() < min) {
            return;
        }
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(EventEntry::new(event));
    }

    fn entries(&self) -> Vec<EventEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Null event logger (no-op)
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventLogger;

impl NullEventLogger {
    pub fn new() -> Self {
        Self
    }
}

impl EventLogger for NullEventLogger {
    fn log(&self, _event: BoundaryEvent) {
        // No-op
    }

    fn entries(&self) -> Vec<EventEntry> {
        Vec::new()
    }

    fn clear(&self) {
        // No-op
    }
}

/// Color mode for stderr output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    /// Always use colors
    Always,
    /// Never use colors
    Never,
    /// Auto-detect terminal capabilities
    Auto,
}

impl ColorMode {
    /// Resolve to a termcolor ColorChoice
    pub fn to_color_choice(self) -> ColorChoice {
        // Always respect NO_COLOR (https://no-color.org)
        if std::env::var("NO_COLOR").is_ok() {
            return ColorChoice::Never;
        }
        match self {
            ColorMode::Always => ColorChoice::Always,
            ColorMode::Never => ColorChoice::Never,
            ColorMode::Auto => ColorChoice::Auto,
        }
    }
}

/// Writes colored log lines to stderr
#[derive(Debug, Clone, Copy)]
pub struct StderrEventLogger {
    color_mode: ColorMode,
    min_severity: Severity,
}

impl StderrEventLogger {
    pub fn new(min_severity: Severity) -> Self {
        Self {
            color_mode: ColorMode::Auto,
            min_severity,
        }
    }

    pub fn with_color_mode(mut self, color_mode: ColorMode) -> Self {
        self.color_mode = color_mode;
        self
    }

    /// Write one entry to a WriteColor sink
    pub fn write_entry(&self, w: &mut impl WriteColor, entry: &EventEntry) -> std::io::Result<()> {
        let severity = entry.event.severity();
        write!(
            w,
            "[{}] ",
            entry.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
        )?;

        w.set_color(
            ColorSpec::new()
                .set_fg(Some(severity.color()))
                .set_bold(true),
        )?;
        write!(w, "{}", severity.label())?;
        w.reset()?;

        writeln!(w, ": {}", entry.event)
    }
}

impl EventLogger for StderrEventLogger {
    fn log(&self, event: BoundaryEvent) {
        if event.severity() < self.min_severity {
            return;
        }
        let mut stream = StandardStream::stderr(self.color_mode.to_color_choice());
        let _ = self.write_entry(&mut stream, &EventEntry::new(event));
    }

    fn entries(&self) -> Vec<EventEntry> {
        Vec::new()
    }

    fn clear(&self) {
        // No-op
    }
}
