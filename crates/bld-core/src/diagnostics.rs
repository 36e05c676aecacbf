//! Diagnostics: structured build errors with a location stack (spec.md
//! §7 "Diagnostics").
//!
//! Every error surfaced to the user carries a severity, a message, and a
//! chain of "while ..." frames (the file/line a buildfile construct was
//! read from, the target an error occurred building, the recipe command
//! that failed) so a failure deep in a recipe still points back to the
//! buildfile line that caused it.

use std::fmt;
use std::path::PathBuf;

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational; never fails the build.
    Info,
    /// A warning; does not fail the build unless `--warn-error` is set.
    Warn,
    /// An error; fails the current operation for the target it is
    /// attached to (and the whole build, unless `--keep-going` allows
    /// siblings to continue).
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warn => "warning",
            Severity::Error => "error",
        })
    }
}

/// A position in a buildfile (spec.md §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// The file this location is in.
    pub file: PathBuf,
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.column)
    }
}

/// One frame of a diagnostic's "while" chain, innermost first (spec.md
/// §7: "a failure inside a recipe command is reported with a frame stack
/// tracing back to the buildfile rule that applied it").
#[derive(Debug, Clone)]
pub enum Frame {
    /// `while parsing buildfile <loc>`.
    Parsing(Location),
    /// `while matching rule for <target>`.
    MatchingRule(String),
    /// `while applying rule <rule> to <target>`.
    ApplyingRule { rule: String, target: String },
    /// `while executing recipe for <target>`.
    Executing(String),
    /// `while running command: <command line>` (script engine).
    RunningCommand(String),
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Parsing(loc) => write!(f, "while parsing {loc}"),
            Frame::MatchingRule(t) => write!(f, "while matching a rule for {t}"),
            Frame::ApplyingRule { rule, target } => {
                write!(f, "while applying rule {rule} to {target}")
            }
            Frame::Executing(t) => write!(f, "while executing the recipe for {t}"),
            Frame::RunningCommand(c) => write!(f, "while running: {c}"),
        }
    }
}

/// A diagnostic with its location and frame stack.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Severity.
    pub severity: Severity,
    /// The message text, one line, no trailing punctuation.
    pub message: String,
    /// Where in a buildfile this diagnostic originates, if applicable.
    pub location: Option<Location>,
    /// "While ..." frames, innermost first.
    pub frames: Vec<Frame>,
}

impl Diagnostic {
    /// Build a bare error with no location or frames.
    pub fn error(message: impl Into<String>) -> Self {
        Self { severity: Severity::Error, message: message.into(), location: None, frames: Vec::new() }
    }

    /// Build a bare warning.
    pub fn warn(message: impl Into<String>) -> Self {
        Self { severity: Severity::Warn, message: message.into(), location: None, frames: Vec::new() }
    }

    /// Build a bare informational message (never fails the build).
    pub fn info(message: impl Into<String>) -> Self {
        Self { severity: Severity::Info, message: message.into(), location: None, frames: Vec::new() }
    }

    /// Attach a source location.
    #[must_use]
    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Push a frame (innermost-first ordering is the caller's
    /// responsibility: push as the error propagates outward).
    #[must_use]
    pub fn with_frame(mut self, frame: Frame) -> Self {
        self.frames.push(frame);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(loc) = &self.location {
            write!(f, "{loc}: ")?;
        }
        write!(f, "{}: {}", self.severity, self.message)?;
        for frame in &self.frames {
            write!(f, "\n  {frame}")?;
        }
        Ok(())
    }
}

/// Accumulates diagnostics across an operation so `--keep-going` builds
/// can report every failure instead of stopping at the first (spec.md §7
/// "Diagnostics": "errors accumulate rather than aborting the process
/// outright unless the failure count exceeds a configured limit").
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    entries: std::sync::Mutex<Vec<Diagnostic>>,
}

impl DiagnosticSink {
    /// A fresh, empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diagnostic. Errors are also emitted via `tracing::error!`
    /// immediately (so a long-running build surfaces failures as they
    /// happen, not only at the end).
    pub fn push(&self, diag: Diagnostic) {
        match diag.severity {
            Severity::Error => tracing::error!("{diag}"),
            Severity::Warn => tracing::warn!("{diag}"),
            Severity::Info => tracing::info!("{diag}"),
        }
        self.entries.lock().unwrap().push(diag);
    }

    /// Number of `Error`-severity diagnostics recorded so far.
    pub fn error_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    /// `true` if any error has been recorded.
    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    /// Snapshot of every diagnostic recorded, in order.
    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_counts_only_errors() {
        let sink = DiagnosticSink::new();
        sink.push(Diagnostic::warn("careful"));
        sink.push(Diagnostic::error("boom"));
        assert_eq!(sink.error_count(), 1);
        assert!(sink.has_errors());
        assert_eq!(sink.entries().len(), 2);
    }

    #[test]
    fn diagnostic_display_includes_frames() {
        let d = Diagnostic::error("command failed")
            .with_frame(Frame::Executing("exe{hello}".into()))
            .with_frame(Frame::RunningCommand("cxx -c foo.cxx".into()));
        let s = d.to_string();
        assert!(s.contains("while executing"));
        assert!(s.contains("while running"));
    }
}
