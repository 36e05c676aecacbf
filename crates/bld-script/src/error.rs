//! Error types for the script engine (spec.md §7 "filesystem"/"execute"
//! categories, narrowed to what a testscript run can itself fail at).

/// Error pre-parsing a testscript/shellscript file into [`crate::ast::Line`]s
/// (spec.md §4.9 "pre-parse validates structure only").
#[derive(Debug, thiserror::Error)]
pub enum PreparseError {
    /// A directive or here-doc/here-string redirect was malformed.
    #[error("{line}:{column}: {message}")]
    Syntax {
        /// 1-based line number.
        line: usize,
        /// 1-based column.
        column: usize,
        /// Human-readable description.
        message: String,
    },
    /// An `if`/`while`/`for` had no matching `end`.
    #[error("unterminated {keyword} starting at line {line}")]
    Unterminated {
        /// The directive that opened the block.
        keyword: &'static str,
        /// The line it opened on.
        line: usize,
    },
    /// A here-document's end marker was never found.
    #[error("unterminated here-document, expected closing `{marker}`")]
    UnterminatedHeredoc {
        /// The marker that was never seen.
        marker: String,
    },
    /// `shellscript.syntax` named an unsupported version.
    #[error("unsupported shellscript.syntax version {0} (minimum 2)")]
    UnsupportedSyntax(u32),
}

/// Error executing a pre-parsed script against a live [`crate::scope::ScriptScope`]
/// tree (spec.md §4.9 "Execute").
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error(transparent)]
    Preparse(#[from] PreparseError),
    /// A command's expected exit code did not match.
    #[error("{program}: exited with {actual}, expected {expected}")]
    ExitCode {
        /// The program name (for diagnostics).
        program: String,
        /// The comparison that failed (`== N` / `!= N`).
        expected: String,
        /// The actual exit code observed.
        actual: i32,
    },
    /// A child process was killed by a signal (always a failure regardless
    /// of the command's declared exit expectation, spec.md §8 "Boundary
    /// behaviour").
    #[error("{program}: terminated by signal")]
    Signaled {
        /// The program name.
        program: String,
    },
    /// A command (or the test it belongs to) exceeded its composed
    /// deadline (spec.md §4.9 "Timeouts compose by earliest deadline").
    #[error("{program}: timed out after {secs}s")]
    Timeout {
        /// The program name.
        program: String,
        /// The timeout that was exceeded, in seconds.
        secs: u64,
    },
    /// A redirect (here-doc/here-string/file) did not match what the
    /// command produced.
    #[error("output does not match expected {kind}")]
    RedirectMismatch {
        /// The redirect kind that failed to match (`"stdout"`, `"stderr"`).
        kind: &'static str,
    },
    /// Resolving the program named by a command failed (neither a builtin
    /// nor found on `PATH`).
    #[error("{0}: command not found")]
    ProgramNotFound(String),
    /// An I/O error launching a process or handling a redirect/cleanup.
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted.
        context: String,
        #[source]
        source: std::io::Error,
    },
    /// An invalid regex pattern in a `here_doc_regex`/`here_str_regex`
    /// redirect.
    #[error(transparent)]
    Regex(#[from] regex::Error),
}
