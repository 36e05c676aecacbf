//! Pre-parsed script structure (spec.md §4.9), grounded on
//! `libbuild2/script/script.hxx`'s `line`/`command`/`command_pipe`
//! hierarchy: a script is pre-parsed once into a flat list of [`Line`]s
//! (control-flow directives interleaved with command pipelines) and that
//! list is then replayed, possibly many times, by the executor.

use std::collections::BTreeMap;
use std::time::Duration;

/// A value substitutable into a command line (`$name`, here-doc bodies).
pub type Variables = BTreeMap<String, String>;

/// How an expected exit code relates to the actual one
/// (`libbuild2/script/script.hxx`'s `command_exit`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitComparison {
    /// `==`
    Eq,
    /// `!=`
    Ne,
}

/// A command's expected termination (spec.md §4.9 "command (... exit)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandExit {
    pub comparison: ExitComparison,
    pub code: i32,
}

impl Default for CommandExit {
    fn default() -> Self {
        Self { comparison: ExitComparison::Eq, code: 0 }
    }
}

impl CommandExit {
    /// Whether an observed exit code satisfies this expectation.
    #[must_use]
    pub fn satisfied_by(&self, actual: i32) -> bool {
        match self.comparison {
            ExitComparison::Eq => actual == self.code,
            ExitComparison::Ne => actual != self.code,
        }
    }
}

/// The comparison mode of an output redirect (spec.md §4.9
/// "redirect_fmode").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectFileMode {
    /// Output is compared byte-for-byte (or line-for-line with regex)
    /// against the redirect's content; a mismatch fails the test.
    Compare,
    /// The redirect names a file to overwrite with the command's output.
    Overwrite,
    /// The redirect names a file to append the command's output to.
    Append,
}

/// One `in`/`out`/`err` redirect on a [`Command`] (spec.md §4.9
/// "redirect (... here-document/here-string, literal/regex)").
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Redirect {
    /// No redirect; descriptor is whatever the pipeline's neighbor
    /// provides, or the process default.
    #[default]
    None,
    /// `>|`/`<|` — pass through to the script's own stdin/stdout/stderr.
    Pass,
    /// `>!`/`<!` — bound to the null device.
    Null,
    /// Trace the command's invocation to diagnostics without capturing.
    Trace,
    /// `>&N`/`<&N` — merged with another descriptor of the same command.
    Merge(u8),
    /// `<'...'`/`>'...'` — a literal here-string.
    HereStringLiteral(String),
    /// A here-string whose content is matched as a regex.
    HereStringRegex(String),
    /// `<<EOF ... EOF` — a literal here-document body.
    HereDocLiteral { text: String, mode: RedirectFileMode },
    /// A here-document whose lines are each matched as a regex.
    HereDocRegex { pattern: String, mode: RedirectFileMode },
    /// `<<&fd` — here-document content is itself another redirect's
    /// content, referenced by the builtin's own index (rare; scripts
    /// using a named reference resolve it at pre-parse time into one of
    /// the other variants instead).
    HereDocRef(String),
    /// `<path`/`>path`/`>>path` — redirect to/from a real file.
    File { path: String, mode: RedirectFileMode },
}

/// When a cleanup registered by `&path` or a redirect runs (spec.md §4.9
/// "cleanup_type").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupType {
    /// Must exist after the command runs; removed unconditionally.
    Always,
    /// May or may not exist; removed if present, no error if absent.
    Maybe,
    /// Registered only to suppress the "unknown output" diagnostic; never
    /// removed by the script runner itself.
    Never,
}

/// A cleanup obligation a command line registers via a trailing `&path`.
#[derive(Debug, Clone, PartialEq)]
pub struct Cleanup {
    pub path: String,
    pub kind: CleanupType,
}

/// A single program invocation within a [`Pipeline`] (spec.md §4.9
/// "command").
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Command {
    pub program: String,
    pub arguments: Vec<String>,
    pub variables: Variables,
    pub cwd: Option<String>,
    pub timeout: Option<Duration>,
    /// Whether reaching the timeout counts as this command's success
    /// (rare; used for commands expected to be killed).
    pub timeout_is_success: bool,
    pub stdin: Redirect,
    pub stdout: Redirect,
    pub stderr: Redirect,
    pub cleanups: Vec<Cleanup>,
    pub exit: CommandExit,
}

/// Commands joined by `|` (spec.md §4.9 "command_pipe").
pub type Pipeline = Vec<Command>;

/// How two [`Pipeline`]s in an expression relate (spec.md §4.9
/// "expr_operator").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprOperator {
    LogOr,
    LogAnd,
}

/// One term of a `cmd1 && cmd2 || cmd3`-style expression.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprTerm {
    pub pipeline: Pipeline,
    /// The operator joining this term to the next, `None` for the last.
    pub operator: Option<ExprOperator>,
}

/// A full command expression: one or more pipelines joined by `&&`/`||`
/// (spec.md §4.9 "command_expr").
pub type CommandExpr = Vec<ExprTerm>;

/// The kind of a pre-parsed script line (spec.md §4.9 "line_type").
#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    /// `name = value` / `name =+ value` / `name += value`.
    Variable { name: String, value: String, append: bool, prepend: bool },
    /// A bare command expression (a test).
    Command(CommandExpr),
    /// `if <expr>`.
    If(CommandExpr),
    /// `if! <expr>` — negated.
    IfNot(CommandExpr),
    /// `elif <expr>`.
    Elif(CommandExpr),
    /// `elif! <expr>`.
    ElifNot(CommandExpr),
    /// `else`.
    Else,
    /// `while <expr>`.
    While(CommandExpr),
    /// `for x: a b c`.
    ForArgs { variable: String, values: Vec<String> },
    /// `for x <<< $cmd` — iterates lines of a command's output.
    ForStream { variable: String, source: CommandExpr },
    /// `end` — closes the nearest open `if`/`while`/`for`.
    End,
}

/// One pre-parsed line, with its source position retained for
/// diagnostics (spec.md §4.9 "a saved token stream suitable for
/// replay").
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub kind: LineKind,
    pub source_line: usize,
}
