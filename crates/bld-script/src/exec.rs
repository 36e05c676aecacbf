//! Executes a pre-parsed script against a live [`ScriptScope`] tree
//! (spec.md §4.9 "Execute"), grounded on `libbuild2/script/runner.cxx`'s
//! command-pipeline execution and `parser.cxx`'s control-flow handling.
//!
//! The flat [`Line`] list the pre-parser produces is restructured once,
//! here, into a small block tree (`Stmt`) before interpretation — this
//! keeps the control-flow walk a straightforward recursive descent
//! instead of re-deriving block boundaries by scanning forward on every
//! `if`/`while` evaluation.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command as TokioCommand;

use crate::ast::{
    Cleanup, CleanupType, Command, CommandExpr, ExprOperator, Line, LineKind, Pipeline, Redirect,
    RedirectFileMode,
};
use crate::error::ExecError;
use crate::scope::{ScopeKind, ScriptScope};

/// A structured block of pre-parsed lines, ready for interpretation.
enum Stmt {
    Variable { name: String, value: String, append: bool, prepend: bool },
    Test { expr: CommandExpr, source_line: usize },
    If { branches: Vec<IfBranch>, else_branch: Option<Vec<Stmt>> },
    While { cond: CommandExpr, negate: bool, body: Vec<Stmt> },
    ForArgs { variable: String, values: Vec<String>, body: Vec<Stmt> },
    ForStream { variable: String, source: CommandExpr, body: Vec<Stmt> },
}

struct IfBranch {
    cond: CommandExpr,
    negate: bool,
    body: Vec<Stmt>,
}

/// Restructures a flat pre-parsed line list into a block tree.
fn structure(lines: &[Line]) -> Result<Vec<Stmt>, ExecError> {
    let mut iter = lines.iter().peekable();
    let mut out = Vec::new();
    structure_into(&mut iter, &mut out)?;
    Ok(out)
}

fn structure_into<'a, I>(iter: &mut std::iter::Peekable<I>, out: &mut Vec<Stmt>) -> Result<(), ExecError>
where
    I: Iterator<Item = &'a Line>,
{
    while let Some(line) = iter.peek().copied() {
        match &line.kind {
            LineKind::End | LineKind::Else => return Ok(()),
            LineKind::Variable { name, value, append, prepend } => {
                iter.next();
                out.push(Stmt::Variable {
                    name: name.clone(),
                    value: value.clone(),
                    append: *append,
                    prepend: *prepend,
                });
            }
            LineKind::Command(expr) => {
                iter.next();
                out.push(Stmt::Test { expr: expr.clone(), source_line: line.source_line });
            }
            LineKind::If(cond) | LineKind::IfNot(cond) => {
                let negate = matches!(line.kind, LineKind::IfNot(_));
                iter.next();
                let mut branches = vec![read_branch(iter, cond.clone(), negate)?];
                loop {
                    match iter.peek().map(|l| &l.kind) {
                        Some(LineKind::Elif(c) | LineKind::ElifNot(c)) => {
                            let c = c.clone();
                            let neg = matches!(iter.peek().unwrap().kind, LineKind::ElifNot(_));
                            iter.next();
                            branches.push(read_branch(iter, c, neg)?);
                        }
                        _ => break,
                    }
                }
                let else_branch = if matches!(iter.peek().map(|l| &l.kind), Some(LineKind::Else)) {
                    iter.next();
                    let mut body = Vec::new();
                    structure_into(iter, &mut body)?;
                    Some(body)
                } else {
                    None
                };
                expect_end(iter)?;
                out.push(Stmt::If { branches, else_branch });
            }
            LineKind::While(cond) => {
                iter.next();
                let mut body = Vec::new();
                structure_into(iter, &mut body)?;
                expect_end(iter)?;
                out.push(Stmt::While { cond: cond.clone(), negate: false, body });
            }
            LineKind::ForArgs { variable, values } => {
                let (variable, values) = (variable.clone(), values.clone());
                iter.next();
                let mut body = Vec::new();
                structure_into(iter, &mut body)?;
                expect_end(iter)?;
                out.push(Stmt::ForArgs { variable, values, body });
            }
            LineKind::ForStream { variable, source } => {
                let (variable, source) = (variable.clone(), source.clone());
                iter.next();
                let mut body = Vec::new();
                structure_into(iter, &mut body)?;
                expect_end(iter)?;
                out.push(Stmt::ForStream { variable, source, body });
            }
        }
    }
    Ok(())
}

fn read_branch<'a, I>(
    iter: &mut std::iter::Peekable<I>,
    cond: CommandExpr,
    negate: bool,
) -> Result<IfBranch, ExecError>
where
    I: Iterator<Item = &'a Line>,
{
    let mut body = Vec::new();
    structure_into(iter, &mut body)?;
    Ok(IfBranch { cond, negate, body })
}

fn expect_end<'a, I>(iter: &mut std::iter::Peekable<I>) -> Result<(), ExecError>
where
    I: Iterator<Item = &'a Line>,
{
    match iter.next().map(|l| &l.kind) {
        Some(LineKind::End) => Ok(()),
        _ => Err(ExecError::Io {
            context: "malformed block".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, "missing `end`"),
        }),
    }
}

/// Runs a pre-parsed script against `scope`.
///
/// # Errors
///
/// Returns the first [`ExecError`] encountered; a failing test's
/// diagnostics should already have been logged by the caller via
/// `tracing` before propagating.
pub async fn execute(scope: &Arc<ScriptScope>, lines: &[Line]) -> Result<(), ExecError> {
    let stmts = structure(lines)?;
    run_block(scope, &stmts).await
}

fn run_block<'a>(
    scope: &'a Arc<ScriptScope>,
    stmts: &'a [Stmt],
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), ExecError>> + Send + 'a>> {
    Box::pin(async move {
        for stmt in stmts {
            match stmt {
                Stmt::Variable { name, value, append, prepend } => {
                    let expanded = expand(scope, value);
                    scope.set(name, &expanded, *append, *prepend);
                }
                Stmt::Test { expr, source_line } => {
                    run_expr(scope, expr).await.map_err(|e| {
                        tracing::warn!(target: "bld_script::exec", line = source_line, error = %e, "test failed");
                        e
                    })?;
                }
                Stmt::If { branches, else_branch } => {
                    let mut matched = false;
                    for branch in branches {
                        let truthy = run_expr(scope, &branch.cond).await.is_ok() != branch.negate;
                        if truthy {
                            run_block(scope, &branch.body).await?;
                            matched = true;
                            break;
                        }
                    }
                    if !matched {
                        if let Some(else_body) = else_branch {
                            run_block(scope, else_body).await?;
                        }
                    }
                }
                Stmt::While { cond, negate, body } => {
                    loop {
                        let truthy = run_expr(scope, cond).await.is_ok() != *negate;
                        if !truthy {
                            break;
                        }
                        run_block(scope, body).await?;
                    }
                }
                Stmt::ForArgs { variable, values, body } => {
                    for value in values {
                        scope.set(variable, value, false, false);
                        run_block(scope, body).await?;
                    }
                }
                Stmt::ForStream { variable, source, body } => {
                    let output = capture_stdout(scope, source).await?;
                    for line in output.lines() {
                        scope.set(variable, line, false, false);
                        run_block(scope, body).await?;
                    }
                }
            }
        }
        Ok(())
    })
}

/// Expands `$name`/`$(name)` references in `text` against `scope`.
fn expand(scope: &ScriptScope, text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'(') {
            chars.next();
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == ')' {
                    break;
                }
                name.push(c);
            }
            out.push_str(&scope.get(&name).unwrap_or_default());
        } else {
            let mut name = String::new();
            while matches!(chars.peek(), Some(c) if c.is_alphanumeric() || *c == '_' || *c == '.' || *c == '~' || *c == '*' || *c == '@') {
                name.push(chars.next().unwrap());
            }
            out.push_str(&scope.get(&name).unwrap_or_default());
        }
    }
    out
}

/// Evaluates a `&&`/`||`-joined expression left to right, short
/// circuiting per [`ExprOperator`], returning the last pipeline's
/// result.
async fn run_expr(scope: &Arc<ScriptScope>, expr: &CommandExpr) -> Result<(), ExecError> {
    let mut result: Result<(), ExecError> = Ok(());
    let mut skip_reason: Option<ExprOperator> = None;
    for term in expr {
        let should_run = match skip_reason {
            None => true,
            Some(ExprOperator::LogAnd) => result.is_ok(),
            Some(ExprOperator::LogOr) => result.is_err(),
        };
        if should_run {
            result = run_pipeline(scope, &term.pipeline).await;
        }
        skip_reason = term.operator;
    }
    result
}

async fn capture_stdout(scope: &Arc<ScriptScope>, expr: &CommandExpr) -> Result<String, ExecError> {
    // `for x <<< cmd` only ever has one pipeline term in practice; run
    // the first and capture it directly rather than threading a capture
    // flag through the whole `&&`/`||` evaluator.
    let term = expr.first().ok_or_else(|| ExecError::Io {
        context: "for-stream source".to_string(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty expression"),
    })?;
    let (_, stdout) = run_pipeline_captured(scope, &term.pipeline).await?;
    Ok(stdout)
}

async fn run_pipeline(scope: &Arc<ScriptScope>, pipeline: &Pipeline) -> Result<(), ExecError> {
    run_pipeline_captured(scope, pipeline).await.map(|_| ())
}

/// Runs a `|`-joined pipeline, applying each command's redirects, and
/// returns the last command's captured stdout (for `for x <<< cmd`).
async fn run_pipeline_captured(
    scope: &Arc<ScriptScope>,
    pipeline: &Pipeline,
) -> Result<((), String), ExecError> {
    let mut upstream: Option<Vec<u8>> = None;
    let mut last_stdout = String::new();

    for (idx, cmd) in pipeline.iter().enumerate() {
        let is_last = idx + 1 == pipeline.len();
        let program = expand(scope, &cmd.program);
        let args: Vec<String> = cmd.arguments.iter().map(|a| expand(scope, a)).collect();

        let mut proc = TokioCommand::new(&program);
        proc.args(&args);
        proc.current_dir(cmd.cwd.as_deref().map_or_else(|| scope.work_dir.clone(), |c| scope.resolve(c)));
        for (k, v) in &cmd.variables {
            proc.env(k, expand(scope, v));
        }

        let stdin_content = if idx == 0 { redirect_input(scope, &cmd.stdin)? } else { upstream.take() };
        proc.stdin(if stdin_content.is_some() || !is_last { Stdio::piped() } else { Stdio::null() });
        proc.stdout(Stdio::piped());
        proc.stderr(Stdio::piped());

        let deadline = compose_deadline(scope, cmd.timeout);
        let mut child = proc.spawn().map_err(|e| ExecError::Io { context: format!("spawning {program}"), source: e })?;

        if let Some(input) = stdin_content {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(&input).await.map_err(|e| ExecError::Io {
                    context: format!("writing stdin for {program}"),
                    source: e,
                })?;
            }
        }

        let wait = async {
            let mut stdout_buf = Vec::new();
            let mut stderr_buf = Vec::new();
            if let Some(mut out) = child.stdout.take() {
                let _ = out.read_to_end(&mut stdout_buf).await;
            }
            if let Some(mut err) = child.stderr.take() {
                let _ = err.read_to_end(&mut stderr_buf).await;
            }
            let status = child.wait().await;
            (status, stdout_buf, stderr_buf)
        };

        let (status, stdout_buf, stderr_buf) = match deadline {
            Some(remaining) => tokio::time::timeout(remaining, wait)
                .await
                .map_err(|_| ExecError::Timeout { program: program.clone(), secs: remaining.as_secs() })?,
            None => wait.await,
        };

        let status = status.map_err(|e| ExecError::Io { context: format!("waiting for {program}"), source: e })?;

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if status.signal().is_some() {
                return Err(ExecError::Signaled { program });
            }
        }

        let code = status.code().unwrap_or(-1);
        if !cmd.exit.satisfied_by(code) {
            return Err(ExecError::ExitCode {
                program: program.clone(),
                expected: format!("{:?} {}", cmd.exit.comparison, cmd.exit.code),
                actual: code,
            });
        }

        if is_last {
            check_output(scope, "stdout", &cmd.stdout, &stdout_buf)?;
            last_stdout = String::from_utf8_lossy(&stdout_buf).into_owned();
        } else {
            upstream = Some(stdout_buf);
        }
        check_output(scope, "stderr", &cmd.stderr, &stderr_buf)?;

        run_cleanups(scope, &cmd.cleanups)?;
    }

    Ok(((), last_stdout))
}

fn compose_deadline(scope: &ScriptScope, command_timeout: Option<Duration>) -> Option<Duration> {
    let inherited = scope.remaining();
    match (command_timeout, inherited) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn redirect_input(scope: &ScriptScope, redirect: &Redirect) -> Result<Option<Vec<u8>>, ExecError> {
    match redirect {
        Redirect::None | Redirect::Pass | Redirect::Null | Redirect::Trace | Redirect::Merge(_) => Ok(None),
        Redirect::HereStringLiteral(s) | Redirect::HereDocLiteral { text: s, .. } => {
            Ok(Some(expand(scope, s).into_bytes()))
        }
        Redirect::HereStringRegex(_) | Redirect::HereDocRegex { .. } => {
            Err(ExecError::RedirectMismatch { kind: "stdin" })
        }
        Redirect::HereDocRef(_) => Err(ExecError::RedirectMismatch { kind: "stdin" }),
        Redirect::File { path, .. } => {
            let resolved = scope.resolve(path);
            std::fs::read(&resolved)
                .map(Some)
                .map_err(|e| ExecError::Io { context: format!("reading {}", resolved.display()), source: e })
        }
    }
}

fn check_output(scope: &ScriptScope, kind: &'static str, redirect: &Redirect, actual: &[u8]) -> Result<(), ExecError> {
    let actual_str = String::from_utf8_lossy(actual);
    match redirect {
        Redirect::None | Redirect::Pass | Redirect::Null | Redirect::Trace | Redirect::Merge(_) => Ok(()),
        Redirect::HereStringLiteral(expected) => {
            if actual_str.trim_end_matches('\n') == expand(scope, expected) {
                Ok(())
            } else {
                Err(ExecError::RedirectMismatch { kind })
            }
        }
        Redirect::HereStringRegex(pattern) => match_regex_single(&expand(scope, pattern), &actual_str, kind),
        Redirect::HereDocLiteral { text, mode } => compare_literal(scope, kind, text, &actual_str, *mode),
        Redirect::HereDocRegex { pattern, mode } => {
            let _ = mode;
            match_regex_lines(&expand(scope, pattern), &actual_str, kind)
        }
        Redirect::HereDocRef(_) => Err(ExecError::RedirectMismatch { kind }),
        Redirect::File { path, mode } => compare_or_write_file(scope, kind, path, actual, *mode),
    }
}

fn compare_literal(
    scope: &ScriptScope,
    kind: &'static str,
    expected: &str,
    actual: &str,
    mode: RedirectFileMode,
) -> Result<(), ExecError> {
    let expanded = expand(scope, expected);
    match mode {
        RedirectFileMode::Compare => {
            if actual == expanded {
                Ok(())
            } else {
                Err(ExecError::RedirectMismatch { kind })
            }
        }
        RedirectFileMode::Overwrite | RedirectFileMode::Append => Ok(()),
    }
}

fn match_regex_single(pattern: &str, actual: &str, kind: &'static str) -> Result<(), ExecError> {
    let re = regex::Regex::new(pattern)?;
    if re.is_match(actual.trim_end_matches('\n')) {
        Ok(())
    } else {
        Err(ExecError::RedirectMismatch { kind })
    }
}

/// Matches a here-document regex redirect: each non-blank line of
/// `pattern` is a per-line regex matched positionally against `actual`'s
/// lines (spec.md §4.11, simplified per its custom-alphabet redesign
/// note: each output line is treated as an already-canonical string and
/// matched with a plain byte regex rather than reimplementing build2's
/// char-traits facet machinery).
fn match_regex_lines(pattern: &str, actual: &str, kind: &'static str) -> Result<(), ExecError> {
    let patterns: Vec<&str> = pattern.lines().collect();
    let lines: Vec<&str> = actual.lines().collect();
    if patterns.len() != lines.len() {
        return Err(ExecError::RedirectMismatch { kind });
    }
    for (p, l) in patterns.iter().zip(lines.iter()) {
        let re = regex::Regex::new(&format!("^{p}$"))?;
        if !re.is_match(l) {
            return Err(ExecError::RedirectMismatch { kind });
        }
    }
    Ok(())
}

fn compare_or_write_file(
    scope: &ScriptScope,
    kind: &'static str,
    path: &str,
    actual: &[u8],
    mode: RedirectFileMode,
) -> Result<(), ExecError> {
    let resolved = scope.resolve(path);
    match mode {
        RedirectFileMode::Compare => {
            let expected = std::fs::read(&resolved)
                .map_err(|e| ExecError::Io { context: format!("reading {}", resolved.display()), source: e })?;
            if expected == actual {
                Ok(())
            } else {
                Err(ExecError::RedirectMismatch { kind })
            }
        }
        RedirectFileMode::Overwrite => std::fs::write(&resolved, actual)
            .map_err(|e| ExecError::Io { context: format!("writing {}", resolved.display()), source: e }),
        RedirectFileMode::Append => {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&resolved)
                .map_err(|e| ExecError::Io { context: format!("appending to {}", resolved.display()), source: e })?;
            file.write_all(actual)
                .map_err(|e| ExecError::Io { context: format!("appending to {}", resolved.display()), source: e })
        }
    }
}

fn run_cleanups(scope: &ScriptScope, cleanups: &[Cleanup]) -> Result<(), ExecError> {
    for cleanup in cleanups {
        let path = scope.resolve(&cleanup.path);
        match cleanup.kind {
            CleanupType::Never => {}
            CleanupType::Always => {
                std::fs::remove_file(&path)
                    .map_err(|e| ExecError::Io { context: format!("cleaning up {}", path.display()), source: e })?;
            }
            CleanupType::Maybe => {
                if path.exists() {
                    std::fs::remove_file(&path).map_err(|e| ExecError::Io {
                        context: format!("cleaning up {}", path.display()),
                        source: e,
                    })?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preparse::preparse;
    use std::time::Instant;

    fn root_scope() -> Arc<ScriptScope> {
        let dir = tempfile::tempdir().unwrap();
        ScriptScope::root(dir.keep(), None, Instant::now())
    }

    #[tokio::test]
    async fn runs_a_simple_passing_command() {
        let scope = root_scope();
        let lines = preparse("true\n").unwrap();
        execute(&scope, &lines).await.unwrap();
    }

    #[tokio::test]
    async fn failing_exit_code_is_reported() {
        let scope = root_scope();
        let lines = preparse("false\n").unwrap();
        let err = execute(&scope, &lines).await.unwrap_err();
        assert!(matches!(err, ExecError::ExitCode { .. }));
    }

    #[tokio::test]
    async fn variable_expansion_reaches_command_arguments() {
        let scope = root_scope();
        let lines = preparse("greeting = world\necho $greeting >>EOF\nworld\nEOF\n").unwrap();
        execute(&scope, &lines).await.unwrap();
    }

    #[tokio::test]
    async fn if_else_selects_the_right_branch() {
        let scope = root_scope();
        let lines = preparse("if false\n  false\nelse\n  true\nend\n").unwrap();
        execute(&scope, &lines).await.unwrap();
    }

    #[tokio::test]
    async fn for_args_binds_each_value_in_turn() {
        let scope = root_scope();
        let lines = preparse("for x: a b c\necho $x >>EOF\n$x\nEOF\nend\n").unwrap();
        execute(&scope, &lines).await.unwrap();
    }
}
