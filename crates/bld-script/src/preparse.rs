//! Splits raw testscript/shellscript text into [`Line`]s, validating
//! structure only (spec.md §4.9 "pre-parse validates structure only; it
//! does not resolve variables or run anything"), grounded on
//! `libbuild2/script/parser.cxx`'s two-pass (pre-parse/exec) design.

use crate::ast::{
    CleanupType, Cleanup, Command, CommandExpr, ExprOperator, ExprTerm, Line, LineKind, Pipeline,
    Redirect, RedirectFileMode,
};
use crate::error::PreparseError;
use crate::lexer::{self, RedirectOp, Token};

/// Keywords recognized at the start of a line; anything else is either a
/// variable assignment or a command expression.
const KEYWORDS: &[&str] = &["if", "if!", "elif", "elif!", "else", "while", "for", "end"];

/// Pre-parse a complete script file into its flat line list.
///
/// # Errors
///
/// Returns a [`PreparseError`] on malformed directives, unterminated
/// blocks, or unterminated here-documents.
pub fn preparse(text: &str) -> Result<Vec<Line>, PreparseError> {
    let joined = join_continuations(text);
    let raw_lines: Vec<&str> = joined.iter().map(String::as_str).collect();
    let mut out = Vec::new();
    let mut block_stack: Vec<(&'static str, usize)> = Vec::new();
    let mut i = 0usize;

    while i < raw_lines.len() {
        let source_line = i + 1;
        let line_text = strip_comment(raw_lines[i]);
        let trimmed = line_text.trim();
        if trimmed.is_empty() {
            i += 1;
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("for ") {
            // `for x: v1 v2 ...` or `for x <<< cmd...`
            block_stack.push(("for", source_line));
            out.push(parse_for(rest, source_line)?);
            i += 1;
            continue;
        }
        if let Some(first_word) = trimmed.split_whitespace().next() {
            if KEYWORDS.contains(&first_word) {
                match first_word {
                    "if" | "if!" | "elif" | "elif!" | "while" => {
                        if matches!(first_word, "if" | "if!" | "while") {
                            block_stack.push(("if/while", source_line));
                        } else if block_stack.is_empty() {
                            return Err(PreparseError::Syntax {
                                line: source_line,
                                column: 1,
                                message: format!("`{first_word}` without an opening `if`"),
                            });
                        }
                        let rest = trimmed[first_word.len()..].trim();
                        let expr = parse_command_expr(rest, source_line)?;
                        let kind = match first_word {
                            "if" => LineKind::If(expr),
                            "if!" => LineKind::IfNot(expr),
                            "elif" => LineKind::Elif(expr),
                            "elif!" => LineKind::ElifNot(expr),
                            "while" => LineKind::While(expr),
                            _ => unreachable!(),
                        };
                        out.push(Line { kind, source_line });
                    }
                    "else" => {
                        if block_stack.is_empty() {
                            return Err(PreparseError::Syntax {
                                line: source_line,
                                column: 1,
                                message: "`else` without an opening `if`".to_string(),
                            });
                        }
                        out.push(Line { kind: LineKind::Else, source_line });
                    }
                    "end" => {
                        if block_stack.pop().is_none() {
                            return Err(PreparseError::Syntax {
                                line: source_line,
                                column: 1,
                                message: "`end` without an opening block".to_string(),
                            });
                        }
                        out.push(Line { kind: LineKind::End, source_line });
                    }
                    _ => unreachable!(),
                }
                i += 1;
                continue;
            }
        }

        if let Some((name, value, append, prepend)) = parse_assignment(trimmed) {
            out.push(Line {
                kind: LineKind::Variable { name, value, append, prepend },
                source_line,
            });
            i += 1;
            continue;
        }

        let (expr, consumed) = parse_command_line(&raw_lines, i, source_line)?;
        out.push(Line { kind: LineKind::Command(expr), source_line });
        i += consumed;
    }

    if let Some((keyword, line)) = block_stack.pop() {
        return Err(PreparseError::Unterminated { keyword, line });
    }

    Ok(out)
}

/// Join `\`-terminated continuation lines into single logical lines,
/// keeping the vector index-aligned with 1-based source line numbers by
/// emitting an empty placeholder for each consumed continuation.
fn join_continuations(text: &str) -> Vec<String> {
    let raw: Vec<&str> = text.lines().collect();
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let mut joined = raw[i].to_string();
        while joined.ends_with('\\') {
            joined.pop();
            i += 1;
            out.push(String::new());
            if i >= raw.len() {
                break;
            }
            joined.push(' ');
            joined.push_str(raw[i]);
        }
        out.push(joined);
        i += 1;
    }
    out
}

fn strip_comment(line: &str) -> &str {
    // A `#` starts a comment unless it is the first character of a word
    // that looks like a cleanup/fd marker (`2>&1#...` never happens in
    // practice); a leading `#` or one preceded by whitespace comments out
    // the remainder of the line.
    if let Some(pos) = line.find('#') {
        if pos == 0 || line.as_bytes()[pos - 1] == b' ' || line.as_bytes()[pos - 1] == b'\t' {
            return &line[..pos];
        }
    }
    line
}

fn parse_assignment(trimmed: &str) -> Option<(String, String, bool, bool)> {
    let ops = [("+=", true, false), ("=+", false, true), ("=", false, false)];
    for (op, append, prepend) in ops {
        if let Some(idx) = trimmed.find(op) {
            let name = trimmed[..idx].trim();
            if name.is_empty() || !is_identifier(name) {
                continue;
            }
            let value = trimmed[idx + op.len()..].trim().to_string();
            return Some((name.to_string(), value, append, prepend));
        }
    }
    None
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '.' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

fn parse_for(rest: &str, source_line: usize) -> Result<Line, PreparseError> {
    if let Some((var, values)) = rest.split_once(':') {
        let var = var.trim().to_string();
        let values = values.split_whitespace().map(str::to_string).collect();
        return Ok(Line { kind: LineKind::ForArgs { variable: var, values }, source_line });
    }
    if let Some((var, cmd)) = rest.split_once("<<<") {
        let var = var.trim().to_string();
        let source = parse_command_expr(cmd.trim(), source_line)?;
        return Ok(Line { kind: LineKind::ForStream { variable: var, source }, source_line });
    }
    Err(PreparseError::Syntax {
        line: source_line,
        column: 1,
        message: "malformed `for`, expected `for x: v...` or `for x <<< cmd`".to_string(),
    })
}

/// Parse a bare command expression that needs no here-document lookahead
/// (used for `if`/`while`/`for` conditions, which spec.md restricts to a
/// single-line test).
fn parse_command_expr(text: &str, source_line: usize) -> Result<CommandExpr, PreparseError> {
    let (expr, _) = build_expr(text, &[], source_line)?;
    Ok(expr)
}

/// Parse a full command line, consuming any trailing here-document
/// bodies from subsequent raw lines. Returns the expression and the
/// number of raw lines consumed (always >= 1).
fn parse_command_line(
    raw_lines: &[&str],
    index: usize,
    source_line: usize,
) -> Result<(CommandExpr, usize), PreparseError> {
    let line_text = strip_comment(raw_lines[index]);
    let following = &raw_lines[index + 1..];
    let (expr, heredoc_lines_used) = build_expr(line_text, following, source_line)?;
    Ok((expr, 1 + heredoc_lines_used))
}

/// Tokenizes `text` and builds a [`CommandExpr`], consuming here-document
/// bodies from `following` as redirects demand them.
fn build_expr(
    text: &str,
    following: &[&str],
    source_line: usize,
) -> Result<(CommandExpr, usize), PreparseError> {
    let tokens = lexer::lex(text).map_err(|e| PreparseError::Syntax {
        line: source_line,
        column: 1,
        message: e.to_string(),
    })?;

    let mut terms = Vec::new();
    let mut pipeline: Pipeline = Vec::new();
    let mut heredoc_offset = 0usize;
    let mut idx = 0usize;
    let mut cmd = Command::default();
    let mut stage = Stage::Program;

    macro_rules! finish_command {
        () => {{
            if !cmd.program.is_empty() {
                pipeline.push(std::mem::take(&mut cmd));
            }
            stage = Stage::Program;
        }};
    }

    while idx < tokens.len() {
        match &tokens[idx] {
            Token::Word { text, .. } => {
                match stage {
                    Stage::Program => {
                        if let Some(path) = text.strip_prefix('&') {
                            let (kind, path) = if let Some(p) = path.strip_suffix('?') {
                                (CleanupType::Maybe, p)
                            } else {
                                (CleanupType::Always, path)
                            };
                            cmd.cleanups.push(Cleanup { path: path.to_string(), kind });
                        } else {
                            cmd.program = text.clone();
                            stage = Stage::Arguments;
                        }
                    }
                    Stage::Arguments => {
                        if let Some(path) = text.strip_prefix('&') {
                            let (kind, path) = if let Some(p) = path.strip_suffix('?') {
                                (CleanupType::Maybe, p)
                            } else {
                                (CleanupType::Always, path)
                            };
                            cmd.cleanups.push(Cleanup { path: path.to_string(), kind });
                        } else {
                            cmd.arguments.push(text.clone());
                        }
                    }
                    Stage::Redirect(fd, op) => {
                        let (redirect, used) =
                            resolve_redirect(fd, op, text, &following[heredoc_offset..])?;
                        heredoc_offset += used;
                        assign_redirect(&mut cmd, fd, redirect);
                        stage = Stage::Arguments;
                    }
                }
            }
            Token::Redirect { fd, op, modifier } => {
                let fd = fd.unwrap_or(match op {
                    RedirectOp::In(_) => 0,
                    RedirectOp::Out(_) | RedirectOp::Merge(_) => 1,
                });
                if modifier.contains('!') {
                    assign_redirect(&mut cmd, fd, Redirect::Null);
                    stage = Stage::Arguments;
                } else if modifier.contains('%') {
                    assign_redirect(&mut cmd, fd, Redirect::Pass);
                    stage = Stage::Arguments;
                } else if let RedirectOp::Merge(target) = op {
                    assign_redirect(&mut cmd, fd, Redirect::Merge(*target));
                    stage = Stage::Arguments;
                } else {
                    stage = Stage::Redirect(fd, *op);
                }
            }
            Token::Pipe => {
                finish_command!();
            }
            Token::AndAnd | Token::OrOr => {
                finish_command!();
                let operator = if matches!(tokens[idx], Token::AndAnd) {
                    ExprOperator::LogAnd
                } else {
                    ExprOperator::LogOr
                };
                terms.push(ExprTerm { pipeline: std::mem::take(&mut pipeline), operator: Some(operator) });
            }
            Token::Eos => {}
        }
        idx += 1;
    }
    finish_command!();
    terms.push(ExprTerm { pipeline, operator: None });

    Ok((terms, heredoc_offset))
}

enum Stage {
    Program,
    Arguments,
    Redirect(u8, RedirectOp),
}

fn assign_redirect(cmd: &mut Command, fd: u8, redirect: Redirect) {
    match fd {
        0 => cmd.stdin = redirect,
        2 => cmd.stderr = redirect,
        _ => cmd.stdout = redirect,
    }
}

/// Resolves a redirect target word (and, for here-documents, the
/// following raw lines) into a [`Redirect`]. Returns the number of
/// additional raw lines consumed.
fn resolve_redirect(
    fd: u8,
    op: RedirectOp,
    target: &str,
    following: &[&str],
) -> Result<(Redirect, usize), PreparseError> {
    let mode = if fd == 0 { RedirectFileMode::Overwrite } else { RedirectFileMode::Compare };
    match op {
        RedirectOp::In(1) | RedirectOp::Out(1) => Ok((Redirect::File { path: target.to_string(), mode }, 0)),
        RedirectOp::In(3) | RedirectOp::Out(3) => {
            let (text, is_regex) = strip_regex_marker(target);
            if is_regex {
                Ok((Redirect::HereStringRegex(text), 0))
            } else {
                Ok((Redirect::HereStringLiteral(text), 0))
            }
        }
        RedirectOp::In(_) | RedirectOp::Out(_) => {
            let (marker, is_regex) = strip_regex_marker(target);
            let mut body = String::new();
            let mut used = 0usize;
            for raw in following {
                used += 1;
                if raw.trim_end() == marker {
                    let redirect = if fd == 0 {
                        Redirect::HereDocLiteral { text: body, mode: RedirectFileMode::Overwrite }
                    } else if is_regex {
                        Redirect::HereDocRegex { pattern: body, mode }
                    } else {
                        Redirect::HereDocLiteral { text: body, mode }
                    };
                    return Ok((redirect, used));
                }
                body.push_str(raw);
                body.push('\n');
            }
            Err(PreparseError::UnterminatedHeredoc { marker: marker.to_string() })
        }
        RedirectOp::Merge(n) => Ok((Redirect::Merge(n), 0)),
    }
}

fn strip_regex_marker(target: &str) -> (String, bool) {
    target.strip_prefix('~').map_or_else(|| (target.to_string(), false), |rest| (rest.to_string(), true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_simple_command_line() {
        let lines = preparse("$bld update\n").unwrap();
        assert_eq!(lines.len(), 1);
        match &lines[0].kind {
            LineKind::Command(expr) => {
                assert_eq!(expr.len(), 1);
                assert_eq!(expr[0].pipeline[0].program, "$bld");
                assert_eq!(expr[0].pipeline[0].arguments, vec!["update"]);
            }
            other => panic!("expected Command, got {other:?}"),
        }
    }

    #[test]
    fn parses_variable_assignment() {
        let lines = preparse("x = 1\n").unwrap();
        match &lines[0].kind {
            LineKind::Variable { name, value, append, prepend } => {
                assert_eq!(name, "x");
                assert_eq!(value, "1");
                assert!(!append && !prepend);
            }
            other => panic!("expected Variable, got {other:?}"),
        }
    }

    #[test]
    fn parses_if_else_end_block() {
        let lines = preparse("if $foo\n  cmd1\nelse\n  cmd2\nend\n").unwrap();
        assert!(matches!(lines[0].kind, LineKind::If(_)));
        assert!(matches!(lines[2].kind, LineKind::Else));
        assert!(matches!(lines[4].kind, LineKind::End));
    }

    #[test]
    fn unterminated_if_is_an_error() {
        let err = preparse("if $foo\ncmd\n").unwrap_err();
        assert!(matches!(err, PreparseError::Unterminated { keyword: "if/while", .. }));
    }

    #[test]
    fn parses_heredoc_stdout_comparison() {
        let lines = preparse("cmd >>EOF\nhello\nEOF\n").unwrap();
        match &lines[0].kind {
            LineKind::Command(expr) => match &expr[0].pipeline[0].stdout {
                Redirect::HereDocLiteral { text, .. } => assert_eq!(text, "hello\n"),
                other => panic!("expected HereDocLiteral, got {other:?}"),
            },
            other => panic!("expected Command, got {other:?}"),
        }
    }

    #[test]
    fn parses_cleanup_marker() {
        let lines = preparse("cmd &file.txt\n").unwrap();
        match &lines[0].kind {
            LineKind::Command(expr) => {
                assert_eq!(expr[0].pipeline[0].cleanups[0].path, "file.txt");
                assert_eq!(expr[0].pipeline[0].cleanups[0].kind, CleanupType::Always);
            }
            other => panic!("expected Command, got {other:?}"),
        }
    }
}
