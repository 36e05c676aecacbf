//! Word-level tokenizer for one pre-parsed script line (spec.md §4.9:
//! "each [line] with a saved token stream suitable for replay"). Mode-
//! driven in the same spirit as `bld_core::lexer` (spec.md §9's "preserve
//! the explicit mode stack" redesign note), reduced to the two modes a
//! command line actually needs: plain word splitting and inside a quote.

use std::fmt;

/// How a word was quoted, mirroring `bld_core::lexer::Quoting` — tracked
/// so the executor knows whether `$var`/`$(...)` expansion applies
/// (single-quoted words are never expanded).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quoting {
    /// No quotes; expansion applies and whitespace inside the word was a
    /// separator.
    Unquoted,
    /// `'...'`: literal, no expansion.
    Single,
    /// `"..."`: expansion applies, but embedded whitespace does not
    /// separate words.
    Double,
}

/// A redirect operator's direction and arity, parsed from the raw
/// punctuation (spec.md §4.9 "redirect (with arity and modifier)"): the
/// angle-bracket repeat count selects a plain file (1), a here-document
/// spanning subsequent lines (2), or a here-string inline on the same
/// line (3) — `<<<`/`>>>` respectively mirror `<`/`<<` on the input
/// side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectOp {
    /// `<` / `<<` / `<<<` — read from (arity 1/2/3).
    In(u8),
    /// `>` / `>>` / `>>>` — compare or write to (arity 1/2/3).
    Out(u8),
    /// `>&N` / `<&N` — merge with another descriptor.
    Merge(u8),
}

/// One lexical token of a testscript command line.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A word (argument, program name, or the text immediately following
    /// a redirect operator).
    Word { text: String, quoting: Quoting },
    /// `&&`.
    AndAnd,
    /// `||`.
    OrOr,
    /// `|` — pipeline separator.
    Pipe,
    /// A redirect operator, with the file descriptor it applies to
    /// (`None` means the operator's natural default: 0 for `<`, 1 for
    /// `>`/`>>`) and any trailing modifier characters (`!`/`%`/regex
    /// introducer, consumed by the parser building a
    /// [`crate::ast::Redirect`]).
    Redirect { fd: Option<u8>, op: RedirectOp, modifier: String },
    /// End of the line's tokens.
    Eos,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word { text, .. } => write!(f, "{text}"),
            Token::AndAnd => write!(f, "&&"),
            Token::OrOr => write!(f, "||"),
            Token::Pipe => write!(f, "|"),
            Token::Redirect { op, .. } => write!(f, "{op:?}"),
            Token::Eos => write!(f, "<eos>"),
        }
    }
}

/// Error tokenizing a command line.
#[derive(Debug, thiserror::Error)]
pub enum LexError {
    /// A quote was opened but never closed.
    #[error("unterminated {0} quote")]
    UnterminatedQuote(&'static str),
}

/// Tokenize one already-joined (continuation-resolved, comment-stripped)
/// logical line of testscript text.
///
/// # Errors
///
/// Returns [`LexError::UnterminatedQuote`] if a `'`/`"` is never closed.
pub fn lex(line: &str) -> Result<Vec<Token>, LexError> {
    let mut chars = line.chars().peekable();
    let mut tokens = Vec::new();

    loop {
        skip_spaces(&mut chars);
        let Some(&c) = chars.peek() else {
            tokens.push(Token::Eos);
            return Ok(tokens);
        };

        if c == '&' {
            chars.next();
            if chars.peek() == Some(&'&') {
                chars.next();
                tokens.push(Token::AndAnd);
                continue;
            }
            // A bare trailing `&` (cleanup marker) is handled by the
            // caller outside this lexer (attached to a word token), so
            // treat it as the start of a word.
            tokens.push(read_word(&mut chars, Some('&'))?);
            continue;
        }
        if c == '|' {
            chars.next();
            if chars.peek() == Some(&'|') {
                chars.next();
                tokens.push(Token::OrOr);
            } else {
                tokens.push(Token::Pipe);
            }
            continue;
        }
        if c.is_ascii_digit() {
            // Look ahead: digits immediately followed by `<`/`>` are a
            // file-descriptor prefix, not a word, per spec.md §4.9
            // "redirect (with arity and modifier)".
            let mut lookahead = chars.clone();
            let mut digits = String::new();
            while let Some(&d) = lookahead.peek() {
                if d.is_ascii_digit() {
                    digits.push(d);
                    lookahead.next();
                } else {
                    break;
                }
            }
            if matches!(lookahead.peek(), Some('<') | Some('>')) && !digits.is_empty() {
                for _ in 0..digits.len() {
                    chars.next();
                }
                let fd: u8 = digits.parse().unwrap_or(0);
                tokens.push(read_redirect(&mut chars, Some(fd))?);
                continue;
            }
        }
        if c == '<' || c == '>' {
            tokens.push(read_redirect(&mut chars, None)?);
            continue;
        }

        tokens.push(read_word(&mut chars, None)?);
    }
}

fn skip_spaces(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    while matches!(chars.peek(), Some(' ') | Some('\t')) {
        chars.next();
    }
}

fn read_redirect(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    fd: Option<u8>,
) -> Result<Token, LexError> {
    let first = chars.next().expect("caller peeked < or >");
    let mut arity: u8 = 1;
    while chars.peek() == Some(&first) {
        chars.next();
        arity += 1;
    }
    let op = if chars.peek() == Some(&'&') {
        chars.next();
        let mut digits = String::new();
        while let Some(&d) = chars.peek() {
            if d.is_ascii_digit() {
                digits.push(d);
                chars.next();
            } else {
                break;
            }
        }
        let target: u8 = digits.parse().unwrap_or(if first == '>' { 1 } else { 0 });
        RedirectOp::Merge(target)
    } else if first == '<' {
        RedirectOp::In(arity)
    } else {
        RedirectOp::Out(arity)
    };
    let mut modifier = String::new();
    while matches!(chars.peek(), Some('!') | Some('%') | Some('?') | Some('/') | Some('~')) {
        modifier.push(chars.next().unwrap());
    }
    Ok(Token::Redirect { fd, op, modifier })
}

fn read_word(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    lead: Option<char>,
) -> Result<Token, LexError> {
    let mut text = String::new();
    let mut quoting = Quoting::Unquoted;
    if let Some(c) = lead {
        text.push(c);
    }
    loop {
        match chars.peek() {
            None => break,
            Some(' ') | Some('\t') => break,
            Some('&') | Some('|') => break,
            Some('\'') => {
                chars.next();
                quoting = Quoting::Single;
                for c in chars.by_ref() {
                    if c == '\'' {
                        return finish_word(chars, text, quoting);
                    }
                    text.push(c);
                }
                return Err(LexError::UnterminatedQuote("single"));
            }
            Some('"') => {
                chars.next();
                quoting = Quoting::Double;
                loop {
                    match chars.next() {
                        None => return Err(LexError::UnterminatedQuote("double")),
                        Some('"') => break,
                        Some('\\') => {
                            if let Some(escaped) = chars.next() {
                                text.push(escaped);
                            }
                        }
                        Some(c) => text.push(c),
                    }
                }
            }
            Some(&c) => {
                text.push(c);
                chars.next();
            }
        }
    }
    finish_word(chars, text, quoting)
}

fn finish_word(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    mut text: String,
    quoting: Quoting,
) -> Result<Token, LexError> {
    // A quoted segment may be directly followed by more unquoted or
    // quoted segments with no separating space (`foo"bar"baz`); keep
    // consuming until real whitespace or an operator is reached.
    loop {
        match chars.peek() {
            Some(' ') | Some('\t') | Some('&') | Some('|') | None => break,
            Some('\'') => {
                chars.next();
                for c in chars.by_ref() {
                    if c == '\'' {
                        break;
                    }
                    text.push(c);
                }
            }
            Some('"') => {
                chars.next();
                loop {
                    match chars.next() {
                        None | Some('"') => break,
                        Some('\\') => {
                            if let Some(escaped) = chars.next() {
                                text.push(escaped);
                            }
                        }
                        Some(c) => text.push(c),
                    }
                }
            }
            Some(&c) => {
                text.push(c);
                chars.next();
            }
        }
    }
    Ok(Token::Word { text, quoting })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_words_on_whitespace() {
        let toks = lex("echo foo bar").unwrap();
        assert_eq!(
            toks,
            vec![
                Token::Word { text: "echo".into(), quoting: Quoting::Unquoted },
                Token::Word { text: "foo".into(), quoting: Quoting::Unquoted },
                Token::Word { text: "bar".into(), quoting: Quoting::Unquoted },
                Token::Eos,
            ]
        );
    }

    #[test]
    fn double_quotes_preserve_embedded_whitespace() {
        let toks = lex(r#"echo "a b""#).unwrap();
        assert_eq!(
            toks[1],
            Token::Word { text: "a b".into(), quoting: Quoting::Double }
        );
    }

    #[test]
    fn recognizes_and_or_and_pipe() {
        let toks = lex("a && b || c | d").unwrap();
        assert!(matches!(toks[1], Token::AndAnd));
        assert!(matches!(toks[3], Token::OrOr));
        assert!(matches!(toks[5], Token::Pipe));
    }

    #[test]
    fn recognizes_redirect_with_fd_prefix() {
        let toks = lex("cmd 2>&1").unwrap();
        assert!(matches!(
            toks[1],
            Token::Redirect { fd: Some(2), op: RedirectOp::Merge(1), .. }
        ));
    }

    #[test]
    fn here_doc_redirect_with_modifier() {
        let toks = lex("cmd >?stdout.exp").unwrap();
        assert!(matches!(
            &toks[1],
            Token::Redirect { op: RedirectOp::Out(1), modifier, .. } if modifier == "?"
        ));
    }

    #[test]
    fn double_angle_bracket_is_heredoc_arity() {
        let toks = lex("cmd >>EOF").unwrap();
        assert!(matches!(toks[1], Token::Redirect { op: RedirectOp::Out(2), .. }));
    }

    #[test]
    fn triple_angle_bracket_is_herestring_arity() {
        let toks = lex("cmd <<<abc").unwrap();
        assert!(matches!(toks[1], Token::Redirect { op: RedirectOp::In(3), .. }));
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        assert!(lex("echo 'no close").is_err());
    }
}
