//! The buildfile lexer (spec.md §4.1 "Lexer").
//!
//! Tokenization is mode-sensitive: the same character sequence lexes
//! differently depending on whether the parser currently wants a plain
//! value, a variable name, an `eval` context, an attribute list, or a
//! buildspec. Rather than a recursive descent through mutually-calling
//! lex functions (the original's `lexer::next()` switching on a member
//! enum set by its caller before each call), this lexer keeps an explicit
//! [`ModeStack`] the parser pushes/pops onto directly (spec.md §9's
//! redesign note: "an explicit lexer mode stack instead of recursive-mode
//! functions").

use std::fmt;

/// Lexing mode: governs which characters are significant (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Plain right-hand-side value context: words, quoting, `$`
    /// substitution, but `:` and `=` are not special inside a value.
    Value,
    /// Reading a variable name after `$` or inside `$(...)`.
    Variable,
    /// Inside an `eval` context (`$(...)`  or `for x: ...`): operators
    /// and parens are tokenized individually rather than folded into a
    /// word.
    Eval,
    /// Inside a target attribute list (`exe{foo}: extension = ...`, the
    /// part in `[ ... ]` before a recipe/target declaration).
    Attribute,
    /// Lexing a buildspec string (`meta(op(targets))`) rather than a
    /// buildfile.
    Buildspec,
    /// Inside a double/single-quoted string.
    Quoted,
    /// Reading the body of a here-document until its terminator line.
    HereDoc,
    /// Lexing a recipe/shell command line (used by `bld-script`'s
    /// preparser, which reuses this lexer for the shared word/quoting
    /// rules).
    CommandLine,
    /// Expecting the first token of a new logical line (where a leading
    /// word can be a target, a directive, or a scope/if keyword).
    FirstToken,
    /// Expecting the second token of a logical line (after the first
    /// word, to decide whether `:` or `=`/`+=`/`=+` follows).
    SecondToken,
}

/// An explicit stack of lexing modes, pushed/popped by the parser as it
/// descends into nested constructs (`$(...)`, attribute lists, here-docs).
#[derive(Debug, Clone)]
pub struct ModeStack(Vec<Mode>);

impl ModeStack {
    /// Start in `FirstToken` mode (a fresh buildfile begins a new
    /// logical line).
    pub fn new() -> Self {
        Self(vec![Mode::FirstToken])
    }

    /// The mode currently in effect.
    pub fn current(&self) -> Mode {
        *self.0.last().expect("mode stack is never empty")
    }

    /// Push a new mode (entering a nested construct).
    pub fn push(&mut self, mode: Mode) {
        self.0.push(mode);
    }

    /// Pop back to the enclosing mode. A no-op (keeps the last mode) if
    /// this would empty the stack — a malformed buildfile with more
    /// closes than opens should not panic the lexer.
    pub fn pop(&mut self) {
        if self.0.len() > 1 {
            self.0.pop();
        }
    }
}

impl Default for ModeStack {
    fn default() -> Self {
        Self::new()
    }
}

/// A lexical token (spec.md §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A bare or quoted word (the quoting distinction is tracked in
    /// `quoted` so the parser can decide whether `$`/`{` inside it should
    /// still expand — quoted text is literal).
    Word { text: String, quoted: bool },
    /// `$` — introduces a variable reference or, followed by `(`, an
    /// `eval` context.
    Dollar,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `:`
    Colon,
    /// `,`
    Comma,
    /// `=`
    Equals,
    /// `+=`
    PlusEquals,
    /// `=+`
    EqualsPlus,
    /// `|` (pipe, command-line mode)
    Pipe,
    /// `;` (command separator, command-line mode)
    Semicolon,
    /// End of a logical line (a real newline not inside an open `(`/`{`).
    Newline,
    /// End of input.
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word { text, .. } => write!(f, "{text}"),
            Token::Dollar => write!(f, "$"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Colon => write!(f, ":"),
            Token::Comma => write!(f, ","),
            Token::Equals => write!(f, "="),
            Token::PlusEquals => write!(f, "+="),
            Token::EqualsPlus => write!(f, "=+"),
            Token::Pipe => write!(f, "|"),
            Token::Semicolon => write!(f, ";"),
            Token::Newline => write!(f, "<newline>"),
            Token::Eof => write!(f, "<eof>"),
        }
    }
}

/// A token with its source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned {
    /// The token.
    pub token: Token,
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

/// Lexer error.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LexError {
    /// A quoted string was never closed.
    #[error("{line}:{column}: unterminated quoted string")]
    UnterminatedString {
        /// Line the string began on.
        line: u32,
        /// Column the string began at.
        column: u32,
    },
    /// A here-document's terminator line was never found.
    #[error("unterminated here-document (expected terminator `{0}`)")]
    UnterminatedHereDoc(String),
}

/// Character-at-a-time lexer over one buildfile's text.
pub struct Lexer<'a> {
    src: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    line: u32,
    column: u32,
    pub modes: ModeStack,
}

impl<'a> Lexer<'a> {
    /// Start lexing `src`.
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().peekable(),
            line: 1,
            column: 1,
            modes: ModeStack::new(),
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn bump(&mut self) -> Option<char> {
        let (_, c) = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_inline_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c == ' ' || c == '\t' {
                self.bump();
            } else if c == '\\' {
                // Line continuation: backslash immediately before a
                // newline splices the next line onto this one.
                let mut lookahead = self.chars.clone();
                lookahead.next();
                if matches!(lookahead.peek(), Some((_, '\n'))) {
                    self.bump();
                    self.bump();
                } else {
                    break;
                }
            } else if c == '#' {
                while let Some(c) = self.peek_char() {
                    if c == '\n' {
                        break;
                    }
                    self.bump();
                }
            } else {
                break;
            }
        }
    }

    /// Read a here-document body up to (not including) a line that is
    /// exactly `terminator` (after trimming trailing whitespace), per
    /// spec.md §4.11's `<<terminator` syntax shared with the script
    /// engine.
    ///
    /// # Errors
    ///
    /// Returns [`LexError::UnterminatedHereDoc`] if `terminator` is never
    /// found before the input ends.
    pub fn read_here_doc_body(&mut self, terminator: &str) -> Result<String, LexError> {
        let mut body = String::new();
        loop {
            let line_start = self.byte_pos();
            let mut line = String::new();
            loop {
                match self.peek_char() {
                    None => break,
                    Some('\n') => {
                        self.bump();
                        break;
                    }
                    Some(c) => {
                        line.push(c);
                        self.bump();
                    }
                }
            }
            if line.trim_end() == terminator {
                return Ok(body);
            }
            if self.peek_char().is_none() && line_start == self.byte_pos() && line.is_empty() {
                return Err(LexError::UnterminatedHereDoc(terminator.to_string()));
            }
            body.push_str(&line);
            body.push('\n');
            if self.peek_char().is_none() {
                return Err(LexError::UnterminatedHereDoc(terminator.to_string()));
            }
        }
    }

    fn byte_pos(&mut self) -> usize {
        self.chars.peek().map_or(self.src.len(), |(i, _)| *i)
    }

    fn is_word_boundary(c: char, mode: Mode) -> bool {
        if c.is_whitespace() {
            return true;
        }
        match mode {
            Mode::Eval | Mode::Attribute => {
                matches!(c, '(' | ')' | '{' | '}' | '[' | ']' | ':' | ',' | '=' | '$')
            }
            Mode::CommandLine => matches!(c, '|' | ';' | '$' | '"' | '\''),
            _ => matches!(c, '{' | '}' | '$' | '=' | ':' | ',' | '"' | '\''),
        }
    }

    fn read_quoted(&mut self, quote: char) -> Result<String, LexError> {
        let (line, column) = (self.line, self.column);
        let mut s = String::new();
        loop {
            match self.bump() {
                None => return Err(LexError::UnterminatedString { line, column }),
                Some(c) if c == quote => return Ok(s),
                Some('\\') if quote == '"' => {
                    if let Some(next) = self.bump() {
                        s.push(match next {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                    }
                }
                Some(c) => s.push(c),
            }
        }
    }

    /// `true` for modes where a name lexeme may carry an attached
    /// `{...}` span (`type{value}`, spec.md §3 "Name") rather than the
    /// brace being read as its own `LBrace`/`RBrace` token. Only applies
    /// to a brace with no preceding word boundary — a standalone `{` that
    /// opens a scope or recipe block is still caught by `next_token`'s
    /// unconditional `{`/`}` arms before `read_word` ever runs.
    fn word_absorbs_braces(mode: Mode) -> bool {
        matches!(mode, Mode::Value | Mode::FirstToken | Mode::SecondToken)
    }

    fn read_word(&mut self, mode: Mode) -> String {
        let mut s = String::new();
        while let Some(c) = self.peek_char() {
            if c == '{' && Self::word_absorbs_braces(mode) {
                let mut depth = 0i32;
                loop {
                    match self.peek_char() {
                        Some('{') => {
                            depth += 1;
                            s.push('{');
                            self.bump();
                        }
                        Some('}') => {
                            depth -= 1;
                            s.push('}');
                            self.bump();
                            if depth == 0 {
                                break;
                            }
                        }
                        Some(c) => {
                            s.push(c);
                            self.bump();
                        }
                        None => break,
                    }
                }
                continue;
            }
            if Self::is_word_boundary(c, mode) {
                break;
            }
            s.push(c);
            self.bump();
        }
        s
    }

    /// Produce the next token under the current top-of-stack mode.
    ///
    /// # Errors
    ///
    /// Returns a [`LexError`] for an unterminated quoted string.
    pub fn next_token(&mut self) -> Result<Spanned, LexError> {
        let mode = self.modes.current();
        if mode != Mode::Quoted {
            self.skip_inline_whitespace();
        }

        let (line, column) = (self.line, self.column);
        let Some(c) = self.peek_char() else {
            return Ok(Spanned { token: Token::Eof, line, column });
        };

        let token = match c {
            '\n' => {
                self.bump();
                Token::Newline
            }
            '"' | '\'' => {
                self.bump();
                let text = self.read_quoted(c)?;
                Token::Word { text, quoted: true }
            }
            '$' => {
                self.bump();
                Token::Dollar
            }
            '(' if matches!(mode, Mode::Eval | Mode::Attribute) => {
                self.bump();
                Token::LParen
            }
            ')' if matches!(mode, Mode::Eval | Mode::Attribute) => {
                self.bump();
                Token::RParen
            }
            '{' => {
                self.bump();
                Token::LBrace
            }
            '}' => {
                self.bump();
                Token::RBrace
            }
            '[' if matches!(mode, Mode::Attribute | Mode::FirstToken) => {
                self.bump();
                Token::LBracket
            }
            ']' if matches!(mode, Mode::Attribute | Mode::FirstToken) => {
                self.bump();
                Token::RBracket
            }
            ':' if matches!(mode, Mode::SecondToken | Mode::Eval | Mode::Attribute) => {
                self.bump();
                Token::Colon
            }
            ',' if matches!(mode, Mode::Eval | Mode::Attribute) => {
                self.bump();
                Token::Comma
            }
            '|' if mode == Mode::CommandLine => {
                self.bump();
                Token::Pipe
            }
            ';' if mode == Mode::CommandLine => {
                self.bump();
                Token::Semicolon
            }
            '=' if matches!(mode, Mode::SecondToken | Mode::Eval) => {
                self.bump();
                if self.peek_char() == Some('+') {
                    self.bump();
                    Token::EqualsPlus
                } else {
                    Token::Equals
                }
            }
            '+' if matches!(mode, Mode::SecondToken | Mode::Eval)
                && self.peek_plus_equals() =>
            {
                self.bump();
                self.bump();
                Token::PlusEquals
            }
            _ => {
                let text = self.read_word(mode);
                Token::Word { text, quoted: false }
            }
        };
        Ok(Spanned { token, line, column })
    }

    fn peek_plus_equals(&mut self) -> bool {
        let mut it = self.chars.clone();
        matches!((it.next(), it.next()), (Some((_, '+')), Some((_, '='))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str, mode: Mode) -> Vec<Token> {
        let mut lex = Lexer::new(src);
        lex.modes = ModeStack::new();
        lex.modes.push(mode);
        let mut out = Vec::new();
        loop {
            let t = lex.next_token().unwrap().token;
            if t == Token::Eof {
                break;
            }
            out.push(t);
        }
        out
    }

    #[test]
    fn lexes_plain_words() {
        let toks = tokens("foo bar", Mode::Value);
        assert_eq!(
            toks,
            vec![
                Token::Word { text: "foo".into(), quoted: false },
                Token::Word { text: "bar".into(), quoted: false },
            ]
        );
    }

    #[test]
    fn lexes_quoted_string_with_escape() {
        let toks = tokens(r#""a\nb""#, Mode::Value);
        assert_eq!(toks, vec![Token::Word { text: "a\nb".into(), quoted: true }]);
    }

    #[test]
    fn second_token_mode_recognizes_assignment_operators() {
        let toks = tokens(": += =+ =", Mode::SecondToken);
        assert_eq!(
            toks,
            vec![Token::Colon, Token::PlusEquals, Token::EqualsPlus, Token::Equals]
        );
    }

    #[test]
    fn eval_mode_tokenizes_parens_and_commas_individually() {
        let toks = tokens("$(foo(a, b))", Mode::Eval);
        assert_eq!(
            toks,
            vec![
                Token::Dollar,
                Token::LParen,
                Token::Word { text: "foo".into(), quoted: false },
                Token::LParen,
                Token::Word { text: "a".into(), quoted: false },
                Token::Comma,
                Token::Word { text: "b".into(), quoted: false },
                Token::RParen,
                Token::RParen,
            ]
        );
    }

    #[test]
    fn line_continuation_is_invisible_to_word_reading() {
        // A backslash-newline splices two source lines into one logical
        // line; the lexer should not emit a `Newline` token for it.
        let toks = tokens("foo \\\nbar", Mode::Value);
        assert_eq!(
            toks,
            vec![
                Token::Word { text: "foo".into(), quoted: false },
                Token::Word { text: "bar".into(), quoted: false },
            ]
        );
    }

    #[test]
    fn here_doc_body_reads_until_terminator() {
        let mut lex = Lexer::new("line one\nline two\nEOF\nafter");
        let body = lex.read_here_doc_body("EOF").unwrap();
        assert_eq!(body, "line one\nline two\n");
    }

    #[test]
    fn typed_name_with_braces_lexes_as_one_word() {
        let toks = tokens("exe{hello}", Mode::FirstToken);
        assert_eq!(toks, vec![Token::Word { text: "exe{hello}".into(), quoted: false }]);
    }

    #[test]
    fn standalone_brace_after_whitespace_still_opens_a_block() {
        let toks = tokens("tests/ {", Mode::FirstToken);
        assert_eq!(
            toks,
            vec![Token::Word { text: "tests/".into(), quoted: false }, Token::LBrace]
        );
    }

    #[test]
    fn mode_stack_pop_never_empties() {
        let mut stack = ModeStack::new();
        stack.pop();
        stack.pop();
        assert_eq!(stack.current(), Mode::FirstToken);
    }
}
