//! The buildfile parser (spec.md §4.1 "Parser"): recursive descent over
//! [`crate::lexer::Lexer`] tokens, producing an AST that
//! [`crate::algorithm`] evaluates against a [`crate::context::Context`]
//! during the load phase.

use crate::lexer::{Lexer, Mode, Token};

/// One element of a value (the right-hand side of an assignment, a
/// prerequisite list, ...): either literal text or something requiring
/// evaluation against the current scope.
#[derive(Debug, Clone, PartialEq)]
pub enum ValuePart {
    /// Literal text, verbatim.
    Literal(String),
    /// `$name` or `$(name)` — a variable reference.
    VarRef(String),
    /// `$(expr)` where `expr` is not a bare variable name — a function
    /// call or richer expression, kept as unparsed text for
    /// `crate::functions` to evaluate.
    Eval(String),
}

/// A parsed value: a sequence of whitespace-joined parts, as read from
/// one assignment's right-hand side or one prerequisite/target name
/// position.
pub type Value = Vec<ValuePart>;

/// How an assignment's right-hand side composes with any existing value
/// (spec.md §3 "Variable").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    /// `=`
    Assign,
    /// `+=`
    Append,
    /// `=+`
    Prepend,
}

/// A parsed buildfile statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `name = value` / `name += value` / `name =+ value`.
    Assignment { name: String, op: AssignOp, value: Value },
    /// `target-names : prerequisite-names` optionally followed by a
    /// `{ ... }` recipe/nested-statement block.
    Dependency {
        targets: Vec<Value>,
        prerequisites: Vec<Value>,
        block: Vec<Statement>,
    },
    /// `dir/{ statements }` — a nested scope.
    ScopeBlock { directory: Value, body: Vec<Statement> },
    /// `if cond { ... } else if cond { ... } else { ... }`.
    If { branches: Vec<(String, Vec<Statement>)>, else_branch: Option<Vec<Statement>> },
    /// `for x: list { ... }`.
    For { var: String, list: Value, body: Vec<Statement> },
    /// `import [opt] name` — bring another project's exported targets
    /// into scope.
    Import { value: Value, optional: bool },
    /// `using module` — load a build system module.
    Using { module: String },
    /// `include file` — textually include another buildfile.
    Include { path: Value },
}

/// Parser error.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// A lexical error while tokenizing.
    #[error(transparent)]
    Lex(#[from] crate::lexer::LexError),
    /// Found one token, expected another.
    #[error("{line}:{column}: expected {expected}, found `{found}`")]
    Unexpected {
        /// Line of the offending token.
        line: u32,
        /// Column of the offending token.
        column: u32,
        /// What was expected, in prose.
        expected: &'static str,
        /// The token actually found.
        found: String,
    },
    /// End of input where more was expected.
    #[error("unexpected end of buildfile, expected {0}")]
    UnexpectedEof(&'static str),
}

/// Parse the full contents of one buildfile into a statement list.
///
/// # Errors
///
/// Returns [`ParseError`] on the first lexical or syntactic error.
pub fn parse_buildfile(src: &str) -> Result<Vec<Statement>, ParseError> {
    let mut p = Parser::new(src);
    let stmts = p.statements(true)?;
    Ok(stmts)
}

struct Parser<'a> {
    lex: Lexer<'a>,
    lookahead: Option<(Token, u32, u32)>,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { lex: Lexer::new(src), lookahead: None }
    }

    fn peek(&mut self, mode: Mode) -> Result<&Token, ParseError> {
        if self.lookahead.is_none() {
            self.lex.modes.push(mode);
            let sp = self.lex.next_token()?;
            self.lex.modes.pop();
            self.lookahead = Some((sp.token, sp.line, sp.column));
        }
        Ok(&self.lookahead.as_ref().unwrap().0)
    }

    fn bump(&mut self, mode: Mode) -> Result<(Token, u32, u32), ParseError> {
        self.peek(mode)?;
        Ok(self.lookahead.take().unwrap())
    }

    fn skip_newlines(&mut self, mode: Mode) -> Result<(), ParseError> {
        while matches!(self.peek(mode)?, Token::Newline) {
            self.bump(mode)?;
        }
        Ok(())
    }

    /// Parse statements until `}` (if `top_level` is false) or EOF.
    fn statements(&mut self, top_level: bool) -> Result<Vec<Statement>, ParseError> {
        let mut out = Vec::new();
        loop {
            self.skip_newlines(Mode::FirstToken)?;
            match self.peek(Mode::FirstToken)? {
                Token::Eof => {
                    if !top_level {
                        return Err(ParseError::UnexpectedEof("`}`"));
                    }
                    break;
                }
                Token::RBrace => {
                    if top_level {
                        return Err(ParseError::Unexpected {
                            line: 0,
                            column: 0,
                            expected: "a statement",
                            found: "}".into(),
                        });
                    }
                    break;
                }
                _ => out.push(self.statement()?),
            }
        }
        Ok(out)
    }

    fn statement(&mut self) -> Result<Statement, ParseError> {
        let leading = self.read_value(Mode::FirstToken)?;
        self.skip_newlines(Mode::SecondToken)?;
        match self.peek(Mode::SecondToken)? {
            Token::Equals | Token::PlusEquals | Token::EqualsPlus => {
                let (tok, ..) = self.bump(Mode::SecondToken)?;
                let op = match tok {
                    Token::Equals => AssignOp::Assign,
                    Token::PlusEquals => AssignOp::Append,
                    _ => AssignOp::Prepend,
                };
                let name = flatten_name(&leading);
                let value = self.read_value(Mode::Value)?;
                self.expect_line_end()?;
                Ok(Statement::Assignment { name: name.unwrap_or_default(), op, value })
            }
            Token::Colon => {
                self.bump(Mode::SecondToken)?;
                let prerequisites = self.read_comma_list(Mode::Value)?;
                let block = self.optional_block()?;
                self.expect_line_end()?;
                Ok(Statement::Dependency { targets: vec![leading], prerequisites, block })
            }
            Token::LBrace => {
                let body = self.block()?;
                Ok(Statement::ScopeBlock { directory: leading, body })
            }
            _ => self.directive_or_bare(leading),
        }
    }

    fn directive_or_bare(&mut self, leading: Value) -> Result<Statement, ParseError> {
        let keyword = flatten_name(&leading).unwrap_or_default();
        match keyword.as_str() {
            "if" => self.parse_if(),
            "for" => self.parse_for(),
            "import" => {
                let optional = matches!(self.peek(Mode::Value)?, Token::Word { text, .. } if text == "?");
                if optional {
                    self.bump(Mode::Value)?;
                }
                let value = self.read_value(Mode::Value)?;
                self.expect_line_end()?;
                Ok(Statement::Import { value, optional })
            }
            "using" => {
                let value = self.read_value(Mode::Value)?;
                self.expect_line_end()?;
                Ok(Statement::Using { module: flatten_name(&value).unwrap_or_default() })
            }
            "include" => {
                let path = self.read_value(Mode::Value)?;
                self.expect_line_end()?;
                Ok(Statement::Include { path })
            }
            _ => {
                // A bare name with no operator and no block: treat as a
                // dependency declaration with an empty prerequisite list
                // (a target declared with no inputs, e.g. `exe{hello}:`
                // written without the trailing colon in shorthand form).
                self.expect_line_end()?;
                Ok(Statement::Dependency { targets: vec![leading], prerequisites: Vec::new(), block: Vec::new() })
            }
        }
    }

    fn parse_if(&mut self) -> Result<Statement, ParseError> {
        let mut branches = Vec::new();
        let cond = self.read_raw_line()?;
        let body = self.block()?;
        branches.push((cond, body));
        let mut else_branch = None;
        loop {
            self.skip_newlines(Mode::FirstToken)?;
            let save = self.lookahead.clone();
            let word = self.read_value(Mode::FirstToken)?;
            if flatten_name(&word).as_deref() == Some("else") {
                let next = self.read_value(Mode::FirstToken)?;
                if flatten_name(&next).as_deref() == Some("if") {
                    let cond = self.read_raw_line()?;
                    let body = self.block()?;
                    branches.push((cond, body));
                    continue;
                }
                else_branch = Some(self.block()?);
            } else {
                self.lookahead = save;
            }
            break;
        }
        Ok(Statement::If { branches, else_branch })
    }

    fn parse_for(&mut self) -> Result<Statement, ParseError> {
        let var_tok = self.read_value(Mode::Value)?;
        let var = flatten_name(&var_tok).unwrap_or_default();
        self.bump(Mode::SecondToken)?; // `:`
        let list = self.read_value(Mode::Value)?;
        let body = self.block()?;
        Ok(Statement::For { var, list, body })
    }

    fn optional_block(&mut self) -> Result<Vec<Statement>, ParseError> {
        if matches!(self.peek(Mode::FirstToken)?, Token::LBrace) {
            self.block()
        } else {
            Ok(Vec::new())
        }
    }

    fn block(&mut self) -> Result<Vec<Statement>, ParseError> {
        self.skip_newlines(Mode::FirstToken)?;
        let (tok, line, column) = self.bump(Mode::FirstToken)?;
        if !matches!(tok, Token::LBrace) {
            return Err(ParseError::Unexpected {
                line,
                column,
                expected: "`{`",
                found: tok.to_string(),
            });
        }
        let body = self.statements(false)?;
        let (tok, line, column) = self.bump(Mode::FirstToken)?;
        if !matches!(tok, Token::RBrace) {
            return Err(ParseError::Unexpected {
                line,
                column,
                expected: "`}`",
                found: tok.to_string(),
            });
        }
        Ok(body)
    }

    fn read_comma_list(&mut self, mode: Mode) -> Result<Vec<Value>, ParseError> {
        let mut out = vec![self.read_value(mode)?];
        while matches!(self.peek(Mode::Eval)?, Token::Comma) {
            self.bump(Mode::Eval)?;
            out.push(self.read_value(mode)?);
        }
        Ok(out)
    }

    fn read_value(&mut self, mode: Mode) -> Result<Value, ParseError> {
        let mut parts = Vec::new();
        loop {
            match self.peek(mode)? {
                Token::Word { .. } => {
                    let (tok, ..) = self.bump(mode)?;
                    if let Token::Word { text, .. } = tok {
                        parts.push(ValuePart::Literal(text));
                    }
                }
                Token::Dollar => {
                    self.bump(mode)?;
                    if matches!(self.peek(Mode::Eval)?, Token::LParen) {
                        self.bump(Mode::Eval)?;
                        let inner = self.read_eval_text()?;
                        parts.push(ValuePart::Eval(inner));
                    } else {
                        let (tok, ..) = self.bump(Mode::Variable)?;
                        if let Token::Word { text, .. } = tok {
                            parts.push(ValuePart::VarRef(text));
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(parts)
    }

    /// Consume tokens up to the matching `)` of an already-opened `$(`,
    /// returning the raw text between them for `crate::functions` to
    /// parse independently (function-call grammar is evaluated lazily,
    /// scope-dependently, not at parse time).
    fn read_eval_text(&mut self) -> Result<String, ParseError> {
        let mut depth = 1u32;
        let mut out = String::new();
        loop {
            let (tok, ..) = self.bump(Mode::Eval)?;
            match tok {
                Token::LParen => {
                    depth += 1;
                    out.push('(');
                }
                Token::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(out);
                    }
                    out.push(')');
                }
                Token::Eof => return Err(ParseError::UnexpectedEof("`)`")),
                other => {
                    if !out.is_empty() {
                        out.push(' ');
                    }
                    out.push_str(&other.to_string());
                }
            }
        }
    }

    fn read_raw_line(&mut self) -> Result<String, ParseError> {
        let value = self.read_value(Mode::Eval)?;
        Ok(flatten_name(&value).unwrap_or_default())
    }

    fn expect_line_end(&mut self) -> Result<(), ParseError> {
        match self.peek(Mode::FirstToken)? {
            Token::Newline | Token::Eof | Token::RBrace => Ok(()),
            other => {
                let s = other.to_string();
                Err(ParseError::Unexpected { line: 0, column: 0, expected: "end of line", found: s })
            }
        }
    }
}

fn flatten_name(v: &Value) -> Option<String> {
    if v.is_empty() {
        return None;
    }
    let mut s = String::new();
    for part in v {
        match part {
            ValuePart::Literal(t) => s.push_str(t),
            ValuePart::VarRef(n) => {
                s.push('$');
                s.push_str(n);
            }
            ValuePart::Eval(e) => {
                s.push_str("$(");
                s.push_str(e);
                s.push(')');
            }
        }
    }
    Some(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_assignment() {
        let stmts = parse_buildfile("cxx.std = 20\n").unwrap();
        assert_eq!(
            stmts,
            vec![Statement::Assignment {
                name: "cxx.std".into(),
                op: AssignOp::Assign,
                value: vec![ValuePart::Literal("20".into())],
            }]
        );
    }

    #[test]
    fn parses_dependency_declaration() {
        let stmts = parse_buildfile("exe{hello}: cxx{hello}\n").unwrap();
        match &stmts[0] {
            Statement::Dependency { targets, prerequisites, block } => {
                assert_eq!(flatten_name(&targets[0]).unwrap(), "exe{hello}");
                assert_eq!(prerequisites.len(), 1);
                assert!(block.is_empty());
            }
            other => panic!("expected Dependency, got {other:?}"),
        }
    }

    #[test]
    fn parses_nested_scope_block() {
        let stmts = parse_buildfile("tests/\n{\n  cxx.std = 20\n}\n").unwrap();
        assert_eq!(stmts.len(), 1);
        assert!(matches!(stmts[0], Statement::ScopeBlock { .. }));
    }

    #[test]
    fn parses_for_loop() {
        let stmts = parse_buildfile("for f: $sources\n{\n  print $f\n}\n").unwrap();
        match &stmts[0] {
            Statement::For { var, .. } => assert_eq!(var, "f"),
            other => panic!("expected For, got {other:?}"),
        }
    }

    #[test]
    fn parses_eval_call_in_value() {
        let stmts = parse_buildfile("x = $(regex.match foo, bar)\n").unwrap();
        match &stmts[0] {
            Statement::Assignment { value, .. } => {
                assert!(matches!(&value[0], ValuePart::Eval(s) if s.contains("regex.match")));
            }
            other => panic!("expected Assignment, got {other:?}"),
        }
    }
}
