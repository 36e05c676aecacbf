//! Parses a *buildspec* — the trailing, non-option part of a `bld`
//! command line — into meta-operation/operation/target groups (spec.md §6
//! "CLI": `meta-op(op(targets, target@src-base, ...))` with sugar
//! `meta(op(...))`, `op(...)`, and a bare target list defaulting to
//! `perform(update(.))`).
//!
//! The grammar needs real parens/commas as punctuation, which `clap`
//! cannot express as a derive-macro argument shape (spec.md §1 "ambient
//! stack": "a hand-rolled buildspec grammar" is the documented exception to
//! "use the ecosystem crate"). This is a small hand-written recursive
//! descent parser over a flat token stream, mirroring the buildfile
//! parser's own style (`bld_core::parser`) rather than pulling in a parser
//! combinator crate for a grammar this size.

use std::fmt;

use crate::overrides::{looks_like_override, CliOverride};

/// One target reference inside an operation group (spec.md §6:
/// `target@src-base`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecTarget {
    /// The target name, as written (resolved against a project's scopes
    /// later — the buildspec parser does not itself know about scopes).
    pub name: String,
    /// An explicit out-of-tree source base, if `@src-base` was given.
    pub src_base: Option<String>,
}

/// One `op(targets...)` group (or its sugar — a bare target list with an
/// implied `update`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpGroup {
    /// The operation name (`update`, `clean`, `test`, `install`, ...).
    pub op: String,
    /// The targets this operation applies to.
    pub targets: Vec<SpecTarget>,
}

/// One `meta-op(op(...), op(...), ...)` group (or its sugar).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaGroup {
    /// The meta-operation name (`perform`, `configure`, `disfigure`,
    /// `info`, `dist`, `noop`).
    pub meta: String,
    /// The operation groups nested under it.
    pub ops: Vec<OpGroup>,
}

/// A fully parsed buildspec: a sequence of meta-operation groups executed
/// in order, plus whatever variable overrides were interspersed among them
/// (spec.md §6: override arguments may appear anywhere on the command
/// line, not only before the buildspec).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSpec {
    /// The meta-operation groups, in command-line order.
    pub groups: Vec<MetaGroup>,
}

/// Error parsing a buildspec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildspecError {
    /// A `(` was never closed.
    #[error("unterminated group: missing ')'")]
    UnterminatedGroup,
    /// A `)` appeared with no matching `(`.
    #[error("unexpected ')'")]
    UnmatchedCloseParen,
    /// A name was expected but not found (e.g. `()`  with nothing inside).
    #[error("expected a name at position {0}")]
    ExpectedName(usize),
    /// `@` appeared with no following source-base text.
    #[error("expected a source base after '@'")]
    ExpectedSrcBase,
}

/// Split the raw trailing CLI arguments into buildspec tokens and variable
/// overrides (spec.md §6), then parse the buildspec tokens.
///
/// Overrides are recognized by shape (`looks_like_override`) wherever they
/// appear among the positional arguments; everything else feeds the
/// buildspec grammar.
///
/// # Errors
///
/// Returns [`BuildspecError`] if the remaining tokens do not form a valid
/// buildspec.
pub fn parse_args(args: &[String]) -> Result<(BuildSpec, Vec<CliOverride>), BuildspecError> {
    let mut overrides = Vec::new();
    let mut spec_tokens = Vec::new();
    for arg in args {
        let plausible = !arg.contains('(') && !arg.contains(')') && !arg.contains(',');
        if plausible && looks_like_override(arg) {
            overrides.push(crate::overrides::parse_override(arg).expect("looks_like_override implies parse_override succeeds"));
        } else {
            spec_tokens.push(arg.clone());
        }
    }
    let spec = parse_buildspec(&spec_tokens)?;
    Ok((spec, overrides))
}

/// Parse already-separated buildspec tokens (no override arguments mixed
/// in) into a [`BuildSpec`].
///
/// # Errors
///
/// Returns [`BuildspecError`] on malformed grouping.
pub fn parse_buildspec(tokens: &[String]) -> Result<BuildSpec, BuildspecError> {
    if tokens.is_empty() {
        return Ok(BuildSpec {
            groups: vec![MetaGroup {
                meta: "perform".to_string(),
                ops: vec![OpGroup { op: "update".to_string(), targets: vec![SpecTarget { name: ".".to_string(), src_base: None }] }],
            }],
        });
    }

    let joined = tokens.join(" ");
    let toks = lex(&joined);
    let mut p = Parser { toks: &toks, pos: 0 };
    let groups = p.parse_top_level()?;
    Ok(BuildSpec { groups })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Word(String),
    LParen,
    RParen,
    Comma,
    At,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tok::Word(w) => write!(f, "{w}"),
            Tok::LParen => write!(f, "("),
            Tok::RParen => write!(f, ")"),
            Tok::Comma => write!(f, ","),
            Tok::At => write!(f, "@"),
        }
    }
}

fn lex(text: &str) -> Vec<Tok> {
    let mut toks = Vec::new();
    let mut word = String::new();
    let flush = |word: &mut String, toks: &mut Vec<Tok>| {
        if !word.is_empty() {
            toks.push(Tok::Word(std::mem::take(word)));
        }
    };
    for c in text.chars() {
        match c {
            '(' => {
                flush(&mut word, &mut toks);
                toks.push(Tok::LParen);
            }
            ')' => {
                flush(&mut word, &mut toks);
                toks.push(Tok::RParen);
            }
            ',' => {
                flush(&mut word, &mut toks);
                toks.push(Tok::Comma);
            }
            '@' => {
                flush(&mut word, &mut toks);
                toks.push(Tok::At);
            }
            c if c.is_whitespace() => flush(&mut word, &mut toks),
            c => word.push(c),
        }
    }
    flush(&mut word, &mut toks);
    toks
}

struct Parser<'a> {
    toks: &'a [Tok],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn bump(&mut self) -> Option<&Tok> {
        let t = self.toks.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    /// A sequence of top-level groups/targets, consumed until end of
    /// input. Each top-level item is either `name(...)` (a meta or op
    /// group, disambiguated by what follows its close paren) or a bare
    /// target name; consecutive bare targets collect into one implicit
    /// `perform(update(...))` group.
    fn parse_top_level(&mut self) -> Result<Vec<MetaGroup>, BuildspecError> {
        let mut groups = Vec::new();
        let mut bare_targets = Vec::new();
        while self.peek().is_some() {
            if self.peek_is_group_head() {
                if !bare_targets.is_empty() {
                    groups.push(MetaGroup {
                        meta: "perform".to_string(),
                        ops: vec![OpGroup { op: "update".to_string(), targets: std::mem::take(&mut bare_targets) }],
                    });
                }
                groups.push(self.parse_named_group()?);
            } else {
                bare_targets.push(self.parse_target()?);
                if matches!(self.peek(), Some(Tok::Comma)) {
                    self.bump();
                }
            }
        }
        if !bare_targets.is_empty() {
            groups.push(MetaGroup {
                meta: "perform".to_string(),
                ops: vec![OpGroup { op: "update".to_string(), targets: bare_targets }],
            });
        }
        Ok(groups)
    }

    /// `true` if the upcoming tokens are `word (` — the head of a named
    /// group rather than a bare target name.
    fn peek_is_group_head(&self) -> bool {
        matches!(self.toks.get(self.pos), Some(Tok::Word(_))) && matches!(self.toks.get(self.pos + 1), Some(Tok::LParen))
    }

    /// Parse `name(...)`, deciding at the inner level whether `name` was a
    /// meta-operation (its parenthesized body contains further
    /// `op(...)`-shaped groups) or an operation (sugar: `op(targets)`,
    /// meta defaults to `perform`).
    fn parse_named_group(&mut self) -> Result<MetaGroup, BuildspecError> {
        let start = self.pos;
        let name = self.expect_word()?;
        self.expect(Tok::LParen)?;
        if self.inner_is_op_groups() {
            let mut ops = Vec::new();
            loop {
                ops.push(self.parse_op_group()?);
                match self.peek() {
                    Some(Tok::Comma) => {
                        self.bump();
                    }
                    Some(Tok::RParen) => break,
                    _ => return Err(BuildspecError::UnterminatedGroup),
                }
            }
            self.expect(Tok::RParen)?;
            Ok(MetaGroup { meta: name, ops })
        } else {
            let _ = start;
            let targets = self.parse_target_list()?;
            self.expect(Tok::RParen)?;
            Ok(MetaGroup { meta: "perform".to_string(), ops: vec![OpGroup { op: name, targets }] })
        }
    }

    /// `parse_op_group` is the same shape as the operation-sugar branch of
    /// [`Self::parse_named_group`]; factored out so a `meta(op(...),
    /// op(...))` body can reuse it without re-deciding meta-vs-op.
    fn parse_op_group(&mut self) -> Result<OpGroup, BuildspecError> {
        let name = self.expect_word()?;
        self.expect(Tok::LParen)?;
        let targets = self.parse_target_list()?;
        self.expect(Tok::RParen)?;
        Ok(OpGroup { op: name, targets })
    }

    /// Lookahead: does the group we just opened with `(` contain
    /// `word(` at its head (an operation group), rather than a bare target
    /// list? Both shapes start with a word; the distinguishing token is
    /// whether an unparenthesized `(` follows that first word before a
    /// comma/close-paren/`@`.
    fn inner_is_op_groups(&self) -> bool {
        matches!(self.toks.get(self.pos), Some(Tok::Word(_))) && matches!(self.toks.get(self.pos + 1), Some(Tok::LParen))
    }

    fn parse_target_list(&mut self) -> Result<Vec<SpecTarget>, BuildspecError> {
        let mut targets = Vec::new();
        if matches!(self.peek(), Some(Tok::RParen)) {
            return Ok(targets);
        }
        loop {
            targets.push(self.parse_target()?);
            match self.peek() {
                Some(Tok::Comma) => {
                    self.bump();
                }
                _ => break,
            }
        }
        Ok(targets)
    }

    fn parse_target(&mut self) -> Result<SpecTarget, BuildspecError> {
        let name = self.expect_word()?;
        let src_base = if matches!(self.peek(), Some(Tok::At)) {
            self.bump();
            Some(self.expect_word().map_err(|_| BuildspecError::ExpectedSrcBase)?)
        } else {
            None
        };
        Ok(SpecTarget { name, src_base })
    }

    fn expect_word(&mut self) -> Result<String, BuildspecError> {
        match self.bump() {
            Some(Tok::Word(w)) => Ok(w.clone()),
            Some(Tok::RParen) => {
                self.pos -= 1;
                Err(BuildspecError::ExpectedName(self.pos))
            }
            _ => Err(BuildspecError::ExpectedName(self.pos)),
        }
    }

    fn expect(&mut self, want: Tok) -> Result<(), BuildspecError> {
        match self.bump() {
            Some(t) if *t == want => Ok(()),
            Some(Tok::RParen) | None if want == Tok::RParen => Err(BuildspecError::UnterminatedGroup),
            _ => {
                if want == Tok::RParen {
                    Err(BuildspecError::UnterminatedGroup)
                } else {
                    Err(BuildspecError::UnmatchedCloseParen)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(names: &[&str]) -> Vec<SpecTarget> {
        names.iter().map(|n| SpecTarget { name: (*n).to_string(), src_base: None }).collect()
    }

    #[test]
    fn empty_buildspec_defaults_to_perform_update_dot() {
        let spec = parse_buildspec(&[]).unwrap();
        assert_eq!(
            spec.groups,
            vec![MetaGroup {
                meta: "perform".to_string(),
                ops: vec![OpGroup { op: "update".to_string(), targets: targets(&["."]) }],
            }]
        );
    }

    #[test]
    fn bare_target_list_defaults_op_and_meta() {
        let spec = parse_buildspec(&["hello.exe".to_string(), "world.exe".to_string()]).unwrap();
        assert_eq!(spec.groups.len(), 1);
        assert_eq!(spec.groups[0].meta, "perform");
        assert_eq!(spec.groups[0].ops[0].op, "update");
        assert_eq!(spec.groups[0].ops[0].targets, targets(&["hello.exe", "world.exe"]));
    }

    #[test]
    fn op_sugar_defaults_meta_to_perform() {
        let spec = parse_buildspec(&["clean(hello.exe)".to_string()]).unwrap();
        assert_eq!(spec.groups[0].meta, "perform");
        assert_eq!(spec.groups[0].ops[0].op, "clean");
        assert_eq!(spec.groups[0].ops[0].targets, targets(&["hello.exe"]));
    }

    #[test]
    fn full_meta_op_target_form_parses() {
        let spec = parse_buildspec(&["configure(update(hello.exe,", "world.exe))".to_string()]).unwrap();
        assert_eq!(spec.groups[0].meta, "configure");
        assert_eq!(spec.groups[0].ops[0].op, "update");
        assert_eq!(spec.groups[0].ops[0].targets, targets(&["hello.exe", "world.exe"]));
    }

    #[test]
    fn multiple_ops_under_one_meta_group() {
        let spec = parse_buildspec(&["perform(update(a)", ",", "clean(b))".to_string()]).unwrap();
        assert_eq!(spec.groups[0].ops.len(), 2);
        assert_eq!(spec.groups[0].ops[0].op, "update");
        assert_eq!(spec.groups[0].ops[1].op, "clean");
    }

    #[test]
    fn src_base_suffix_is_captured() {
        let spec = parse_buildspec(&["update(hello.exe@../src)".to_string()]).unwrap();
        assert_eq!(spec.groups[0].ops[0].targets[0].src_base.as_deref(), Some("../src"));
    }

    #[test]
    fn unterminated_group_is_an_error() {
        let err = parse_buildspec(&["update(hello.exe".to_string()]).unwrap_err();
        assert_eq!(err, BuildspecError::UnterminatedGroup);
    }

    #[test]
    fn args_partitions_overrides_from_targets() {
        let (spec, overrides) = parse_args(&["config.cxx=clang++".to_string(), "hello.exe".to_string()]).unwrap();
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[0].name, "config.cxx");
        assert_eq!(spec.groups[0].ops[0].targets, targets(&["hello.exe"]));
    }
}
