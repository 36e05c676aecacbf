//! Parses command-line variable assignments (spec.md §6 "CLI": `<name>=
//! <value>`/`+=`/`=+`, optionally prefixed `!` global / `%` project / `/`
//! scope) into [`bld_schema::variable::OverrideShadow`]s, and wires them
//! into a project's [`bld_schema::variable::VariablePool`].
//!
//! Grounded on `bld_schema::variable`'s own doc comments, which describe
//! exactly this CLI syntax but (until this module) had no producer.

use bld_schema::path::DirPath;
use bld_schema::variable::{OverrideKind, OverrideShadow, OverrideVisibility, VariablePool};

/// One parsed `name[+=|=+|=]value` command-line argument, still carrying
/// its unparsed right-hand side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliOverride {
    /// The variable's dotted name, prefix stripped.
    pub name: String,
    /// How this override composes onto the variable's buildfile value.
    pub kind: OverrideKind,
    /// The visibility the CLI prefix requested.
    pub visibility: OverrideVisibility,
    /// The unparsed right-hand side text.
    pub text: String,
}

/// `true` if `token` has the shape of a variable override rather than a
/// buildspec target or grammar token. A token is an override if, after
/// stripping at most one of `!`/`%`/`/`, it starts with a name character
/// (letter, digit, `_`, or `.`) and contains one of `=`, `+=`, `=+` before
/// any buildspec punctuation (`(`, `)`, `,`, `@`).
#[must_use]
pub fn looks_like_override(token: &str) -> bool {
    parse_override(token).is_some()
}

/// Parse one command-line argument as a variable override, or return
/// `None` if it does not have override shape (a plain buildspec token).
#[must_use]
pub fn parse_override(token: &str) -> Option<CliOverride> {
    let (visibility, rest) = match token.chars().next() {
        Some('!') => (OverrideVisibility::Global, &token[1..]),
        Some('%') => (OverrideVisibility::Project, &token[1..]),
        Some('/') => (OverrideVisibility::Scope, &token[1..]),
        _ => (OverrideVisibility::Project, token),
    };

    let name_len = rest
        .char_indices()
        .take_while(|(_, c)| c.is_alphanumeric() || *c == '_' || *c == '.' || *c == '-')
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    if name_len == 0 {
        return None;
    }
    let (name, op_and_value) = rest.split_at(name_len);

    let (kind, value) = if let Some(v) = op_and_value.strip_prefix("+=") {
        (OverrideKind::Append, v)
    } else if let Some(v) = op_and_value.strip_prefix("=+") {
        (OverrideKind::Prepend, v)
    } else if let Some(v) = op_and_value.strip_prefix('=') {
        (OverrideKind::Assign, v)
    } else {
        return None;
    };

    Some(CliOverride {
        name: name.to_string(),
        kind,
        visibility,
        text: value.to_string(),
    })
}

/// Register `overrides` into `pool`, creating each named variable if it is
/// not already interned and marking it overridable at (at least) the
/// requested visibility.
///
/// `scope_dir`, if given, confines any `Scope`-visibility override in this
/// batch to that out-directory subtree (spec.md §6: a `/name=value`
/// argument applies "within one scope").
///
/// # Errors
///
/// Never fails in practice — a CLI-originated override always marks its
/// own variable overridable before registering the shadow — but surfaces
/// [`bld_schema::variable::OverrideError`] for completeness, since
/// `VariablePool::add_override` can fail in general.
pub fn apply_overrides(
    pool: &mut VariablePool,
    overrides: &[CliOverride],
    scope_dir: Option<&DirPath>,
) -> Result<(), bld_schema::variable::OverrideError> {
    for ov in overrides {
        let id = pool.insert(&ov.name);
        pool.allow_override(id, ov.visibility);
        let scope = if ov.visibility == OverrideVisibility::Scope {
            scope_dir.cloned()
        } else {
            None
        };
        pool.add_override(
            id,
            OverrideShadow { kind: ov.kind, visibility: ov.visibility, text: ov.text.clone(), scope },
        )?;
    }
    Ok(())
}

/// Parse the newline-separated `BLD_VAR_OVR` environment variable (spec.md
/// §6 "Environment": global overrides a parent `bld` invocation injects
/// into a child's environment). Each line is a plain, unprefixed
/// `name=value`-shaped override already known to be global, so the `!`
/// prefix is implied rather than required.
#[must_use]
pub fn parse_env_overrides(text: &str) -> Vec<CliOverride> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| {
            parse_override(line).map(|mut ov| {
                ov.visibility = OverrideVisibility::Global;
                ov
            })
        })
        .collect()
}

/// Render a batch of overrides back into `BLD_VAR_OVR`'s line format, for
/// propagation into a child process's environment (spec.md §6). Only
/// `Global`-visibility overrides are carried — `Project`/`Scope` overrides
/// are specific to this invocation's own project and should not leak into
/// an unrelated child build.
#[must_use]
pub fn render_env_overrides(overrides: &[CliOverride]) -> String {
    overrides
        .iter()
        .filter(|ov| ov.visibility == OverrideVisibility::Global)
        .map(|ov| {
            let op = match ov.kind {
                OverrideKind::Assign => "=",
                OverrideKind::Append => "+=",
                OverrideKind::Prepend => "=+",
            };
            format!("{}{op}{}", ov.name, ov.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_assignment_defaults_to_project_visibility() {
        let ov = parse_override("config.cxx=clang++").unwrap();
        assert_eq!(ov.name, "config.cxx");
        assert_eq!(ov.kind, OverrideKind::Assign);
        assert_eq!(ov.visibility, OverrideVisibility::Project);
        assert_eq!(ov.text, "clang++");
    }

    #[test]
    fn global_prefix_is_recognized() {
        let ov = parse_override("!config.install.root=/opt/x").unwrap();
        assert_eq!(ov.visibility, OverrideVisibility::Global);
        assert_eq!(ov.name, "config.install.root");
        assert_eq!(ov.text, "/opt/x");
    }

    #[test]
    fn scope_prefix_is_recognized() {
        let ov = parse_override("/cxx.coptions+=-O2").unwrap();
        assert_eq!(ov.visibility, OverrideVisibility::Scope);
        assert_eq!(ov.kind, OverrideKind::Append);
        assert_eq!(ov.text, "-O2");
    }

    #[test]
    fn prepend_operator_is_recognized() {
        let ov = parse_override("cxx.poptions=+-I/usr/include").unwrap();
        assert_eq!(ov.kind, OverrideKind::Prepend);
        assert_eq!(ov.text, "-I/usr/include");
    }

    #[test]
    fn bare_target_is_not_an_override() {
        assert!(parse_override("hello.exe").is_none());
        assert!(parse_override("update(hello.exe)").is_none());
    }

    #[test]
    fn apply_overrides_registers_and_marks_overridable() {
        let mut pool = VariablePool::new();
        let overrides = vec![parse_override("config.cxx.std=20").unwrap()];
        apply_overrides(&mut pool, &overrides, None).unwrap();
        let id = pool.find("config.cxx.std").unwrap().id;
        assert_eq!(pool.overrides_of(id).len(), 1);
    }

    #[test]
    fn env_overrides_round_trip_as_global() {
        let text = "config.cxx=clang++\nconfig.install.root=/opt/x";
        let parsed = parse_env_overrides(text);
        assert_eq!(parsed.len(), 2);
        assert!(parsed.iter().all(|o| o.visibility == OverrideVisibility::Global));
        let rendered = render_env_overrides(&parsed);
        assert_eq!(rendered, "config.cxx=clang++\nconfig.install.root=/opt/x");
    }
}
