use std::fmt;

/// A qualified identifier: `[proj%][dir/][type{]value[.ext][}]`.
///
/// This is the currency of the buildfile language (spec.md §3 "Name") —
/// dependency declarations, `import`, and prerequisite specifications are
/// all parsed into `Name`s before being resolved (by `bld-core::algorithm::search`)
/// into concrete targets.
///
/// `pair` marks a name produced by `a@b` pair syntax (used for out-qualified
/// targets, e.g. `exe{foo}@build/`), where this name is the first half of
/// the pair and a second `Name` (or bare directory) follows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name {
    /// Optional project qualifier (`proj%...`).
    pub project: Option<String>,
    /// Optional directory prefix, relative or absolute.
    pub directory: Option<String>,
    /// Optional target-type tag (`type{...}`).
    pub target_type: Option<String>,
    /// The name's value proper.
    pub value: String,
    /// Optional extension (`.ext`); `Some("")` means "explicitly no
    /// extension" (`{}`), distinct from `None` meaning "use the target
    /// type's default extension".
    pub extension: Option<String>,
    /// Set for the first name of an `a@b` pair.
    pub pair: bool,
}

impl Name {
    /// Build a bare, unqualified name (no project/dir/type/extension).
    pub fn simple(value: impl Into<String>) -> Self {
        Self {
            project: None,
            directory: None,
            target_type: None,
            value: value.into(),
            extension: None,
            pair: false,
        }
    }

    /// `true` if this name carries no qualification beyond its value.
    pub fn is_simple(&self) -> bool {
        self.project.is_none()
            && self.directory.is_none()
            && self.target_type.is_none()
            && self.extension.is_none()
    }

    /// Parse a name from its textual buildfile representation.
    ///
    /// This is a small, self-contained parser: the lexer
    /// (`bld-core::lexer`) hands it already-delimited name tokens rather
    /// than raw buildfile text, so it does not need to worry about
    /// surrounding whitespace or commas.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is malformed (unbalanced `{}`, an empty
    /// value, or a `%`/`/`/`{` in a position that does not parse).
    pub fn parse(s: &str) -> Result<Self, NameParseError> {
        let mut rest = s;

        let project = if let Some(idx) = rest.find('%') {
            let (p, r) = rest.split_at(idx);
            rest = &r[1..];
            if p.is_empty() {
                return Err(NameParseError::Malformed(s.to_string()));
            }
            Some(p.to_string())
        } else {
            None
        };

        let directory = if let Some(idx) = rest.rfind('/') {
            let (d, r) = rest.split_at(idx + 1);
            rest = r;
            Some(d.to_string())
        } else {
            None
        };

        let target_type = if let Some(idx) = rest.find('{') {
            if !rest.ends_with('}') {
                return Err(NameParseError::UnbalancedBraces(s.to_string()));
            }
            let (t, r) = rest.split_at(idx);
            rest = &r[1..r.len() - 1];
            Some(t.to_string())
        } else {
            None
        };

        let (value, extension) = match rest.rfind('.') {
            // A leading dot (e.g. `.gitignore`) is part of the value, not
            // an extension marker.
            Some(idx) if idx > 0 => (rest[..idx].to_string(), Some(rest[idx + 1..].to_string())),
            _ => (rest.to_string(), None),
        };

        if value.is_empty() && target_type.is_none() {
            return Err(NameParseError::Malformed(s.to_string()));
        }

        Ok(Self {
            project,
            directory,
            target_type,
            value,
            extension,
            pair: false,
        })
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.project {
            write!(f, "{p}%")?;
        }
        if let Some(d) = &self.directory {
            write!(f, "{d}")?;
        }
        if let Some(t) = &self.target_type {
            write!(f, "{t}{{{}", self.value)?;
            if let Some(e) = &self.extension {
                write!(f, ".{e}")?;
            }
            write!(f, "}}")
        } else {
            write!(f, "{}", self.value)?;
            if let Some(e) = &self.extension {
                write!(f, ".{e}")?;
            }
            Ok(())
        }
    }
}

/// Error parsing a [`Name`] from text.
#[derive(Debug, thiserror::Error)]
pub enum NameParseError {
    /// The name text was empty or otherwise structurally invalid.
    #[error("malformed name: `{0}`")]
    Malformed(String),
    /// A `{` was opened but never closed (or vice versa).
    #[error("unbalanced braces in name: `{0}`")]
    UnbalancedBraces(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_value() {
        let n = Name::parse("foo").unwrap();
        assert_eq!(n, Name::simple("foo"));
    }

    #[test]
    fn parses_typed_name_with_extension() {
        let n = Name::parse("exe{foo.bar}").unwrap();
        assert_eq!(n.target_type.as_deref(), Some("exe"));
        assert_eq!(n.value, "foo");
        assert_eq!(n.extension.as_deref(), Some("bar"));
        assert_eq!(n.to_string(), "exe{foo.bar}");
    }

    #[test]
    fn parses_project_and_directory() {
        let n = Name::parse("libhello%src/foo").unwrap();
        assert_eq!(n.project.as_deref(), Some("libhello"));
        assert_eq!(n.directory.as_deref(), Some("src/"));
        assert_eq!(n.value, "foo");
    }

    #[test]
    fn leading_dot_is_not_an_extension() {
        let n = Name::parse(".gitignore").unwrap();
        assert_eq!(n.value, ".gitignore");
        assert_eq!(n.extension, None);
    }

    #[test]
    fn unbalanced_braces_is_an_error() {
        assert!(matches!(
            Name::parse("exe{foo"),
            Err(NameParseError::UnbalancedBraces(_))
        ));
    }

    #[test]
    fn display_round_trips_simple_names() {
        for s in ["foo", "foo.bar"] {
            assert_eq!(Name::parse(s).unwrap().to_string(), s);
        }
    }
}
