//! The script/group/test scope tree a pre-parsed script executes
//! against (spec.md §4.9), grounded on `libbuild2/script/script.hxx`'s
//! `environment`/`scope` pair: each `{...}` block in a testscript opens a
//! nested scope that inherits its parent's variables and composes its
//! own timeout against the parent's, so whichever deadline comes first
//! wins.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::ast::Variables;

/// The three nesting levels a testscript scope tree has (spec.md §4.9:
/// "Script", "Group", "Test").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// The whole script file.
    Script,
    /// A `{...}`-delimited group of tests within it.
    Group,
    /// One individual test (a top-level command expression, or the
    /// innermost `{...}` containing one).
    Test,
}

/// One node of the scope tree.
pub struct ScriptScope {
    pub kind: ScopeKind,
    pub parent: Option<Arc<ScriptScope>>,
    /// `1`, `1/2`, ... — the id build2 assigns tests in declaration
    /// order, exposed as the `*` special variable.
    pub id: String,
    /// The scope's working directory (`~` special variable).
    pub work_dir: PathBuf,
    variables: RwLock<Variables>,
    /// This scope's own timeout, if one was set (`set --timeout`,
    /// `testscript.timeout`). Does not include inherited timeouts —
    /// use [`ScriptScope::effective_deadline`] for the composed value.
    pub timeout: Option<Duration>,
    /// When this scope's commands started running, for deadline math.
    started: Instant,
}

impl ScriptScope {
    /// Creates the root `Script` scope.
    #[must_use]
    pub fn root(work_dir: PathBuf, timeout: Option<Duration>, started: Instant) -> Arc<Self> {
        Arc::new(Self {
            kind: ScopeKind::Script,
            parent: None,
            id: String::new(),
            work_dir,
            variables: RwLock::new(Variables::new()),
            timeout,
            started,
        })
    }

    /// Opens a nested scope (a `Group` holding further groups/tests, or a
    /// `Test`), inheriting this scope's work directory by default.
    #[must_use]
    pub fn child(self: &Arc<Self>, kind: ScopeKind, id: impl Into<String>) -> Arc<Self> {
        self.child_with_timeout(kind, id, None)
    }

    /// Like [`Self::child`], but setting the new scope's own timeout.
    #[must_use]
    pub fn child_with_timeout(
        self: &Arc<Self>,
        kind: ScopeKind,
        id: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            parent: Some(self.clone()),
            id: id.into(),
            work_dir: self.work_dir.clone(),
            variables: RwLock::new(Variables::new()),
            timeout,
            started: Instant::now(),
        })
    }

    /// Looks up a variable, walking up to the root if not set locally
    /// (spec.md §4.9's variable scoping follows the scope nesting).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        if let Some(special) = self.special(name) {
            return Some(special);
        }
        if let Some(v) = self.variables.read().unwrap().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    /// Sets a variable in this scope, optionally appending/prepending to
    /// an existing value visible from here (spec.md §4.9 "$name += ...").
    pub fn set(&self, name: &str, value: &str, append: bool, prepend: bool) {
        let mut vars = self.variables.write().unwrap();
        if append || prepend {
            let existing = vars.get(name).cloned().or_else(|| self.get(name)).unwrap_or_default();
            let combined = if append {
                format!("{existing}{value}")
            } else {
                format!("{value}{existing}")
            };
            vars.insert(name.to_string(), combined);
        } else {
            vars.insert(name.to_string(), value.to_string());
        }
    }

    /// Resolves one of the special `~`/`*`/`@` references, or a
    /// positional `for`-loop variable (a bare digit), if `name` is one.
    fn special(&self, name: &str) -> Option<String> {
        match name {
            "~" => Some(self.work_dir.display().to_string()),
            "*" => Some(self.id.clone()),
            "@" => Some(self.group_name()),
            _ => None,
        }
    }

    fn group_name(&self) -> String {
        match self.kind {
            ScopeKind::Group => self.id.clone(),
            _ => self.parent.as_ref().map_or_else(String::new, |p| p.group_name()),
        }
    }

    /// The wall-clock instant by which this scope's commands must have
    /// finished, composed from the nearest ancestor that set a timeout
    /// (spec.md §4.9 "Timeouts compose by earliest deadline" — a child's
    /// explicit timeout narrows but never widens an inherited one).
    #[must_use]
    pub fn effective_deadline(&self) -> Option<Instant> {
        let own = self.timeout.map(|t| self.started + t);
        let inherited = self.parent.as_ref().and_then(|p| p.effective_deadline());
        match (own, inherited) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Time remaining until [`Self::effective_deadline`], or `None` if no
    /// scope in the chain has a timeout.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.effective_deadline().map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Resolves a relative path against this scope's working directory.
    #[must_use]
    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.work_dir.join(p)
        }
    }
}

/// A flattened snapshot of a scope's variables, for diagnostics and
/// `$json`-style introspection, not kept live.
#[must_use]
pub fn snapshot(scope: &ScriptScope) -> BTreeMap<String, String> {
    let mut out = scope.parent.as_ref().map(|p| snapshot(p)).unwrap_or_default();
    out.extend(scope.variables.read().unwrap().clone());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_inherits_parent_variables() {
        let root = ScriptScope::root(PathBuf::from("/work"), None, Instant::now());
        root.set("x", "1", false, false);
        let group = root.child(ScopeKind::Group, "1");
        let test = group.child(ScopeKind::Test, "1");
        assert_eq!(test.get("x").as_deref(), Some("1"));
    }

    #[test]
    fn child_timeout_narrows_but_does_not_widen() {
        let root = ScriptScope::root(PathBuf::from("/work"), Some(Duration::from_secs(10)), Instant::now());
        // A child claiming a longer timeout than its parent still yields
        // the parent's nearer deadline.
        let child = root.child_with_timeout(ScopeKind::Group, "1", Some(Duration::from_secs(100)));
        assert!(child.remaining().unwrap() <= Duration::from_secs(10));
    }

    #[test]
    fn special_vars_resolve() {
        let root = ScriptScope::root(PathBuf::from("/work"), None, Instant::now());
        let group = root.child(ScopeKind::Group, "2");
        let test = group.child(ScopeKind::Test, "2/1");
        assert_eq!(test.get("~").as_deref(), Some("/work"));
        assert_eq!(test.get("*").as_deref(), Some("2/1"));
        assert_eq!(test.get("@").as_deref(), Some("2"));
    }
}
