use std::collections::HashMap;
use std::fmt;

use crate::path::DirPath;

/// A stable index into a [`VariablePool`]. Carried around instead of the
/// variable's name so that lookups in hot paths (scope/target variable
/// maps) are integer comparisons rather than string comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(pub(crate) u32);

/// The scope at which an override (`name=value` passed on the command
/// line, prefixed `!`/`%`/`/`) is visible, per spec.md §3 ("Variable") and
/// §6 ("CLI").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum OverrideVisibility {
    /// Visible everywhere (`!name=value`).
    Global,
    /// Visible within one project (`%name=value`), the default for a
    /// plain `name=value`.
    #[default]
    Project,
    /// Visible within one scope (`/name=value`).
    Scope,
    /// Visible only on a specific target.
    Target,
    /// Visible only on a specific prerequisite.
    Prerequisite,
}

/// How an override composes with the value it shadows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideKind {
    /// `name=value` — replace the original value outright.
    Assign,
    /// `name+=value` — append to the original value.
    Append,
    /// `name=+value` — prepend to the original value.
    Prepend,
}

/// Immutable metadata for one variable name, interned once per
/// [`VariablePool`]. A variable's *value* lives in whatever
/// [`crate::value::Value`]-keyed map looked it up (a scope's variable map,
/// a target's pad, ...); this struct only carries the name's shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    /// This variable's pool-assigned id.
    pub id: VariableId,
    /// The dotted name as written in buildfiles (`config.cxx.std`).
    pub name: String,
    /// If `Some`, assigning a value of a different
    /// [`crate::value::Value::type_name`] to this variable is an error.
    pub type_tag: Option<&'static str>,
    /// The narrowest visibility at which an override of this variable may
    /// be introduced. `None` means the variable cannot be overridden at
    /// all (most buildfile-internal variables).
    pub override_visibility: Option<OverrideVisibility>,
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// One registered override: a `(kind, visibility, value-as-text)` record
/// attached to a [`Variable`] by the CLI driver or a buildfile-level
/// `config.*` mechanism. The actual value is parsed lazily against the
/// variable's expected type at first lookup (mirrors the original's
/// deferred override parsing, since the type may not be known until the
/// module that declares the variable loads).
#[derive(Debug, Clone)]
pub struct OverrideShadow {
    /// How this override composes with the value it shadows.
    pub kind: OverrideKind,
    /// The scope at which this override takes effect.
    pub visibility: OverrideVisibility,
    /// The unparsed right-hand side, as given on the command line or in a
    /// default-options file.
    pub text: String,
    /// For [`OverrideVisibility::Scope`], the out-directory the override is
    /// confined to (`None` for any other visibility, or for a scope
    /// override that was never given one — in which case it applies
    /// everywhere, same as `Project`).
    pub scope: Option<DirPath>,
}

/// The process-wide (here: per-[`Context`](../../bld_core/context/struct.Context.html))
/// table of interned [`Variable`]s, keyed by name. Variables are inserted
/// once and never removed (spec.md §3's "Lifecycle").
#[derive(Debug, Default)]
pub struct VariablePool {
    by_name: HashMap<String, VariableId>,
    variables: Vec<Variable>,
    overrides: HashMap<VariableId, Vec<OverrideShadow>>,
}

impl VariablePool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an already-interned variable by name.
    pub fn find(&self, name: &str) -> Option<&Variable> {
        self.by_name.get(name).map(|id| &self.variables[id.0 as usize])
    }

    /// Intern `name`, inserting it with no type constraint and no override
    /// visibility if it is new. Returns the existing entry if already
    /// present (a second `insert` of the same name never changes its
    /// metadata — the first definition wins, matching the original).
    pub fn insert(&mut self, name: impl Into<String>) -> VariableId {
        let name = name.into();
        if let Some(id) = self.by_name.get(&name) {
            return *id;
        }
        let id = VariableId(self.variables.len() as u32);
        self.variables.push(Variable {
            id,
            name: name.clone(),
            type_tag: None,
            override_visibility: None,
        });
        self.by_name.insert(name, id);
        id
    }

    /// Intern `name` with a required [`crate::value::Value`] type tag.
    pub fn insert_typed(&mut self, name: impl Into<String>, type_tag: &'static str) -> VariableId {
        let id = self.insert(name);
        self.variables[id.0 as usize].type_tag = Some(type_tag);
        id
    }

    /// Mark `id` as overridable starting at `visibility` (the narrowest
    /// scope an override may target — wider visibilities, e.g. `Global`
    /// when `Project` was declared, are always allowed too).
    pub fn allow_override(&mut self, id: VariableId, visibility: OverrideVisibility) {
        self.variables[id.0 as usize].override_visibility = Some(visibility);
    }

    /// Fetch a variable's metadata by id.
    pub fn get(&self, id: VariableId) -> &Variable {
        &self.variables[id.0 as usize]
    }

    /// Register an override shadow for `id`. Returns an error if the
    /// variable does not permit overrides at all.
    ///
    /// # Errors
    ///
    /// Returns [`OverrideError::NotOverridable`] if `id`'s
    /// `override_visibility` is `None`.
    pub fn add_override(
        &mut self,
        id: VariableId,
        shadow: OverrideShadow,
    ) -> Result<(), OverrideError> {
        if self.variables[id.0 as usize].override_visibility.is_none() {
            return Err(OverrideError::NotOverridable(
                self.variables[id.0 as usize].name.clone(),
            ));
        }
        self.overrides.entry(id).or_default().push(shadow);
        Ok(())
    }

    /// The override shadows registered for `id`, in registration order
    /// (narrowest-declared-last is *not* assumed; callers select by
    /// visibility applicability, see `bld-core::scope::Scope::lookup`).
    pub fn overrides_of(&self, id: VariableId) -> &[OverrideShadow] {
        self.overrides.get(&id).map_or(&[], Vec::as_slice)
    }
}

/// Error registering an override for a variable that does not allow one.
#[derive(Debug, thiserror::Error)]
pub enum OverrideError {
    /// The named variable was never marked overridable.
    #[error("variable `{0}` is not overridable")]
    NotOverridable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let mut pool = VariablePool::new();
        let a = pool.insert("x");
        let b = pool.insert("x");
        assert_eq!(a, b);
        assert_eq!(pool.variables.len(), 1);
    }

    #[test]
    fn overrides_require_opt_in() {
        let mut pool = VariablePool::new();
        let id = pool.insert("x");
        let shadow = OverrideShadow {
            kind: OverrideKind::Assign,
            visibility: OverrideVisibility::Project,
            text: "1".into(),
            scope: None,
        };
        assert!(matches!(
            pool.add_override(id, shadow.clone()),
            Err(OverrideError::NotOverridable(_))
        ));
        pool.allow_override(id, OverrideVisibility::Project);
        assert!(pool.add_override(id, shadow).is_ok());
        assert_eq!(pool.overrides_of(id).len(), 1);
    }
}
