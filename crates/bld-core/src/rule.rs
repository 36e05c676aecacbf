//! Rules: the `match`/`apply`/recipe triple that decides how a target is
//! built (spec.md §3 "Rule", §4.5 "Match", §4.6 "Apply"/"Execute").
//!
//! Rather than a trait object hierarchy keyed by dynamic dispatch through
//! a single `virtual` method table (the original C++ design), rule
//! *lookup* here is data — a [`RuleMap`] keyed by
//! `(meta-operation, operation, target-type, hint)` — while rule *behavior*
//! is the one `match_rule`/`apply` trait a hint selects between (spec.md
//! §9's "tagged-variant-plus-vtable-struct" redesign note).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::operation::Action;
use crate::target::{Outcome, Target, TargetType};

/// The outcome of a rule's `match` step (spec.md §4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    /// This rule claims the target for this action; `hint` (possibly
    /// empty) is recorded for diagnostics and for breaking ties between
    /// equally-ranked ambiguous matches.
    Matched { hint: String },
    /// This rule does not apply to this target/action.
    NotMatched,
}

/// Error returned by a rule's `match_rule`/`apply`, or synthesized by the
/// match-ambiguity/no-rule logic in `bld-core::algorithm`.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// No rule matched this target for this action (spec.md §4.5's
    /// "no-rule" edge case).
    #[error("no rule to {action} {target}")]
    NoRule {
        /// The operation name, for the message.
        action: String,
        /// The target's display form.
        target: String,
    },
    /// More than one rule matched with no hint to disambiguate (spec.md
    /// §4.5's "ambiguous match" edge case).
    #[error("multiple rules match {target} for {action}: {candidates:?}")]
    Ambiguous {
        /// The operation name.
        action: String,
        /// The target's display form.
        target: String,
        /// Names of the tied candidates.
        candidates: Vec<String>,
    },
    /// A rule's `apply` failed outright (bad recipe configuration, a
    /// prerequisite that itself failed to resolve, ...).
    #[error("{0}")]
    Apply(String),
    /// `target` depends (directly or transitively) on itself for `action`
    /// (spec.md §8's boundary behaviour: "A cyclic dependency is detected
    /// and reported (failure, not hang)").
    #[error("dependency cycle detected: {path}")]
    Cycle {
        /// The chain of targets from the cycle's start back to itself,
        /// `->`-joined, for the diagnostic.
        path: String,
    },
}

/// Future type returned by a [`Recipe`] invocation.
pub type RecipeFuture =
    Pin<Box<dyn Future<Output = Result<Outcome, RuleError>> + Send>>;

/// A resolved recipe: the closure `apply` hands back for `execute` to run
/// later (spec.md §3 "Recipe"). Cheaply [`Clone`]able (an `Arc` under the
/// hood) since it is stored in a target's [`crate::target::ActionPad`] and
/// may be read from multiple places (dump/diagnostics, the scheduler).
#[derive(Clone)]
pub struct Recipe(
    Arc<dyn Fn(Arc<Context>, Action, Arc<Target>) -> RecipeFuture + Send + Sync>,
);

impl Recipe {
    /// Wrap a recipe closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Arc<Context>, Action, Arc<Target>) -> RecipeFuture + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Invoke the recipe.
    pub fn run(&self, ctx: Arc<Context>, action: Action, target: Arc<Target>) -> RecipeFuture {
        (self.0)(ctx, action, target)
    }
}

/// A rule: matches targets for a given action and, once matched, resolves
/// prerequisites into a concrete [`Recipe`] (spec.md §3 "Rule").
///
/// Implementations are registered into a [`RuleMap`] rather than looked up
/// through dynamic dispatch on the target type, per spec.md §9's redesign
/// guidance — `match_rule`/`apply` are still a trait (not a raw function
/// pointer pair) because several rules (the generic `file_rule`, the `cc`
/// compile/link rules) share state (a `bld-cc::Toolchain`, options) that is
/// cleanest to carry as `self`.
pub trait Rule: Send + Sync {
    /// A short, stable name used in diagnostics (`"cxx.compile"`, ...).
    fn name(&self) -> &str;

    /// Decide whether this rule can build `target` for `action`.
    fn match_rule(&self, ctx: &Context, action: Action, target: &Target) -> MatchResult;

    /// Resolve `target`'s prerequisites and produce a recipe. Only called
    /// after [`Rule::match_rule`] returned `Matched` for the same
    /// `(action, target)`.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Apply`] if prerequisite resolution or recipe
    /// construction fails.
    fn apply(
        &self,
        ctx: &Context,
        action: Action,
        target: &Arc<Target>,
    ) -> Result<Recipe, RuleError>;
}

/// Lookup key for the rule registry (spec.md §3 "Rule": "keyed by
/// (meta-operation, operation, target-type)").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RuleKey {
    meta_name: &'static str,
    op_name: &'static str,
    type_name: &'static str,
}

/// The registry mapping `(meta-operation, operation, target-type)` to the
/// candidate rules a match search should try (spec.md §3 "Rule").
///
/// `hint` (a rule-supplied disambiguation string, e.g. a target-type
/// pattern narrower than a registration's own type) is only consulted when
/// more than one rule in the same bucket matches; see
/// `crate::algorithm::match_target`.
#[derive(Default)]
pub struct RuleMap {
    entries: HashMap<RuleKey, Vec<Arc<dyn Rule>>>,
}

impl RuleMap {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `rule` for `(meta_name, op_name, type_name)`. `op_name`
    /// `""` registers for every operation under `meta_name` (a module's
    /// "any operation" fallback rule).
    pub fn register(
        &mut self,
        meta_name: &'static str,
        op_name: &'static str,
        type_name: &'static str,
        rule: Arc<dyn Rule>,
    ) {
        self.entries
            .entry(RuleKey { meta_name, op_name, type_name })
            .or_default()
            .push(rule);
    }

    /// All rules registered for the exact `(meta, op, type)` bucket, plus
    /// (appended) any registered under that meta-operation's `""`
    /// (any-operation) bucket for the same type. Walks the target type's
    /// base chain if the derived type has no registrations of its own.
    pub fn candidates(
        &self,
        meta_name: &'static str,
        op_name: &'static str,
        target_type: &'static TargetType,
    ) -> Vec<Arc<dyn Rule>> {
        let mut cur = Some(target_type);
        while let Some(tt) = cur {
            let mut found = Vec::new();
            if let Some(v) = self.entries.get(&RuleKey {
                meta_name,
                op_name,
                type_name: tt.name,
            }) {
                found.extend(v.iter().cloned());
            }
            if !op_name.is_empty() {
                if let Some(v) = self.entries.get(&RuleKey {
                    meta_name,
                    op_name: "",
                    type_name: tt.name,
                }) {
                    found.extend(v.iter().cloned());
                }
            }
            if !found.is_empty() {
                return found;
            }
            cur = tt.base;
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{DeclKind, TargetKey, FILE};
    use bld_schema::path::DirPath;

    struct AlwaysMatch;
    impl Rule for AlwaysMatch {
        fn name(&self) -> &str {
            "always"
        }
        fn match_rule(&self, _ctx: &Context, _action: Action, _target: &Target) -> MatchResult {
            MatchResult::Matched { hint: String::new() }
        }
        fn apply(
            &self,
            _ctx: &Context,
            _action: Action,
            _target: &Arc<Target>,
        ) -> Result<Recipe, RuleError> {
            Err(RuleError::Apply("test rule".into()))
        }
    }

    #[test]
    fn candidates_fall_back_through_base_types() {
        use crate::target::{DIR, FSDIR};
        let mut map = RuleMap::new();
        map.register("perform", "update", "dir", Arc::new(AlwaysMatch));
        let found = map.candidates("perform", "update", &FSDIR);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name(), "always");
        let _ = DIR;
    }

    #[test]
    fn any_operation_bucket_is_appended() {
        let mut map = RuleMap::new();
        map.register("perform", "", "file", Arc::new(AlwaysMatch));
        let found = map.candidates("perform", "update", &FILE);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn unregistered_type_has_no_candidates() {
        let map = RuleMap::new();
        assert!(map.candidates("perform", "update", &FILE).is_empty());
        let _key = TargetKey {
            type_name: "file",
            out_dir: DirPath::new("out"),
            src_dir: None,
            name: "x".into(),
            extension: None,
        };
        let _ = DeclKind::Real;
    }
}
