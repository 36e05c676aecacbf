//! Rules every build needs regardless of toolchain: `fsdir{}`, `alias`,
//! and the fallback rule for a plain source `file{}` with no recipe of
//! its own (spec.md §3 "Rule", §4.6 "Apply"/"Execute").

use std::sync::Arc;

use bld_schema::path::Timestamp;

use crate::algorithm::resolve_prerequisites;
use crate::context::Context;
use crate::operation::Action;
use crate::rule::{MatchResult, Recipe, RecipeFuture, Rule, RuleError};
use crate::target::{Outcome, Target, ALIAS, FSDIR};

/// Ensures a directory exists before anything that writes into it runs
/// (spec.md §4.6 "fsdir injection"). Registered for every operation under
/// `fsdir{}` and anything deriving from it.
pub struct FsdirRule;

impl Rule for FsdirRule {
    fn name(&self) -> &str {
        "fsdir"
    }

    fn match_rule(&self, _ctx: &Context, _action: Action, target: &Target) -> MatchResult {
        if target.target_type.is_a(&FSDIR) {
            MatchResult::Matched { hint: String::new() }
        } else {
            MatchResult::NotMatched
        }
    }

    fn apply(
        &self,
        _ctx: &Context,
        _action: Action,
        target: &Arc<Target>,
    ) -> Result<Recipe, RuleError> {
        let dir = target.key.out_dir.clone();
        Ok(Recipe::new(move |_ctx, action, _target| -> RecipeFuture {
            let dir = dir.clone();
            Box::pin(async move {
                if action.inner_op() == crate::operation::op::CLEAN {
                    match std::fs::remove_dir(dir.as_path()) {
                        Ok(()) => Ok(Outcome::Changed),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                            Ok(Outcome::Unchanged)
                        }
                        // A non-empty fsdir (other ad-hoc outputs still
                        // live in it) is not a failure: removing the
                        // directory is best-effort.
                        Err(_) => Ok(Outcome::Unchanged),
                    }
                } else if dir.as_path().is_dir() {
                    Ok(Outcome::Unchanged)
                } else {
                    std::fs::create_dir_all(dir.as_path())
                        .map_err(|e| RuleError::Apply(format!("creating {dir}: {e}")))?;
                    Ok(Outcome::Changed)
                }
            })
        }))
    }
}

/// A grouping node with no recipe output of its own: its "build" is
/// simply building its prerequisites (spec.md §3 "Target": `alias`).
pub struct AliasRule;

impl Rule for AliasRule {
    fn name(&self) -> &str {
        "alias"
    }

    fn match_rule(&self, _ctx: &Context, _action: Action, target: &Target) -> MatchResult {
        if target.target_type.is_a(&ALIAS) {
            MatchResult::Matched { hint: String::new() }
        } else {
            MatchResult::NotMatched
        }
    }

    fn apply(
        &self,
        ctx: &Context,
        action: Action,
        target: &Arc<Target>,
    ) -> Result<Recipe, RuleError> {
        // `crate::algorithm::execute` runs and aggregates prerequisite
        // outcomes before invoking a target's own recipe, so an alias's
        // recipe only needs to report "nothing changed at this level" —
        // the aggregate already reflects whatever its prerequisites did.
        // `execute` only ever sees the prerequisites a rule resolved and
        // stashed here; an alias with its own dependency clause needs
        // this exactly as much as any other rule does.
        let recipe = Recipe::new(move |_ctx, _action, _target| -> RecipeFuture {
            Box::pin(async move { Ok(Outcome::Unchanged) })
        });
        let root = ctx.scope_map.find_root(&target.key.out_dir);
        if let Some(root_extra) = root.root.clone() {
            let scope = ctx.scope_map.find(&target.key.out_dir);
            let registry = root_extra.target_types.read().unwrap();
            let prereqs = resolve_prerequisites(ctx, &scope, &registry, target, &crate::target::FILE)
                .map_err(|e| RuleError::Apply(e.to_string()))?;
            target.pad(action).set_applied(recipe.clone(), prereqs);
        }
        Ok(recipe)
    }
}

/// The fallback rule for a plain `file{}` target that is not the output
/// of any other rule — an ordinary source file referenced as a
/// prerequisite. Its "recipe" is simply to check the file exists; it
/// never writes anything (spec.md §3 "Target": `Implied` source targets).
pub struct SourceFileRule;

impl Rule for SourceFileRule {
    fn name(&self) -> &str {
        "file.source"
    }

    fn match_rule(&self, _ctx: &Context, action: Action, target: &Target) -> MatchResult {
        // Registered under the any-operation bucket (see
        // `bld_driver::project::register_builtin_rules`), so it would
        // otherwise also claim `test` actions on a `file{}` target and
        // collide with a more specific `test`-only rule (the testscript
        // recipe) registered for the same type — `test` is carved out
        // here so that more specific rule is the only candidate.
        if target.target_type.is_a(&crate::target::FILE) && action.inner_op() != crate::operation::op::TEST {
            MatchResult::Matched { hint: "source".into() }
        } else {
            MatchResult::NotMatched
        }
    }

    fn apply(
        &self,
        _ctx: &Context,
        _action: Action,
        target: &Arc<Target>,
    ) -> Result<Recipe, RuleError> {
        let path = target.output_path();
        Ok(Recipe::new(move |_ctx, _action, _target| -> RecipeFuture {
            let path = path.clone();
            Box::pin(async move {
                let ts = Timestamp::mtime(path.as_path())
                    .map_err(|e| RuleError::Apply(format!("checking {path}: {e}")))?;
                if ts.is_real() {
                    Ok(Outcome::Unchanged)
                } else {
                    Err(RuleError::Apply(format!("no rule to make {path} and it does not exist")))
                }
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{DeclKind, TargetKey, TargetSet, DIR};
    use bld_schema::path::DirPath;

    #[test]
    fn fsdir_rule_matches_fsdir_and_derived_types() {
        let rule = FsdirRule;
        let set = TargetSet::new();
        let (t, _) = set.insert(
            TargetKey { type_name: "fsdir", out_dir: DirPath::new("a/b"), src_dir: None, name: String::new(), extension: None },
            &FSDIR,
            DeclKind::AdHoc,
        );
        let ctx_work = DirPath::new("/tmp");
        let rt = tokio::runtime::Runtime::new().unwrap();
        let ctx = rt.block_on(async { Context::new(ctx_work) });
        let action = Action::new(crate::operation::meta::PERFORM, crate::operation::op::UPDATE);
        assert!(matches!(rule.match_rule(&ctx, action, &t), MatchResult::Matched { .. }));
        let _ = DIR;
    }

    #[test]
    fn alias_rule_does_not_match_file() {
        let rule = AliasRule;
        let set = TargetSet::new();
        let (t, _) = set.insert(
            TargetKey { type_name: "file", out_dir: DirPath::new("a"), src_dir: None, name: "x".into(), extension: None },
            &crate::target::FILE,
            DeclKind::Real,
        );
        let rt = tokio::runtime::Runtime::new().unwrap();
        let ctx = rt.block_on(async { Context::new(DirPath::new("/tmp")) });
        let action = Action::new(crate::operation::meta::PERFORM, crate::operation::op::UPDATE);
        assert!(matches!(rule.match_rule(&ctx, action, &t), MatchResult::NotMatched));
    }
}
