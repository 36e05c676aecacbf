//! Wires `bld-script`'s testscript engine in as the recipe for the
//! `test` operation (spec.md §2 "Data flow": "`P` plugs in as a specific
//! recipe for test targets"). Grounded on `libbuild2/test/rule.cxx`'s
//! convention of finding a target's testscript by a fixed sibling-file
//! name and handing it to the script runner rather than reusing the
//! toolchain compile/link machinery.
//!
//! Lives in `bld-driver` rather than `bld-core` because it is the only
//! place in the workspace that already depends on both the rule/target
//! machinery and the script engine; `bld-core` itself stays ignorant of
//! `bld-script` (spec.md §1 draws the testscript engine as a sibling
//! component, not a dependency of the core).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use bld_core::context::Context;
use bld_core::operation::{op, Action};
use bld_core::rule::{MatchResult, Recipe, RecipeFuture, Rule, RuleError};
use bld_core::target::{Outcome, Target};

use bld_script::{ScriptScope, preparse};

/// Runs `<name>.testscript`, if one sits next to a target's output, as
/// that target's `test` recipe. Only registered under the `test`
/// operation (spec.md §3 "Non-goals" boundary with `bld-cc`: compiling
/// and testing are separate rule families over the same target).
pub struct TestScriptRule;

impl Rule for TestScriptRule {
    fn name(&self) -> &str {
        "test.script"
    }

    fn match_rule(&self, _ctx: &Context, action: Action, target: &Target) -> MatchResult {
        if action.inner_op() != op::TEST {
            return MatchResult::NotMatched;
        }
        if testscript_path(target).is_file() {
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
        let script_path = testscript_path(target);
        let program = target.output_path();
        Ok(Recipe::new(move |_ctx, _action, _target| -> RecipeFuture {
            let script_path = script_path.clone();
            let program = program.to_string();
            Box::pin(async move {
                let text = std::fs::read_to_string(&script_path).map_err(|e| {
                    RuleError::Apply(format!("reading {}: {e}", script_path.display()))
                })?;
                let lines = preparse(&text)
                    .map_err(|e| RuleError::Apply(format!("{}: {e}", script_path.display())))?;

                let work_dir = script_path
                    .parent()
                    .map(std::path::Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("."));
                let scope = ScriptScope::root(work_dir, None, Instant::now());
                // `$0` names the program under test (spec.md §4.9:
                // "Variables ... `0`..`9` (test program and arguments)").
                // Argument forwarding (`$1`..`$9`) is this driver's
                // Non-goal: a testscript that needs arguments passes them
                // on the command line it writes itself.
                scope.set("0", &program, false, false);

                bld_script::execute(&scope, &lines)
                    .await
                    .map_err(|e| RuleError::Apply(format!("{}: {e}", script_path.display())))?;
                Ok(Outcome::Changed)
            })
        }))
    }
}

fn testscript_path(target: &Target) -> PathBuf {
    target
        .key
        .out_dir
        .as_path()
        .join(format!("{}.testscript", target.key.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bld_core::context::Context;
    use bld_core::target::{DeclKind, TargetKey, TargetSet, FILE};
    use bld_schema::path::DirPath;

    #[test]
    fn match_rule_requires_test_op_and_sibling_script() {
        let dir = tempfile::tempdir().unwrap();
        let set = TargetSet::new();
        let (target, _) = set.insert(
            TargetKey {
                type_name: "file",
                out_dir: DirPath::new(dir.path()),
                src_dir: None,
                name: "hello".into(),
                extension: Some("exe".into()),
            },
            &FILE,
            DeclKind::Real,
        );

        let rt = tokio::runtime::Runtime::new().unwrap();
        let ctx = rt.block_on(async { Context::new(DirPath::new(dir.path())) });
        let rule = TestScriptRule;

        let test_action = Action::new(bld_core::operation::meta::PERFORM, op::TEST);
        assert!(matches!(rule.match_rule(&ctx, test_action, &target), MatchResult::NotMatched));

        std::fs::write(dir.path().join("hello.testscript"), "true\n").unwrap();
        assert!(matches!(rule.match_rule(&ctx, test_action, &target), MatchResult::Matched { .. }));

        let update_action = Action::new(bld_core::operation::meta::PERFORM, op::UPDATE);
        assert!(matches!(rule.match_rule(&ctx, update_action, &target), MatchResult::NotMatched));
    }

    #[tokio::test]
    async fn apply_runs_the_script_and_reports_changed() {
        let dir = tempfile::tempdir().unwrap();
        let set = TargetSet::new();
        let (target, _) = set.insert(
            TargetKey {
                type_name: "file",
                out_dir: DirPath::new(dir.path()),
                src_dir: None,
                name: "hello".into(),
                extension: Some("exe".into()),
            },
            &FILE,
            DeclKind::Real,
        );
        std::fs::write(dir.path().join("hello.testscript"), "true\n").unwrap();

        let ctx = Context::new(DirPath::new(dir.path()));
        let rule = TestScriptRule;
        let action = Action::new(bld_core::operation::meta::PERFORM, op::TEST);
        let recipe = rule.apply(&ctx, action, &target).unwrap();
        let outcome = recipe.run(ctx, action, target).await.unwrap();
        assert_eq!(outcome, Outcome::Changed);
    }
}
