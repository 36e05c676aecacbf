use std::sync::Arc;

use bld_core::algorithm::{execute, match_target};
use bld_core::context::Context;
use bld_core::operation::{meta, op, Action};
use bld_core::rule::{MatchResult, Recipe, RecipeFuture, Rule, RuleError};
use bld_core::scheduler::Scheduler;
use bld_core::scope::RootExtra;
use bld_core::target::{DeclKind, Outcome, Target, TargetKey, FILE};
use bld_schema::path::DirPath;

/// Links `a` to `b` and `b` to `a` regardless of which target it is asked
/// to match, to exercise `execute`'s cycle check without needing a real
/// dependency-clause loader.
struct FlipFlopRule {
    a: Arc<Target>,
    b: Arc<Target>,
}

impl Rule for FlipFlopRule {
    fn name(&self) -> &str {
        "test.flip-flop"
    }

    fn match_rule(&self, _ctx: &Context, _action: Action, _target: &Target) -> MatchResult {
        MatchResult::Matched { hint: String::new() }
    }

    fn apply(
        &self,
        _ctx: &Context,
        action: Action,
        target: &Arc<Target>,
    ) -> Result<Recipe, RuleError> {
        let other = if Arc::ptr_eq(target, &self.a) { self.b.clone() } else { self.a.clone() };
        let recipe = Recipe::new(move |_ctx, _action, _target| -> RecipeFuture {
            Box::pin(async move { Ok(Outcome::Unchanged) })
        });
        target.pad(action).set_applied(recipe.clone(), vec![other]);
        Ok(recipe)
    }
}

#[tokio::test]
async fn execute_reports_a_cycle_instead_of_hanging() {
    let ctx = Context::new(DirPath::new("/work"));

    let (a, _) = ctx.target_set.insert(
        TargetKey { type_name: "file", out_dir: DirPath::new("/work"), src_dir: None, name: "a".into(), extension: None },
        &FILE,
        DeclKind::Real,
    );
    let (b, _) = ctx.target_set.insert(
        TargetKey { type_name: "file", out_dir: DirPath::new("/work"), src_dir: None, name: "b".into(), extension: None },
        &FILE,
        DeclKind::Real,
    );

    let mut rules = bld_core::rule::RuleMap::new();
    rules.register("perform", "", "file", Arc::new(FlipFlopRule { a: a.clone(), b: b.clone() }));
    let root_extra = Arc::new(RootExtra {
        project_name: Some("demo".into()),
        src_root: DirPath::new("/work"),
        out_root: DirPath::new("/work"),
        amalgamation: None,
        operations: std::sync::RwLock::new(bld_core::operation::OperationTable::standard()),
        meta_operations: std::sync::RwLock::new(bld_core::operation::MetaOperationTable::standard()),
        rules: std::sync::RwLock::new(rules),
        target_types: std::sync::RwLock::new(bld_core::algorithm::TargetTypeRegistry::standard()),
    });
    ctx.scope_map.insert(DirPath::new("/work"), DirPath::new("/work"), Some(root_extra));

    let action = Action::new(meta::PERFORM, op::UPDATE);
    match_target(&ctx, action, &a).await.unwrap();

    let scheduler = Scheduler::new(2, 16);
    let result = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        execute(&ctx, &scheduler, action, &a),
    )
    .await
    .expect("execute must return promptly instead of deadlocking on the cycle");

    match result {
        Err(RuleError::Cycle { path }) => {
            assert!(path.contains("a") && path.contains("b"), "unexpected cycle path: {path}");
        }
        other => panic!("expected RuleError::Cycle, got {other:?}"),
    }
}
