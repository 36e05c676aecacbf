use std::sync::Arc;

use bld_core::algorithm::{execute, match_target};
use bld_core::context::Context;
use bld_core::operation::{meta, op, Action};
use bld_core::rule::RuleMap;
use bld_core::scheduler::Scheduler;
use bld_core::scope::RootExtra;
use bld_core::target::{DeclKind, Outcome, TargetKey, ALIAS};
use bld_core::builtin_rules::AliasRule;
use bld_schema::path::DirPath;

#[tokio::test]
async fn alias_target_aggregates_prerequisite_outcomes() {
    let ctx = Context::new(DirPath::new("/work"));

    let mut rules = RuleMap::new();
    rules.register("perform", "", "alias", Arc::new(AliasRule));
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

    let (alias_target, _) = ctx.target_set.insert(
        TargetKey {
            type_name: "alias",
            out_dir: DirPath::new("/work"),
            src_dir: None,
            name: "all".into(),
            extension: None,
        },
        &ALIAS,
        DeclKind::Real,
    );

    let action = Action::new(meta::PERFORM, op::UPDATE);
    match_target(&ctx, action, &alias_target).await.unwrap();

    let scheduler = Scheduler::new(2, 16);
    let outcome = execute(&ctx, &scheduler, action, &alias_target).await.unwrap();
    assert_eq!(outcome, Outcome::Unchanged);
}
