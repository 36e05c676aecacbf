//! Drives a parsed [`crate::buildspec::BuildSpec`] against a bootstrapped
//! [`crate::project::Project`] (spec.md §4.6 "Algorithm primitives":
//! search each named target, match it, execute it).
//!
//! `configure`/`disfigure` are handled here directly against
//! `bld_core::config::Config` rather than through the match/execute
//! machinery — per `crate::project::register_builtin_rules`'s doc
//! comment, no rule is ever registered for those meta-operations.

use bld_core::algorithm::{self, SearchError};
use bld_core::config::{Config, ConfigError};
use bld_core::diagnostics::{Diagnostic, DiagnosticSink};
use bld_core::operation::{meta, op, Action, MetaOperationId, OperationId};
use bld_core::rule::RuleError;
use bld_core::scheduler::Scheduler;
use bld_schema::name::Name;

use crate::buildspec::{BuildSpec, MetaGroup, OpGroup};
use crate::project::Project;

/// Error dispatching a buildspec that is not itself a build failure (a
/// name that will not parse, a meta-operation/operation bld does not
/// know) — surfaced as driver misuse (spec.md §6: exit status `2`).
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A target name in the buildspec did not parse as a [`Name`].
    #[error(transparent)]
    Name(#[from] bld_schema::name::NameParseError),
    /// A buildspec group named a meta-operation this driver does not
    /// register.
    #[error("unknown meta-operation `{0}`")]
    UnknownMeta(String),
    /// A buildspec group named an operation this driver does not
    /// register.
    #[error("unknown operation `{0}`")]
    UnknownOp(String),
    /// A target/prerequisite search failed.
    #[error(transparent)]
    Search(#[from] SearchError),
    /// Reading or writing `config.build` failed.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// `--json` on `info(...)` failed to serialize its report.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Resolve and run every meta-operation group in `spec` against
/// `project`, in order, accumulating diagnostics rather than stopping at
/// the first target failure when [`Project::keep_going`] is set.
///
/// # Errors
///
/// Returns [`DispatchError`] for anything that is driver misuse rather
/// than a build failure (an unknown name, an unknown operation). Target
/// build failures are not returned as `Err` — they are recorded in the
/// returned [`DiagnosticSink`], whose [`DiagnosticSink::has_errors`]
/// [`crate::run`] checks to pick between exit status `0` and `1`.
pub async fn run_buildspec(project: &Project, spec: &BuildSpec) -> Result<DiagnosticSink, DispatchError> {
    let sink = DiagnosticSink::new();
    for group in &spec.groups {
        run_meta_group(project, group, &sink).await?;
        if sink.has_errors() && !project.keep_going {
            break;
        }
    }
    Ok(sink)
}

async fn run_meta_group(project: &Project, group: &MetaGroup, sink: &DiagnosticSink) -> Result<(), DispatchError> {
    let meta_id = resolve_meta(&group.meta)?;

    if meta_id == meta::CONFIGURE {
        return run_configure(project, group, sink);
    }
    if meta_id == meta::DISFIGURE {
        return run_disfigure(project, sink);
    }
    if meta_id == meta::INFO {
        return run_info(project, group, sink).await;
    }

    let scheduler = Scheduler::new(project.max_jobs, project.ctx.scheduler_config.max_nested_waits);

    for op_group in &group.ops {
        run_op_group(project, &scheduler, meta_id, op_group, sink).await?;
        if sink.has_errors() && !project.keep_going {
            break;
        }
    }
    Ok(())
}

async fn run_op_group(
    project: &Project,
    scheduler: &Scheduler,
    meta_id: MetaOperationId,
    op_group: &OpGroup,
    sink: &DiagnosticSink,
) -> Result<(), DispatchError> {
    let op_id = resolve_op(&project.root_scope, &op_group.op)?;
    let action = Action::new(meta_id, op_id);

    let Some(root_extra) = project.root_scope.root.clone() else {
        sink.push(Diagnostic::error("project root scope has no root extra"));
        return Ok(());
    };
    let registry = root_extra.target_types.read().unwrap();

    // Resolve every target name up front (a bad name is driver misuse and
    // should fail the whole group before anything runs), then match and
    // execute the resolved batch concurrently — the same
    // `futures::future::join_all` the targets' own prerequisites already
    // run under in `algorithm::execute_prerequisites`, just one level up:
    // buildspec targets named side by side are as independent of each
    // other as a target's prerequisites are.
    let mut targets = Vec::with_capacity(op_group.targets.len());
    for spec_target in &op_group.targets {
        let name = Name::parse(&spec_target.name)?;
        let scope = if let Some(src_base) = &spec_target.src_base {
            project.ctx.scope_map.find(&project.root_scope.out_dir.join(src_base))
        } else {
            project.ctx.scope_map.find(&project.ctx.work_dir)
        };
        targets.push(algorithm::search_name(&project.ctx, &scope, &registry, &name, &bld_core::target::FILE)?);
    }
    drop(registry);

    let keep_going = project.keep_going;
    let jobs = targets.into_iter().map(|target| async move {
        match algorithm::match_target(&project.ctx, action, &target).await {
            Ok(()) => {}
            Err(e) => {
                sink.push(rule_error_diagnostic(&e, &target.key.to_string()));
                if !keep_going {
                    return;
                }
            }
        }
        if let Err(e) = algorithm::execute(&project.ctx, scheduler, action, &target).await {
            sink.push(rule_error_diagnostic(&e, &target.key.to_string()));
        }
    });
    futures::future::join_all(jobs).await;
    Ok(())
}

fn rule_error_diagnostic(err: &RuleError, target: &str) -> Diagnostic {
    let _ = target;
    Diagnostic::error(err.to_string())
}

fn resolve_meta(name: &str) -> Result<MetaOperationId, DispatchError> {
    match name {
        "perform" => Ok(meta::PERFORM),
        "configure" => Ok(meta::CONFIGURE),
        "disfigure" => Ok(meta::DISFIGURE),
        "info" => Ok(meta::INFO),
        "dist" => Ok(meta::DIST),
        "noop" => Ok(meta::NOOP),
        other => Err(DispatchError::UnknownMeta(other.to_string())),
    }
}

fn resolve_op(scope: &bld_core::scope::Scope, name: &str) -> Result<OperationId, DispatchError> {
    let Some(root) = &scope.root else {
        return resolve_standard_op(name);
    };
    root.operations
        .read()
        .unwrap()
        .find(name)
        .map(|(id, _)| id)
        .ok_or_else(|| DispatchError::UnknownOp(name.to_string()))
}

fn resolve_standard_op(name: &str) -> Result<OperationId, DispatchError> {
    match name {
        "update" => Ok(op::UPDATE),
        "clean" => Ok(op::CLEAN),
        "test" => Ok(op::TEST),
        "install" => Ok(op::INSTALL),
        "uninstall" => Ok(op::UNINSTALL),
        other => Err(DispatchError::UnknownOp(other.to_string())),
    }
}

/// `configure(...)`: persist every `config.*`-named target in the group
/// as a configuration variable (spec.md §3 "Meta-operation": "configure
/// records the decisions it makes"). Variables are taken from the
/// project's var pool at their current (already override-applied) scope
/// value — a buildspec target under `configure` names a configuration
/// variable, not a build target, so [`crate::buildspec`]'s grammar reuses
/// `SpecTarget::name` for the variable name here.
fn run_configure(project: &Project, group: &MetaGroup, sink: &DiagnosticSink) -> Result<(), DispatchError> {
    let mut cfg = Config::load(project.root_scope.out_dir.as_path())?;
    let pool = project.ctx.var_pool.read().unwrap();
    for op_group in &group.ops {
        for spec_target in &op_group.targets {
            let Some(var) = pool.find(&spec_target.name) else {
                sink.push(Diagnostic::warn(format!("configure: unknown variable `{}`, skipped", spec_target.name)));
                continue;
            };
            if let Some(value) = project.root_scope.get_own(var.id) {
                cfg.set(&spec_target.name, &value);
            }
        }
    }
    drop(pool);
    cfg.save()?;
    Ok(())
}

/// `disfigure`: remove the project's `config.build` (spec.md §3
/// "Meta-operation" `disfigure`).
fn run_disfigure(project: &Project, _sink: &DiagnosticSink) -> Result<(), DispatchError> {
    Config::disfigure(project.root_scope.out_dir.as_path())?;
    Ok(())
}

/// One row of an `info(...)` report: which operation was asked about,
/// which target it resolved to, and which rule (if any) would apply it.
/// `Serialize` backs `--json`'s output; the plain [`ToString`]-based
/// fields also feed the `comfy-table` row built for the default,
/// human-oriented report.
#[derive(serde::Serialize)]
struct InfoRow {
    operation: String,
    target: String,
    rule: String,
    modified: String,
}

/// The target's output path mtime, formatted for a human to read (the
/// same `DateTime<Local>` conversion the teacher's own status report
/// uses), or `"never"` if the output does not exist yet.
fn modified_display(path: &std::path::Path) -> String {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|t| chrono::DateTime::<chrono::Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|_| "never".to_string())
}

/// `info(...)`: search and match every named target against each
/// requested operation, report the rule that would run, and stop —
/// `info` never executes a recipe (spec.md §3 "Meta-operation": "a
/// non-executing report"). Printed as a `comfy-table` by default, or as
/// a JSON array with `--json` for scripted consumption, and also
/// recorded as `Diagnostic::info` entries so `--keep-going`-style
/// accumulation and the driver's exit status stay consistent with every
/// other meta-operation.
async fn run_info(project: &Project, group: &MetaGroup, sink: &DiagnosticSink) -> Result<(), DispatchError> {
    let Some(root_extra) = project.root_scope.root.clone() else {
        sink.push(Diagnostic::error("project root scope has no root extra"));
        return Ok(());
    };
    let registry = root_extra.target_types.read().unwrap();

    let mut rows = Vec::new();

    for op_group in &group.ops {
        let op_id = resolve_op(&project.root_scope, &op_group.op)?;
        let action = Action::new(meta::PERFORM, op_id);

        for spec_target in &op_group.targets {
            let name = Name::parse(&spec_target.name)?;
            let scope = if let Some(src_base) = &spec_target.src_base {
                project.ctx.scope_map.find(&project.root_scope.out_dir.join(src_base))
            } else {
                project.ctx.scope_map.find(&project.ctx.work_dir)
            };

            let target = algorithm::search_name(&project.ctx, &scope, &registry, &name, &bld_core::target::FILE)?;
            let rule = match algorithm::match_target(&project.ctx, action, &target).await {
                Ok(()) => target
                    .pad(action)
                    .rule()
                    .map(|r| r.name().to_string())
                    .unwrap_or_else(|| "<unknown>".to_string()),
                Err(e) => {
                    sink.push(Diagnostic::warn(format!("info: {e}")));
                    "<no rule>".to_string()
                }
            };
            sink.push(Diagnostic::info(format!("{}({}): {rule}", op_group.op, target.key)));
            let modified = modified_display(target.output_path().as_path());
            rows.push(InfoRow { operation: op_group.op.clone(), target: target.key.to_string(), rule, modified });
        }
    }
    drop(registry);

    if project.json_output {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        use comfy_table::{Cell, Table};
        let mut table = Table::new();
        table.set_header(vec!["operation", "target", "rule", "modified"]);
        for row in &rows {
            table.add_row(vec![
                Cell::new(&row.operation),
                Cell::new(&row.target),
                Cell::new(&row.rule),
                Cell::new(&row.modified),
            ]);
        }
        println!("{table}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modified_display_reports_never_for_a_missing_path() {
        assert_eq!(modified_display(std::path::Path::new("/does/not/exist/at/all")), "never");
    }

    #[test]
    fn modified_display_formats_an_existing_files_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, b"hi").unwrap();
        let display = modified_display(&path);
        assert_ne!(display, "never");
        assert_eq!(display.len(), "YYYY-MM-DD HH:MM:SS".len());
    }

    #[test]
    fn resolve_meta_recognizes_standard_names() {
        assert_eq!(resolve_meta("perform").unwrap(), meta::PERFORM);
        assert_eq!(resolve_meta("configure").unwrap(), meta::CONFIGURE);
        assert!(resolve_meta("bogus").is_err());
    }

    #[test]
    fn resolve_standard_op_recognizes_update_and_clean() {
        assert_eq!(resolve_standard_op("update").unwrap(), op::UPDATE);
        assert_eq!(resolve_standard_op("clean").unwrap(), op::CLEAN);
        assert!(resolve_standard_op("bogus").is_err());
    }

    async fn bootstrap_empty_project(json_output: bool) -> (crate::project::Project, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let build = dir.path().join("build");
        std::fs::create_dir_all(&build).unwrap();
        std::fs::write(build.join("bootstrap.build"), "project = demo\n").unwrap();
        std::fs::write(build.join("root.build"), "").unwrap();

        let opts = crate::project::BootstrapOptions {
            work_dir: dir.path().to_path_buf(),
            file: None,
            jobs: None,
            keep_going: false,
            cli_overrides: Vec::new(),
            json_output,
        };
        let project = crate::project::bootstrap(opts).await.unwrap();
        (project, dir)
    }

    #[tokio::test]
    async fn run_info_reports_a_plain_source_file_without_executing_it() {
        let (project, _dir) = bootstrap_empty_project(false).await;
        let sink = DiagnosticSink::new();
        let group = MetaGroup {
            meta: "info".into(),
            ops: vec![OpGroup {
                op: "update".into(),
                targets: vec![crate::buildspec::SpecTarget { name: "hello.txt".into(), src_base: None }],
            }],
        };
        run_info(&project, &group, &sink).await.unwrap();
        assert!(!sink.has_errors());
    }

    #[tokio::test]
    async fn run_info_succeeds_with_json_output_enabled() {
        let (project, _dir) = bootstrap_empty_project(true).await;
        let sink = DiagnosticSink::new();
        let group = MetaGroup {
            meta: "info".into(),
            ops: vec![OpGroup {
                op: "update".into(),
                targets: vec![crate::buildspec::SpecTarget { name: "hello.txt".into(), src_base: None }],
            }],
        };
        run_info(&project, &group, &sink).await.unwrap();
        assert!(!sink.has_errors());
    }
}
