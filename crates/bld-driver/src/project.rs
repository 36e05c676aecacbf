//! Project discovery and bootstrap (spec.md §4.1 "Lexer and parser":
//! "for each project, first `bootstrap.build` executes with boot flag
//! set, then `root.build` executes in the root scope, then `buildfile`
//! files in each out-base-directory involved").
//!
//! Everything here is driver-owned: `bld-core` provides the scope/target
//! graph and the buildfile evaluator, but nothing in it knows the
//! on-disk project layout (spec.md §6 "On-disk layout per project") or
//! which modules a particular `bld` invocation makes available to
//! `using` directives — that is this module's job, grounded on
//! `examples/jpmacdonald-apl/crates/apl-cli/src/cmd`'s pattern of a thin
//! per-command setup function ahead of the actual work.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use bld_core::algorithm::TargetTypeRegistry;
use bld_core::builtin_rules::{AliasRule, FsdirRule, SourceFileRule};
use bld_core::context::Context;
use bld_core::functions::FunctionTable;
use bld_core::loader::{LoadError, Loader, ModuleRegistry};
use bld_core::operation::{MetaOperationTable, OperationTable};
use bld_core::rule::RuleMap;
use bld_core::scope::{RootExtra, Scope};
use bld_schema::path::DirPath;

use crate::overrides::{self, CliOverride};

/// The bootstrap/root/per-directory buildfile names a project is made of
/// (spec.md §6 "On-disk layout per project"). `build2` is an accepted
/// alternate spelling of the `build` directory throughout.
const BUILD_DIR_NAMES: [&str; 2] = ["build", "build2"];

/// Inputs the CLI layer has already gathered before a project can be
/// bootstrapped.
pub struct BootstrapOptions {
    /// The directory `bld` is running from (used both to search upward
    /// for a project root and to resolve relative buildspec targets).
    pub work_dir: PathBuf,
    /// An explicit root buildfile path (`-f`/`--file`), bypassing
    /// upward search.
    pub file: Option<PathBuf>,
    /// `-j`/`--jobs` override for the scheduler's concurrency cap.
    pub jobs: Option<usize>,
    /// `--keep-going`: accumulate diagnostics across siblings instead of
    /// stopping at the first failure.
    pub keep_going: bool,
    /// Variable overrides already parsed off the command line.
    pub cli_overrides: Vec<CliOverride>,
    /// `--json`: have `info(...)` (the only meta-operation with a report
    /// to format) emit structured output instead of a `comfy-table`.
    pub json_output: bool,
}

/// A fully bootstrapped project: the live context, its root scope, and
/// the tables [`crate::dispatch`] needs to resolve and run a buildspec
/// against it.
pub struct Project {
    /// The build-wide context (scope map, target set, phase lock).
    pub ctx: Arc<Context>,
    /// The project's root scope (its `RootExtra` carries the operation/
    /// meta-operation/rule/target-type tables modules registered into).
    pub root_scope: Arc<Scope>,
    /// `true` if diagnostics should propagate past the first failure
    /// instead of stopping the batch.
    pub keep_going: bool,
    /// Effective scheduler concurrency cap: `-j`/`--jobs` if given,
    /// otherwise `ctx.scheduler_config.max_jobs`'s host-CPU-count default.
    pub max_jobs: usize,
    /// `--json` as given on the command line; see
    /// [`BootstrapOptions::json_output`].
    pub json_output: bool,
}

/// Error bootstrapping a project, surfaced as driver/CLI misuse (spec.md
/// §6: exit status `2`) rather than as a build failure, since nothing
/// here has reached the point of evaluating a target.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// No `build/bootstrap.build` was found walking upward from the
    /// working directory, and no `-f`/`--file` override was given.
    #[error("no project found (searched upward from {0} for build/bootstrap.build)")]
    NotFound(PathBuf),
    /// Reading a bootstrap/root/buildfile failed.
    #[error("reading {path}: {source}")]
    Io {
        /// The file that could not be read.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Evaluating a bootstrap/root/buildfile against the scope/target
    /// graph failed.
    #[error(transparent)]
    Load(#[from] LoadError),
    /// A CLI override referenced a variable that could not be applied
    /// (surfaced if a later `config.*` default-options pass conflicts
    /// with an opt-in the CLI itself never granted).
    #[error(transparent)]
    Override(#[from] bld_schema::variable::OverrideError),
}

/// Find the nearest ancestor of `start` containing a `build/` (or
/// `build2/`) directory with a `bootstrap.build` inside it (spec.md §6).
fn find_project_root(start: &Path) -> Option<(PathBuf, &'static str)> {
    let mut cur = Some(start);
    while let Some(dir) = cur {
        for name in BUILD_DIR_NAMES {
            if dir.join(name).join("bootstrap.build").is_file() {
                return Some((dir.to_path_buf(), name));
            }
        }
        cur = dir.parent();
    }
    None
}

/// Bootstrap a project: locate it, build its `Context`/root scope, load
/// `bootstrap.build` then `root.build`, apply CLI variable overrides, and
/// register the engine's built-in rules and standard operation tables.
///
/// # Errors
///
/// Returns [`BootstrapError`] if no project is found, a bootstrap/root
/// file cannot be read, or evaluating either fails.
pub async fn bootstrap(opts: BootstrapOptions) -> Result<Project, BootstrapError> {
    let (project_dir, build_dir_name) = match &opts.file {
        Some(explicit) => {
            let dir = explicit
                .parent()
                .and_then(|p| p.parent())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| opts.work_dir.clone());
            (dir, "build")
        }
        None => find_project_root(&opts.work_dir)
            .ok_or_else(|| BootstrapError::NotFound(opts.work_dir.clone()))?,
    };

    let src_root = DirPath::new(project_dir.clone());
    let out_root = src_root.clone();
    let build_dir = project_dir.join(build_dir_name);

    let ctx = Context::new(DirPath::new(opts.work_dir.clone()));
    let max_jobs = opts.jobs.unwrap_or(ctx.scheduler_config.max_jobs);
    if let Some(jobs) = opts.jobs {
        tracing::debug!(target: "bld_driver::project", jobs, "overriding scheduler job count");
    }

    let all_overrides = crate::options::merge_overrides(&build_dir, opts.cli_overrides)
        .map_err(|source| BootstrapError::Io { path: build_dir.clone(), source })?;
    overrides::apply_overrides(&mut ctx.var_pool.write().unwrap(), &all_overrides, Some(&out_root))?;

    let root_extra = Arc::new(RootExtra {
        project_name: None,
        src_root: src_root.clone(),
        out_root: out_root.clone(),
        amalgamation: None,
        operations: RwLock::new(OperationTable::standard()),
        meta_operations: RwLock::new(MetaOperationTable::standard()),
        rules: RwLock::new(RuleMap::new()),
        target_types: RwLock::new(TargetTypeRegistry::standard()),
    });

    register_builtin_rules(&root_extra);

    let root_scope = ctx.scope_map.insert(out_root.clone(), src_root.clone(), Some(root_extra.clone()));

    let mut modules = ModuleRegistry::new();
    modules.register("cc", Arc::new(bld_cc::CcModule::new()));
    modules.register("cxx", Arc::new(bld_cc::CcModule::new()));
    let functions = FunctionTable::standard();

    load_file(&ctx, &root_extra, &functions, &modules, &root_scope, &build_dir.join("bootstrap.build"))?;
    load_file(&ctx, &root_extra, &functions, &modules, &root_scope, &build_dir.join("root.build"))?;

    let export = build_dir.join("export.build");
    if export.is_file() {
        load_file(&ctx, &root_extra, &functions, &modules, &root_scope, &export)?;
    }

    load_out_base_buildfiles(&ctx, &root_extra, &functions, &modules, &project_dir, &build_dir)?;

    Ok(Project { ctx, root_scope, keep_going: opts.keep_going, max_jobs, json_output: opts.json_output })
}

/// Register the engine's toolchain-independent rules (spec.md §3
/// "Rule"): `fsdir{}`/`alias`/plain source `file{}`, plus the testscript
/// recipe (spec.md §2 "Data flow": "`P` plugs in as a specific recipe
/// for test targets") under `test` specifically rather than the
/// any-operation bucket the other three share — a plain `file{}` target
/// with no sibling testscript still falls through to
/// [`SourceFileRule`]'s existence check. Every module-backed rule
/// (`bld-cc`'s compile/link rules) registers only under `perform` too
/// (see `bld_cc::module::CcModule::init`), so `configure`/`disfigure`
/// never reach the match/execute machinery at all — they are handled
/// directly by [`crate::dispatch`] against [`bld_core::config::Config`].
fn register_builtin_rules(root_extra: &RootExtra) {
    let mut rules = root_extra.rules.write().unwrap();
    rules.register("perform", "", bld_core::target::FSDIR.name, Arc::new(FsdirRule));
    rules.register("perform", "", bld_core::target::ALIAS.name, Arc::new(AliasRule));
    rules.register("perform", "", bld_core::target::FILE.name, Arc::new(SourceFileRule));

    // `RuleMap::candidates` stops at the first target-type level with any
    // registered bucket, so a `test` action on an `exe{}` target would
    // never fall back to `file{}`'s bucket — `bld-cc`'s `LinkRule` already
    // occupies `exe{}`'s any-operation bucket (it simply declines to match
    // a `test` action). The testscript rule is therefore registered
    // directly on every linkable output type as well as on `file{}` (for a
    // plain script-only target with no compile/link step at all).
    let testscript = Arc::new(crate::test_rule::TestScriptRule);
    rules.register("perform", "test", bld_core::target::FILE.name, testscript.clone());
    rules.register("perform", "test", bld_cc::target_types::EXE.name, testscript.clone());
    rules.register("perform", "test", bld_cc::target_types::LIBA.name, testscript.clone());
    rules.register("perform", "test", bld_cc::target_types::LIBS.name, testscript);
}

/// Read and evaluate one buildfile against `scope`, building the
/// `Loader` over `root_extra.target_types`'s write guard so that target
/// types a `using` directive registers mid-file land in the exact same
/// storage `bld-cc`'s compile/link rules consult later via
/// `RootExtra::target_types` at apply-time — no separate copy step.
fn load_file(
    ctx: &Arc<Context>,
    root_extra: &Arc<RootExtra>,
    functions: &FunctionTable,
    modules: &ModuleRegistry,
    scope: &Arc<Scope>,
    path: &Path,
) -> Result<(), BootstrapError> {
    if !path.is_file() {
        return Ok(());
    }
    let text = fs::read_to_string(path).map_err(|source| BootstrapError::Io { path: path.to_path_buf(), source })?;
    let mut registry = root_extra.target_types.write().unwrap();
    let mut loader = Loader::new(ctx, &mut registry, functions, modules);
    loader.load_buildfile(scope, &text)?;
    Ok(())
}

/// Load every `buildfile` found under `project_dir`'s output tree
/// (spec.md §4.1: "then `buildfile` files in each out-base-directory
/// involved"). This driver builds in-tree only (no `@`-qualified
/// out-of-source targets yet), so "every out-base directory involved" is
/// approximated as "every directory under the project containing a
/// `buildfile`, excluding `build/`/`build2/` itself" — a buildspec target
/// naming a directory bld has not yet walked still resolves correctly
/// since `bld_core::algorithm::search` interns targets on demand; this
/// walk only pre-loads variable/rule context those targets' scopes need.
fn load_out_base_buildfiles(
    ctx: &Arc<Context>,
    root_extra: &Arc<RootExtra>,
    functions: &FunctionTable,
    modules: &ModuleRegistry,
    project_dir: &Path,
    build_dir: &Path,
) -> Result<(), BootstrapError> {
    let walker = walkdir::WalkDir::new(project_dir)
        .into_iter()
        .filter_entry(|entry| entry.path() == project_dir || (!is_hidden(entry.path()) && entry.path() != build_dir));
    for entry in walker {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_dir() {
            continue;
        }
        let dir = entry.path();
        let buildfile = dir.join("buildfile");
        if buildfile.is_file() {
            let out_dir = DirPath::new(dir.to_path_buf());
            let scope = ctx.scope_map.insert(out_dir.clone(), out_dir, None);
            load_file(ctx, root_extra, functions, modules, &scope, &buildfile)?;
        }
    }
    Ok(())
}

fn is_hidden(path: &Path) -> bool {
    path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_project_root_walks_upward() {
        let dir = tempfile::tempdir().unwrap();
        let build = dir.path().join("build");
        fs::create_dir_all(&build).unwrap();
        fs::write(build.join("bootstrap.build"), "").unwrap();
        let nested = dir.path().join("sub/deeper");
        fs::create_dir_all(&nested).unwrap();

        let (found, name) = find_project_root(&nested).unwrap();
        assert_eq!(found, dir.path());
        assert_eq!(name, "build");
    }

    #[test]
    fn find_project_root_returns_none_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_project_root(dir.path()).is_none());
    }

    #[tokio::test]
    async fn bootstrap_loads_bootstrap_and_root_build() {
        let dir = tempfile::tempdir().unwrap();
        let build = dir.path().join("build");
        fs::create_dir_all(&build).unwrap();
        fs::write(build.join("bootstrap.build"), "project = demo\n").unwrap();
        fs::write(build.join("root.build"), "answer = 42\n").unwrap();

        let opts = BootstrapOptions {
            work_dir: dir.path().to_path_buf(),
            file: None,
            jobs: None,
            keep_going: false,
            cli_overrides: Vec::new(),
            json_output: false,
        };
        let project = bootstrap(opts).await.unwrap();
        let id = project.ctx.var_pool.read().unwrap().find("answer").unwrap().id;
        assert_eq!(project.root_scope.get_own(id), Some(bld_schema::value::Value::String("42".into())));
    }

    #[tokio::test]
    async fn bootstrap_fails_cleanly_with_no_project() {
        let dir = tempfile::tempdir().unwrap();
        let opts = BootstrapOptions {
            work_dir: dir.path().to_path_buf(),
            file: None,
            jobs: None,
            keep_going: false,
            cli_overrides: Vec::new(),
            json_output: false,
        };
        assert!(matches!(bootstrap(opts).await, Err(BootstrapError::NotFound(_))));
    }
}
