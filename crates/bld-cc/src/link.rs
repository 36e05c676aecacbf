//! The C/C++ link rule: `exe{}`/`liba{}`/`libs{}` from a set of `obje{}`
//! inputs (spec.md §4.10 "Link rule"), grounded on
//! `libbuild2/cc/link-rule.cxx`'s depdb-driven relink check — the same
//! read/switch-to-write pattern `crate::compile::CompileRule` uses, keyed
//! on the *set* of object files and the link line rather than a single
//! source file.

use std::path::PathBuf;
use std::sync::Arc;

use bld_core::algorithm::resolve_prerequisites;
use bld_core::context::Context;
use bld_core::depdb::{format_fingerprint, DepDb};
use bld_core::operation::{meta, op, Action};
use bld_core::rule::{MatchResult, Recipe, RecipeFuture, Rule, RuleError};
use bld_core::scope::{ancestors, Scope};
use bld_core::target::{Outcome, Target};
use bld_schema::hash::Sha256Digest;
use bld_schema::path::Timestamp;
use bld_schema::value::Value;

use crate::target_types::{EXE, LIBA, LIBS, OBJE};
use crate::toolchain::Toolchain;

/// The variables a link rule pulls linker options from, searched the same
/// root-to-leaf way `crate::compile::CompileRule` collects compile
/// options.
const LINK_OPTION_VARS: &[&str] = &["cc.loptions", "cc.libs"];

/// Links a set of `obje{}` prerequisites into an `exe{}`/`liba{}`/`libs{}`
/// target.
pub struct LinkRule {
    toolchain: Arc<Toolchain>,
}

impl LinkRule {
    /// Build a link rule bound to an already-probed toolchain.
    pub fn new(toolchain: Arc<Toolchain>) -> Self {
        Self { toolchain }
    }
}

impl Rule for LinkRule {
    fn name(&self) -> &str {
        "cc.link"
    }

    fn match_rule(&self, _ctx: &Context, action: Action, target: &Target) -> MatchResult {
        let is_linkable =
            target.target_type.is_a(&EXE) || target.target_type.is_a(&LIBA) || target.target_type.is_a(&LIBS);
        if is_linkable && action.meta() == meta::PERFORM {
            match action.inner_op() {
                o if o == op::UPDATE || o == op::CLEAN => MatchResult::Matched { hint: String::new() },
                _ => MatchResult::NotMatched,
            }
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
        let root = ctx.scope_map.find_root(&target.key.out_dir);
        let scope = ctx.scope_map.find(&target.key.out_dir);
        let root_extra = root
            .root
            .clone()
            .ok_or_else(|| RuleError::Apply(format!("{} is outside any project", target.key)))?;
        let registry = root_extra.target_types.read().unwrap();
        let prereqs = resolve_prerequisites(ctx, &scope, &registry, target, &OBJE)
            .map_err(|e| RuleError::Apply(e.to_string()))?;
        drop(registry);

        let objects: Vec<_> = prereqs.iter().filter(|t| t.target_type.is_a(&OBJE)).cloned().collect();
        if objects.is_empty() {
            return Err(RuleError::Apply(format!("{} has no obje{{}} inputs to link", target.key)));
        }

        let is_static = target.target_type.is_a(&LIBA);
        let is_shared = target.target_type.is_a(&LIBS);
        let options = collect_link_options(ctx, &scope, target);
        let toolchain = self.toolchain.clone();
        let output = target.output_path();
        let depdb_path = output
            .as_path()
            .with_extension(output.extension().map(|e| format!("{e}.d")).unwrap_or_else(|| "d".into()));
        let object_paths: Vec<_> = objects.iter().map(|o| o.output_path()).collect();

        let recipe = Recipe::new(move |_ctx, action, target| -> RecipeFuture {
            let toolchain = toolchain.clone();
            let options = options.clone();
            let output = output.clone();
            let depdb_path = depdb_path.clone();
            let object_paths = object_paths.clone();
            Box::pin(async move {
                if action.inner_op() == op::CLEAN {
                    return clean(&output, &depdb_path);
                }

                let out_mtime = Timestamp::mtime(output.as_path())
                    .map_err(|e| RuleError::Apply(format!("checking {output}: {e}")))?;

                let fingerprint =
                    Sha256Digest::of(format!("{}{:?}{is_static}{is_shared}", toolchain.banner, options));
                let mut db = DepDb::open(&depdb_path)
                    .map_err(|e| RuleError::Apply(format!("opening {}: {e}", depdb_path.display())))?;
                db.expect(&format_fingerprint("cc.link", fingerprint))
                    .map_err(|e| RuleError::Apply(e.to_string()))?;
                let mut newest_input = Timestamp::NONEXISTENT;
                for obj in &object_paths {
                    db.expect(&obj.to_string()).map_err(|e| RuleError::Apply(e.to_string()))?;
                    let mtime = Timestamp::mtime(obj.as_path())
                        .map_err(|e| RuleError::Apply(format!("checking {obj}: {e}")))?;
                    if mtime > newest_input {
                        newest_input = mtime;
                    }
                }
                let stale = db.touched();
                db.close().map_err(|e| RuleError::Apply(e.to_string()))?;

                // spec.md §4.7 step 6 / §8: a depdb newer than the output
                // it describes means the last link attempt never finished
                // successfully (the depdb had already been rewritten to
                // match a new link line before `ar`/the linker ran and
                // failed) — rebuild regardless of `stale`.
                let depdb_mtime = Timestamp::mtime(&depdb_path)
                    .map_err(|e| RuleError::Apply(format!("checking {}: {e}", depdb_path.display())))?;
                let rebuild = stale || !out_mtime.is_real() || out_mtime < newest_input || depdb_mtime > out_mtime;
                if !rebuild {
                    return Ok(Outcome::Unchanged);
                }

                let mut cmd = if is_static {
                    let mut c = tokio::process::Command::new("ar");
                    c.arg("rcs").arg(output.as_path());
                    c
                } else {
                    let mut c = tokio::process::Command::new(&toolchain.path);
                    if is_shared {
                        c.arg("-shared");
                    }
                    c.arg("-o").arg(output.as_path());
                    c
                };
                for obj in &object_paths {
                    cmd.arg(obj.as_path());
                }
                if !is_static {
                    cmd.args(&options);
                }
                let program = if is_static { "ar".to_string() } else { toolchain.path.display().to_string() };
                let status = cmd
                    .status()
                    .await
                    .map_err(|e| RuleError::Apply(format!("running {program}: {e}")))?;
                if status.success() {
                    Ok(Outcome::Changed)
                } else {
                    Err(RuleError::Apply(format!("{program} failed linking {output}")))
                }
            })
        });

        target.pad(action).set_applied(recipe.clone(), prereqs);
        Ok(recipe)
    }
}

fn clean(output: &bld_schema::path::FilePath, depdb_path: &PathBuf) -> Result<Outcome, RuleError> {
    let existed = output.as_path().is_file();
    match std::fs::remove_file(output.as_path()) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(RuleError::Apply(format!("removing {output}: {e}"))),
    }
    match std::fs::remove_file(depdb_path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(RuleError::Apply(format!("removing {}: {e}", depdb_path.display()))),
    }
    Ok(if existed { Outcome::Changed } else { Outcome::Unchanged })
}

/// See `crate::compile::collect_options` — same root-to-leaf walk, same
/// target-type/pattern-specific-block-before-plain-value rule per scope
/// (spec.md §4.2 steps 2/3).
fn collect_link_options(ctx: &Context, scope: &Arc<Scope>, target: &Target) -> Vec<String> {
    let pool = ctx.var_pool.read().unwrap();
    let chain: Vec<_> = ancestors(&ctx.scope_map, scope).into_iter().rev().collect();
    let mut out = Vec::new();
    for name in LINK_OPTION_VARS {
        let Some(var) = pool.find(name) else { continue };
        for s in &chain {
            let value = s
                .get_own_typed(target.target_type, &target.key.name, var.id)
                .or_else(|| s.get_own(var.id));
            match value {
                Some(Value::StringList(list)) => out.extend(list),
                Some(Value::String(v)) if *name == "cc.libs" => out.push(format!("-l{v}")),
                Some(Value::String(v)) => out.push(v),
                _ => {}
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bld_core::target::{DeclKind, TargetKey, TargetSet};
    use bld_schema::path::DirPath;

    fn toolchain() -> Arc<Toolchain> {
        Arc::new(Toolchain {
            path: PathBuf::from("/usr/bin/c++"),
            id: crate::toolchain::ToolchainId::Gcc,
            banner: "gcc version 12.2.0".into(),
            version: semver::Version::new(12, 2, 0),
            target: None,
        })
    }

    #[test]
    fn match_rule_matches_exe_liba_libs_but_not_obje() {
        let rule = LinkRule::new(toolchain());
        let set = TargetSet::new();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let ctx = rt.block_on(async { Context::new(DirPath::new("/work")) });
        let update = Action::new(meta::PERFORM, op::UPDATE);

        for tt in [&EXE, &LIBA, &LIBS] {
            let (t, _) = set.insert(
                TargetKey {
                    type_name: tt.name,
                    out_dir: DirPath::new("out"),
                    src_dir: None,
                    name: "foo".into(),
                    extension: tt.default_extension.map(str::to_string),
                },
                tt,
                DeclKind::Real,
            );
            assert!(matches!(rule.match_rule(&ctx, update, &t), MatchResult::Matched { .. }));
        }

        let (obj, _) = set.insert(
            TargetKey { type_name: "obje", out_dir: DirPath::new("out"), src_dir: None, name: "foo".into(), extension: Some("o".into()) },
            &OBJE,
            DeclKind::Implied,
        );
        assert!(matches!(rule.match_rule(&ctx, update, &obj), MatchResult::NotMatched));
    }

    #[test]
    fn collect_link_options_prefers_target_type_block_over_plain_scope_value() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ctx = Context::new(DirPath::new("/work"));
            let mut pool = bld_schema::variable::VariablePool::new();
            let loptions = pool.insert("cc.loptions");
            *ctx.var_pool.write().unwrap() = pool;
            let root = ctx.scope_map.global_root();
            root.set(loptions, Value::StringList(vec!["-Wl,-z,now".into()]));
            root.set_typed(EXE.name, "hello", loptions, Value::StringList(vec!["-Wl,-z,lazy".into()]));
            let set = TargetSet::new();
            let (exe, _) = set.insert(
                TargetKey { type_name: "exe", out_dir: DirPath::new("out"), src_dir: None, name: "hello".into(), extension: EXE.default_extension.map(str::to_string) },
                &EXE,
                DeclKind::Real,
            );
            let opts = collect_link_options(&ctx, &root, &exe);
            assert_eq!(opts, vec!["-Wl,-z,lazy".to_string()]);
        });
    }
}
