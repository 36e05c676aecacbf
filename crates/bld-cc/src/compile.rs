//! The C/C++ compile rule: `obje{}` from `cxx{}` (spec.md §4.10 "Compile
//! rule"), grounded on `libbuild2/cc/init.cxx`'s rule registration and the
//! depdb-driven staleness check `libbuild2/cc/compile-rule.cxx` performs
//! (fingerprint line plus one line per discovered header, read back
//! sequentially against the previous run).

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

use crate::target_types::{CXX, OBJE};
use crate::toolchain::Toolchain;

/// The variables a compile rule pulls compiler options from, searched
/// outer-to-inner up the scope chain and concatenated (spec.md §4.10's
/// reduced option model: no per-language `c.*`/`cxx.*` split beyond what
/// these two cover).
const OPTION_VARS: &[&str] = &["cc.poptions", "cc.coptions", "cxx.std"];

/// Compiles a single `cxx{}` source into an `obje{}` object file.
pub struct CompileRule {
    toolchain: Arc<Toolchain>,
}

impl CompileRule {
    /// Build a compile rule bound to an already-probed toolchain.
    pub fn new(toolchain: Arc<Toolchain>) -> Self {
        Self { toolchain }
    }
}

impl Rule for CompileRule {
    fn name(&self) -> &str {
        "cc.compile"
    }

    fn match_rule(&self, _ctx: &Context, action: Action, target: &Target) -> MatchResult {
        if target.target_type.is_a(&OBJE) && action.meta() == meta::PERFORM {
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
        let prereqs = resolve_prerequisites(ctx, &scope, &registry, target, &CXX)
            .map_err(|e| RuleError::Apply(e.to_string()))?;
        drop(registry);

        let source = prereqs
            .iter()
            .find(|t| t.target_type.is_a(&CXX))
            .ok_or_else(|| RuleError::Apply(format!("{} has no cxx{{}} source", target.key)))?
            .clone();

        let options = collect_options(ctx, &scope, target);
        let toolchain = self.toolchain.clone();
        let output = target.output_path();
        let depdb_path = output
            .as_path()
            .with_extension(output.extension().map(|e| format!("{e}.d")).unwrap_or_else(|| "d".into()));

        let recipe = Recipe::new(move |_ctx, action, target| -> RecipeFuture {
            let toolchain = toolchain.clone();
            let options = options.clone();
            let output = output.clone();
            let depdb_path = depdb_path.clone();
            let source = source.clone();
            Box::pin(async move {
                if action.inner_op() == op::CLEAN {
                    return clean(&output, &depdb_path);
                }
                let source_path = source.output_path();
                let out_mtime = Timestamp::mtime(output.as_path())
                    .map_err(|e| RuleError::Apply(format!("checking {output}: {e}")))?;
                let src_mtime = Timestamp::mtime(source_path.as_path())
                    .map_err(|e| RuleError::Apply(format!("checking {source_path}: {e}")))?;

                let fingerprint = Sha256Digest::of(format!("{}{:?}", toolchain.banner, options));
                let mut db = DepDb::open(&depdb_path)
                    .map_err(|e| RuleError::Apply(format!("opening {}: {e}", depdb_path.display())))?;
                db.expect(&format_fingerprint("cc.compile", fingerprint))
                    .map_err(|e| RuleError::Apply(e.to_string()))?;
                db.expect(&source_path.to_string())
                    .map_err(|e| RuleError::Apply(e.to_string()))?;
                let stale = db.touched();
                db.close().map_err(|e| RuleError::Apply(e.to_string()))?;

                // spec.md §4.7 step 6: a depdb newer than the output it
                // describes means the last attempt to reconcile them
                // never finished successfully (e.g. the compile below
                // failed after the depdb had already been rewritten to
                // match new options) — rebuild regardless of `stale`.
                let depdb_mtime = Timestamp::mtime(&depdb_path)
                    .map_err(|e| RuleError::Apply(format!("checking {}: {e}", depdb_path.display())))?;
                let rebuild = stale || !out_mtime.is_real() || out_mtime < src_mtime || depdb_mtime > out_mtime;
                if !rebuild {
                    return Ok(Outcome::Unchanged);
                }

                let status = tokio::process::Command::new(&toolchain.path)
                    .args(&options)
                    .arg("-c")
                    .arg(source_path.as_path())
                    .arg("-o")
                    .arg(output.as_path())
                    .status()
                    .await
                    .map_err(|e| RuleError::Apply(format!("running {}: {e}", toolchain.path.display())))?;
                if status.success() {
                    Ok(Outcome::Changed)
                } else {
                    Err(RuleError::Apply(format!("{} failed compiling {source_path}", toolchain.path.display())))
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

/// Walk `scope`'s ancestor chain, root first, collecting every
/// `OPTION_VARS` entry as flat compiler arguments. At each scope, a
/// target-type/pattern-specific block value (spec.md §4.2 step 2, e.g.
/// `exe{hello}: cxx.std = 20`) for `target` is consulted ahead of that
/// scope's plain value (step 3), so a per-target override wins without
/// suppressing options inherited from outer scopes.
fn collect_options(ctx: &Context, scope: &Arc<Scope>, target: &Target) -> Vec<String> {
    let pool = ctx.var_pool.read().unwrap();
    let chain: Vec<_> = ancestors(&ctx.scope_map, scope).into_iter().rev().collect();
    let mut out = Vec::new();
    for name in OPTION_VARS {
        let Some(var) = pool.find(name) else { continue };
        for s in &chain {
            if let Some(v) = s.get_own_typed(target.target_type, &target.key.name, var.id) {
                push_option(&mut out, name, v);
            } else if let Some(v) = s.get_own(var.id) {
                push_option(&mut out, name, v);
            }
        }
    }
    out
}

fn push_option(out: &mut Vec<String>, name: &str, value: Value) {
    match value {
        Value::StringList(list) => out.extend(list),
        Value::String(v) if name == "cxx.std" => out.push(format!("-std={v}")),
        Value::String(v) => out.push(v),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bld_core::target::{DeclKind, TargetKey, TargetSet};
    use bld_schema::path::DirPath;
    use bld_schema::variable::VariablePool;

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
    fn match_rule_only_matches_obje_under_perform() {
        let rule = CompileRule::new(toolchain());
        let set = TargetSet::new();
        let (obj, _) = set.insert(
            TargetKey { type_name: "obje", out_dir: DirPath::new("out"), src_dir: None, name: "foo".into(), extension: Some("o".into()) },
            &OBJE,
            DeclKind::Implied,
        );
        let rt = tokio::runtime::Runtime::new().unwrap();
        let ctx = rt.block_on(async { Context::new(DirPath::new("/work")) });
        let update = Action::new(meta::PERFORM, op::UPDATE);
        assert!(matches!(rule.match_rule(&ctx, update, &obj), MatchResult::Matched { .. }));

        let (file, _) = set.insert(
            TargetKey { type_name: "file", out_dir: DirPath::new("out"), src_dir: None, name: "bar".into(), extension: None },
            &bld_core::target::FILE,
            DeclKind::Implied,
        );
        assert!(matches!(rule.match_rule(&ctx, update, &file), MatchResult::NotMatched));
    }

    #[test]
    fn collect_options_concatenates_root_to_leaf() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ctx = Context::new(DirPath::new("/work"));
            let mut pool = VariablePool::new();
            let coptions = pool.insert("cc.coptions");
            *ctx.var_pool.write().unwrap() = pool;
            let root = ctx.scope_map.global_root();
            root.set(coptions, Value::StringList(vec!["-Wall".into()]));
            let sub = ctx.scope_map.insert(DirPath::new("a"), DirPath::new("a"), None);
            sub.set(coptions, Value::StringList(vec!["-O2".into()]));
            let set = TargetSet::new();
            let (obj, _) = set.insert(
                TargetKey { type_name: "obje", out_dir: DirPath::new("a"), src_dir: None, name: "foo".into(), extension: Some("o".into()) },
                &OBJE,
                DeclKind::Implied,
            );
            let opts = collect_options(&ctx, &sub, &obj);
            assert_eq!(opts, vec!["-Wall".to_string(), "-O2".to_string()]);
        });
    }

    #[test]
    fn collect_options_prefers_target_type_block_over_plain_scope_value() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ctx = Context::new(DirPath::new("/work"));
            let mut pool = VariablePool::new();
            let std_var = pool.insert("cxx.std");
            *ctx.var_pool.write().unwrap() = pool;
            let root = ctx.scope_map.global_root();
            root.set(std_var, Value::String("17".into()));
            root.set_typed(OBJE.name, "foo", std_var, Value::String("20".into()));
            let set = TargetSet::new();
            let (obj, _) = set.insert(
                TargetKey { type_name: "obje", out_dir: DirPath::new("out"), src_dir: None, name: "foo".into(), extension: Some("o".into()) },
                &OBJE,
                DeclKind::Implied,
            );
            let opts = collect_options(&ctx, &root, &obj);
            assert_eq!(opts, vec!["-std=20".to_string()]);
        });
    }
}
