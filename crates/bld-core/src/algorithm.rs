//! The match/apply/execute algorithms (spec.md §4.5 "Match", §4.6
//! "Apply"/"Execute"), plus prerequisite search and the two pieces of
//! bookkeeping every operation needs regardless of target type:
//! `fsdir` injection and depdb cleanup on `clean`.
//!
//! Grounded on `libbuild2/algorithm.cxx`'s `search`/`match_rule`/
//! `execute`/`execute_members` functions, reworked per spec.md §9 to run
//! as async fns cooperating through [`crate::target::ActionPad`]'s watch
//! channel rather than condition-variable waits.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bld_schema::name::Name;

use crate::context::Context;
use crate::operation::{op, Action, ExecutionMode};
use crate::rule::{MatchResult, Recipe, RuleError};
use crate::scheduler::Scheduler;
use crate::scope::Scope;
use crate::target::{
    DeclKind, Outcome, Prerequisite, Step, Target, TargetKey, TargetType, FILE, FSDIR,
};

/// Error resolving a [`Prerequisite`] into a concrete [`Target`] (spec.md
/// §4.4 "Search").
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// The prerequisite named a target type that is not registered in
    /// the resolving project.
    #[error("unknown target type `{0}`")]
    UnknownTargetType(String),
}

/// Registry of known target types by buildfile name, consulted by
/// [`search`] to turn a [`Prerequisite`]'s optional type name into a
/// `&'static TargetType`. A real build registers this once per project
/// as modules load; tests and `bld-cc`/`bld-script` populate it with
/// their own types alongside the engine's built-ins.
pub struct TargetTypeRegistry {
    types: std::collections::HashMap<&'static str, &'static TargetType>,
}

impl TargetTypeRegistry {
    /// A registry pre-populated with the engine's built-in types
    /// (`file`, `dir`, `fsdir`, `alias`).
    pub fn standard() -> Self {
        let mut types = std::collections::HashMap::new();
        types.insert(FILE.name, &FILE);
        types.insert(crate::target::DIR.name, &crate::target::DIR);
        types.insert(FSDIR.name, &FSDIR);
        types.insert(crate::target::ALIAS.name, &crate::target::ALIAS);
        Self { types }
    }

    /// Register an additional target type (called by `bld-cc`/`bld-script`
    /// module init).
    pub fn register(&mut self, tt: &'static TargetType) {
        self.types.insert(tt.name, tt);
    }

    /// Look up by buildfile name.
    pub fn find(&self, name: &str) -> Option<&'static TargetType> {
        self.types.get(name).copied()
    }
}

/// Resolve `prereq` (relative to `scope`) into an interned [`Target`],
/// defaulting to `default_type` when the prerequisite named no explicit
/// target type (spec.md §4.4 "Search").
///
/// # Errors
///
/// Returns [`SearchError::UnknownTargetType`] if an explicit type name
/// does not resolve in `registry`.
pub fn search(
    ctx: &Context,
    scope: &Scope,
    registry: &TargetTypeRegistry,
    prereq: &Prerequisite,
    default_type: &'static TargetType,
) -> Result<Arc<Target>, SearchError> {
    let target_type = match prereq.type_name {
        Some(n) => registry.find(n).ok_or(SearchError::UnknownTargetType(n.to_string()))?,
        None => default_type,
    };
    let out_dir = scope.out_dir.join(prereq.directory.as_path());
    let extension = if target_type.is_dir {
        None
    } else {
        Some(
            target_type
                .default_extension
                .map(str::to_string)
                .unwrap_or_default(),
        )
    };
    let key = TargetKey {
        type_name: target_type.name,
        out_dir,
        src_dir: None,
        name: prereq.name.value.clone(),
        extension,
    };
    let (target, _created) = ctx.target_set.insert(key, target_type, DeclKind::Implied);
    Ok(target)
}

/// Resolve a bare [`Name`] the same way [`search`] resolves a
/// [`Prerequisite`] — used for buildspec target arguments, which carry no
/// surrounding dependency-clause context.
pub fn search_name(
    ctx: &Context,
    scope: &Scope,
    registry: &TargetTypeRegistry,
    name: &Name,
    default_type: &'static TargetType,
) -> Result<Arc<Target>, SearchError> {
    let prereq = Prerequisite {
        type_name: name.target_type.as_deref().and_then(|t| {
            // `'static` leak is acceptable here: target type names are a
            // small, bounded set registered once at process startup, so
            // this only ever resolves an already-registered `&'static
            // str`'s contents back to themselves via the registry below.
            Some(Box::leak(t.to_string().into_boxed_str()) as &'static str)
        }),
        directory: bld_schema::path::DirPath::new(name.directory.clone().unwrap_or_default()),
        name: Name::simple(name.value.clone()),
        project: name.project.clone(),
        local_vars: std::collections::HashMap::new(),
    };
    search(ctx, scope, registry, &prereq, default_type)
}

/// Pin-boxed future type used for the mutually-recursive match/execute
/// pair (`execute_prerequisites` calls back into both).
type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Match `target` against `action`: find the (unique) candidate rule,
/// call its `apply`, and record the recipe (spec.md §4.5 "Match", §4.6
/// "Apply").
///
/// Cooperates with concurrent callers via the target's
/// [`crate::target::ActionPad`] CAS: the first caller to observe
/// `Untouched` does the work; everyone else awaits it.
///
/// # Errors
///
/// Returns [`RuleError::NoRule`] if no rule matches, [`RuleError::Ambiguous`]
/// if more than one does with no way to prefer one, or whatever the
/// winning rule's `apply` returns.
pub fn match_target<'a>(
    ctx: &'a Arc<Context>,
    action: Action,
    target: &'a Arc<Target>,
) -> BoxFuture<'a, Result<(), RuleError>> {
    Box::pin(async move {
        let pad = target.pad(action);
        if !pad.try_advance(Step::Untouched, Step::Touched) {
            pad.wait_past(Step::Applied).await;
            return if pad.step() == Step::Failed {
                Err(RuleError::NoRule { action: action_name(ctx, action), target: target.key.to_string() })
            } else {
                Ok(())
            };
        }

        let root = ctx.scope_map.find_root(&target.key.out_dir);
        let Some(root_extra) = root.root.clone() else {
            pad.fail();
            return Err(RuleError::NoRule {
                action: action_name(ctx, action),
                target: target.key.to_string(),
            });
        };
        let (meta_name, op_name) = action_names(ctx, action);
        let candidates = root_extra.rules.read().unwrap().candidates(meta_name, op_name, target.target_type);

        let mut matched: Option<(Arc<dyn crate::rule::Rule>, String)> = None;
        for rule in candidates {
            match rule.match_rule(ctx, action, target) {
                MatchResult::Matched { hint } => {
                    if let Some((prev, prev_hint)) = &matched {
                        if *prev_hint != hint {
                            pad.fail();
                            return Err(RuleError::Ambiguous {
                                action: action_name(ctx, action),
                                target: target.key.to_string(),
                                candidates: vec![prev.name().to_string(), rule.name().to_string()],
                            });
                        }
                    }
                    matched = Some((rule, hint));
                }
                MatchResult::NotMatched => {}
            }
        }

        let Some((rule, _hint)) = matched else {
            pad.fail();
            return Err(RuleError::NoRule {
                action: action_name(ctx, action),
                target: target.key.to_string(),
            });
        };

        pad.set_matched(rule.clone());
        pad.publish(Step::Matched);

        match rule.apply(ctx, action, target) {
            Ok(recipe) => {
                let prereq_targets = target.pad(action).prerequisite_targets();
                pad.set_applied(recipe, prereq_targets);
                pad.publish(Step::Applied);
                Ok(())
            }
            Err(e) => {
                pad.fail();
                Err(e)
            }
        }
    })
}

fn action_names(ctx: &Context, action: Action) -> (&'static str, &'static str) {
    let _ = ctx;
    let meta_name = match action.meta() {
        crate::operation::meta::PERFORM => "perform",
        crate::operation::meta::CONFIGURE => "configure",
        crate::operation::meta::DISFIGURE => "disfigure",
        crate::operation::meta::INFO => "info",
        crate::operation::meta::DIST => "dist",
        _ => "noop",
    };
    let op_name = match action.inner_op() {
        op::UPDATE => "update",
        op::CLEAN => "clean",
        op::TEST => "test",
        op::INSTALL => "install",
        op::UNINSTALL => "uninstall",
        _ => "",
    };
    (meta_name, op_name)
}

fn action_name(ctx: &Context, action: Action) -> String {
    let (m, o) = action_names(ctx, action);
    format!("{m}({o})")
}

/// Execute `target` for `action`: run its prerequisites and its own
/// recipe in the order its operation's [`ExecutionMode`] dictates
/// (spec.md §4.6 "Execute"). Must be called after [`match_target`] has
/// succeeded for the same `(action, target)`.
///
/// # Errors
///
/// Propagates the recipe's error, a prerequisite's, or
/// [`RuleError::Cycle`] if `target` transitively depends on itself.
pub fn execute<'a>(
    ctx: &'a Arc<Context>,
    scheduler: &'a Scheduler,
    action: Action,
    target: &'a Arc<Target>,
) -> BoxFuture<'a, Result<Outcome, RuleError>> {
    execute_in_chain(ctx, scheduler, action, target, Vec::new())
}

/// `execute`'s real body, threading the ancestry of targets currently
/// being executed *by this same top-level call* (spec.md §8 "A cyclic
/// dependency is detected and reported (failure, not hang)"). Every
/// recursive step (through [`execute_prerequisites`]) appends `target`'s
/// key before recursing; a prerequisite whose key is already on the
/// chain would otherwise wait forever on a [`Step::Busy`] pad that only
/// this same call chain can ever advance past `Busy` — that wait is
/// replaced with an immediate [`RuleError::Cycle`].
fn execute_in_chain<'a>(
    ctx: &'a Arc<Context>,
    scheduler: &'a Scheduler,
    action: Action,
    target: &'a Arc<Target>,
    ancestry: Vec<TargetKey>,
) -> BoxFuture<'a, Result<Outcome, RuleError>> {
    Box::pin(async move {
        let pad = target.pad(action);
        if ancestry.iter().any(|k| *k == target.key) {
            pad.fail();
            let mut path: Vec<String> = ancestry.iter().map(ToString::to_string).collect();
            path.push(target.key.to_string());
            return Err(RuleError::Cycle { path: path.join(" -> ") });
        }

        if !pad.try_advance(Step::Applied, Step::Busy) {
            pad.wait_past(Step::Executed).await;
            return if pad.step() == Step::Failed {
                Err(RuleError::Apply(format!("{} failed", target.key)))
            } else {
                Ok(pad.outcome())
            };
        }

        let mode = execution_mode(action);
        let prereqs = pad.prerequisite_targets();
        let mut chain = ancestry;
        chain.push(target.key.clone());

        let run_prereqs = |ctx: &'a Arc<Context>, chain: Vec<TargetKey>| -> BoxFuture<'a, Result<Outcome, RuleError>> {
            let prereqs = prereqs.clone();
            Box::pin(async move { execute_prerequisites(ctx, scheduler, action, &prereqs, &chain).await })
        };

        let prereq_outcome = if mode == ExecutionMode::First {
            match run_prereqs(ctx, chain.clone()).await {
                Ok(o) => o,
                Err(e) => {
                    pad.fail();
                    return Err(e);
                }
            }
        } else {
            Outcome::Unchanged
        };

        let recipe = pad.recipe();
        let own_outcome = match recipe {
            Some(recipe) => match run_postponable_recipe(ctx, scheduler, action, target, &recipe).await {
                Ok(o) => o,
                Err(e) => {
                    pad.fail();
                    return Err(e);
                }
            },
            None => Outcome::Unchanged,
        };

        let final_outcome = if mode == ExecutionMode::Last {
            let after = match run_prereqs(ctx, chain).await {
                Ok(o) => o,
                Err(e) => {
                    pad.fail();
                    return Err(e);
                }
            };
            combine_outcome(own_outcome, after)
        } else {
            combine_outcome(prereq_outcome, own_outcome)
        };

        pad.set_outcome(final_outcome);
        pad.publish(Step::Executed);
        Ok(final_outcome)
    })
}

/// Run `recipe`, re-invoking it while it keeps returning
/// [`Outcome::Postponed`] (spec.md §4.5 "Postponed targets are revisited
/// ... after the initial pass"), up to
/// [`crate::target::POSTPONE_LIMIT`] times — resolving spec.md §9's Open
/// Question #1 (a bounded re-examination count, per SPEC_FULL.md §4.1).
/// Past the limit the rule is considered unable to reach a final
/// determination, which is an [`RuleError::Apply`] failure rather than a
/// silently-accepted `Postponed` outcome.
async fn run_postponable_recipe(
    ctx: &Arc<Context>,
    scheduler: &Scheduler,
    action: Action,
    target: &Arc<Target>,
    recipe: &Recipe,
) -> Result<Outcome, RuleError> {
    let pad = target.pad(action);
    loop {
        let outcome = scheduler
            .run_recipe(run_one(ctx.clone(), recipe.clone(), action, target.clone()))
            .await
            .map_err(|e| match e {
                crate::scheduler::ScheduleError::Rule(r) => r,
                other => RuleError::Apply(other.to_string()),
            })?;
        if outcome != Outcome::Postponed {
            return Ok(outcome);
        }
        let count = pad.bump_postpone();
        if count > crate::target::POSTPONE_LIMIT {
            return Err(RuleError::Apply(format!(
                "{} could not make a final determination after {} postponements",
                target.key,
                crate::target::POSTPONE_LIMIT
            )));
        }
        tracing::debug!(
            target: "bld_core::algorithm",
            target = %target.key,
            count,
            "re-examining postponed target"
        );
    }
}

fn run_one(
    ctx: Arc<Context>,
    recipe: Recipe,
    action: Action,
    target: Arc<Target>,
) -> impl Future<Output = Result<Outcome, RuleError>> + Send + 'static {
    async move { recipe.run(ctx, action, target).await }
}

/// Match and execute every target in `prereqs`, in dependency order
/// (spec.md §4.6 "Execute": "a target's prerequisites all execute,
/// possibly concurrently, before the target's own recipe runs" for
/// `ExecutionMode::First`). Aggregates to the "most changed" outcome:
/// any `Changed` prerequisite makes the aggregate `Changed`; any
/// unresolved `Postponed` makes it `Postponed` (unless a sibling already
/// failed); a `Failed` prerequisite fails the aggregate immediately.
///
/// # Errors
///
/// Returns the first prerequisite's match/execute error encountered, or
/// [`RuleError::Cycle`] (via [`execute_in_chain`]) if a prerequisite
/// closes a cycle back to one of `ancestry`'s targets.
pub async fn execute_prerequisites(
    ctx: &Arc<Context>,
    scheduler: &Scheduler,
    action: Action,
    prereqs: &[Arc<Target>],
    ancestry: &[TargetKey],
) -> Result<Outcome, RuleError> {
    let futures = prereqs.iter().map(|p| async move {
        match_target(ctx, action, p).await?;
        execute_in_chain(ctx, scheduler, action, p, ancestry.to_vec()).await
    });
    let outcomes = futures::future::try_join_all(futures).await?;
    Ok(outcomes.into_iter().fold(Outcome::Unchanged, combine_outcome))
}

fn combine_outcome(a: Outcome, b: Outcome) -> Outcome {
    use Outcome::{Changed, Failed, Postponed, Unchanged, Unknown};
    match (a, b) {
        (Failed, _) | (_, Failed) => Failed,
        (Postponed, _) | (_, Postponed) => Postponed,
        (Changed, _) | (_, Changed) => Changed,
        (Unchanged, Unchanged) => Unchanged,
        (Unknown, other) | (other, Unknown) => other,
    }
}

fn execution_mode(action: Action) -> ExecutionMode {
    match action.inner_op() {
        op::CLEAN | op::UNINSTALL => ExecutionMode::Last,
        _ => ExecutionMode::First,
    }
}

/// Ensure the `fsdir{}` target for `dir` (and, transitively, every
/// ancestor directory up to `stop_at`) is in the target set and injected
/// as a prerequisite ahead of anything that writes into `dir` (spec.md
/// §4.6 "fsdir injection").
pub fn inject_fsdir(ctx: &Context, dir: &bld_schema::path::DirPath, stop_at: &bld_schema::path::DirPath) -> Vec<Arc<Target>> {
    let mut chain = Vec::new();
    let mut cur = Some(dir.clone());
    while let Some(d) = cur {
        if &d == stop_at || d.is_empty() {
            break;
        }
        let key = TargetKey {
            type_name: FSDIR.name,
            out_dir: d.clone(),
            src_dir: None,
            name: String::new(),
            extension: None,
        };
        let (t, _) = ctx.target_set.insert(key, &FSDIR, DeclKind::AdHoc);
        chain.push(t);
        cur = d.parent();
    }
    chain
}

/// Resolve `target`'s own declared prerequisite list (spec.md §3
/// "Prerequisite": populated by the loader from a dependency clause, not
/// yet interned into targets) into concrete targets, relative to `scope`.
/// Every [`Rule::apply`](crate::rule::Rule::apply) implementation that
/// wants `crate::algorithm::execute` to run its prerequisites calls this
/// and stashes the result via
/// [`crate::target::ActionPad::set_applied`] before returning its recipe
/// — `match_target` only reads whatever a rule has already stored there,
/// it never resolves prerequisites on a rule's behalf.
///
/// # Errors
///
/// Returns [`SearchError::UnknownTargetType`] if a prerequisite names a
/// target type not in `registry`.
pub fn resolve_prerequisites(
    ctx: &Context,
    scope: &Scope,
    registry: &TargetTypeRegistry,
    target: &Target,
    default_type: &'static TargetType,
) -> Result<Vec<Arc<Target>>, SearchError> {
    target
        .prerequisites
        .read()
        .unwrap()
        .iter()
        .map(|p| search(ctx, scope, registry, p, default_type))
        .collect()
}

/// Remove a target's depdb file as part of `clean` (spec.md §4.7: "clean
/// removes a target's depdb alongside its output, since a depdb with no
/// corresponding output is meaningless").
///
/// # Errors
///
/// Returns an [`std::io::Error`] on a removal failure other than "not
/// found".
pub fn perform_clean_depdb(target: &Target) -> std::io::Result<()> {
    let depdb_path = target.output_path().as_path().with_extension(
        target
            .output_path()
            .extension()
            .map(|e| format!("{e}.d"))
            .unwrap_or_else(|| "d".to_string()),
    );
    match std::fs::remove_file(&depdb_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_outcome_prefers_failed_over_everything() {
        assert_eq!(combine_outcome(Outcome::Changed, Outcome::Failed), Outcome::Failed);
        assert_eq!(combine_outcome(Outcome::Unchanged, Outcome::Changed), Outcome::Changed);
        assert_eq!(combine_outcome(Outcome::Unchanged, Outcome::Unchanged), Outcome::Unchanged);
    }

    #[test]
    fn execution_mode_is_last_for_clean_and_uninstall() {
        assert_eq!(execution_mode(Action::new(crate::operation::meta::PERFORM, op::CLEAN)), ExecutionMode::Last);
        assert_eq!(execution_mode(Action::new(crate::operation::meta::PERFORM, op::UPDATE)), ExecutionMode::First);
    }

    #[test]
    fn inject_fsdir_stops_at_boundary() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ctx = Context::new(bld_schema::path::DirPath::new("/work"));
            let chain = inject_fsdir(&ctx, &bld_schema::path::DirPath::new("/work/out/a/b"), &bld_schema::path::DirPath::new("/work/out"));
            assert_eq!(chain.len(), 2);
            assert_eq!(chain[0].key.out_dir, bld_schema::path::DirPath::new("/work/out/a/b"));
            assert_eq!(chain[1].key.out_dir, bld_schema::path::DirPath::new("/work/out/a"));
        });
    }
}
