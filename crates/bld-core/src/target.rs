//! The target model (spec.md §3 "Target", §2 component D).
//!
//! A [`Target`] is interned once per `(type, out_dir, src_dir, name,
//! extension)` key inside a [`TargetSet`] and never removed — only its
//! per-action [`ActionPad`]s are reset between independent operations
//! (`TargetSet::reset_for_new_operation`).

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use bld_schema::path::{DirPath, FilePath};
use bld_schema::name::Name;

use crate::operation::Action;
use crate::rule::{Recipe, Rule};

/// How a target came to exist in the set, per spec.md §3: governs whether
/// the absence of a matching rule is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    /// Inserted only because some other target referenced it; never
    /// explicitly declared. A missing rule for an `Implied` target of
    /// `perform(update)` silently resolves it as "assumed up to date" if
    /// it is a source file that exists on disk.
    Implied,
    /// Inserted purely as another target's prerequisite reference.
    Prerequisite,
    /// Declared with its own dependency clause in a buildfile.
    Real,
    /// Declared `ad hoc` (a secondary member of a group, or a target with
    /// no recipe of its own that is produced as a side effect).
    AdHoc,
}

/// Open, extensible target type registry entry (spec.md §3 "Target type").
///
/// Target types are plain data plus function pointers, per the redesign
/// note in spec.md §9 ("replace virtual dispatch with a tagged-variant-
/// plus-vtable-struct approach").
pub struct TargetType {
    /// The type's buildfile name, e.g. `exe`, `file`, `dir`.
    pub name: &'static str,
    /// The base type this one derives from, if any (`obje` derives from
    /// `file`, etc). Used by rule lookup to fall back to a base type's
    /// rules when no rule is registered for the derived type directly.
    pub base: Option<&'static TargetType>,
    /// The default extension applied when a prerequisite of this type
    /// names no explicit extension (`None` means "no default — the
    /// extension must be supplied or derived some other way").
    pub default_extension: Option<&'static str>,
    /// `true` if this type denotes a directory-like target (`dir{}`,
    /// `fsdir{}`) rather than a file.
    pub is_dir: bool,
}

impl fmt::Debug for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetType").field("name", &self.name).finish()
    }
}

impl PartialEq for TargetType {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}
impl Eq for TargetType {}

impl TargetType {
    /// `true` if `self` is `other` or derives from it (directly or
    /// transitively) — the "type hierarchy consulted" mentioned by
    /// spec.md §4.2 for target-type/pattern-specific variable lookup.
    pub fn is_a(&self, other: &TargetType) -> bool {
        let mut cur: &TargetType = self;
        loop {
            if std::ptr::eq(cur, other) {
                return true;
            }
            match cur.base {
                Some(b) => cur = b,
                None => return false,
            }
        }
    }
}

/// The built-in `file` target type: the base of nearly every file-based
/// target type a module registers.
pub static FILE: TargetType = TargetType {
    name: "file",
    base: None,
    default_extension: None,
    is_dir: false,
};

/// The built-in `dir{}` target type (an ordinary, already-existing
/// directory named as a prerequisite).
pub static DIR: TargetType = TargetType {
    name: "dir",
    base: None,
    default_extension: None,
    is_dir: true,
};

/// The built-in `fsdir{}` target type: "make sure this directory exists",
/// injected automatically ahead of any target whose output lives in it
/// (`algorithm::inject_fsdir`, spec.md §4.6).
pub static FSDIR: TargetType = TargetType {
    name: "fsdir",
    base: Some(&DIR),
    default_extension: None,
    is_dir: true,
};

/// The built-in `alias` target type: a target with prerequisites but no
/// recipe output of its own (a grouping node).
pub static ALIAS: TargetType = TargetType {
    name: "alias",
    base: None,
    default_extension: None,
    is_dir: false,
};

/// The key a [`Target`] is interned under (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetKey {
    /// Target type name (interning target types by name rather than
    /// pointer keeps the key `Hash`/`Eq` without depending on a specific
    /// `'static` lifetime threading scheme).
    pub type_name: &'static str,
    /// Output directory.
    pub out_dir: DirPath,
    /// Source directory, if this is an in-tree build where src != out.
    pub src_dir: Option<DirPath>,
    /// The target's leaf name.
    pub name: String,
    /// The target's extension (`Some("")` for explicitly-no-extension).
    pub extension: Option<String>,
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{{}", self.type_name, self.out_dir)?;
        write!(f, "{}", self.name)?;
        if let Some(e) = &self.extension {
            if !e.is_empty() {
                write!(f, ".{e}")?;
            }
        }
        write!(f, "}}")
    }
}

/// An unresolved reference to a target, as parsed from a dependency
/// declaration's prerequisite list (spec.md §3 "Prerequisite").
#[derive(Debug, Clone)]
pub struct Prerequisite {
    /// The requested target type, if named explicitly (`exe{foo}` vs bare
    /// `foo`, which is resolved against the dependent's default
    /// prerequisite type).
    pub type_name: Option<&'static str>,
    /// Directory the name is relative to.
    pub directory: DirPath,
    /// The prerequisite's name.
    pub name: Name,
    /// Qualifying project, for cross-project prerequisites (`import`).
    pub project: Option<String>,
    /// Prerequisite-scope-local variable overrides (e.g. `{ options = ... }`
    /// attached to one prerequisite in a dependency clause).
    pub local_vars: HashMap<String, bld_schema::value::Value>,
}

/// Declaration kind plus the recipe execution mode a group's ad-hoc
/// members share with their primary.
#[derive(Debug, Default)]
pub struct GroupInfo {
    /// Secondary targets produced by the same recipe invocation as the
    /// primary (spec.md §3 "Ad hoc group").
    pub ad_hoc_members: Vec<Arc<Target>>,
    /// For an *explicit* group (spec.md §3): members discovered during
    /// match rather than declared ad hoc.
    pub explicit_members: Vec<Arc<Target>>,
}

/// The state-machine step a target's per-action pad has reached
/// (spec.md §4.5's diagram). CAS-guarded so concurrent requesters
/// cooperate: the first caller to observe `Untouched` and win the CAS into
/// `Touched` proceeds to call `match_async`; everyone else either waits on
/// [`ActionPad::state_changed`] or, if already past the step they need,
/// proceeds immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Step {
    /// No rule has looked at this target for this action yet.
    Untouched = 0,
    /// A rule's `match` is in progress or done.
    Touched = 1,
    /// A rule has matched and `apply` has been (or is being) called.
    Matched = 2,
    /// `apply` finished; prerequisite-targets list and recipe are stable.
    Applied = 3,
    /// The recipe is currently executing.
    Busy = 4,
    /// The recipe has returned.
    Executed = 5,
    /// A step failed; terminal.
    Failed = 6,
}

impl Step {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Step::Untouched,
            1 => Step::Touched,
            2 => Step::Matched,
            3 => Step::Applied,
            4 => Step::Busy,
            5 => Step::Executed,
            _ => Step::Failed,
        }
    }
}

/// The recipe's final verdict for a target (spec.md §4.6 `execute`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Not yet determined.
    Unknown,
    /// The target was already up to date; nothing ran.
    Unchanged,
    /// The recipe ran and updated (or removed, for `last`-mode operations)
    /// the target.
    Changed,
    /// The rule asked to be re-examined later (spec.md §4.5
    /// "Postponement").
    Postponed,
    /// The recipe failed.
    Failed,
}

/// Per-(meta-operation,operation) mutable state attached to a target
/// (spec.md §3 "per-action state pad"). A target carries two of these —
/// inner and outer (spec.md §4.6, `Action`'s inner/outer split) — selected
/// by [`Target::pad`].
pub struct ActionPad {
    step: AtomicU8,
    notify: tokio::sync::watch::Sender<Step>,
    /// Subscribe to receive this, not constructed per-lookup.
    notify_rx: tokio::sync::watch::Receiver<Step>,
    inner: Mutex<ActionPadInner>,
}

struct ActionPadInner {
    rule: Option<Arc<dyn Rule>>,
    recipe: Option<Recipe>,
    prerequisite_targets: Vec<Arc<Target>>,
    outcome: Outcome,
    postpone_count: u32,
    /// Rule-private scratch data threaded from `match` through `apply`
    /// through `execute` (spec.md §3: "a small typed data pad for the
    /// rule to stash match -> apply -> execute state").
    rule_data: Option<Box<dyn std::any::Any + Send + Sync>>,
}

impl Default for ActionPad {
    fn default() -> Self {
        let (tx, rx) = tokio::sync::watch::channel(Step::Untouched);
        Self {
            step: AtomicU8::new(Step::Untouched as u8),
            notify: tx,
            notify_rx: rx,
            inner: Mutex::new(ActionPadInner {
                rule: None,
                recipe: None,
                prerequisite_targets: Vec::new(),
                outcome: Outcome::Unknown,
                postpone_count: 0,
                rule_data: None,
            }),
        }
    }
}

/// Bound on repeated [`Outcome::Postponed`] re-examination (spec.md §9 Open
/// Question #1; resolved in SPEC_FULL.md §4.1).
pub const POSTPONE_LIMIT: u32 = 8;

impl ActionPad {
    /// Current step, acquire-ordered so a reader who observes `Applied` or
    /// later is guaranteed to see the writer's prior stores (spec.md §5
    /// "Ordering").
    pub fn step(&self) -> Step {
        Step::from_u8(self.step.load(Ordering::Acquire))
    }

    /// Attempt to advance from `from` to `to`. Returns `true` if this
    /// caller won the race and should perform the work associated with the
    /// new step; `false` means someone else is already doing it (or past
    /// it) and the caller should wait via [`ActionPad::wait_past`].
    pub fn try_advance(&self, from: Step, to: Step) -> bool {
        self.step
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Force the step to `Failed` regardless of current value; terminal.
    pub fn fail(&self) {
        self.step.store(Step::Failed as u8, Ordering::Release);
        let _ = self.notify.send(Step::Failed);
    }

    /// Publish a successful step advance to waiters.
    pub fn publish(&self, step: Step) {
        self.step.store(step as u8, Ordering::Release);
        let _ = self.notify.send(step);
    }

    /// Suspend until the step reaches at least `target` (or `Failed`).
    /// This is the scheduler's cooperative-suspension primitive (spec.md
    /// §4.8): awaiting a `watch` channel yields the worker thread back to
    /// the tokio runtime, which is free to run another ready task.
    pub async fn wait_past(&self, target: Step) {
        let mut rx = self.notify_rx.clone();
        loop {
            if *rx.borrow() >= target {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Record the rule and recipe decided by `apply`.
    pub fn set_matched(&self, rule: Arc<dyn Rule>) {
        self.inner.lock().unwrap().rule = Some(rule);
    }

    /// Record the applied recipe and resolved prerequisite-targets list.
    pub fn set_applied(&self, recipe: Recipe, prereqs: Vec<Arc<Target>>) {
        let mut g = self.inner.lock().unwrap();
        g.recipe = Some(recipe);
        g.prerequisite_targets = prereqs;
    }

    /// The resolved prerequisite-targets list (only meaningful once
    /// [`ActionPad::step`] is at least `Applied`).
    pub fn prerequisite_targets(&self) -> Vec<Arc<Target>> {
        self.inner.lock().unwrap().prerequisite_targets.clone()
    }

    /// The matched rule, if any.
    pub fn rule(&self) -> Option<Arc<dyn Rule>> {
        self.inner.lock().unwrap().rule.clone()
    }

    /// The applied recipe, if any.
    pub fn recipe(&self) -> Option<Recipe> {
        self.inner.lock().unwrap().recipe.clone()
    }

    /// Record the recipe's final verdict.
    pub fn set_outcome(&self, outcome: Outcome) {
        self.inner.lock().unwrap().outcome = outcome;
    }

    /// The recipe's final verdict, once `Executed` or `Failed`.
    pub fn outcome(&self) -> Outcome {
        self.inner.lock().unwrap().outcome
    }

    /// Bump the postpone counter; returns the new count.
    pub fn bump_postpone(&self) -> u32 {
        let mut g = self.inner.lock().unwrap();
        g.postpone_count += 1;
        g.postpone_count
    }

    /// Stash rule-private data for the `match` -> `apply` -> `execute`
    /// chain.
    pub fn set_rule_data<T: std::any::Any + Send + Sync>(&self, data: T) {
        self.inner.lock().unwrap().rule_data = Some(Box::new(data));
    }

    /// Retrieve rule-private data previously stashed with the same `T`.
    pub fn rule_data<T: std::any::Any + Send + Sync + Clone>(&self) -> Option<T> {
        self.inner
            .lock()
            .unwrap()
            .rule_data
            .as_ref()
            .and_then(|b| b.downcast_ref::<T>())
            .cloned()
    }
}

/// A node in the build graph (spec.md §3 "Target").
pub struct Target {
    /// This target's interned key.
    pub key: TargetKey,
    /// The target type (looked up from the registry that owns it).
    pub target_type: &'static TargetType,
    /// How this target came to exist.
    pub decl_kind: RwLock<DeclKind>,
    /// Unresolved prerequisite list, as declared in the buildfile.
    pub prerequisites: RwLock<Vec<Prerequisite>>,
    /// Ad-hoc/explicit group bookkeeping.
    pub group: Mutex<GroupInfo>,
    /// Number of dependents that have registered interest in this
    /// target's state (used by the scheduler to decide when a target's
    /// pad can be considered quiescent).
    pub dependents: std::sync::atomic::AtomicUsize,
    /// `[inner, outer]` per-action pads (spec.md §3).
    pads: [ActionPad; 2],
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

impl Target {
    fn new(key: TargetKey, target_type: &'static TargetType, decl_kind: DeclKind) -> Self {
        Self {
            key,
            target_type,
            decl_kind: RwLock::new(decl_kind),
            prerequisites: RwLock::new(Vec::new()),
            group: Mutex::new(GroupInfo::default()),
            dependents: std::sync::atomic::AtomicUsize::new(0),
            pads: [ActionPad::default(), ActionPad::default()],
        }
    }

    /// The inner or outer pad for `action` (spec.md §3, §4.6).
    pub fn pad(&self, action: Action) -> &ActionPad {
        if action.is_inner() {
            &self.pads[0]
        } else {
            &self.pads[1]
        }
    }

    /// The output path for a file-based target (its out-directory joined
    /// with its name and extension). Meaningless for `alias`/group
    /// targets.
    pub fn output_path(&self) -> FilePath {
        let mut leaf = self.key.name.clone();
        if let Some(ext) = &self.key.extension {
            if !ext.is_empty() {
                leaf.push('.');
                leaf.push_str(ext);
            }
        }
        FilePath::new(self.key.out_dir.join(leaf).as_path())
    }
}

/// The interned, grow-only set of all targets in the build graph
/// (spec.md §4.4). Lookup never invalidates outstanding `Arc<Target>`
/// references, and concurrent inserts of the same key are coalesced.
#[derive(Default)]
pub struct TargetSet {
    targets: RwLock<HashMap<TargetKey, Arc<Target>>>,
}

impl TargetSet {
    /// Create an empty target set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert-or-fetch `key`, returning the target and whether this call
    /// created it (spec.md §4.4).
    pub fn insert(
        &self,
        key: TargetKey,
        target_type: &'static TargetType,
        decl_kind: DeclKind,
    ) -> (Arc<Target>, bool) {
        // Fast path: shared lock, no allocation, for the common case of an
        // already-interned target.
        if let Some(t) = self.targets.read().unwrap().get(&key) {
            return (t.clone(), false);
        }
        let mut map = self.targets.write().unwrap();
        if let Some(t) = map.get(&key) {
            return (t.clone(), false);
        }
        let t = Arc::new(Target::new(key.clone(), target_type, decl_kind));
        map.insert(key, t.clone());
        (t, true)
    }

    /// Look up an already-interned target, if any.
    pub fn find(&self, key: &TargetKey) -> Option<Arc<Target>> {
        self.targets.read().unwrap().get(key).cloned()
    }

    /// Number of interned targets (diagnostics/tests only).
    pub fn len(&self) -> usize {
        self.targets.read().unwrap().len()
    }

    /// `true` if no targets have been interned.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reset every target's per-action pads to `Untouched`, as done at the
    /// boundary between two independent operations in the same process
    /// (spec.md §3 "Lifecycle"). Only valid during the load phase.
    pub fn reset_for_new_operation(&self) {
        for t in self.targets.read().unwrap().values() {
            for pad in &t.pads {
                pad.step.store(Step::Untouched as u8, Ordering::Release);
                let mut g = pad.inner.lock().unwrap();
                g.rule = None;
                g.recipe = None;
                g.prerequisite_targets.clear();
                g.outcome = Outcome::Unknown;
                g.postpone_count = 0;
                g.rule_data = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> TargetKey {
        TargetKey {
            type_name: "file",
            out_dir: DirPath::new("out"),
            src_dir: None,
            name: name.to_string(),
            extension: None,
        }
    }

    #[test]
    fn insert_is_idempotent_and_shares_identity() {
        let set = TargetSet::new();
        let (a, created_a) = set.insert(key("foo"), &FILE, DeclKind::Real);
        let (b, created_b) = set.insert(key("foo"), &FILE, DeclKind::Real);
        assert!(created_a);
        assert!(!created_b);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn distinct_keys_are_distinct_targets() {
        let set = TargetSet::new();
        let (a, _) = set.insert(key("foo"), &FILE, DeclKind::Real);
        let (b, _) = set.insert(key("bar"), &FILE, DeclKind::Real);
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn target_type_is_a_walks_base_chain() {
        assert!(FSDIR.is_a(&DIR));
        assert!(FSDIR.is_a(&FSDIR));
        assert!(!DIR.is_a(&FSDIR));
    }

    #[test]
    fn step_try_advance_is_exclusive() {
        let pad = ActionPad::default();
        assert!(pad.try_advance(Step::Untouched, Step::Touched));
        assert!(!pad.try_advance(Step::Untouched, Step::Touched));
        assert_eq!(pad.step(), Step::Touched);
    }

    #[tokio::test]
    async fn wait_past_resolves_once_published() {
        let pad = Arc::new(ActionPad::default());
        let pad2 = pad.clone();
        let waiter = tokio::spawn(async move {
            pad2.wait_past(Step::Applied).await;
        });
        tokio::task::yield_now().await;
        pad.publish(Step::Touched);
        pad.publish(Step::Matched);
        pad.publish(Step::Applied);
        waiter.await.unwrap();
    }
}
