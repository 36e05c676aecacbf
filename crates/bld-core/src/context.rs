//! The [`Context`]: the one mutable-global-state object every API in this
//! crate threads through instead of reaching for process statics
//! (spec.md §9's redesign note; grounded on `libbuild2/context.hxx`'s
//! `context` class and `run_phase`/`phase_lock`).

use std::sync::Arc;

use bld_schema::variable::VariablePool;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::scope::ScopeMap;
use crate::target::TargetSet;

/// Which of the three run phases the build is currently in (spec.md §2
/// "Run-phase state machine").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// Buildfiles are being read and the scope/target/variable graph is
    /// being built up. Single-threaded by construction (nothing has
    /// spawned scheduler tasks yet).
    Load,
    /// Rules are being matched against targets. Multi-threaded; many
    /// tasks may be traversing the (now load-complete) graph
    /// concurrently, but none may mutate scope variable maps.
    Match,
    /// Recipes are running. Multi-threaded, same invariant as `Match`.
    Execute,
}

/// The global phase-transition guard (spec.md §2: "guarded by a
/// reader/writer phase lock with an explicit phase-switch API").
///
/// `Load` holds the lock's writer side exclusively for as long as loading
/// is in progress; `Match` and `Execute` share the reader side, so any
/// number of scheduler tasks can hold a `Match`/`Execute` guard
/// concurrently. A rule that needs to go back to `Load` briefly mid-match
/// (to parse a dynamically-discovered dependency, e.g. a generated
/// header) calls [`PhaseLock::switch_to_load`], which blocks until every
/// outstanding reader guard has dropped, then hands back an exclusive
/// guard; dropping that guard (or calling
/// [`LoadGuard::switch_back`]) releases the lock for readers again.
pub struct PhaseLock {
    lock: RwLock<()>,
    phase: std::sync::atomic::AtomicU8,
}

/// Held while the build is in the load phase. Exclusive: no `Match`/
/// `Execute` guard can be outstanding while this exists.
pub struct LoadGuard<'a> {
    _guard: RwLockWriteGuard<'a, ()>,
}

impl LoadGuard<'_> {
    /// Confirm load is complete and the lock may be handed to readers.
    pub fn finish(self) {
        drop(self);
    }
}

/// Held by one worker task while it is in the match or execute phase.
/// Shared: many of these can be outstanding at once.
pub struct RunGuard<'a> {
    _guard: RwLockReadGuard<'a, ()>,
    phase: RunPhase,
}

impl RunGuard<'_> {
    /// The phase this guard was acquired for.
    pub fn phase(&self) -> RunPhase {
        self.phase
    }
}

impl PhaseLock {
    /// Start in the load phase (every build begins by loading buildfiles).
    pub fn new() -> Self {
        Self {
            lock: RwLock::new(()),
            phase: std::sync::atomic::AtomicU8::new(RunPhase::Load as u8),
        }
    }

    /// Acquire the exclusive load-phase guard. Blocks until all
    /// outstanding `Match`/`Execute` readers have released.
    pub async fn switch_to_load(&self) -> LoadGuard<'_> {
        let guard = self.lock.write().await;
        self.phase.store(RunPhase::Load as u8, std::sync::atomic::Ordering::Release);
        LoadGuard { _guard: guard }
    }

    /// Acquire a shared match-phase guard. Blocks until any outstanding
    /// load-phase writer has released.
    pub async fn enter_match(&self) -> RunGuard<'_> {
        let guard = self.lock.read().await;
        self.phase.store(RunPhase::Match as u8, std::sync::atomic::Ordering::Release);
        RunGuard { _guard: guard, phase: RunPhase::Match }
    }

    /// Acquire a shared execute-phase guard. Blocks until any outstanding
    /// load-phase writer has released.
    pub async fn enter_execute(&self) -> RunGuard<'_> {
        let guard = self.lock.read().await;
        self.phase.store(RunPhase::Execute as u8, std::sync::atomic::Ordering::Release);
        RunGuard { _guard: guard, phase: RunPhase::Execute }
    }

    /// The phase as of this call (racy by construction — only meaningful
    /// for diagnostics, never for correctness decisions: concurrent
    /// `Match`/`Execute` readers stomp on the same marker).
    pub fn current(&self) -> RunPhase {
        match self.phase.load(std::sync::atomic::Ordering::Acquire) {
            0 => RunPhase::Load,
            1 => RunPhase::Match,
            _ => RunPhase::Execute,
        }
    }
}

impl Default for PhaseLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Build-wide concurrency knobs (spec.md §4.8 "Scheduler").
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Maximum number of recipes allowed to run concurrently. Defaults to
    /// the host's logical CPU count.
    pub max_jobs: usize,
    /// Maximum number of tasks the scheduler will keep suspended in a
    /// nested wait (spec.md §4.8 "Nested waits") before it starts denying
    /// new work and forcing callers to busy-poll instead — a backstop
    /// against unbounded task-stack growth on deeply diamond-shaped
    /// dependency graphs.
    pub max_nested_waits: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_jobs: num_cpus::get().max(1),
            max_nested_waits: 4096,
        }
    }
}

/// The engine's single mutable-global-state object: every load/match/
/// execute entry point takes `&Context` (or, while holding a
/// [`LoadGuard`], effectively exclusive access to the load-phase-only
/// fields). Never put behind a second layer of sharing — `Arc<Context>` is
/// how this is passed to scheduler tasks, since recipes (spec.md §3
/// "Recipe") run on the tokio runtime and must own a strong reference
/// across an `.await`.
pub struct Context {
    /// The interned variable-name pool.
    pub var_pool: std::sync::RwLock<VariablePool>,
    /// The scope tree.
    pub scope_map: ScopeMap,
    /// The interned target set.
    pub target_set: TargetSet,
    /// The load/match/execute phase guard.
    pub phase: PhaseLock,
    /// Scheduler tuning.
    pub scheduler_config: SchedulerConfig,
    /// The absolute path `bld` was invoked from (used to resolve relative
    /// buildspec targets and relative `--file` options).
    pub work_dir: bld_schema::path::DirPath,
}

impl Context {
    /// Build a fresh context rooted at `work_dir`.
    pub fn new(work_dir: bld_schema::path::DirPath) -> Arc<Self> {
        let ctx = Arc::new(Self {
            var_pool: std::sync::RwLock::new(VariablePool::new()),
            scope_map: ScopeMap::new(),
            target_set: TargetSet::new(),
            phase: PhaseLock::new(),
            scheduler_config: SchedulerConfig::default(),
            work_dir,
        });
        ctx.scope_map.global_root();
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_guard_excludes_run_guards() {
        let lock = PhaseLock::new();
        let load = lock.switch_to_load().await;
        load.finish();

        let r1 = lock.enter_match().await;
        let r2 = lock.enter_execute().await;
        assert_eq!(r1.phase(), RunPhase::Match);
        assert_eq!(r2.phase(), RunPhase::Execute);
    }

    #[test]
    fn context_new_registers_global_scope() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ctx = Context::new(bld_schema::path::DirPath::new("/tmp/work"));
            let root = ctx.scope_map.find(&bld_schema::path::DirPath::new("/tmp/work/a/b"));
            assert!(root.out_dir.is_empty());
        });
    }
}
