//! The task scheduler (spec.md §4.8 "Scheduler").
//!
//! Recipes run as tokio tasks rather than OS threads, so "waiting for a
//! prerequisite" is a cooperative `.await` on a prerequisite's
//! [`crate::target::ActionPad::wait_past`] rather than a blocked thread —
//! this is spec.md §9's "replace condition-variable busy-waiting with an
//! async task model" redesign note. A [`tokio::sync::Semaphore`] caps how
//! many recipes run concurrently (`Context::scheduler_config.max_jobs`),
//! which is the direct analogue of the original's thread-pool job count.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::context::Context;
use crate::rule::RuleError;
use crate::target::Outcome;

/// Tracks how many tasks are currently suspended waiting on another
/// target's pad (spec.md §4.8 "Nested waits"), so the scheduler can warn
/// (or, past `max_nested_waits`, refuse new work) rather than let an
/// unexpectedly deep diamond dependency graph grow the task stack without
/// bound.
pub struct Scheduler {
    jobs: Arc<Semaphore>,
    nested_waits: AtomicUsize,
    max_nested_waits: usize,
}

/// Error a scheduled unit of work can fail with.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// The recipe itself failed.
    #[error(transparent)]
    Rule(#[from] RuleError),
    /// The task panicked or was cancelled.
    #[error("task join error: {0}")]
    Join(String),
    /// The nested-wait backstop was hit (spec.md §4.8).
    #[error("too many nested waits ({0}); the dependency graph may have an unexpectedly deep diamond")]
    TooManyNestedWaits(usize),
}

impl Scheduler {
    /// Build a scheduler with `max_jobs` concurrent recipe slots.
    pub fn new(max_jobs: usize, max_nested_waits: usize) -> Self {
        Self {
            jobs: Arc::new(Semaphore::new(max_jobs.max(1))),
            nested_waits: AtomicUsize::new(0),
            max_nested_waits,
        }
    }

    /// Build a scheduler from a context's configured tuning.
    pub fn from_context(ctx: &Context) -> Self {
        Self::new(ctx.scheduler_config.max_jobs, ctx.scheduler_config.max_nested_waits)
    }

    /// Register that the calling task is about to suspend waiting on
    /// another target (spec.md §4.8 "Nested waits"). Returns a guard that
    /// decrements the counter on drop.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::TooManyNestedWaits`] if the configured
    /// limit would be exceeded.
    pub fn enter_nested_wait(&self) -> Result<NestedWaitGuard<'_>, ScheduleError> {
        let prev = self.nested_waits.fetch_add(1, Ordering::AcqRel);
        if prev + 1 > self.max_nested_waits {
            self.nested_waits.fetch_sub(1, Ordering::AcqRel);
            return Err(ScheduleError::TooManyNestedWaits(prev + 1));
        }
        Ok(NestedWaitGuard { scheduler: self })
    }

    /// Run `recipe` under a job-count permit, blocking (cooperatively)
    /// until one is free. This is the single place recipe execution
    /// passes through, so `max_jobs` is enforced uniformly regardless of
    /// how deep in the dependency graph a target sits.
    ///
    /// # Errors
    ///
    /// Propagates the recipe's own error, or [`ScheduleError::Join`] if
    /// the spawned task panicked.
    pub async fn run_recipe<F>(&self, fut: F) -> Result<Outcome, ScheduleError>
    where
        F: std::future::Future<Output = Result<Outcome, RuleError>> + Send + 'static,
    {
        let permit = self.jobs.clone().acquire_owned().await.expect("semaphore never closed");
        let handle = tokio::spawn(async move {
            let result = fut.await;
            drop(permit);
            result
        });
        match handle.await {
            Ok(Ok(state)) => Ok(state),
            Ok(Err(e)) => Err(ScheduleError::Rule(e)),
            Err(join_err) => Err(ScheduleError::Join(join_err.to_string())),
        }
    }

    /// Current number of free job slots (diagnostics/tests only).
    pub fn available_permits(&self) -> usize {
        self.jobs.available_permits()
    }
}

/// RAII guard returned by [`Scheduler::enter_nested_wait`].
pub struct NestedWaitGuard<'a> {
    scheduler: &'a Scheduler,
}

impl Drop for NestedWaitGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.nested_waits.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_recipe_respects_job_limit() {
        let sched = Scheduler::new(1, 16);
        assert_eq!(sched.available_permits(), 1);
        let result = sched
            .run_recipe(async { Ok(Outcome::Changed) })
            .await
            .unwrap();
        assert_eq!(result, Outcome::Changed);
        assert_eq!(sched.available_permits(), 1);
    }

    #[test]
    fn nested_wait_guard_decrements_on_drop() {
        let sched = Scheduler::new(4, 1);
        let guard = sched.enter_nested_wait().unwrap();
        assert!(sched.enter_nested_wait().is_err());
        drop(guard);
        assert!(sched.enter_nested_wait().is_ok());
    }
}
