use crate::context::{BoxedWork, PRIMARY, WorkFailure, WorkResult, WorkerGroup};
use crate::diagnostics::{DefaultDiagnostics, TimeoutContext, timeout_records};
use crate::{
    Cause, ConfigError, FailureKind, FailureRecord, Interrupted, Outcome, SetupError,
    TimeoutPolicy, WorkerContext,
};
use std::future::Future;
use std::panic::Location;
use std::time::{Duration, Instant};

/// Default name of the thread running the unit of work
pub const DEFAULT_WORKER_NAME: &str = "time-limited-work";

/// Watchdog that runs a unit of work against a wall-clock budget
///
/// Each call to [`run`](Self::run) spawns a fresh worker group; nothing is
/// shared between calls. When the budget expires the group is interrupted
/// (cooperatively) and, if the policy asks for it, given one more budget to
/// wind down before the thread still running is reported as stuck and
/// abandoned. Threads are never killed: a worker that ignores its
/// [`WorkerContext`] outlives the call.
#[derive(Debug, Clone)]
pub struct DeadlineGuard {
    worker_name: String,
}

impl Default for DeadlineGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl DeadlineGuard {
    pub fn new() -> Self {
        Self {
            worker_name: DEFAULT_WORKER_NAME.to_string(),
        }
    }

    /// Use a custom name for the primary worker thread
    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }

    /// Run `work` under `policy`
    ///
    /// Never panics and never returns an error: every failure, including
    /// setup problems, is reported through the returned [`Outcome`] in the
    /// order `[timeout records…, late work failure, stuck thread]`.
    #[track_caller]
    pub fn run<F>(&self, policy: &TimeoutPolicy, work: F) -> Outcome
    where
        F: FnOnce(&WorkerContext) -> anyhow::Result<()> + Send + 'static,
    {
        self.run_at(policy, Box::new(work), Location::caller())
    }

    /// Run `work` with a policy whose configuration may have failed to load
    ///
    /// A configuration error becomes a single setup failure and the work is
    /// not started.
    #[track_caller]
    pub fn run_configured<F>(&self, policy: Result<TimeoutPolicy, ConfigError>, work: F) -> Outcome
    where
        F: FnOnce(&WorkerContext) -> anyhow::Result<()> + Send + 'static,
    {
        match policy {
            Ok(policy) => self.run_at(&policy, Box::new(work), Location::caller()),
            Err(err) => setup_failure(SetupError::from(err)),
        }
    }

    /// Same protocol as [`run`](Self::run), waiting on the tokio blocking pool
    ///
    /// Must be awaited inside a tokio runtime.
    #[track_caller]
    pub fn run_async<F>(
        &self,
        policy: TimeoutPolicy,
        work: F,
    ) -> impl Future<Output = Outcome> + Send + use<F>
    where
        F: FnOnce(&WorkerContext) -> anyhow::Result<()> + Send + 'static,
    {
        let location = Location::caller();
        let guard = self.clone();
        async move {
            let task =
                tokio::task::spawn_blocking(move || guard.run_at(&policy, Box::new(work), location));
            match task.await {
                Ok(outcome) => outcome,
                Err(err) => setup_failure(SetupError::Runtime(err.to_string())),
            }
        }
    }

    fn run_at(
        &self,
        policy: &TimeoutPolicy,
        work: BoxedWork,
        location: &'static Location<'static>,
    ) -> Outcome {
        let budget = if policy.is_unbounded() {
            None
        } else {
            match policy.budget() {
                Some(budget) => Some(budget),
                None => {
                    return setup_failure(SetupError::UnrepresentableBudget {
                        duration: policy.duration(),
                        unit: policy.unit(),
                    });
                }
            }
        };

        let group = WorkerGroup::new();
        let started = Instant::now();
        if let Err(source) = group.spawn_primary(&self.worker_name, location, work) {
            return setup_failure(SetupError::Spawn {
                name: self.worker_name.clone(),
                source,
            });
        }

        let Some(budget) = budget else {
            let result = group.wait_primary(None);
            return Outcome::from_failures(result.and_then(work_failure).into_iter().collect());
        };

        let deadline = started.checked_add(budget);
        if let Some(result) = group.wait_primary(deadline) {
            tracing::debug!(
                thread = %self.worker_name,
                elapsed_ms = saturating_millis(started.elapsed()),
                "work finished within budget"
            );
            return Outcome::from_failures(work_failure(result).into_iter().collect());
        }

        // Capture frames first: the interrupt pops the active wait frame.
        let stack_trace = group
            .snapshot(PRIMARY)
            .map(|snapshot| snapshot.frames)
            .unwrap_or_default();
        group.interrupt();
        let elapsed = started.elapsed();
        tracing::warn!(
            thread = %self.worker_name,
            budget_ms = saturating_millis(budget),
            elapsed_ms = saturating_millis(elapsed),
            "deadline expired, interrupting worker"
        );

        let mut failures = self.timeout_failures(policy, elapsed, stack_trace);

        if !policy.look_for_stuck_thread() {
            failures.extend(group.try_take_primary().and_then(late_failure));
            return Outcome::Failed(failures);
        }

        let settled = group.wait_all_finished(Instant::now().checked_add(budget));
        failures.extend(group.try_take_primary().and_then(late_failure));
        if !settled && let Some(stuck) = group.pick_stuck() {
            tracing::warn!(
                thread = %stuck.name,
                grace_ms = saturating_millis(budget),
                "worker did not stop after interrupt, abandoning it"
            );
            failures.push(stuck_thread_failure(&stuck.name, stuck.frames));
        }

        Outcome::Failed(failures)
    }

    fn timeout_failures(
        &self,
        policy: &TimeoutPolicy,
        elapsed: Duration,
        stack_trace: Vec<crate::Frame>,
    ) -> Vec<FailureRecord> {
        let default = FailureRecord::new(
            FailureKind::Timeout,
            format!("test timed out after {} {}", policy.duration(), policy.unit()),
        )
        .with_stack_trace(stack_trace.clone());

        let ctx = TimeoutContext {
            thread_name: &self.worker_name,
            policy,
            elapsed,
            stack_trace: &stack_trace,
        };
        match policy.diagnostics() {
            Some(hook) => timeout_records(hook.as_ref(), &ctx, default),
            None => timeout_records(&DefaultDiagnostics, &ctx, default),
        }
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn setup_failure(err: SetupError) -> Outcome {
    tracing::warn!(error = %err, "guarded run could not be set up");
    Outcome::Failed(vec![FailureRecord::setup(&err)])
}

fn work_failure(result: WorkResult) -> Option<FailureRecord> {
    match result {
        Ok(()) => None,
        Err(WorkFailure::Error(err)) => Some(FailureRecord::work(&err)),
        Err(WorkFailure::Panic(message)) => Some(
            FailureRecord::new(FailureKind::Work, format!("worker panicked: {}", message))
                .with_cause(Cause::new(message)),
        ),
    }
}

/// Failure the worker produced after its deadline
///
/// A bare `Interrupted` is the expected reaction to cancellation and is not
/// reported again.
fn late_failure(result: WorkResult) -> Option<FailureRecord> {
    match result {
        Err(WorkFailure::Error(err)) if err.downcast_ref::<Interrupted>().is_some() => None,
        other => work_failure(other),
    }
}

fn stuck_thread_failure(name: &str, frames: Vec<crate::Frame>) -> FailureRecord {
    FailureRecord::new(
        FailureKind::StuckThread,
        format!("Appears to be stuck in thread {}", name),
    )
    .with_stack_trace(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TimeUnit;
    use tracing_test::traced_test;

    #[test]
    fn success_within_budget() {
        let outcome = DeadlineGuard::new().run(&TimeoutPolicy::seconds(5), |_| Ok(()));
        assert_eq!(outcome, Outcome::Success);
    }

    #[test]
    fn work_error_within_budget_is_single_record() {
        let outcome = DeadlineGuard::new().run(&TimeoutPolicy::seconds(5), |_| {
            anyhow::bail!("assertion failed: left == right")
        });
        let failures = outcome.into_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, FailureKind::Work);
        assert_eq!(failures[0].message, "assertion failed: left == right");
    }

    #[test]
    fn panic_is_reported_as_work_failure() {
        let outcome = DeadlineGuard::new().run(&TimeoutPolicy::seconds(5), |_| {
            panic!("index out of bounds")
        });
        let failures = outcome.into_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].message, "worker panicked: index out of bounds");
    }

    #[test]
    fn log_millis_saturate() {
        assert_eq!(saturating_millis(Duration::from_millis(1_500)), 1_500);
        assert_eq!(saturating_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn unrepresentable_budget_is_setup_failure() {
        let policy = TimeoutPolicy::new(u64::MAX, TimeUnit::Days);
        let outcome = DeadlineGuard::new().run(&policy, |_| Ok(()));
        let failures = outcome.into_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, FailureKind::Setup);
        assert!(failures[0].message.contains("cannot be represented"));
    }

    #[test]
    fn config_error_is_setup_failure() {
        let err = ConfigError::InvalidStrategy {
            key: crate::GLOBAL_TIMEOUT_STRATEGY_ENV,
            value: "maybe".to_string(),
        };
        let outcome = DeadlineGuard::new().run_configured(Err(err), |_| {
            panic!("work must not run on a setup failure")
        });
        let failures = outcome.into_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, FailureKind::Setup);
        assert!(failures[0].message.contains("maybe"));
    }

    #[test]
    fn timeout_record_carries_primary_frames() {
        let outcome = DeadlineGuard::new().run(&TimeoutPolicy::millis(50), |ctx| {
            let _phase = ctx.enter("waiting for server");
            loop {
                ctx.sleep(Duration::from_millis(10))?;
            }
        });
        let failures = outcome.into_failures();
        assert_eq!(failures.len(), 1);
        let labels: Vec<_> = failures[0]
            .stack_trace
            .iter()
            .map(|f| f.label.as_str())
            .collect();
        assert!(labels.ends_with(&["waiting for server", "guarded work"]), "got {:?}", labels);
        assert!(failures[0].stack_trace.last().is_some_and(|f| f.file.ends_with("guard.rs")));
    }

    #[test]
    fn custom_worker_name_is_reported() {
        let guard = DeadlineGuard::new().with_worker_name("it-login-flow");
        let policy = TimeoutPolicy::millis(50).looking_for_stuck_thread(true);
        let outcome = guard.run(&policy, |_| {
            let until = Instant::now() + Duration::from_millis(400);
            while Instant::now() < until {
                std::hint::spin_loop();
            }
            Ok(())
        });
        let failures = outcome.into_failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[1].message, "Appears to be stuck in thread it-login-flow");
    }

    #[test]
    fn late_non_interrupt_failure_is_appended() {
        let policy = TimeoutPolicy::millis(50).looking_for_stuck_thread(true);
        let outcome = DeadlineGuard::new().run(&policy, |ctx| {
            if ctx.sleep(Duration::from_secs(60)).is_err() {
                anyhow::bail!("connection pool left in a bad state");
            }
            Ok(())
        });
        let failures = outcome.into_failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].kind, FailureKind::Timeout);
        assert_eq!(failures[1].kind, FailureKind::Work);
        assert_eq!(failures[1].message, "connection pool left in a bad state");
    }

    #[test]
    fn interrupted_result_is_not_reported_twice() {
        let policy = TimeoutPolicy::millis(50).looking_for_stuck_thread(true);
        let outcome = DeadlineGuard::new().run(&policy, |ctx| {
            ctx.sleep(Duration::from_secs(60))?;
            Ok(())
        });
        let failures = outcome.into_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, FailureKind::Timeout);
    }

    #[test]
    #[traced_test]
    fn expiry_is_logged() {
        let _ = DeadlineGuard::new().run(&TimeoutPolicy::millis(20), |ctx| {
            ctx.sleep(Duration::from_secs(60))?;
            Ok(())
        });
        assert!(logs_contain("deadline expired, interrupting worker"));
    }

    #[tokio::test]
    async fn run_async_reports_timeout() {
        let outcome = DeadlineGuard::new()
            .run_async(TimeoutPolicy::millis(50), |ctx| loop {
                ctx.sleep(Duration::from_millis(5))?;
            })
            .await;
        let failures = outcome.into_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].message, "test timed out after 50 milliseconds");
    }

    #[tokio::test]
    async fn run_async_success() {
        let outcome = DeadlineGuard::new()
            .run_async(TimeoutPolicy::seconds(5), |_| Ok(()))
            .await;
        assert!(outcome.is_success());
    }
}
