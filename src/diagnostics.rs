//! Extension point for building timeout failures
//!
//! When a budget expires the guard builds a default timeout record and hands
//! it to the policy's [`TimeoutDiagnostics`]. Whatever the hook returns takes
//! the place of that single record in the final outcome, so a hook can wrap,
//! replace, or augment it with environment-specific context.
//!
//! ```ignore
//! let policy = TimeoutPolicy::builder()
//!     .with_timeout(100, TimeUnit::Milliseconds)
//!     .with_diagnostics(Arc::new(ci_context))
//!     .build();
//!
//! fn ci_context(ctx: &TimeoutContext<'_>, default: FailureRecord) -> Vec<FailureRecord> {
//!     let extra = FailureRecord::new(
//!         FailureKind::Diagnostic,
//!         format!("[ci] {} exceeded its budget", ctx.thread_name()),
//!     );
//!     vec![default, extra]
//! }
//! ```

use crate::error::panic_message;
use crate::{FailureKind, FailureRecord, Frame, TimeoutPolicy};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// What the guard knows about a worker at the moment its budget expired
#[derive(Debug)]
pub struct TimeoutContext<'a> {
    pub(crate) thread_name: &'a str,
    pub(crate) policy: &'a TimeoutPolicy,
    pub(crate) elapsed: Duration,
    pub(crate) stack_trace: &'a [Frame],
}

impl<'a> TimeoutContext<'a> {
    /// Name of the primary worker thread
    pub fn thread_name(&self) -> &'a str {
        self.thread_name
    }

    pub fn policy(&self) -> &'a TimeoutPolicy {
        self.policy
    }

    /// Wall-clock time between spawning the worker and detecting expiry
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Frames of the primary worker captured at expiry, innermost first
    pub fn stack_trace(&self) -> &'a [Frame] {
        self.stack_trace
    }
}

/// Builds the failure records reported when a budget expires
///
/// The default implementation returns the standard record unchanged.
/// Returning an empty list is treated as "keep the default" so a timeout is
/// never dropped from the outcome.
pub trait TimeoutDiagnostics: Send + Sync {
    fn on_timeout(&self, _ctx: &TimeoutContext<'_>, default: FailureRecord) -> Vec<FailureRecord> {
        vec![default]
    }
}

impl<F> TimeoutDiagnostics for F
where
    F: Fn(&TimeoutContext<'_>, FailureRecord) -> Vec<FailureRecord> + Send + Sync,
{
    fn on_timeout(&self, ctx: &TimeoutContext<'_>, default: FailureRecord) -> Vec<FailureRecord> {
        self(ctx, default)
    }
}

/// Arc wrapper for TimeoutDiagnostics trait object
pub type DiagnosticsHandle = Arc<dyn TimeoutDiagnostics>;

/// Hook that keeps the standard timeout record as-is
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDiagnostics;

impl TimeoutDiagnostics for DefaultDiagnostics {}

/// Run the hook and enforce the non-empty rule
///
/// A panicking hook keeps the default record, followed by a diagnostic
/// record carrying the panic message.
pub(crate) fn timeout_records(
    hook: &dyn TimeoutDiagnostics,
    ctx: &TimeoutContext<'_>,
    default: FailureRecord,
) -> Vec<FailureRecord> {
    let result = panic::catch_unwind(AssertUnwindSafe(|| hook.on_timeout(ctx, default.clone())));
    let records = match result {
        Ok(records) => records,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!(
                thread = ctx.thread_name,
                panic = %message,
                "timeout diagnostics panicked"
            );
            let note = FailureRecord::new(
                FailureKind::Diagnostic,
                format!("timeout diagnostics panicked: {}", message),
            );
            return vec![default, note];
        }
    };
    if records.is_empty() {
        tracing::debug!(
            thread = ctx.thread_name,
            "timeout diagnostics returned no records, keeping default"
        );
        vec![default]
    } else {
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TimeUnit;

    fn context<'a>(policy: &'a TimeoutPolicy, frames: &'a [Frame]) -> TimeoutContext<'a> {
        TimeoutContext {
            thread_name: "time-limited-work",
            policy,
            elapsed: Duration::from_millis(101),
            stack_trace: frames,
        }
    }

    #[test]
    fn default_hook_passes_record_through() {
        let policy = TimeoutPolicy::millis(100);
        let ctx = context(&policy, &[]);
        let default = FailureRecord::new(FailureKind::Timeout, "test timed out after 100 milliseconds");
        let records = timeout_records(&DefaultDiagnostics, &ctx, default.clone());
        assert_eq!(records, vec![default]);
    }

    fn budget_note(ctx: &TimeoutContext<'_>, default: FailureRecord) -> Vec<FailureRecord> {
        let note = format!(
            "{} ran for {} ms of {} {}",
            ctx.thread_name(),
            ctx.elapsed().as_millis(),
            ctx.policy().duration(),
            ctx.policy().unit()
        );
        vec![default, FailureRecord::new(FailureKind::Diagnostic, note)]
    }

    fn drop_everything(_: &TimeoutContext<'_>, _: FailureRecord) -> Vec<FailureRecord> {
        Vec::new()
    }

    fn exploding(_: &TimeoutContext<'_>, _: FailureRecord) -> Vec<FailureRecord> {
        panic!("hook blew up")
    }

    #[test]
    fn panicking_hook_keeps_default() {
        let policy = TimeoutPolicy::millis(30);
        let ctx = context(&policy, &[]);
        let default = FailureRecord::new(FailureKind::Timeout, "test timed out after 30 milliseconds");
        let records = timeout_records(&exploding, &ctx, default.clone());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], default);
        assert_eq!(records[1].kind, FailureKind::Diagnostic);
        assert_eq!(records[1].message, "timeout diagnostics panicked: hook blew up");
    }

    #[test]
    fn fn_hook_sees_context() {
        let policy = TimeoutPolicy::new(2, TimeUnit::Seconds);
        let ctx = context(&policy, &[]);
        let default = FailureRecord::new(FailureKind::Timeout, "timed out");
        let records = timeout_records(&budget_note, &ctx, default);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].message, "time-limited-work ran for 101 ms of 2 seconds");
    }

    #[test]
    fn empty_hook_result_keeps_default() {
        let policy = TimeoutPolicy::millis(10);
        let ctx = context(&policy, &[]);
        let default = FailureRecord::new(FailureKind::Timeout, "timed out");
        assert_eq!(
            timeout_records(&drop_everything, &ctx, default.clone()),
            vec![default]
        );
    }
}
