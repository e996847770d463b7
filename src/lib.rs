//! Deadline enforcement for test bodies
//!
//! This crate runs a unit of work on its own worker thread, races it against
//! a wall-clock budget, and turns an overrun into structured, ordered
//! failure records (timeout, late work failure, stuck thread) instead of a
//! hung test run.
//!
//! ```ignore
//! use deadline_guard::{DeadlineGuard, GlobalOverride, TimeoutPolicy, resolve_against_global};
//! use std::time::Duration;
//!
//! let policy = TimeoutPolicy::millis(100).looking_for_stuck_thread(true);
//! let policy = resolve_against_global(&policy, &GlobalOverride::from_env()?);
//!
//! let outcome = DeadlineGuard::new().run(&policy, |ctx| {
//!     loop {
//!         ctx.sleep(Duration::from_millis(10))?;
//!     }
//! });
//! for failure in outcome.failures() {
//!     eprintln!("{}", failure.render());
//! }
//! ```
//!
//! Cancellation is cooperative: a worker that never checks its
//! [`WorkerContext`] cannot be stopped and is abandoned once diagnosed.

mod context;
mod diagnostics;
mod error;
mod failure;
mod global;
mod guard;
mod policy;
mod unit;

pub use context::{FrameGuard, SpawnedWorker, WorkerContext};
pub use diagnostics::{DefaultDiagnostics, DiagnosticsHandle, TimeoutContext, TimeoutDiagnostics};
pub use error::{ConfigError, Interrupted, SetupError, WorkerPanicked};
pub use failure::{Cause, FailureKind, FailureRecord, Frame, Outcome};
pub use global::{
    GLOBAL_TIMEOUT_MILLIS_ENV, GLOBAL_TIMEOUT_STRATEGY_ENV, GlobalOverride, OverrideStrategy,
};
pub use guard::{DEFAULT_WORKER_NAME, DeadlineGuard};
pub use policy::{TimeoutPolicy, TimeoutPolicyBuilder, resolve_against_global};
pub use unit::TimeUnit;
