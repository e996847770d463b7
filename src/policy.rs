use crate::diagnostics::DiagnosticsHandle;
use crate::{GlobalOverride, OverrideStrategy, TimeUnit};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Timeout configuration for one guarded run
///
/// Immutable once built. A `duration` of 0 disables the deadline: the work
/// still runs on its own worker but is never cancelled for time.
#[derive(Clone, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    duration: u64,
    unit: TimeUnit,
    #[serde(default)]
    look_for_stuck_thread: bool,
    #[serde(skip)]
    diagnostics: Option<DiagnosticsHandle>,
}

impl TimeoutPolicy {
    pub fn new(duration: u64, unit: TimeUnit) -> Self {
        Self {
            duration,
            unit,
            look_for_stuck_thread: false,
            diagnostics: None,
        }
    }

    pub fn millis(millis: u64) -> Self {
        Self::new(millis, TimeUnit::Milliseconds)
    }

    pub fn seconds(seconds: u64) -> Self {
        Self::new(seconds, TimeUnit::Seconds)
    }

    /// Policy with no deadline
    pub fn unbounded() -> Self {
        Self::new(0, TimeUnit::Seconds)
    }

    pub fn builder() -> TimeoutPolicyBuilder {
        TimeoutPolicyBuilder::default()
    }

    /// Policy taken from the global threshold, for work without a local timeout
    ///
    /// Returns `None` when no global threshold is set.
    pub fn from_global(global: &GlobalOverride) -> Option<Self> {
        (global.threshold_millis > 0).then(|| Self::millis(global.threshold_millis))
    }

    /// Copy of this policy with stuck-thread lookup switched on or off
    pub fn looking_for_stuck_thread(&self, enable: bool) -> Self {
        Self {
            look_for_stuck_thread: enable,
            ..self.clone()
        }
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    pub fn look_for_stuck_thread(&self) -> bool {
        self.look_for_stuck_thread
    }

    pub fn diagnostics(&self) -> Option<&DiagnosticsHandle> {
        self.diagnostics.as_ref()
    }

    /// Returns true if the deadline is disabled
    pub fn is_unbounded(&self) -> bool {
        self.duration == 0
    }

    /// Budget in nanoseconds, lossless for every unit
    pub fn budget_nanos(&self) -> u128 {
        self.unit.to_nanos(self.duration)
    }

    /// Budget in milliseconds, truncating sub-millisecond remainders
    pub fn budget_millis(&self) -> u128 {
        self.unit.to_millis(self.duration)
    }

    /// Budget as a concrete wait, if it fits a `Duration`
    pub fn budget(&self) -> Option<Duration> {
        self.unit.to_duration(self.duration)
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl PartialEq for TimeoutPolicy {
    fn eq(&self, other: &Self) -> bool {
        let same_hook = match (&self.diagnostics, &other.diagnostics) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        self.duration == other.duration
            && self.unit == other.unit
            && self.look_for_stuck_thread == other.look_for_stuck_thread
            && same_hook
    }
}

impl std::fmt::Debug for TimeoutPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutPolicy")
            .field("duration", &self.duration)
            .field("unit", &self.unit)
            .field("look_for_stuck_thread", &self.look_for_stuck_thread)
            .field("diagnostics", &self.diagnostics.is_some())
            .finish()
    }
}

/// Mutable builder for [`TimeoutPolicy`]
///
/// Defaults: no timeout (0 seconds), stuck-thread lookup off, default diagnostics.
#[derive(Clone)]
pub struct TimeoutPolicyBuilder {
    duration: u64,
    unit: TimeUnit,
    look_for_stuck_thread: bool,
    diagnostics: Option<DiagnosticsHandle>,
}

impl Default for TimeoutPolicyBuilder {
    fn default() -> Self {
        Self {
            duration: 0,
            unit: TimeUnit::Seconds,
            look_for_stuck_thread: false,
            diagnostics: None,
        }
    }
}

impl TimeoutPolicyBuilder {
    pub fn with_timeout(&mut self, duration: u64, unit: TimeUnit) -> &mut Self {
        self.duration = duration;
        self.unit = unit;
        self
    }

    pub fn with_looking_for_stuck_thread(&mut self, enable: bool) -> &mut Self {
        self.look_for_stuck_thread = enable;
        self
    }

    pub fn with_diagnostics(&mut self, hook: DiagnosticsHandle) -> &mut Self {
        self.diagnostics = Some(hook);
        self
    }

    /// Snapshot the current settings; later changes to the builder do not leak in
    pub fn build(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            duration: self.duration,
            unit: self.unit,
            look_for_stuck_thread: self.look_for_stuck_thread,
            diagnostics: self.diagnostics.clone(),
        }
    }
}

/// Apply the global override to a policy
///
/// Pure: the input policy is never modified. The global threshold replaces
/// the local duration only when it is set, the strategy allows it, and it is
/// strictly shorter than the local budget truncated to milliseconds.
pub fn resolve_against_global(policy: &TimeoutPolicy, global: &GlobalOverride) -> TimeoutPolicy {
    let threshold = global.threshold_millis;
    let shorter = u128::from(threshold) < policy.budget_millis();
    match global.strategy {
        OverrideStrategy::OverrideIfShorter if threshold > 0 && shorter => TimeoutPolicy {
            duration: threshold,
            unit: TimeUnit::Milliseconds,
            ..policy.clone()
        },
        _ => policy.clone(),
    }
}
