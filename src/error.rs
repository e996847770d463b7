use crate::TimeUnit;

/// Malformed global override configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be a non-negative integer number of milliseconds, got {value:?}")]
    InvalidThreshold { key: &'static str, value: String },

    #[error("{key} must be one of override_if_shorter, never_override; got {value:?}")]
    InvalidStrategy { key: &'static str, value: String },
}

/// Reasons a guarded run could not be started
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("timeout of {duration} {unit} cannot be represented as a wait")]
    UnrepresentableBudget { duration: u64, unit: TimeUnit },

    #[error("failed to spawn worker thread {name:?}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("guard task failed: {0}")]
    Runtime(String),
}

/// Returned by interruptible waits once the worker group has been cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("worker was interrupted")]
pub struct Interrupted;

/// A joined secondary worker panicked
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("worker thread {name:?} panicked: {message}")]
pub struct WorkerPanicked {
    pub name: String,
    pub message: String,
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
