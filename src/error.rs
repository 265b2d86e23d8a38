use thiserror::Error;

/// Why an acquisition failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum PoolError {
    /// the pool is shutting down and no longer hands out objects
    #[error("the pool is shutting down")]
    Shutdown,
    /// no idle object was available and a new one could not be made
    #[error("failed to allocate a new pooled object")]
    AllocationFailed,
}

/// A failure reported by a user hook. The pool logs these, it never
/// propagates them out of `release`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HookError(String);

impl HookError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}
