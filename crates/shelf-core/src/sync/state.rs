//! Sync engine states
//!
//! The engine moves through a fixed cycle and always lands back on `Idle`;
//! observers watch the current state over a `tokio::sync::watch` channel.

use serde::{Deserialize, Serialize};

/// Observable state of the sync engine
///
/// Transitions: `Idle -> Pushing -> Pulling -> Reconciling -> Idle`.
/// A retryable failure passes through `Failed` before returning to `Idle`;
/// an authentication failure parks the engine in `Suspended` until
/// `resume()` is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "state")]
pub enum SyncState {
    /// Nothing in flight
    Idle,
    /// Sending local changes to the remote
    Pushing,
    /// Fetching remote changes
    Pulling,
    /// Applying fetched changes with conflict resolution
    Reconciling,
    /// A retryable error occurred; `attempt` counts consecutive failures
    Failed { attempt: u32 },
    /// Credentials rejected; no further cycles until resumed
    Suspended,
}

impl SyncState {
    /// Whether a new sync cycle may start from this state
    pub fn can_start(&self) -> bool {
        matches!(self, SyncState::Idle | SyncState::Failed { .. })
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Idle => write!(f, "idle"),
            SyncState::Pushing => write!(f, "pushing"),
            SyncState::Pulling => write!(f, "pulling"),
            SyncState::Reconciling => write!(f, "reconciling"),
            SyncState::Failed { attempt } => write!(f, "failed (attempt {attempt})"),
            SyncState::Suspended => write!(f, "suspended"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_start() {
        assert!(SyncState::Idle.can_start());
        assert!(SyncState::Failed { attempt: 3 }.can_start());
        assert!(!SyncState::Pushing.can_start());
        assert!(!SyncState::Suspended.can_start());
    }

    #[test]
    fn test_display() {
        assert_eq!(SyncState::Idle.to_string(), "idle");
        assert_eq!(
            SyncState::Failed { attempt: 2 }.to_string(),
            "failed (attempt 2)"
        );
    }
}
