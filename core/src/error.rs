//! Session-level errors

use crate::config::ConfigError;
use crate::emulator::CoreFault;
use crate::shared::SessionStatus;
use crate::snapshot::SnapshotError;

/// Errors surfaced by [`BridgeSession`](crate::BridgeSession) operations
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The core failed while stepping; the session is now faulted
    #[error(transparent)]
    CoreFault(#[from] CoreFault),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// The clock worker did not reach a safe point in time
    #[error("timed out waiting for the clock worker to pause")]
    PauseTimeout,

    #[error("session is not running (status: {0:?})")]
    SessionNotRunning(SessionStatus),

    #[error("failed to spawn clock worker: {0}")]
    Spawn(#[source] std::io::Error),
}
