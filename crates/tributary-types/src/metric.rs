//! Stage metrics.
//!
//! Each pipeline stage keeps live counters and, on request, returns a
//! [`StageSnapshot`]. Snapshots are plain data: the CLI prints them as a run
//! summary and tests compare them directly.

use serde::{Deserialize, Serialize};

/// Role a stage plays in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Input,
    Transform,
    Batcher,
    Output,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Input => "input",
            Self::Transform => "transform",
            Self::Batcher => "batcher",
            Self::Output => "output",
        };
        f.write_str(s)
    }
}

/// Point-in-time copy of a stage's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSnapshot {
    /// Batches taken in (read from an adapter or received on a channel).
    pub received: u64,
    /// Parts taken in.
    pub parts_received: u64,
    /// Batches handed on (emitted downstream or written to an adapter).
    pub sent: u64,
    /// Parts handed on.
    pub parts_sent: u64,
    /// Failed reads, writes or transform steps.
    pub errors: u64,
    /// Transactions resolved successfully.
    pub acked: u64,
    /// Transactions resolved with a failure or partial failure.
    pub ack_errors: u64,
    pub connection_up: u64,
    pub connection_failed: u64,
    pub connection_lost: u64,
    /// Whether the stage's adapter is currently connected.
    #[serde(default)]
    pub connected: bool,
}

impl StageSnapshot {
    /// Total resolutions observed by the stage.
    #[must_use]
    pub fn resolved(&self) -> u64 {
        self.acked + self.ack_errors
    }
}
