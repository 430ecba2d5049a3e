//! Input stage: drives a source adapter and emits transactions.

pub mod concurrent;
pub mod serial;

use tokio::sync::mpsc;
use tributary_types::metric::StageKind;

use crate::adapter::{AckSource, Source};
use crate::stage::{StageContext, StageHandle};
use crate::throttle::RetryConfig;
use crate::transaction::Transaction;

pub use concurrent::ConcurrentSource;
pub use serial::SerialSource;

/// A constructed input adapter, tagged by how it acknowledges.
pub enum SourceKind {
    /// One batch outstanding, acknowledged through [`Source::acknowledge`].
    Serial(Box<dyn Source>),
    /// Per-batch acknowledgment callbacks; up to `max_in_flight` outstanding.
    Concurrent(Box<dyn AckSource>),
}

impl std::fmt::Debug for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serial(_) => f.write_str("SourceKind::Serial"),
            Self::Concurrent(_) => f.write_str("SourceKind::Concurrent"),
        }
    }
}

/// Spawn the input stage. The output channel closes when the stage stops.
pub fn spawn_source(
    ctx: &StageContext,
    kind: SourceKind,
    retry: RetryConfig,
    max_in_flight: usize,
    out: mpsc::Sender<Transaction>,
) -> StageHandle {
    match kind {
        SourceKind::Serial(adapter) => {
            let stage = SerialSource::new(ctx.clone(), adapter, retry, out);
            StageHandle::spawn(StageKind::Input, ctx, stage.run())
        }
        SourceKind::Concurrent(adapter) => {
            let stage = ConcurrentSource::new(ctx.clone(), adapter, retry, max_in_flight, out);
            StageHandle::spawn(StageKind::Input, ctx, stage.run())
        }
    }
}
