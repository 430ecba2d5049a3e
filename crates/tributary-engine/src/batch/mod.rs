//! Re-batching stage.

pub mod batcher;
pub mod policy;

use tokio::sync::mpsc;
use tributary_types::error::ConnectorError;
use tributary_types::metric::StageKind;

use crate::stage::{StageContext, StageHandle};
use crate::transaction::Transaction;

pub use batcher::Batcher;
pub use policy::{BatchPolicy, Origin, Pending};

/// Spawn the batcher stage.
///
/// # Errors
///
/// Returns a config error if `policy` has no trigger.
pub fn spawn_batcher(
    ctx: &StageContext,
    policy: BatchPolicy,
    input: mpsc::Receiver<Transaction>,
    out: mpsc::Sender<Transaction>,
) -> Result<StageHandle, ConnectorError> {
    policy.validate()?;
    let stage = Batcher::new(ctx.clone(), policy, input, out);
    Ok(StageHandle::spawn(StageKind::Batcher, ctx, stage.run()))
}
