//! Tokio host for a join pushdown block.
//!
//! The block itself is a synchronous state machine. The host owns it inside
//! a task, feeds it the signals arriving on an inbox channel and forwards
//! everything it sends on an outbox channel, in order. Routing between
//! blocks is left to whoever holds the channels.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::distribution::Distribution;
use crate::exec::Spj;
use crate::protocol::Envelope;
use crate::types::BlockRef;

/// Channels and task of a hosted block.
#[derive(Debug)]
pub struct BlockHandle<D> {
    /// Address of the hosted block.
    pub reference: BlockRef,
    /// Signals for the block.
    pub inbox: mpsc::UnboundedSender<Envelope>,
    /// Signals sent by the block.
    pub outbox: mpsc::UnboundedReceiver<Envelope>,
    /// Resolves to the block once the inbox is closed.
    pub task: JoinHandle<Spj<D>>,
}

/// Run `block` on the current tokio runtime.
///
/// The task ends when every inbox sender has been dropped, or when the
/// outbox receiver is gone.
pub fn spawn_block<D>(mut block: Spj<D>) -> BlockHandle<D>
where
    D: Distribution + Send + 'static,
{
    let reference = block.reference();
    let (inbox_tx, mut inbox_rx) = mpsc::unbounded_channel::<Envelope>();
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        'serve: while let Some(envelope) = inbox_rx.recv().await {
            block.receive(envelope);
            for envelope in block.drain_outbox() {
                if outbox_tx.send(envelope).is_err() {
                    warn!(block = %reference, "outbox closed, stopping");
                    break 'serve;
                }
            }
        }
        debug!(block = %reference, live = block.live_requests(), "block host stopped");
        block
    });
    BlockHandle {
        reference,
        inbox: inbox_tx,
        outbox: outbox_rx,
        task,
    }
}
