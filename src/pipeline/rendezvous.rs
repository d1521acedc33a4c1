//! Zero-capacity handoff channel
//!
//! A send completes only after a receiver has taken the item, so at most one
//! item per pipeline is in flight between stages. Built on a one-slot mpsc
//! channel plus a per-item acknowledgement: the slot provides the waiting
//! queue for senders, the acknowledgement holds the sender until the item
//! has actually been received.

use tokio::sync::{mpsc, oneshot};

struct Envelope<T> {
    item: T,
    ack: oneshot::Sender<()>,
}

/// The receiving side is gone; the item was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Handoff closed")]
pub struct HandoffClosed;

/// Sending half; clone it to hand off from several tasks
pub struct HandoffSender<T> {
    tx: mpsc::Sender<Envelope<T>>,
}

/// Reserved slot; the item is handed over by [`HandoffPermit::send`]
#[derive(Debug)]
pub struct HandoffPermit<'a, T> {
    permit: mpsc::Permit<'a, Envelope<T>>,
}

/// Pending acknowledgement for an item placed in the slot
pub struct Acknowledgement {
    acked: oneshot::Receiver<()>,
}

/// Receiving half
pub struct HandoffReceiver<T> {
    rx: mpsc::Receiver<Envelope<T>>,
}

/// Create a rendezvous pair
pub fn rendezvous<T>() -> (HandoffSender<T>, HandoffReceiver<T>) {
    let (tx, rx) = mpsc::channel(1);
    (HandoffSender { tx }, HandoffReceiver { rx })
}

impl<T> Clone for HandoffSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> HandoffSender<T> {
    /// Hand `item` to the receiver, waiting until it has been received
    ///
    /// Dropping the returned future before it completes abandons the wait;
    /// if the item already reached the slot it may still be received.
    pub async fn send(&self, item: T) -> Result<(), HandoffClosed> {
        self.reserve().await?.send(item).received().await
    }

    /// Wait for the slot without giving up the item yet
    ///
    /// If this is abandoned or fails, the caller still owns its item.
    pub async fn reserve(&self) -> Result<HandoffPermit<'_, T>, HandoffClosed> {
        let permit = self.tx.reserve().await.map_err(|_| HandoffClosed)?;
        Ok(HandoffPermit { permit })
    }

    /// Whether the receiving side has been closed or dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<'a, T> HandoffPermit<'a, T> {
    /// Place `item` in the reserved slot
    pub fn send(self, item: T) -> Acknowledgement {
        let (ack, acked) = oneshot::channel();
        self.permit.send(Envelope { item, ack });
        Acknowledgement { acked }
    }
}

impl Acknowledgement {
    /// Resolves once the receiver has taken the item
    ///
    /// Fails if the receiver closed first. Items stranded in the slot that
    /// way are returned by [`HandoffReceiver::close`].
    pub async fn received(self) -> Result<(), HandoffClosed> {
        self.acked.await.map_err(|_| HandoffClosed)
    }
}

impl<T> HandoffReceiver<T> {
    /// Take the next item, releasing its sender
    ///
    /// Returns `None` once every sender is dropped. Cancel safe.
    pub async fn recv(&mut self) -> Option<T> {
        let Envelope { item, ack } = self.rx.recv().await?;
        let _ = ack.send(());
        Some(item)
    }

    /// Refuse further handoffs; pending senders fail with [`HandoffClosed`]
    ///
    /// Returns the items that were still waiting in the slot.
    pub fn close(&mut self) -> Vec<T> {
        self.rx.close();
        let mut stranded = Vec::new();
        // Dropping each ack fails its sender
        while let Ok(Envelope { item, .. }) = self.rx.try_recv() {
            stranded.push(item);
        }
        stranded
    }
}
