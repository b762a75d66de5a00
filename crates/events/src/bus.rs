//! Trigger transport: publish/subscribe for newly created event-log documents.
//!
//! The document store publishes one message per created event document after
//! the creating transaction commits. Delivery is **at-least-once** and carries
//! no ordering promise beyond a single publisher's order, so every consumer
//! (the workflow executor) must be idempotent: it re-checks the document's
//! `processed` marker inside its own transaction before doing any work.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// A subscription to the trigger stream.
///
/// ```ignore
/// let subscription = bus.subscribe();
/// loop {
///     match subscription.recv_timeout(Duration::from_millis(200)) {
///         Ok(envelope) => executor.process(envelope.event_id())?,
///         Err(RecvTimeoutError::Timeout) => continue,   // check for shutdown
///         Err(RecvTimeoutError::Disconnected) => break, // bus closed
///     }
/// }
/// ```
///
/// Subscriptions are meant for single-threaded consumption.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Broadcast bus: every subscriber receives a copy of every published message.
///
/// `publish()` can fail (e.g. poisoned lock). The store surfaces that failure
/// to the committing caller; the committed documents stay committed, and the
/// unprocessed event documents can be re-published from the log.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
