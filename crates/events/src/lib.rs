//! Production event mechanics: the event contract, the envelope published when
//! a new event-log document is created, and the pub/sub transport that
//! delivers those envelopes to handlers (at-least-once).

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
