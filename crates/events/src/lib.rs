//! Ledger events: the event contract, stream envelopes and the publish/subscribe bus.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::{EventEnvelope, StreamKey};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
