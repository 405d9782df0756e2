//! Broker seams: inbound update queues and the outbound command channel

mod broker;
mod memory;
mod timer;

pub use broker::{CommandChannel, DispatchRequest, QueueError, UpdateQueue, UpdateSource};
pub use memory::InMemoryBroker;
pub use timer::TimerEventQueue;
