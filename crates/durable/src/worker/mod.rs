//! Polling primitives for progression loops

mod poller;

pub use poller::{PollerConfig, PollerError, UpdatePoller};
