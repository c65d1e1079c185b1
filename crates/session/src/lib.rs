//! Session lifecycle: the engine that owns the stores, drives the router,
//! schedules incremental biography updates, and tears the session down.

mod engine;

pub use engine::{InteractionMode, SessionEngine};
