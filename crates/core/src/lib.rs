//! Shared session primitives: typed messages, the pub/sub router, per-agent
//! event streams, and the session-wide signal block.

mod eval;
mod events;
mod message;
mod router;
mod signals;

pub use eval::EvaluationLogger;
pub use events::{AgentEvent, EventFilter, EventStream};
pub use message::{Message, MessageType, Role};
pub use router::{FeedbackHook, MessageRouter, Subscriber};
pub use signals::SessionSignals;
