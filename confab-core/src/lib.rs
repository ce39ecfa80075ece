// ABOUTME: Protocol-agnostic conversational context and dispatch engine
// ABOUTME: Context store, suspended waits, argument cursor, and event pipeline

pub mod args;
pub mod context;
pub mod error;
pub mod event;
pub mod matcher;
pub mod metrics;
pub mod pipeline;
pub mod store;
pub mod testing;
pub mod traits;

pub use args::ArgMode;
pub use context::{Context, ContextConfig};
pub use error::EngineError;
pub use event::{target_id_field, ConnectionId, EventClass, InboundEvent};
pub use matcher::WaitRegistry;
pub use pipeline::{Dispatcher, EventOutcome, Flow};
pub use store::{ContextRecord, ContextStore, TaskId};
pub use traits::{MessageCodec, OutboundCaller};
