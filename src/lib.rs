// ABOUTME: Gateway crate wiring transport, codec, and outbound delivery onto the engine
// ABOUTME: The conversational engine itself lives in confab-core

pub mod codec;
pub mod config;
pub mod connection;
pub mod gateway;
pub mod robot;

pub use codec::{Segment, SegmentCodec};
pub use config::Config;
pub use connection::{ConnectionHandle, ConnectionRegistry};
pub use robot::ApiClient;
