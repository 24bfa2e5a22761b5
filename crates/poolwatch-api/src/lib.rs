// poolwatch-api: Async Rust client for a mining pool's REST API and event stream

pub mod client;
pub mod error;
pub mod stream;
pub mod transport;

pub use client::PoolClient;
pub use error::Error;
pub use stream::{ControlMessage, StreamConfig, StreamConnection, StreamEvent, StreamState};
pub use transport::{TlsMode, TransportConfig};
