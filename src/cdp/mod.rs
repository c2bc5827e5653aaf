//! Chrome DevTools Protocol plumbing

pub mod connection;
pub mod events;
pub mod transport;
pub mod types;

pub use connection::Session;
pub use events::PageEvent;
pub use transport::{CdpMessage, DebuggerTransport, WsTransport};
pub use types::{BackendNodeId, ExecutionContextId};
