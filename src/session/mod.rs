//! Client-session boundary.
//!
//! Translates client requests into engine operations and engine outcomes into
//! responses, and forwards the session's cell events to the client.

pub mod handler;
pub mod ipc;
pub mod protocol;
pub mod transport;

pub use handler::ClientSession;
pub use protocol::{ClientRequest, ClientResponse, ErrorEnvelope, EventMessage, ServerMessage};
