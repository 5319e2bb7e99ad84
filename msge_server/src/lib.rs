//! `msge_server`
//!
//! Server-side systems:
//! - Handshake listener that redirects each client to a dedicated port
//! - One sub-listener per client with its own ring buffer and frame parser
//! - Fixed timestep simulation over the shared entity manager
//! - Snapshot broadcast to every connected client

pub mod multiplexer;
pub mod server;

pub use multiplexer::{Inbound, Multiplexer, PortAllocator};
pub use server::GameServer;
