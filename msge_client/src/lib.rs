//! `msge_client`
//!
//! Client-side systems:
//! - Redirect handshake and framed transport session
//! - Snapshot application into the shared entity manager
//! - Local-only entities (camera, input sampling)
//! - Controller state upload

pub mod client;
pub mod input;
pub mod session;

pub use client::GameClient;
pub use session::{ClientSession, SessionError};
