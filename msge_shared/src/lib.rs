//! `msge_shared`
//!
//! Shared libraries used by both client and server.
//!
//! Design goals:
//! - Transport framing that resynchronizes on garbage instead of failing.
//! - A closed set of component kinds, dispatched by `match`.
//! - Typed decode errors; callers decide what is fatal.
//! - Physics and rendering behind narrow traits.
//! - No `unsafe`.

pub mod action;
pub mod cancel;
pub mod component;
pub mod config;
pub mod ecs;
pub mod event;
pub mod framing;
pub mod level;
pub mod math;
pub mod physics;
pub mod protocol;
pub mod render;
pub mod ring_buffer;
pub mod snapshot;
pub mod wire;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::action::*;
    pub use crate::cancel::*;
    pub use crate::component::*;
    pub use crate::config::*;
    pub use crate::ecs::*;
    pub use crate::event::*;
    pub use crate::framing::*;
    pub use crate::level::*;
    pub use crate::math::*;
    pub use crate::protocol::*;
    pub use crate::snapshot::*;
    pub use crate::wire::DecodeError;
}
