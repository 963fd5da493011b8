//! Wire types at the two edges of the synchronizer.
//!
//! - `frames`: what the real-time transport delivers (inbound).
//! - `events`: what the rendering layer consumes (outbound).
//!
//! All types derive `serde::Serialize` + `serde::Deserialize`.

pub mod events;
pub mod frames;
