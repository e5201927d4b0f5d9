//! Text protocol spoken by the stage firmware.
//!
//! Pure encode/decode, no I/O. Requests are built with [`Command`] and
//! replies are decoded with [`Reply`] or, for the identify request,
//! [`Identification`].

pub mod command;
pub mod reply;

pub use command::{Axis, Command, HomingOrder};
pub use reply::{IDENTIFY_MARKER, Identification, Reply, ReplyValue};
