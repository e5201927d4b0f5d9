//! Command implementations.

pub(crate) mod completions;
pub(crate) mod jog;
pub(crate) mod ports;
pub(crate) mod stage;
