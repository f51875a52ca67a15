//! Command implementations.

pub(crate) mod load;
pub(crate) mod ports;
