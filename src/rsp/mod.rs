//! The GDB Remote Serial Protocol transport and connector (spec §4.2, §4.3).

pub mod connector;
pub mod transport;
