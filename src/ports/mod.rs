//! Port traits the core consumes.

pub mod config_port;
pub mod exchange_port;
