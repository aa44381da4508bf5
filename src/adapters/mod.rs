//! Concrete adapter implementations for ports.

#[cfg(feature = "live")]
pub mod binance_rest;
pub mod file_config_adapter;
pub mod paper_exchange;
