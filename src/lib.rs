//! shortbot: short-only perpetual futures trading bot.
//!
//! Hexagonal layout: pure logic (indicators, signals, ledger, risk) in
//! [`domain`], port traits in [`ports`], concrete implementations in
//! [`adapters`], and the orchestrating state machine in [`engine`].

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod engine;
pub mod cli;
pub mod logging;
