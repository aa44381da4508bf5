//! Core domain types and logic: indicators, signals, ledger and risk.

pub mod ohlcv;
pub mod indicator;
pub mod candle;
pub mod divergence;
pub mod rule;
pub mod rule_parser;
pub mod rule_eval;
pub mod signal;
pub mod order;
pub mod position;
pub mod wallet;
pub mod portfolio;
pub mod risk;
pub mod settings;
pub mod config_validation;
pub mod error;
