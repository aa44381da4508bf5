//! Custom rule evaluation.
//!
//! Rules are evaluated against an [`IndicatorSnapshot`] of the latest bar.
//!
//! # Evaluation Semantics
//!
//! - Any comparison with a missing (NaN) operand is `false`, including `!=`
//! - `==` / `!=` compare within `EPSILON`
//! - `and` short-circuits on first `false`, `or` on first `true`

use crate::domain::rule::{CompareOp, Input, Operand, Rule};
use serde::Serialize;

const EPSILON: f64 = 1e-9;

/// Latest value of every rule input. Inputs still in warm-up are `NAN`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub rsi: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub sma: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    pub atr: f64,
    pub stoch_k: f64,
    pub stoch_d: f64,
}

impl Default for IndicatorSnapshot {
    fn default() -> Self {
        Self {
            open: f64::NAN,
            high: f64::NAN,
            low: f64::NAN,
            close: f64::NAN,
            volume: f64::NAN,
            rsi: f64::NAN,
            ema_fast: f64::NAN,
            ema_slow: f64::NAN,
            sma: f64::NAN,
            macd: f64::NAN,
            macd_signal: f64::NAN,
            macd_histogram: f64::NAN,
            bb_upper: f64::NAN,
            bb_middle: f64::NAN,
            bb_lower: f64::NAN,
            atr: f64::NAN,
            stoch_k: f64::NAN,
            stoch_d: f64::NAN,
        }
    }
}

impl IndicatorSnapshot {
    pub fn get(&self, input: Input) -> f64 {
        match input {
            Input::Open => self.open,
            Input::High => self.high,
            Input::Low => self.low,
            Input::Close => self.close,
            Input::Volume => self.volume,
            Input::Rsi => self.rsi,
            Input::EmaFast => self.ema_fast,
            Input::EmaSlow => self.ema_slow,
            Input::Sma => self.sma,
            Input::Macd => self.macd,
            Input::MacdSignal => self.macd_signal,
            Input::MacdHistogram => self.macd_histogram,
            Input::BbUpper => self.bb_upper,
            Input::BbMiddle => self.bb_middle,
            Input::BbLower => self.bb_lower,
            Input::Atr => self.atr,
            Input::StochK => self.stoch_k,
            Input::StochD => self.stoch_d,
        }
    }
}

pub fn evaluate(rule: &Rule, snapshot: &IndicatorSnapshot) -> bool {
    match rule {
        Rule::Literal(value) => *value,
        Rule::Compare { left, op, right } => {
            let l = resolve_operand(left, snapshot);
            let r = resolve_operand(right, snapshot);
            compare(l, *op, r)
        }
        Rule::And(rules) => {
            for r in rules {
                if !evaluate(r, snapshot) {
                    return false;
                }
            }
            true
        }
        Rule::Or(rules) => {
            for r in rules {
                if evaluate(r, snapshot) {
                    return true;
                }
            }
            false
        }
        Rule::Not(rule) => !evaluate(rule, snapshot),
    }
}

fn resolve_operand(operand: &Operand, snapshot: &IndicatorSnapshot) -> f64 {
    match operand {
        Operand::Constant(v) => *v,
        Operand::Input(input) => snapshot.get(*input),
    }
}

fn compare(l: f64, op: CompareOp, r: f64) -> bool {
    if l.is_nan() || r.is_nan() {
        return false;
    }
    match op {
        CompareOp::Gt => l > r,
        CompareOp::Ge => l >= r,
        CompareOp::Lt => l < r,
        CompareOp::Le => l <= r,
        CompareOp::Eq => (l - r).abs() < EPSILON,
        CompareOp::Ne => (l - r).abs() >= EPSILON,
    }
}
