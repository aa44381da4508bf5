//! Technical indicator implementations.
//!
//! This module provides types for representing indicator values and series:
//! - `IndicatorPoint`: A single point in an indicator time series
//! - `IndicatorValue`: Enum for different indicator output shapes
//! - `IndicatorType`: Enum for indicator identity + parameters (serves as HashMap key)
//! - `IndicatorSeries`: A time series of indicator values
//!
//! Every calculator returns one point per input bar; warm-up points carry
//! `valid: false`.

pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;
pub mod stoch_rsi;

pub use atr::calculate_atr;
pub use bollinger::calculate_bollinger;
pub use ema::{calculate_ema, ema_of_values};
pub use macd::calculate_macd;
pub use rsi::calculate_rsi;
pub use sma::{calculate_sma, sma_of_values};
pub use stoch_rsi::calculate_stoch_rsi;

use chrono::{DateTime, Utc};
use std::fmt;

#[derive(Debug, Clone)]
pub struct IndicatorPoint {
    pub open_time: DateTime<Utc>,
    pub valid: bool,
    pub value: IndicatorValue,
}

#[derive(Debug, Clone)]
pub enum IndicatorValue {
    Simple(f64),
    Macd {
        line: f64,
        signal: f64,
        histogram: f64,
    },
    Stochastic {
        k: f64,
        d: f64,
    },
    Bollinger {
        upper: f64,
        middle: f64,
        lower: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndicatorType {
    Sma(usize),
    Ema(usize),
    Rsi(usize),
    Atr(usize),
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    Bollinger {
        period: usize,
        std_dev: f64,
    },
    StochRsi {
        period: usize,
        k_period: usize,
        d_period: usize,
    },
}

#[derive(Debug, Clone)]
pub struct IndicatorSeries {
    pub indicator_type: IndicatorType,
    pub values: Vec<IndicatorPoint>,
}

impl IndicatorSeries {
    pub fn last(&self) -> Option<&IndicatorPoint> {
        self.values.last()
    }

    /// Last value of a single-valued series, `None` when absent or in warm-up.
    pub fn last_simple(&self) -> Option<f64> {
        match self.values.last() {
            Some(IndicatorPoint {
                valid: true,
                value: IndicatorValue::Simple(v),
                ..
            }) => Some(*v),
            _ => None,
        }
    }

    /// Single-valued series flattened to `f64`, with `NAN` for warm-up points.
    pub fn simple_values(&self) -> Vec<f64> {
        self.values
            .iter()
            .map(|p| match (p.valid, &p.value) {
                (true, IndicatorValue::Simple(v)) => *v,
                _ => f64::NAN,
            })
            .collect()
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorType::Sma(period) => write!(f, "SMA({})", period),
            IndicatorType::Ema(period) => write!(f, "EMA({})", period),
            IndicatorType::Rsi(period) => write!(f, "RSI({})", period),
            IndicatorType::Atr(period) => write!(f, "ATR({})", period),
            IndicatorType::Macd { fast, slow, signal } => {
                write!(f, "MACD({},{},{})", fast, slow, signal)
            }
            IndicatorType::Bollinger { period, std_dev } => {
                write!(f, "BOLLINGER({},{})", period, std_dev)
            }
            IndicatorType::StochRsi {
                period,
                k_period,
                d_period,
            } => write!(f, "STOCHRSI({},{},{})", period, k_period, d_period),
        }
    }
}

#[cfg(test)]
pub(crate) fn make_bars(closes: &[f64]) -> Vec<crate::domain::ohlcv::OhlcvBar> {
    use chrono::TimeZone;
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| crate::domain::ohlcv::OhlcvBar {
            symbol: "TESTUSDT".into(),
            open_time: start + chrono::Duration::minutes(15 * i as i64),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1000.0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indicator_type_display_macd() {
        let macd = IndicatorType::Macd {
            fast: 12,
            slow: 26,
            signal: 9,
        };
        assert_eq!(macd.to_string(), "MACD(12,26,9)");
    }

    #[test]
    fn indicator_type_display_bollinger() {
        let boll = IndicatorType::Bollinger {
            period: 20,
            std_dev: 2.0,
        };
        assert_eq!(boll.to_string(), "BOLLINGER(20,2)");
        let wide = IndicatorType::Bollinger {
            period: 20,
            std_dev: 2.5,
        };
        assert_eq!(wide.to_string(), "BOLLINGER(20,2.5)");
    }

    #[test]
    fn indicator_type_display_stoch_rsi() {
        let stoch = IndicatorType::StochRsi {
            period: 14,
            k_period: 3,
            d_period: 3,
        };
        assert_eq!(stoch.to_string(), "STOCHRSI(14,3,3)");
    }

    #[test]
    fn last_simple_skips_warmup() {
        let bars = make_bars(&[1.0, 2.0]);
        let series = calculate_sma(&bars, 3);
        assert_eq!(series.last_simple(), None);

        let bars = make_bars(&[1.0, 2.0, 3.0]);
        let series = calculate_sma(&bars, 3);
        assert_eq!(series.last_simple(), Some(2.0));
    }

    #[test]
    fn simple_values_marks_warmup_as_nan() {
        let bars = make_bars(&[1.0, 2.0, 3.0]);
        let values = calculate_sma(&bars, 2).simple_values();
        assert!(values[0].is_nan());
        assert!((values[1] - 1.5).abs() < f64::EPSILON);
        assert!((values[2] - 2.5).abs() < f64::EPSILON);
    }
}
