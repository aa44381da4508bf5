//! MACD (Moving Average Convergence Divergence) indicator.
//!
//! MACD Line = EMA(fast) - EMA(slow)
//! Signal Line = EMA(signal) of MACD Line
//! Histogram = MACD Line - Signal Line
//!
//! Default parameters: fast=12, slow=26, signal=9. Both EMAs are seeded with
//! the first observation, so there is no warm-up.

use crate::domain::indicator::{
    ema_of_values, IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue,
};
use crate::domain::ohlcv::OhlcvBar;

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

pub fn calculate_macd(
    bars: &[OhlcvBar],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> IndicatorSeries {
    let indicator_type = IndicatorType::Macd {
        fast,
        slow,
        signal: signal_period,
    };
    if bars.is_empty() || fast == 0 || slow == 0 || signal_period == 0 {
        return IndicatorSeries {
            indicator_type,
            values: Vec::new(),
        };
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let ema_fast = ema_of_values(&closes, fast);
    let ema_slow = ema_of_values(&closes, slow);

    let macd_line: Vec<f64> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema_of_values(&macd_line, signal_period);

    let values = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| IndicatorPoint {
            open_time: bar.open_time,
            valid: true,
            value: IndicatorValue::Macd {
                line: macd_line[i],
                signal: signal_line[i],
                histogram: macd_line[i] - signal_line[i],
            },
        })
        .collect();

    IndicatorSeries {
        indicator_type,
        values,
    }
}

pub fn calculate_macd_default(bars: &[OhlcvBar]) -> IndicatorSeries {
    calculate_macd(bars, DEFAULT_FAST, DEFAULT_SLOW, DEFAULT_SIGNAL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::make_bars;

    fn macd_parts(series: &IndicatorSeries, i: usize) -> (f64, f64, f64) {
        match series.values[i].value {
            IndicatorValue::Macd {
                line,
                signal,
                histogram,
            } => (line, signal, histogram),
            _ => panic!("Expected Macd value"),
        }
    }

    #[test]
    fn macd_flat_series_is_zero() {
        let bars = make_bars(&[50.0; 40]);
        let series = calculate_macd_default(&bars);
        let (line, signal, hist) = macd_parts(&series, 39);
        assert!(line.abs() < 1e-12);
        assert!(signal.abs() < 1e-12);
        assert!(hist.abs() < 1e-12);
    }

    #[test]
    fn macd_histogram_is_line_minus_signal() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0).collect();
        let series = calculate_macd(&make_bars(&closes), 12, 26, 9);
        for i in 0..60 {
            let (line, signal, hist) = macd_parts(&series, i);
            assert!((hist - (line - signal)).abs() < 1e-12);
        }
    }

    #[test]
    fn macd_negative_on_downtrend() {
        let closes: Vec<f64> = (0..60).map(|i| 200.0 - i as f64).collect();
        let series = calculate_macd_default(&make_bars(&closes));
        let (line, signal, _) = macd_parts(&series, 59);
        assert!(line < 0.0);
        assert!(line < signal);
    }

    #[test]
    fn macd_first_point_is_zero() {
        let series = calculate_macd_default(&make_bars(&[10.0, 11.0]));
        let (line, _, _) = macd_parts(&series, 0);
        assert!(line.abs() < f64::EPSILON);
    }

    #[test]
    fn macd_empty_or_zero_period() {
        assert!(calculate_macd_default(&make_bars(&[])).values.is_empty());
        assert!(calculate_macd(&make_bars(&[1.0]), 0, 26, 9).values.is_empty());
    }
}
