//! Stochastic RSI.
//!
//! Raw %K normalises RSI within the min/max of its own trailing `period`
//! window (50 when the window is flat). %K is the SMA(k) of raw %K and %D is
//! the SMA(d) of %K, each taken over the valid values only and right-aligned
//! to the bars.

use super::rsi::rsi_of_values;
use crate::domain::indicator::{
    sma_of_values, IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue,
};
use crate::domain::ohlcv::OhlcvBar;

pub fn calculate_stoch_rsi(
    bars: &[OhlcvBar],
    period: usize,
    k_period: usize,
    d_period: usize,
) -> IndicatorSeries {
    let indicator_type = IndicatorType::StochRsi {
        period,
        k_period,
        d_period,
    };
    if period == 0 || k_period == 0 || d_period == 0 {
        return IndicatorSeries {
            indicator_type,
            values: Vec::new(),
        };
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let rsi = rsi_of_values(&closes, period);

    let raw_k: Vec<f64> = (0..rsi.len())
        .map(|i| {
            if i + 1 < period || rsi[i].is_nan() {
                return f64::NAN;
            }
            let window: Vec<f64> = rsi[i + 1 - period..=i]
                .iter()
                .copied()
                .filter(|v| !v.is_nan())
                .collect();
            let min = window.iter().copied().fold(f64::INFINITY, f64::min);
            let max = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if max == min {
                50.0
            } else {
                (rsi[i] - min) / (max - min) * 100.0
            }
        })
        .collect();

    let k = smooth_valid(&raw_k, k_period);
    let d = smooth_valid(&k, d_period);

    let values = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| IndicatorPoint {
            open_time: bar.open_time,
            valid: !k[i].is_nan() && !d[i].is_nan(),
            value: IndicatorValue::Stochastic {
                k: if k[i].is_nan() { 0.0 } else { k[i] },
                d: if d[i].is_nan() { 0.0 } else { d[i] },
            },
        })
        .collect();

    IndicatorSeries {
        indicator_type,
        values,
    }
}

/// SMA over the non-NaN entries, left-padded with NaN back to `data.len()`.
fn smooth_valid(data: &[f64], period: usize) -> Vec<f64> {
    let valid: Vec<f64> = data.iter().copied().filter(|v| !v.is_nan()).collect();
    let smoothed = sma_of_values(&valid, period);
    let mut out = vec![f64::NAN; data.len() - smoothed.len()];
    out.extend(smoothed);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::make_bars;

    fn k_d(series: &IndicatorSeries, i: usize) -> (f64, f64) {
        match series.values[i].value {
            IndicatorValue::Stochastic { k, d } => (k, d),
            _ => panic!("Expected Stochastic value"),
        }
    }

    #[test]
    fn stoch_rsi_flat_rsi_window_is_fifty() {
        // a pure uptrend pins RSI at 100, so every window is flat
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let series = calculate_stoch_rsi(&make_bars(&closes), 14, 3, 3);
        let (k, d) = k_d(&series, 39);
        assert!(series.values[39].valid);
        assert!((k - 50.0).abs() < f64::EPSILON);
        assert!((d - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn stoch_rsi_warmup_length() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64).sin()).collect();
        let series = calculate_stoch_rsi(&make_bars(&closes), 14, 3, 3);
        // first RSI at 14, raw %K at 14, %K at 16, %D at 18
        assert!(!series.values[17].valid);
        assert!(series.values[18].valid);
    }

    #[test]
    fn stoch_rsi_bounded() {
        let closes: Vec<f64> = (0..80)
            .map(|i| 100.0 + (i as f64 * 0.4).sin() * 10.0)
            .collect();
        let series = calculate_stoch_rsi(&make_bars(&closes), 14, 3, 3);
        for p in series.values.iter().filter(|p| p.valid) {
            if let IndicatorValue::Stochastic { k, d } = p.value {
                assert!((0.0..=100.0).contains(&k));
                assert!((0.0..=100.0).contains(&d));
            }
        }
    }

    #[test]
    fn stoch_rsi_short_input_is_invalid() {
        let series = calculate_stoch_rsi(&make_bars(&[1.0, 2.0, 3.0]), 14, 3, 3);
        assert_eq!(series.values.len(), 3);
        assert!(series.values.iter().all(|p| !p.valid));
    }

    #[test]
    fn smooth_valid_pads_left() {
        let out = smooth_valid(&[f64::NAN, 1.0, 2.0, 3.0], 2);
        assert!(out[0].is_nan());
        assert!(out[1].is_nan());
        assert!((out[2] - 1.5).abs() < f64::EPSILON);
        assert!((out[3] - 2.5).abs() < f64::EPSILON);
    }
}
