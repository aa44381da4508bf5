//! Exponential Moving Average indicator.
//!
//! k = 2/(n+1), EMA[0] = C[0], then EMA[i] = C[i]*k + EMA[i-1]*(1-k).
//! Seeded with the first observation, so every bar is valid.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::OhlcvBar;

pub fn calculate_ema(bars: &[OhlcvBar], period: usize) -> IndicatorSeries {
    if period == 0 || bars.is_empty() {
        return IndicatorSeries {
            indicator_type: IndicatorType::Ema(period),
            values: Vec::new(),
        };
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let values = bars
        .iter()
        .zip(ema_of_values(&closes, period))
        .map(|(bar, ema)| IndicatorPoint {
            open_time: bar.open_time,
            valid: true,
            value: IndicatorValue::Simple(ema),
        })
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::Ema(period),
        values,
    }
}

/// Exponential smoothing over raw values, seeded with `data[0]`.
pub fn ema_of_values(data: &[f64], period: usize) -> Vec<f64> {
    let Some(&first) = data.first() else {
        return Vec::new();
    };
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(data.len());
    let mut ema = first;
    out.push(ema);
    for &v in &data[1..] {
        ema = v * k + ema * (1.0 - k);
        out.push(ema);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::make_bars;

    #[test]
    fn ema_seed_is_first_close() {
        let bars = make_bars(&[10.0, 20.0, 30.0]);
        let series = calculate_ema(&bars, 3);

        assert!(series.values.iter().all(|p| p.valid));
        if let IndicatorValue::Simple(v) = series.values[0].value {
            assert!((v - 10.0).abs() < f64::EPSILON);
        } else {
            panic!("Expected Simple value");
        }
    }

    #[test]
    fn ema_recursive_calculation() {
        let bars = make_bars(&[10.0, 20.0, 30.0]);
        let series = calculate_ema(&bars, 3);

        let k = 2.0 / 4.0;
        let ema_1 = 20.0 * k + 10.0 * (1.0 - k);
        let ema_2 = 30.0 * k + ema_1 * (1.0 - k);

        if let IndicatorValue::Simple(v) = series.values[1].value {
            assert!((v - ema_1).abs() < f64::EPSILON);
        }
        if let IndicatorValue::Simple(v) = series.values[2].value {
            assert!((v - ema_2).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn ema_period_1_tracks_close() {
        let out = ema_of_values(&[10.0, 20.0, 30.0], 1);
        assert_eq!(out, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn ema_equal_prices() {
        let out = ema_of_values(&[100.0; 5], 3);
        assert!(out.iter().all(|v| (v - 100.0).abs() < f64::EPSILON));
    }

    #[test]
    fn ema_empty_bars() {
        let bars = make_bars(&[]);
        assert!(calculate_ema(&bars, 3).values.is_empty());
        assert!(ema_of_values(&[], 3).is_empty());
    }

    #[test]
    fn ema_period_0() {
        let bars = make_bars(&[10.0, 20.0]);
        assert!(calculate_ema(&bars, 0).values.is_empty());
    }
}
