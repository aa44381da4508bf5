//! Simple Moving Average indicator.
//!
//! SMA[i] = mean(C[i-n+1..=i]). Warmup: first (n-1) bars are invalid.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::OhlcvBar;

pub fn calculate_sma(bars: &[OhlcvBar], period: usize) -> IndicatorSeries {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let raw = sma_of_values(&closes, period);

    let values = bars
        .iter()
        .zip(raw)
        .map(|(bar, v)| IndicatorPoint {
            open_time: bar.open_time,
            valid: !v.is_nan(),
            value: IndicatorValue::Simple(if v.is_nan() { 0.0 } else { v }),
        })
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::Sma(period),
        values,
    }
}

/// Rolling mean over raw values; `NAN` until the window fills.
pub fn sma_of_values(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 {
        return vec![f64::NAN; data.len()];
    }

    let mut out = Vec::with_capacity(data.len());
    let mut sum = 0.0;
    for (i, &v) in data.iter().enumerate() {
        sum += v;
        if i >= period {
            sum -= data[i - period];
        }
        if i + 1 < period {
            out.push(f64::NAN);
        } else {
            out.push(sum / period as f64);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::make_bars;

    #[test]
    fn sma_warmup_and_values() {
        let bars = make_bars(&[10.0, 20.0, 30.0, 40.0]);
        let series = calculate_sma(&bars, 3);

        assert!(!series.values[0].valid);
        assert!(!series.values[1].valid);
        match series.values[2].value {
            IndicatorValue::Simple(v) => assert!((v - 20.0).abs() < f64::EPSILON),
            _ => panic!("Expected Simple value"),
        }
        match series.values[3].value {
            IndicatorValue::Simple(v) => assert!((v - 30.0).abs() < f64::EPSILON),
            _ => panic!("Expected Simple value"),
        }
    }

    #[test]
    fn sma_shorter_than_period_is_all_invalid() {
        let bars = make_bars(&[10.0, 20.0]);
        let series = calculate_sma(&bars, 5);
        assert_eq!(series.values.len(), 2);
        assert!(series.values.iter().all(|p| !p.valid));
    }

    #[test]
    fn sma_period_0() {
        let out = sma_of_values(&[1.0, 2.0], 0);
        assert!(out.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn sma_indicator_type() {
        let series = calculate_sma(&make_bars(&[1.0]), 20);
        assert_eq!(series.indicator_type, IndicatorType::Sma(20));
    }
}
