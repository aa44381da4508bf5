//! Average True Range.
//!
//! TR[0] = high - low, TR[i] = max(high-low, |high-prevClose|, |low-prevClose|).
//! ATR is the simple moving average of TR over n bars; first (n-1) bars invalid.

use crate::domain::indicator::{
    sma_of_values, IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue,
};
use crate::domain::ohlcv::OhlcvBar;

pub fn calculate_atr(bars: &[OhlcvBar], period: usize) -> IndicatorSeries {
    let tr_values: Vec<f64> = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            if i == 0 {
                bar.range()
            } else {
                bar.true_range(bars[i - 1].close)
            }
        })
        .collect();

    let values = bars
        .iter()
        .zip(sma_of_values(&tr_values, period))
        .map(|(bar, atr)| IndicatorPoint {
            open_time: bar.open_time,
            valid: !atr.is_nan(),
            value: IndicatorValue::Simple(if atr.is_nan() { 0.0 } else { atr }),
        })
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::Atr(period),
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::make_bars;

    #[test]
    fn atr_first_bar_uses_high_low() {
        let mut bars = make_bars(&[100.0, 100.0]);
        bars[0].high = 105.0;
        bars[0].low = 95.0;
        bars[1].high = 101.0;
        bars[1].low = 99.0;
        let series = calculate_atr(&bars, 2);

        assert!(!series.values[0].valid);
        // TR = [10, max(2, 1, 1)] -> mean 6
        match series.values[1].value {
            IndicatorValue::Simple(v) => assert!((v - 6.0).abs() < f64::EPSILON),
            _ => panic!("Expected Simple value"),
        }
    }

    #[test]
    fn atr_gap_counts_previous_close() {
        let mut bars = make_bars(&[100.0, 120.0]);
        bars[1].high = 121.0;
        bars[1].low = 119.0;
        let series = calculate_atr(&bars, 1);
        // TR[1] = max(2, |121-100|, |119-100|) = 21
        match series.values[1].value {
            IndicatorValue::Simple(v) => assert!((v - 21.0).abs() < f64::EPSILON),
            _ => panic!("Expected Simple value"),
        }
    }

    #[test]
    fn atr_flat_bars_is_zero() {
        let series = calculate_atr(&make_bars(&[50.0; 20]), 14);
        assert_eq!(series.last_simple(), Some(0.0));
    }
}
