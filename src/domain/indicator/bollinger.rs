//! Bollinger Bands indicator.
//!
//! Bollinger Bands consist of:
//! - Middle: Simple Moving Average (SMA) over n periods
//! - Upper: Middle + (multiplier × StdDev)
//! - Lower: Middle - (multiplier × StdDev)
//!
//! Where StdDev is population standard deviation (divides by N, not N-1).
//!
//! Default parameters: period=20, multiplier=2.0
//! Warmup: first (period-1) bars are invalid.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::OhlcvBar;

pub fn calculate_bollinger(bars: &[OhlcvBar], period: usize, mult: f64) -> IndicatorSeries {
    let indicator_type = IndicatorType::Bollinger {
        period,
        std_dev: mult,
    };
    let mut values = Vec::with_capacity(bars.len());
    let warmup = period.saturating_sub(1);

    for (i, bar) in bars.iter().enumerate() {
        let valid = period > 0 && i >= warmup;

        let (upper, middle, lower) = if valid {
            let window = &bars[i + 1 - period..=i];
            let middle_val: f64 = window.iter().map(|b| b.close).sum::<f64>() / period as f64;
            let variance: f64 = window
                .iter()
                .map(|b| {
                    let diff = b.close - middle_val;
                    diff * diff
                })
                .sum::<f64>()
                / period as f64;

            let stddev = variance.sqrt();
            (middle_val + mult * stddev, middle_val, middle_val - mult * stddev)
        } else {
            (0.0, 0.0, 0.0)
        };

        values.push(IndicatorPoint {
            open_time: bar.open_time,
            valid,
            value: IndicatorValue::Bollinger {
                upper,
                middle,
                lower,
            },
        });
    }

    IndicatorSeries {
        indicator_type,
        values,
    }
}

/// Where `close` sits inside the channel: 0 at the lower band, 1 at the upper.
/// `None` when the channel has zero width.
pub fn band_position(close: f64, upper: f64, lower: f64) -> Option<f64> {
    let width = upper - lower;
    if width.abs() < f64::EPSILON {
        None
    } else {
        Some((close - lower) / width)
    }
}
