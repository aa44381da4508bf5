//! Single-candle pattern analysis.

use crate::domain::ohlcv::OhlcvBar;

/// Floor applied to a zero body so ratios stay finite.
const MIN_BODY: f64 = 0.0001;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WickBodyAnalysis {
    pub body: f64,
    pub upper_wick: f64,
    pub lower_wick: f64,
    pub total_wick: f64,
    /// Both wicks combined over the body.
    pub wick_body_ratio: f64,
    /// Upper wick as a share of the full high-low range, 0 for a flat candle.
    pub upper_wick_ratio: f64,
}

pub fn analyze_wick_body(bar: &OhlcvBar) -> WickBodyAnalysis {
    let upper_wick = bar.upper_wick();
    let lower_wick = bar.lower_wick();
    let total_wick = upper_wick + lower_wick;
    let body = if bar.body() == 0.0 { MIN_BODY } else { bar.body() };
    let range = bar.range();

    WickBodyAnalysis {
        body,
        upper_wick,
        lower_wick,
        total_wick,
        wick_body_ratio: total_wick / body,
        upper_wick_ratio: if range == 0.0 { 0.0 } else { upper_wick / range },
    }
}

/// Bearish reversal candle: long upper wick, short lower wick, small body.
pub fn is_shooting_star(bar: &OhlcvBar, min_ratio: f64) -> bool {
    let a = analyze_wick_body(bar);
    a.upper_wick_ratio > 0.6 && a.wick_body_ratio >= min_ratio && a.upper_wick > a.lower_wick * 2.0
}

pub fn is_doji(bar: &OhlcvBar, threshold: f64) -> bool {
    let range = bar.range();
    if range == 0.0 {
        return false;
    }
    bar.body() / range <= threshold
}
