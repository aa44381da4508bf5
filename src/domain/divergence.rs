//! Local extrema and bearish divergence detection.
//!
//! A point is a peak when it is strictly greater than every neighbour within
//! `radius` on both sides (a trough is strictly smaller). Points closer than
//! `radius` to either end are never extrema, and NaN never qualifies.
//! Noisy data can yield no extrema at all; the detector then reports no
//! divergence.

/// Window the detector looks back over.
pub const DIVERGENCE_LOOKBACK: usize = 50;
/// Shortest series the detector will consider.
pub const DIVERGENCE_MIN_LEN: usize = 20;

pub fn find_peaks_and_troughs(data: &[f64], radius: usize) -> (Vec<usize>, Vec<usize>) {
    let mut peaks = Vec::new();
    let mut troughs = Vec::new();
    if data.len() < radius * 2 + 1 {
        return (peaks, troughs);
    }

    for i in radius..data.len() - radius {
        let center = data[i];
        if center.is_nan() {
            continue;
        }
        let neighbours = (i - radius..=i + radius).filter(|&j| j != i).map(|j| data[j]);

        let mut is_peak = true;
        let mut is_trough = true;
        for v in neighbours {
            // NaN compares false both ways, so it must veto explicitly
            if v.is_nan() || v >= center {
                is_peak = false;
            }
            if v.is_nan() || v <= center {
                is_trough = false;
            }
        }
        if is_peak {
            peaks.push(i);
        }
        if is_trough {
            troughs.push(i);
        }
    }
    (peaks, troughs)
}

/// Price makes a higher high while the oscillator makes a lower high,
/// comparing the last two peaks of each within the trailing window, and the
/// price rise is at least `min_size_pct` percent of the earlier peak.
pub fn detect_bearish_divergence(
    prices: &[f64],
    oscillator: &[f64],
    min_size_pct: f64,
    radius: usize,
) -> bool {
    if prices.len() < DIVERGENCE_MIN_LEN || oscillator.len() < DIVERGENCE_MIN_LEN {
        return false;
    }

    let price_window = &prices[prices.len().saturating_sub(DIVERGENCE_LOOKBACK)..];
    let osc_window = &oscillator[oscillator.len().saturating_sub(DIVERGENCE_LOOKBACK)..];

    let (price_peaks, _) = find_peaks_and_troughs(price_window, radius);
    let (osc_peaks, _) = find_peaks_and_troughs(osc_window, radius);

    let &[.., prev_p, last_p] = price_peaks.as_slice() else {
        return false;
    };
    let &[.., prev_o, last_o] = osc_peaks.as_slice() else {
        return false;
    };

    let price_higher = price_window[last_p] > price_window[prev_p];
    let osc_lower = osc_window[last_o] < osc_window[prev_o];
    if !(price_higher && osc_lower) {
        return false;
    }

    let base = price_window[prev_p];
    if base == 0.0 {
        return false;
    }
    let price_diff_pct = (price_window[last_p] - base).abs() / base * 100.0;
    price_diff_pct >= min_size_pct
}
