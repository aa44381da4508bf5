//! Short-entry signal pipeline.
//!
//! Bars (oldest first) are reduced to an [`IndicatorSnapshot`] of the latest
//! bar, each bearish condition becomes one boolean, and the configured
//! [`SignalLogic`] folds them into a single decision.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::candle::{analyze_wick_body, is_shooting_star};
use super::divergence::detect_bearish_divergence;
use super::error::ShortbotError;
use super::indicator::bollinger::band_position;
use super::indicator::rsi::rsi_of_values;
use super::indicator::{
    calculate_atr, calculate_bollinger, calculate_ema, calculate_macd, calculate_sma,
    calculate_stoch_rsi, IndicatorPoint, IndicatorSeries, IndicatorValue,
};
use super::ohlcv::OhlcvBar;
use super::rule::Rule;
use super::rule_eval::{evaluate, IndicatorSnapshot};
use super::rule_parser;
use super::settings::{IndicatorSettings, SignalLogic};

/// Fewest bars the pipeline accepts.
pub const MIN_BARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    RsiOverbought,
    RsiDivergence,
    EmaBearish,
    PriceBelowSma,
    MacdBearish,
    BbOverbought,
    StochOverbought,
    WickBodyRatio,
    ShootingStar,
    Custom,
}

impl SignalKind {
    pub fn name(self) -> &'static str {
        match self {
            SignalKind::RsiOverbought => "rsi_overbought",
            SignalKind::RsiDivergence => "rsi_divergence",
            SignalKind::EmaBearish => "ema_bearish",
            SignalKind::PriceBelowSma => "price_below_sma",
            SignalKind::MacdBearish => "macd_bearish",
            SignalKind::BbOverbought => "bb_overbought",
            SignalKind::StochOverbought => "stoch_overbought",
            SignalKind::WickBodyRatio => "wick_body_ratio",
            SignalKind::ShootingStar => "shooting_star",
            SignalKind::Custom => "custom",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Indicator state for one symbol at its latest bar.
#[derive(Debug, Clone)]
pub struct IndicatorSet {
    pub snapshot: IndicatorSnapshot,
    pub closes: Vec<f64>,
    /// Full RSI series, `NAN` during warm-up; feeds divergence detection.
    pub rsi: Vec<f64>,
    pub last_bar: OhlcvBar,
}

impl IndicatorSet {
    pub fn bar_count(&self) -> usize {
        self.closes.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalDecision {
    pub should_short: bool,
    pub signals: BTreeMap<SignalKind, bool>,
    pub true_count: usize,
    pub total_count: usize,
    pub reason: String,
    pub snapshot: Option<IndicatorSnapshot>,
}

#[derive(Debug, Clone)]
pub struct SignalEngine {
    settings: IndicatorSettings,
    logic: SignalLogic,
    custom_rule: Option<Rule>,
}

impl SignalEngine {
    /// Parses the custom rule once; a bad rule is a configuration error.
    pub fn new(settings: &IndicatorSettings, logic: SignalLogic) -> Result<Self, ShortbotError> {
        let custom_rule = match settings.custom_rule.as_deref() {
            Some(text) => Some(rule_parser::parse(text)?),
            None => None,
        };
        Ok(SignalEngine {
            settings: settings.clone(),
            logic,
            custom_rule,
        })
    }

    pub fn settings(&self) -> &IndicatorSettings {
        &self.settings
    }

    pub fn logic(&self) -> SignalLogic {
        self.logic
    }

    pub fn calculate_indicators(
        &self,
        symbol: &str,
        bars: &[OhlcvBar],
    ) -> Result<IndicatorSet, ShortbotError> {
        let Some(last_bar) = bars.last().filter(|_| bars.len() >= MIN_BARS) else {
            return Err(ShortbotError::InsufficientData {
                symbol: symbol.to_string(),
                bars: bars.len(),
                minimum: MIN_BARS,
            });
        };
        let s = &self.settings;

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let rsi = rsi_of_values(&closes, s.rsi_period);

        let mut snapshot = IndicatorSnapshot {
            open: last_bar.open,
            high: last_bar.high,
            low: last_bar.low,
            close: last_bar.close,
            volume: last_bar.volume,
            rsi: rsi.last().copied().unwrap_or(f64::NAN),
            ema_fast: last_or_nan(&calculate_ema(bars, s.ema_fast)),
            ema_slow: last_or_nan(&calculate_ema(bars, s.ema_slow)),
            sma: last_or_nan(&calculate_sma(bars, s.sma_period)),
            atr: last_or_nan(&calculate_atr(bars, s.atr_period)),
            ..IndicatorSnapshot::default()
        };

        let macd = calculate_macd(bars, s.macd_fast, s.macd_slow, s.macd_signal);
        if let Some(IndicatorValue::Macd {
            line,
            signal,
            histogram,
        }) = last_valid(&macd)
        {
            snapshot.macd = *line;
            snapshot.macd_signal = *signal;
            snapshot.macd_histogram = *histogram;
        }

        let bands = calculate_bollinger(bars, s.bb_period, s.bb_std);
        if let Some(IndicatorValue::Bollinger {
            upper,
            middle,
            lower,
        }) = last_valid(&bands)
        {
            snapshot.bb_upper = *upper;
            snapshot.bb_middle = *middle;
            snapshot.bb_lower = *lower;
        }

        let stoch = calculate_stoch_rsi(bars, s.stoch_rsi_period, s.stoch_k_period, s.stoch_d_period);
        if let Some(IndicatorValue::Stochastic { k, d }) = last_valid(&stoch) {
            snapshot.stoch_k = *k;
            snapshot.stoch_d = *d;
        }

        Ok(IndicatorSet {
            snapshot,
            closes,
            rsi,
            last_bar: last_bar.clone(),
        })
    }

    /// One boolean per bearish condition. Any comparison against a warm-up
    /// value is false.
    pub fn generate_short_signals(&self, set: &IndicatorSet) -> BTreeMap<SignalKind, bool> {
        let s = &self.settings;
        let snap = &set.snapshot;
        let mut signals = BTreeMap::new();

        signals.insert(SignalKind::RsiOverbought, snap.rsi > s.rsi_overbought);

        if set.bar_count() > MIN_BARS {
            signals.insert(
                SignalKind::RsiDivergence,
                detect_bearish_divergence(
                    &set.closes,
                    &set.rsi,
                    s.rsi_divergence_min_size,
                    s.divergence_radius,
                ),
            );
        }

        signals.insert(SignalKind::EmaBearish, snap.ema_fast < snap.ema_slow);
        signals.insert(SignalKind::PriceBelowSma, snap.close < snap.sma);
        signals.insert(
            SignalKind::MacdBearish,
            snap.macd < snap.macd_signal && snap.macd < 0.0,
        );

        let bb_hot = band_position(snap.close, snap.bb_upper, snap.bb_lower)
            .is_some_and(|pos| pos > s.bb_position_threshold);
        signals.insert(SignalKind::BbOverbought, bb_hot);

        signals.insert(SignalKind::StochOverbought, snap.stoch_k > s.stoch_overbought);

        let wick = analyze_wick_body(&set.last_bar);
        signals.insert(SignalKind::WickBodyRatio, wick.wick_body_ratio > s.wick_body_ratio);
        signals.insert(
            SignalKind::ShootingStar,
            is_shooting_star(&set.last_bar, s.wick_body_ratio),
        );

        if let Some(rule) = &self.custom_rule {
            signals.insert(SignalKind::Custom, evaluate(rule, snap));
        }

        signals
    }

    pub fn should_open_short(
        &self,
        symbol: &str,
        bars: &[OhlcvBar],
    ) -> Result<SignalDecision, ShortbotError> {
        if !self.settings.enabled {
            return Ok(SignalDecision {
                should_short: false,
                signals: BTreeMap::new(),
                true_count: 0,
                total_count: 0,
                reason: "indicators disabled".to_string(),
                snapshot: None,
            });
        }

        let set = self.calculate_indicators(symbol, bars)?;
        let signals = self.generate_short_signals(&set);
        let true_count = signals.values().filter(|&&v| v).count();
        let total_count = signals.len();
        let should_short = combine(self.logic, true_count, total_count);

        let active: Vec<&str> = signals
            .iter()
            .filter(|(_, v)| **v)
            .map(|(k, _)| k.name())
            .collect();
        let reason = format!(
            "{true_count}/{total_count} signals true ({}) under {}",
            if active.is_empty() { "none".to_string() } else { active.join(", ") },
            self.logic
        );

        Ok(SignalDecision {
            should_short,
            signals,
            true_count,
            total_count,
            reason,
            snapshot: Some(set.snapshot),
        })
    }
}

fn combine(logic: SignalLogic, true_count: usize, total_count: usize) -> bool {
    if total_count == 0 {
        return false;
    }
    match logic {
        SignalLogic::AllTrue => true_count == total_count,
        SignalLogic::MajorityTrue => true_count * 2 > total_count,
        SignalLogic::AnyTrue => true_count > 0,
    }
}

fn last_or_nan(series: &IndicatorSeries) -> f64 {
    series.last_simple().unwrap_or(f64::NAN)
}

fn last_valid(series: &IndicatorSeries) -> Option<&IndicatorValue> {
    match series.last() {
        Some(IndicatorPoint {
            valid: true, value, ..
        }) => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::make_bars;

    fn engine(logic: SignalLogic) -> SignalEngine {
        SignalEngine::new(&IndicatorSettings::default(), logic).unwrap()
    }

    fn rising(n: usize) -> Vec<OhlcvBar> {
        let closes: Vec<f64> = (0..n).map(|i| 45000.0 + i as f64 * 10.0).collect();
        make_bars(&closes)
    }

    #[test]
    fn too_few_bars_is_insufficient_data() {
        let err = engine(SignalLogic::AnyTrue)
            .should_open_short("BTCUSDT", &rising(49))
            .unwrap_err();
        assert!(matches!(
            err,
            ShortbotError::InsufficientData { bars: 49, minimum: 50, .. }
        ));
    }

    #[test]
    fn combine_rules() {
        assert!(combine(SignalLogic::AllTrue, 3, 3));
        assert!(!combine(SignalLogic::AllTrue, 2, 3));
        assert!(combine(SignalLogic::MajorityTrue, 2, 3));
        assert!(!combine(SignalLogic::MajorityTrue, 2, 4));
        assert!(combine(SignalLogic::AnyTrue, 1, 9));
        assert!(!combine(SignalLogic::AnyTrue, 0, 0));
    }

    #[test]
    fn uptrend_does_not_short() {
        let decision = engine(SignalLogic::MajorityTrue)
            .should_open_short("BTCUSDT", &rising(60))
            .unwrap();
        assert!(!decision.should_short);
        assert!(decision.total_count > 0);
        assert_eq!(decision.signals.get(&SignalKind::RsiOverbought), Some(&true));
        assert_eq!(decision.signals.get(&SignalKind::EmaBearish), Some(&false));
        assert_eq!(decision.signals.get(&SignalKind::MacdBearish), Some(&false));
    }

    #[test]
    fn divergence_only_with_more_than_min_bars() {
        let e = engine(SignalLogic::AnyTrue);
        let at_min = e.should_open_short("BTCUSDT", &rising(50)).unwrap();
        assert!(!at_min.signals.contains_key(&SignalKind::RsiDivergence));
        let above = e.should_open_short("BTCUSDT", &rising(51)).unwrap();
        assert!(above.signals.contains_key(&SignalKind::RsiDivergence));
    }

    #[test]
    fn disabled_indicators_never_short() {
        let settings = IndicatorSettings {
            enabled: false,
            ..IndicatorSettings::default()
        };
        let decision = SignalEngine::new(&settings, SignalLogic::AnyTrue)
            .unwrap()
            .should_open_short("BTCUSDT", &rising(10))
            .unwrap();
        assert!(!decision.should_short);
        assert_eq!(decision.total_count, 0);
    }

    #[test]
    fn custom_rule_joins_the_vote() {
        let settings = IndicatorSettings {
            custom_rule: Some("rsi > 90 and close > sma".to_string()),
            ..IndicatorSettings::default()
        };
        let decision = SignalEngine::new(&settings, SignalLogic::AnyTrue)
            .unwrap()
            .should_open_short("BTCUSDT", &rising(60))
            .unwrap();
        assert_eq!(decision.signals.get(&SignalKind::Custom), Some(&true));
    }

    #[test]
    fn bad_custom_rule_fails_construction() {
        let settings = IndicatorSettings {
            custom_rule: Some("rsi >".to_string()),
            ..IndicatorSettings::default()
        };
        assert!(matches!(
            SignalEngine::new(&settings, SignalLogic::AnyTrue),
            Err(ShortbotError::RuleParse(_))
        ));
    }

    #[test]
    fn snapshot_is_filled_after_warm_up() {
        let e = engine(SignalLogic::AnyTrue);
        let set = e.calculate_indicators("BTCUSDT", &rising(60)).unwrap();
        let snap = set.snapshot;
        assert!((snap.close - 45590.0).abs() < f64::EPSILON);
        assert!(snap.rsi > 99.0);
        assert!(snap.ema_fast > snap.ema_slow);
        assert!(snap.macd > 0.0);
        assert!(snap.bb_upper > snap.bb_middle && snap.bb_middle > snap.bb_lower);
        assert!(!snap.stoch_k.is_nan());
        assert!(snap.atr > 0.0);
    }

    #[test]
    fn all_true_on_uptrend_is_false() {
        let decision = engine(SignalLogic::AllTrue)
            .should_open_short("BTCUSDT", &rising(60))
            .unwrap();
        assert!(!decision.should_short);
        assert!(decision.true_count < decision.total_count);
    }
}
