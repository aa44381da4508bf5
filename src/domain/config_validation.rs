//! Configuration validation.
//!
//! Validates every settings group before the engine accepts them, both at
//! load time and on `TradeEngine::update_settings`.

use crate::domain::error::ShortbotError;
use crate::domain::rule_parser;
use crate::domain::settings::{
    AppSettings, BotSettings, ExchangeSettings, IndicatorSettings, PaperSettings, RiskSettings,
    StrategySettings, TradingMode, TIMEFRAMES,
};

/// Upper bound the venue accepts for one kline request.
pub const MAX_KLINE_LIMIT: usize = 1500;

pub fn validate_settings(settings: &BotSettings) -> Result<(), ShortbotError> {
    validate_app(&settings.app)?;
    validate_strategy(&settings.strategy)?;
    validate_indicators(&settings.indicators)?;
    validate_risk(&settings.risk)?;
    validate_exchange(settings.mode, &settings.exchange)?;
    validate_paper(&settings.paper)?;
    Ok(())
}

fn validate_app(app: &AppSettings) -> Result<(), ShortbotError> {
    let scan = app.scan_interval.as_secs();
    if !(30..=300).contains(&scan) {
        return Err(invalid("app", "scan_interval_secs", "scan_interval_secs must be between 30 and 300"));
    }
    let monitor = app.monitor_interval.as_secs();
    if !(5..=300).contains(&monitor) {
        return Err(invalid(
            "app",
            "monitor_interval_secs",
            "monitor_interval_secs must be between 5 and 300",
        ));
    }
    if !(1..=50).contains(&app.top_gainers_limit) {
        return Err(invalid("app", "top_gainers_limit", "top_gainers_limit must be between 1 and 50"));
    }
    if app.listener_timeout.is_zero() {
        return Err(invalid("app", "listener_timeout_ms", "listener_timeout_ms must be positive"));
    }
    Ok(())
}

fn validate_strategy(strategy: &StrategySettings) -> Result<(), ShortbotError> {
    if !TIMEFRAMES.contains(&strategy.timeframe.as_str()) {
        return Err(invalid(
            "strategy",
            "timeframe",
            &format!("timeframe must be one of {}", TIMEFRAMES.join(", ")),
        ));
    }
    if strategy.position_size_usd <= 0.0 {
        return Err(invalid("strategy", "position_size_usd", "position_size_usd must be positive"));
    }
    if !(1..=20).contains(&strategy.max_concurrent_positions) {
        return Err(invalid(
            "strategy",
            "max_concurrent_positions",
            "max_concurrent_positions must be between 1 and 20",
        ));
    }
    if strategy.tp_percentage <= 0.0 || strategy.tp_percentage > 50.0 {
        return Err(invalid("strategy", "tp_percentage", "tp_percentage must be in (0, 50]"));
    }
    if strategy.min_order_quantity <= 0.0 {
        return Err(invalid("strategy", "min_order_quantity", "min_order_quantity must be positive"));
    }
    if strategy.kline_limit < strategy.min_klines || strategy.kline_limit > MAX_KLINE_LIMIT {
        return Err(invalid(
            "strategy",
            "kline_limit",
            &format!(
                "kline_limit must be between {} and {}",
                strategy.min_klines, MAX_KLINE_LIMIT
            ),
        ));
    }
    Ok(())
}

fn validate_indicators(ind: &IndicatorSettings) -> Result<(), ShortbotError> {
    let periods = [
        ("rsi_period", ind.rsi_period),
        ("divergence_radius", ind.divergence_radius),
        ("ema_fast", ind.ema_fast),
        ("ema_slow", ind.ema_slow),
        ("sma_period", ind.sma_period),
        ("macd_fast", ind.macd_fast),
        ("macd_slow", ind.macd_slow),
        ("macd_signal", ind.macd_signal),
        ("bb_period", ind.bb_period),
        ("atr_period", ind.atr_period),
        ("stoch_rsi_period", ind.stoch_rsi_period),
        ("stoch_k_period", ind.stoch_k_period),
        ("stoch_d_period", ind.stoch_d_period),
    ];
    for (key, value) in periods {
        if value == 0 {
            return Err(invalid("indicators", key, &format!("{key} must be at least 1")));
        }
    }
    if ind.ema_fast >= ind.ema_slow {
        return Err(invalid("indicators", "ema_fast", "ema_fast must be less than ema_slow"));
    }
    if ind.macd_fast >= ind.macd_slow {
        return Err(invalid("indicators", "macd_fast", "macd_fast must be less than macd_slow"));
    }
    if ind.rsi_overbought <= 0.0 || ind.rsi_overbought >= 100.0 {
        return Err(invalid("indicators", "rsi_overbought", "rsi_overbought must be in (0, 100)"));
    }
    if ind.stoch_overbought <= 0.0 || ind.stoch_overbought >= 100.0 {
        return Err(invalid(
            "indicators",
            "stoch_overbought",
            "stoch_overbought must be in (0, 100)",
        ));
    }
    if ind.rsi_divergence_min_size < 0.0 {
        return Err(invalid(
            "indicators",
            "rsi_divergence_min_size",
            "rsi_divergence_min_size must be non-negative",
        ));
    }
    if ind.bb_std <= 0.0 {
        return Err(invalid("indicators", "bb_std", "bb_std must be positive"));
    }
    if ind.bb_position_threshold <= 0.0 || ind.bb_position_threshold > 1.0 {
        return Err(invalid(
            "indicators",
            "bb_position_threshold",
            "bb_position_threshold must be in (0, 1]",
        ));
    }
    if ind.wick_body_ratio <= 0.0 {
        return Err(invalid("indicators", "wick_body_ratio", "wick_body_ratio must be positive"));
    }
    if let Some(text) = &ind.custom_rule {
        rule_parser::parse(text)?;
    }
    Ok(())
}

fn validate_risk(risk: &RiskSettings) -> Result<(), ShortbotError> {
    if risk.daily_warning_threshold <= 0.0 {
        return Err(invalid(
            "risk",
            "daily_warning_threshold",
            "daily_warning_threshold must be positive",
        ));
    }
    if risk.daily_shutdown_threshold <= risk.daily_warning_threshold
        || risk.daily_shutdown_threshold > 100.0
    {
        return Err(invalid(
            "risk",
            "daily_shutdown_threshold",
            "daily_shutdown_threshold must exceed daily_warning_threshold and be at most 100",
        ));
    }
    if risk.max_portfolio_risk <= 0.0 || risk.max_portfolio_risk > 100.0 {
        return Err(invalid("risk", "max_portfolio_risk", "max_portfolio_risk must be in (0, 100]"));
    }
    if risk.max_consecutive_losses == 0 {
        return Err(invalid(
            "risk",
            "max_consecutive_losses",
            "max_consecutive_losses must be at least 1",
        ));
    }
    if risk.min_available_balance < 0.0 {
        return Err(invalid(
            "risk",
            "min_available_balance",
            "min_available_balance must be non-negative",
        ));
    }
    if risk.maintenance_margin_rate <= 0.0 || risk.maintenance_margin_rate >= 1.0 {
        return Err(invalid(
            "risk",
            "maintenance_margin_rate",
            "maintenance_margin_rate must be in (0, 1)",
        ));
    }
    if risk.margin_rate <= 0.0 || risk.margin_rate > 1.0 {
        return Err(invalid("risk", "margin_rate", "margin_rate must be in (0, 1]"));
    }
    if !(0.0..0.01).contains(&risk.taker_commission_rate) {
        return Err(invalid(
            "risk",
            "taker_commission_rate",
            "taker_commission_rate must be in [0, 0.01)",
        ));
    }
    Ok(())
}

fn validate_exchange(mode: TradingMode, exchange: &ExchangeSettings) -> Result<(), ShortbotError> {
    if mode == TradingMode::Live {
        if exchange.api_key.is_none() {
            return Err(missing("exchange", "api_key"));
        }
        if exchange.api_secret.is_none() {
            return Err(missing("exchange", "api_secret"));
        }
    }
    if exchange.requests_per_minute == 0 {
        return Err(invalid(
            "exchange",
            "requests_per_minute",
            "requests_per_minute must be at least 1",
        ));
    }
    if !(1..=60_000).contains(&exchange.recv_window_ms) {
        return Err(invalid(
            "exchange",
            "recv_window_ms",
            "recv_window_ms must be between 1 and 60000",
        ));
    }
    if exchange.quote_asset.trim().is_empty() {
        return Err(invalid("exchange", "quote_asset", "quote_asset must not be empty"));
    }
    Ok(())
}

fn validate_paper(paper: &PaperSettings) -> Result<(), ShortbotError> {
    if !(100.0..=100_000.0).contains(&paper.initial_balance) {
        return Err(invalid(
            "paper",
            "initial_balance",
            "initial_balance must be between 100 and 100000",
        ));
    }
    Ok(())
}

fn invalid(section: &str, key: &str, reason: &str) -> ShortbotError {
    ShortbotError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn missing(section: &str, key: &str) -> ShortbotError {
    ShortbotError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}
