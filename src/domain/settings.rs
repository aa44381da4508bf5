//! Typed bot settings built from a [`ConfigPort`].
//!
//! Every key has a default; [`load_settings`] reads what is present, then
//! runs [`validate_settings`] so an out-of-range value fails at load time.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::domain::config_validation::validate_settings;
use crate::domain::error::ShortbotError;
use crate::ports::config_port::ConfigPort;

pub const TIMEFRAMES: [&str; 7] = ["1m", "5m", "15m", "1h", "4h", "1d", "1w"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    Paper,
    Live,
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradingMode::Paper => f.write_str("paper"),
            TradingMode::Live => f.write_str("live"),
        }
    }
}

impl FromStr for TradingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "paper" | "demo" => Ok(TradingMode::Paper),
            "live" => Ok(TradingMode::Live),
            other => Err(format!("unknown trading mode '{other}', expected paper or live")),
        }
    }
}

/// How individual signals combine into the entry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalLogic {
    AllTrue,
    MajorityTrue,
    AnyTrue,
}

impl fmt::Display for SignalLogic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalLogic::AllTrue => f.write_str("all_true"),
            SignalLogic::MajorityTrue => f.write_str("majority_true"),
            SignalLogic::AnyTrue => f.write_str("any_true"),
        }
    }
}

impl FromStr for SignalLogic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all_true" | "all" => Ok(SignalLogic::AllTrue),
            "majority_true" | "majority" => Ok(SignalLogic::MajorityTrue),
            "any_true" | "any" => Ok(SignalLogic::AnyTrue),
            other => Err(format!(
                "unknown signal logic '{other}', expected all_true, majority_true or any_true"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppSettings {
    pub scan_interval: Duration,
    pub monitor_interval: Duration,
    pub error_backoff: Duration,
    pub monitor_error_backoff: Duration,
    pub top_gainers_limit: usize,
    pub listener_timeout: Duration,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(60),
            monitor_interval: Duration::from_secs(30),
            error_backoff: Duration::from_secs(10),
            monitor_error_backoff: Duration::from_secs(5),
            top_gainers_limit: 20,
            listener_timeout: Duration::from_millis(5000),
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategySettings {
    pub timeframe: String,
    pub signal_logic: SignalLogic,
    pub position_size_usd: f64,
    pub max_concurrent_positions: usize,
    /// Percent, e.g. 5.0 for 5%.
    pub tp_percentage: f64,
    pub min_order_quantity: f64,
    pub kline_limit: usize,
    pub min_klines: usize,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            timeframe: "15m".to_string(),
            signal_logic: SignalLogic::MajorityTrue,
            position_size_usd: 1.0,
            max_concurrent_positions: 5,
            tp_percentage: 5.0,
            min_order_quantity: 0.001,
            kline_limit: 150,
            min_klines: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSettings {
    pub enabled: bool,
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_divergence_min_size: f64,
    pub divergence_radius: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub sma_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bb_period: usize,
    pub bb_std: f64,
    pub bb_position_threshold: f64,
    pub atr_period: usize,
    pub stoch_rsi_period: usize,
    pub stoch_k_period: usize,
    pub stoch_d_period: usize,
    pub stoch_overbought: f64,
    pub wick_body_ratio: f64,
    pub custom_rule: Option<String>,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            rsi_period: 14,
            rsi_overbought: 70.0,
            rsi_divergence_min_size: 5.0,
            divergence_radius: 5,
            ema_fast: 12,
            ema_slow: 26,
            sma_period: 20,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bb_period: 20,
            bb_std: 2.0,
            bb_position_threshold: 0.8,
            atr_period: 14,
            stoch_rsi_period: 14,
            stoch_k_period: 3,
            stoch_d_period: 3,
            stoch_overbought: 80.0,
            wick_body_ratio: 2.0,
            custom_rule: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskSettings {
    /// Percent of the daily starting balance.
    pub daily_warning_threshold: f64,
    pub daily_shutdown_threshold: f64,
    /// Percent of available balance one entry may commit.
    pub max_portfolio_risk: f64,
    pub max_consecutive_losses: u32,
    pub min_available_balance: f64,
    pub maintenance_margin_rate: f64,
    pub margin_rate: f64,
    pub taker_commission_rate: f64,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            daily_warning_threshold: 10.0,
            daily_shutdown_threshold: 20.0,
            max_portfolio_risk: 5.0,
            max_consecutive_losses: 5,
            min_available_balance: 10.0,
            maintenance_margin_rate: 0.004,
            margin_rate: 0.05,
            taker_commission_rate: 0.0004,
        }
    }
}

#[derive(Clone, PartialEq)]
pub struct ExchangeSettings {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub testnet: bool,
    pub recv_window_ms: u64,
    pub requests_per_minute: u32,
    pub quote_asset: String,
    pub min_trade_count: u64,
    pub max_retries: u32,
}

impl fmt::Debug for ExchangeSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("api_secret", &self.api_secret.as_ref().map(|_| "***"))
            .field("testnet", &self.testnet)
            .field("recv_window_ms", &self.recv_window_ms)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("quote_asset", &self.quote_asset)
            .field("min_trade_count", &self.min_trade_count)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_secret: None,
            testnet: true,
            recv_window_ms: 5000,
            requests_per_minute: 1200,
            quote_asset: "USDT".to_string(),
            min_trade_count: 1000,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaperSettings {
    pub initial_balance: f64,
    pub seed: Option<u64>,
}

impl Default for PaperSettings {
    fn default() -> Self {
        Self {
            initial_balance: 1000.0,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BotSettings {
    pub mode: TradingMode,
    pub app: AppSettings,
    pub strategy: StrategySettings,
    pub indicators: IndicatorSettings,
    pub risk: RiskSettings,
    pub exchange: ExchangeSettings,
    pub paper: PaperSettings,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            mode: TradingMode::Paper,
            app: AppSettings::default(),
            strategy: StrategySettings::default(),
            indicators: IndicatorSettings::default(),
            risk: RiskSettings::default(),
            exchange: ExchangeSettings::default(),
            paper: PaperSettings::default(),
        }
    }
}

pub fn load_settings(config: &dyn ConfigPort) -> Result<BotSettings, ShortbotError> {
    let d = BotSettings::default();

    let mode = match config.get_string("app", "mode") {
        Some(s) => parse_enum::<TradingMode>(&s, "app", "mode")?,
        None => d.mode,
    };

    let app = AppSettings {
        scan_interval: Duration::from_secs(get_u64(config, "app", "scan_interval_secs", 60)?),
        monitor_interval: Duration::from_secs(get_u64(config, "app", "monitor_interval_secs", 30)?),
        error_backoff: Duration::from_secs(get_u64(config, "app", "error_backoff_secs", 10)?),
        monitor_error_backoff: Duration::from_secs(get_u64(
            config,
            "app",
            "monitor_error_backoff_secs",
            5,
        )?),
        top_gainers_limit: get_usize(config, "app", "top_gainers_limit", d.app.top_gainers_limit)?,
        listener_timeout: Duration::from_millis(get_u64(config, "app", "listener_timeout_ms", 5000)?),
        log_level: config
            .get_string("app", "log_level")
            .unwrap_or(d.app.log_level),
        log_dir: non_empty(config.get_string("app", "log_dir")).map(PathBuf::from),
    };

    let signal_logic = match config.get_string("strategy", "signal_logic") {
        Some(s) => parse_enum::<SignalLogic>(&s, "strategy", "signal_logic")?,
        None => d.strategy.signal_logic,
    };
    let s = &d.strategy;
    let strategy = StrategySettings {
        timeframe: config
            .get_string("strategy", "timeframe")
            .unwrap_or_else(|| s.timeframe.clone()),
        signal_logic,
        position_size_usd: config.get_double("strategy", "position_size_usd", s.position_size_usd),
        max_concurrent_positions: get_usize(
            config,
            "strategy",
            "max_concurrent_positions",
            s.max_concurrent_positions,
        )?,
        tp_percentage: config.get_double("strategy", "tp_percentage", s.tp_percentage),
        min_order_quantity: config.get_double("strategy", "min_order_quantity", s.min_order_quantity),
        kline_limit: get_usize(config, "strategy", "kline_limit", s.kline_limit)?,
        min_klines: s.min_klines,
    };

    let i = &d.indicators;
    let indicators = IndicatorSettings {
        enabled: config.get_bool("indicators", "enabled", i.enabled),
        rsi_period: get_usize(config, "indicators", "rsi_period", i.rsi_period)?,
        rsi_overbought: config.get_double("indicators", "rsi_overbought", i.rsi_overbought),
        rsi_divergence_min_size: config.get_double(
            "indicators",
            "rsi_divergence_min_size",
            i.rsi_divergence_min_size,
        ),
        divergence_radius: get_usize(config, "indicators", "divergence_radius", i.divergence_radius)?,
        ema_fast: get_usize(config, "indicators", "ema_fast", i.ema_fast)?,
        ema_slow: get_usize(config, "indicators", "ema_slow", i.ema_slow)?,
        sma_period: get_usize(config, "indicators", "sma_period", i.sma_period)?,
        macd_fast: get_usize(config, "indicators", "macd_fast", i.macd_fast)?,
        macd_slow: get_usize(config, "indicators", "macd_slow", i.macd_slow)?,
        macd_signal: get_usize(config, "indicators", "macd_signal", i.macd_signal)?,
        bb_period: get_usize(config, "indicators", "bb_period", i.bb_period)?,
        bb_std: config.get_double("indicators", "bb_std", i.bb_std),
        bb_position_threshold: config.get_double(
            "indicators",
            "bb_position_threshold",
            i.bb_position_threshold,
        ),
        atr_period: get_usize(config, "indicators", "atr_period", i.atr_period)?,
        stoch_rsi_period: get_usize(config, "indicators", "stoch_rsi_period", i.stoch_rsi_period)?,
        stoch_k_period: get_usize(config, "indicators", "stoch_k_period", i.stoch_k_period)?,
        stoch_d_period: get_usize(config, "indicators", "stoch_d_period", i.stoch_d_period)?,
        stoch_overbought: config.get_double("indicators", "stoch_overbought", i.stoch_overbought),
        wick_body_ratio: config.get_double("indicators", "wick_body_ratio", i.wick_body_ratio),
        custom_rule: non_empty(config.get_string("indicators", "custom_rule")),
    };

    let r = &d.risk;
    let risk = RiskSettings {
        daily_warning_threshold: config.get_double(
            "risk",
            "daily_warning_threshold",
            r.daily_warning_threshold,
        ),
        daily_shutdown_threshold: config.get_double(
            "risk",
            "daily_shutdown_threshold",
            r.daily_shutdown_threshold,
        ),
        max_portfolio_risk: config.get_double("risk", "max_portfolio_risk", r.max_portfolio_risk),
        max_consecutive_losses: get_u64(
            config,
            "risk",
            "max_consecutive_losses",
            r.max_consecutive_losses as u64,
        )? as u32,
        min_available_balance: config.get_double(
            "risk",
            "min_available_balance",
            r.min_available_balance,
        ),
        maintenance_margin_rate: config.get_double(
            "risk",
            "maintenance_margin_rate",
            r.maintenance_margin_rate,
        ),
        margin_rate: config.get_double("risk", "margin_rate", r.margin_rate),
        taker_commission_rate: config.get_double(
            "risk",
            "taker_commission_rate",
            r.taker_commission_rate,
        ),
    };

    let e = &d.exchange;
    let exchange = ExchangeSettings {
        api_key: non_empty(config.get_string("exchange", "api_key")),
        api_secret: non_empty(config.get_string("exchange", "api_secret")),
        testnet: config.get_bool("exchange", "testnet", e.testnet),
        recv_window_ms: get_u64(config, "exchange", "recv_window_ms", e.recv_window_ms)?,
        requests_per_minute: get_u64(
            config,
            "exchange",
            "requests_per_minute",
            e.requests_per_minute as u64,
        )? as u32,
        quote_asset: config
            .get_string("exchange", "quote_asset")
            .unwrap_or_else(|| e.quote_asset.clone()),
        min_trade_count: get_u64(config, "exchange", "min_trade_count", e.min_trade_count)?,
        max_retries: get_u64(config, "exchange", "max_retries", e.max_retries as u64)? as u32,
    };

    let seed = match non_empty(config.get_string("paper", "seed")) {
        Some(s) => Some(s.trim().parse::<u64>().map_err(|_| invalid(
            "paper",
            "seed",
            "seed must be a non-negative integer",
        ))?),
        None => None,
    };
    let paper = PaperSettings {
        initial_balance: config.get_double("paper", "initial_balance", d.paper.initial_balance),
        seed,
    };

    let settings = BotSettings {
        mode,
        app,
        strategy,
        indicators,
        risk,
        exchange,
        paper,
    };
    validate_settings(&settings)?;
    Ok(settings)
}

fn parse_enum<T: FromStr<Err = String>>(
    value: &str,
    section: &str,
    key: &str,
) -> Result<T, ShortbotError> {
    value.parse::<T>().map_err(|reason| invalid(section, key, &reason))
}

fn get_u64(config: &dyn ConfigPort, section: &str, key: &str, default: u64) -> Result<u64, ShortbotError> {
    let value = config.get_int(section, key, default as i64);
    u64::try_from(value).map_err(|_| invalid(section, key, &format!("{key} must be non-negative")))
}

fn get_usize(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: usize,
) -> Result<usize, ShortbotError> {
    get_u64(config, section, key, default as u64).map(|v| v as usize)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn invalid(section: &str, key: &str, reason: &str) -> ShortbotError {
    ShortbotError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    #[test]
    fn empty_config_yields_defaults() {
        let adapter = FileConfigAdapter::from_string("[app]\n").unwrap();
        let settings = load_settings(&adapter).unwrap();
        assert_eq!(settings, BotSettings::default());
    }

    #[test]
    fn reads_every_section() {
        let content = r#"
[app]
mode = paper
scan_interval_secs = 45
top_gainers_limit = 10

[strategy]
timeframe = 1h
signal_logic = any_true
position_size_usd = 2.5
max_concurrent_positions = 3
tp_percentage = 4.0

[indicators]
rsi_period = 7
rsi_overbought = 75
custom_rule = rsi > 75 and close > bb_upper

[risk]
daily_warning_threshold = 8
daily_shutdown_threshold = 15

[paper]
initial_balance = 5000
seed = 42
"#;
        let adapter = FileConfigAdapter::from_string(content).unwrap();
        let s = load_settings(&adapter).unwrap();

        assert_eq!(s.mode, TradingMode::Paper);
        assert_eq!(s.app.scan_interval, Duration::from_secs(45));
        assert_eq!(s.app.top_gainers_limit, 10);
        assert_eq!(s.strategy.timeframe, "1h");
        assert_eq!(s.strategy.signal_logic, SignalLogic::AnyTrue);
        assert!((s.strategy.position_size_usd - 2.5).abs() < f64::EPSILON);
        assert_eq!(s.strategy.max_concurrent_positions, 3);
        assert_eq!(s.indicators.rsi_period, 7);
        assert_eq!(
            s.indicators.custom_rule.as_deref(),
            Some("rsi > 75 and close > bb_upper")
        );
        assert!((s.risk.daily_shutdown_threshold - 15.0).abs() < f64::EPSILON);
        assert!((s.paper.initial_balance - 5000.0).abs() < f64::EPSILON);
        assert_eq!(s.paper.seed, Some(42));
    }

    #[test]
    fn unknown_mode_is_config_invalid() {
        let adapter = FileConfigAdapter::from_string("[app]\nmode = yolo\n").unwrap();
        let err = load_settings(&adapter).unwrap_err();
        assert!(matches!(
            err,
            ShortbotError::ConfigInvalid { ref section, ref key, .. } if section == "app" && key == "mode"
        ));
    }

    #[test]
    fn negative_integer_is_config_invalid() {
        let adapter =
            FileConfigAdapter::from_string("[strategy]\nmax_concurrent_positions = -1\n").unwrap();
        assert!(matches!(
            load_settings(&adapter),
            Err(ShortbotError::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn bad_seed_is_config_invalid() {
        let adapter = FileConfigAdapter::from_string("[paper]\nseed = abc\n").unwrap();
        assert!(load_settings(&adapter).is_err());
    }

    #[test]
    fn signal_logic_aliases() {
        assert_eq!("all".parse::<SignalLogic>(), Ok(SignalLogic::AllTrue));
        assert_eq!("MAJORITY_TRUE".parse::<SignalLogic>(), Ok(SignalLogic::MajorityTrue));
        assert!("most".parse::<SignalLogic>().is_err());
    }

    #[test]
    fn debug_hides_credentials() {
        let exchange = ExchangeSettings {
            api_key: Some("key-123".into()),
            api_secret: Some("secret-456".into()),
            ..ExchangeSettings::default()
        };
        let rendered = format!("{exchange:?}");
        assert!(!rendered.contains("key-123"));
        assert!(!rendered.contains("secret-456"));
    }
}
