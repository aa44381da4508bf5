//! Threshold-based circuit breaker over the ledger.
//!
//! The manager keeps only session state (loss streak, alert history, last
//! reset date). Every evaluation reads the [`Portfolio`] it is handed.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use serde_json::json;

use super::error::ShortbotError;
use super::portfolio::Portfolio;
use super::position::Position;
use super::settings::RiskSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    DrawdownWarning,
    DrawdownCritical,
    MaxPositions,
    InsufficientBalance,
    PositionSizeViolation,
    ConsecutiveLosses,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAlert {
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl RiskAlert {
    fn new(kind: AlertKind, severity: Severity, message: String, data: serde_json::Value) -> Self {
        RiskAlert {
            kind,
            severity,
            message,
            data,
            timestamp: Utc::now(),
        }
    }
}

/// First reason found by [`RiskManager::should_stop_trading`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    DailyDrawdown { current_pct: f64, limit_pct: f64 },
    ConsecutiveLosses { count: u32, limit: u32 },
    LowBalance { available: f64, minimum: f64 },
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::DailyDrawdown {
                current_pct,
                limit_pct,
            } => write!(f, "daily drawdown {current_pct:.2}% reached limit {limit_pct:.2}%"),
            StopReason::ConsecutiveLosses { count, limit } => {
                write!(f, "{count} consecutive losses (limit {limit})")
            }
            StopReason::LowBalance { available, minimum } => {
                write!(f, "available balance {available:.2} below minimum {minimum:.2}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskInfo {
    pub symbol: String,
    pub requested_usd: f64,
    pub max_risk_usd: f64,
    pub final_usd: f64,
    pub max_risk_pct: f64,
    pub available_balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionSizing {
    pub size: f64,
    pub adjusted: bool,
    pub info: RiskInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskSummary {
    pub daily_pnl: f64,
    pub daily_return_pct: f64,
    pub warning_threshold: f64,
    pub shutdown_threshold: f64,
    pub consecutive_losses: u32,
    pub max_consecutive_losses: u32,
    pub open_positions: usize,
    pub max_positions: usize,
    pub available_balance: f64,
    pub margin_used: f64,
    pub alerts_24h: usize,
    pub stop_reason: Option<StopReason>,
}

#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskSettings,
    consecutive_losses: u32,
    alerts: Vec<RiskAlert>,
    last_reset: NaiveDate,
}

impl RiskManager {
    /// The current UTC date counts as already reset.
    pub fn new(config: RiskSettings) -> Self {
        RiskManager {
            config,
            consecutive_losses: 0,
            alerts: Vec::new(),
            last_reset: Utc::now().date_naive(),
        }
    }

    pub fn config(&self) -> &RiskSettings {
        &self.config
    }

    pub fn update_config(&mut self, config: RiskSettings) {
        self.config = config;
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    pub fn last_reset(&self) -> NaiveDate {
        self.last_reset
    }

    /// Critical short-circuits warning. The alert is recorded.
    pub fn check_daily_drawdown(&mut self, portfolio: &Portfolio) -> Option<RiskAlert> {
        let alert = self.drawdown_alert(portfolio)?;
        self.alerts.push(alert.clone());
        Some(alert)
    }

    fn drawdown_alert(&self, portfolio: &Portfolio) -> Option<RiskAlert> {
        let daily_pct = portfolio.wallet.daily_return_pct();
        let magnitude = daily_pct.abs();
        let data = |threshold: f64| {
            json!({
                "daily_pnl_pct": daily_pct,
                "threshold": threshold,
                "daily_pnl": portfolio.wallet.daily_pnl,
            })
        };

        if magnitude >= self.config.daily_shutdown_threshold {
            let limit = self.config.daily_shutdown_threshold;
            Some(RiskAlert::new(
                AlertKind::DrawdownCritical,
                Severity::Critical,
                format!("daily drawdown {daily_pct:.2}% reached shutdown threshold {limit:.2}%"),
                data(limit),
            ))
        } else if magnitude >= self.config.daily_warning_threshold {
            let limit = self.config.daily_warning_threshold;
            Some(RiskAlert::new(
                AlertKind::DrawdownWarning,
                Severity::High,
                format!("daily drawdown {daily_pct:.2}% reached warning threshold {limit:.2}%"),
                data(limit),
            ))
        } else {
            None
        }
    }

    /// Size an entry of `usd_amount` notional, capped to `max_risk_pct`
    /// (percent of available balance; the configured value when `None`).
    pub fn calculate_position_size(
        &self,
        portfolio: &Portfolio,
        symbol: &str,
        price: f64,
        usd_amount: f64,
        max_risk_pct: Option<f64>,
    ) -> Result<PositionSizing, ShortbotError> {
        if !(price > 0.0) {
            return Err(ShortbotError::RiskManagement {
                reason: format!("cannot size {symbol} at non-positive price {price}"),
            });
        }
        let available = portfolio.wallet.available_balance;
        if usd_amount > available {
            return Err(ShortbotError::InsufficientBalance {
                required: usd_amount,
                available,
            });
        }

        let max_risk_pct = max_risk_pct.unwrap_or(self.config.max_portfolio_risk);
        let max_risk_usd = available * max_risk_pct / 100.0;
        let adjusted = usd_amount > max_risk_usd;
        let final_usd = if adjusted { max_risk_usd } else { usd_amount };

        Ok(PositionSizing {
            size: final_usd / price,
            adjusted,
            info: RiskInfo {
                symbol: symbol.to_string(),
                requested_usd: usd_amount,
                max_risk_usd,
                final_usd,
                max_risk_pct,
                available_balance: available,
            },
        })
    }

    /// Every alert that applies to a prospective entry. Does not block.
    pub fn validate_new_position(
        &mut self,
        portfolio: &Portfolio,
        symbol: &str,
        size: f64,
        price: f64,
    ) -> Vec<RiskAlert> {
        let mut alerts = Vec::new();

        if portfolio.position_count() >= portfolio.max_positions() {
            alerts.push(RiskAlert::new(
                AlertKind::MaxPositions,
                Severity::High,
                format!(
                    "{} open positions reached limit {}",
                    portfolio.position_count(),
                    portfolio.max_positions()
                ),
                json!({ "symbol": symbol, "open": portfolio.position_count(), "limit": portfolio.max_positions() }),
            ));
        }

        let available = portfolio.wallet.available_balance;
        let notional = size * price;
        if available <= 0.0 {
            alerts.push(RiskAlert::new(
                AlertKind::InsufficientBalance,
                Severity::High,
                format!("no available balance for {symbol}"),
                json!({ "symbol": symbol, "available": available, "notional": notional }),
            ));
        } else {
            let ratio = notional / available;
            let limit = self.config.max_portfolio_risk / 100.0;
            if ratio > limit {
                alerts.push(RiskAlert::new(
                    AlertKind::PositionSizeViolation,
                    Severity::Medium,
                    format!(
                        "{symbol} notional {notional:.4} is {:.2}% of available, limit {:.2}%",
                        ratio * 100.0,
                        self.config.max_portfolio_risk
                    ),
                    json!({ "symbol": symbol, "ratio": ratio, "limit": limit }),
                ));
            }
        }

        if self.consecutive_losses >= self.config.max_consecutive_losses {
            alerts.push(RiskAlert::new(
                AlertKind::ConsecutiveLosses,
                Severity::High,
                format!(
                    "{} consecutive losses reached limit {}",
                    self.consecutive_losses, self.config.max_consecutive_losses
                ),
                json!({ "count": self.consecutive_losses, "limit": self.config.max_consecutive_losses }),
            ));
        }

        if let Some(alert) = self.drawdown_alert(portfolio) {
            alerts.push(alert);
        }

        self.alerts.extend(alerts.iter().cloned());
        alerts
    }

    /// A strictly negative realized PnL extends the streak; anything else,
    /// including exactly zero, resets it.
    pub fn on_position_closed(&mut self, position: &Position) {
        if position.realized_pnl < 0.0 {
            self.consecutive_losses += 1;
        } else {
            self.consecutive_losses = 0;
        }
    }

    pub fn should_stop_trading(&self, portfolio: &Portfolio) -> Option<StopReason> {
        let daily_pct = portfolio.wallet.daily_return_pct();
        if daily_pct.abs() >= self.config.daily_shutdown_threshold {
            return Some(StopReason::DailyDrawdown {
                current_pct: daily_pct,
                limit_pct: self.config.daily_shutdown_threshold,
            });
        }
        if self.consecutive_losses >= self.config.max_consecutive_losses {
            return Some(StopReason::ConsecutiveLosses {
                count: self.consecutive_losses,
                limit: self.config.max_consecutive_losses,
            });
        }
        let available = portfolio.wallet.available_balance;
        if available < self.config.min_available_balance {
            return Some(StopReason::LowBalance {
                available,
                minimum: self.config.min_available_balance,
            });
        }
        None
    }

    /// Runs at most once per UTC date. Returns whether a reset happened.
    pub fn reset_daily_metrics(&mut self, portfolio: &mut Portfolio, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if today == self.last_reset {
            return false;
        }
        portfolio.reset_daily(now);
        let cutoff = now - Duration::hours(24);
        self.alerts.retain(|a| a.timestamp >= cutoff);
        self.last_reset = today;
        true
    }

    pub fn recent_alerts(&self, hours: i64) -> Vec<RiskAlert> {
        let cutoff = Utc::now() - Duration::hours(hours);
        self.alerts
            .iter()
            .filter(|a| a.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.len()
    }

    pub fn clear_alert_history(&mut self) {
        self.alerts.clear();
    }

    pub fn risk_summary(&self, portfolio: &Portfolio) -> RiskSummary {
        RiskSummary {
            daily_pnl: portfolio.wallet.daily_pnl,
            daily_return_pct: portfolio.wallet.daily_return_pct(),
            warning_threshold: self.config.daily_warning_threshold,
            shutdown_threshold: self.config.daily_shutdown_threshold,
            consecutive_losses: self.consecutive_losses,
            max_consecutive_losses: self.config.max_consecutive_losses,
            open_positions: portfolio.position_count(),
            max_positions: portfolio.max_positions(),
            available_balance: portfolio.wallet.available_balance,
            margin_used: portfolio.wallet.margin_used,
            alerts_24h: self.recent_alerts(24).len(),
            stop_reason: self.should_stop_trading(portfolio),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::PositionSide;
    use crate::domain::wallet::Wallet;

    fn portfolio(balance: f64) -> Portfolio {
        Portfolio::new(Wallet::new(balance), 5, 0.004)
    }

    fn closed_with(pnl: f64) -> Position {
        let mut p = Position::new("BTCUSDT", PositionSide::Short, 1.0, 100.0, 5.0);
        p.realized_pnl = pnl;
        p
    }

    #[test]
    fn drawdown_levels() {
        let mut rm = RiskManager::new(RiskSettings::default());
        let mut p = portfolio(1000.0);
        assert!(rm.check_daily_drawdown(&p).is_none());

        p.wallet.realize_pnl(-100.0, 0.0);
        let alert = rm.check_daily_drawdown(&p).unwrap();
        assert_eq!(alert.kind, AlertKind::DrawdownWarning);

        p.wallet.realize_pnl(-100.0, 0.0);
        let alert = rm.check_daily_drawdown(&p).unwrap();
        assert_eq!(alert.kind, AlertKind::DrawdownCritical);
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(rm.alert_count(), 2);
    }

    #[test]
    fn drawdown_at_exact_threshold_stops_trading() {
        let rm = RiskManager::new(RiskSettings::default());
        let mut p = portfolio(1000.0);
        p.wallet.realize_pnl(-150.0, 0.0);
        p.wallet.realize_pnl(-50.0, 0.0);
        assert!(matches!(
            rm.should_stop_trading(&p),
            Some(StopReason::DailyDrawdown { .. })
        ));
    }

    #[test]
    fn position_size_capped_by_risk_budget() {
        let rm = RiskManager::new(RiskSettings::default());
        let p = portfolio(1000.0);

        let sizing = rm.calculate_position_size(&p, "BTCUSDT", 100.0, 10.0, None).unwrap();
        assert!(!sizing.adjusted);
        assert!((sizing.size - 0.1).abs() < 1e-12);

        let sizing = rm.calculate_position_size(&p, "BTCUSDT", 100.0, 80.0, Some(5.0)).unwrap();
        assert!(sizing.adjusted);
        assert!((sizing.info.final_usd - 50.0).abs() < 1e-9);
        assert!((sizing.size - 0.5).abs() < 1e-9);
    }

    #[test]
    fn position_size_beyond_available_fails() {
        let rm = RiskManager::new(RiskSettings::default());
        let p = portfolio(100.0);
        let err = rm.calculate_position_size(&p, "BTCUSDT", 10.0, 500.0, None).unwrap_err();
        assert!(matches!(err, ShortbotError::InsufficientBalance { .. }));
    }

    #[test]
    fn validate_collects_alerts_without_blocking() {
        let mut rm = RiskManager::new(RiskSettings::default());
        let p = Portfolio::new(Wallet::new(1000.0), 0, 0.004);

        let alerts = rm.validate_new_position(&p, "BTCUSDT", 1.0, 100.0);
        let kinds: Vec<AlertKind> = alerts.iter().map(|a| a.kind).collect();
        assert!(kinds.contains(&AlertKind::MaxPositions));
        assert!(kinds.contains(&AlertKind::PositionSizeViolation));
        assert_eq!(rm.alert_count(), alerts.len());
    }

    #[test]
    fn small_entry_has_no_alerts() {
        let mut rm = RiskManager::new(RiskSettings::default());
        let p = portfolio(1000.0);
        assert!(rm.validate_new_position(&p, "BTCUSDT", 0.01, 100.0).is_empty());
    }

    #[test]
    fn five_losses_trip_the_breaker() {
        let mut rm = RiskManager::new(RiskSettings::default());
        let p = portfolio(1000.0);
        for _ in 0..4 {
            rm.on_position_closed(&closed_with(-1.0));
        }
        assert!(rm.should_stop_trading(&p).is_none());
        rm.on_position_closed(&closed_with(-1.0));
        assert_eq!(
            rm.should_stop_trading(&p),
            Some(StopReason::ConsecutiveLosses { count: 5, limit: 5 })
        );
        rm.on_position_closed(&closed_with(-1.0));
        assert_eq!(rm.consecutive_losses(), 6);
        assert!(matches!(
            rm.should_stop_trading(&p),
            Some(StopReason::ConsecutiveLosses { count: 6, .. })
        ));
    }

    #[test]
    fn zero_pnl_resets_the_streak() {
        let mut rm = RiskManager::new(RiskSettings::default());
        rm.on_position_closed(&closed_with(-1.0));
        rm.on_position_closed(&closed_with(-1.0));
        rm.on_position_closed(&closed_with(0.0));
        assert_eq!(rm.consecutive_losses(), 0);
    }

    #[test]
    fn low_balance_stops_trading() {
        let rm = RiskManager::new(RiskSettings::default());
        let mut p = portfolio(1000.0);
        p.wallet.reserve_margin(995.0).unwrap();
        assert!(matches!(
            rm.should_stop_trading(&p),
            Some(StopReason::LowBalance { .. })
        ));
    }

    #[test]
    fn daily_reset_once_per_date() {
        let mut rm = RiskManager::new(RiskSettings::default());
        let mut p = portfolio(1000.0);
        p.wallet.realize_pnl(-50.0, 0.0);

        assert!(!rm.reset_daily_metrics(&mut p, Utc::now()));
        assert_eq!(p.wallet.daily_pnl, -50.0);

        let tomorrow = Utc::now() + Duration::days(1);
        assert!(rm.reset_daily_metrics(&mut p, tomorrow));
        assert_eq!(p.wallet.daily_pnl, 0.0);
        assert_eq!(p.wallet.daily_start_balance, 950.0);
        assert!(!rm.reset_daily_metrics(&mut p, tomorrow));
    }

    #[test]
    fn reset_prunes_old_alerts() {
        let mut rm = RiskManager::new(RiskSettings::default());
        let mut p = portfolio(1000.0);
        p.wallet.realize_pnl(-120.0, 0.0);
        rm.check_daily_drawdown(&p);
        assert_eq!(rm.alert_count(), 1);

        rm.reset_daily_metrics(&mut p, Utc::now() + Duration::days(2));
        assert_eq!(rm.alert_count(), 0);
    }

    #[test]
    fn summary_and_clear() {
        let mut rm = RiskManager::new(RiskSettings::default());
        let mut p = portfolio(1000.0);
        p.wallet.realize_pnl(-120.0, 0.0);
        rm.check_daily_drawdown(&p);

        let summary = rm.risk_summary(&p);
        assert_eq!(summary.alerts_24h, 1);
        assert!(summary.stop_reason.is_none());
        assert_eq!(rm.recent_alerts(1).len(), 1);

        rm.clear_alert_history();
        assert!(rm.recent_alerts(24).is_empty());
    }
}
