//! Directional exposure in one symbol.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => f.write_str("long"),
            PositionSide::Short => f.write_str("short"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
    Liquidated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub side: PositionSide,
    /// Always positive; direction lives in `side`.
    pub size: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub liquidation_price: Option<f64>,
    pub status: PositionStatus,
    pub margin: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub commission: f64,
    pub take_profit_price: Option<f64>,
    pub take_profit_pct: Option<f64>,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub entry_order_ids: Vec<String>,
    pub exit_order_ids: Vec<String>,
}

impl Position {
    pub fn new(symbol: &str, side: PositionSide, size: f64, entry_price: f64, margin: f64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            size,
            entry_price,
            mark_price: entry_price,
            liquidation_price: None,
            status: PositionStatus::Open,
            margin,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            commission: 0.0,
            take_profit_price: None,
            take_profit_pct: None,
            opened_at: now,
            updated_at: now,
            closed_at: None,
            entry_order_ids: Vec::new(),
            exit_order_ids: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn is_short(&self) -> bool {
        self.side == PositionSide::Short
    }

    pub fn is_long(&self) -> bool {
        self.side == PositionSide::Long
    }

    pub fn notional_value(&self) -> f64 {
        self.size * self.mark_price
    }

    /// (entry - mark) × size for short, (mark - entry) × size for long.
    pub fn pnl_at(&self, price: f64) -> f64 {
        match self.side {
            PositionSide::Short => (self.entry_price - price) * self.size,
            PositionSide::Long => (price - self.entry_price) * self.size,
        }
    }

    pub fn update_mark_price(&mut self, price: f64) {
        self.mark_price = price;
        self.unrealized_pnl = self.pnl_at(price);
        self.updated_at = Utc::now();
    }

    /// Short: entry × (1 + rate). Long: entry × (1 - rate).
    pub fn set_liquidation_price(&mut self, maintenance_margin_rate: f64) {
        let price = match self.side {
            PositionSide::Short => self.entry_price * (1.0 + maintenance_margin_rate),
            PositionSide::Long => self.entry_price * (1.0 - maintenance_margin_rate),
        };
        self.liquidation_price = Some(price);
    }

    /// `tp_pct` is a percentage, e.g. 5.0 for 5%.
    pub fn set_take_profit(&mut self, tp_pct: f64) {
        let fraction = tp_pct / 100.0;
        let price = match self.side {
            PositionSide::Short => self.entry_price * (1.0 - fraction),
            PositionSide::Long => self.entry_price * (1.0 + fraction),
        };
        self.take_profit_pct = Some(tp_pct);
        self.take_profit_price = Some(price);
    }

    pub fn check_take_profit(&self) -> bool {
        let Some(tp) = self.take_profit_price else {
            return false;
        };
        if !self.is_open() {
            return false;
        }
        match self.side {
            PositionSide::Short => self.mark_price <= tp,
            PositionSide::Long => self.mark_price >= tp,
        }
    }

    pub fn check_liquidation(&self) -> bool {
        let Some(liq) = self.liquidation_price else {
            return false;
        };
        if !self.is_open() {
            return false;
        }
        match self.side {
            PositionSide::Short => self.mark_price >= liq,
            PositionSide::Long => self.mark_price <= liq,
        }
    }

    /// Fix realized PnL net of the exit commission and zero the unrealized.
    /// Returns the gross PnL at `exit_price`.
    pub(crate) fn close(&mut self, exit_price: f64, commission: f64) -> f64 {
        let gross = self.pnl_at(exit_price);
        let now = Utc::now();
        self.mark_price = exit_price;
        self.commission += commission;
        self.realized_pnl = gross - commission;
        self.unrealized_pnl = 0.0;
        self.status = PositionStatus::Closed;
        self.closed_at = Some(now);
        self.updated_at = now;
        gross
    }

    /// Carve `quantity` off into its own position carrying a proportional
    /// share of margin and entry commission. The remainder keeps its prices.
    pub(crate) fn split_off(&mut self, quantity: f64) -> Position {
        let fraction = (quantity / self.size).clamp(0.0, 1.0);
        let mut part = self.clone();
        part.id = Uuid::new_v4().to_string();
        part.size = quantity;
        part.margin = self.margin * fraction;
        part.commission = self.commission * fraction;
        part.unrealized_pnl = part.pnl_at(part.mark_price);

        self.size -= quantity;
        self.margin -= part.margin;
        self.commission -= part.commission;
        self.unrealized_pnl = self.pnl_at(self.mark_price);
        self.updated_at = Utc::now();
        part
    }

    /// Total loss of posted margin.
    pub(crate) fn liquidate(&mut self) {
        let now = Utc::now();
        if let Some(liq) = self.liquidation_price {
            self.mark_price = liq;
        }
        self.realized_pnl = -self.margin;
        self.unrealized_pnl = 0.0;
        self.status = PositionStatus::Liquidated;
        self.closed_at = Some(now);
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short(entry: f64) -> Position {
        Position::new("BTCUSDT", PositionSide::Short, 2.0, entry, entry * 2.0 * 0.05)
    }

    #[test]
    fn short_pnl_sign_follows_mark() {
        let mut pos = short(100.0);
        pos.update_mark_price(95.0);
        assert!((pos.unrealized_pnl - 10.0).abs() < f64::EPSILON);
        pos.update_mark_price(105.0);
        assert!((pos.unrealized_pnl + 10.0).abs() < f64::EPSILON);
        pos.update_mark_price(100.0);
        assert_eq!(pos.unrealized_pnl, 0.0);
    }

    #[test]
    fn long_pnl_sign_follows_mark() {
        let mut pos = Position::new("BTCUSDT", PositionSide::Long, 1.0, 100.0, 5.0);
        pos.update_mark_price(110.0);
        assert!(pos.unrealized_pnl > 0.0);
        pos.update_mark_price(90.0);
        assert!(pos.unrealized_pnl < 0.0);
    }

    #[test]
    fn liquidation_price_exact() {
        let mut pos = short(100.0);
        pos.set_liquidation_price(0.004);
        assert_eq!(pos.liquidation_price, Some(100.0 * 1.004));
        assert!((pos.liquidation_price.unwrap() - 100.4).abs() < 1e-9);

        let mut long = Position::new("BTCUSDT", PositionSide::Long, 1.0, 100.0, 5.0);
        long.set_liquidation_price(0.004);
        assert!((long.liquidation_price.unwrap() - 99.6).abs() < 1e-9);
    }

    #[test]
    fn take_profit_price_and_trigger() {
        let mut pos = short(100.0);
        pos.set_take_profit(5.0);
        assert!((pos.take_profit_price.unwrap() - 95.0).abs() < 1e-9);
        assert_eq!(pos.take_profit_pct, Some(5.0));

        pos.update_mark_price(96.0);
        assert!(!pos.check_take_profit());
        pos.update_mark_price(95.0);
        assert!(pos.check_take_profit());
    }

    #[test]
    fn liquidation_trigger_short() {
        let mut pos = short(100.0);
        pos.set_liquidation_price(0.004);
        pos.update_mark_price(100.3);
        assert!(!pos.check_liquidation());
        pos.update_mark_price(100.5);
        assert!(pos.check_liquidation());
    }

    #[test]
    fn triggers_need_configured_prices() {
        let mut pos = short(100.0);
        pos.update_mark_price(1.0);
        assert!(!pos.check_take_profit());
        assert!(!pos.check_liquidation());
    }

    #[test]
    fn close_nets_commission_and_zeroes_unrealized() {
        let mut pos = short(100.0);
        pos.update_mark_price(90.0);
        let gross = pos.close(90.0, 0.5);
        assert!((gross - 20.0).abs() < f64::EPSILON);
        assert!((pos.realized_pnl - 19.5).abs() < f64::EPSILON);
        assert_eq!(pos.unrealized_pnl, 0.0);
        assert_eq!(pos.status, PositionStatus::Closed);
        assert!(!pos.check_take_profit());
    }

    #[test]
    fn liquidate_loses_exact_margin() {
        let mut pos = short(100.0);
        pos.set_liquidation_price(0.004);
        pos.liquidate();
        assert_eq!(pos.realized_pnl, -pos.margin);
        assert_eq!(pos.unrealized_pnl, 0.0);
        assert_eq!(pos.status, PositionStatus::Liquidated);
    }
}
