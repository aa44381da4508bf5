//! Ledger aggregate: one wallet, open positions by symbol, orders by id.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::ShortbotError;
use super::order::Order;
use super::position::{Position, PositionSide};
use super::wallet::Wallet;

/// A filled opening order, ready to become a position. The margin must
/// already be reserved on the wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryFill {
    pub symbol: String,
    pub side: PositionSide,
    pub size: f64,
    pub price: f64,
    pub margin: f64,
    pub commission: f64,
    /// Percent; `None` leaves the position without a take-profit.
    pub take_profit_pct: Option<f64>,
    pub order_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSnapshot {
    pub balance: f64,
    pub available_balance: f64,
    pub margin_used: f64,
    pub unrealized_pnl: f64,
    pub equity: f64,
    pub daily_pnl: f64,
    pub daily_return_pct: f64,
    pub open_positions: usize,
    pub orders: usize,
    pub total_trades: u32,
    pub win_rate: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub wallet: Wallet,
    max_positions: usize,
    maintenance_margin_rate: f64,
    positions: HashMap<String, Position>,
    closed_positions: Vec<Position>,
    orders: HashMap<String, Order>,
}

impl Portfolio {
    pub fn new(wallet: Wallet, max_positions: usize, maintenance_margin_rate: f64) -> Self {
        Portfolio {
            wallet,
            max_positions,
            maintenance_margin_rate,
            positions: HashMap::new(),
            closed_positions: Vec::new(),
            orders: HashMap::new(),
        }
    }

    pub fn max_positions(&self) -> usize {
        self.max_positions
    }

    pub fn set_max_positions(&mut self, max_positions: usize) {
        self.max_positions = max_positions;
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    /// Open positions ordered by symbol.
    pub fn open_positions(&self) -> Vec<&Position> {
        let mut open: Vec<&Position> = self.positions.values().collect();
        open.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        open
    }

    pub fn open_symbols(&self) -> Vec<String> {
        self.open_positions().iter().map(|p| p.symbol.clone()).collect()
    }

    pub fn closed_positions(&self) -> &[Position] {
        &self.closed_positions
    }

    pub fn can_open_position(&self, symbol: &str) -> bool {
        !self.has_position(symbol) && self.position_count() < self.max_positions
    }

    pub fn record_order(&mut self, order: Order) {
        self.orders.insert(order.id.clone(), order);
    }

    pub fn order(&self, id: &str) -> Option<&Order> {
        self.orders.get(id)
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    /// Book a new position from an entry fill and charge its commission.
    pub fn open_position(&mut self, fill: EntryFill) -> Result<&Position, ShortbotError> {
        if self.has_position(&fill.symbol) {
            return Err(ShortbotError::InvalidState {
                reason: format!("position already open for {}", fill.symbol),
            });
        }

        let mut position = Position::new(&fill.symbol, fill.side, fill.size, fill.price, fill.margin);
        position.set_liquidation_price(self.maintenance_margin_rate);
        if let Some(tp) = fill.take_profit_pct {
            position.set_take_profit(tp);
        }
        position.commission = fill.commission;
        if let Some(id) = fill.order_id {
            position.entry_order_ids.push(id);
        }

        self.wallet.charge_commission(fill.commission);
        let symbol = fill.symbol;
        self.positions.insert(symbol.clone(), position);
        self.refresh_unrealized();
        self.positions
            .get(&symbol)
            .ok_or_else(|| ShortbotError::InvalidState {
                reason: format!("position for {symbol} vanished after insert"),
            })
    }

    /// Adopt a position that already exists on the venue. The wallet is
    /// expected to carry its margin already.
    pub fn import_position(&mut self, mut position: Position) -> bool {
        if self.has_position(&position.symbol) {
            return false;
        }
        if position.liquidation_price.is_none() {
            position.set_liquidation_price(self.maintenance_margin_rate);
        }
        self.positions.insert(position.symbol.clone(), position);
        self.refresh_unrealized();
        true
    }

    pub fn add_exit_order(&mut self, symbol: &str, order_id: &str) -> bool {
        match self.positions.get_mut(symbol) {
            Some(pos) => {
                pos.exit_order_ids.push(order_id.to_string());
                true
            }
            None => false,
        }
    }

    /// Close at `price`. Returns `None` and touches nothing when no position
    /// is open for `symbol`.
    pub fn close_position(&mut self, symbol: &str, price: f64, commission: f64) -> Option<Position> {
        let mut position = self.positions.remove(symbol)?;
        let gross = position.close(price, commission);
        self.wallet.release_margin(position.margin);
        self.wallet.realize_pnl(gross, commission);
        self.closed_positions.push(position.clone());
        self.refresh_unrealized();
        Some(position)
    }

    /// Close `quantity` at `price`. Covering the whole size is a full close;
    /// less books the slice and leaves the rest open with its share of margin.
    pub fn reduce_position(
        &mut self,
        symbol: &str,
        quantity: f64,
        price: f64,
        commission: f64,
    ) -> Option<Position> {
        let size = self.positions.get(symbol)?.size;
        if !(quantity > 0.0) {
            return None;
        }
        if quantity >= size * (1.0 - 1e-9) {
            return self.close_position(symbol, price, commission);
        }

        let mut part = self.positions.get_mut(symbol)?.split_off(quantity);
        let gross = part.close(price, commission);
        self.wallet.release_margin(part.margin);
        self.wallet.realize_pnl(gross, commission);
        self.closed_positions.push(part.clone());
        self.refresh_unrealized();
        Some(part)
    }

    /// Forced close losing exactly the posted margin.
    pub fn liquidate_position(&mut self, symbol: &str) -> Option<Position> {
        let mut position = self.positions.remove(symbol)?;
        position.liquidate();
        self.wallet.release_margin(position.margin);
        self.wallet.realize_pnl(-position.margin, 0.0);
        self.closed_positions.push(position.clone());
        self.refresh_unrealized();
        Some(position)
    }

    pub fn update_mark_prices(&mut self, prices: &HashMap<String, f64>) {
        for (symbol, position) in self.positions.iter_mut() {
            if let Some(&price) = prices.get(symbol) {
                position.update_mark_price(price);
            }
        }
        self.refresh_unrealized();
    }

    /// Symbols whose take-profit has been reached, ordered by symbol.
    pub fn check_take_profits(&self) -> Vec<String> {
        self.open_positions()
            .into_iter()
            .filter(|p| p.check_take_profit())
            .map(|p| p.symbol.clone())
            .collect()
    }

    pub fn check_liquidations(&self) -> Vec<String> {
        self.open_positions()
            .into_iter()
            .filter(|p| p.check_liquidation())
            .map(|p| p.symbol.clone())
            .collect()
    }

    pub fn total_unrealized_pnl(&self) -> f64 {
        self.positions.values().map(|p| p.unrealized_pnl).sum()
    }

    pub fn reset_daily(&mut self, now: DateTime<Utc>) {
        self.wallet.reset_daily(now);
    }

    pub fn snapshot(&self) -> PortfolioSnapshot {
        PortfolioSnapshot {
            balance: self.wallet.balance,
            available_balance: self.wallet.available_balance,
            margin_used: self.wallet.margin_used,
            unrealized_pnl: self.wallet.unrealized_pnl,
            equity: self.wallet.equity(),
            daily_pnl: self.wallet.daily_pnl,
            daily_return_pct: self.wallet.daily_return_pct(),
            open_positions: self.position_count(),
            orders: self.order_count(),
            total_trades: self.wallet.total_trades(),
            win_rate: self.wallet.win_rate(),
        }
    }

    fn refresh_unrealized(&mut self) {
        let total = self.total_unrealized_pnl();
        self.wallet.set_unrealized_pnl(total);
    }
}
