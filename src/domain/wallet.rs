//! Single-account balance ledger.
//!
//! Invariant: `available_balance + margin_used <= balance` after every
//! mutation. Each method is one atomic step on the struct.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::error::ShortbotError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Wallet {
    pub balance: f64,
    pub available_balance: f64,
    pub margin_used: f64,
    pub unrealized_pnl: f64,
    pub daily_start_balance: f64,
    pub daily_pnl: f64,
    pub daily_trades: u32,
    pub total_realized_pnl: f64,
    pub total_commission: f64,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub last_daily_reset: DateTime<Utc>,
}

impl Wallet {
    pub fn new(initial_balance: f64) -> Self {
        Self {
            balance: initial_balance,
            available_balance: initial_balance,
            margin_used: 0.0,
            unrealized_pnl: 0.0,
            daily_start_balance: initial_balance,
            daily_pnl: 0.0,
            daily_trades: 0,
            total_realized_pnl: 0.0,
            total_commission: 0.0,
            winning_trades: 0,
            losing_trades: 0,
            last_daily_reset: Utc::now(),
        }
    }

    /// Seed from a venue account where some balance is already posted as margin.
    pub fn from_account(balance: f64, available_balance: f64) -> Self {
        let available_balance = available_balance.min(balance);
        Self {
            available_balance,
            margin_used: (balance - available_balance).max(0.0),
            ..Self::new(balance)
        }
    }

    pub fn equity(&self) -> f64 {
        self.balance + self.unrealized_pnl
    }

    /// Percent, negative on a losing day. Zero when the day started empty.
    pub fn daily_return_pct(&self) -> f64 {
        if self.daily_start_balance == 0.0 {
            return 0.0;
        }
        self.daily_pnl / self.daily_start_balance * 100.0
    }

    pub fn total_trades(&self) -> u32 {
        self.winning_trades + self.losing_trades
    }

    pub fn win_rate(&self) -> f64 {
        let total = self.total_trades();
        if total == 0 {
            return 0.0;
        }
        f64::from(self.winning_trades) / f64::from(total) * 100.0
    }

    /// Move `amount` from available balance into margin, or change nothing.
    pub fn reserve_margin(&mut self, amount: f64) -> Result<(), ShortbotError> {
        if amount > self.available_balance {
            return Err(ShortbotError::InsufficientBalance {
                required: amount,
                available: self.available_balance,
            });
        }
        self.available_balance -= amount;
        self.margin_used += amount;
        Ok(())
    }

    /// Return margin to the available balance. Margin in use never drops below
    /// zero, and only the margin actually held is credited back.
    pub fn release_margin(&mut self, amount: f64) {
        let released = amount.min(self.margin_used).max(0.0);
        self.margin_used -= released;
        self.available_balance += released;
    }

    /// Apply a closed trade. A net result of exactly zero counts as a loss.
    pub fn realize_pnl(&mut self, pnl: f64, commission: f64) {
        let net = pnl - commission;
        self.balance += net;
        self.available_balance += net;
        self.daily_pnl += net;
        self.daily_trades += 1;
        self.total_realized_pnl += net;
        self.total_commission += commission;
        if net > 0.0 {
            self.winning_trades += 1;
        } else {
            self.losing_trades += 1;
        }
    }

    /// Debit a fee that is not attached to a closing trade (entry fills).
    pub fn charge_commission(&mut self, commission: f64) {
        self.balance -= commission;
        self.available_balance -= commission;
        self.daily_pnl -= commission;
        self.total_commission += commission;
    }

    /// Credit a transfer into the account; not counted as trading PnL.
    pub fn add_balance(&mut self, amount: f64) {
        self.balance += amount;
        self.available_balance += amount;
    }

    pub fn set_unrealized_pnl(&mut self, total: f64) {
        self.unrealized_pnl = total;
    }

    pub fn reset_daily(&mut self, now: DateTime<Utc>) {
        self.daily_start_balance = self.balance;
        self.daily_pnl = 0.0;
        self.daily_trades = 0;
        self.last_daily_reset = now;
    }
}
