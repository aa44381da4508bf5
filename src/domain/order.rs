//! Exchange order attempts and their fill accounting.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => f.write_str("BUY"),
            OrderSide::Sell => f.write_str("SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => f.write_str("MARKET"),
            OrderType::Limit => f.write_str("LIMIT"),
            OrderType::Stop => f.write_str("STOP"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FillError {
    #[error("order is {0:?} and accepts no further fills")]
    Terminal(OrderStatus),
    #[error("fill quantity must be positive, got {0}")]
    NonPositiveQuantity(f64),
    #[error("fill price must be positive, got {0}")]
    NonPositivePrice(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: Option<f64>,
    pub stop_price: Option<f64>,
    pub reduce_only: bool,
    pub status: OrderStatus,
    pub filled_quantity: f64,
    pub avg_price: f64,
    pub commission: f64,
    pub commission_asset: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub exchange_order_id: Option<String>,
}

impl Order {
    pub fn new(symbol: &str, side: OrderSide, order_type: OrderType, quantity: f64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            order_type,
            quantity,
            price: None,
            stop_price: None,
            reduce_only: false,
            status: OrderStatus::New,
            filled_quantity: 0.0,
            avg_price: 0.0,
            commission: 0.0,
            commission_asset: "USDT".to_string(),
            created_at: now,
            updated_at: now,
            filled_at: None,
            exchange_order_id: None,
        }
    }

    pub fn market(symbol: &str, side: OrderSide, quantity: f64) -> Self {
        Self::new(symbol, side, OrderType::Market, quantity)
    }

    pub fn remaining_quantity(&self) -> f64 {
        (self.quantity - self.filled_quantity).max(0.0)
    }

    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    /// Apply one fill. The quantity is clamped to what remains, so filled never
    /// exceeds requested; the average price stays the notional-weighted mean.
    /// Returns the quantity actually applied.
    pub fn fill(&mut self, quantity: f64, price: f64, commission: f64) -> Result<f64, FillError> {
        if self.status.is_terminal() {
            return Err(FillError::Terminal(self.status));
        }
        if !(quantity > 0.0) {
            return Err(FillError::NonPositiveQuantity(quantity));
        }
        if !(price > 0.0) {
            return Err(FillError::NonPositivePrice(price));
        }

        let applied = quantity.min(self.remaining_quantity());
        let prior_notional = self.avg_price * self.filled_quantity;
        self.filled_quantity += applied;
        self.avg_price = (prior_notional + applied * price) / self.filled_quantity;
        self.commission += commission;

        let now = Utc::now();
        self.updated_at = now;
        if self.filled_quantity >= self.quantity {
            self.filled_quantity = self.quantity;
            self.status = OrderStatus::Filled;
            self.filled_at = Some(now);
        } else {
            self.status = OrderStatus::PartiallyFilled;
        }
        Ok(applied)
    }

    pub fn cancel(&mut self) -> bool {
        self.finish(OrderStatus::Canceled)
    }

    pub fn reject(&mut self) -> bool {
        self.finish(OrderStatus::Rejected)
    }

    pub fn expire(&mut self) -> bool {
        self.finish(OrderStatus::Expired)
    }

    fn finish(&mut self, status: OrderStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.updated_at = Utc::now();
        true
    }
}
