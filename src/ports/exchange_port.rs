//! Exchange access port.
//!
//! Implemented by the in-process paper simulator and the live REST client.
//! Market orders fill synchronously from the caller's point of view.

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::error::ShortbotError;
use crate::domain::ohlcv::OhlcvBar;
use crate::domain::order::{OrderSide, OrderStatus, OrderType};

/// 24h statistics for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickerStat {
    pub symbol: String,
    pub price_change_percent: f64,
    pub last_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub volume: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: Option<f64>,
    pub reduce_only: bool,
}

impl OrderRequest {
    pub fn market(symbol: &str, side: OrderSide, quantity: f64) -> Self {
        OrderRequest {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            reduce_only: false,
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderAck {
    pub order_id: String,
    pub symbol: String,
    pub status: OrderStatus,
    pub executed_qty: f64,
    pub avg_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountInfo {
    pub total_wallet_balance: f64,
    pub available_balance: f64,
    pub total_unrealized_profit: f64,
    pub total_margin_balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetBalance {
    pub asset: String,
    pub balance: f64,
    pub available_balance: f64,
}

/// A venue-side position. `position_amt` is negative for shorts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangePosition {
    pub symbol: String,
    pub position_amt: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_profit: f64,
    pub liquidation_price: Option<f64>,
}

#[async_trait]
pub trait ExchangePort: Send + Sync {
    async fn connect(&self) -> Result<(), ShortbotError>;
    async fn disconnect(&self) -> Result<(), ShortbotError>;
    async fn test_connection(&self) -> bool;

    /// Sorted by 24h change, highest first, within the tradable universe.
    async fn get_top_gainers(&self, limit: usize) -> Result<Vec<TickerStat>, ShortbotError>;

    /// Oldest bar first.
    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<OhlcvBar>, ShortbotError>;

    async fn get_ticker_price(&self, symbol: &str) -> Result<f64, ShortbotError>;
    async fn create_order(&self, request: &OrderRequest) -> Result<OrderAck, ShortbotError>;
    async fn get_account_info(&self) -> Result<AccountInfo, ShortbotError>;
    async fn get_balance(&self) -> Result<Vec<AssetBalance>, ShortbotError>;
    async fn get_positions(&self) -> Result<Vec<ExchangePosition>, ShortbotError>;
}

/// Milliseconds per bar for a kline interval such as `15m` or `4h`.
pub fn interval_millis(interval: &str) -> Option<i64> {
    if !interval.is_ascii() {
        return None;
    }
    let (count, unit) = interval.split_at(interval.len().checked_sub(1)?);
    let count: i64 = count.parse().ok().filter(|c| *c > 0)?;
    let unit_ms = match unit {
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        "w" => 604_800_000,
        _ => return None,
    };
    Some(count * unit_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_parsing() {
        assert_eq!(interval_millis("1m"), Some(60_000));
        assert_eq!(interval_millis("15m"), Some(900_000));
        assert_eq!(interval_millis("4h"), Some(14_400_000));
        assert_eq!(interval_millis("1w"), Some(604_800_000));
        assert_eq!(interval_millis("0m"), None);
        assert_eq!(interval_millis("m"), None);
        assert_eq!(interval_millis(""), None);
        assert_eq!(interval_millis("3y"), None);
    }

    #[test]
    fn reduce_only_builder() {
        let req = OrderRequest::market("BTCUSDT", OrderSide::Buy, 0.5).reduce_only();
        assert!(req.reduce_only);
        assert_eq!(req.order_type, OrderType::Market);
        assert_eq!(req.price, None);
    }
}
