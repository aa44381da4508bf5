#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
pub use shortbot::domain::ohlcv::OhlcvBar;
use shortbot::domain::error::ShortbotError;
use shortbot::domain::order::OrderStatus;
use shortbot::domain::settings::{BotSettings, SignalLogic};
use shortbot::engine::{EngineState, EventKind, TradeEngine, TradingEvent};
use shortbot::ports::exchange_port::{
    AccountInfo, AssetBalance, ExchangePort, ExchangePosition, OrderAck, OrderRequest, TickerStat,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Scripted exchange: fills market orders at exactly the configured price.
pub struct MockExchange {
    state: Mutex<MockState>,
}

struct MockState {
    reachable: bool,
    connected: bool,
    gainers: Vec<TickerStat>,
    klines: HashMap<String, Vec<OhlcvBar>>,
    failing_klines: HashSet<String>,
    failing_orders: HashSet<String>,
    prices: HashMap<String, f64>,
    orders: Vec<OrderRequest>,
    close_fill_ratio: f64,
    next_id: u64,
    account: AccountInfo,
    positions: Vec<ExchangePosition>,
}

impl MockExchange {
    pub fn new() -> Self {
        MockExchange {
            state: Mutex::new(MockState {
                reachable: true,
                connected: false,
                gainers: Vec::new(),
                klines: HashMap::new(),
                failing_klines: HashSet::new(),
                failing_orders: HashSet::new(),
                prices: HashMap::new(),
                orders: Vec::new(),
                close_fill_ratio: 1.0,
                next_id: 1,
                account: AccountInfo {
                    total_wallet_balance: 1000.0,
                    available_balance: 1000.0,
                    total_unrealized_profit: 0.0,
                    total_margin_balance: 1000.0,
                },
                positions: Vec::new(),
            }),
        }
    }

    /// Listed as a gainer, priced, and given 60 rising bars.
    pub fn with_candidate(self, symbol: &str, change_pct: f64, price: f64) -> Self {
        self.with_gainer(symbol, change_pct, price)
            .with_klines(symbol, rising_bars(symbol, 60, price * 0.9, price * 0.1 / 59.0))
    }

    pub fn with_gainer(self, symbol: &str, change_pct: f64, price: f64) -> Self {
        {
            let mut s = self.state.lock().unwrap();
            s.gainers.push(TickerStat {
                symbol: symbol.to_string(),
                price_change_percent: change_pct,
                last_price: price,
                high_price: price,
                low_price: price,
                volume: 1_000_000.0,
                count: 10_000,
            });
            s.gainers
                .sort_by(|a, b| b.price_change_percent.total_cmp(&a.price_change_percent));
            s.prices.insert(symbol.to_string(), price);
        }
        self
    }

    pub fn with_klines(self, symbol: &str, bars: Vec<OhlcvBar>) -> Self {
        self.state
            .lock()
            .unwrap()
            .klines
            .insert(symbol.to_string(), bars);
        self
    }

    pub fn with_failing_klines(self, symbol: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_klines
            .insert(symbol.to_string());
        self
    }

    pub fn unreachable(self) -> Self {
        self.state.lock().unwrap().reachable = false;
        self
    }

    pub fn with_account(self, balance: f64, available: f64) -> Self {
        self.state.lock().unwrap().account = AccountInfo {
            total_wallet_balance: balance,
            available_balance: available,
            total_unrealized_profit: 0.0,
            total_margin_balance: balance,
        };
        self
    }

    pub fn with_position(self, position: ExchangePosition) -> Self {
        self.state.lock().unwrap().positions.push(position);
        self
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.state
            .lock()
            .unwrap()
            .prices
            .insert(symbol.to_string(), price);
    }

    pub fn fail_orders_for(&self, symbol: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_orders
            .insert(symbol.to_string());
    }

    /// Reduce-only orders execute this share of their quantity; the rest expires.
    pub fn set_close_fill_ratio(&self, ratio: f64) {
        self.state.lock().unwrap().close_fill_ratio = ratio;
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.state.lock().unwrap().orders.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }
}

#[async_trait]
impl ExchangePort for MockExchange {
    async fn connect(&self) -> Result<(), ShortbotError> {
        self.state.lock().unwrap().connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ShortbotError> {
        self.state.lock().unwrap().connected = false;
        Ok(())
    }

    async fn test_connection(&self) -> bool {
        let s = self.state.lock().unwrap();
        s.reachable && s.connected
    }

    async fn get_top_gainers(&self, limit: usize) -> Result<Vec<TickerStat>, ShortbotError> {
        let s = self.state.lock().unwrap();
        Ok(s.gainers.iter().take(limit).cloned().collect())
    }

    async fn get_klines(
        &self,
        symbol: &str,
        _interval: &str,
        limit: usize,
    ) -> Result<Vec<OhlcvBar>, ShortbotError> {
        let s = self.state.lock().unwrap();
        if s.failing_klines.contains(symbol) {
            return Err(ShortbotError::Api {
                code: -1003,
                message: "Too many requests".to_string(),
            });
        }
        let bars = s.klines.get(symbol).cloned().unwrap_or_default();
        let skip = bars.len().saturating_sub(limit);
        Ok(bars.into_iter().skip(skip).collect())
    }

    async fn get_ticker_price(&self, symbol: &str) -> Result<f64, ShortbotError> {
        let s = self.state.lock().unwrap();
        s.prices
            .get(symbol)
            .copied()
            .ok_or_else(|| ShortbotError::InvalidSymbol {
                symbol: symbol.to_string(),
            })
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<OrderAck, ShortbotError> {
        let mut s = self.state.lock().unwrap();
        if s.failing_orders.contains(&request.symbol) {
            return Err(ShortbotError::Api {
                code: -2019,
                message: "Margin is insufficient.".to_string(),
            });
        }
        let price = s
            .prices
            .get(&request.symbol)
            .copied()
            .ok_or_else(|| ShortbotError::InvalidSymbol {
                symbol: request.symbol.clone(),
            })?;
        let ratio = if request.reduce_only { s.close_fill_ratio } else { 1.0 };
        s.orders.push(request.clone());
        s.next_id += 1;
        Ok(OrderAck {
            order_id: s.next_id.to_string(),
            symbol: request.symbol.clone(),
            status: if ratio < 1.0 {
                OrderStatus::Expired
            } else {
                OrderStatus::Filled
            },
            executed_qty: request.quantity * ratio,
            avg_price: price,
        })
    }

    async fn get_account_info(&self) -> Result<AccountInfo, ShortbotError> {
        Ok(self.state.lock().unwrap().account.clone())
    }

    async fn get_balance(&self) -> Result<Vec<AssetBalance>, ShortbotError> {
        let s = self.state.lock().unwrap();
        Ok(vec![AssetBalance {
            asset: "USDT".to_string(),
            balance: s.account.total_wallet_balance,
            available_balance: s.account.available_balance,
        }])
    }

    async fn get_positions(&self) -> Result<Vec<ExchangePosition>, ShortbotError> {
        Ok(self.state.lock().unwrap().positions.clone())
    }
}

fn bar(symbol: &str, i: usize, open: f64, close: f64) -> OhlcvBar {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    OhlcvBar {
        symbol: symbol.to_string(),
        open_time: start + Duration::minutes(15 * i as i64),
        open,
        high: open.max(close),
        low: open.min(close),
        close,
        volume: 1000.0,
    }
}

/// Closes rise by `step` per bar; each bar opens at the previous close.
pub fn rising_bars(symbol: &str, n: usize, start: f64, step: f64) -> Vec<OhlcvBar> {
    (0..n)
        .map(|i| {
            let close = start + step * i as f64;
            let open = if i == 0 { close } else { close - step };
            bar(symbol, i, open, close)
        })
        .collect()
}

pub fn falling_bars(symbol: &str, n: usize, start: f64, step: f64) -> Vec<OhlcvBar> {
    (0..n)
        .map(|i| {
            let close = start - step * i as f64;
            let open = if i == 0 { close } else { close + step };
            bar(symbol, i, open, close)
        })
        .collect()
}

/// Paper settings that short any candidate with rising bars.
pub fn eager_settings() -> BotSettings {
    let mut settings = BotSettings::default();
    settings.strategy.signal_logic = SignalLogic::AnyTrue;
    settings.app.listener_timeout = std::time::Duration::from_secs(1);
    settings
}

pub async fn ready_engine(settings: BotSettings, exchange: Arc<MockExchange>) -> TradeEngine {
    let engine = TradeEngine::with_exchange(settings, exchange);
    engine.initialize().await.unwrap();
    engine
}

/// Collects every event of the given kinds.
pub fn record(engine: &TradeEngine, kinds: &[EventKind]) -> Arc<Mutex<Vec<TradingEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for &kind in kinds {
        let log = log.clone();
        engine.subscribe(kind, move |event| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(event);
                Ok(())
            }
        });
    }
    log
}

pub fn count_kind(log: &Arc<Mutex<Vec<TradingEvent>>>, kind: EventKind) -> usize {
    log.lock().unwrap().iter().filter(|e| e.kind() == kind).count()
}

/// Events published from spawned tasks land asynchronously.
pub async fn wait_for_count(
    log: &Arc<Mutex<Vec<TradingEvent>>>,
    kind: EventKind,
    expected: usize,
) -> bool {
    for _ in 0..200 {
        if count_kind(log, kind) >= expected {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}

pub async fn wait_for_state(engine: &TradeEngine, state: EngineState) -> bool {
    for _ in 0..200 {
        if engine.state() == state {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}
