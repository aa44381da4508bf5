//! In-process market simulator for paper trading.
//!
//! Ten USDT perpetuals follow a bounded random walk. Market orders fill at
//! once across a 0.1% spread and pay the taker fee; the simulator keeps its
//! own venue-side balance and positions so reconciliation calls answer the
//! way a real account would.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::domain::error::ShortbotError;
use crate::domain::ohlcv::OhlcvBar;
use crate::domain::order::{OrderSide, OrderStatus};
use crate::domain::settings::PaperSettings;
use crate::ports::exchange_port::{
    interval_millis, AccountInfo, AssetBalance, ExchangePort, ExchangePosition, OrderAck,
    OrderRequest, TickerStat,
};

const UNIVERSE: [(&str, f64); 10] = [
    ("BTCUSDT", 45000.0),
    ("ETHUSDT", 2500.0),
    ("BNBUSDT", 300.0),
    ("ADAUSDT", 0.5),
    ("SOLUSDT", 100.0),
    ("DOGEUSDT", 0.08),
    ("XRPUSDT", 0.6),
    ("DOTUSDT", 7.0),
    ("AVAXUSDT", 35.0),
    ("LINKUSDT", 15.0),
];

const SPREAD: f64 = 0.001;
const TAKER_FEE: f64 = 0.0004;
const MARGIN_RATE: f64 = 0.05;
/// Per-step price move bound before the per-ticker multiplier.
const DEFAULT_VOLATILITY: f64 = 0.004;
const QUOTE_ASSET: &str = "USDT";

#[derive(Debug, Clone)]
struct PaperTicker {
    base_price: f64,
    price: f64,
    high_24h: f64,
    low_24h: f64,
    volume_24h: f64,
    volatility: f64,
}

impl PaperTicker {
    fn change_percent(&self) -> f64 {
        (self.price - self.base_price) / self.base_price * 100.0
    }

    fn set_price(&mut self, price: f64) {
        self.price = price;
        self.high_24h = self.high_24h.max(price);
        self.low_24h = self.low_24h.min(price);
    }
}

#[derive(Debug, Clone, Copy)]
struct PaperPosition {
    /// Negative for shorts.
    amount: f64,
    entry_price: f64,
    margin: f64,
}

struct PaperState {
    rng: StdRng,
    tickers: BTreeMap<String, PaperTicker>,
    positions: HashMap<String, PaperPosition>,
    balance: f64,
    connected: bool,
    next_order_id: u64,
}

impl PaperState {
    fn step_market(&mut self) {
        for ticker in self.tickers.values_mut() {
            let bound = ticker.volatility;
            let change = if bound > 0.0 {
                self.rng.gen_range(-bound..bound)
            } else {
                0.0
            };
            let next = (ticker.price * (1.0 + change))
                .clamp(ticker.base_price * 0.5, ticker.base_price * 2.0);
            ticker.set_price(next);
        }
    }

    fn ticker(&self, symbol: &str) -> Result<&PaperTicker, ShortbotError> {
        self.tickers.get(symbol).ok_or_else(|| ShortbotError::InvalidSymbol {
            symbol: symbol.to_string(),
        })
    }

    fn margin_in_use(&self) -> f64 {
        self.positions.values().map(|p| p.margin).sum()
    }

    fn unrealized(&self) -> f64 {
        self.positions
            .iter()
            .filter_map(|(symbol, p)| {
                self.tickers
                    .get(symbol)
                    .map(|t| (t.price - p.entry_price) * p.amount)
            })
            .sum()
    }

    fn available(&self) -> f64 {
        self.balance - self.margin_in_use()
    }

    fn ensure_connected(&self) -> Result<(), ShortbotError> {
        if self.connected {
            Ok(())
        } else {
            Err(ShortbotError::Transport {
                reason: "paper exchange is not connected".to_string(),
            })
        }
    }
}

pub struct PaperExchange {
    state: Mutex<PaperState>,
    initial_balance: f64,
}

impl PaperExchange {
    pub fn new(settings: &PaperSettings) -> Self {
        Self::with_volatility(settings, DEFAULT_VOLATILITY)
    }

    /// A volatility of zero freezes prices until [`PaperExchange::set_price`].
    pub fn with_volatility(settings: &PaperSettings, volatility: f64) -> Self {
        let mut rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let tickers = UNIVERSE
            .iter()
            .map(|&(symbol, base_price)| {
                let ticker = PaperTicker {
                    base_price,
                    price: base_price,
                    high_24h: base_price,
                    low_24h: base_price,
                    volume_24h: rng.gen_range(10_000.0..1_000_000.0),
                    volatility: volatility * rng.gen_range(0.5..1.5),
                };
                (symbol.to_string(), ticker)
            })
            .collect();

        PaperExchange {
            state: Mutex::new(PaperState {
                rng,
                tickers,
                positions: HashMap::new(),
                balance: settings.initial_balance,
                connected: false,
                next_order_id: 100_000,
            }),
            initial_balance: settings.initial_balance,
        }
    }

    pub fn initial_balance(&self) -> f64 {
        self.initial_balance
    }

    pub fn symbols() -> Vec<&'static str> {
        UNIVERSE.iter().map(|(s, _)| *s).collect()
    }

    /// Move a market by hand. Returns false for symbols outside the universe.
    pub fn set_price(&self, symbol: &str, price: f64) -> bool {
        let mut state = self.lock();
        match state.tickers.get_mut(symbol) {
            Some(ticker) => {
                ticker.set_price(price);
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ExchangePort for PaperExchange {
    async fn connect(&self) -> Result<(), ShortbotError> {
        self.lock().connected = true;
        info!(balance = self.initial_balance, "paper exchange connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ShortbotError> {
        self.lock().connected = false;
        info!("paper exchange disconnected");
        Ok(())
    }

    async fn test_connection(&self) -> bool {
        self.lock().connected
    }

    async fn get_top_gainers(&self, limit: usize) -> Result<Vec<TickerStat>, ShortbotError> {
        let mut state = self.lock();
        state.ensure_connected()?;
        state.step_market();

        let mut stats: Vec<TickerStat> = Vec::with_capacity(state.tickers.len());
        for (symbol, t) in &state.tickers {
            stats.push(TickerStat {
                symbol: symbol.clone(),
                price_change_percent: t.change_percent(),
                last_price: t.price,
                high_price: t.high_24h,
                low_price: t.low_24h,
                volume: t.volume_24h,
                count: 0,
            });
        }
        for stat in stats.iter_mut() {
            stat.count = state.rng.gen_range(1_000..50_000);
        }
        stats.retain(|s| s.symbol.ends_with(QUOTE_ASSET));
        stats.sort_by(|a, b| b.price_change_percent.total_cmp(&a.price_change_percent));
        stats.truncate(limit);
        Ok(stats)
    }

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<OhlcvBar>, ShortbotError> {
        let step_ms = interval_millis(interval).ok_or_else(|| ShortbotError::Api {
            code: -1120,
            message: format!("invalid interval '{interval}'"),
        })?;

        let mut state = self.lock();
        state.ensure_connected()?;
        let (price, volatility) = {
            let t = state.ticker(symbol)?;
            (t.price, t.volatility.max(0.0005))
        };

        let now_ms = Utc::now().timestamp_millis();
        let last_open = now_ms - now_ms.rem_euclid(step_ms);

        // Walk backwards from the live price so the newest close matches it.
        let mut bars = Vec::with_capacity(limit);
        let mut close = price;
        for i in 0..limit {
            let open = close / (1.0 + state.rng.gen_range(-volatility..volatility));
            let high = open.max(close) * (1.0 + state.rng.gen_range(0.0..volatility / 2.0));
            let low = open.min(close) * (1.0 - state.rng.gen_range(0.0..volatility / 2.0));
            let open_ms = last_open - step_ms * i as i64;
            let Some(open_time) = Utc.timestamp_millis_opt(open_ms).single() else {
                break;
            };
            bars.push(OhlcvBar {
                symbol: symbol.to_string(),
                open_time,
                open,
                high,
                low,
                close,
                volume: state.rng.gen_range(100.0..1000.0),
            });
            close = open;
        }
        bars.reverse();
        debug!(symbol, interval, bars = bars.len(), "paper klines generated");
        Ok(bars)
    }

    async fn get_ticker_price(&self, symbol: &str) -> Result<f64, ShortbotError> {
        let mut state = self.lock();
        state.ensure_connected()?;
        state.ticker(symbol)?;
        state.step_market();
        Ok(state.ticker(symbol)?.price)
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<OrderAck, ShortbotError> {
        let mut state = self.lock();
        state.ensure_connected()?;
        if !(request.quantity > 0.0) {
            return Err(ShortbotError::Api {
                code: -4003,
                message: "quantity less than or equal to zero".to_string(),
            });
        }
        let mid = state.ticker(&request.symbol)?.price;
        let fill_price = match request.side {
            OrderSide::Buy => mid * (1.0 + SPREAD),
            OrderSide::Sell => mid * (1.0 - SPREAD),
        };
        let signed = match request.side {
            OrderSide::Buy => request.quantity,
            OrderSide::Sell => -request.quantity,
        };
        let existing = state.positions.get(&request.symbol).copied();

        let reduces = existing.is_some_and(|p| p.amount * signed < 0.0);
        if request.reduce_only && !reduces {
            return Err(ShortbotError::Api {
                code: -2022,
                message: "ReduceOnly Order is rejected".to_string(),
            });
        }

        let executed_qty;
        match existing {
            Some(pos) if reduces => {
                executed_qty = request.quantity.min(pos.amount.abs());
                let closed_fraction = executed_qty / pos.amount.abs();
                let pnl = (fill_price - pos.entry_price) * pos.amount * closed_fraction;
                let fee = executed_qty * fill_price * TAKER_FEE;
                state.balance += pnl - fee;
                let remaining = pos.amount + signed.signum() * executed_qty;
                if remaining.abs() < f64::EPSILON {
                    state.positions.remove(&request.symbol);
                } else {
                    state.positions.insert(
                        request.symbol.clone(),
                        PaperPosition {
                            amount: remaining,
                            entry_price: pos.entry_price,
                            margin: pos.margin * (1.0 - closed_fraction),
                        },
                    );
                }
            }
            _ => {
                executed_qty = request.quantity;
                let notional = executed_qty * fill_price;
                let margin = notional * MARGIN_RATE;
                let fee = notional * TAKER_FEE;
                let available = state.available();
                if available < margin + fee {
                    return Err(ShortbotError::InsufficientBalance {
                        required: margin + fee,
                        available,
                    });
                }
                state.balance -= fee;
                let merged = match existing {
                    Some(pos) => {
                        let amount = pos.amount + signed;
                        PaperPosition {
                            amount,
                            entry_price: (pos.entry_price * pos.amount.abs() + notional)
                                / amount.abs(),
                            margin: pos.margin + margin,
                        }
                    }
                    None => PaperPosition {
                        amount: signed,
                        entry_price: fill_price,
                        margin,
                    },
                };
                state.positions.insert(request.symbol.clone(), merged);
            }
        }

        state.next_order_id += 1;
        let order_id = state.next_order_id.to_string();
        debug!(
            symbol = %request.symbol,
            side = %request.side,
            qty = executed_qty,
            price = fill_price,
            order_id = %order_id,
            "paper order filled"
        );
        Ok(OrderAck {
            order_id,
            symbol: request.symbol.clone(),
            status: OrderStatus::Filled,
            executed_qty,
            avg_price: fill_price,
        })
    }

    async fn get_account_info(&self) -> Result<AccountInfo, ShortbotError> {
        let state = self.lock();
        let unrealized = state.unrealized();
        Ok(AccountInfo {
            total_wallet_balance: state.balance,
            available_balance: state.available(),
            total_unrealized_profit: unrealized,
            total_margin_balance: state.balance + unrealized,
        })
    }

    async fn get_balance(&self) -> Result<Vec<AssetBalance>, ShortbotError> {
        let state = self.lock();
        Ok(vec![AssetBalance {
            asset: QUOTE_ASSET.to_string(),
            balance: state.balance,
            available_balance: state.available(),
        }])
    }

    async fn get_positions(&self) -> Result<Vec<ExchangePosition>, ShortbotError> {
        let state = self.lock();
        let mut positions: Vec<ExchangePosition> = state
            .positions
            .iter()
            .map(|(symbol, p)| {
                let mark = state.tickers.get(symbol).map_or(p.entry_price, |t| t.price);
                ExchangePosition {
                    symbol: symbol.clone(),
                    position_amt: p.amount,
                    entry_price: p.entry_price,
                    mark_price: mark,
                    unrealized_profit: (mark - p.entry_price) * p.amount,
                    liquidation_price: None,
                }
            })
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }
}
