//! Binance USDT-M futures REST client.
//!
//! Signed calls carry `timestamp` and `recvWindow`, an HMAC-SHA256 signature
//! of the query string, and the `X-MBX-APIKEY` header. Requests share a
//! per-minute budget. Transport failures and 5xx answers are retried with
//! capped exponential backoff; a venue error body surfaces as
//! [`ShortbotError::Api`] without retry.
//!
//! Orders ask for the `RESULT` response and are polled until they reach a
//! terminal status, so a market order looks synchronous to the engine.
//! Quantities are floored to the symbol's `LOT_SIZE` step from
//! `/fapi/v1/exchangeInfo`, fetched once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::error::ShortbotError;
use crate::domain::ohlcv::OhlcvBar;
use crate::domain::order::OrderStatus;
use crate::domain::settings::ExchangeSettings;
use crate::ports::exchange_port::{
    AccountInfo, AssetBalance, ExchangePort, ExchangePosition, OrderAck, OrderRequest, TickerStat,
};

type HmacSha256 = Hmac<Sha256>;

const MAINNET_URL: &str = "https://fapi.binance.com";
const TESTNET_URL: &str = "https://testnet.binancefuture.com";
const RATE_WINDOW: Duration = Duration::from_secs(60);
const BASE_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(8);
const MAX_KLINES: usize = 1500;
const ORDER_POLL_ATTEMPTS: u32 = 10;
const ORDER_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// HMAC-SHA256 of `query` under `secret`, lowercase hex.
pub fn sign(secret: &str, query: &str) -> Result<String, ShortbotError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| {
        ShortbotError::Transport {
            reason: format!("invalid api secret: {e}"),
        }
    })?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn canonical_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn backoff(attempt: u32) -> Duration {
    BASE_BACKOFF
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(MAX_BACKOFF)
}

/// Quote-asset perpetuals with enough trades, highest 24h change first.
pub fn filter_top_gainers(
    mut tickers: Vec<TickerStat>,
    quote_asset: &str,
    min_trade_count: u64,
    limit: usize,
) -> Vec<TickerStat> {
    tickers.retain(|t| {
        t.symbol.ends_with(quote_asset) && !t.symbol.contains('_') && t.count > min_trade_count
    });
    tickers.sort_by(|a, b| b.price_change_percent.total_cmp(&a.price_change_percent));
    tickers.truncate(limit);
    tickers
}

fn parse_num(value: &str, field: &str) -> Result<f64, ShortbotError> {
    value.trim().parse::<f64>().map_err(|_| ShortbotError::Transport {
        reason: format!("unparseable {field}: '{value}'"),
    })
}

fn parse_status(status: &str) -> OrderStatus {
    match status {
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" => OrderStatus::Canceled,
        "REJECTED" => OrderStatus::Rejected,
        "EXPIRED" | "EXPIRED_IN_MATCH" => OrderStatus::Expired,
        _ => OrderStatus::New,
    }
}

/// Quantity increment of a symbol, with the decimals needed to print it.
#[derive(Debug, Clone, Copy, PartialEq)]
struct LotStep {
    step: f64,
    decimals: usize,
}

impl LotStep {
    fn parse(step: &str) -> Option<LotStep> {
        let value = step.trim().parse::<f64>().ok().filter(|v| *v > 0.0)?;
        let decimals = match step.trim().split_once('.') {
            Some((_, frac)) => frac.trim_end_matches('0').len(),
            None => 0,
        };
        Some(LotStep {
            step: value,
            decimals,
        })
    }

    /// Floor `quantity` to a whole number of steps. `None` when that is zero.
    fn format(&self, quantity: f64) -> Option<String> {
        let steps = (quantity / self.step + 1e-9).floor();
        if steps < 1.0 {
            return None;
        }
        Some(format!("{:.*}", self.decimals, steps * self.step))
    }
}

fn lot_steps(info: ExchangeInfo) -> HashMap<String, LotStep> {
    info.symbols
        .into_iter()
        .filter_map(|s| {
            let step = s.filters.iter().find_map(|f| {
                (f.get("filterType")?.as_str()? == "LOT_SIZE")
                    .then(|| f.get("stepSize")?.as_str())
                    .flatten()
                    .and_then(LotStep::parse)
            })?;
            Some((s.symbol, step))
        })
        .collect()
}

fn order_params(request: &OrderRequest, quantity: String) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("symbol", request.symbol.clone()),
        ("side", request.side.to_string()),
        ("type", request.order_type.to_string()),
        ("quantity", quantity),
        ("newOrderRespType", "RESULT".to_string()),
    ];
    if let Some(price) = request.price {
        params.push(("price", price.to_string()));
        params.push(("timeInForce", "GTC".to_string()));
    }
    if request.reduce_only {
        params.push(("reduceOnly", "true".to_string()));
    }
    params
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    symbol: String,
    price_change_percent: String,
    last_price: String,
    high_price: String,
    low_price: String,
    volume: String,
    count: u64,
}

#[derive(Debug, Deserialize)]
struct PriceTicker {
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    total_wallet_balance: String,
    available_balance: String,
    total_unrealized_profit: String,
    total_margin_balance: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceEntry {
    asset: String,
    balance: String,
    available_balance: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRisk {
    symbol: String,
    position_amt: String,
    entry_price: String,
    mark_price: String,
    #[serde(rename = "unRealizedProfit")]
    unrealized_profit: String,
    liquidation_price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: u64,
    symbol: String,
    status: String,
    executed_qty: String,
    avg_price: String,
}

impl OrderResponse {
    fn into_ack(self) -> Result<OrderAck, ShortbotError> {
        Ok(OrderAck {
            order_id: self.order_id.to_string(),
            status: parse_status(&self.status),
            executed_qty: parse_num(&self.executed_qty, "executedQty")?,
            avg_price: parse_num(&self.avg_price, "avgPrice")?,
            symbol: self.symbol,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    filters: Vec<serde_json::Value>,
}

struct RateWindow {
    started: Instant,
    count: u32,
}

pub struct BinanceRestClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
    recv_window_ms: u64,
    requests_per_minute: u32,
    quote_asset: String,
    min_trade_count: u64,
    max_retries: u32,
    window: Mutex<RateWindow>,
    lot_steps: Mutex<HashMap<String, LotStep>>,
    connected: AtomicBool,
}

impl BinanceRestClient {
    pub fn new(settings: &ExchangeSettings) -> Result<Self, ShortbotError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ShortbotError::Transport {
                reason: format!("http client: {e}"),
            })?;
        let base_url = if settings.testnet { TESTNET_URL } else { MAINNET_URL };
        Ok(BinanceRestClient {
            http,
            base_url: base_url.to_string(),
            api_key: settings.api_key.clone(),
            api_secret: settings.api_secret.clone(),
            recv_window_ms: settings.recv_window_ms,
            requests_per_minute: settings.requests_per_minute.max(1),
            quote_asset: settings.quote_asset.clone(),
            min_trade_count: settings.min_trade_count,
            max_retries: settings.max_retries,
            window: Mutex::new(RateWindow {
                started: Instant::now(),
                count: 0,
            }),
            lot_steps: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(false),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn throttle(&self) {
        let mut window = self.window.lock().await;
        if window.started.elapsed() >= RATE_WINDOW {
            window.started = Instant::now();
            window.count = 0;
        }
        if window.count >= self.requests_per_minute {
            let wait = RATE_WINDOW.saturating_sub(window.started.elapsed());
            warn!(wait_secs = wait.as_secs_f64(), "request budget exhausted, waiting");
            tokio::time::sleep(wait).await;
            window.started = Instant::now();
            window.count = 0;
        }
        window.count += 1;
    }

    fn signed_query(&self, params: &[(&str, String)]) -> Result<String, ShortbotError> {
        let secret = self.api_secret.as_deref().ok_or_else(|| ShortbotError::ConfigMissing {
            section: "exchange".to_string(),
            key: "api_secret".to_string(),
        })?;
        let mut all: Vec<(&str, String)> = params.to_vec();
        all.push(("timestamp", Utc::now().timestamp_millis().to_string()));
        all.push(("recvWindow", self.recv_window_ms.to_string()));
        let query = canonical_query(&all);
        let signature = sign(secret, &query)?;
        Ok(format!("{query}&signature={signature}"))
    }

    async fn lot_step(&self, symbol: &str) -> Result<LotStep, ShortbotError> {
        if let Some(step) = self.lot_steps.lock().await.get(symbol) {
            return Ok(*step);
        }
        let info: ExchangeInfo = self
            .request(Method::GET, "/fapi/v1/exchangeInfo", &[], false)
            .await?;
        let steps = lot_steps(info);
        debug!(symbols = steps.len(), "lot sizes loaded");
        let mut cache = self.lot_steps.lock().await;
        *cache = steps;
        cache.get(symbol).copied().ok_or_else(|| ShortbotError::InvalidSymbol {
            symbol: symbol.to_string(),
        })
    }

    /// Poll `GET /fapi/v1/order` until the order is terminal or the attempts
    /// run out; the last seen state is returned either way.
    async fn await_terminal(&self, mut ack: OrderAck) -> Result<OrderAck, ShortbotError> {
        for _ in 0..ORDER_POLL_ATTEMPTS {
            if ack.status.is_terminal() {
                return Ok(ack);
            }
            tokio::time::sleep(ORDER_POLL_INTERVAL).await;
            let params = [
                ("symbol", ack.symbol.clone()),
                ("orderId", ack.order_id.clone()),
            ];
            let resp: OrderResponse = self
                .request(Method::GET, "/fapi/v1/order", &params, true)
                .await?;
            ack = resp.into_ack()?;
        }
        if !ack.status.is_terminal() {
            warn!(
                symbol = %ack.symbol,
                order_id = %ack.order_id,
                status = ?ack.status,
                executed = ack.executed_qty,
                "order still working after polling"
            );
        }
        Ok(ack)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
        signed: bool,
    ) -> Result<T, ShortbotError> {
        let mut attempt = 0;
        loop {
            self.throttle().await;

            // Signed queries are rebuilt per attempt so the timestamp stays fresh.
            let query = if signed {
                self.signed_query(params)?
            } else {
                canonical_query(params)
            };
            let url = if query.is_empty() {
                format!("{}{}", self.base_url, endpoint)
            } else {
                format!("{}{}?{}", self.base_url, endpoint, query)
            };

            let mut builder = self.http.request(method.clone(), &url);
            if signed {
                if let Some(key) = &self.api_key {
                    builder = builder.header("X-MBX-APIKEY", key.as_str());
                }
            }

            let retry_reason = match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.map_err(|e| ShortbotError::Transport {
                        reason: format!("reading {endpoint}: {e}"),
                    })?;
                    if status.is_success() {
                        return serde_json::from_str(&body).map_err(|e| ShortbotError::Transport {
                            reason: format!("decoding {endpoint}: {e}"),
                        });
                    }
                    if !status.is_server_error() {
                        return Err(match serde_json::from_str::<ApiErrorBody>(&body) {
                            Ok(err) => ShortbotError::Api {
                                code: err.code,
                                message: err.msg,
                            },
                            Err(_) => ShortbotError::Api {
                                code: i64::from(status.as_u16()),
                                message: body,
                            },
                        });
                    }
                    format!("{endpoint} answered {status}")
                }
                Err(e) => format!("{endpoint}: {e}"),
            };

            if attempt >= self.max_retries {
                return Err(ShortbotError::Transport {
                    reason: retry_reason,
                });
            }
            let delay = backoff(attempt);
            warn!(attempt, delay_ms = delay.as_millis() as u64, reason = %retry_reason, "retrying request");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl ExchangePort for BinanceRestClient {
    async fn connect(&self) -> Result<(), ShortbotError> {
        self.connected.store(true, Ordering::SeqCst);
        info!(base_url = %self.base_url, "binance rest client ready");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ShortbotError> {
        self.connected.store(false, Ordering::SeqCst);
        info!("binance rest client closed");
        Ok(())
    }

    async fn test_connection(&self) -> bool {
        match self
            .request::<serde_json::Value>(Method::GET, "/fapi/v1/time", &[], false)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "connectivity test failed");
                false
            }
        }
    }

    async fn get_top_gainers(&self, limit: usize) -> Result<Vec<TickerStat>, ShortbotError> {
        let raw: Vec<Ticker24h> = self
            .request(Method::GET, "/fapi/v1/ticker/24hr", &[], false)
            .await?;
        let mut stats = Vec::with_capacity(raw.len());
        for t in raw {
            stats.push(TickerStat {
                price_change_percent: parse_num(&t.price_change_percent, "priceChangePercent")?,
                last_price: parse_num(&t.last_price, "lastPrice")?,
                high_price: parse_num(&t.high_price, "highPrice")?,
                low_price: parse_num(&t.low_price, "lowPrice")?,
                volume: parse_num(&t.volume, "volume")?,
                count: t.count,
                symbol: t.symbol,
            });
        }
        Ok(filter_top_gainers(
            stats,
            &self.quote_asset,
            self.min_trade_count,
            limit,
        ))
    }

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<OhlcvBar>, ShortbotError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.min(MAX_KLINES).to_string()),
        ];
        let rows: Vec<Vec<serde_json::Value>> = self
            .request(Method::GET, "/fapi/v1/klines", &params, false)
            .await?;
        let bars = rows
            .iter()
            .map(|row| parse_kline(symbol, row))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(symbol, interval, bars = bars.len(), "klines fetched");
        Ok(bars)
    }

    async fn get_ticker_price(&self, symbol: &str) -> Result<f64, ShortbotError> {
        let params = [("symbol", symbol.to_string())];
        let ticker: PriceTicker = self
            .request(Method::GET, "/fapi/v1/ticker/price", &params, false)
            .await?;
        parse_num(&ticker.price, "price")
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<OrderAck, ShortbotError> {
        let step = self.lot_step(&request.symbol).await?;
        let quantity = step
            .format(request.quantity)
            .ok_or_else(|| ShortbotError::OrderExecution {
                symbol: request.symbol.clone(),
                reason: format!(
                    "quantity {} is below the lot step {}",
                    request.quantity, step.step
                ),
            })?;
        let params = order_params(request, quantity);
        let resp: OrderResponse = self
            .request(Method::POST, "/fapi/v1/order", &params, true)
            .await?;
        info!(
            symbol = %resp.symbol,
            order_id = resp.order_id,
            status = %resp.status,
            "order accepted"
        );
        self.await_terminal(resp.into_ack()?).await
    }

    async fn get_account_info(&self) -> Result<AccountInfo, ShortbotError> {
        let a: AccountResponse = self
            .request(Method::GET, "/fapi/v2/account", &[], true)
            .await?;
        Ok(AccountInfo {
            total_wallet_balance: parse_num(&a.total_wallet_balance, "totalWalletBalance")?,
            available_balance: parse_num(&a.available_balance, "availableBalance")?,
            total_unrealized_profit: parse_num(&a.total_unrealized_profit, "totalUnrealizedProfit")?,
            total_margin_balance: parse_num(&a.total_margin_balance, "totalMarginBalance")?,
        })
    }

    async fn get_balance(&self) -> Result<Vec<AssetBalance>, ShortbotError> {
        let entries: Vec<BalanceEntry> = self
            .request(Method::GET, "/fapi/v2/balance", &[], true)
            .await?;
        entries
            .into_iter()
            .map(|e| {
                Ok(AssetBalance {
                    balance: parse_num(&e.balance, "balance")?,
                    available_balance: parse_num(&e.available_balance, "availableBalance")?,
                    asset: e.asset,
                })
            })
            .collect()
    }

    async fn get_positions(&self) -> Result<Vec<ExchangePosition>, ShortbotError> {
        let risks: Vec<PositionRisk> = self
            .request(Method::GET, "/fapi/v2/positionRisk", &[], true)
            .await?;
        let mut positions = Vec::new();
        for p in risks {
            let amount = parse_num(&p.position_amt, "positionAmt")?;
            if amount == 0.0 {
                continue;
            }
            let liquidation = parse_num(&p.liquidation_price, "liquidationPrice")?;
            positions.push(ExchangePosition {
                position_amt: amount,
                entry_price: parse_num(&p.entry_price, "entryPrice")?,
                mark_price: parse_num(&p.mark_price, "markPrice")?,
                unrealized_profit: parse_num(&p.unrealized_profit, "unRealizedProfit")?,
                liquidation_price: (liquidation > 0.0).then_some(liquidation),
                symbol: p.symbol,
            });
        }
        Ok(positions)
    }
}

fn parse_kline(symbol: &str, row: &[serde_json::Value]) -> Result<OhlcvBar, ShortbotError> {
    let malformed = || ShortbotError::Transport {
        reason: format!("malformed kline row for {symbol}"),
    };
    if row.len() < 6 {
        return Err(malformed());
    }
    let open_ms = row[0].as_i64().ok_or_else(malformed)?;
    let open_time = Utc
        .timestamp_millis_opt(open_ms)
        .single()
        .ok_or_else(malformed)?;
    let field = |i: usize, name: &str| -> Result<f64, ShortbotError> {
        match &row[i] {
            serde_json::Value::String(s) => parse_num(s, name),
            serde_json::Value::Number(n) => n.as_f64().ok_or_else(malformed),
            _ => Err(malformed()),
        }
    };
    Ok(OhlcvBar {
        symbol: symbol.to_string(),
        open_time,
        open: field(1, "open")?,
        high: field(2, "high")?,
        low: field(3, "low")?,
        close: field(4, "close")?,
        volume: field(5, "volume")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderSide;
    use serde_json::json;

    fn stat(symbol: &str, change: f64, count: u64) -> TickerStat {
        TickerStat {
            symbol: symbol.to_string(),
            price_change_percent: change,
            last_price: 1.0,
            high_price: 1.0,
            low_price: 1.0,
            volume: 1.0,
            count,
        }
    }

    #[test]
    fn signature_matches_published_vector() {
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign(secret, query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn canonical_query_keeps_order() {
        let q = canonical_query(&[("symbol", "BTCUSDT".into()), ("limit", "5".into())]);
        assert_eq!(q, "symbol=BTCUSDT&limit=5");
        assert_eq!(canonical_query(&[]), "");
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(backoff(0), Duration::from_millis(500));
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(3), Duration::from_secs(4));
        assert_eq!(backoff(10), MAX_BACKOFF);
        assert_eq!(backoff(40), MAX_BACKOFF);
    }

    #[test]
    fn gainer_filter() {
        let tickers = vec![
            stat("ETHUSDT", 3.0, 5000),
            stat("BTCUSDT_240628", 9.0, 5000),
            stat("SOLUSDT", 7.0, 5000),
            stat("ETHBTC", 12.0, 5000),
            stat("THINUSDT", 20.0, 10),
            stat("XRPUSDT", -1.0, 2000),
        ];
        let top = filter_top_gainers(tickers, "USDT", 1000, 2);
        let symbols: Vec<&str> = top.iter().map(|t| t.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["SOLUSDT", "ETHUSDT"]);
    }

    #[test]
    fn kline_row_parsing() {
        let row = vec![
            json!(1_700_000_000_000i64),
            json!("100.5"),
            json!("101.0"),
            json!("99.5"),
            json!("100.0"),
            json!("1234.5"),
            json!(1_700_000_059_999i64),
        ];
        let bar = parse_kline("BTCUSDT", &row).unwrap();
        assert_eq!(bar.open_time.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(bar.high, 101.0);
        assert_eq!(bar.volume, 1234.5);

        assert!(parse_kline("BTCUSDT", &row[..3]).is_err());
        let bad = vec![json!("x"), json!("1"), json!("1"), json!("1"), json!("1"), json!("1")];
        assert!(parse_kline("BTCUSDT", &bad).is_err());
    }

    #[test]
    fn venue_status_mapping() {
        assert_eq!(parse_status("FILLED"), OrderStatus::Filled);
        assert_eq!(parse_status("PARTIALLY_FILLED"), OrderStatus::PartiallyFilled);
        assert_eq!(parse_status("EXPIRED_IN_MATCH"), OrderStatus::Expired);
        assert_eq!(parse_status("NEW"), OrderStatus::New);
    }

    #[test]
    fn lot_step_decimals_come_from_the_step_string() {
        assert_eq!(LotStep::parse("0.00100000").unwrap().decimals, 3);
        assert_eq!(LotStep::parse("0.1").unwrap().decimals, 1);
        assert_eq!(LotStep::parse("1").unwrap().decimals, 0);
        assert!(LotStep::parse("0").is_none());
        assert!(LotStep::parse("abc").is_none());
    }

    #[test]
    fn quantity_is_floored_to_the_lot_step() {
        let tenth = LotStep::parse("0.1").unwrap();
        assert_eq!(tenth.format(1.6666666666666667).as_deref(), Some("1.6"));
        assert_eq!(tenth.format(0.3).as_deref(), Some("0.3"));

        let whole = LotStep::parse("1").unwrap();
        assert_eq!(whole.format(1.6666666666666667).as_deref(), Some("1"));

        let milli = LotStep::parse("0.001").unwrap();
        assert_eq!(milli.format(0.0222222).as_deref(), Some("0.022"));
        assert_eq!(milli.format(0.0004), None);
    }

    #[test]
    fn exchange_info_lot_sizes() {
        let info: ExchangeInfo = serde_json::from_value(json!({
            "symbols": [
                {
                    "symbol": "BTCUSDT",
                    "filters": [
                        {"filterType": "PRICE_FILTER", "tickSize": "0.10"},
                        {"filterType": "LOT_SIZE", "stepSize": "0.001", "minQty": "0.001"}
                    ]
                },
                {
                    "symbol": "XRPUSDT",
                    "filters": [{"filterType": "LOT_SIZE", "stepSize": "0.1"}]
                },
                {"symbol": "NOLOTUSDT", "filters": []}
            ]
        }))
        .unwrap();
        let steps = lot_steps(info);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps["BTCUSDT"].decimals, 3);
        assert_eq!(steps["XRPUSDT"].format(1.6666666666666667).as_deref(), Some("1.6"));
    }

    #[test]
    fn order_params_request_the_result_response() {
        let request = OrderRequest::market("XRPUSDT", OrderSide::Sell, 1.6666666666666667);
        let params = order_params(&request, "1.6".to_string());
        assert!(params.contains(&("newOrderRespType", "RESULT".to_string())));
        assert!(params.contains(&("quantity", "1.6".to_string())));
        assert!(params.contains(&("side", "SELL".to_string())));
        assert!(!params.iter().any(|(k, _)| *k == "reduceOnly"));

        let close = OrderRequest::market("XRPUSDT", OrderSide::Buy, 1.6).reduce_only();
        let params = order_params(&close, "1.6".to_string());
        assert!(params.contains(&("reduceOnly", "true".to_string())));
        assert!(params.contains(&("newOrderRespType", "RESULT".to_string())));
    }

    #[test]
    fn order_response_maps_to_ack() {
        let resp: OrderResponse = serde_json::from_value(json!({
            "orderId": 283194212,
            "symbol": "XRPUSDT",
            "status": "NEW",
            "executedQty": "0",
            "avgPrice": "0.00"
        }))
        .unwrap();
        let ack = resp.into_ack().unwrap();
        assert_eq!(ack.order_id, "283194212");
        assert_eq!(ack.status, OrderStatus::New);
        assert!(!ack.status.is_terminal());
        assert_eq!(ack.executed_qty, 0.0);
    }

    #[test]
    fn testnet_flag_picks_base_url() {
        let live = BinanceRestClient::new(&ExchangeSettings {
            testnet: false,
            ..ExchangeSettings::default()
        })
        .unwrap();
        assert_eq!(live.base_url(), MAINNET_URL);
        let test = BinanceRestClient::new(&ExchangeSettings::default()).unwrap();
        assert_eq!(test.base_url(), TESTNET_URL);
    }

    #[test]
    fn signed_query_needs_secret() {
        let client = BinanceRestClient::new(&ExchangeSettings::default()).unwrap();
        assert!(matches!(
            client.signed_query(&[]),
            Err(ShortbotError::ConfigMissing { .. })
        ));

        let client = BinanceRestClient::new(&ExchangeSettings {
            api_key: Some("k".into()),
            api_secret: Some("s".into()),
            ..ExchangeSettings::default()
        })
        .unwrap();
        let q = client.signed_query(&[("symbol", "BTCUSDT".into())]).unwrap();
        assert!(q.starts_with("symbol=BTCUSDT&timestamp="));
        assert!(q.contains("&recvWindow=5000&signature="));
    }
}
