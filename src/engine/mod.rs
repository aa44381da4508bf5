//! Trade engine: the state machine that owns the ledger and drives the scan
//! and position-monitor loops against an [`ExchangePort`].
//!
//! ```text
//! stopped -> starting -> running <-> pausing/paused -> stopping -> stopped
//!                 \-> error          running -> safe_shutdown -> stopping
//! ```
//!
//! [`TradeEngine`] is a cheap clonable handle. The portfolio and risk manager
//! sit behind their own mutexes; no guard is ever held across an `.await`, so
//! every ledger mutation happens in one step. The loops are tokio tasks that
//! race each cycle and each sleep against a broadcast shutdown signal.

pub mod events;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::adapters::paper_exchange::PaperExchange;
use crate::domain::config_validation::validate_settings;
use crate::domain::error::ShortbotError;
use crate::domain::order::{Order, OrderSide};
use crate::domain::portfolio::{EntryFill, Portfolio, PortfolioSnapshot};
use crate::domain::position::{Position, PositionSide};
use crate::domain::risk::{AlertKind, RiskAlert, RiskManager, RiskSummary, StopReason};
use crate::domain::settings::{BotSettings, TradingMode};
use crate::domain::signal::{SignalDecision, SignalEngine};
use crate::domain::wallet::Wallet;
use crate::ports::exchange_port::{ExchangePort, OrderAck, OrderRequest};

pub use events::{CloseReason, EventBus, EventKind, ListenerResult, TradingEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    Pausing,
    Paused,
    Stopping,
    Error,
    SafeShutdown,
}

impl EngineState {
    /// States in which the loops keep ticking.
    fn loops_alive(self) -> bool {
        matches!(
            self,
            EngineState::Running | EngineState::Pausing | EngineState::Paused
        )
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Stopped => "stopped",
            EngineState::Starting => "starting",
            EngineState::Running => "running",
            EngineState::Pausing => "pausing",
            EngineState::Paused => "paused",
            EngineState::Stopping => "stopping",
            EngineState::Error => "error",
            EngineState::SafeShutdown => "safe_shutdown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStats {
    pub scan_count: u64,
    pub signals_generated: u64,
    pub positions_opened: u64,
    pub positions_closed: u64,
    pub liquidations: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub last_scan: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub running: bool,
    pub mode: TradingMode,
    pub uptime_secs: Option<f64>,
    pub scan_count: u64,
    pub signals_generated: u64,
    pub positions_opened: u64,
    pub last_scan: Option<DateTime<Utc>>,
    pub consecutive_losses: u32,
    pub portfolio: PortfolioSnapshot,
}

/// Outcome of one scan cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    pub candidates: usize,
    pub evaluated: usize,
    pub opened: Vec<String>,
    pub failed: usize,
    pub halted: Option<StopReason>,
}

/// Outcome of one monitor cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorReport {
    pub priced: usize,
    pub take_profits: Vec<String>,
    pub liquidations: Vec<String>,
}

/// UTC dates on which each drawdown event was last emitted.
#[derive(Debug, Default)]
struct DrawdownLatch {
    warning: Option<NaiveDate>,
    critical: Option<NaiveDate>,
}

struct Inner {
    settings: RwLock<BotSettings>,
    state: Mutex<EngineState>,
    portfolio: Mutex<Portfolio>,
    risk: Mutex<RiskManager>,
    signals: RwLock<Option<Arc<SignalEngine>>>,
    exchange: RwLock<Option<Arc<dyn ExchangePort>>>,
    events: EventBus,
    stats: Mutex<EngineStats>,
    drawdown: Mutex<DrawdownLatch>,
    shutdown: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone)]
pub struct TradeEngine {
    inner: Arc<Inner>,
}

impl TradeEngine {
    /// The exchange is built from `settings.mode` on [`TradeEngine::initialize`].
    pub fn new(settings: BotSettings) -> Self {
        Self::build(settings, None)
    }

    /// Use `exchange` instead of building one from the configured mode.
    pub fn with_exchange(settings: BotSettings, exchange: Arc<dyn ExchangePort>) -> Self {
        Self::build(settings, Some(exchange))
    }

    fn build(settings: BotSettings, exchange: Option<Arc<dyn ExchangePort>>) -> Self {
        let portfolio = Portfolio::new(
            Wallet::new(settings.paper.initial_balance),
            settings.strategy.max_concurrent_positions,
            settings.risk.maintenance_margin_rate,
        );
        let risk = RiskManager::new(settings.risk.clone());
        let events = EventBus::new(settings.app.listener_timeout);
        let (shutdown, _) = broadcast::channel(16);

        TradeEngine {
            inner: Arc::new(Inner {
                settings: RwLock::new(settings),
                state: Mutex::new(EngineState::Stopped),
                portfolio: Mutex::new(portfolio),
                risk: Mutex::new(risk),
                signals: RwLock::new(None),
                exchange: RwLock::new(exchange),
                events,
                stats: Mutex::new(EngineStats::default()),
                drawdown: Mutex::new(DrawdownLatch::default()),
                shutdown,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    // --- accessors ---

    pub fn state(&self) -> EngineState {
        *lock(&self.inner.state)
    }

    fn set_state(&self, state: EngineState) {
        let previous = std::mem::replace(&mut *lock(&self.inner.state), state);
        if previous != state {
            debug!(from = %previous, to = %state, "engine state change");
        }
    }

    /// Move to `next` in one lock acquisition unless the current state is in
    /// `blocked`. Returns the previous state when the move happened.
    fn transition_unless(&self, blocked: &[EngineState], next: EngineState) -> Option<EngineState> {
        let mut state = lock(&self.inner.state);
        if blocked.contains(&*state) {
            return None;
        }
        let previous = std::mem::replace(&mut *state, next);
        debug!(from = %previous, to = %next, "engine state change");
        Some(previous)
    }

    pub fn settings(&self) -> BotSettings {
        self.inner
            .settings
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn stats(&self) -> EngineStats {
        lock(&self.inner.stats).clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe<F, Fut>(&self, kind: EventKind, listener: F)
    where
        F: Fn(TradingEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        self.inner.events.subscribe(kind, listener);
    }

    pub fn portfolio_snapshot(&self) -> PortfolioSnapshot {
        lock(&self.inner.portfolio).snapshot()
    }

    pub fn wallet(&self) -> Wallet {
        lock(&self.inner.portfolio).wallet.clone()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        lock(&self.inner.portfolio)
            .open_positions()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn closed_positions(&self) -> Vec<Position> {
        lock(&self.inner.portfolio).closed_positions().to_vec()
    }

    pub fn should_stop_trading(&self) -> Option<StopReason> {
        let portfolio = lock(&self.inner.portfolio);
        lock(&self.inner.risk).should_stop_trading(&portfolio)
    }

    pub fn risk_summary(&self) -> RiskSummary {
        let portfolio = lock(&self.inner.portfolio);
        lock(&self.inner.risk).risk_summary(&portfolio)
    }

    pub fn recent_alerts(&self, hours: i64) -> Vec<RiskAlert> {
        lock(&self.inner.risk).recent_alerts(hours)
    }

    pub fn consecutive_losses(&self) -> u32 {
        lock(&self.inner.risk).consecutive_losses()
    }

    /// Pure read of the engine's state, counters and ledger.
    pub fn get_status(&self) -> EngineStatus {
        let state = self.state();
        let stats = self.stats();
        let mode = self.settings().mode;
        EngineStatus {
            state,
            running: state.loops_alive(),
            mode,
            uptime_secs: stats
                .started_at
                .map(|t| (Utc::now() - t).num_milliseconds() as f64 / 1000.0),
            scan_count: stats.scan_count,
            signals_generated: stats.signals_generated,
            positions_opened: stats.positions_opened,
            last_scan: stats.last_scan,
            consecutive_losses: self.consecutive_losses(),
            portfolio: self.portfolio_snapshot(),
        }
    }

    fn exchange(&self) -> Result<Arc<dyn ExchangePort>, ShortbotError> {
        self.inner
            .exchange
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or_else(|| ShortbotError::InvalidState {
                reason: "engine has no exchange; call initialize first".to_string(),
            })
    }

    fn signal_engine(&self) -> Result<Arc<SignalEngine>, ShortbotError> {
        self.inner
            .signals
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or_else(|| ShortbotError::InvalidState {
                reason: "signal engine not built; call initialize first".to_string(),
            })
    }

    // --- lifecycle ---

    /// Build the exchange and signal engine, connect, and verify
    /// connectivity. Any failure leaves the engine in `error`.
    pub async fn initialize(&self) -> Result<(), ShortbotError> {
        let mode = self.settings().mode;
        info!(%mode, "initializing trade engine");
        self.set_state(EngineState::Starting);

        match self.try_initialize().await {
            Ok(()) => {
                let balance = lock(&self.inner.portfolio).wallet.balance;
                info!(%mode, balance, "trade engine initialized");
                Ok(())
            }
            Err(e) => {
                self.set_state(EngineState::Error);
                error!(error = %e, "engine initialization failed");
                Err(e)
            }
        }
    }

    async fn try_initialize(&self) -> Result<(), ShortbotError> {
        let settings = self.settings();
        let signals = SignalEngine::new(&settings.indicators, settings.strategy.signal_logic)?;

        let exchange = match self.exchange() {
            Ok(exchange) => exchange,
            Err(_) => {
                let built = build_exchange(&settings)?;
                *self
                    .inner
                    .exchange
                    .write()
                    .unwrap_or_else(|p| p.into_inner()) = Some(built.clone());
                built
            }
        };

        exchange.connect().await?;
        if !exchange.test_connection().await {
            return Err(ShortbotError::Connectivity {
                reason: "exchange connectivity test failed".to_string(),
            });
        }
        if settings.mode == TradingMode::Live {
            self.reconcile(exchange.as_ref(), &settings).await?;
        }

        *self
            .inner
            .signals
            .write()
            .unwrap_or_else(|p| p.into_inner()) = Some(Arc::new(signals));
        Ok(())
    }

    /// Seed the wallet from the venue account and adopt its open positions.
    async fn reconcile(
        &self,
        exchange: &dyn ExchangePort,
        settings: &BotSettings,
    ) -> Result<(), ShortbotError> {
        let account = exchange.get_account_info().await?;
        let venue_positions = exchange.get_positions().await?;

        let mut portfolio = lock(&self.inner.portfolio);
        portfolio.wallet = Wallet::from_account(
            account.total_wallet_balance,
            account.available_balance,
        );
        let mut imported = 0;
        for vp in venue_positions.iter().filter(|p| p.position_amt != 0.0) {
            let side = if vp.position_amt < 0.0 {
                PositionSide::Short
            } else {
                PositionSide::Long
            };
            let size = vp.position_amt.abs();
            let margin = size * vp.entry_price * settings.risk.margin_rate;
            let mut position = Position::new(&vp.symbol, side, size, vp.entry_price, margin);
            position.liquidation_price = vp.liquidation_price;
            position.set_take_profit(settings.strategy.tp_percentage);
            position.update_mark_price(vp.mark_price);
            if portfolio.import_position(position) {
                imported += 1;
            }
        }
        info!(
            balance = account.total_wallet_balance,
            available = account.available_balance,
            imported,
            "account reconciled"
        );
        Ok(())
    }

    /// Initialize if needed, then launch the scan and monitor loops.
    pub async fn start(&self) -> Result<(), ShortbotError> {
        match self.state() {
            EngineState::Starting => {}
            s if s.loops_alive() => {
                return Err(ShortbotError::InvalidState {
                    reason: format!("engine already {s}"),
                });
            }
            _ => self.initialize().await?,
        }

        let now = Utc::now();
        self.set_state(EngineState::Running);
        lock(&self.inner.stats).started_at = Some(now);

        let scan = tokio::spawn(self.clone().scan_loop(self.inner.shutdown.subscribe()));
        let monitor = tokio::spawn(self.clone().monitor_loop(self.inner.shutdown.subscribe()));
        lock(&self.inner.tasks).extend([scan, monitor]);

        let mode = self.settings().mode;
        let balance = lock(&self.inner.portfolio).wallet.balance;
        info!(%mode, balance, "trading loops started");
        self.inner
            .events
            .publish(TradingEvent::Start {
                timestamp: now,
                mode,
                balance,
            })
            .await;
        Ok(())
    }

    /// Signal both loops, wait for them, and report final counters.
    /// Concurrent callers race on one state transition; only the winner
    /// joins the loops and publishes `stop`.
    pub async fn stop(&self) {
        if self
            .transition_unless(&[EngineState::Stopped, EngineState::Stopping], EngineState::Stopping)
            .is_none()
        {
            return;
        }
        info!("stopping trading loops");
        let _ = self.inner.shutdown.send(());

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *lock(&self.inner.tasks));
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "loop task ended abnormally");
            }
        }

        self.set_state(EngineState::Stopped);
        let stats = self.stats();
        info!(
            scans = stats.scan_count,
            opened = stats.positions_opened,
            closed = stats.positions_closed,
            "trading loops stopped"
        );
        self.inner
            .events
            .publish(TradingEvent::Stop {
                timestamp: Utc::now(),
                scan_count: stats.scan_count,
                positions_opened: stats.positions_opened,
            })
            .await;
    }

    /// Close every open position with reduce-only orders, then stop.
    /// Individual close failures are logged and skipped.
    pub async fn emergency_stop(&self) {
        if self
            .transition_unless(&[EngineState::SafeShutdown, EngineState::Stopping], EngineState::SafeShutdown)
            .is_none()
        {
            debug!("emergency stop already under way");
            return;
        }
        warn!("emergency stop: closing all positions");

        let symbols = lock(&self.inner.portfolio).open_symbols();
        let mut closed = 0;
        for symbol in &symbols {
            match self.close_position(symbol, CloseReason::EmergencyStop).await {
                Ok(part) if lock(&self.inner.portfolio).has_position(symbol) => {
                    warn!(symbol = %symbol, closed = part.size, "emergency close only partially filled");
                }
                Ok(_) => closed += 1,
                Err(e) => error!(symbol = %symbol, error = %e, "emergency close failed"),
            }
        }
        warn!(closed, attempted = symbols.len(), "emergency sweep finished");
        self.inner
            .events
            .publish(TradingEvent::EmergencyStop {
                timestamp: Utc::now(),
                closed_positions: closed,
            })
            .await;
        self.stop().await;
    }

    /// Stop scanning for entries. The monitor loop keeps guarding open
    /// positions while paused.
    pub async fn pause(&self) -> Result<(), ShortbotError> {
        let state = self.state();
        if state != EngineState::Running {
            return Err(ShortbotError::InvalidState {
                reason: format!("cannot pause while {state}"),
            });
        }
        self.set_state(EngineState::Pausing);
        self.inner
            .events
            .publish(TradingEvent::Pause {
                timestamp: Utc::now(),
            })
            .await;
        self.set_state(EngineState::Paused);
        info!("engine paused");
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), ShortbotError> {
        let state = self.state();
        if state != EngineState::Paused {
            return Err(ShortbotError::InvalidState {
                reason: format!("cannot resume while {state}"),
            });
        }
        self.set_state(EngineState::Running);
        self.inner
            .events
            .publish(TradingEvent::Resume {
                timestamp: Utc::now(),
            })
            .await;
        info!("engine resumed");
        Ok(())
    }

    /// Stop if still active and disconnect from the exchange.
    pub async fn shutdown(&self) {
        if !matches!(self.state(), EngineState::Stopped | EngineState::Error) {
            self.stop().await;
        }
        if let Ok(exchange) = self.exchange() {
            if let Err(e) = exchange.disconnect().await {
                warn!(error = %e, "exchange disconnect failed");
            }
        }
        info!("trade engine shut down");
    }

    pub async fn reset_daily(&self) -> bool {
        self.reset_daily_at(Utc::now()).await
    }

    /// Reset the daily counters once per UTC date and emit `daily_reset`.
    pub async fn reset_daily_at(&self, now: DateTime<Utc>) -> bool {
        let (reset, balance) = {
            let mut portfolio = lock(&self.inner.portfolio);
            let reset = lock(&self.inner.risk).reset_daily_metrics(&mut portfolio, now);
            (reset, portfolio.wallet.balance)
        };
        if reset {
            info!(balance, date = %now.date_naive(), "daily metrics reset");
            self.inner
                .events
                .publish(TradingEvent::DailyReset {
                    timestamp: now,
                    balance,
                })
                .await;
        }
        reset
    }

    /// Validate and install new settings. Loops pick them up at their next
    /// cycle boundary. The trading mode is fixed once an exchange exists.
    pub fn update_settings(&self, settings: BotSettings) -> Result<(), ShortbotError> {
        validate_settings(&settings)?;
        let signals = SignalEngine::new(&settings.indicators, settings.strategy.signal_logic)?;

        let has_exchange = self
            .inner
            .exchange
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .is_some();
        let current_mode = self.settings().mode;
        if has_exchange && settings.mode != current_mode {
            return Err(ShortbotError::InvalidState {
                reason: format!(
                    "cannot switch mode from {current_mode} to {} on a connected engine",
                    settings.mode
                ),
            });
        }

        lock(&self.inner.portfolio).set_max_positions(settings.strategy.max_concurrent_positions);
        lock(&self.inner.risk).update_config(settings.risk.clone());
        {
            let mut slot = self.inner.signals.write().unwrap_or_else(|p| p.into_inner());
            if slot.is_some() {
                *slot = Some(Arc::new(signals));
            }
        }
        *self
            .inner
            .settings
            .write()
            .unwrap_or_else(|p| p.into_inner()) = settings;
        info!("settings updated");
        Ok(())
    }

    // --- loops ---

    async fn scan_loop(self, mut shutdown: broadcast::Receiver<()>) {
        info!("scan loop started");
        while self.state().loops_alive() {
            let app = self.settings().app;
            let wait = if self.state() == EngineState::Running {
                let cycle = tokio::select! {
                    result = self.run_scan_cycle() => result,
                    _ = shutdown.recv() => break,
                };
                match cycle {
                    Ok(report) => {
                        debug!(
                            candidates = report.candidates,
                            opened = report.opened.len(),
                            failed = report.failed,
                            "scan cycle complete"
                        );
                        app.scan_interval
                    }
                    Err(e @ ShortbotError::DrawdownExceeded { .. }) => {
                        error!(error = %e, "scan loop halted");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "scan cycle failed");
                        app.error_backoff
                    }
                }
            } else {
                app.scan_interval
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.recv() => break,
            }
        }
        info!("scan loop finished");
    }

    async fn monitor_loop(self, mut shutdown: broadcast::Receiver<()>) {
        info!("position monitor started");
        while self.state().loops_alive() {
            let app = self.settings().app;
            let cycle = tokio::select! {
                result = self.run_monitor_cycle() => result,
                _ = shutdown.recv() => break,
            };
            let wait = match cycle {
                Ok(_) => app.monitor_interval,
                Err(e) => {
                    error!(error = %e, "monitor cycle failed");
                    app.monitor_error_backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.recv() => break,
            }
        }
        info!("position monitor finished");
    }

    // --- cycles ---

    /// One pass over the top gainers. Per-candidate failures are counted
    /// and logged; only a critical drawdown fails the cycle.
    pub async fn run_scan_cycle(&self) -> Result<ScanReport, ShortbotError> {
        let settings = self.settings();
        let now = Utc::now();
        {
            let mut stats = lock(&self.inner.stats);
            stats.scan_count += 1;
            stats.last_scan = Some(now);
        }
        self.reset_daily_at(now).await;
        self.check_daily_drawdown(&settings).await?;

        let mut report = ScanReport::default();
        let halted = self.should_stop_trading();
        if let Some(reason) = halted {
            warn!(%reason, "entries suspended this cycle");
            report.halted = Some(reason);
            return Ok(report);
        }

        let exchange = self.exchange()?;
        let signals = self.signal_engine()?;
        let gainers = exchange
            .get_top_gainers(settings.app.top_gainers_limit)
            .await?;
        report.candidates = gainers.len();
        debug!(candidates = gainers.len(), "scanning top gainers");

        for ticker in &gainers {
            if matches!(
                self.state(),
                EngineState::Stopping | EngineState::Stopped | EngineState::SafeShutdown
            ) {
                break;
            }
            let symbol = ticker.symbol.as_str();
            let (count, held) = {
                let portfolio = lock(&self.inner.portfolio);
                (portfolio.position_count(), portfolio.has_position(symbol))
            };
            if count >= settings.strategy.max_concurrent_positions {
                debug!(open = count, "position ceiling reached");
                break;
            }
            if held {
                continue;
            }

            report.evaluated += 1;
            match self
                .evaluate_candidate(&settings, exchange.as_ref(), &signals, symbol)
                .await
            {
                Ok(true) => report.opened.push(symbol.to_string()),
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    match e {
                        ShortbotError::InsufficientBalance { .. }
                        | ShortbotError::InsufficientData { .. }
                        | ShortbotError::InvalidSymbol { .. } => {
                            warn!(symbol, error = %e, "candidate skipped")
                        }
                        _ => error!(symbol, error = %e, "candidate failed"),
                    }
                }
            }
        }
        Ok(report)
    }

    async fn evaluate_candidate(
        &self,
        settings: &BotSettings,
        exchange: &dyn ExchangePort,
        signals: &SignalEngine,
        symbol: &str,
    ) -> Result<bool, ShortbotError> {
        let bars = exchange
            .get_klines(symbol, &settings.strategy.timeframe, settings.strategy.kline_limit)
            .await?;
        if bars.len() < settings.strategy.min_klines {
            return Err(ShortbotError::InsufficientData {
                symbol: symbol.to_string(),
                bars: bars.len(),
                minimum: settings.strategy.min_klines,
            });
        }

        let decision = signals.should_open_short(symbol, &bars)?;
        lock(&self.inner.stats).signals_generated += 1;
        if !decision.should_short {
            debug!(symbol, reason = %decision.reason, "no short signal");
            return Ok(false);
        }
        info!(symbol, reason = %decision.reason, "short signal");
        self.open_short(settings, exchange, symbol, decision).await?;
        Ok(true)
    }

    async fn open_short(
        &self,
        settings: &BotSettings,
        exchange: &dyn ExchangePort,
        symbol: &str,
        decision: SignalDecision,
    ) -> Result<(), ShortbotError> {
        let price = exchange.get_ticker_price(symbol).await?;

        let (sizing, alerts) = {
            let portfolio = lock(&self.inner.portfolio);
            let mut risk = lock(&self.inner.risk);
            let sizing = risk.calculate_position_size(
                &portfolio,
                symbol,
                price,
                settings.strategy.position_size_usd,
                None,
            )?;
            let alerts = risk.validate_new_position(&portfolio, symbol, sizing.size, price);
            (sizing, alerts)
        };
        for alert in &alerts {
            warn!(symbol, kind = ?alert.kind, severity = ?alert.severity, message = %alert.message, "risk alert");
        }
        if sizing.adjusted {
            info!(symbol, final_usd = sizing.info.final_usd, "entry size capped by risk budget");
        }

        let quantity = sizing.size.max(settings.strategy.min_order_quantity);
        let notional = quantity * price;
        let required = notional * (settings.risk.margin_rate + settings.risk.taker_commission_rate);
        let available = lock(&self.inner.portfolio).wallet.available_balance;
        if required > available {
            return Err(ShortbotError::InsufficientBalance {
                required,
                available,
            });
        }

        let ack = exchange
            .create_order(&OrderRequest::market(symbol, OrderSide::Sell, quantity))
            .await?;
        let (order, fill_price) = filled_order(symbol, OrderSide::Sell, quantity, false, &ack, price, settings)?;
        let filled = order.filled_quantity;
        let margin = filled * fill_price * settings.risk.margin_rate;

        {
            let mut portfolio = lock(&self.inner.portfolio);
            portfolio.wallet.reserve_margin(margin).map_err(|e| {
                error!(symbol, order_id = %ack.order_id, error = %e, "entry filled but margin unavailable");
                e
            })?;
            portfolio.open_position(EntryFill {
                symbol: symbol.to_string(),
                side: PositionSide::Short,
                size: filled,
                price: fill_price,
                margin,
                commission: order.commission,
                take_profit_pct: Some(settings.strategy.tp_percentage),
                order_id: Some(order.id.clone()),
            })?;
            portfolio.record_order(order);
        }
        lock(&self.inner.stats).positions_opened += 1;

        info!(
            target: "trade",
            symbol,
            qty = filled,
            price = fill_price,
            margin,
            reason = %decision.reason,
            "SHORT OPENED"
        );
        self.inner
            .events
            .publish(TradingEvent::PositionOpened {
                symbol: symbol.to_string(),
                side: PositionSide::Short,
                quantity: filled,
                price: fill_price,
                signal_data: decision,
                order_id: ack.order_id,
                timestamp: Utc::now(),
            })
            .await;
        Ok(())
    }

    /// Close the open position in `symbol` with a reduce-only market order.
    /// Only the executed quantity is booked; an unfilled remainder stays open
    /// and the returned position is the closed slice.
    pub async fn close_position(
        &self,
        symbol: &str,
        reason: CloseReason,
    ) -> Result<Position, ShortbotError> {
        let settings = self.settings();
        let exchange = self.exchange()?;
        let open = lock(&self.inner.portfolio)
            .position(symbol)
            .map(|p| (p.side, p.size));
        let Some((side, size)) = open else {
            return Err(ShortbotError::InvalidState {
                reason: format!("no open position for {symbol}"),
            });
        };
        let order_side = match side {
            PositionSide::Short => OrderSide::Buy,
            PositionSide::Long => OrderSide::Sell,
        };

        let ack = exchange
            .create_order(&OrderRequest::market(symbol, order_side, size).reduce_only())
            .await?;
        let reference = if ack.avg_price > 0.0 {
            ack.avg_price
        } else {
            exchange.get_ticker_price(symbol).await?
        };
        let (order, exit_price) = filled_order(symbol, order_side, size, true, &ack, reference, &settings)?;
        let commission = order.commission;
        let filled = order.filled_quantity;

        let (closed, remaining) = {
            let mut portfolio = lock(&self.inner.portfolio);
            portfolio.add_exit_order(symbol, &order.id);
            portfolio.record_order(order);
            let closed = portfolio
                .reduce_position(symbol, filled, exit_price, commission)
                .ok_or_else(|| ShortbotError::InvalidState {
                    reason: format!("position for {symbol} vanished before close"),
                })?;
            lock(&self.inner.risk).on_position_closed(&closed);
            (closed, portfolio.position(symbol).map(|p| p.size))
        };
        if let Some(remaining) = remaining {
            warn!(
                target: "trade",
                symbol,
                closed = filled,
                remaining,
                pnl = closed.realized_pnl,
                %reason,
                "POSITION PARTIALLY CLOSED"
            );
            return Ok(closed);
        }
        lock(&self.inner.stats).positions_closed += 1;

        info!(
            target: "trade",
            symbol,
            pnl = closed.realized_pnl,
            price = exit_price,
            %reason,
            "POSITION CLOSED"
        );
        self.inner
            .events
            .publish(TradingEvent::PositionClosed {
                symbol: symbol.to_string(),
                pnl: closed.realized_pnl,
                reason,
                order_id: ack.order_id,
                timestamp: Utc::now(),
            })
            .await;
        Ok(closed)
    }

    /// Refresh marks, take profits, and book liquidations.
    pub async fn run_monitor_cycle(&self) -> Result<MonitorReport, ShortbotError> {
        let mut report = MonitorReport::default();
        let symbols = lock(&self.inner.portfolio).open_symbols();
        if symbols.is_empty() {
            return Ok(report);
        }
        let exchange = self.exchange()?;

        let mut prices = HashMap::with_capacity(symbols.len());
        for symbol in &symbols {
            match exchange.get_ticker_price(symbol).await {
                Ok(price) => {
                    prices.insert(symbol.clone(), price);
                }
                Err(e) => warn!(symbol = %symbol, error = %e, "mark price unavailable"),
            }
        }
        report.priced = prices.len();

        let (take_profits, liquidations) = {
            let mut portfolio = lock(&self.inner.portfolio);
            portfolio.update_mark_prices(&prices);
            (portfolio.check_take_profits(), portfolio.check_liquidations())
        };

        for symbol in take_profits {
            match self.close_position(&symbol, CloseReason::TakeProfit).await {
                Ok(_) => report.take_profits.push(symbol),
                Err(e) => error!(symbol = %symbol, error = %e, "take-profit close failed"),
            }
        }

        for symbol in liquidations {
            let liquidated = {
                let mut portfolio = lock(&self.inner.portfolio);
                let liquidated = portfolio.liquidate_position(&symbol);
                if let Some(position) = &liquidated {
                    lock(&self.inner.risk).on_position_closed(position);
                }
                liquidated
            };
            let Some(position) = liquidated else {
                continue;
            };
            lock(&self.inner.stats).liquidations += 1;
            warn!(
                target: "trade",
                symbol = %symbol,
                loss = position.margin,
                mark = position.mark_price,
                "POSITION LIQUIDATED"
            );
            self.inner
                .events
                .publish(TradingEvent::PositionLiquidated {
                    symbol: symbol.clone(),
                    loss: position.margin,
                    timestamp: Utc::now(),
                })
                .await;
            report.liquidations.push(symbol);
        }
        Ok(report)
    }

    /// Emit drawdown events at most once per UTC day each. A critical
    /// drawdown schedules an emergency stop and fails the cycle.
    async fn check_daily_drawdown(&self, settings: &BotSettings) -> Result<(), ShortbotError> {
        let (alert, daily_pct) = {
            let portfolio = lock(&self.inner.portfolio);
            let alert = lock(&self.inner.risk).check_daily_drawdown(&portfolio);
            (alert, portfolio.wallet.daily_return_pct())
        };
        let Some(alert) = alert else {
            return Ok(());
        };
        let now = Utc::now();
        let today = now.date_naive();

        match alert.kind {
            AlertKind::DrawdownCritical => {
                let threshold = settings.risk.daily_shutdown_threshold;
                let first = {
                    let mut latch = lock(&self.inner.drawdown);
                    let first = latch.critical != Some(today);
                    latch.critical = Some(today);
                    first
                };
                if first {
                    error!(daily_pnl_pct = daily_pct, threshold, "daily drawdown critical");
                    self.inner
                        .events
                        .publish(TradingEvent::DrawdownCritical {
                            daily_pnl_pct: daily_pct,
                            threshold,
                            timestamp: now,
                        })
                        .await;
                }
                if !matches!(
                    self.state(),
                    EngineState::SafeShutdown | EngineState::Stopping | EngineState::Stopped
                ) {
                    let engine = self.clone();
                    tokio::spawn(async move { engine.emergency_stop().await });
                }
                Err(ShortbotError::DrawdownExceeded {
                    current: daily_pct.abs(),
                    limit: threshold,
                })
            }
            _ => {
                let threshold = settings.risk.daily_warning_threshold;
                let first = {
                    let mut latch = lock(&self.inner.drawdown);
                    let first = latch.warning != Some(today);
                    latch.warning = Some(today);
                    first
                };
                if first {
                    warn!(daily_pnl_pct = daily_pct, threshold, "daily drawdown warning");
                    self.inner
                        .events
                        .publish(TradingEvent::DrawdownWarning {
                            daily_pnl_pct: daily_pct,
                            threshold,
                            timestamp: now,
                        })
                        .await;
                }
                Ok(())
            }
        }
    }

    /// One-shot signal evaluation for `symbol` on the configured timeframe.
    pub async fn evaluate_symbol(&self, symbol: &str) -> Result<SignalDecision, ShortbotError> {
        let settings = self.settings();
        let exchange = self.exchange()?;
        let signals = self.signal_engine()?;
        let bars = exchange
            .get_klines(symbol, &settings.strategy.timeframe, settings.strategy.kline_limit)
            .await?;
        signals.should_open_short(symbol, &bars)
    }
}

fn build_exchange(settings: &BotSettings) -> Result<Arc<dyn ExchangePort>, ShortbotError> {
    match settings.mode {
        TradingMode::Paper => Ok(Arc::new(PaperExchange::new(&settings.paper))),
        #[cfg(feature = "live")]
        TradingMode::Live => Ok(Arc::new(
            crate::adapters::binance_rest::BinanceRestClient::new(&settings.exchange)?,
        )),
        #[cfg(not(feature = "live"))]
        TradingMode::Live => Err(ShortbotError::ConfigInvalid {
            section: "app".to_string(),
            key: "mode".to_string(),
            reason: "live mode needs the `live` feature".to_string(),
        }),
    }
}

/// Turn an exchange acknowledgement into a filled ledger order. Falls back
/// to `reference` when the venue reports no average price.
fn filled_order(
    symbol: &str,
    side: OrderSide,
    quantity: f64,
    reduce_only: bool,
    ack: &OrderAck,
    reference: f64,
    settings: &BotSettings,
) -> Result<(Order, f64), ShortbotError> {
    if !(ack.executed_qty > 0.0) {
        return Err(ShortbotError::OrderExecution {
            symbol: symbol.to_string(),
            reason: format!("order {} not filled (status {:?})", ack.order_id, ack.status),
        });
    }
    let price = if ack.avg_price > 0.0 { ack.avg_price } else { reference };
    let executed = ack.executed_qty.min(quantity);
    let commission = executed * price * settings.risk.taker_commission_rate;

    let mut order = Order::market(symbol, side, quantity);
    order.reduce_only = reduce_only;
    order.exchange_order_id = Some(ack.order_id.clone());
    order
        .fill(executed, price, commission)
        .map_err(|e| ShortbotError::OrderExecution {
            symbol: symbol.to_string(),
            reason: e.to_string(),
        })?;
    Ok((order, price))
}
