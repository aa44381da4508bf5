//! Engine lifecycle events and the listener registry.
//!
//! Listeners are registered per [`EventKind`] and invoked in registration
//! order. Each runs on its own task under a timeout; a listener that fails,
//! panics or stalls is logged and skipped without affecting the others.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::domain::position::PositionSide;
use crate::domain::settings::TradingMode;
use crate::domain::signal::SignalDecision;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    Stop,
    Pause,
    Resume,
    EmergencyStop,
    DailyReset,
    PositionOpened,
    PositionClosed,
    PositionLiquidated,
    DrawdownWarning,
    DrawdownCritical,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Start => "start",
            EventKind::Stop => "stop",
            EventKind::Pause => "pause",
            EventKind::Resume => "resume",
            EventKind::EmergencyStop => "emergency_stop",
            EventKind::DailyReset => "daily_reset",
            EventKind::PositionOpened => "position_opened",
            EventKind::PositionClosed => "position_closed",
            EventKind::PositionLiquidated => "position_liquidated",
            EventKind::DrawdownWarning => "drawdown_warning",
            EventKind::DrawdownCritical => "drawdown_critical",
        };
        f.write_str(name)
    }
}

/// Why a position left the book through a closing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    TakeProfit,
    Manual,
    EmergencyStop,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::TakeProfit => f.write_str("take_profit"),
            CloseReason::Manual => f.write_str("manual"),
            CloseReason::EmergencyStop => f.write_str("emergency_stop"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TradingEvent {
    Start {
        timestamp: DateTime<Utc>,
        mode: TradingMode,
        balance: f64,
    },
    Stop {
        timestamp: DateTime<Utc>,
        scan_count: u64,
        positions_opened: u64,
    },
    Pause {
        timestamp: DateTime<Utc>,
    },
    Resume {
        timestamp: DateTime<Utc>,
    },
    EmergencyStop {
        timestamp: DateTime<Utc>,
        closed_positions: usize,
    },
    DailyReset {
        timestamp: DateTime<Utc>,
        balance: f64,
    },
    PositionOpened {
        symbol: String,
        side: PositionSide,
        quantity: f64,
        price: f64,
        signal_data: SignalDecision,
        order_id: String,
        timestamp: DateTime<Utc>,
    },
    PositionClosed {
        symbol: String,
        pnl: f64,
        reason: CloseReason,
        order_id: String,
        timestamp: DateTime<Utc>,
    },
    PositionLiquidated {
        symbol: String,
        loss: f64,
        timestamp: DateTime<Utc>,
    },
    DrawdownWarning {
        daily_pnl_pct: f64,
        threshold: f64,
        timestamp: DateTime<Utc>,
    },
    DrawdownCritical {
        daily_pnl_pct: f64,
        threshold: f64,
        timestamp: DateTime<Utc>,
    },
}

impl TradingEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TradingEvent::Start { .. } => EventKind::Start,
            TradingEvent::Stop { .. } => EventKind::Stop,
            TradingEvent::Pause { .. } => EventKind::Pause,
            TradingEvent::Resume { .. } => EventKind::Resume,
            TradingEvent::EmergencyStop { .. } => EventKind::EmergencyStop,
            TradingEvent::DailyReset { .. } => EventKind::DailyReset,
            TradingEvent::PositionOpened { .. } => EventKind::PositionOpened,
            TradingEvent::PositionClosed { .. } => EventKind::PositionClosed,
            TradingEvent::PositionLiquidated { .. } => EventKind::PositionLiquidated,
            TradingEvent::DrawdownWarning { .. } => EventKind::DrawdownWarning,
            TradingEvent::DrawdownCritical { .. } => EventKind::DrawdownCritical,
        }
    }
}

pub type ListenerResult = Result<(), String>;
pub type ListenerFuture = Pin<Box<dyn Future<Output = ListenerResult> + Send>>;
type Listener = Arc<dyn Fn(TradingEvent) -> ListenerFuture + Send + Sync>;

#[derive(Clone)]
pub struct EventBus {
    listeners: Arc<RwLock<HashMap<EventKind, Vec<Listener>>>>,
    timeout: Duration,
}

impl EventBus {
    pub fn new(timeout: Duration) -> Self {
        EventBus {
            listeners: Arc::new(RwLock::new(HashMap::new())),
            timeout,
        }
    }

    pub fn subscribe<F, Fut>(&self, kind: EventKind, listener: F)
    where
        F: Fn(TradingEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        let boxed: Listener = Arc::new(move |event| Box::pin(listener(event)));
        self.listeners
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .entry(kind)
            .or_default()
            .push(boxed);
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Deliver `event` to every listener for its kind. Returns how many
    /// listeners completed successfully.
    pub async fn publish(&self, event: TradingEvent) -> usize {
        let kind = event.kind();
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&kind)
            .cloned()
            .unwrap_or_default();
        if listeners.is_empty() {
            debug!(event = %kind, "no listeners");
            return 0;
        }

        let mut delivered = 0;
        for (index, listener) in listeners.iter().enumerate() {
            let handle = tokio::spawn(listener(event.clone()));
            let abort = handle.abort_handle();
            match tokio::time::timeout(self.timeout, handle).await {
                Ok(Ok(Ok(()))) => delivered += 1,
                Ok(Ok(Err(reason))) => {
                    warn!(event = %kind, listener = index, %reason, "listener failed");
                }
                Ok(Err(join_err)) => {
                    error!(event = %kind, listener = index, error = %join_err, "listener panicked");
                }
                Err(_) => {
                    abort.abort();
                    warn!(
                        event = %kind,
                        listener = index,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "listener timed out"
                    );
                }
            }
        }
        delivered
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new(Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pause_event() -> TradingEvent {
        TradingEvent::Pause {
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn event_kind_matches_variant() {
        let event = TradingEvent::DrawdownCritical {
            daily_pnl_pct: -20.0,
            threshold: 20.0,
            timestamp: Utc::now(),
        };
        assert_eq!(event.kind(), EventKind::DrawdownCritical);
        assert_eq!(event.kind().to_string(), "drawdown_critical");
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = TradingEvent::PositionLiquidated {
            symbol: "BTCUSDT".into(),
            loss: 2.5,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "position_liquidated");
        assert_eq!(json["symbol"], "BTCUSDT");
    }

    #[tokio::test]
    async fn listeners_run_in_order_for_their_kind_only() {
        let bus = EventBus::default();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let seen = seen.clone();
            bus.subscribe(EventKind::Pause, move |_| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(tag);
                    Ok(())
                }
            });
        }
        let resumes = Arc::new(AtomicUsize::new(0));
        let r = resumes.clone();
        bus.subscribe(EventKind::Resume, move |_| {
            let r = r.clone();
            async move {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        assert_eq!(bus.publish(pause_event()).await, 2);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(resumes.load(Ordering::SeqCst), 0);
        assert_eq!(bus.listener_count(EventKind::Pause), 2);
        assert_eq!(bus.listener_count(EventKind::Stop), 0);
    }

    #[tokio::test]
    async fn failing_and_panicking_listeners_are_isolated() {
        let bus = EventBus::default();
        let after = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventKind::Pause, |_| async { Err("boom".to_string()) });
        bus.subscribe(EventKind::Pause, |_| async {
            let broken = true;
            assert!(!broken, "listener bug");
            Ok(())
        });
        let a = after.clone();
        bus.subscribe(EventKind::Pause, move |_| {
            let a = a.clone();
            async move {
                a.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        assert_eq!(bus.publish(pause_event()).await, 1);
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_listener_times_out() {
        let bus = EventBus::new(Duration::from_millis(20));
        bus.subscribe(EventKind::Pause, |_| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        });
        bus.subscribe(EventKind::Pause, |_| async { Ok(()) });

        let started = std::time::Instant::now();
        assert_eq!(bus.publish(pause_event()).await, 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
