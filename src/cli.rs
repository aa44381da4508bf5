//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{info, warn};

use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::error::ShortbotError;
use crate::domain::risk::StopReason;
use crate::domain::settings::{load_settings, BotSettings, TradingMode};
use crate::engine::{EventKind, TradeEngine};
use crate::logging::init_tracing;
use crate::ports::config_port::ConfigPort;

#[derive(Parser, Debug)]
#[command(name = "shortbot", about = "Short-only perpetual futures trading bot")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the trading engine until interrupted
    Run {
        #[arg(short, long)]
        config: PathBuf,
        /// Force paper trading regardless of the configured mode
        #[arg(long)]
        paper: bool,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Evaluate the short signal for one symbol and print it as JSON
    Signal {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: String,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Run { config, paper } => run_engine(&config, paper),
        Command::Validate { config } => run_validate(&config),
        Command::Signal { config, symbol } => run_signal(&config, &symbol),
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        eprintln!("error: {e}");
        ExitCode::from(&e)
    })
}

/// Load, parse and validate the bot settings from an INI file.
pub fn load_bot_settings(path: &Path) -> Result<BotSettings, ExitCode> {
    let adapter = load_config(path)?;
    load_settings(&adapter).map_err(|e| {
        match &e {
            ShortbotError::RuleParse(parse) => {
                let text = adapter
                    .get_string("indicators", "custom_rule")
                    .unwrap_or_default();
                eprintln!(
                    "error: failed to parse custom_rule:\n{}",
                    parse.display_with_context(&text)
                );
            }
            other => eprintln!("error: {other}"),
        }
        ExitCode::from(&e)
    })
}

/// Human-readable overview of the effective settings.
pub fn settings_summary(settings: &BotSettings) -> String {
    let mut out = String::new();
    let s = &settings.strategy;
    let r = &settings.risk;
    let _ = writeln!(out, "Mode:               {}", settings.mode);
    let _ = writeln!(
        out,
        "Scan / monitor:     {}s / {}s",
        settings.app.scan_interval.as_secs(),
        settings.app.monitor_interval.as_secs()
    );
    let _ = writeln!(out, "Top gainers:        {}", settings.app.top_gainers_limit);
    let _ = writeln!(out, "Timeframe:          {}", s.timeframe);
    let _ = writeln!(out, "Signal logic:       {}", s.signal_logic);
    let _ = writeln!(out, "Position size:      {:.2} USD", s.position_size_usd);
    let _ = writeln!(out, "Max positions:      {}", s.max_concurrent_positions);
    let _ = writeln!(out, "Take profit:        {:.2}%", s.tp_percentage);
    let _ = writeln!(
        out,
        "Daily drawdown:     warn {:.1}% / stop {:.1}%",
        r.daily_warning_threshold, r.daily_shutdown_threshold
    );
    let _ = writeln!(out, "Max consecutive L:  {}", r.max_consecutive_losses);
    if let Some(rule) = &settings.indicators.custom_rule {
        let _ = writeln!(out, "Custom rule:        {rule}");
    }
    match settings.mode {
        TradingMode::Paper => {
            let _ = writeln!(out, "Paper balance:      {:.2}", settings.paper.initial_balance);
        }
        TradingMode::Live => {
            let net = if settings.exchange.testnet { "testnet" } else { "mainnet" };
            let _ = writeln!(out, "Exchange:           {net}");
        }
    }
    out
}

pub fn run_validate(config_path: &Path) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let settings = match load_bot_settings(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    eprint!("\n{}", settings_summary(&settings));
    eprintln!("\nConfiguration is valid.");
    ExitCode::SUCCESS
}

fn runtime() -> Result<tokio::runtime::Runtime, ExitCode> {
    tokio::runtime::Runtime::new().map_err(|e| {
        let err = ShortbotError::Io(e);
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

fn run_engine(config_path: &Path, force_paper: bool) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let mut settings = match load_bot_settings(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    if force_paper {
        settings.mode = TradingMode::Paper;
    }
    let _guard = init_tracing(&settings.app.log_level, settings.app.log_dir.as_deref());
    let rt = match runtime() {
        Ok(rt) => rt,
        Err(code) => return code,
    };

    rt.block_on(async move {
        let engine = TradeEngine::new(settings);
        let stopped = Arc::new(Notify::new());
        let notify = stopped.clone();
        engine.subscribe(EventKind::Stop, move |_| {
            let notify = notify.clone();
            async move {
                notify.notify_one();
                Ok(())
            }
        });

        if let Err(e) = engine.start().await {
            eprintln!("error: {e}");
            engine.shutdown().await;
            return ExitCode::from(&e);
        }

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "interrupt handler failed");
                }
                info!("interrupt received, shutting down");
            }
            _ = stopped.notified() => warn!("engine stopped on its own"),
        }
        engine.shutdown().await;

        let status = engine.get_status();
        match serde_json::to_string_pretty(&status) {
            Ok(json) => println!("{json}"),
            Err(e) => warn!(error = %e, "could not render final status"),
        }

        if let Some(StopReason::DailyDrawdown {
            current_pct,
            limit_pct,
        }) = engine.should_stop_trading()
        {
            let err = ShortbotError::DrawdownExceeded {
                current: current_pct.abs(),
                limit: limit_pct,
            };
            eprintln!("error: {err}");
            return ExitCode::from(&err);
        }
        ExitCode::SUCCESS
    })
}

fn run_signal(config_path: &Path, symbol: &str) -> ExitCode {
    let settings = match load_bot_settings(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let _guard = init_tracing(&settings.app.log_level, None);
    let rt = match runtime() {
        Ok(rt) => rt,
        Err(code) => return code,
    };

    rt.block_on(async move {
        let engine = TradeEngine::new(settings);
        let result = match engine.initialize().await {
            Ok(()) => engine.evaluate_symbol(symbol).await,
            Err(e) => Err(e),
        };
        engine.shutdown().await;

        match result {
            Ok(decision) => match serde_json::to_string_pretty(&decision) {
                Ok(json) => {
                    println!("{json}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    ExitCode::from(1)
                }
            },
            Err(e) => {
                eprintln!("error: {e}");
                ExitCode::from(&e)
            }
        }
    })
}
