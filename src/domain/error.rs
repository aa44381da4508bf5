//! Domain error types.

/// A parse error with position information for custom rule parsing.
#[derive(Debug, Clone, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self, input: &str) -> String {
        let caret = " ".repeat(self.position) + "^";
        format!(
            "{input}\n{caret}\n{err}",
            input = input,
            caret = caret,
            err = self
        )
    }
}

/// Top-level error type for shortbot.
#[derive(Debug, thiserror::Error)]
pub enum ShortbotError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    RuleParse(#[from] ParseError),

    #[error("exchange api error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("transport error: {reason}")]
    Transport { reason: String },

    #[error("connectivity check failed: {reason}")]
    Connectivity { reason: String },

    #[error("insufficient balance: need {required:.4}, have {available:.4}")]
    InsufficientBalance { required: f64, available: f64 },

    #[error("invalid symbol {symbol}")]
    InvalidSymbol { symbol: String },

    #[error("insufficient data for {symbol}: have {bars} bars, need {minimum}")]
    InsufficientData {
        symbol: String,
        bars: usize,
        minimum: usize,
    },

    #[error("indicator calculation failed: {reason}")]
    IndicatorCalculation { reason: String },

    #[error("daily drawdown exceeded: {current:.2}% (limit {limit:.2}%)")]
    DrawdownExceeded { current: f64, limit: f64 },

    #[error("risk check failed: {reason}")]
    RiskManagement { reason: String },

    #[error("order execution failed for {symbol}: {reason}")]
    OrderExecution { symbol: String, reason: String },

    #[error("invalid engine state: {reason}")]
    InvalidState { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ShortbotError {
    /// Errors that end a run instead of skipping one candidate or one cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ShortbotError::Connectivity { .. }
                | ShortbotError::DrawdownExceeded { .. }
                | ShortbotError::ConfigParse { .. }
                | ShortbotError::ConfigMissing { .. }
                | ShortbotError::ConfigInvalid { .. }
                | ShortbotError::RuleParse(_)
        )
    }
}

impl From<&ShortbotError> for std::process::ExitCode {
    fn from(err: &ShortbotError) -> Self {
        let code: u8 = match err {
            ShortbotError::Io(_) | ShortbotError::InvalidState { .. } => 1,
            ShortbotError::ConfigParse { .. }
            | ShortbotError::ConfigMissing { .. }
            | ShortbotError::ConfigInvalid { .. } => 2,
            ShortbotError::Api { .. }
            | ShortbotError::Transport { .. }
            | ShortbotError::Connectivity { .. }
            | ShortbotError::OrderExecution { .. } => 3,
            ShortbotError::RuleParse(_) => 4,
            ShortbotError::InvalidSymbol { .. }
            | ShortbotError::InsufficientData { .. }
            | ShortbotError::IndicatorCalculation { .. } => 5,
            ShortbotError::InsufficientBalance { .. }
            | ShortbotError::DrawdownExceeded { .. }
            | ShortbotError::RiskManagement { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}
