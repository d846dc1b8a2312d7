use thiserror::Error;

/// Top-level error for the kstrade system.
#[derive(Error, Debug)]
pub enum KtError {
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),

    #[error("Backtest error: {0}")]
    Backtest(#[from] BacktestError),

    #[error("Risk error: {0}")]
    Risk(#[from] RiskError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Data-layer errors (storage, bar building, integrity).
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Invalid data format: {message}")]
    InvalidFormat { message: String },

    #[error("Data corruption detected: {message}")]
    Corruption { message: String },

    #[error("Insufficient data: {message}")]
    InsufficientData { message: String },

    #[error("No data available for {symbol} in range {start} to {end}")]
    NoDataInRange {
        symbol: String,
        start: String,
        end: String,
    },

    #[error("Data loading failed: {message}")]
    LoadingFailed { message: String },

    #[error("Arrow error: {0}")]
    Arrow(String),

    #[error("Parquet error: {0}")]
    Parquet(String),
}

/// Strategy-layer errors.
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Strategy not found: {name}")]
    NotFound { name: String },

    #[error("Invalid strategy configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Condition tree too deep: {depth} exceeds limit {limit}")]
    ConditionTooDeep { depth: usize, limit: usize },

    #[error("Strategy execution error: {message}")]
    ExecutionError { message: String },
}

/// Backtest errors.
#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidDateRange { start: String, end: String },

    #[error("Not enough bars: have {have}, need {need}")]
    NotEnoughBars { have: usize, need: usize },

    #[error("Backtest execution failed: {message}")]
    ExecutionFailed { message: String },
}

/// Risk-control errors.
#[derive(Error, Debug)]
pub enum RiskError {
    #[error("Risk limit violation: {message}")]
    LimitViolation { message: String },

    #[error("Emergency stop is active")]
    EmergencyStop,
}

/// Result alias for kstrade operations.
pub type KtResult<T> = Result<T, KtError>;
