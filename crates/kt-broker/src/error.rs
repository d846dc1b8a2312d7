//! Broker error taxonomy with retry classification.

use thiserror::Error;

/// Errors surfaced by broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("not connected to broker")]
    NotConnected,

    #[error("authentication failed: {message}")]
    Auth { message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("connection error: {message}")]
    Connection { message: String },

    #[error("request timed out")]
    Timeout,

    /// The venue answered HTTP 200 but with a non-success payload code.
    #[error("venue error {code}: {message}")]
    Venue { code: String, message: String },

    /// No order id could be extracted from any known response shape.
    #[error("order id missing from response: {excerpt}")]
    OrderIdMissing { excerpt: String },

    #[error("order rejected: {reason}")]
    OrderRejected { reason: String },

    /// Pre-submit validation failure; never retried.
    #[error("invalid order: {message}")]
    InvalidOrder { message: String },

    #[error("websocket error: {message}")]
    WebSocket { message: String },

    #[error("parse error: {message}")]
    Parse { message: String },

    #[error("internal broker error: {message}")]
    Internal { message: String },
}

impl BrokerError {
    /// Whether a retry loop may try again after this error.
    ///
    /// Venue error codes and a missing order id are retryable (the venue may
    /// answer differently on the next attempt); validation and rejection are
    /// terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            BrokerError::Timeout
            | BrokerError::Connection { .. }
            | BrokerError::Venue { .. }
            | BrokerError::OrderIdMissing { .. } => true,
            BrokerError::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(BrokerError::Timeout.is_retryable());
        assert!(BrokerError::Connection {
            message: "reset".into()
        }
        .is_retryable());
        assert!(BrokerError::Venue {
            code: "IGW00121".into(),
            message: "rate limited".into()
        }
        .is_retryable());
        assert!(BrokerError::OrderIdMissing {
            excerpt: "{}".into()
        }
        .is_retryable());

        assert!(!BrokerError::InvalidOrder {
            message: "quantity <= 0".into()
        }
        .is_retryable());
        assert!(!BrokerError::OrderRejected {
            reason: "insufficient funds".into()
        }
        .is_retryable());
        assert!(!BrokerError::NotConnected.is_retryable());
    }
}
