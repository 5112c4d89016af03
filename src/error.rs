use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid transaction: {0}")]
    Validation(String),

    #[error("insufficient inventory for {ticker}: requested {requested}, available {available}")]
    InsufficientInventory {
        ticker: String,
        requested: Decimal,
        available: Decimal,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("ledger storage failure: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("ledger audit trail is inconsistent: {0}")]
    Inconsistent(String),
}

impl LedgerError {
    pub fn validation(message: impl Into<String>) -> LedgerError {
        LedgerError::Validation(message.into())
    }

    /// Message safe to hand back to a client. Storage details stay in the logs.
    pub fn sanitized(&self) -> String {
        match self {
            LedgerError::Persistence(_) | LedgerError::Inconsistent(_) => {
                "the ledger could not be updated".to_string()
            }
            other => other.to_string(),
        }
    }

    /// True for failures of the store itself rather than of the request.
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, LedgerError::Persistence(_) | LedgerError::Inconsistent(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
