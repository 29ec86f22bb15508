//! Result and error types for the core library

use thiserror::Error;

use super::card::{CardId, CardStatus};
use super::owner::OwnerId;

/// Core library error type
///
/// Messages never carry a clear-text or encrypted card number. Variants that
/// identify a card by number hold the masked form (`**** **** **** 1234`).
#[derive(Error, Debug)]
pub enum Error {
    // === Transfer taxonomy ===
    #[error("Transfer amount must be greater than 0")]
    InvalidAmount,

    #[error("Cannot transfer to the same card")]
    SameAccount,

    #[error("Owner not found: {0}")]
    OwnerNotFound(OwnerId),

    #[error("Card not found: {0}")]
    AccountNotFound(String),

    #[error("Insufficient funds on card {0}")]
    InsufficientFunds(String),

    #[error("Crypto error: {0}")]
    CryptoFailure(String),

    #[error("Lock wait timeout exceeded for card id = {0}")]
    LockTimeout(CardId),

    // === Card administration ===
    #[error("Card not found: id = {0}")]
    CardNotFound(CardId),

    #[error("Card number is already in use")]
    CardNumberTaken,

    #[error("Card id = {card_id} does not belong to owner id = {owner_id}")]
    NotCardOwner { card_id: CardId, owner_id: OwnerId },

    #[error("Cannot change card status from {from} to {to}")]
    InvalidStatusTransition { from: CardStatus, to: CardStatus },

    #[error("Validation error: {0}")]
    Validation(String),

    // === Infrastructure ===
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a crypto error
    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::CryptoFailure(msg.into())
    }

    /// True when the caller may resubmit the same request unchanged.
    ///
    /// Only a lock-wait timeout qualifies. The engine never retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout(_))
    }
}

impl From<duckdb::Error> for Error {
    fn from(e: duckdb::Error) -> Self {
        Self::Database(e.to_string())
    }
}

/// Core library result type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_lock_timeout_is_retryable() {
        assert!(Error::LockTimeout(3).is_retryable());
        assert!(!Error::InsufficientFunds("**** **** **** 1111".to_string()).is_retryable());
        assert!(!Error::crypto("bad key").is_retryable());
        assert!(!Error::SameAccount.is_retryable());
    }

    #[test]
    fn test_messages_carry_masked_number() {
        let err = Error::AccountNotFound("**** **** **** 4242".to_string());
        assert_eq!(err.to_string(), "Card not found: **** **** **** 4242");

        let err = Error::InvalidStatusTransition {
            from: CardStatus::Expired,
            to: CardStatus::Active,
        };
        assert_eq!(err.to_string(), "Cannot change card status from EXPIRED to ACTIVE");
    }
}
