//! Membership error types

use thiserror::Error;

/// Required inbound data was missing or unusable.
///
/// Raised by the normalizer before anything touches the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn email_required() -> Self {
        Self::new("email required")
    }
}

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Member not found: {0}")]
    MemberNotFound(String),

    #[error("CSV import error: {0}")]
    Csv(String),

    #[error("Missing required CSV column: {0}")]
    MissingColumn(&'static str),

    #[error("PayPal API error: {0}")]
    Paypal(String),
}

impl From<sqlx::Error> for MembershipError {
    fn from(err: sqlx::Error) -> Self {
        MembershipError::Store(err.to_string())
    }
}

impl From<csv::Error> for MembershipError {
    fn from(err: csv::Error) -> Self {
        MembershipError::Csv(err.to_string())
    }
}

impl From<reqwest::Error> for MembershipError {
    fn from(err: reqwest::Error) -> Self {
        MembershipError::Paypal(err.to_string())
    }
}

pub type MembershipResult<T> = Result<T, MembershipError>;
