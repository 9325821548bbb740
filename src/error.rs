// ===============================
// src/error.rs
// ===============================
use thiserror::Error;

/// Errors surfaced by the stores and the payment orchestrator.
/// Financial paths always propagate these; best-effort side effects
/// (activity feed, notifications) log and swallow their own failures.
#[derive(Debug, Error)]
pub enum PayError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("insufficient wallet balance")]
    InsufficientFunds,

    #[error("insufficient escrow balance")]
    InsufficientEscrow,

    #[error("milestone already paid")]
    AlreadyPaid,

    #[error("milestone already completed")]
    AlreadyCompleted,

    #[error("review already submitted for this role")]
    AlreadyReviewed,

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error("validation failed: {0}")]
    Validation(&'static str),
}

pub type PayResult<T> = Result<T, PayError>;
