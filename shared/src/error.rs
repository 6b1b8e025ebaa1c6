//! Domain errors raised by the pure inventory rules

use thiserror::Error;

use crate::models::{EmpenhoStatus, Shortfall};

/// Errors produced by ledger, empenho and layout rules before anything is persisted
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    #[error("{field}: {message}")]
    Invalid {
        field: &'static str,
        message: &'static str,
    },

    #[error("Quantity {} exceeds balance {} of lot {}", .0.requested, .0.available, .0.lot)]
    InsufficientBalance(Shortfall),

    #[error("Insufficient balance for {} lot(s)", .0.len())]
    Shortfalls(Vec<Shortfall>),

    #[error("Cannot {action} an empenho in status {from}")]
    InvalidTransition {
        from: EmpenhoStatus,
        action: &'static str,
    },

    #[error("Unsupported map document version {0}")]
    UnsupportedVersion(u32),

    #[error("Another record already has this {0}")]
    DuplicateKey(&'static str),

    #[error("{0} is still referenced and cannot be removed")]
    Referenced(&'static str),
}

impl DomainError {
    pub fn invalid(field: &'static str, message: &'static str) -> Self {
        DomainError::Invalid { field, message }
    }
}
