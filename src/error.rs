use thiserror::Error;

use crate::domain::ports::GatewayError;
use crate::domain::request::RequestStatus;

/// Which verification code a validation attempt targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    Arrival,
    Completion,
}

impl std::fmt::Display for CodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodeKind::Arrival => write!(f, "arrival"),
            CodeKind::Completion => write!(f, "completion"),
        }
    }
}

/// Errors crossing the marketplace core boundary.
///
/// Mutating operations always fail through this type. Read operations on
/// missing entities return `Ok(None)` or an empty collection instead, which
/// keeps pollers simple.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
    },
    #[error("this offer is no longer available")]
    OfferNotAvailable,
    #[error("an accepted offer cannot be withdrawn while its request is active")]
    CannotWithdrawAcceptedOffer,
    #[error("invalid {0} code")]
    InvalidCode(CodeKind),
    #[error("payment gateway error: {0}")]
    PaymentGateway(#[from] GatewayError),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("{0} not found")]
    NotFound(&'static str),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
