use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResvError {
    #[error("Permission denied: requester lacks manager or operator privilege")]
    PermissionDenied,

    #[error("Unknown reservation: {0}")]
    UnknownReservation(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Bad node specification")]
    BadNodeSpec,

    #[error("Resource allocation failed: {0}")]
    ResourceExhaustion(String),

    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("Reservation is no longer schedulable")]
    Infeasible,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ResvError>;
