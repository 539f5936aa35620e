use ulid::Ulid;

use crate::lifecycle::TransitionError;
use crate::model::{join_seats, ReservationId, ReservationStatus, ScreeningId, SeatLabel};
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    NotFound(Ulid),
    InvalidRequest(String),
    PastShowing(ScreeningId),
    /// The requested seats that were already held, in request order.
    SeatsUnavailable(Vec<SeatLabel>),
    Forbidden(ReservationId),
    AlreadyCancelled(ReservationId),
    InvalidTransition {
        id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
    },
    StorageFailure(String),
}

impl BookingError {
    pub(super) fn transition(id: ReservationId, e: TransitionError) -> Self {
        match e {
            TransitionError::AlreadyCancelled => BookingError::AlreadyCancelled(id),
            TransitionError::NotAllowed { from, to } => {
                BookingError::InvalidTransition { id, from, to }
            }
        }
    }
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::NotFound(id) => write!(f, "not found: {id}"),
            BookingError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            BookingError::PastShowing(id) => {
                write!(f, "screening {id} has started or is past its booking cutoff")
            }
            BookingError::SeatsUnavailable(seats) => {
                write!(f, "seats unavailable: {}", join_seats(seats))
            }
            BookingError::Forbidden(id) => {
                write!(f, "reservation {id} belongs to another user")
            }
            BookingError::AlreadyCancelled(id) => {
                write!(f, "reservation {id} is already cancelled")
            }
            BookingError::InvalidTransition { id, from, to } => {
                write!(f, "reservation {id} cannot move from {from} to {to}")
            }
            BookingError::StorageFailure(e) => write!(f, "storage failure: {e}"),
        }
    }
}

impl std::error::Error for BookingError {}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => BookingError::NotFound(id),
            StoreError::AlreadyExists(id) => {
                BookingError::InvalidRequest(format!("id already in use: {id}"))
            }
            StoreError::Io(msg) => BookingError::StorageFailure(msg),
        }
    }
}
