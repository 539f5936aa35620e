//! Reservation state machine.
//!
//! ```text
//! Active ──cancel──▶ Cancelled
//!    └────complete──▶ Completed
//! ```
//!
//! Transitions return a new value; the caller decides when it becomes durable.

use std::fmt;

use crate::model::{Ms, Reservation, ReservationStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    AlreadyCancelled,
    NotAllowed {
        from: ReservationStatus,
        to: ReservationStatus,
    },
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionError::AlreadyCancelled => write!(f, "reservation is already cancelled"),
            TransitionError::NotAllowed { from, to } => {
                write!(f, "cannot move reservation from {from} to {to}")
            }
        }
    }
}

impl std::error::Error for TransitionError {}

impl ReservationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Active)
    }

    pub fn can_transition_to(&self, to: ReservationStatus) -> bool {
        matches!(
            (self, to),
            (ReservationStatus::Active, ReservationStatus::Cancelled)
                | (ReservationStatus::Active, ReservationStatus::Completed)
        )
    }
}

fn check(from: ReservationStatus, to: ReservationStatus) -> Result<(), TransitionError> {
    if from.can_transition_to(to) {
        return Ok(());
    }
    if from == ReservationStatus::Cancelled && to == ReservationStatus::Cancelled {
        return Err(TransitionError::AlreadyCancelled);
    }
    Err(TransitionError::NotAllowed { from, to })
}

impl Reservation {
    pub fn cancel(&self, at: Ms) -> Result<Reservation, TransitionError> {
        check(self.status, ReservationStatus::Cancelled)?;
        Ok(Reservation {
            status: ReservationStatus::Cancelled,
            cancelled_at: Some(at),
            ..self.clone()
        })
    }

    pub fn complete(&self) -> Result<Reservation, TransitionError> {
        check(self.status, ReservationStatus::Completed)?;
        Ok(Reservation {
            status: ReservationStatus::Completed,
            ..self.clone()
        })
    }
}
