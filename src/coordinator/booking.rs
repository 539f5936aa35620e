use std::collections::HashSet;

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::pricing;
use crate::store::{ReservationStore, ScreeningStore};

use super::{run_detached, BookingError, Coordinator};

/// Parse seat labels as a client sent them.
pub fn parse_seats<S: AsRef<str>>(labels: &[S]) -> Result<Vec<SeatLabel>, BookingError> {
    labels
        .iter()
        .map(|l| {
            l.as_ref()
                .trim()
                .parse::<SeatLabel>()
                .map_err(|e| BookingError::InvalidRequest(e.to_string()))
        })
        .collect()
}

/// Parse a comma-separated list: `A1,A2`.
pub fn parse_seat_list(list: &str) -> Result<Vec<SeatLabel>, BookingError> {
    if list.trim().is_empty() {
        return Ok(Vec::new());
    }
    parse_seats(&list.split(',').collect::<Vec<_>>())
}

fn validate_seats(layout: &HallLayout, seats: &[SeatLabel]) -> Result<(), BookingError> {
    if seats.is_empty() {
        return Err(BookingError::InvalidRequest("no seats requested".into()));
    }
    if seats.len() > MAX_SEATS_PER_RESERVATION {
        return Err(BookingError::InvalidRequest(format!(
            "at most {MAX_SEATS_PER_RESERVATION} seats per reservation"
        )));
    }
    let mut seen = HashSet::with_capacity(seats.len());
    for seat in seats {
        if !seen.insert(seat) {
            return Err(BookingError::InvalidRequest(format!("seat {seat} requested twice")));
        }
        if !layout.contains(seat) {
            return Err(BookingError::InvalidRequest(format!(
                "seat {seat} is not in a {}x{} hall",
                layout.rows, layout.seats_per_row
            )));
        }
    }
    Ok(())
}

pub(super) fn validate_user(user_id: &UserId) -> Result<(), BookingError> {
    if user_id.as_str().is_empty() || user_id.as_str().len() > MAX_USER_ID_LEN {
        return Err(BookingError::InvalidRequest("bad user id".into()));
    }
    Ok(())
}

impl Coordinator {
    pub async fn book(
        &self,
        user_id: &UserId,
        screening_id: ScreeningId,
        seats: &[SeatLabel],
    ) -> Result<Reservation, BookingError> {
        self.book_with_id(Ulid::new(), user_id, screening_id, seats).await
    }

    /// Book under a caller-chosen reservation id.
    pub async fn book_with_id(
        &self,
        id: ReservationId,
        user_id: &UserId,
        screening_id: ScreeningId,
        seats: &[SeatLabel],
    ) -> Result<Reservation, BookingError> {
        validate_user(user_id)?;
        let screening = self.store.get_screening(screening_id).await?;
        validate_seats(&screening.layout, seats)?;
        if self.store.get_reservation(id).await.is_ok() {
            return Err(BookingError::InvalidRequest(format!("id already in use: {id}")));
        }
        if self.policy.is_closed(screening.show_time, self.now()) {
            return Err(BookingError::PastShowing(screening_id));
        }

        let reservation = {
            let mut guard = self.ledger.lock(screening_id).await;
            // Re-read under the guard: the show time may have moved or passed
            // while we waited.
            let screening = self.store.get_screening(screening_id).await?;
            let now = self.now();
            if self.policy.is_closed(screening.show_time, now) {
                return Err(BookingError::PastShowing(screening_id));
            }
            let total_price =
                pricing::total_price(screening.base_price, screening.category, seats.len())
                    .ok_or_else(|| BookingError::InvalidRequest("price overflow".into()))?;

            if let Err(taken) = guard.try_reserve(seats) {
                metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
                tracing::warn!(
                    "booking conflict on {screening_id}: {} already held",
                    join_seats(&taken)
                );
                return Err(BookingError::SeatsUnavailable(taken));
            }
            Reservation {
                id,
                user_id: user_id.clone(),
                screening_id,
                seats: seats.to_vec(),
                total_price,
                status: ReservationStatus::Active,
                booked_at: now,
                cancelled_at: None,
            }
        };

        let store = self.store.clone();
        let ledger = self.ledger.clone();
        run_detached(async move {
            if let Err(e) = store.create_reservation(reservation.clone()).await {
                let released = ledger.release(screening_id, &reservation.seats).await;
                metrics::counter!(observability::COMPENSATIONS_TOTAL, "op" => "book")
                    .increment(1);
                tracing::warn!(
                    "booking {id} not persisted ({e}); released {released} seats on {screening_id}"
                );
                return Err(BookingError::from(e));
            }
            metrics::counter!(observability::BOOKINGS_TOTAL).increment(1);
            tracing::info!(
                "booked {id}: {} on {screening_id} for {} ({})",
                reservation.seat_list(),
                reservation.user_id,
                reservation.total_price
            );
            Ok(reservation)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_seat_list_trims_and_orders() {
        let seats = parse_seat_list("A1, A2 ,B10").unwrap();
        assert_eq!(join_seats(&seats), "A1,A2,B10");
        assert!(parse_seat_list("").unwrap().is_empty());
        assert!(matches!(parse_seat_list("A1,,A2"), Err(BookingError::InvalidRequest(_))));
        assert!(matches!(parse_seat_list("A1,a2"), Err(BookingError::InvalidRequest(_))));
    }

    #[test]
    fn seat_validation() {
        let layout = HallLayout::new(10, 10);
        let ok = parse_seat_list("A1,J10").unwrap();
        assert!(validate_seats(&layout, &ok).is_ok());

        for bad in ["A1,A1", "K1", "A11"] {
            let seats = parse_seat_list(bad).unwrap();
            assert!(
                matches!(validate_seats(&layout, &seats), Err(BookingError::InvalidRequest(_))),
                "{bad} should be rejected"
            );
        }
        assert!(validate_seats(&layout, &[]).is_err());

        let big = HallLayout::new(26, 999);
        let too_many: Vec<SeatLabel> = big.seats().take(MAX_SEATS_PER_RESERVATION + 1).collect();
        assert!(validate_seats(&big, &too_many).is_err());
        assert!(validate_seats(&big, &too_many[..MAX_SEATS_PER_RESERVATION]).is_ok());
    }

    #[test]
    fn user_validation() {
        assert!(validate_user(&UserId::from("alice")).is_ok());
        assert!(validate_user(&UserId::from("")).is_err());
        assert!(validate_user(&UserId::new("x".repeat(MAX_USER_ID_LEN + 1))).is_err());
    }
}
