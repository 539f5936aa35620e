use crate::limits::MAX_SEATS_PER_RESERVATION;
use crate::model::*;
use crate::pricing;
use crate::store::{ReservationStore, ScreeningStore};

use super::{BookingError, Coordinator};

impl Coordinator {
    pub async fn screening(&self, id: ScreeningId) -> Result<Screening, BookingError> {
        Ok(self.store.get_screening(id).await?)
    }

    /// Seats not held by any Active reservation, row-major.
    pub async fn available_seats(&self, screening_id: ScreeningId) -> Result<Vec<SeatLabel>, BookingError> {
        let screening = self.store.get_screening(screening_id).await?;
        let held = self.ledger.snapshot(screening_id).await;
        Ok(screening
            .layout
            .seats()
            .filter(|s| !held.contains(s))
            .collect())
    }

    /// Seats held by Active reservations, row-major.
    pub async fn booked_seats(&self, screening_id: ScreeningId) -> Result<Vec<SeatLabel>, BookingError> {
        self.store.get_screening(screening_id).await?;
        Ok(self.ledger.snapshot(screening_id).await.into_iter().collect())
    }

    /// What `seat_count` seats would cost right now.
    pub async fn quote(&self, screening_id: ScreeningId, seat_count: usize) -> Result<Money, BookingError> {
        let screening = self.store.get_screening(screening_id).await?;
        if seat_count == 0 || seat_count > MAX_SEATS_PER_RESERVATION {
            return Err(BookingError::InvalidRequest(format!(
                "seat count must be 1..={MAX_SEATS_PER_RESERVATION}"
            )));
        }
        pricing::total_price(screening.base_price, screening.category, seat_count)
            .ok_or_else(|| BookingError::InvalidRequest("price overflow".into()))
    }

    /// Newest first.
    pub async fn reservations_for(&self, user_id: &UserId) -> Result<Vec<Reservation>, BookingError> {
        Ok(self.store.find_by_user(user_id).await?)
    }

    /// Screenings that have not started, soonest first.
    pub async fn upcoming_screenings(&self) -> Result<Vec<Screening>, BookingError> {
        let now = self.now();
        let mut upcoming: Vec<Screening> = self
            .store
            .list_screenings()
            .await?
            .into_iter()
            .filter(|s| s.show_time > now)
            .collect();
        upcoming.sort_by_key(|s| (s.show_time, s.id));
        Ok(upcoming)
    }
}
