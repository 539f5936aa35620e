use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::store::ScreeningStore;

use super::{BookingError, Coordinator};

/// Everything needed to schedule a screening.
#[derive(Debug, Clone)]
pub struct NewScreening {
    pub id: ScreeningId,
    pub movie_id: Ulid,
    pub hall_id: Ulid,
    pub layout: HallLayout,
    pub show_time: Ms,
    pub base_price: Money,
    pub category: Category,
}

fn validate_terms(show_time: Ms, base_price: Money, now: Ms) -> Result<(), BookingError> {
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&show_time) {
        return Err(BookingError::InvalidRequest(format!("show time out of range: {show_time}")));
    }
    if show_time <= now {
        return Err(BookingError::InvalidRequest("show time must be in the future".into()));
    }
    if base_price.is_zero() || base_price.cents() > MAX_BASE_PRICE_CENTS {
        return Err(BookingError::InvalidRequest(format!("bad base price: {base_price}")));
    }
    Ok(())
}

impl Coordinator {
    pub async fn create_screening(&self, new: NewScreening) -> Result<Screening, BookingError> {
        if !new.layout.is_valid() {
            return Err(BookingError::InvalidRequest(format!(
                "hall layout must be 1..={MAX_ROWS} rows of 1..={MAX_SEATS_PER_ROW} seats"
            )));
        }
        let now = self.now();
        validate_terms(new.show_time, new.base_price, now)?;
        if self.store.screening_count().await? >= MAX_SCREENINGS {
            return Err(BookingError::InvalidRequest("too many screenings".into()));
        }

        let screening = Screening {
            id: new.id,
            movie_id: new.movie_id,
            hall_id: new.hall_id,
            layout: new.layout,
            show_time: new.show_time,
            base_price: new.base_price,
            category: new.category,
            created_at: now,
        };
        self.store.create_screening(screening.clone()).await?;
        tracing::info!(
            "screening {} scheduled at {} ({} seats, {} {})",
            screening.id,
            screening.show_time,
            screening.layout.capacity(),
            screening.base_price,
            screening.category
        );
        Ok(screening)
    }

    /// Reschedule or reprice a screening that has not started. Reservations
    /// already made keep the price they were booked at.
    pub async fn update_screening(
        &self,
        id: ScreeningId,
        show_time: Ms,
        base_price: Money,
        category: Category,
    ) -> Result<Screening, BookingError> {
        self.store.get_screening(id).await?;
        // Held so no booking or cancel judges the window against the old time.
        let _guard = self.ledger.lock(id).await;
        let current = self.store.get_screening(id).await?;
        let now = self.now();
        if current.show_time <= now {
            return Err(BookingError::PastShowing(id));
        }
        validate_terms(show_time, base_price, now)?;

        let updated = current.updated(show_time, base_price, category);
        self.store.update_screening(updated.clone()).await?;
        tracing::info!("screening {id} updated: {show_time}, {base_price} {category}");
        Ok(updated)
    }
}
