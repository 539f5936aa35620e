use crate::ledger::LedgerGuard;
use crate::model::*;
use crate::observability;
use crate::store::{ReservationStore, ScreeningStore};

use super::{run_detached, BookingError, Coordinator};

impl Coordinator {
    pub async fn cancel(
        &self,
        reservation_id: ReservationId,
        user_id: &UserId,
    ) -> Result<Reservation, BookingError> {
        let reservation = self.store.get_reservation(reservation_id).await?;
        if reservation.user_id != *user_id {
            return Err(BookingError::Forbidden(reservation_id));
        }

        let guard = self.ledger.lock(reservation.screening_id).await;
        // Another cancel may have committed while we waited for the guard.
        let reservation = self.store.get_reservation(reservation_id).await?;
        let now = self.now();
        let cancelled = reservation
            .cancel(now)
            .map_err(|e| BookingError::transition(reservation_id, e))?;
        let screening = self.store.get_screening(reservation.screening_id).await?;
        if self.policy.is_closed(screening.show_time, now) {
            return Err(BookingError::PastShowing(screening.id));
        }

        let cancelled = self.commit_release(guard, cancelled).await?;
        metrics::counter!(observability::CANCELLATIONS_TOTAL).increment(1);
        tracing::info!(
            "cancelled {reservation_id}: released {} on {}",
            cancelled.seat_list(),
            cancelled.screening_id
        );
        Ok(cancelled)
    }

    /// Mark an Active reservation as used. Not tied to an owner or a time
    /// window; the sweeper calls it once a showing has started.
    pub async fn complete(&self, reservation_id: ReservationId) -> Result<Reservation, BookingError> {
        let reservation = self.store.get_reservation(reservation_id).await?;
        let guard = self.ledger.lock(reservation.screening_id).await;
        let reservation = self.store.get_reservation(reservation_id).await?;
        let completed = reservation
            .complete()
            .map_err(|e| BookingError::transition(reservation_id, e))?;
        let completed = self.commit_release(guard, completed).await?;
        metrics::counter!(observability::COMPLETIONS_TOTAL).increment(1);
        Ok(completed)
    }

    /// Complete every Active reservation of every screening whose show time
    /// has been reached, then drop those screenings from the ledger. Returns
    /// how many reservations were completed.
    pub async fn complete_elapsed(&self) -> Result<usize, BookingError> {
        let now = self.now();
        let mut completed = 0;
        for screening in self.store.list_screenings().await? {
            if screening.show_time > now {
                continue;
            }
            for reservation in self.store.find_active_by_screening(screening.id).await? {
                match self.complete(reservation.id).await {
                    Ok(_) => completed += 1,
                    Err(BookingError::StorageFailure(e)) => return Err(BookingError::StorageFailure(e)),
                    // Settled by someone else in the meantime.
                    Err(e) => tracing::debug!("skip completing {}: {e}", reservation.id),
                }
            }
            if !self.ledger.evict(screening.id) {
                tracing::debug!("ledger entry for {} still in use", screening.id);
            }
        }
        metrics::gauge!(observability::LEDGER_SCREENINGS).set(self.ledger.len() as f64);
        if completed > 0 {
            tracing::info!("completed {completed} reservations of elapsed screenings");
        }
        Ok(completed)
    }

    /// Release the reservation's seats and persist its new status as one step
    /// under the screening's guard. If the write fails the seats are taken
    /// back, so the ledger keeps matching what is durable.
    async fn commit_release(
        &self,
        mut guard: LedgerGuard,
        next: Reservation,
    ) -> Result<Reservation, BookingError> {
        let store = self.store.clone();
        run_detached(async move {
            guard.release(&next.seats);
            match store.update_status(next.id, next.status, next.cancelled_at).await {
                Ok(updated) => Ok(updated),
                Err(e) => {
                    if let Err(taken) = guard.try_reserve(&next.seats) {
                        tracing::error!(
                            "could not restore seats {} of {} on {}",
                            join_seats(&taken),
                            next.id,
                            guard.screening_id()
                        );
                    }
                    metrics::counter!(observability::COMPENSATIONS_TOTAL, "op" => next.status.as_str())
                        .increment(1);
                    tracing::warn!("{} of {} not persisted ({e}); seats restored", next.status, next.id);
                    Err(BookingError::from(e))
                }
            }
        })
        .await
    }
}
