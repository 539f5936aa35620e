//! Booking coordinator: the only writer of reservations.
//!
//! Every booking, cancellation and completion for a screening passes through
//! that screening's ledger guard, which makes the ledger the serialization
//! point. The store only ever sees writes that the ledger has already
//! admitted.

mod booking;
mod cancellation;
mod error;
mod queries;
mod screenings;
#[cfg(test)]
mod tests;

pub use booking::{parse_seat_list, parse_seats};
pub use error::BookingError;
pub use screenings::NewScreening;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use crate::clock::Clock;
use crate::ledger::{SeatLedger, SeatSet};
use crate::limits::MAX_CUTOFF_MS;
use crate::model::*;
use crate::observability;
use crate::store::{ReservationStore, ScreeningStore, Store};

/// When a screening stops taking bookings and cancellations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookingPolicy {
    /// How long before the show time the window closes. Zero closes it at
    /// the show time itself.
    pub cutoff_ms: Ms,
}

impl BookingPolicy {
    pub fn new(cutoff_ms: Ms) -> Self {
        Self {
            cutoff_ms: cutoff_ms.clamp(0, MAX_CUTOFF_MS),
        }
    }

    pub fn deadline(&self, show_time: Ms) -> Ms {
        show_time.saturating_sub(self.cutoff_ms)
    }

    /// `now == deadline` already counts as closed.
    pub fn is_closed(&self, show_time: Ms, now: Ms) -> bool {
        now >= self.deadline(show_time)
    }
}

pub struct Coordinator {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    ledger: Arc<SeatLedger>,
    policy: BookingPolicy,
}

impl Coordinator {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            ledger: Arc::new(SeatLedger::new()),
            policy: BookingPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: BookingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> BookingPolicy {
        self.policy
    }

    pub fn ledger(&self) -> &SeatLedger {
        &self.ledger
    }

    pub fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Load every screening's Active seats into the ledger. Run once at
    /// startup, before the coordinator serves requests.
    ///
    /// A seat claimed by more than one Active reservation stays held and is
    /// reported in [`LedgerRebuild::conflicts`]; it is never sold again, but
    /// the overlapping reservations need an operator.
    pub async fn rebuild_ledger(&self) -> Result<LedgerRebuild, BookingError> {
        let mut report = LedgerRebuild::default();
        for screening in self.store.list_screenings().await? {
            let active = self.store.find_active_by_screening(screening.id).await?;
            let (seats, conflicts) = fold_active(screening.id, &active);
            log_conflicts(&conflicts);
            report.conflicts.extend(conflicts);
            if seats.is_empty() {
                continue;
            }
            self.ledger.replace(screening.id, seats).await;
            report.screenings += 1;
        }
        metrics::gauge!(observability::LEDGER_SCREENINGS).set(self.ledger.len() as f64);
        if !report.conflicts.is_empty() {
            metrics::counter!(observability::LEDGER_DRIFT_TOTAL)
                .increment(report.conflicts.len() as u64);
        }
        tracing::info!(
            "ledger rebuilt: {} screenings with held seats, {} conflicting seats",
            report.screenings,
            report.conflicts.len()
        );
        Ok(report)
    }

    /// Compare a screening's ledger entry with the store. Committed seats the
    /// ledger lost are put back. Held seats without a committed reservation are
    /// only reported: a booking may be between its ledger change and its write.
    /// Seats claimed by several Active reservations count as drift until an
    /// operator resolves them.
    pub async fn reconcile(&self, screening_id: ScreeningId) -> Result<bool, BookingError> {
        self.store.get_screening(screening_id).await?;
        let mut guard = self.ledger.lock(screening_id).await;
        let active = self.store.find_active_by_screening(screening_id).await?;
        let (committed, conflicts) = fold_active(screening_id, &active);

        let missing: Vec<SeatLabel> = committed
            .iter()
            .filter(|s| !guard.held().contains(s))
            .copied()
            .collect();
        let uncommitted = guard.held().iter().filter(|s| !committed.contains(s)).count();
        if missing.is_empty() && uncommitted == 0 && conflicts.is_empty() {
            return Ok(false);
        }

        metrics::counter!(observability::LEDGER_DRIFT_TOTAL).increment(1);
        log_conflicts(&conflicts);
        if !missing.is_empty() {
            tracing::warn!(
                "ledger drift on {screening_id}: restoring committed seats {}",
                join_seats(&missing)
            );
            if let Err(taken) = guard.try_reserve(&missing) {
                tracing::error!(
                    "ledger drift on {screening_id}: could not restore seats {}",
                    join_seats(&taken)
                );
            }
        }
        if uncommitted > 0 {
            tracing::warn!(
                "ledger drift on {screening_id}: {uncommitted} held seats have no committed reservation"
            );
        }
        Ok(true)
    }
}

/// Outcome of [`Coordinator::rebuild_ledger`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerRebuild {
    /// Screenings that ended up with held seats.
    pub screenings: usize,
    pub conflicts: Vec<SeatConflict>,
}

/// A seat held by more than one Active reservation of a screening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatConflict {
    pub screening_id: ScreeningId,
    pub seat: SeatLabel,
    pub reservations: Vec<ReservationId>,
}

/// Union of the seats held by `active`, plus every seat claimed more than once.
fn fold_active(screening_id: ScreeningId, active: &[Reservation]) -> (SeatSet, Vec<SeatConflict>) {
    let mut owners: BTreeMap<SeatLabel, Vec<ReservationId>> = BTreeMap::new();
    for reservation in active {
        for seat in &reservation.seats {
            owners.entry(*seat).or_default().push(reservation.id);
        }
    }
    let seats = owners.keys().copied().collect();
    let conflicts = owners
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(seat, reservations)| SeatConflict {
            screening_id,
            seat,
            reservations,
        })
        .collect();
    (seats, conflicts)
}

fn log_conflicts(conflicts: &[SeatConflict]) {
    for c in conflicts {
        let ids: Vec<String> = c.reservations.iter().map(|id| id.to_string()).collect();
        tracing::error!(
            "seat {} of {} is held by several active reservations: {}",
            c.seat,
            c.screening_id,
            ids.join(",")
        );
    }
}

/// Drive `fut` to completion on its own task so that dropping the caller
/// cannot interrupt a write that follows a ledger change.
async fn run_detached<T, F>(fut: F) -> Result<T, BookingError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, BookingError>> + Send + 'static,
{
    tokio::spawn(fut)
        .await
        .map_err(|e| BookingError::StorageFailure(format!("commit task failed: {e}")))?
}
