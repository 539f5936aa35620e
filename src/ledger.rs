use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use crate::model::{ScreeningId, SeatLabel};

pub type SeatSet = HashSet<SeatLabel>;

pub type SharedSeats = Arc<RwLock<SeatSet>>;

/// Seats held by Active reservations, per screening.
///
/// Each screening has its own lock, so operations on one screening are
/// serialized while different screenings never wait on each other. The ledger
/// is a cache of the store: it can always be rebuilt from Active reservations.
#[derive(Default)]
pub struct SeatLedger {
    entries: DashMap<ScreeningId, SharedSeats>,
}

/// Exclusive access to one screening's held seats.
pub struct LedgerGuard {
    screening_id: ScreeningId,
    seats: OwnedRwLockWriteGuard<SeatSet>,
}

impl LedgerGuard {
    pub fn screening_id(&self) -> ScreeningId {
        self.screening_id
    }

    /// Add all of `seats` or none of them. On conflict returns the requested
    /// seats that are already held, in request order.
    pub fn try_reserve(&mut self, seats: &[SeatLabel]) -> Result<(), Vec<SeatLabel>> {
        let taken: Vec<SeatLabel> = seats
            .iter()
            .filter(|s| self.seats.contains(s))
            .copied()
            .collect();
        if !taken.is_empty() {
            return Err(taken);
        }
        self.seats.extend(seats.iter().copied());
        Ok(())
    }

    /// Remove `seats`; labels not held are ignored. Returns how many were held.
    pub fn release(&mut self, seats: &[SeatLabel]) -> usize {
        seats.iter().filter(|s| self.seats.remove(s)).count()
    }

    pub fn held(&self) -> &SeatSet {
        &self.seats
    }

    pub fn replace(&mut self, seats: SeatSet) {
        *self.seats = seats;
    }
}

impl SeatLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, screening_id: ScreeningId) -> SharedSeats {
        self.entries.entry(screening_id).or_default().value().clone()
    }

    /// Wait for exclusive access to a screening's seats.
    pub async fn lock(&self, screening_id: ScreeningId) -> LedgerGuard {
        let seats = self.entry(screening_id).write_owned().await;
        LedgerGuard { screening_id, seats }
    }

    pub async fn try_reserve(
        &self,
        screening_id: ScreeningId,
        seats: &[SeatLabel],
    ) -> Result<(), Vec<SeatLabel>> {
        self.lock(screening_id).await.try_reserve(seats)
    }

    pub async fn release(&self, screening_id: ScreeningId, seats: &[SeatLabel]) -> usize {
        self.lock(screening_id).await.release(seats)
    }

    /// Held seats, sorted. Never reports a committed seat as free: writers
    /// add seats before the reservation is persisted and remove them only
    /// together with the status change.
    pub async fn snapshot(&self, screening_id: ScreeningId) -> BTreeSet<SeatLabel> {
        let Some(seats) = self.entries.get(&screening_id).map(|e| e.value().clone()) else {
            return BTreeSet::new();
        };
        let guard = seats.read().await;
        guard.iter().copied().collect()
    }

    pub async fn held_count(&self, screening_id: ScreeningId) -> usize {
        match self.entries.get(&screening_id).map(|e| e.value().clone()) {
            Some(seats) => seats.read().await.len(),
            None => 0,
        }
    }

    pub async fn replace(&self, screening_id: ScreeningId, seats: SeatSet) {
        self.lock(screening_id).await.replace(seats);
    }

    /// Drop a screening's entry if it is empty and nobody is using or waiting
    /// on it. Returns whether the entry is gone.
    pub fn evict(&self, screening_id: ScreeningId) -> bool {
        self.entries.remove_if(&screening_id, |_, seats| {
            Arc::strong_count(seats) == 1 && seats.try_read().is_ok_and(|s| s.is_empty())
        });
        !self.entries.contains_key(&screening_id)
    }

    /// Number of screenings with an entry.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
