//! Durable state behind the coordinator.
//!
//! Both backends share [`Tables`], the indexed in-memory image of every
//! screening and reservation. They differ only in how a [`Record`] becomes
//! durable before it is applied, which is the [`Journal`] seam.

mod memory;
mod wal;
mod wal_store;

pub use memory::MemoryStore;
pub use wal::Wal;
pub use wal_store::WalStore;

use std::fmt;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    Io(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "not found: {id}"),
            StoreError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            StoreError::Io(msg) => write!(f, "storage error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

#[async_trait]
pub trait ScreeningStore: Send + Sync {
    async fn get_screening(&self, id: ScreeningId) -> Result<Screening, StoreError>;
    async fn list_screenings(&self) -> Result<Vec<Screening>, StoreError>;
    async fn screening_count(&self) -> Result<usize, StoreError>;
    async fn create_screening(&self, screening: Screening) -> Result<(), StoreError>;
    async fn update_screening(&self, screening: Screening) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn create_reservation(&self, reservation: Reservation) -> Result<(), StoreError>;
    async fn get_reservation(&self, id: ReservationId) -> Result<Reservation, StoreError>;
    async fn update_status(
        &self,
        id: ReservationId,
        status: ReservationStatus,
        cancelled_at: Option<Ms>,
    ) -> Result<Reservation, StoreError>;
    async fn find_active_by_screening(
        &self,
        screening_id: ScreeningId,
    ) -> Result<Vec<Reservation>, StoreError>;
    /// Newest first.
    async fn find_by_user(&self, user_id: &UserId) -> Result<Vec<Reservation>, StoreError>;

    /// Seats held by Active reservations of a screening.
    async fn find_active_seats_by_screening(
        &self,
        screening_id: ScreeningId,
    ) -> Result<Vec<SeatLabel>, StoreError> {
        let active = self.find_active_by_screening(screening_id).await?;
        Ok(active.into_iter().flat_map(|r| r.seats).collect())
    }
}

pub trait Store: ScreeningStore + ReservationStore {}

impl<T: ScreeningStore + ReservationStore> Store for T {}

// ── Tables ───────────────────────────────────────────────

/// Indexed image of all records applied so far.
#[derive(Default)]
pub struct Tables {
    screenings: DashMap<ScreeningId, Screening>,
    reservations: DashMap<ReservationId, Reservation>,
    by_screening: DashMap<ScreeningId, Vec<ReservationId>>,
    by_user: DashMap<UserId, Vec<ReservationId>>,
    /// Ids taken by a committed or in-flight create.
    claimed: DashSet<Ulid>,
}

impl Tables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, record: &Record) {
        match record {
            Record::ScreeningCreated { screening } | Record::ScreeningUpdated { screening } => {
                self.claimed.insert(screening.id);
                self.screenings.insert(screening.id, screening.clone());
            }
            Record::ReservationCreated { reservation } => {
                let id = reservation.id;
                self.claimed.insert(id);
                if self.reservations.insert(id, reservation.clone()).is_none() {
                    self.by_screening
                        .entry(reservation.screening_id)
                        .or_default()
                        .push(id);
                    self.by_user
                        .entry(reservation.user_id.clone())
                        .or_default()
                        .push(id);
                }
            }
            Record::ReservationStatusChanged {
                id,
                status,
                cancelled_at,
            } => {
                if let Some(mut r) = self.reservations.get_mut(id) {
                    r.status = *status;
                    r.cancelled_at = *cancelled_at;
                }
            }
        }
    }

    /// Reserve an id for a create about to be committed.
    fn claim(&self, id: Ulid) -> Result<(), StoreError> {
        if self.claimed.insert(id) {
            Ok(())
        } else {
            Err(StoreError::AlreadyExists(id))
        }
    }

    fn unclaim(&self, id: &Ulid) {
        self.claimed.remove(id);
    }

    pub fn screening(&self, id: &ScreeningId) -> Option<Screening> {
        self.screenings.get(id).map(|e| e.value().clone())
    }

    pub fn reservation(&self, id: &ReservationId) -> Option<Reservation> {
        self.reservations.get(id).map(|e| e.value().clone())
    }

    pub fn screenings(&self) -> Vec<Screening> {
        let mut all: Vec<Screening> = self.screenings.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|s| (s.show_time, s.id));
        all
    }

    pub fn screening_count(&self) -> usize {
        self.screenings.len()
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }

    fn lookup(&self, ids: &[ReservationId]) -> Vec<Reservation> {
        ids.iter().filter_map(|id| self.reservation(id)).collect()
    }

    pub fn active_by_screening(&self, screening_id: &ScreeningId) -> Vec<Reservation> {
        let ids = self
            .by_screening
            .get(screening_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut active: Vec<Reservation> = self
            .lookup(&ids)
            .into_iter()
            .filter(|r| r.is_active())
            .collect();
        active.sort_by_key(|r| (r.booked_at, r.id));
        active
    }

    pub fn by_user(&self, user_id: &UserId) -> Vec<Reservation> {
        let ids = self
            .by_user
            .get(user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut all = self.lookup(&ids);
        all.sort_by_key(|r| std::cmp::Reverse((r.booked_at, r.id)));
        all
    }

    /// The fewest records that rebuild the current state: one create per
    /// screening, then one create per reservation carrying its final status.
    pub fn snapshot_records(&self) -> Vec<Record> {
        let mut records: Vec<Record> = self
            .screenings()
            .into_iter()
            .map(|screening| Record::ScreeningCreated { screening })
            .collect();
        let mut reservations: Vec<Reservation> =
            self.reservations.iter().map(|e| e.value().clone()).collect();
        reservations.sort_by_key(|r| (r.booked_at, r.id));
        records.extend(
            reservations
                .into_iter()
                .map(|reservation| Record::ReservationCreated { reservation }),
        );
        records
    }
}

// ── Journal ──────────────────────────────────────────────

/// A backend that makes a record durable, then applies it to its tables.
/// Both store traits are implemented for every journal.
#[async_trait]
pub trait Journal: Send + Sync {
    fn tables(&self) -> &Tables;

    /// Once this returns `Ok`, the record is durable and visible in `tables()`.
    async fn commit(&self, record: Record) -> Result<(), StoreError>;
}

#[async_trait]
impl<J: Journal> ScreeningStore for J {
    async fn get_screening(&self, id: ScreeningId) -> Result<Screening, StoreError> {
        self.tables().screening(&id).ok_or(StoreError::NotFound(id))
    }

    async fn list_screenings(&self) -> Result<Vec<Screening>, StoreError> {
        Ok(self.tables().screenings())
    }

    async fn screening_count(&self) -> Result<usize, StoreError> {
        Ok(self.tables().screening_count())
    }

    async fn create_screening(&self, screening: Screening) -> Result<(), StoreError> {
        let id = screening.id;
        self.tables().claim(id)?;
        let result = self.commit(Record::ScreeningCreated { screening }).await;
        if result.is_err() {
            self.tables().unclaim(&id);
        }
        result
    }

    async fn update_screening(&self, screening: Screening) -> Result<(), StoreError> {
        if self.tables().screening(&screening.id).is_none() {
            return Err(StoreError::NotFound(screening.id));
        }
        self.commit(Record::ScreeningUpdated { screening }).await
    }
}

#[async_trait]
impl<J: Journal> ReservationStore for J {
    async fn create_reservation(&self, reservation: Reservation) -> Result<(), StoreError> {
        if self.tables().screening(&reservation.screening_id).is_none() {
            return Err(StoreError::NotFound(reservation.screening_id));
        }
        let id = reservation.id;
        self.tables().claim(id)?;
        let result = self.commit(Record::ReservationCreated { reservation }).await;
        if result.is_err() {
            self.tables().unclaim(&id);
        }
        result
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Reservation, StoreError> {
        self.tables().reservation(&id).ok_or(StoreError::NotFound(id))
    }

    async fn update_status(
        &self,
        id: ReservationId,
        status: ReservationStatus,
        cancelled_at: Option<Ms>,
    ) -> Result<Reservation, StoreError> {
        if self.tables().reservation(&id).is_none() {
            return Err(StoreError::NotFound(id));
        }
        self.commit(Record::ReservationStatusChanged {
            id,
            status,
            cancelled_at,
        })
        .await?;
        self.tables().reservation(&id).ok_or(StoreError::NotFound(id))
    }

    async fn find_active_by_screening(
        &self,
        screening_id: ScreeningId,
    ) -> Result<Vec<Reservation>, StoreError> {
        Ok(self.tables().active_by_screening(&screening_id))
    }

    async fn find_by_user(&self, user_id: &UserId) -> Result<Vec<Reservation>, StoreError> {
        Ok(self.tables().by_user(user_id))
    }
}
