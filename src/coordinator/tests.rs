use super::*;
use crate::clock::ManualClock;
use crate::store::{Journal, MemoryStore, ReservationStore, StoreError, Tables, WalStore};

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

const M: Ms = 60_000;
const H: Ms = 3_600_000;
const DAY: Ms = 24 * H;
/// 2025-06-15T15:06:40Z
const NOW: Ms = 1_750_000_000_000;

fn seats(list: &str) -> Vec<SeatLabel> {
    parse_seat_list(list).unwrap()
}

fn user(id: &str) -> UserId {
    UserId::from(id)
}

struct Fixture {
    coord: Arc<Coordinator>,
    clock: Arc<ManualClock>,
}

fn fixture_with(store: Arc<dyn Store>) -> Fixture {
    let clock = Arc::new(ManualClock::new(NOW));
    let coord = Arc::new(Coordinator::new(store, clock.clone()));
    Fixture { coord, clock }
}

fn fixture() -> Fixture {
    fixture_with(Arc::new(MemoryStore::new()))
}

fn new_screening(show_time: Ms, base_cents: u64, category: Category) -> NewScreening {
    NewScreening {
        id: Ulid::new(),
        movie_id: Ulid::new(),
        hall_id: Ulid::new(),
        layout: HallLayout::new(10, 10),
        show_time,
        base_price: Money::from_cents(base_cents),
        category,
    }
}

/// 10x10 hall, 10.00 standard, tomorrow.
async fn tomorrow(coord: &Coordinator) -> Screening {
    coord
        .create_screening(new_screening(NOW + DAY, 1000, Category::Standard))
        .await
        .unwrap()
}

/// A journal whose writes can be made to fail.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail: AtomicBool,
}

impl FlakyStore {
    fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Journal for FlakyStore {
    fn tables(&self) -> &Tables {
        self.inner.tables()
    }

    async fn commit(&self, record: Record) -> Result<(), StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Io("disk full".into()));
        }
        self.inner.commit(record).await
    }
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("seatlock_test_coordinator");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

// ── Booking ──────────────────────────────────────────────

#[tokio::test]
async fn two_customers_one_seat_scenario() {
    let Fixture { coord, .. } = fixture();
    let s = tomorrow(&coord).await;

    let first = coord.book(&user("1"), s.id, &seats("A1,A2")).await.unwrap();
    assert_eq!(first.total_price.to_string(), "20.00");
    assert_eq!(first.status, ReservationStatus::Active);
    assert_eq!(first.booked_at, NOW);

    let clash = coord.book(&user("2"), s.id, &seats("A2,A3")).await;
    assert_eq!(clash, Err(BookingError::SeatsUnavailable(seats("A2"))));

    let cancelled = coord.cancel(first.id, &user("1")).await.unwrap();
    assert_eq!(cancelled.status, ReservationStatus::Cancelled);
    assert_eq!(cancelled.cancelled_at, Some(NOW));

    let second = coord.book(&user("2"), s.id, &seats("A2,A3")).await.unwrap();
    assert_eq!(second.seat_list(), "A2,A3");
    assert_eq!(join_seats(&coord.booked_seats(s.id).await.unwrap()), "A2,A3");
}

#[tokio::test]
async fn booking_prices_by_category() {
    let Fixture { coord, .. } = fixture();
    for (category, expected) in [
        (Category::Discount, "16.00"),
        (Category::Standard, "20.00"),
        (Category::Premium, "24.00"),
    ] {
        let s = coord
            .create_screening(new_screening(NOW + DAY, 1000, category))
            .await
            .unwrap();
        assert_eq!(coord.quote(s.id, 2).await.unwrap().to_string(), expected);
        let r = coord.book(&user("1"), s.id, &seats("B1,B2")).await.unwrap();
        assert_eq!(r.total_price.to_string(), expected);
    }
}

#[tokio::test]
async fn conflict_changes_nothing() {
    let Fixture { coord, .. } = fixture();
    let s = tomorrow(&coord).await;
    coord.book(&user("1"), s.id, &seats("C5")).await.unwrap();

    let err = assert_err!(coord.book(&user("2"), s.id, &seats("C4,C5,C6")).await);
    assert_eq!(err, BookingError::SeatsUnavailable(seats("C5")));
    assert_eq!(join_seats(&coord.booked_seats(s.id).await.unwrap()), "C5");
    assert!(coord.reservations_for(&user("2")).await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_requests() {
    let Fixture { coord, .. } = fixture();
    let s = tomorrow(&coord).await;

    for bad in ["", "A1,A1", "K1", "A11"] {
        let r = coord.book(&user("1"), s.id, &seats(bad)).await;
        assert!(matches!(r, Err(BookingError::InvalidRequest(_))), "{bad}: {r:?}");
    }
    assert!(matches!(
        coord.book(&user(""), s.id, &seats("A1")).await,
        Err(BookingError::InvalidRequest(_))
    ));
    assert!(coord.booked_seats(s.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_screening_is_not_found() {
    let Fixture { coord, .. } = fixture();
    let missing = Ulid::new();
    assert_eq!(
        coord.book(&user("1"), missing, &seats("A1")).await,
        Err(BookingError::NotFound(missing))
    );
    assert_eq!(coord.available_seats(missing).await, Err(BookingError::NotFound(missing)));
    assert_eq!(coord.quote(missing, 1).await, Err(BookingError::NotFound(missing)));
    assert!(coord.ledger().is_empty());
}

#[tokio::test]
async fn reservation_id_cannot_be_reused() {
    let Fixture { coord, .. } = fixture();
    let s = tomorrow(&coord).await;
    let id = Ulid::new();
    coord.book_with_id(id, &user("1"), s.id, &seats("A1")).await.unwrap();
    let again = coord.book_with_id(id, &user("1"), s.id, &seats("A2")).await;
    assert!(matches!(again, Err(BookingError::InvalidRequest(_))));
    assert_eq!(join_seats(&coord.booked_seats(s.id).await.unwrap()), "A1");
}

#[tokio::test]
async fn show_time_reached_is_past_showing() {
    let Fixture { coord, clock } = fixture();
    let s = tomorrow(&coord).await;
    let r = coord.book(&user("1"), s.id, &seats("A1")).await.unwrap();

    clock.set(s.show_time - 1);
    assert_ok!(coord.book(&user("1"), s.id, &seats("A2")).await);

    clock.set(s.show_time);
    assert_eq!(
        coord.book(&user("1"), s.id, &seats("A3")).await,
        Err(BookingError::PastShowing(s.id))
    );
    assert_eq!(
        coord.cancel(r.id, &user("1")).await,
        Err(BookingError::PastShowing(s.id))
    );
    assert_eq!(coord.screening(s.id).await.unwrap().show_time, clock.now_ms());
}

#[tokio::test]
async fn cutoff_closes_window_early() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(NOW));
    let coord = Coordinator::new(store, clock.clone()).with_policy(BookingPolicy::new(H));
    let s = tomorrow(&coord).await;
    let r = coord.book(&user("1"), s.id, &seats("A1")).await.unwrap();

    clock.set(s.show_time - H - 1);
    assert_ok!(coord.book(&user("1"), s.id, &seats("A2")).await);

    clock.set(s.show_time - 30 * M);
    assert_eq!(
        coord.book(&user("1"), s.id, &seats("A3")).await,
        Err(BookingError::PastShowing(s.id))
    );
    assert_eq!(coord.cancel(r.id, &user("1")).await, Err(BookingError::PastShowing(s.id)));
}

#[test]
fn policy_clamps_cutoff() {
    assert_eq!(BookingPolicy::new(-5).cutoff_ms, 0);
    assert_eq!(BookingPolicy::new(i64::MAX).cutoff_ms, crate::limits::MAX_CUTOFF_MS);
    let p = BookingPolicy::default();
    assert!(p.is_closed(100, 100));
    assert!(!p.is_closed(100, 99));
}

// ── Cancellation ─────────────────────────────────────────

#[tokio::test]
async fn non_owner_cannot_cancel() {
    let Fixture { coord, .. } = fixture();
    let s = tomorrow(&coord).await;
    let r = coord.book(&user("1"), s.id, &seats("D1,D2")).await.unwrap();

    assert_eq!(coord.cancel(r.id, &user("2")).await, Err(BookingError::Forbidden(r.id)));
    let mine = coord.reservations_for(&user("1")).await.unwrap();
    assert_eq!(mine[0].status, ReservationStatus::Active);
    assert_eq!(join_seats(&coord.booked_seats(s.id).await.unwrap()), "D1,D2");
}

#[tokio::test]
async fn cancel_twice_is_already_cancelled() {
    let Fixture { coord, .. } = fixture();
    let s = tomorrow(&coord).await;
    let r = coord.book(&user("1"), s.id, &seats("E1")).await.unwrap();
    coord.cancel(r.id, &user("1")).await.unwrap();
    assert_eq!(
        coord.cancel(r.id, &user("1")).await,
        Err(BookingError::AlreadyCancelled(r.id))
    );
}

#[tokio::test]
async fn cancel_unknown_reservation() {
    let Fixture { coord, .. } = fixture();
    let id = Ulid::new();
    assert_eq!(coord.cancel(id, &user("1")).await, Err(BookingError::NotFound(id)));
}

#[tokio::test]
async fn cancelled_seats_become_available() {
    let Fixture { coord, .. } = fixture();
    let s = tomorrow(&coord).await;
    assert_eq!(coord.available_seats(s.id).await.unwrap().len(), 100);

    let r = coord.book(&user("1"), s.id, &seats("F1,F2,F3")).await.unwrap();
    let free = coord.available_seats(s.id).await.unwrap();
    assert_eq!(free.len(), 97);
    assert!(!free.contains(&"F2".parse().unwrap()));

    coord.cancel(r.id, &user("1")).await.unwrap();
    assert_eq!(coord.available_seats(s.id).await.unwrap().len(), 100);
    assert_ok!(coord.book(&user("2"), s.id, &seats("F2")).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cancels_release_once() {
    let Fixture { coord, .. } = fixture();
    let s = tomorrow(&coord).await;
    let r = coord.book(&user("1"), s.id, &seats("G1,G2")).await.unwrap();
    // Someone else grabs G3 so a double release would be visible in the count.
    coord.book(&user("2"), s.id, &seats("G3")).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let coord = coord.clone();
        handles.push(tokio::spawn(async move { coord.cancel(r.id, &user("1")).await }));
    }
    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(c) => {
                assert_eq!(c.status, ReservationStatus::Cancelled);
                ok += 1;
            }
            Err(e) => assert_eq!(e, BookingError::AlreadyCancelled(r.id)),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(join_seats(&coord.booked_seats(s.id).await.unwrap()), "G3");
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn overlapping_bookings_never_double_sell() {
    let Fixture { coord, .. } = fixture();
    let s = tomorrow(&coord).await;

    // Request i wants H{i} and H{i+1}; neighbours always overlap.
    let mut handles = Vec::new();
    for i in 1..=9u16 {
        for attempt in 0..4 {
            let coord = coord.clone();
            let want = vec![SeatLabel::new(7, i), SeatLabel::new(7, i + 1)];
            let who = user(&format!("{i}-{attempt}"));
            handles.push(tokio::spawn(async move {
                let result = coord.book(&who, s.id, &want).await;
                (want, result)
            }));
        }
    }

    let mut sold: Vec<SeatLabel> = Vec::new();
    let mut refused: Vec<SeatLabel> = Vec::new();
    for h in handles {
        let (want, result) = h.await.unwrap();
        match result {
            Ok(r) => sold.extend(r.seats),
            Err(BookingError::SeatsUnavailable(overlap)) => {
                assert!(!overlap.is_empty());
                assert!(overlap.iter().all(|seat| want.contains(seat)));
                refused.extend(overlap);
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    let unique: HashSet<SeatLabel> = sold.iter().copied().collect();
    assert_eq!(unique.len(), sold.len(), "a seat was sold twice");
    assert!(!sold.is_empty());
    // Nothing fails to commit here, so every seat a loser was refused was
    // taken by a winner.
    for seat in &refused {
        assert!(unique.contains(seat), "{seat} refused but never sold");
    }

    let booked = coord.booked_seats(s.id).await.unwrap();
    assert_eq!(booked.len(), sold.len());
    let committed = coord.store.find_active_seats_by_screening(s.id).await.unwrap();
    assert_eq!(committed.len(), sold.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn screenings_do_not_block_each_other() {
    let Fixture { coord, .. } = fixture();
    let a = tomorrow(&coord).await;
    let b = tomorrow(&coord).await;

    let _held = coord.ledger().lock(a.id).await;
    let r = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        coord.book(&user("1"), b.id, &seats("A1")),
    )
    .await;
    assert!(matches!(r, Ok(Ok(_))));
}

// ── Persistence failures ─────────────────────────────────

#[tokio::test]
async fn failed_booking_write_releases_seats() {
    let store = Arc::new(FlakyStore::default());
    let Fixture { coord, .. } = fixture_with(store.clone());
    let s = tomorrow(&coord).await;
    coord.book(&user("1"), s.id, &seats("A1")).await.unwrap();

    store.set_failing(true);
    let r = coord.book(&user("2"), s.id, &seats("A2,A3")).await;
    assert!(matches!(r, Err(BookingError::StorageFailure(_))), "{r:?}");
    assert_eq!(join_seats(&coord.booked_seats(s.id).await.unwrap()), "A1");

    store.set_failing(false);
    assert_ok!(coord.book(&user("2"), s.id, &seats("A2,A3")).await);
}

#[tokio::test]
async fn failed_cancel_write_keeps_seats_held() {
    let store = Arc::new(FlakyStore::default());
    let Fixture { coord, .. } = fixture_with(store.clone());
    let s = tomorrow(&coord).await;
    let r = coord.book(&user("1"), s.id, &seats("B1,B2")).await.unwrap();

    store.set_failing(true);
    let c = coord.cancel(r.id, &user("1")).await;
    assert!(matches!(c, Err(BookingError::StorageFailure(_))), "{c:?}");
    assert_eq!(join_seats(&coord.booked_seats(s.id).await.unwrap()), "B1,B2");
    assert_eq!(
        coord.reservations_for(&user("1")).await.unwrap()[0].status,
        ReservationStatus::Active
    );
    assert_eq!(
        coord.book(&user("2"), s.id, &seats("B2")).await,
        Err(BookingError::SeatsUnavailable(seats("B2")))
    );

    store.set_failing(false);
    assert_ok!(coord.cancel(r.id, &user("1")).await);
    assert!(coord.booked_seats(s.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn dropped_booking_future_still_settles() {
    let Fixture { coord, .. } = fixture();
    let s = tomorrow(&coord).await;

    // Poll once past the ledger change, then abandon the call.
    let (u1, j1) = (user("1"), seats("J1"));
    let fut = coord.book(&u1, s.id, &j1);
    let _ = tokio::time::timeout(std::time::Duration::from_millis(0), fut).await;
    tokio::task::yield_now().await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let held = coord.booked_seats(s.id).await.unwrap();
    let committed = coord.store.find_active_seats_by_screening(s.id).await.unwrap();
    assert_eq!(held, committed);
}

// ── Completion ───────────────────────────────────────────

#[tokio::test]
async fn elapsed_screenings_are_completed_and_evicted() {
    let Fixture { coord, clock } = fixture();
    let soon = coord
        .create_screening(new_screening(NOW + H, 1000, Category::Standard))
        .await
        .unwrap();
    let later = tomorrow(&coord).await;
    let a = coord.book(&user("1"), soon.id, &seats("A1,A2")).await.unwrap();
    let b = coord.book(&user("2"), soon.id, &seats("B1")).await.unwrap();
    let gone = coord.book(&user("2"), soon.id, &seats("C1")).await.unwrap();
    coord.cancel(gone.id, &user("2")).await.unwrap();
    coord.book(&user("3"), later.id, &seats("A1")).await.unwrap();

    assert_eq!(coord.complete_elapsed().await.unwrap(), 0);

    clock.set(soon.show_time);
    assert_eq!(coord.complete_elapsed().await.unwrap(), 2);
    assert_eq!(coord.ledger().len(), 1, "only the later screening stays");
    assert_eq!(coord.ledger().held_count(later.id).await, 1);

    let mine = coord.reservations_for(&user("1")).await.unwrap();
    assert_eq!(mine[0].id, a.id);
    assert_eq!(mine[0].status, ReservationStatus::Completed);
    assert_eq!(
        coord.cancel(b.id, &user("2")).await,
        Err(BookingError::InvalidTransition {
            id: b.id,
            from: ReservationStatus::Completed,
            to: ReservationStatus::Cancelled,
        })
    );
    assert_eq!(
        coord.reservations_for(&user("2")).await.unwrap().iter().find(|r| r.id == gone.id).unwrap().status,
        ReservationStatus::Cancelled
    );

    // Nothing left to do on the next sweep.
    assert_eq!(coord.complete_elapsed().await.unwrap(), 0);
}

#[tokio::test]
async fn complete_only_from_active() {
    let Fixture { coord, .. } = fixture();
    let s = tomorrow(&coord).await;
    let r = coord.book(&user("1"), s.id, &seats("A5")).await.unwrap();
    let done = coord.complete(r.id).await.unwrap();
    assert_eq!(done.status, ReservationStatus::Completed);
    assert!(coord.booked_seats(s.id).await.unwrap().is_empty());
    assert!(matches!(
        coord.complete(r.id).await,
        Err(BookingError::InvalidTransition { .. })
    ));
}

// ── Screenings ───────────────────────────────────────────

#[tokio::test]
async fn screening_validation() {
    let Fixture { coord, .. } = fixture();
    let mut past = new_screening(NOW, 1000, Category::Standard);
    assert!(matches!(coord.create_screening(past.clone()).await, Err(BookingError::InvalidRequest(_))));
    past.show_time = NOW + DAY;
    past.base_price = Money::ZERO;
    assert!(matches!(coord.create_screening(past.clone()).await, Err(BookingError::InvalidRequest(_))));

    let mut no_seats = new_screening(NOW + DAY, 1000, Category::Standard);
    no_seats.layout = HallLayout::new(0, 10);
    assert!(matches!(coord.create_screening(no_seats).await, Err(BookingError::InvalidRequest(_))));

    let ok = new_screening(NOW + DAY, 1000, Category::Standard);
    coord.create_screening(ok.clone()).await.unwrap();
    assert!(matches!(coord.create_screening(ok).await, Err(BookingError::InvalidRequest(_))));
}

#[tokio::test]
async fn repricing_keeps_frozen_totals() {
    let Fixture { coord, .. } = fixture();
    let s = tomorrow(&coord).await;
    let r = coord.book(&user("1"), s.id, &seats("A1,A2")).await.unwrap();

    let updated = coord
        .update_screening(s.id, s.show_time + H, Money::from_cents(2000), Category::Premium)
        .await
        .unwrap();
    assert_eq!(updated.show_time, s.show_time + H);
    assert_eq!(coord.quote(s.id, 2).await.unwrap().to_string(), "48.00");

    let mine = coord.reservations_for(&user("1")).await.unwrap();
    assert_eq!(mine[0].id, r.id);
    assert_eq!(mine[0].total_price.to_string(), "20.00");
}

#[tokio::test]
async fn started_screening_cannot_be_updated() {
    let Fixture { coord, clock } = fixture();
    let s = tomorrow(&coord).await;
    clock.set(s.show_time);
    assert_eq!(
        coord
            .update_screening(s.id, s.show_time + DAY, s.base_price, s.category)
            .await,
        Err(BookingError::PastShowing(s.id))
    );
}

#[tokio::test]
async fn quote_bounds() {
    let Fixture { coord, .. } = fixture();
    let s = tomorrow(&coord).await;
    assert!(matches!(coord.quote(s.id, 0).await, Err(BookingError::InvalidRequest(_))));
    assert!(matches!(coord.quote(s.id, 65).await, Err(BookingError::InvalidRequest(_))));
    assert_eq!(coord.quote(s.id, 3).await.unwrap(), Money::from_cents(3000));
}

#[tokio::test]
async fn listings() {
    let Fixture { coord, clock } = fixture();
    let soon = coord
        .create_screening(new_screening(NOW + H, 1000, Category::Standard))
        .await
        .unwrap();
    let later = tomorrow(&coord).await;
    let ids: Vec<_> = coord.upcoming_screenings().await.unwrap().iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![soon.id, later.id]);

    let old = coord.book(&user("1"), soon.id, &seats("A1")).await.unwrap();
    clock.advance(M);
    let new = coord.book(&user("1"), later.id, &seats("A1")).await.unwrap();
    let mine: Vec<_> = coord.reservations_for(&user("1")).await.unwrap().iter().map(|r| r.id).collect();
    assert_eq!(mine, vec![new.id, old.id]);

    clock.set(soon.show_time);
    let ids: Vec<_> = coord.upcoming_screenings().await.unwrap().iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![later.id]);
}

// ── Ledger recovery ──────────────────────────────────────

#[tokio::test]
async fn ledger_rebuilt_from_reopened_wal() {
    let path = test_wal_path("rebuild.wal");
    let (screening_id, before) = {
        let store = Arc::new(WalStore::open(&path).unwrap());
        let Fixture { coord, .. } = fixture_with(store);
        let s = tomorrow(&coord).await;
        coord.book(&user("1"), s.id, &seats("A1,A2")).await.unwrap();
        let r = coord.book(&user("2"), s.id, &seats("B1")).await.unwrap();
        coord.book(&user("3"), s.id, &seats("C1,C2,C3")).await.unwrap();
        coord.cancel(r.id, &user("2")).await.unwrap();
        (s.id, coord.booked_seats(s.id).await.unwrap())
    };

    let store = Arc::new(WalStore::open(&path).unwrap());
    let Fixture { coord, .. } = fixture_with(store);
    assert!(coord.booked_seats(screening_id).await.unwrap().is_empty());
    let rebuilt = coord.rebuild_ledger().await.unwrap();
    assert_eq!(rebuilt.screenings, 1);
    assert!(rebuilt.conflicts.is_empty());
    let after = coord.booked_seats(screening_id).await.unwrap();
    assert_eq!(after, before);
    assert_eq!(join_seats(&after), "A1,A2,C1,C2,C3");

    // A rebuilt ledger still refuses taken seats.
    assert_eq!(
        coord.book(&user("4"), screening_id, &seats("C2")).await,
        Err(BookingError::SeatsUnavailable(seats("C2")))
    );
}

#[tokio::test]
async fn reconcile_restores_lost_seats() {
    let Fixture { coord, .. } = fixture();
    let s = tomorrow(&coord).await;
    coord.book(&user("1"), s.id, &seats("A1,A2")).await.unwrap();
    assert!(!coord.reconcile(s.id).await.unwrap());

    coord.ledger().release(s.id, &seats("A2")).await;
    assert!(coord.reconcile(s.id).await.unwrap());
    assert_eq!(join_seats(&coord.booked_seats(s.id).await.unwrap()), "A1,A2");
    assert!(!coord.reconcile(s.id).await.unwrap());
}

#[tokio::test]
async fn reconcile_leaves_uncommitted_holds() {
    let Fixture { coord, .. } = fixture();
    let s = tomorrow(&coord).await;
    coord.ledger().try_reserve(s.id, &seats("Z1")).await.ok();
    // No committed reservation backs Z1.
    assert!(coord.reconcile(s.id).await.unwrap());
    assert_eq!(coord.ledger().held_count(s.id).await, 1);
}

#[tokio::test]
async fn overlapping_active_reservations_are_reported() {
    let Fixture { coord, .. } = fixture();
    let s = tomorrow(&coord).await;
    // Written straight to the store, bypassing the ledger.
    let overlapping = |owner: &str, list: &str| Reservation {
        id: Ulid::new(),
        user_id: user(owner),
        screening_id: s.id,
        seats: seats(list),
        total_price: Money::from_cents(1000),
        status: ReservationStatus::Active,
        booked_at: NOW,
        cancelled_at: None,
    };
    let first = overlapping("1", "A1,A2");
    let second = overlapping("2", "A2,A3");
    coord.store.create_reservation(first.clone()).await.unwrap();
    coord.store.create_reservation(second.clone()).await.unwrap();

    let rebuilt = coord.rebuild_ledger().await.unwrap();
    assert_eq!(rebuilt.screenings, 1);
    assert_eq!(
        rebuilt.conflicts,
        vec![SeatConflict {
            screening_id: s.id,
            seat: SeatLabel::new(0, 2),
            reservations: vec![first.id, second.id],
        }]
    );
    // The contested seat stays held.
    assert_eq!(join_seats(&coord.booked_seats(s.id).await.unwrap()), "A1,A2,A3");
    assert_eq!(
        coord.book(&user("3"), s.id, &seats("A2")).await,
        Err(BookingError::SeatsUnavailable(seats("A2")))
    );

    // Still drift until someone cancels one of them.
    assert!(coord.reconcile(s.id).await.unwrap());
    coord.cancel(second.id, &user("2")).await.unwrap();
    // The cancel released A2 along with A3; reconcile gives it back to `first`.
    assert_eq!(join_seats(&coord.booked_seats(s.id).await.unwrap()), "A1");
    assert!(coord.reconcile(s.id).await.unwrap());
    assert_eq!(join_seats(&coord.booked_seats(s.id).await.unwrap()), "A1,A2");
    assert!(!coord.reconcile(s.id).await.unwrap());
}
