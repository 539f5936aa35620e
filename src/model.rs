use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::*;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

pub type ScreeningId = Ulid;
pub type ReservationId = Ulid;

/// Opaque identity of the person holding a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Money ────────────────────────────────────────────────────────

/// An amount in cents. Integer arithmetic only, so prices never drift.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    pub const fn cents(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_mul(self, n: u64) -> Option<Money> {
        self.0.checked_mul(n).map(Money)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoneyParseError(pub String);

impl fmt::Display for MoneyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bad amount: {}", self.0)
    }
}

impl std::error::Error for MoneyParseError {}

/// Parses `10`, `10.5` and `10.50`. Signs and sub-cent digits are rejected.
impl FromStr for Money {
    type Err = MoneyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || MoneyParseError(s.to_string());
        let (units, frac) = match s.split_once('.') {
            Some((u, f)) => (u, f),
            None => (s, ""),
        };
        if units.is_empty() || !units.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        if frac.len() > 2 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        let units: u64 = units.parse().map_err(|_| bad())?;
        let cents = match frac.len() {
            0 => 0,
            1 => frac.parse::<u64>().map_err(|_| bad())? * 10,
            _ => frac.parse::<u64>().map_err(|_| bad())?,
        };
        units
            .checked_mul(100)
            .and_then(|c| c.checked_add(cents))
            .map(Money)
            .ok_or_else(bad)
    }
}

// ── Screening ────────────────────────────────────────────────────

/// Pricing category of a screening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Matinee pricing.
    Discount,
    /// Evening pricing.
    Standard,
    /// Weekend pricing.
    Premium,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Discount => "discount",
            Category::Standard => "standard",
            Category::Premium => "premium",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "discount" | "matinee" => Ok(Category::Discount),
            "standard" | "evening" => Ok(Category::Standard),
            "premium" | "weekend" => Ok(Category::Premium),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

/// Seat grid of a hall: `rows` lettered from `A`, seats numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HallLayout {
    pub rows: u8,
    pub seats_per_row: u16,
}

impl HallLayout {
    pub fn new(rows: u8, seats_per_row: u16) -> Self {
        Self { rows, seats_per_row }
    }

    pub fn capacity(&self) -> usize {
        self.rows as usize * self.seats_per_row as usize
    }

    pub fn contains(&self, seat: &SeatLabel) -> bool {
        seat.row < self.rows && seat.number >= 1 && seat.number <= self.seats_per_row
    }

    /// Every seat of the hall in row-major order.
    pub fn seats(self) -> impl Iterator<Item = SeatLabel> {
        let per_row = self.seats_per_row;
        (0..self.rows).flat_map(move |row| (1..=per_row).map(move |number| SeatLabel { row, number }))
    }

    pub fn is_valid(&self) -> bool {
        self.rows >= 1
            && self.rows <= MAX_ROWS
            && self.seats_per_row >= 1
            && self.seats_per_row <= MAX_SEATS_PER_ROW
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screening {
    pub id: ScreeningId,
    pub movie_id: Ulid,
    pub hall_id: Ulid,
    pub layout: HallLayout,
    pub show_time: Ms,
    pub base_price: Money,
    pub category: Category,
    pub created_at: Ms,
}

impl Screening {
    /// Reschedule or reprice. Reservations already made keep their price.
    pub fn updated(&self, show_time: Ms, base_price: Money, category: Category) -> Screening {
        Screening {
            show_time,
            base_price,
            category,
            ..self.clone()
        }
    }
}

// ── Seat labels ──────────────────────────────────────────────────

/// `<row-letter><seat-number>`, e.g. `C12`. `row` is 0-based, `number` 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeatLabel {
    pub row: u8,
    pub number: u16,
}

impl SeatLabel {
    pub fn new(row: u8, number: u16) -> Self {
        Self { row, number }
    }
}

impl fmt::Display for SeatLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", (b'A' + self.row) as char, self.number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeatLabelError {
    Empty,
    TooLong(String),
    Malformed(String),
}

impl fmt::Display for SeatLabelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeatLabelError::Empty => write!(f, "empty seat label"),
            SeatLabelError::TooLong(s) => write!(f, "seat label too long: {s}"),
            SeatLabelError::Malformed(s) => write!(f, "malformed seat label: {s}"),
        }
    }
}

impl std::error::Error for SeatLabelError {}

impl FromStr for SeatLabel {
    type Err = SeatLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(SeatLabelError::Empty);
        }
        if s.len() > MAX_SEAT_LABEL_LEN {
            return Err(SeatLabelError::TooLong(s.to_string()));
        }
        let malformed = || SeatLabelError::Malformed(s.to_string());
        let bytes = s.as_bytes();
        let row = bytes[0];
        if !row.is_ascii_uppercase() {
            return Err(malformed());
        }
        let digits = &s[1..];
        // Leading zeros would let "A01" and "A1" name the same seat.
        if digits.is_empty() || digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let number: u16 = digits.parse().map_err(|_| malformed())?;
        Ok(SeatLabel { row: row - b'A', number })
    }
}

// ── Reservation ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Active,
    Cancelled,
    Completed,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub user_id: UserId,
    pub screening_id: ScreeningId,
    /// In the order the seats were requested; no duplicates.
    pub seats: Vec<SeatLabel>,
    pub total_price: Money,
    pub status: ReservationStatus,
    pub booked_at: Ms,
    pub cancelled_at: Option<Ms>,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    /// Seats joined the way they travel over the wire: `A1,A2`.
    pub fn seat_list(&self) -> String {
        join_seats(&self.seats)
    }
}

pub fn join_seats(seats: &[SeatLabel]) -> String {
    seats
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Durable record types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    ScreeningCreated {
        screening: Screening,
    },
    ScreeningUpdated {
        screening: Screening,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationStatusChanged {
        id: ReservationId,
        status: ReservationStatus,
        cancelled_at: Option<Ms>,
    },
}
