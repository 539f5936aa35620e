use crate::model::Ms;

/// Row letters run `A`..=`Z`.
pub const MAX_ROWS: u8 = 26;
pub const MAX_SEATS_PER_ROW: u16 = 999;
pub const MAX_SEATS_PER_RESERVATION: usize = 64;

/// Longest accepted seat label text (`Z999`).
pub const MAX_SEAT_LABEL_LEN: usize = 4;

pub const MAX_USER_ID_LEN: usize = 128;
pub const MAX_SCREENINGS: usize = 100_000;

/// 10 000 000.00
pub const MAX_BASE_PRICE_CENTS: u64 = 1_000_000_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Cutoffs beyond a week are almost certainly a misconfigured unit.
pub const MAX_CUTOFF_MS: Ms = 7 * 24 * 3_600_000;
