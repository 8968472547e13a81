use crate::model::Ms;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

pub const DEFAULT_MAX_BOOKING_HOURS: i64 = 24;
pub const MAX_PARTICIPANTS: u32 = 1_000;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_PAYMENT_ID_LEN: usize = 255;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;
/// Widest window accepted by availability queries: 31 days.
pub const MAX_QUERY_WINDOW_MS: Ms = 31 * 24 * 3_600_000;
