/// Max dates one booking action may claim (weekly repeat + batch picks).
pub const MAX_BATCH_DATES: usize = 120;

/// Max length of the booker's name.
pub const MAX_BOOKER_LEN: usize = 64;

/// Max length of the booking reason.
pub const MAX_REASON_LEN: usize = 500;

/// Widest inclusive date window a listing query may span.
pub const MAX_QUERY_DAYS: i64 = 400;

/// Search looks this many days ahead of today.
pub const SEARCH_HORIZON_DAYS: i64 = 180;

/// Max length of a search keyword.
pub const MAX_KEYWORD_LEN: usize = 100;

/// Max blackout entries stored for one facility.
pub const MAX_BLACKOUT_SLOTS: usize = 7 * 64;

/// Max length of a device identifier.
pub const MAX_DEVICE_ID_LEN: usize = 128;

/// Max devices with a loaded rate limiter.
pub const MAX_DEVICES: usize = 10_000;

/// Max bytes in one protocol line.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Bookings per journal frame when compacting.
pub const COMPACT_CHUNK: usize = 512;
