//! Hard caps that keep a single engine's memory bounded.

pub const MAX_PROVIDER_SERVICES: usize = 100_000;
pub const MAX_TIME_SLOTS: usize = 10_000;
pub const MAX_SLOTS_PER_SERVICE: usize = 50_000;
pub const MAX_BOOKINGS_PER_SERVICE: usize = 200_000;
pub const MAX_REVIEWS_PER_SERVICE: usize = 50_000;

pub const MAX_COMMENT_LEN: usize = 4_096;
pub const MAX_EXPERIENCE_LEN: usize = 4_096;
pub const MAX_DURATION_LABEL_LEN: usize = 64;
pub const MAX_CLOCK_LEN: usize = 16;

pub const MAX_SQL_LEN: usize = 64 * 1024;

/// Largest WAL payload accepted on write or replay.
pub const MAX_WAL_FRAME: usize = 1024 * 1024;
