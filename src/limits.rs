//! Hard input bounds. Tunables that operators may change live in `config`.

/// Candidate slot starts are enumerated on this grid, anchored at each window start.
pub const SLOT_STEP_MINUTES: i64 = 30;

/// Window end used when an exception omits its end time.
pub const END_OF_DAY: (u32, u32) = (23, 59);

pub const DEFAULT_TIMEZONE: &str = "America/Santiago";

pub const DEFAULT_HORIZON_DAYS: u32 = 14;
pub const MIN_HORIZON_DAYS: u32 = 1;
pub const MAX_HORIZON_DAYS: u32 = 90;

pub const MAX_SLUG_LEN: usize = 64;
pub const MAX_NAME_LEN: usize = 200;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_NOTES_LEN: usize = 2_000;

/// One day. A service longer than this can never fit a single window.
pub const MAX_SERVICE_MINUTES: u32 = 24 * 60;
pub const MAX_BUFFER_MINUTES: u32 = 12 * 60;

pub const MAX_RULES_PER_TENANT: usize = 1_000;
pub const MAX_EXCEPTIONS_PER_TENANT: usize = 10_000;

/// Booking starts outside this range are rejected before any lookup.
pub const MIN_VALID_YEAR: i32 = 2000;
pub const MAX_VALID_YEAR: i32 = 2200;
