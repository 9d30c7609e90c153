// Hard input limits. Anything past these is rejected before touching state.

pub const MAX_SETTING_KEY_LEN: usize = 128;
pub const MAX_SETTING_VALUE_LEN: usize = 16 * 1024;
pub const MAX_OVERRIDE_REASON_LEN: usize = 1024;

/// Upper bound on explicit ids in a manual completion request.
pub const MAX_COMPLETION_IDS: usize = 10_000;

/// Price multipliers above this are treated as input errors.
pub const MAX_PRICE_MULTIPLIER: i64 = 100;

/// WAL writer channel depth.
pub const WAL_CHANNEL_CAPACITY: usize = 4096;

/// Hourly rates above this are rejected on spaces and rate overrides.
pub const MAX_HOURLY_RATE: i64 = 1_000_000;

/// Lead times outside `[0, MAX_MIN_HOURS_BEFORE]` are treated as malformed settings.
pub const MAX_MIN_HOURS_BEFORE: f64 = 24.0 * 366.0 * 10.0;
