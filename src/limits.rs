use crate::model::Ms;

const YEAR_MS: Ms = 365 * 24 * 3_600_000;

/// Timestamps outside this range are rejected before touching any state.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2^53: largest integer a JSON client can round-trip exactly.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 9_007_199_254_740_992;

pub const MAX_SPAN_DURATION_MS: Ms = 10 * YEAR_MS;
pub const MAX_QUERY_WINDOW_MS: Ms = 10 * YEAR_MS;

pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_DESCRIPTION_LEN: usize = 4096;

pub const MAX_RESERVATIONS_PER_RESOURCE: usize = 100_000;

pub const MAX_API_KEY_LEN: usize = 512;
