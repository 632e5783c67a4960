//! Expiry arithmetic and stampede jitter.

use rand::Rng;
use time::OffsetDateTime;

/// Shorten `base_ttl` by a random amount of up to `stampede_percent` percent.
///
/// Copies of a page cached by downstream clients at the same moment then
/// expire at slightly different times.
pub fn jitter(base_ttl: u64, stampede_percent: u8) -> u64 {
    jitter_with(&mut rand::rng(), base_ttl, stampede_percent)
}

/// [`jitter`] with a caller-supplied random source.
pub fn jitter_with<R: Rng + ?Sized>(rng: &mut R, base_ttl: u64, stampede_percent: u8) -> u64 {
    let percent = u128::from(stampede_percent.min(100));
    let scatter = (u128::from(base_ttl) * percent / 100) as u64;
    if scatter == 0 {
        return base_ttl;
    }
    base_ttl - rng.random_range(0..=scatter)
}

/// Seconds left before an entry cached at `cached_at` with `ttl_seconds` expires.
pub fn remaining_seconds(cached_at: OffsetDateTime, ttl_seconds: u64, now: OffsetDateTime) -> u64 {
    let age = (now - cached_at).whole_seconds();
    if age <= 0 {
        return ttl_seconds;
    }
    ttl_seconds.saturating_sub(age as u64)
}
