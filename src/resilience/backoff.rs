//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

use crate::resilience::retries::RetryPolicy;

/// Delay before the retry that follows failed attempt `attempt` (zero-indexed).
///
/// `min(initial * multiplier^attempt, max)` perturbed uniformly within
/// ±`jitter_fraction / 2` of itself, never below zero.
pub fn calculate_backoff(attempt: u32, policy: &RetryPolicy) -> Duration {
    let base = base_delay(attempt, policy);
    if policy.jitter_fraction <= 0.0 || base.is_zero() {
        return base;
    }

    let base_nanos = base.as_nanos() as f64;
    let half_span = base_nanos * policy.jitter_fraction / 2.0;
    let jitter = rand::thread_rng().gen_range(-half_span..=half_span);

    from_nanos_f64((base_nanos + jitter).max(0.0))
}

/// Capped exponential delay without jitter.
pub fn base_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let scaled = policy.initial_delay.as_nanos() as f64 * policy.multiplier.powi(exponent);
    let capped = scaled.min(policy.max_delay.as_nanos() as f64);

    if capped.is_nan() || capped <= 0.0 {
        Duration::ZERO
    } else {
        from_nanos_f64(capped).min(policy.max_delay)
    }
}

fn from_nanos_f64(nanos: f64) -> Duration {
    Duration::from_nanos(nanos.round().min(u64::MAX as f64) as u64)
}
