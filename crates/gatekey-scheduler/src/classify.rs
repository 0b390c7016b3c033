use gatekey_common::ErrorKind;

/// Whether a classified failure should move the key into cooldown.
///
/// `ErrorKind::always_cools_down` handles the unconditional cases (auth,
/// rate limit, streaming completion, health check, use timeout, unexpected);
/// the two soft-failure kinds (`other_http_error`, `request_error`) only
/// cool down once `request_fail_count` reaches `failure_threshold`.
pub fn should_cool_down(kind: ErrorKind, request_fail_count_after_increment: u32, failure_threshold: u32) -> bool {
    kind.always_cools_down() || request_fail_count_after_increment >= failure_threshold
}

/// Exponential backoff, doubling per cooldown entry and capped at `max`.
///
/// `cool_down_entry_count` is the count *after* incrementing for this entry,
/// so the first cooldown (`entry_count == 1`) uses `initial` unscaled.
pub fn backoff_duration(initial_seconds: u64, cool_down_entry_count: u32, max_seconds: u64) -> u64 {
    let exponent = cool_down_entry_count.saturating_sub(1);
    let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    initial_seconds.saturating_mul(factor).min(max_seconds)
}
