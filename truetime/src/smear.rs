//! TAI → UTC conversion, absorbing a leap second's ±1s step into a linear ramp across a planned
//! smear window instead of exposing a discontinuity to callers.

/// One nanosecond of smear accrues every 65 microseconds.
pub const SMEAR_STEP_NS: i64 = 65_000;

/// v2's smear window has no explicit end field; it is always exactly this many seconds after
/// `clock_smearing_start_s`.
pub const SMEAR_DURATION_V2_S: u64 = 62_500;

/// Applied when the daemon hasn't published leap-second tzdata
/// (`utc_offset_pre_s == 0 && utc_offset_post_s == 0`).
pub const UTC_TAI_OFFSET_NS: i64 = -37_000_000_000;

/// Piecewise-linear TAI→UTC ramp across `[smear_start_ns, smear_end_ns]`.
///
/// `offset_pre_ns`/`offset_post_ns` are non-negative UTC−TAI magnitudes before/after the window;
/// `multiplier` is `+1` for a positive leap second, `-1` for a negative one.
pub fn apply_smear(
    t_ns: i64,
    offset_pre_ns: i64,
    offset_post_ns: i64,
    smear_start_ns: i64,
    smear_end_ns: i64,
    multiplier: i64,
) -> i64 {
    if t_ns < smear_start_ns {
        t_ns - offset_pre_ns
    } else if t_ns > smear_end_ns {
        t_ns - offset_post_ns
    } else {
        let steps = (t_ns - smear_start_ns) / SMEAR_STEP_NS;
        t_ns - (offset_pre_ns + multiplier * steps)
    }
}

/// Applies the v1 TAI→UTC conversion: the `UTC_TAI_OFFSET_NS` fallback when the daemon hasn't
/// published tzdata (both offsets zero), otherwise the full smear ramp across
/// `[clock_smearing_start_s, clock_smearing_end_s]`. The smear multiplier is derived as
/// `utc_offset_post_s - utc_offset_pre_s`, not assumed to be literal `+1`/`-1`, so a partially
/// published or unusual offset pair still produces a consistent ramp.
pub fn apply_utc_offset_v1(
    t_ns: i64,
    utc_offset_pre_s: i32,
    utc_offset_post_s: i32,
    clock_smearing_start_s: u64,
    clock_smearing_end_s: u64,
) -> i64 {
    if utc_offset_pre_s == 0 && utc_offset_post_s == 0 {
        return t_ns + UTC_TAI_OFFSET_NS;
    }
    let multiplier = (utc_offset_post_s - utc_offset_pre_s) as i64;
    apply_smear(
        t_ns,
        utc_offset_pre_s as i64 * 1_000_000_000,
        utc_offset_post_s as i64 * 1_000_000_000,
        clock_smearing_start_s as i64 * 1_000_000_000,
        clock_smearing_end_s as i64 * 1_000_000_000,
        multiplier,
    )
}

/// Same as [`apply_utc_offset_v1`] but for v2's narrower (16-bit) offset fields and implicit
/// smear window end (`clock_smearing_start_s + SMEAR_DURATION_V2_S`).
pub fn apply_utc_offset_v2(
    t_ns: i64,
    utc_offset_pre_s: i16,
    utc_offset_post_s: i16,
    clock_smearing_start_s: u64,
) -> i64 {
    if utc_offset_pre_s == 0 && utc_offset_post_s == 0 {
        return t_ns + UTC_TAI_OFFSET_NS;
    }
    let multiplier = (utc_offset_post_s - utc_offset_pre_s) as i64;
    let clock_smearing_end_s = clock_smearing_start_s + SMEAR_DURATION_V2_S;
    apply_smear(
        t_ns,
        utc_offset_pre_s as i64 * 1_000_000_000,
        utc_offset_post_s as i64 * 1_000_000_000,
        clock_smearing_start_s as i64 * 1_000_000_000,
        clock_smearing_end_s as i64 * 1_000_000_000,
        multiplier,
    )
}
