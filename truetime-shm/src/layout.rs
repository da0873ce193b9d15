// Wire layouts for the two shared-memory frame versions the daemon may publish. Selected at
// `TrueTimeClient::new()` by the shared-memory path suffix (`_v2` selects v2, anything else v1).

use std::sync::atomic::AtomicU64;

/// v1 clock-data payload, as published by the daemon behind a CRC64-checksummed frame.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ClockDataV1 {
    /// PHC time (TAI nanoseconds) at which the daemon last accepted a SYNC from the grandmaster.
    pub ingress_time_ns: i64,
    /// Daemon-computed error bound combining GM offset, path delay, frequency-adjustment error.
    pub error_bound_ns: u32,
    /// Per-second nanosecond growth rate while in holdover, scaled by 2^16 (fixed-point).
    pub holdover_multiplier_ns: u32,
    /// Planned leap-second smear window, TAI seconds.
    pub clock_smearing_start_s: u64,
    pub clock_smearing_end_s: u64,
    /// UTC-TAI offset magnitudes before/after the smear window, seconds.
    pub utc_offset_pre_s: i32,
    pub utc_offset_post_s: i32,
}

/// v2 clock-data payload, published behind a seqlock frame. Extends v1 with a matched
/// (phc, sysclock) pair and a frequency coefficient, letting a reader extrapolate PHC time from
/// the system clock without an ioctl. The smear window end is implicit:
/// `clock_smearing_start_s + SMEAR_DURATION_V2_S`.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ClockDataV2 {
    pub ingress_time_ns: i64,
    pub error_bound_ns: u32,
    pub holdover_multiplier_ns: u32,
    pub clock_smearing_start_s: u64,
    pub utc_offset_pre_s: i16,
    pub utc_offset_post_s: i16,
    /// Which system clock source (`CLOCK_REALTIME` or `CLOCK_MONOTONIC_RAW`) the daemon sampled
    /// `sysclock_time_ns` from.
    pub clock_id: i32,
    /// A matched (PHC, sysclock) pair taken at a recent instant by the daemon.
    pub phc_time_ns: i64,
    pub sysclock_time_ns: i64,
    /// Frequency-adjustment coefficient in parts per billion, applied to the elapsed sysclock
    /// interval since the pair was recorded.
    pub coef_ppb: i32,
}

/// Fixed-length smear duration implied by the v2 layout (seconds).
pub const SMEAR_DURATION_V2_S: u64 = 62_500;

/// v1 frame: an atomic checksum word followed by the v1 payload.
#[repr(C)]
pub struct FrameV1 {
    pub checksum: AtomicU64,
    pub data: ClockDataV1,
}

/// v2 frame: an atomic sequence word followed by the v2 payload.
#[repr(C)]
pub struct FrameV2 {
    pub seq: AtomicU64,
    pub data: ClockDataV2,
}

pub const FRAME_V1_SIZE: usize = std::mem::size_of::<FrameV1>();
pub const FRAME_V2_SIZE: usize = std::mem::size_of::<FrameV2>();

/// Maximum retries for a torn-read protocol before giving up, per spec: 1,000.
pub const MAX_READ_RETRIES: u32 = 1_000;
