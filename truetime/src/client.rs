//! `TrueTimeClient`: the RAII handle that resolves the published library's explicit `init`/
//! `destroy` pair into idiomatic `new`/`Drop`. Owns the shared-memory reader for whichever frame
//! version the path selects, and (v1 only) a PHC sampler.
//!
//! Generic over the PHC device (`D: PtpDevice`, defaulting to the real [`PhcHandle`]) so the
//! `gettime`/`gettime_utc` assembly logic can be exercised against a scripted mock device without
//! a real `/dev/ptp*` node, the same way `truetime-phc` tests its own sampler.

use std::path::Path;

use truetime_phc::{PhcHandle, PhcSampler, PtpDevice};
use truetime_shm::{ShmReaderV1, ShmReaderV2};

use crate::{smear, wou, TrueTime, TrueTimeError};

/// Which time standard a query should be assembled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeStandard {
    Tai,
    Utc,
}

enum ShmHandle {
    V1(ShmReaderV1),
    V2(ShmReaderV2),
}

/// Owns the resources needed to answer `gettime`/`gettime_utc`: a shared-memory reader and,
/// for the v1 wire layout, a PHC sampler. Dropping the client unmaps the segment and closes the
/// PHC descriptor; the backing shared-memory file is never unlinked.
pub struct TrueTimeClient<D: PtpDevice = PhcHandle> {
    shm: ShmHandle,
    phc: Option<PhcSampler<D>>,
}

/// Default PHC device path, matching the daemon's well-known location.
pub const DEFAULT_PHC_PATH: &str = "/dev/fbclock/ptp";

impl TrueTimeClient<PhcHandle> {
    /// Opens `shm_path`, selecting the v1 or v2 wire layout by its `_v2` suffix, and (v1 only)
    /// opens the PHC device at the default path.
    pub fn new(shm_path: impl AsRef<Path>) -> Result<Self, TrueTimeError> {
        Self::new_with_phc_path(shm_path, DEFAULT_PHC_PATH)
    }

    pub fn new_with_phc_path(
        shm_path: impl AsRef<Path>,
        phc_path: impl AsRef<Path>,
    ) -> Result<Self, TrueTimeError> {
        let shm_path = shm_path.as_ref();
        if is_v2_path(shm_path) {
            let reader = open_v2(shm_path)?;
            Ok(TrueTimeClient {
                shm: ShmHandle::V2(reader),
                phc: None,
            })
        } else {
            let reader = open_v1(shm_path)?;
            let phc = PhcSampler::open(phc_path.as_ref()).map_err(TrueTimeError::PtpOpen)?;
            Ok(TrueTimeClient {
                shm: ShmHandle::V1(reader),
                phc: Some(phc),
            })
        }
    }
}

impl<D: PtpDevice> TrueTimeClient<D> {
    /// Builds a v1 client around an already-open shared-memory reader and an arbitrary PHC
    /// device, for tests that substitute a scripted [`PtpDevice`].
    pub fn from_v1_parts(reader: ShmReaderV1, device: D) -> Self {
        TrueTimeClient {
            shm: ShmHandle::V1(reader),
            phc: Some(PhcSampler::new(device)),
        }
    }

    /// Builds a v2 client around an already-open shared-memory reader. v2 never touches a PHC
    /// device, so there is nothing to substitute.
    pub fn from_v2_parts(reader: ShmReaderV2) -> TrueTimeClient<D> {
        TrueTimeClient {
            shm: ShmHandle::V2(reader),
            phc: None,
        }
    }

    /// Returns the current TrueTime interval in TAI nanoseconds.
    pub fn gettime(&mut self) -> Result<TrueTime, TrueTimeError> {
        self.gettime_with_standard(TimeStandard::Tai)
    }

    /// Returns the current TrueTime interval in UTC nanoseconds, applying leap-second smearing.
    pub fn gettime_utc(&mut self) -> Result<TrueTime, TrueTimeError> {
        self.gettime_with_standard(TimeStandard::Utc)
    }

    fn gettime_with_standard(&mut self, standard: TimeStandard) -> Result<TrueTime, TrueTimeError> {
        match &mut self.shm {
            ShmHandle::V1(reader) => {
                let state = reader.snapshot().map_err(map_shm_read_err)?;
                if state.error_bound_ns == 0 || state.ingress_time_ns == 0 {
                    return Err(TrueTimeError::NoData);
                }
                if state.error_bound_ns == u32::MAX || state.holdover_multiplier_ns == u32::MAX {
                    return Err(TrueTimeError::WouTooBig);
                }

                let phc = self.phc.as_mut().expect("v1 client always owns a PHC sampler");
                let sample = phc.sample().map_err(TrueTimeError::PtpReadOffset)?;

                if state.ingress_time_ns > sample.phc_time_ns {
                    return Err(TrueTimeError::PhcInThePast);
                }
                let elapsed_s =
                    (sample.phc_time_ns - state.ingress_time_ns) as f64 / 1_000_000_000.0;

                let mut center_ns = sample.phc_time_ns;
                if standard == TimeStandard::Utc {
                    center_ns = smear::apply_utc_offset_v1(
                        center_ns,
                        state.utc_offset_pre_s,
                        state.utc_offset_post_s,
                        state.clock_smearing_start_s,
                        state.clock_smearing_end_s,
                    );
                }

                let error_bound_ns = state.error_bound_ns as u64 + sample.min_delay_ns as u64;
                let rate = wou::holdover_rate_ns_per_s(state.holdover_multiplier_ns);
                let half_width = wou::wou(elapsed_s, error_bound_ns, rate);

                Ok(assemble(center_ns, half_width))
            }
            ShmHandle::V2(reader) => {
                let state = reader.snapshot().map_err(map_shm_read_err)?;
                if state.error_bound_ns == 0 || state.ingress_time_ns == 0 {
                    return Err(TrueTimeError::NoData);
                }
                if state.phc_time_ns == 0 || state.sysclock_time_ns == 0 {
                    return Err(TrueTimeError::NoData);
                }
                if state.error_bound_ns == u32::MAX || state.holdover_multiplier_ns == u32::MAX {
                    return Err(TrueTimeError::WouTooBig);
                }

                if state.ingress_time_ns > state.phc_time_ns {
                    return Err(TrueTimeError::PhcInThePast);
                }
                let elapsed_s =
                    (state.phc_time_ns - state.ingress_time_ns) as f64 / 1_000_000_000.0;

                let now = truetime_shm::common::clock_gettime_safe(state.clock_id).map_err(|_| {
                    TrueTimeError::PtpReadOffset(truetime_phc::PhcError::NegativeDelay)
                })?;
                let sysclock_now_ns = now.tv_sec as i64 * 1_000_000_000 + now.tv_nsec as i64;
                let diff_ns = sysclock_now_ns - state.sysclock_time_ns;
                let mut center_ns =
                    state.phc_time_ns + diff_ns + diff_ns * state.coef_ppb as i64 / 1_000_000_000;

                if standard == TimeStandard::Utc {
                    center_ns = smear::apply_utc_offset_v2(
                        center_ns,
                        state.utc_offset_pre_s,
                        state.utc_offset_post_s,
                        state.clock_smearing_start_s,
                    );
                }

                let error_bound_ns = state.error_bound_ns as u64;
                let rate = wou::holdover_rate_ns_per_s(state.holdover_multiplier_ns);
                let half_width = wou::wou(elapsed_s, error_bound_ns, rate);

                Ok(assemble(center_ns, half_width))
            }
        }
    }
}

fn is_v2_path(shm_path: &Path) -> bool {
    shm_path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with("_v2"))
        .unwrap_or(false)
}

fn open_v1(shm_path: &Path) -> Result<ShmReaderV1, TrueTimeError> {
    let cpath = path_to_cstring(shm_path)?;
    ShmReaderV1::open(&cpath).map_err(map_shm_open_err)
}

fn open_v2(shm_path: &Path) -> Result<ShmReaderV2, TrueTimeError> {
    let cpath = path_to_cstring(shm_path)?;
    ShmReaderV2::open(&cpath).map_err(map_shm_open_err)
}

fn assemble(center_ns: i64, half_width_ns: u64) -> TrueTime {
    TrueTime {
        earliest_ns: (center_ns - half_width_ns as i64) as u64,
        latest_ns: (center_ns + half_width_ns as i64) as u64,
    }
}

fn path_to_cstring(path: &Path) -> Result<std::ffi::CString, TrueTimeError> {
    use std::os::unix::ffi::OsStrExt;
    std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| TrueTimeError::ShmemOpen(truetime_shm::ShmError::SegmentMalformed))
}

fn map_shm_open_err(err: truetime_shm::ShmError) -> TrueTimeError {
    match err {
        truetime_shm::ShmError::SegmentMalformed => TrueTimeError::ShmemMapFailed(err),
        truetime_shm::ShmError::CrcMismatch => TrueTimeError::CrcMismatch,
        truetime_shm::ShmError::SyscallError(..) => TrueTimeError::ShmemOpen(err),
    }
}

fn map_shm_read_err(err: truetime_shm::ShmError) -> TrueTimeError {
    match err {
        truetime_shm::ShmError::CrcMismatch => TrueTimeError::CrcMismatch,
        other => TrueTimeError::ShmemMapFailed(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;
    use tempfile::NamedTempFile;
    use truetime_phc::{MockPtpDevice, PhcError, PtpClockTime, PtpSysOffsetExtended};
    use truetime_shm::{ClockDataV1, ClockDataV2, ShmWrite, ShmWriterV1, ShmWriterV2};

    // Returning the `TempPath` alongside the reader keeps the backing file alive for as long as
    // the test holds onto it; the reader itself does not own the path.
    fn v1_reader_over(data: &ClockDataV1) -> (ShmReaderV1, tempfile::TempPath) {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.into_temp_path();
        let mut writer = ShmWriterV1::create(&path).unwrap();
        writer.write(data);
        let cpath = CString::new(path.as_os_str().as_bytes()).unwrap();
        (ShmReaderV1::open(&cpath).unwrap(), path)
    }

    fn v2_reader_over(data: &ClockDataV2) -> (ShmReaderV2, tempfile::TempPath) {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.into_temp_path();
        let mut writer = ShmWriterV2::create(&path).unwrap();
        writer.write(data);
        let cpath = CString::new(path.as_os_str().as_bytes()).unwrap();
        (ShmReaderV2::open(&cpath).unwrap(), path)
    }

    /// A mock PHC device that always reports `phc_time_ns` with a fixed zero-delay bracket.
    fn extended_device_at(phc_time_ns: i64) -> MockPtpDevice {
        let sec = phc_time_ns / 1_000_000_000;
        let nsec = (phc_time_ns % 1_000_000_000) as u32;
        let mut mock = MockPtpDevice::new();
        mock.expect_sys_offset_extended().returning(move |n| {
            let mut arg = PtpSysOffsetExtended {
                n_samples: n,
                ..Default::default()
            };
            let ts = PtpClockTime { sec, nsec, reserved: 0 };
            arg.ts[0] = [ts, ts, ts];
            Ok(arg)
        });
        mock
    }

    #[test]
    fn s2_v1_happy_path_matches_current_revision_values() {
        let data = ClockDataV1 {
            ingress_time_ns: 1_647_269_082_943_150_996,
            error_bound_ns: 172,
            holdover_multiplier_ns: (50.5 * wou::HOLDOVER_FIXED_POINT_SCALE) as u32,
            clock_smearing_start_s: 0,
            clock_smearing_end_s: 0,
            utc_offset_pre_s: 0,
            utc_offset_post_s: 0,
        };
        let (reader, _keep) = v1_reader_over(&data);
        // phc = ingress + 8.859951961s, delay = 0 so error_bound stays 172.
        let device = extended_device_at(1_647_269_091_803_102_957);
        let mut client = TrueTimeClient::from_v1_parts(reader, device);
        let tt = client.gettime().unwrap();
        assert_eq!(tt.earliest_ns, 1_647_269_091_803_102_338);
        assert_eq!(tt.latest_ns, 1_647_269_091_803_103_576);
    }

    #[test]
    fn no_data_when_payload_is_zero() {
        let data = ClockDataV1::default();
        let (reader, _keep) = v1_reader_over(&data);
        let device = extended_device_at(0);
        let mut client = TrueTimeClient::from_v1_parts(reader, device);
        assert!(matches!(client.gettime(), Err(TrueTimeError::NoData)));
    }

    #[test]
    fn wou_too_big_on_sentinel() {
        let data = ClockDataV1 {
            ingress_time_ns: 1,
            error_bound_ns: u32::MAX,
            holdover_multiplier_ns: 1,
            clock_smearing_start_s: 0,
            clock_smearing_end_s: 0,
            utc_offset_pre_s: 0,
            utc_offset_post_s: 0,
        };
        let (reader, _keep) = v1_reader_over(&data);
        let device = extended_device_at(0);
        let mut client = TrueTimeClient::from_v1_parts(reader, device);
        assert!(matches!(client.gettime(), Err(TrueTimeError::WouTooBig)));
    }

    #[test]
    fn phc_in_the_past_when_ingress_after_phc_sample() {
        let data = ClockDataV1 {
            ingress_time_ns: 2_000_000_000_000,
            error_bound_ns: 10,
            holdover_multiplier_ns: 10,
            clock_smearing_start_s: 0,
            clock_smearing_end_s: 0,
            utc_offset_pre_s: 0,
            utc_offset_post_s: 0,
        };
        let (reader, _keep) = v1_reader_over(&data);
        let device = extended_device_at(1_000_000_000);
        let mut client = TrueTimeClient::from_v1_parts(reader, device);
        assert!(matches!(client.gettime(), Err(TrueTimeError::PhcInThePast)));
    }

    #[test]
    fn ptp_read_offset_propagates_device_error() {
        let data = ClockDataV1 {
            ingress_time_ns: 1,
            error_bound_ns: 10,
            holdover_multiplier_ns: 10,
            clock_smearing_start_s: 0,
            clock_smearing_end_s: 0,
            utc_offset_pre_s: 0,
            utc_offset_post_s: 0,
        };
        let (reader, _keep) = v1_reader_over(&data);
        // First call (the construction-time extended-support probe) succeeds so the sampler
        // latches the extended method; the next call (the real sample during `gettime`) fails.
        let calls = std::sync::atomic::AtomicU32::new(0);
        let mut mock = MockPtpDevice::new();
        mock.expect_sys_offset_extended().returning(move |n| {
            if calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                Ok(PtpSysOffsetExtended {
                    n_samples: n,
                    ..Default::default()
                })
            } else {
                Err(PhcError::ReadOffset(errno::errno()))
            }
        });
        let mut client = TrueTimeClient::from_v1_parts(reader, mock);
        assert!(matches!(client.gettime(), Err(TrueTimeError::PtpReadOffset(_))));
    }

    #[test]
    fn v2_gettime_uses_sysclock_extrapolation_without_a_phc_device() {
        let now = truetime_shm::common::clock_gettime_safe(libc::CLOCK_REALTIME).unwrap();
        let now_ns = now.tv_sec as i64 * 1_000_000_000 + now.tv_nsec as i64;
        let data = ClockDataV2 {
            ingress_time_ns: now_ns - 1_000_000_000,
            error_bound_ns: 100,
            holdover_multiplier_ns: 0,
            clock_smearing_start_s: 0,
            utc_offset_pre_s: 0,
            utc_offset_post_s: 0,
            clock_id: libc::CLOCK_REALTIME,
            phc_time_ns: now_ns,
            sysclock_time_ns: now_ns,
            coef_ppb: 0,
        };
        let (reader, _keep) = v2_reader_over(&data);
        let mut client: TrueTimeClient<MockPtpDevice> = TrueTimeClient::from_v2_parts(reader);
        let tt = client.gettime().unwrap();
        assert!(tt.earliest_ns <= tt.latest_ns);
        assert_eq!(tt.latest_ns - tt.earliest_ns, 200);
    }
}
