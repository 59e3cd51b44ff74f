//! TAI/MJD timestamp conversions
//!
//! Keyword values are timestamped in TAI seconds since the Modified Julian
//! Date epoch (1858-11-17T00:00:00). The wall clock may track UTC or TAI
//! depending on `Config::system_clock`; as of this writing TAI is 37 seconds
//! ahead of UTC (no further leap seconds have been scheduled since 2016).

use chrono::Utc;

const MJD_EPOCH_UNIX_SECS: f64 = -3_506_716_800.0;
const TAI_UTC_OFFSET_SECS: f64 = 37.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemClock {
    Utc,
    Tai,
}

impl std::str::FromStr for SystemClock {
    type Err = crate::errors::ArchiverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UTC" => Ok(SystemClock::Utc),
            "TAI" => Ok(SystemClock::Tai),
            other => Err(crate::errors::ArchiverError::config(format!(
                "systemClock must be UTC or TAI, got {other}"
            ))),
        }
    }
}

/// Returns the current time as TAI-MJD seconds, per `clock`.
pub fn now_tai_mjd(clock: SystemClock) -> f64 {
    let unix_secs = Utc::now().timestamp() as f64 + (Utc::now().timestamp_subsec_nanos() as f64 / 1e9);
    unix_to_tai_mjd(unix_secs, clock)
}

/// Converts a Unix timestamp (seconds) to TAI-MJD seconds.
pub fn unix_to_tai_mjd(unix_secs: f64, clock: SystemClock) -> f64 {
    let mjd_secs = unix_secs - MJD_EPOCH_UNIX_SECS;
    match clock {
        SystemClock::Tai => mjd_secs,
        SystemClock::Utc => mjd_secs + TAI_UTC_OFFSET_SECS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mjd_epoch_is_zero() {
        assert_eq!(unix_to_tai_mjd(MJD_EPOCH_UNIX_SECS, SystemClock::Tai), 0.0);
    }

    #[test]
    fn utc_clock_adds_leap_offset() {
        let tai = unix_to_tai_mjd(MJD_EPOCH_UNIX_SECS, SystemClock::Tai);
        let utc = unix_to_tai_mjd(MJD_EPOCH_UNIX_SECS, SystemClock::Utc);
        assert_eq!(utc - tai, TAI_UTC_OFFSET_SECS);
    }
}
