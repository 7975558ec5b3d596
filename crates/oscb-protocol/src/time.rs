//! OSC time tags (64-bit NTP timestamps).

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch.
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// Fractional units per second (2^32).
const FRACTION_SCALE: u64 = 1 << 32;

/// An NTP timestamp as carried in bundles and `t` arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TimeTag {
    pub seconds: u32,
    pub fraction: u32,
}

impl TimeTag {
    /// The special value meaning "execute immediately".
    pub const IMMEDIATE: TimeTag = TimeTag {
        seconds: 0,
        fraction: 1,
    };

    pub const fn new(seconds: u32, fraction: u32) -> Self {
        Self { seconds, fraction }
    }

    pub fn is_immediate(&self) -> bool {
        *self == Self::IMMEDIATE
    }

    /// Returns the time tag for the current wall-clock time.
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Packs the tag into its 64-bit wire form.
    pub fn to_bits(self) -> u64 {
        (u64::from(self.seconds) << 32) | u64::from(self.fraction)
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            seconds: (bits >> 32) as u32,
            fraction: bits as u32,
        }
    }

    /// Converts a system time. Times before 1970 clamp to the Unix epoch;
    /// NTP era rollover (2036) wraps the seconds field.
    pub fn from_system_time(time: SystemTime) -> Self {
        let since_unix = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        let seconds = since_unix.as_secs().wrapping_add(NTP_UNIX_OFFSET) as u32;
        let fraction = (u64::from(since_unix.subsec_nanos()) * FRACTION_SCALE / 1_000_000_000) as u32;
        Self { seconds, fraction }
    }

    /// Returns the time as seconds + nanoseconds since the Unix epoch, or
    /// `None` for tags before 1970.
    fn unix_parts(self) -> Option<(u64, u32)> {
        let secs = u64::from(self.seconds).checked_sub(NTP_UNIX_OFFSET)?;
        let nanos = (u64::from(self.fraction) * 1_000_000_000 / FRACTION_SCALE) as u32;
        Some((secs, nanos))
    }

    pub fn to_system_time(self) -> Option<SystemTime> {
        let (secs, nanos) = self.unix_parts()?;
        UNIX_EPOCH.checked_add(Duration::new(secs, nanos))
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        let (secs, nanos) = self.unix_parts()?;
        Utc.timestamp_opt(i64::try_from(secs).ok()?, nanos).single()
    }

    pub fn from_datetime(time: DateTime<Utc>) -> Self {
        Self::from_system_time(SystemTime::from(time))
    }
}

impl Default for TimeTag {
    fn default() -> Self {
        Self::IMMEDIATE
    }
}

impl fmt::Display for TimeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_immediate() {
            return f.write_str("immediate");
        }
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}.{:08x}", self.seconds, self.fraction),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immediate() {
        assert!(TimeTag::IMMEDIATE.is_immediate());
        assert_eq!(TimeTag::IMMEDIATE.to_bits(), 1);
        assert_eq!(TimeTag::default(), TimeTag::IMMEDIATE);
        assert_eq!(TimeTag::IMMEDIATE.to_string(), "immediate");
    }

    #[test]
    fn test_bits_round_trip() {
        let tag = TimeTag::new(0xDEAD_BEEF, 0x1234_5678);
        assert_eq!(TimeTag::from_bits(tag.to_bits()), tag);
    }

    #[test]
    fn test_unix_epoch_maps_to_ntp_offset() {
        let tag = TimeTag::from_system_time(UNIX_EPOCH);
        assert_eq!(u64::from(tag.seconds), NTP_UNIX_OFFSET);
        assert_eq!(tag.fraction, 0);
    }

    #[test]
    fn test_datetime_conversion() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let tag = TimeTag::from_datetime(dt);
        assert_eq!(tag.to_datetime().unwrap(), dt);
    }

    #[test]
    fn test_half_second_fraction() {
        let time = UNIX_EPOCH + Duration::from_millis(500);
        let tag = TimeTag::from_system_time(time);
        assert_eq!(tag.fraction, 1 << 31);
        let back = tag.to_system_time().unwrap();
        assert_eq!(back, time);
    }

    #[test]
    fn test_pre_unix_tag_has_no_datetime() {
        assert!(TimeTag::new(5, 0).to_datetime().is_none());
        assert!(TimeTag::new(5, 0).to_system_time().is_none());
    }
}
