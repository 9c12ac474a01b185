//! Media timestamps
//!
//! All sample timing in the pipeline is expressed as a signed nanosecond
//! count. Capture adapters convert their native clocks (CMTime, `Instant`)
//! into `MediaTime` on the host clock returned by [`MediaTime::host_now`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// A point or span on a media timeline, in nanoseconds
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MediaTime(i64);

impl MediaTime {
    pub const ZERO: MediaTime = MediaTime(0);

    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub const fn from_micros(micros: i64) -> Self {
        Self(micros.saturating_mul(1_000))
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * NANOS_PER_SEC as f64).round() as i64)
    }

    /// Convert a rational timestamp such as a CMTime `value / timescale`.
    ///
    /// A non-positive timescale yields zero.
    pub fn from_rational(value: i64, timescale: i32) -> Self {
        if timescale <= 0 {
            return Self::ZERO;
        }
        let nanos = (value as i128 * NANOS_PER_SEC as i128) / timescale as i128;
        Self(nanos.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self(i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX))
    }

    /// Duration of `frames` audio frames at `sample_rate`
    pub fn from_frames(frames: u64, sample_rate: u32) -> Self {
        if sample_rate == 0 {
            return Self::ZERO;
        }
        Self::from_rational(frames as i64, sample_rate as i32)
    }

    /// Current time on the process host clock.
    ///
    /// Every adapter that does not receive timestamps from the OS stamps its
    /// samples with this clock so that sources stay comparable.
    pub fn host_now() -> Self {
        static EPOCH: OnceLock<Instant> = OnceLock::new();
        let epoch = EPOCH.get_or_init(Instant::now);
        Self::from_duration(epoch.elapsed())
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    pub const fn as_millis(self) -> i64 {
        self.0 / 1_000_000
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }

    /// Number of whole audio frames this span covers at `sample_rate`
    pub fn to_frames(self, sample_rate: u32) -> i64 {
        ((self.0 as i128 * sample_rate as i128) / NANOS_PER_SEC as i128) as i64
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn saturating_sub(self, other: MediaTime) -> MediaTime {
        Self(self.0.saturating_sub(other.0))
    }
}

impl Add for MediaTime {
    type Output = MediaTime;

    fn add(self, rhs: MediaTime) -> MediaTime {
        MediaTime(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for MediaTime {
    fn add_assign(&mut self, rhs: MediaTime) {
        *self = *self + rhs;
    }
}

impl Sub for MediaTime {
    type Output = MediaTime;

    fn sub(self, rhs: MediaTime) -> MediaTime {
        MediaTime(self.0.saturating_sub(rhs.0))
    }
}

impl SubAssign for MediaTime {
    fn sub_assign(&mut self, rhs: MediaTime) {
        *self = *self - rhs;
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rational_conversion() {
        assert_eq!(MediaTime::from_rational(600, 600), MediaTime::from_millis(1000));
        assert_eq!(MediaTime::from_rational(1, 30).as_nanos(), 33_333_333);
        assert_eq!(MediaTime::from_rational(42, 0), MediaTime::ZERO);
    }

    #[test]
    fn test_frames_conversion() {
        let span = MediaTime::from_frames(48_000, 48_000);
        assert_eq!(span, MediaTime::from_millis(1000));
        assert_eq!(MediaTime::from_millis(500).to_frames(44_100), 22_050);
    }

    #[test]
    fn test_arithmetic_saturates() {
        let max = MediaTime::from_nanos(i64::MAX);
        assert_eq!(max + MediaTime::from_millis(1), max);
        assert_eq!(
            MediaTime::from_millis(165) - MediaTime::from_millis(33),
            MediaTime::from_millis(132)
        );
    }

    #[test]
    fn test_host_clock_advances() {
        let a = MediaTime::host_now();
        std::thread::sleep(Duration::from_millis(2));
        let b = MediaTime::host_now();
        assert!(b > a);
    }
}
