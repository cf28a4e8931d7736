use std::fmt;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::error::ChopError;

pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Absolute UTC time with nanosecond resolution, counted from the Unix epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    pub const fn add_nanos(self, nanos: i64) -> Self {
        Self(self.0 + nanos)
    }

    pub const fn nanos_since(self, earlier: Timestamp) -> i64 {
        self.0 - earlier.0
    }

    pub fn seconds_since(self, earlier: Timestamp) -> f64 {
        self.nanos_since(earlier) as f64 / NANOS_PER_SECOND as f64
    }

    /// Parses `YYYY-MM-DDThh:mm:ss[.fffffffff][Z]` (a space may replace the `T`).
    pub fn parse_iso(input: &str) -> Result<Self, ChopError> {
        let trimmed = input.trim().trim_end_matches('Z').replace(' ', "T");
        let naive = NaiveDateTime::parse_from_str(&trimmed, "%Y-%m-%dT%H:%M:%S%.f")
            .map_err(|e| ChopError::InvalidConfig(format!("bad timestamp '{input}': {e}")))?;
        Self::from_naive(naive)
            .ok_or_else(|| ChopError::InvalidConfig(format!("timestamp '{input}' out of range")))
    }

    fn from_naive(naive: NaiveDateTime) -> Option<Self> {
        naive.and_utc().timestamp_nanos_opt().map(Self)
    }

    fn to_datetime(self) -> DateTime<chrono::Utc> {
        DateTime::from_timestamp_nanos(self.as_nanos())
    }

    /// Decodes an analyser capture name such as
    /// `/data/IQ-2021.07.02.15.02.34.958.tiq` (millisecond resolution).
    pub fn from_analyser_name(name: &str) -> Result<Self, ChopError> {
        let bad = || ChopError::InvalidConfig(format!("'{name}' is not an analyser file name"));
        let base = name.rsplit('/').next().ok_or_else(bad)?;
        let tail = base.rsplit('-').next().ok_or_else(bad)?;
        let stamp = tail.strip_suffix(".tiq").ok_or_else(bad)?;
        if stamp.len() != 23 || !stamp.is_ascii() {
            return Err(bad());
        }
        let field = |range: std::ops::Range<usize>| -> Result<u32, ChopError> {
            stamp[range].parse::<u32>().map_err(|_| bad())
        };
        let year = field(0..4)? as i32;
        let naive = NaiveDate::from_ymd_opt(year, field(5..7)?, field(8..10)?)
            .and_then(|d| {
                d.and_hms_milli_opt(
                    field(11..13).ok()?,
                    field(14..16).ok()?,
                    field(17..19).ok()?,
                    field(20..23).ok()?,
                )
            })
            .ok_or_else(bad)?;
        Self::from_naive(naive).ok_or_else(bad)
    }

    /// Encodes the analyser capture name for this instant, truncated to milliseconds.
    pub fn to_analyser_name(self, head: &str) -> String {
        format!("{head}{}.tiq", self.to_datetime().format("%Y.%m.%d.%H.%M.%S%.3f"))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().format("%Y-%m-%dT%H:%M:%S%.9f"))
    }
}

/// `int(seconds * 1e9)`: truncation toward zero, never rounding.
pub fn seconds_to_nanos_truncated(seconds: f64) -> i64 {
    (seconds * 1e9) as i64
}

/// Seconds elapsed between consecutive instants.
pub fn deltas_seconds(stamps: &[Timestamp]) -> Vec<f64> {
    stamps
        .windows(2)
        .map(|pair| pair[1].seconds_since(pair[0]))
        .collect()
}

/// Time deltas between consecutive analyser captures, decoded from their names.
pub fn analyser_file_deltas(files: &[impl AsRef<Path>]) -> Result<Vec<f64>, ChopError> {
    let stamps = files
        .iter()
        .map(|f| Timestamp::from_analyser_name(&f.as_ref().to_string_lossy()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(deltas_seconds(&stamps))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_iso_accepts_fraction_and_zulu() {
        let a = Timestamp::parse_iso("2021-06-30T23:27:34").unwrap();
        let b = Timestamp::parse_iso("2021-06-30 23:27:34.000000000Z").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_nanos(), 1_625_095_654 * NANOS_PER_SECOND);
        let c = Timestamp::parse_iso("2021-06-30T23:27:34.5").unwrap();
        assert_eq!(c.nanos_since(a), 500_000_000);
    }

    #[test]
    fn display_round_trips_through_parse() {
        let t = Timestamp::parse_iso("2021-07-02T15:02:34.958000123").unwrap();
        assert_eq!(t.to_string(), "2021-07-02T15:02:34.958000123");
        assert_eq!(Timestamp::parse_iso(&t.to_string()).unwrap(), t);
    }

    #[test]
    fn analyser_name_codec_matches_fixed_layout() {
        let t = Timestamp::parse_iso("2021-07-02T15:02:34.958").unwrap();
        assert_eq!(t.to_analyser_name(""), "2021.07.02.15.02.34.958.tiq");
        let decoded =
            Timestamp::from_analyser_name("/data/run/IQ-2021.07.02.15.02.34.958.tiq").unwrap();
        assert_eq!(decoded, t);
    }

    #[test]
    fn analyser_name_truncates_sub_millisecond_part() {
        let t = Timestamp::parse_iso("2021-07-02T15:02:34.958999").unwrap();
        assert_eq!(t.to_analyser_name("x/"), "x/2021.07.02.15.02.34.958.tiq");
    }

    #[test]
    fn analyser_name_rejects_other_shapes() {
        assert!(Timestamp::from_analyser_name("0000001.iq.tdms").is_err());
        assert!(Timestamp::from_analyser_name("IQ-2021.07.02.15.02.34.tiq").is_err());
    }

    #[test]
    fn seconds_conversion_truncates() {
        assert_eq!(seconds_to_nanos_truncated(0.013107200007652864), 13_107_200);
        assert_eq!(seconds_to_nanos_truncated(1.9999999999), 1_999_999_999);
        assert_eq!(seconds_to_nanos_truncated(-0.0000000015), -1);
    }

    #[test]
    fn file_deltas_follow_name_order() {
        let files = [
            "IQ-2021.07.02.15.02.34.000.tiq",
            "IQ-2021.07.02.15.02.54.500.tiq",
            "IQ-2021.07.02.15.03.14.500.tiq",
        ];
        let deltas = analyser_file_deltas(&files).unwrap();
        assert_eq!(deltas.len(), 2);
        assert!((deltas[0] - 20.5).abs() < 1e-12);
        assert!((deltas[1] - 20.0).abs() < 1e-12);
    }
}
