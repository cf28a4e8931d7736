use std::collections::HashSet;
use std::path::PathBuf;

use tracing::debug;

use crate::error::ChopError;
use crate::source::{IqCapture, IqSource};
use crate::timestamp::{deltas_seconds, seconds_to_nanos_truncated, Timestamp};

pub const DEFAULT_REFERENCE: &str = "2021-06-30T23:27:34";
pub const DEFAULT_CORRECTION_NS: i64 = 1_280_157_120;
/// `trunc(0.013107200007652864 s)`, one analyser record of slack past a capture's end.
pub const DEFAULT_TOLERANCE_NS: i64 = 13_107_200;

/// Maps the recorder's raw sample clock onto absolute time:
/// `absolute = (reference - correction) + trunc(raw_seconds * 1e9) ns`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecorderClock {
    pub reference: Timestamp,
    pub correction_ns: i64,
}

impl RecorderClock {
    pub fn origin(&self) -> Timestamp {
        self.reference.add_nanos(-self.correction_ns)
    }

    pub fn absolute(&self, raw_seconds: f64) -> Timestamp {
        self.origin().add_nanos(seconds_to_nanos_truncated(raw_seconds))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRange {
    pub file_id: PathBuf,
    pub start: Timestamp,
    pub end: Timestamp,
}

/// Capture time ranges in acquisition order. Lookups scan in insertion
/// order and the first containing range wins, so overlapping neighbours
/// resolve to the earlier capture.
#[derive(Clone, Debug)]
pub struct FileRangeIndex {
    ranges: Vec<FileRange>,
    tolerance_ns: i64,
}

impl FileRangeIndex {
    pub fn from_ranges(ranges: Vec<FileRange>, tolerance_ns: i64) -> Result<Self, ChopError> {
        let mut seen = HashSet::with_capacity(ranges.len());
        for range in &ranges {
            if !seen.insert(range.file_id.as_path()) {
                return Err(ChopError::DuplicateFile(range.file_id.clone()));
            }
        }
        Ok(Self {
            ranges,
            tolerance_ns,
        })
    }

    /// Reads the first/last sample time of every capture. Any capture that
    /// fails to decode aborts the whole build.
    pub fn build<S: IqSource>(
        source: &S,
        file_ids: &[PathBuf],
        clock: &RecorderClock,
        tolerance_ns: i64,
    ) -> Result<Self, ChopError> {
        let mut ranges = Vec::with_capacity(file_ids.len());
        for id in file_ids {
            let mut capture = source.open(id)?;
            let (first, last) = capture.raw_time_span()?;
            let range = FileRange {
                file_id: id.clone(),
                start: clock.absolute(first),
                end: clock.absolute(last),
            };
            debug!(file = %id.display(), start = %range.start, end = %range.end, "indexed capture");
            ranges.push(range);
        }
        Self::from_ranges(ranges, tolerance_ns)
    }

    /// First range (in insertion order) with `start <= t <= end + tolerance`.
    pub fn lookup(&self, t: Timestamp) -> Option<&FileRange> {
        self.ranges
            .iter()
            .find(|r| r.start <= t && t <= r.end.add_nanos(self.tolerance_ns))
    }

    pub fn ranges(&self) -> &[FileRange] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Start-to-start spacing of consecutive captures, in seconds.
    pub fn start_deltas(&self) -> Vec<f64> {
        let starts: Vec<Timestamp> = self.ranges.iter().map(|r| r.start).collect();
        deltas_seconds(&starts)
    }
}
