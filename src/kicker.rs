use std::path::PathBuf;

use tracing::{debug, warn};

use crate::error::ChopError;
use crate::source::{ScSource, ScTrace};
use crate::timestamp::{seconds_to_nanos_truncated, Timestamp, NANOS_PER_SECOND};

pub const DEFAULT_KICKER_CHANNEL: usize = 4;
pub const DEFAULT_KICKER_FS_HZ: f64 = 999.99;
/// Two hours minus the measured 10.927123049 s skew of the SC recorder clock.
pub const DEFAULT_KICKER_OFFSET_NS: i64 = 2 * 3600 * NANOS_PER_SECOND - 10_927_123_049;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KickerConfig {
    pub channel: usize,
    pub fs: f64,
    pub clock_offset_ns: i64,
}

impl Default for KickerConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_KICKER_CHANNEL,
            fs: DEFAULT_KICKER_FS_HZ,
            clock_offset_ns: DEFAULT_KICKER_OFFSET_NS,
        }
    }
}

/// Indices `i` where `trace[i + 1] - trace[i] == 1`.
pub fn rising_edges(trace: &[f64]) -> Vec<usize> {
    trace
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| pair[1] - pair[0] == 1.0)
        .map(|(idx, _)| idx)
        .collect()
}

/// Absolute times of the rising edges in one trace, before clock correction.
/// Edge `i` maps to `base + trunc((i + 1) / fs * 1e9)` ns.
pub fn edge_times(trace: &ScTrace, fs: f64) -> Vec<Timestamp> {
    rising_edges(&trace.samples)
        .into_iter()
        .map(|idx| {
            trace
                .base
                .add_nanos(seconds_to_nanos_truncated((idx + 1) as f64 / fs))
        })
        .collect()
}

/// Corrected kick times of all SC captures, concatenated in file order.
pub fn kick_times<S: ScSource>(
    source: &S,
    files: &[PathBuf],
    config: &KickerConfig,
) -> Result<Vec<Timestamp>, ChopError> {
    if !(config.fs > 0.0) {
        return Err(ChopError::InvalidConfig(format!(
            "SC sampling rate must be positive, got {}",
            config.fs
        )));
    }
    let mut kicks = Vec::new();
    for file in files {
        let trace = source.channel(file, config.channel)?;
        if trace.samples.is_empty() {
            warn!(file = %file.display(), channel = config.channel, "empty kicker channel");
        }
        let before = kicks.len();
        kicks.extend(
            edge_times(&trace, config.fs)
                .into_iter()
                .map(|t| t.add_nanos(config.clock_offset_ns)),
        );
        debug!(file = %file.display(), kicks = kicks.len() - before, "extracted kicker edges");
    }
    Ok(kicks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::mem::MemScSource;

    #[test]
    fn rising_edges_only_counts_zero_to_one() {
        let trace = [0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0, 0.0, 2.0, 3.0];
        assert_eq!(rising_edges(&trace), vec![1, 4, 8]);
    }

    #[test]
    fn flat_or_short_traces_have_no_edges() {
        assert!(rising_edges(&[]).is_empty());
        assert!(rising_edges(&[1.0]).is_empty());
        assert!(rising_edges(&[0.0, 0.0, 0.0]).is_empty());
        assert!(rising_edges(&[1.0, 1.0, 0.0]).is_empty());
    }

    #[test]
    fn edge_times_use_the_sample_after_the_jump() {
        let trace = ScTrace {
            base: Timestamp::from_nanos(1_000),
            samples: vec![0.0, 1.0, 0.0, 0.0, 1.0],
        };
        let times = edge_times(&trace, 1000.0);
        assert_eq!(
            times,
            vec![
                Timestamp::from_nanos(1_000 + 1_000_000),
                Timestamp::from_nanos(1_000 + 4_000_000),
            ]
        );
    }

    #[test]
    fn edge_offsets_truncate_to_nanoseconds() {
        let trace = ScTrace {
            base: Timestamp::from_nanos(0),
            samples: vec![0.0, 0.0, 1.0],
        };
        // (1 + 1) / 999.99 s = 2000020.0002... ns
        let times = edge_times(&trace, 999.99);
        assert_eq!(times, vec![Timestamp::from_nanos(2_000_020)]);
    }

    #[test]
    fn kick_times_concatenate_files_and_apply_offset() {
        let mut source = MemScSource::default();
        let base_a = Timestamp::from_nanos(10 * NANOS_PER_SECOND);
        let base_b = Timestamp::from_nanos(20 * NANOS_PER_SECOND);
        let mut channels_a = vec![vec![0.0; 4]; 5];
        channels_a[4] = vec![0.0, 1.0, 0.0, 1.0];
        let mut channels_b = vec![vec![0.0; 3]; 5];
        channels_b[4] = vec![0.0, 0.0, 1.0];
        source.insert("sc_a", base_a, channels_a);
        source.insert("sc_b", base_b, channels_b);

        let config = KickerConfig {
            channel: 4,
            fs: 1000.0,
            clock_offset_ns: -5,
        };
        let files = vec![PathBuf::from("sc_a"), PathBuf::from("sc_b")];
        let kicks = kick_times(&source, &files, &config).unwrap();
        assert_eq!(
            kicks,
            vec![
                base_a.add_nanos(1_000_000 - 5),
                base_a.add_nanos(3_000_000 - 5),
                base_b.add_nanos(2_000_000 - 5),
            ]
        );
    }

    #[test]
    fn capture_without_edges_contributes_nothing() {
        let mut source = MemScSource::default();
        source.insert("quiet", Timestamp::from_nanos(0), vec![vec![0.0; 16]; 5]);
        let kicks = kick_times(&source, &[PathBuf::from("quiet")], &KickerConfig::default()).unwrap();
        assert!(kicks.is_empty());
    }

    #[test]
    fn missing_channel_is_a_decode_failure() {
        let mut source = MemScSource::default();
        source.insert("narrow", Timestamp::from_nanos(0), vec![vec![0.0; 4]; 2]);
        let err = kick_times(&source, &[PathBuf::from("narrow")], &KickerConfig::default())
            .unwrap_err();
        assert!(matches!(err, ChopError::Decode { .. }));
    }

    #[test]
    fn default_offset_matches_two_hours_minus_skew() {
        assert_eq!(DEFAULT_KICKER_OFFSET_NS, 7_189_072_876_951);
    }
}
