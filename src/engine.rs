//! Kicker-triggered window extraction and spectrogram stacking.
//!
//! For every kick the engine locates the capture holding it, reads
//! `nframes * lframes` samples starting `skip` seconds later, and adds the
//! power spectrogram of that window into a single accumulator. A window that
//! runs past the end of its capture is completed from the next sequential
//! capture: the whole frames left in the first file are transformed, the
//! missing frames are read from the start of the continuation, and both
//! blocks are stacked along the time axis.

use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::ChopError;
use crate::ranges::{FileRange, FileRangeIndex};
use crate::source::{next_sequential, IqCapture, IqSource, ReadOutcome};
use crate::spectrogram::{PowerSpectrogram, Spectrogram};
use crate::timestamp::{seconds_to_nanos_truncated, Timestamp};

pub const DEFAULT_LFRAMES: usize = 1 << 21;
pub const DEFAULT_TIME_S: f64 = 1.0;
pub const DEFAULT_FS_HZ: f64 = 20_000_000.0;
pub const DEFAULT_SKIP_S: f64 = 10.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChopConfig {
    /// Frequency bins per time slice.
    pub lframes: usize,
    /// Seconds of data analysed per kick.
    pub time_s: f64,
    /// IQ sampling rate in Hz.
    pub fs: f64,
    /// Delay between a kick and the start of its window, in seconds.
    pub skip_s: f64,
}

impl Default for ChopConfig {
    fn default() -> Self {
        Self {
            lframes: DEFAULT_LFRAMES,
            time_s: DEFAULT_TIME_S,
            fs: DEFAULT_FS_HZ,
            skip_s: DEFAULT_SKIP_S,
        }
    }
}

impl ChopConfig {
    /// `floor(fs * time / lframes)`
    pub fn nframes(&self) -> usize {
        (self.fs * self.time_s / self.lframes as f64) as usize
    }

    pub fn validate(&self) -> Result<(), ChopError> {
        if self.lframes == 0 {
            return Err(ChopError::InvalidConfig("lframes must be at least 1".into()));
        }
        if !self.fs.is_finite() || self.fs <= 0.0 {
            return Err(ChopError::InvalidConfig(format!(
                "sampling rate must be positive, got {}",
                self.fs
            )));
        }
        if !self.time_s.is_finite() || self.time_s <= 0.0 {
            return Err(ChopError::InvalidConfig(format!(
                "analysis time must be positive, got {}",
                self.time_s
            )));
        }
        if !self.skip_s.is_finite() {
            return Err(ChopError::InvalidConfig("skip must be finite".into()));
        }
        if self.nframes() == 0 {
            return Err(ChopError::InvalidConfig(format!(
                "{} s at {} Hz is shorter than one frame of {} samples",
                self.time_s, self.fs, self.lframes
            )));
        }
        Ok(())
    }
}

pub struct ChopStack<'a, S> {
    source: &'a S,
    index: &'a FileRangeIndex,
    config: ChopConfig,
    nframes: usize,
    skip_ns: i64,
    power: PowerSpectrogram,
    workers: usize,
}

impl<'a, S: IqSource + Sync> ChopStack<'a, S> {
    pub fn new(
        source: &'a S,
        index: &'a FileRangeIndex,
        config: ChopConfig,
    ) -> Result<Self, ChopError> {
        config.validate()?;
        Ok(Self {
            source,
            index,
            config,
            nframes: config.nframes(),
            skip_ns: seconds_to_nanos_truncated(config.skip_s),
            power: PowerSpectrogram::new(config.lframes),
            workers: 1,
        })
    }

    /// Number of kicks transformed concurrently. Accumulation stays in kick
    /// order, so the result does not depend on this value.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nframes, self.config.lframes)
    }

    /// Sample index of the window start inside `range`'s capture:
    /// `round((event + skip - start) / 1 s * fs)`.
    pub fn window_offset(&self, event: Timestamp, range: &FileRange) -> i64 {
        let delta_ns = event.add_nanos(self.skip_ns).nanos_since(range.start);
        (delta_ns as f64 / 1e9 * self.config.fs).round() as i64
    }

    /// Sum of the power spectrograms of every kick's window, not normalised.
    /// All transforms run on a pool of `workers` threads, row FFTs included.
    pub fn run(&self, events: &[Timestamp]) -> Result<Spectrogram, ChopError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| ChopError::InvalidConfig(format!("cannot start worker pool: {e}")))?;
        pool.install(|| self.stack_events(events))
    }

    fn stack_events(&self, events: &[Timestamp]) -> Result<Spectrogram, ChopError> {
        let (nframes, lframes) = self.shape();
        let mut accumulated = Spectrogram::zeros(nframes, lframes);

        if self.workers <= 1 {
            for (done, &event) in events.iter().enumerate() {
                let block = self.event_spectrogram(event)?;
                accumulated.add_assign(&block)?;
                debug!(done = done + 1, total = events.len(), "stacked kick");
            }
            return Ok(accumulated);
        }

        let mut done = 0usize;
        for batch in events.chunks(self.workers) {
            let blocks: Vec<Result<Spectrogram, ChopError>> = batch
                .par_iter()
                .map(|&event| self.event_spectrogram(event))
                .collect();
            for block in blocks {
                accumulated.add_assign(&block?)?;
            }
            done += batch.len();
            debug!(done, total = events.len(), "stacked kick batch");
        }
        Ok(accumulated)
    }

    /// Spectrogram of the `(nframes, lframes)` window following one kick.
    pub fn event_spectrogram(&self, event: Timestamp) -> Result<Spectrogram, ChopError> {
        let range = self
            .index
            .lookup(event)
            .ok_or(ChopError::UnmatchedEvent { timestamp: event })?;
        info!(event = %event, file = %range.file_id.display(), "analysing kick");

        let offset = self.window_offset(event, range);
        if offset < 0 {
            return Err(ChopError::NegativeOffset {
                file: range.file_id.clone(),
                timestamp: event,
                samples: -offset,
            });
        }
        let offset = offset as u64;

        let mut capture = self.source.open(&range.file_id)?;
        match capture.read(offset, self.nframes * self.config.lframes)? {
            ReadOutcome::Full(samples) => self.power.compute(&samples, self.nframes),
            ReadOutcome::Partial { available } => {
                debug!(
                    file = %range.file_id.display(),
                    offset,
                    available,
                    "window overruns capture"
                );
                self.continue_into_next(capture, event, offset)
            }
        }
    }

    fn continue_into_next(
        &self,
        mut capture: S::Capture,
        event: Timestamp,
        offset: u64,
    ) -> Result<Spectrogram, ChopError> {
        let lframes = self.config.lframes;
        let total = capture.total_samples();
        let nframes_avail = (total.saturating_sub(offset) / lframes as u64) as usize;

        let first_part = if nframes_avail > 0 {
            match capture.read(offset, nframes_avail * lframes)? {
                ReadOutcome::Full(samples) => Some(self.power.compute(&samples, nframes_avail)?),
                ReadOutcome::Partial { available } => {
                    return Err(ChopError::decode(
                        capture.id(),
                        format!(
                            "reports {total} samples but only {available} are readable from {offset}"
                        ),
                    ))
                }
            }
        } else {
            None
        };

        let nframes_remaining = self.nframes - nframes_avail;
        if nframes_remaining == 0 {
            if let Some(first) = first_part {
                return Ok(first);
            }
        }

        // The window may start past the end of the located capture; the
        // excess becomes the read offset inside the continuation.
        let carry = offset.saturating_sub(total);
        let current = capture.id().to_path_buf();
        drop(capture);

        let next_id = next_sequential(&current)?;
        if !self.source.exists(&next_id) {
            return Err(ChopError::MissingContinuation {
                previous: current,
                file: next_id,
            });
        }
        let mut next = self.source.open(&next_id)?;
        let next_total = next.total_samples();
        if carry > 0 && carry >= next_total {
            return Err(ChopError::WindowOutOfReach {
                file: next_id,
                timestamp: event,
            });
        }

        let needed = nframes_remaining * lframes;
        let second_part = match next.read(carry, needed)? {
            ReadOutcome::Full(samples) => self.power.compute(&samples, nframes_remaining)?,
            ReadOutcome::Partial { available } => {
                return Err(ChopError::ShortContinuation {
                    file: next_id,
                    timestamp: event,
                    offset: carry,
                    needed: needed as u64,
                    available,
                })
            }
        };
        debug!(
            file = %next_id.display(),
            first_frames = nframes_avail,
            second_frames = nframes_remaining,
            "window completed from continuation"
        );

        match first_part {
            Some(first) => first.vstack(second_part),
            None => Ok(second_part),
        }
    }
}
