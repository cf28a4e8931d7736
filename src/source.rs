//! Seams to the capture decoders. The engine only sees these traits; the
//! file-backed implementations live in `capture`.

use std::path::{Path, PathBuf};

use num_complex::Complex;

use crate::error::ChopError;
use crate::timestamp::Timestamp;

pub type IqSample = Complex<f32>;

/// Result of a windowed read. Running past the end of a capture is an
/// expected condition and is reported in-band instead of as an error.
#[derive(Clone, Debug, PartialEq)]
pub enum ReadOutcome {
    Full(Vec<IqSample>),
    Partial { available: u64 },
}

pub trait IqCapture {
    fn id(&self) -> &Path;

    /// First and last raw sample timestamps, in seconds on the recorder clock.
    fn raw_time_span(&mut self) -> Result<(f64, f64), ChopError>;

    fn total_samples(&self) -> u64;

    /// Reads `count` samples starting at sample `offset`.
    fn read(&mut self, offset: u64, count: usize) -> Result<ReadOutcome, ChopError>;
}

pub trait IqSource {
    type Capture: IqCapture;

    fn open(&self, id: &Path) -> Result<Self::Capture, ChopError>;

    fn exists(&self, id: &Path) -> bool;
}

/// One digital channel of a scalar-channel capture.
#[derive(Clone, Debug, PartialEq)]
pub struct ScTrace {
    pub base: Timestamp,
    pub samples: Vec<f64>,
}

pub trait ScSource {
    fn channel(&self, id: &Path, channel: usize) -> Result<ScTrace, ChopError>;
}

/// Name of the capture recorded right after `id`: the zero-padded numeric
/// stem is incremented, width and suffix are kept
/// (`run/0000041.iq.tdms` -> `run/0000042.iq.tdms`).
pub fn next_sequential(id: &Path) -> Result<PathBuf, ChopError> {
    let name = id
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ChopError::NonSequentialName(id.to_path_buf()))?;
    let (stem, suffix) = match name.find('.') {
        Some(dot) => name.split_at(dot),
        None => (name, ""),
    };
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ChopError::NonSequentialName(id.to_path_buf()));
    }
    let number: u64 = stem
        .parse()
        .map_err(|_| ChopError::NonSequentialName(id.to_path_buf()))?;
    let next = number
        .checked_add(1)
        .ok_or_else(|| ChopError::NonSequentialName(id.to_path_buf()))?;
    let width = stem.len();
    Ok(id.with_file_name(format!("{next:0width$}{suffix}")))
}

#[cfg(test)]
pub mod mem {
    //! In-memory captures for exercising the index and the engine.

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::*;

    pub struct MemIqFile {
        pub span: (f64, f64),
        pub samples: Vec<IqSample>,
    }

    #[derive(Default)]
    pub struct MemIqSource {
        files: HashMap<PathBuf, Arc<MemIqFile>>,
        reads: Arc<Mutex<Vec<(PathBuf, u64, usize)>>>,
        pool_sizes: Arc<Mutex<Vec<usize>>>,
    }

    impl MemIqSource {
        pub fn insert(&mut self, id: impl Into<PathBuf>, span: (f64, f64), samples: Vec<IqSample>) {
            self.files
                .insert(id.into(), Arc::new(MemIqFile { span, samples }));
        }

        /// Every `(file, offset, count)` read issued so far, in order.
        pub fn reads(&self) -> Vec<(PathBuf, u64, usize)> {
            self.reads.lock().map(|r| r.clone()).unwrap_or_default()
        }

        /// Size of the rayon pool each read was issued from.
        pub fn pool_sizes(&self) -> Vec<usize> {
            self.pool_sizes.lock().map(|r| r.clone()).unwrap_or_default()
        }
    }

    pub struct MemCapture {
        id: PathBuf,
        file: Arc<MemIqFile>,
        reads: Arc<Mutex<Vec<(PathBuf, u64, usize)>>>,
        pool_sizes: Arc<Mutex<Vec<usize>>>,
    }

    impl IqCapture for MemCapture {
        fn id(&self) -> &Path {
            &self.id
        }

        fn raw_time_span(&mut self) -> Result<(f64, f64), ChopError> {
            Ok(self.file.span)
        }

        fn total_samples(&self) -> u64 {
            self.file.samples.len() as u64
        }

        fn read(&mut self, offset: u64, count: usize) -> Result<ReadOutcome, ChopError> {
            self.reads
                .lock()
                .unwrap()
                .push((self.id.clone(), offset, count));
            self.pool_sizes
                .lock()
                .unwrap()
                .push(rayon::current_num_threads());
            let total = self.total_samples();
            if offset + count as u64 > total {
                return Ok(ReadOutcome::Partial {
                    available: total.saturating_sub(offset),
                });
            }
            let start = offset as usize;
            Ok(ReadOutcome::Full(self.file.samples[start..start + count].to_vec()))
        }
    }

    impl IqSource for MemIqSource {
        type Capture = MemCapture;

        fn open(&self, id: &Path) -> Result<MemCapture, ChopError> {
            let file = self
                .files
                .get(id)
                .cloned()
                .ok_or_else(|| ChopError::decode(id, "no such capture"))?;
            Ok(MemCapture {
                id: id.to_path_buf(),
                file,
                reads: Arc::clone(&self.reads),
                pool_sizes: Arc::clone(&self.pool_sizes),
            })
        }

        fn exists(&self, id: &Path) -> bool {
            self.files.contains_key(id)
        }
    }

    #[derive(Default)]
    pub struct MemScSource {
        files: HashMap<PathBuf, (Timestamp, Vec<Vec<f64>>)>,
    }

    impl MemScSource {
        pub fn insert(&mut self, id: impl Into<PathBuf>, base: Timestamp, channels: Vec<Vec<f64>>) {
            self.files.insert(id.into(), (base, channels));
        }
    }

    impl ScSource for MemScSource {
        fn channel(&self, id: &Path, channel: usize) -> Result<ScTrace, ChopError> {
            let (base, channels) = self
                .files
                .get(id)
                .ok_or_else(|| ChopError::decode(id, "no such capture"))?;
            let samples = channels
                .get(channel)
                .cloned()
                .ok_or_else(|| ChopError::decode(id, format!("no channel {channel}")))?;
            Ok(ScTrace {
                base: *base,
                samples,
            })
        }
    }
}
