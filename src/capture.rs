//! File-backed capture decoders and capture listing.
//!
//! IQ container: 40-byte little-endian header followed by interleaved f32
//! I/Q pairs.
//!   [0..8)   magic `KSIQRAW1`
//!   [8..12)  format version (u32)
//!   [16..24) first raw sample timestamp, seconds (f64)
//!   [24..32) last raw sample timestamp, seconds (f64)
//!   [32..40) sample count (u64)
//!
//! SC container: 32-byte header followed by channel-major u8 traces.
//!   [0..8)   magic `KSSCRAW1`
//!   [8..12)  format version (u32)
//!   [12..14) channel count (u16)
//!   [16..24) base timestamp, ns since Unix epoch (i64)
//!   [24..32) samples per channel (u64)

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
#[cfg(target_os = "linux")]
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use num_complex::Complex;
use tracing::debug;

use crate::error::ChopError;
use crate::source::{IqCapture, IqSample, IqSource, ReadOutcome, ScSource, ScTrace};
use crate::timestamp::Timestamp;

const IQ_MAGIC: &[u8; 8] = b"KSIQRAW1";
const SC_MAGIC: &[u8; 8] = b"KSSCRAW1";
const FORMAT_VERSION: u32 = 1;
const IQ_HEADER_SIZE: usize = 40;
const SC_HEADER_SIZE: usize = 32;
const IQ_SAMPLE_BYTES: u64 = 8;

pub const DEFAULT_IQ_LIST: &str = "iq_list.txt";
pub const DEFAULT_SC_LIST: &str = "sc_files.txt";
pub const DEFAULT_IQ_SUFFIX: &str = ".iq.tdms";
pub const DEFAULT_SC_SUFFIX: &str = ".sc";

fn read_u16_le(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn read_u32_le(buf: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn read_u64_le(buf: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

fn read_i64_le(buf: &[u8], offset: usize) -> i64 {
    read_u64_le(buf, offset) as i64
}

fn read_f64_le(buf: &[u8], offset: usize) -> f64 {
    f64::from_bits(read_u64_le(buf, offset))
}

#[cfg(target_os = "linux")]
fn drop_file_cache_range(file: &File, offset: u64, len: u64) {
    let Ok(offset_i64) = i64::try_from(offset) else {
        return;
    };
    let Ok(len_i64) = i64::try_from(len) else {
        return;
    };
    let fd = file.as_raw_fd();
    unsafe {
        let _ = libc::posix_fadvise(
            fd,
            offset_i64 as libc::off_t,
            len_i64 as libc::off_t,
            libc::POSIX_FADV_DONTNEED,
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn drop_file_cache_range(_file: &File, _offset: u64, _len: u64) {}

fn open_with_header(
    path: &Path,
    header: &mut [u8],
    magic: &[u8; 8],
) -> Result<(BufReader<File>, u64), ChopError> {
    let file = File::open(path).map_err(|e| ChopError::io(path, e))?;
    let file_len = file.metadata().map_err(|e| ChopError::io(path, e))?.len();
    let mut reader = BufReader::new(file);
    reader
        .read_exact(header)
        .map_err(|_| ChopError::decode(path, "file shorter than its header"))?;
    if &header[0..8] != magic {
        return Err(ChopError::decode(path, "unrecognised capture magic"));
    }
    let version = read_u32_le(header, 8);
    if version != FORMAT_VERSION {
        return Err(ChopError::decode(path, format!("unsupported format version {version}")));
    }
    Ok((reader, file_len))
}

/// Stateless opener for IQ containers on disk.
#[derive(Clone, Copy, Debug, Default)]
pub struct IqFileSource;

impl IqSource for IqFileSource {
    type Capture = IqFile;

    fn open(&self, id: &Path) -> Result<IqFile, ChopError> {
        IqFile::open(id)
    }

    fn exists(&self, id: &Path) -> bool {
        id.is_file()
    }
}

pub struct IqFile {
    path: PathBuf,
    reader: BufReader<File>,
    first_s: f64,
    last_s: f64,
    nsamples: u64,
}

impl IqFile {
    pub fn open(path: &Path) -> Result<Self, ChopError> {
        let mut header = [0u8; IQ_HEADER_SIZE];
        let (reader, file_len) = open_with_header(path, &mut header, IQ_MAGIC)?;
        let first_s = read_f64_le(&header, 16);
        let last_s = read_f64_le(&header, 24);
        let nsamples = read_u64_le(&header, 32);
        let payload = nsamples
            .checked_mul(IQ_SAMPLE_BYTES)
            .and_then(|b| b.checked_add(IQ_HEADER_SIZE as u64))
            .ok_or_else(|| ChopError::decode(path, "sample count overflows"))?;
        if file_len < payload {
            return Err(ChopError::decode(
                path,
                format!("header declares {nsamples} samples but file holds {file_len} bytes"),
            ));
        }
        if !first_s.is_finite() || !last_s.is_finite() {
            return Err(ChopError::decode(path, "non-finite sample timestamps"));
        }
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            first_s,
            last_s,
            nsamples,
        })
    }
}

impl IqCapture for IqFile {
    fn id(&self) -> &Path {
        &self.path
    }

    fn raw_time_span(&mut self) -> Result<(f64, f64), ChopError> {
        Ok((self.first_s, self.last_s))
    }

    fn total_samples(&self) -> u64 {
        self.nsamples
    }

    fn read(&mut self, offset: u64, count: usize) -> Result<ReadOutcome, ChopError> {
        let end = offset.saturating_add(count as u64);
        if end > self.nsamples {
            return Ok(ReadOutcome::Partial {
                available: self.nsamples.saturating_sub(offset),
            });
        }
        let byte_offset = IQ_HEADER_SIZE as u64 + offset * IQ_SAMPLE_BYTES;
        let byte_len = count as u64 * IQ_SAMPLE_BYTES;
        self.reader
            .seek(SeekFrom::Start(byte_offset))
            .map_err(|e| ChopError::io(&self.path, e))?;
        let mut raw = vec![0u8; byte_len as usize];
        self.reader
            .read_exact(&mut raw)
            .map_err(|e| ChopError::io(&self.path, e))?;
        drop_file_cache_range(self.reader.get_ref(), byte_offset, byte_len);

        let samples: Vec<IqSample> = raw
            .chunks_exact(IQ_SAMPLE_BYTES as usize)
            .map(|pair| {
                let re = f32::from_le_bytes([pair[0], pair[1], pair[2], pair[3]]);
                let im = f32::from_le_bytes([pair[4], pair[5], pair[6], pair[7]]);
                Complex::new(re, im)
            })
            .collect();
        debug!(file = %self.path.display(), offset, count, "read IQ window");
        Ok(ReadOutcome::Full(samples))
    }
}

/// Stateless reader for SC containers on disk.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScFileSource;

impl ScSource for ScFileSource {
    fn channel(&self, id: &Path, channel: usize) -> Result<ScTrace, ChopError> {
        let mut header = [0u8; SC_HEADER_SIZE];
        let (mut reader, file_len) = open_with_header(id, &mut header, SC_MAGIC)?;
        let channels = read_u16_le(&header, 12) as usize;
        let base = Timestamp::from_nanos(read_i64_le(&header, 16));
        let per_channel = read_u64_le(&header, 24);
        if channel >= channels {
            return Err(ChopError::decode(
                id,
                format!("channel {channel} requested, capture has {channels}"),
            ));
        }
        let needed = (channels as u64)
            .checked_mul(per_channel)
            .and_then(|b| b.checked_add(SC_HEADER_SIZE as u64))
            .ok_or_else(|| ChopError::decode(id, "channel size overflows"))?;
        if file_len < needed {
            return Err(ChopError::decode(id, "truncated channel data"));
        }
        reader
            .seek(SeekFrom::Start(SC_HEADER_SIZE as u64 + channel as u64 * per_channel))
            .map_err(|e| ChopError::io(id, e))?;
        let mut raw = vec![0u8; per_channel as usize];
        reader.read_exact(&mut raw).map_err(|e| ChopError::io(id, e))?;
        Ok(ScTrace {
            base,
            samples: raw.into_iter().map(f64::from).collect(),
        })
    }
}

/// Captures of one acquisition session, in acquisition order.
///
/// `dir/list_name` (one name per line, Latin-1) is authoritative when
/// present; otherwise the directory entries ending in `suffix` are taken in
/// lexicographic order.
pub fn list_captures(
    dir: &Path,
    list_name: &str,
    suffix: &str,
) -> Result<Vec<PathBuf>, ChopError> {
    let list_path = dir.join(list_name);
    let captures: Vec<PathBuf> = if list_path.is_file() {
        let bytes = std::fs::read(&list_path).map_err(|e| ChopError::io(&list_path, e))?;
        let text: String = bytes.iter().map(|&b| b as char).collect();
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| dir.join(line))
            .collect()
    } else {
        let entries = std::fs::read_dir(dir).map_err(|e| ChopError::io(dir, e))?;
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ChopError::io(dir, e))?;
            let path = entry.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(suffix))
                .unwrap_or(false);
            if matches && path.is_file() {
                found.push(path);
            }
        }
        found.sort();
        found
    };
    if captures.is_empty() {
        return Err(ChopError::InvalidConfig(format!(
            "no captures found in {} (list {list_name}, suffix {suffix})",
            dir.display()
        )));
    }
    debug!(dir = %dir.display(), count = captures.len(), "listed captures");
    Ok(captures)
}


#[cfg(test)]
mod tests {
    use super::fixtures::{write_iq_file, write_sc_file};
    use super::*;
    use tempfile::TempDir;

    fn ramp(len: usize) -> Vec<IqSample> {
        (0..len).map(|i| Complex::new(i as f32, -(i as f32) * 0.5)).collect()
    }

    #[test]
    fn iq_file_reports_header_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("0000001.iq.tdms");
        write_iq_file(&path, 12.5, 22.25, &ramp(64)).unwrap();

        let mut capture = IqFileSource.open(&path).unwrap();
        assert_eq!(capture.id(), path.as_path());
        assert_eq!(capture.total_samples(), 64);
        assert_eq!(capture.raw_time_span().unwrap(), (12.5, 22.25));
    }

    #[test]
    fn iq_window_reads_and_overruns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("0000001.iq.tdms");
        let data = ramp(64);
        write_iq_file(&path, 0.0, 1.0, &data).unwrap();
        let mut capture = IqFile::open(&path).unwrap();

        assert_eq!(capture.read(10, 20).unwrap(), ReadOutcome::Full(data[10..30].to_vec()));
        assert_eq!(capture.read(44, 20).unwrap(), ReadOutcome::Full(data[44..].to_vec()));
        assert_eq!(capture.read(50, 20).unwrap(), ReadOutcome::Partial { available: 14 });
        assert_eq!(capture.read(70, 1).unwrap(), ReadOutcome::Partial { available: 0 });
        // Seeking backwards after a read still works.
        assert_eq!(capture.read(0, 2).unwrap(), ReadOutcome::Full(data[..2].to_vec()));
    }

    #[test]
    fn truncated_or_foreign_files_fail_to_decode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("0000001.iq.tdms");
        write_iq_file(&path, 0.0, 1.0, &ramp(8)).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();
        assert!(matches!(IqFile::open(&path), Err(ChopError::Decode { .. })));

        std::fs::write(&path, b"not a capture at all, definitely not one").unwrap();
        assert!(matches!(IqFile::open(&path), Err(ChopError::Decode { .. })));

        let missing = dir.path().join("0000002.iq.tdms");
        assert!(!IqFileSource.exists(&missing));
        assert!(matches!(IqFile::open(&missing), Err(ChopError::Io { .. })));
    }

    #[test]
    fn sc_file_round_trips_channels() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.sc");
        let base = Timestamp::from_nanos(1_625_095_665_000_000_000);
        let channels = vec![vec![0u8, 0, 0, 0], vec![0, 1, 1, 0]];
        write_sc_file(&path, base, &channels).unwrap();

        let trace = ScFileSource.channel(&path, 1).unwrap();
        assert_eq!(trace.base, base);
        assert_eq!(trace.samples, vec![0.0, 1.0, 1.0, 0.0]);
        assert!(matches!(
            ScFileSource.channel(&path, 2),
            Err(ChopError::Decode { .. })
        ));
        assert!(write_sc_file(&path, base, &[vec![0], vec![0, 1]]).is_err());
    }

    #[test]
    fn list_file_sets_order_and_skips_blank_lines() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(DEFAULT_IQ_LIST),
            "0000002.iq.tdms\n0000001.iq.tdms\n\n",
        )
        .unwrap();
        let files = list_captures(dir.path(), DEFAULT_IQ_LIST, DEFAULT_IQ_SUFFIX).unwrap();
        assert_eq!(
            files,
            vec![
                dir.path().join("0000002.iq.tdms"),
                dir.path().join("0000001.iq.tdms"),
            ]
        );
    }

    #[test]
    fn directory_scan_is_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        for name in ["0000003.iq.tdms", "0000001.iq.tdms", "notes.txt", "0000002.iq.tdms"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let files = list_captures(dir.path(), DEFAULT_IQ_LIST, DEFAULT_IQ_SUFFIX).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["0000001.iq.tdms", "0000002.iq.tdms", "0000003.iq.tdms"]);

        let empty = TempDir::new().unwrap();
        assert!(list_captures(empty.path(), DEFAULT_SC_LIST, DEFAULT_SC_SUFFIX).is_err());
    }
}
