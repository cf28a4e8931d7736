//! NumPy `.npy` (format 1.0) output for the stacked spectrogram.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::ChopError;
use crate::spectrogram::Spectrogram;

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";
const NPY_VERSION: [u8; 2] = [1, 0];
const NPY_ALIGN: usize = 64;
// magic + version + u16 header length
const NPY_PREAMBLE: usize = 10;

fn header_block(nframes: usize, lframes: usize) -> Result<Vec<u8>, ChopError> {
    let mut dict = format!(
        "{{'descr': '<f8', 'fortran_order': False, 'shape': ({nframes}, {lframes}), }}"
    );
    let unpadded = NPY_PREAMBLE + dict.len() + 1;
    let padding = (NPY_ALIGN - unpadded % NPY_ALIGN) % NPY_ALIGN;
    dict.extend(std::iter::repeat(' ').take(padding));
    dict.push('\n');
    let header_len = u16::try_from(dict.len())
        .map_err(|_| ChopError::InvalidConfig("npy header too long".into()))?;

    let mut out = Vec::with_capacity(NPY_PREAMBLE + dict.len());
    out.extend_from_slice(NPY_MAGIC);
    out.extend_from_slice(&NPY_VERSION);
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    Ok(out)
}

/// Writes `spec` as a C-ordered little-endian float64 array of shape
/// `(nframes, lframes)`.
pub fn write_npy(path: &Path, spec: &Spectrogram) -> Result<(), ChopError> {
    let (nframes, lframes) = spec.shape();
    let header = header_block(nframes, lframes)?;
    let file = File::create(path).map_err(|e| ChopError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    let mut write = || -> std::io::Result<()> {
        writer.write_all(&header)?;
        for value in spec.as_slice() {
            writer.write_all(&value.to_le_bytes())?;
        }
        writer.flush()
    };
    write().map_err(|e| ChopError::io(path, e))
}
