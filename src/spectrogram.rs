use std::sync::Arc;

use num_complex::Complex;
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};

use crate::error::ChopError;
use crate::source::IqSample;

/// Row-major `[time_bin][frequency_bin]` power array.
#[derive(Clone, Debug, PartialEq)]
pub struct Spectrogram {
    nframes: usize,
    lframes: usize,
    data: Vec<f64>,
}

impl Spectrogram {
    pub fn zeros(nframes: usize, lframes: usize) -> Self {
        Self {
            nframes,
            lframes,
            data: vec![0.0; nframes * lframes],
        }
    }

    pub fn from_rows(nframes: usize, lframes: usize, data: Vec<f64>) -> Result<Self, ChopError> {
        if data.len() != nframes * lframes {
            return Err(ChopError::InvalidConfig(format!(
                "{} values cannot form a {nframes}x{lframes} spectrogram",
                data.len()
            )));
        }
        Ok(Self {
            nframes,
            lframes,
            data,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nframes, self.lframes)
    }

    pub fn nframes(&self) -> usize {
        self.nframes
    }

    pub fn lframes(&self) -> usize {
        self.lframes
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn row(&self, frame: usize) -> &[f64] {
        &self.data[frame * self.lframes..(frame + 1) * self.lframes]
    }

    pub fn add_assign(&mut self, other: &Spectrogram) -> Result<(), ChopError> {
        if self.shape() != other.shape() {
            return Err(ChopError::ShapeMismatch {
                left: self.shape(),
                right: other.shape(),
            });
        }
        for (acc, value) in self.data.iter_mut().zip(other.data.iter()) {
            *acc += *value;
        }
        Ok(())
    }

    /// Appends `lower`'s time bins below this block's.
    pub fn vstack(mut self, lower: Spectrogram) -> Result<Spectrogram, ChopError> {
        if self.lframes != lower.lframes {
            return Err(ChopError::ShapeMismatch {
                left: self.shape(),
                right: lower.shape(),
            });
        }
        self.data.extend_from_slice(&lower.data);
        self.nframes += lower.nframes;
        Ok(self)
    }

    /// Mean power per frequency bin over all time bins.
    pub fn time_average(&self) -> Vec<f64> {
        let mut mean = vec![0.0; self.lframes];
        if self.nframes == 0 {
            return mean;
        }
        for frame in 0..self.nframes {
            for (acc, value) in mean.iter_mut().zip(self.row(frame)) {
                *acc += *value;
            }
        }
        let scale = 1.0 / self.nframes as f64;
        mean.iter_mut().for_each(|v| *v *= scale);
        mean
    }
}

/// Power spectrogram with a fixed slice length: each row of `lframes`
/// samples is transformed, fft-shifted so zero frequency sits in the middle,
/// and stored as `|X|^2`.
pub struct PowerSpectrogram {
    lframes: usize,
    fft: Arc<dyn Fft<f64>>,
}

impl PowerSpectrogram {
    pub fn new(lframes: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(lframes);
        Self { lframes, fft }
    }

    pub fn compute(&self, samples: &[IqSample], nframes: usize) -> Result<Spectrogram, ChopError> {
        let lframes = self.lframes;
        let needed = nframes * lframes;
        if samples.len() < needed {
            return Err(ChopError::InvalidConfig(format!(
                "spectrogram of {nframes}x{lframes} needs {needed} samples, got {}",
                samples.len()
            )));
        }
        let mut data = vec![0.0f64; needed];
        if needed == 0 {
            return Spectrogram::from_rows(nframes, lframes, data);
        }
        let fft = &self.fft;
        data.par_chunks_mut(lframes)
            .zip(samples[..needed].par_chunks(lframes))
            .for_each(|(out, frame)| {
                let mut buffer: Vec<Complex<f64>> = frame
                    .iter()
                    .map(|s| Complex::new(s.re as f64, s.im as f64))
                    .collect();
                fft.process(&mut buffer);
                buffer.rotate_right(lframes / 2);
                for (power, value) in out.iter_mut().zip(buffer.iter()) {
                    *power = value.norm_sqr();
                }
            });
        Spectrogram::from_rows(nframes, lframes, data)
    }
}

/// Frequency offset (Hz) of each shifted bin: `fftshift(fftfreq(lframes, 1/fs))`.
pub fn frequency_axis(fs: f64, lframes: usize) -> Vec<f64> {
    let step = fs / lframes as f64;
    let half = (lframes / 2) as f64;
    (0..lframes).map(|i| (i as f64 - half) * step).collect()
}
