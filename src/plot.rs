use std::ops::Range;
use std::path::{Path, PathBuf};

use plotters::prelude::PathElement;
use plotters::prelude::*;

use crate::error::DynError;
use crate::spectrogram::{frequency_axis, Spectrogram};

const PLOT_FONT_SCALE: f64 = 1.2;

fn scaled_font_size(base: i32) -> i32 {
    ((base as f64) * PLOT_FONT_SCALE).round() as i32
}

fn scaled_area_size(base: i32) -> i32 {
    ((base as f64) * PLOT_FONT_SCALE).round() as i32
}

fn finite_bounds(values: &[f64]) -> Option<(f64, f64)> {
    let (lo, hi) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if lo > hi {
        return None;
    }
    if lo == hi {
        let pad = if lo == 0.0 { 1.0 } else { lo.abs() * 0.05 };
        return Some((lo - pad, hi + pad));
    }
    Some((lo, hi))
}

pub fn plot_series_f64_x(
    x_vals: &[f64],
    data: &[f64],
    filename: &Path,
    caption: &str,
    x_label: &str,
    y_label: &str,
    label: &str,
) -> Result<(), DynError> {
    if x_vals.len() != data.len() {
        return Err("X-value vector length does not match data length".into());
    }
    let (x_min, x_max) = finite_bounds(x_vals).ok_or("No finite x values to plot")?;
    let (min_val, max_val) = finite_bounds(data).ok_or("No finite data points to plot")?;

    let root = BitMapBackend::new(filename, (1280, 720)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(caption, ("sans-serif", scaled_font_size(24)).into_font())
        .margin(10)
        .x_label_area_size(scaled_area_size(40))
        .y_label_area_size(scaled_area_size(60))
        .build_cartesian_2d(x_min..x_max, min_val..max_val)?;

    chart
        .configure_mesh()
        .x_desc(x_label)
        .y_desc(y_label)
        .label_style(("sans-serif", scaled_font_size(20)).into_font())
        .axis_desc_style(("sans-serif", scaled_font_size(24)).into_font())
        .light_line_style(WHITE.mix(0.0))
        .draw()?;

    chart
        .draw_series(LineSeries::new(
            x_vals.iter().zip(data.iter()).map(|(x, y)| (*x, *y)),
            &BLUE,
        ))?
        .label(label)
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 10, y)], BLUE));

    chart
        .configure_series_labels()
        .border_style(BLACK)
        .background_style(WHITE.mix(0.8))
        .label_font(("sans-serif", scaled_font_size(20)).into_font())
        .draw()?;

    root.present()?;
    Ok(())
}

/// Time-averaged stacked power against frequency offset (kHz).
pub fn plot_stacked_spectrum(
    spec: &Spectrogram,
    fs: f64,
    kicks: usize,
    filename: &Path,
) -> Result<(), DynError> {
    let freqs_khz: Vec<f64> = frequency_axis(fs, spec.lframes())
        .into_iter()
        .map(|f| f / 1_000.0)
        .collect();
    let mean = spec.time_average();
    plot_series_f64_x(
        &freqs_khz,
        &mean,
        filename,
        "Time-averaged stacked spectrum",
        "Frequency offset (kHz)",
        "Stacked power (arb.)",
        &format!("{kicks} kicks, {} time bins", spec.nframes()),
    )
}

/// Cuts the spacing series into `n_subsets` consecutive chunks of equal
/// length and returns each chunk's index range with its mean. A remainder
/// shorter than one chunk is left out.
pub fn gap_subsets(deltas_s: &[f64], n_subsets: usize) -> Vec<(Range<usize>, f64)> {
    if n_subsets == 0 {
        return Vec::new();
    }
    let size = deltas_s.len() / n_subsets;
    if size == 0 {
        return Vec::new();
    }
    (0..n_subsets)
        .map(|i| {
            let range = i * size..(i + 1) * size;
            let mean = deltas_s[range.clone()].iter().sum::<f64>() / size as f64;
            (range, mean)
        })
        .collect()
}

/// `gaps.png` for a single subset, `gaps_1.png`, `gaps_2.png`, ... otherwise.
pub fn subset_path(filename: &Path, index: usize, n_subsets: usize) -> PathBuf {
    if n_subsets <= 1 {
        return filename.to_path_buf();
    }
    let stem = filename
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match filename.extension() {
        Some(ext) => format!("{stem}_{}.{}", index + 1, ext.to_string_lossy()),
        None => format!("{stem}_{}", index + 1),
    };
    filename.with_file_name(name)
}

/// Start-to-start spacing of consecutive IQ captures, one PNG per subset.
pub fn plot_file_gaps(
    deltas_s: &[f64],
    n_subsets: usize,
    filename: &Path,
) -> Result<Vec<PathBuf>, DynError> {
    let subsets = gap_subsets(deltas_s, n_subsets);
    if subsets.is_empty() {
        return Err(format!(
            "{} capture spacings cannot be split into {n_subsets} subsets",
            deltas_s.len()
        )
        .into());
    }
    let mut written = Vec::with_capacity(subsets.len());
    for (i, (range, mean)) in subsets.into_iter().enumerate() {
        let index: Vec<f64> = range.clone().map(|k| k as f64).collect();
        let path = subset_path(filename, i, n_subsets);
        plot_series_f64_x(
            &index,
            &deltas_s[range],
            &path,
            &format!("Subset {}, average delta {:.6} s", i + 1, mean),
            "Number of deltas",
            "Delta T (s)",
            "IQ capture start spacing",
        )?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_skip_non_finite_and_pad_flat_series() {
        assert_eq!(finite_bounds(&[2.0, f64::NAN, -1.0]), Some((-1.0, 2.0)));
        assert_eq!(finite_bounds(&[0.0, 0.0]), Some((-1.0, 1.0)));
        assert_eq!(finite_bounds(&[10.0]), Some((9.5, 10.5)));
        assert_eq!(finite_bounds(&[f64::INFINITY]), None);
        assert_eq!(finite_bounds(&[]), None);
    }

    #[test]
    fn subsets_are_equal_chunks_with_their_mean() {
        let deltas = [10.0, 12.0, 20.0, 22.0, 30.0, 32.0, 99.0];
        let subsets = gap_subsets(&deltas, 3);
        assert_eq!(subsets.len(), 3);
        assert_eq!(subsets[0].0, 0..2);
        assert_eq!(subsets[2].0, 4..6);
        assert!((subsets[0].1 - 11.0).abs() < 1e-12);
        assert!((subsets[1].1 - 21.0).abs() < 1e-12);
        assert!((subsets[2].1 - 31.0).abs() < 1e-12);
        assert!(gap_subsets(&deltas, 0).is_empty());
        assert!(gap_subsets(&deltas[..2], 3).is_empty());
    }

    #[test]
    fn subset_paths_are_numbered_only_when_split() {
        let base = Path::new("out/zz_gaps.png");
        assert_eq!(subset_path(base, 0, 1), PathBuf::from("out/zz_gaps.png"));
        assert_eq!(subset_path(base, 1, 3), PathBuf::from("out/zz_gaps_2.png"));
    }

    #[test]
    fn too_many_subsets_are_rejected_before_drawing() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("gaps.png");
        assert!(plot_file_gaps(&[1.0, 2.0], 5, &path).is_err());
        assert!(!path.exists());
    }
}
