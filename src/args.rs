use clap::Parser;
use std::path::PathBuf;

use crate::capture::{DEFAULT_IQ_LIST, DEFAULT_IQ_SUFFIX, DEFAULT_SC_LIST, DEFAULT_SC_SUFFIX};
use crate::engine::{ChopConfig, DEFAULT_FS_HZ, DEFAULT_LFRAMES, DEFAULT_SKIP_S, DEFAULT_TIME_S};
use crate::error::DynError;
use crate::kicker::{KickerConfig, DEFAULT_KICKER_CHANNEL, DEFAULT_KICKER_FS_HZ, DEFAULT_KICKER_OFFSET_NS};
use crate::ranges::{RecorderClock, DEFAULT_CORRECTION_NS, DEFAULT_REFERENCE, DEFAULT_TOLERANCE_NS};
use crate::runfile::RunFile;
use crate::timestamp::Timestamp;

pub const DEFAULT_OUTPUT: &str = "zz_cutted_and_stacked.npy";

#[derive(Parser, Debug, Clone, Default)]
#[command(
    author,
    version,
    about = "Kicker-triggered IQ window extraction and spectrogram stacking",
    long_about = None,
    arg_required_else_help = true,
    after_help = "Examples:\n  kickstack --iq-dir session/iq --sc-dir session/sc\n  kickstack --iq-dir session/iq --sc-dir session/sc --binning 1048576 --time 0.5 --skip 9.8 --cpu 4 --plot\n  kickstack --runfile session.run --output stacked.npy --gaps\n"
)]
pub struct Args {
    /// Directory holding the IQ captures
    #[arg(long)]
    pub iq_dir: Option<PathBuf>,

    /// Directory holding the slow-control (kicker) captures
    #[arg(long)]
    pub sc_dir: Option<PathBuf>,

    /// Capture list file inside --iq-dir [default: iq_list.txt]
    #[arg(long)]
    pub iq_list: Option<String>,

    /// Capture list file inside --sc-dir [default: sc_files.txt]
    #[arg(long)]
    pub sc_list: Option<String>,

    /// File-name suffix used when the IQ list file is absent [default: .iq.tdms]
    #[arg(long)]
    pub iq_suffix: Option<String>,

    /// File-name suffix used when the SC list file is absent [default: .sc]
    #[arg(long)]
    pub sc_suffix: Option<String>,

    /// Key=value run description; command-line flags take precedence
    #[arg(long)]
    pub runfile: Option<PathBuf>,

    /// Frequency bins per time slice [default: 2097152]
    #[arg(long = "binning", visible_alias = "lframes")]
    pub lframes: Option<usize>,

    /// Seconds of data analysed after each kick [default: 1.0]
    #[arg(long)]
    pub time: Option<f64>,

    /// Delay between a kick and its window, in seconds [default: 10.0]
    #[arg(long, allow_hyphen_values = true)]
    pub skip: Option<f64>,

    /// IQ sampling rate in Hz [default: 20000000]
    #[arg(long = "sampling", visible_alias = "fs")]
    pub fs: Option<f64>,

    /// Slow-control channel carrying the kicker trace [default: 4]
    #[arg(long)]
    pub sc_channel: Option<usize>,

    /// Slow-control sampling rate in Hz [default: 999.99]
    #[arg(long)]
    pub sc_fs: Option<f64>,

    /// Reference epoch of the IQ recorder clock (ISO 8601, UTC) [default: 2021-06-30T23:27:34]
    #[arg(long)]
    pub reference: Option<String>,

    /// Correction subtracted from the IQ reference epoch, in ns [default: 1280157120]
    #[arg(long, allow_hyphen_values = true)]
    pub correction_ns: Option<i64>,

    /// Correction added to every kicker edge time, in ns [default: 7189072876951]
    #[arg(long, allow_hyphen_values = true)]
    pub kicker_offset_ns: Option<i64>,

    /// Slack past a capture's last sample still attributed to it, in ns [default: 13107200]
    #[arg(long)]
    pub tolerance_ns: Option<i64>,

    /// Output .npy file for the stacked spectrogram [default: zz_cutted_and_stacked.npy]
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Also write PNG plots next to the output file
    #[arg(long)]
    pub plot: bool,

    /// Report the start-to-start spacing of the IQ captures
    #[arg(long)]
    pub gaps: bool,

    /// Consecutive subsets the spacing report is split into [default: 1]
    #[arg(long)]
    pub gap_subsets: Option<usize>,

    /// Number of kicks transformed in parallel [default: 1]
    #[arg(long)]
    pub cpu: Option<usize>,

    /// Enable debug logging (overrides RUST_LOG)
    #[arg(long)]
    pub debug: bool,
}

/// Fully resolved run parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub iq_dir: PathBuf,
    pub sc_dir: PathBuf,
    pub iq_list: String,
    pub sc_list: String,
    pub iq_suffix: String,
    pub sc_suffix: String,
    pub chop: ChopConfig,
    pub kicker: KickerConfig,
    pub clock: RecorderClock,
    pub tolerance_ns: i64,
    pub cpu: usize,
    pub output: PathBuf,
    pub plot: bool,
    pub gaps: bool,
    pub gap_subsets: usize,
}

impl Settings {
    pub fn spectrum_plot_path(&self) -> PathBuf {
        self.output.with_extension("png")
    }

    pub fn gaps_plot_path(&self) -> PathBuf {
        let stem = self
            .output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "kickstack".to_string());
        self.output.with_file_name(format!("{stem}_gaps.png"))
    }
}

/// Command line first, then the run file, then built-in defaults.
pub fn resolve(args: &Args, run: &RunFile) -> Result<Settings, DynError> {
    let iq_dir = args
        .iq_dir
        .clone()
        .or_else(|| run.iq_dir.clone())
        .ok_or("--iq-dir is required (or iq_dir in the run file)")?;
    let sc_dir = args
        .sc_dir
        .clone()
        .or_else(|| run.sc_dir.clone())
        .ok_or("--sc-dir is required (or sc_dir in the run file)")?;

    let chop = ChopConfig {
        lframes: args.lframes.or(run.lframes).unwrap_or(DEFAULT_LFRAMES),
        time_s: args.time.or(run.time_s).unwrap_or(DEFAULT_TIME_S),
        fs: args.fs.or(run.fs).unwrap_or(DEFAULT_FS_HZ),
        skip_s: args.skip.or(run.skip_s).unwrap_or(DEFAULT_SKIP_S),
    };
    chop.validate()?;

    let kicker = KickerConfig {
        channel: args.sc_channel.or(run.sc_channel).unwrap_or(DEFAULT_KICKER_CHANNEL),
        fs: args.sc_fs.or(run.sc_fs).unwrap_or(DEFAULT_KICKER_FS_HZ),
        clock_offset_ns: args
            .kicker_offset_ns
            .or(run.kicker_offset_ns)
            .unwrap_or(DEFAULT_KICKER_OFFSET_NS),
    };
    if !kicker.fs.is_finite() || kicker.fs <= 0.0 {
        return Err(format!("--sc-fs must be positive, got {}", kicker.fs).into());
    }

    let reference_text = args
        .reference
        .clone()
        .or_else(|| run.reference.clone())
        .unwrap_or_else(|| DEFAULT_REFERENCE.to_string());
    let clock = RecorderClock {
        reference: Timestamp::parse_iso(&reference_text)?,
        correction_ns: args
            .correction_ns
            .or(run.correction_ns)
            .unwrap_or(DEFAULT_CORRECTION_NS),
    };

    let tolerance_ns = args
        .tolerance_ns
        .or(run.tolerance_ns)
        .unwrap_or(DEFAULT_TOLERANCE_NS);
    if tolerance_ns < 0 {
        return Err("--tolerance-ns must not be negative".into());
    }

    let cpu = args.cpu.or(run.cpu).unwrap_or(1);
    if cpu == 0 {
        return Err("--cpu must be at least 1".into());
    }

    let gap_subsets = args.gap_subsets.or(run.gap_subsets).unwrap_or(1);
    if gap_subsets == 0 {
        return Err("--gap-subsets must be at least 1".into());
    }

    Ok(Settings {
        iq_dir,
        sc_dir,
        iq_list: args
            .iq_list
            .clone()
            .or_else(|| run.iq_list.clone())
            .unwrap_or_else(|| DEFAULT_IQ_LIST.to_string()),
        sc_list: args
            .sc_list
            .clone()
            .or_else(|| run.sc_list.clone())
            .unwrap_or_else(|| DEFAULT_SC_LIST.to_string()),
        iq_suffix: args
            .iq_suffix
            .clone()
            .or_else(|| run.iq_suffix.clone())
            .unwrap_or_else(|| DEFAULT_IQ_SUFFIX.to_string()),
        sc_suffix: args
            .sc_suffix
            .clone()
            .or_else(|| run.sc_suffix.clone())
            .unwrap_or_else(|| DEFAULT_SC_SUFFIX.to_string()),
        chop,
        kicker,
        clock,
        tolerance_ns,
        cpu,
        output: args
            .output
            .clone()
            .or_else(|| run.output.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT)),
        plot: args.plot,
        gaps: args.gaps,
        gap_subsets,
    })
}
