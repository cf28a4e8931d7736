use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::DynError;

/// Settings read from a `key = value` run description. Keys are matched
/// case-insensitively with underscores ignored, so `IQ_DIR`, `iq_dir` and
/// `iqdir` are the same key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunFile {
    pub iq_dir: Option<PathBuf>,
    pub sc_dir: Option<PathBuf>,
    pub iq_list: Option<String>,
    pub sc_list: Option<String>,
    pub iq_suffix: Option<String>,
    pub sc_suffix: Option<String>,
    pub lframes: Option<usize>,
    pub time_s: Option<f64>,
    pub skip_s: Option<f64>,
    pub fs: Option<f64>,
    pub sc_channel: Option<usize>,
    pub sc_fs: Option<f64>,
    pub reference: Option<String>,
    pub correction_ns: Option<i64>,
    pub kicker_offset_ns: Option<i64>,
    pub tolerance_ns: Option<i64>,
    pub cpu: Option<usize>,
    pub gap_subsets: Option<usize>,
    pub output: Option<PathBuf>,
}

const KNOWN_KEYS: &[&str] = &[
    "iqdir",
    "scdir",
    "iqlist",
    "sclist",
    "iqsuffix",
    "scsuffix",
    "lframes",
    "binning",
    "time",
    "skip",
    "fs",
    "sampling",
    "scchannel",
    "scfs",
    "reference",
    "correctionns",
    "kickeroffsetns",
    "tolerancens",
    "cpu",
    "gapsubsets",
    "output",
];

fn parse_kv_lines(reader: impl BufRead) -> Result<HashMap<String, String>, DynError> {
    let mut params = HashMap::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        if let Some(index) = line.find('=') {
            let (key, value) = line.split_at(index);
            let key = key.trim().to_ascii_lowercase().replace('_', "");
            let value = value
                .trim_start_matches('=')
                .trim()
                .trim_matches('"')
                .trim_matches('\'')
                .to_string();
            params.insert(key, value);
        }
    }
    Ok(params)
}

fn parse_optional<T>(params: &HashMap<String, String>, keys: &[&str]) -> Result<Option<T>, DynError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    for key in keys {
        if let Some(value) = params.get(*key) {
            return value
                .parse::<T>()
                .map(Some)
                .map_err(|e| format!("run file key '{key}' = '{value}': {e}").into());
        }
    }
    Ok(None)
}

/// Integer nanosecond keys also accept float notation such as `1.28e9`.
fn parse_optional_nanos(params: &HashMap<String, String>, key: &str) -> Result<Option<i64>, DynError> {
    let Some(value) = params.get(key) else {
        return Ok(None);
    };
    if let Ok(n) = value.parse::<i64>() {
        return Ok(Some(n));
    }
    let f = value
        .parse::<f64>()
        .map_err(|e| format!("run file key '{key}' = '{value}': {e}"))?;
    if !f.is_finite() || f.fract() != 0.0 {
        return Err(format!("run file key '{key}' must be a whole number of nanoseconds").into());
    }
    Ok(Some(f as i64))
}

fn from_params(params: &HashMap<String, String>) -> Result<RunFile, DynError> {
    for key in params.keys() {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            eprintln!("[warn] Ignoring unknown run file key '{key}'");
        }
    }
    Ok(RunFile {
        iq_dir: params.get("iqdir").map(PathBuf::from),
        sc_dir: params.get("scdir").map(PathBuf::from),
        iq_list: params.get("iqlist").cloned(),
        sc_list: params.get("sclist").cloned(),
        iq_suffix: params.get("iqsuffix").cloned(),
        sc_suffix: params.get("scsuffix").cloned(),
        lframes: parse_optional(params, &["lframes", "binning"])?,
        time_s: parse_optional(params, &["time"])?,
        skip_s: parse_optional(params, &["skip"])?,
        fs: parse_optional(params, &["fs", "sampling"])?,
        sc_channel: parse_optional(params, &["scchannel"])?,
        sc_fs: parse_optional(params, &["scfs"])?,
        reference: params.get("reference").cloned(),
        correction_ns: parse_optional_nanos(params, "correctionns")?,
        kicker_offset_ns: parse_optional_nanos(params, "kickeroffsetns")?,
        tolerance_ns: parse_optional_nanos(params, "tolerancens")?,
        cpu: parse_optional(params, &["cpu"])?,
        gap_subsets: parse_optional(params, &["gapsubsets"])?,
        output: params.get("output").map(PathBuf::from),
    })
}

pub fn parse_runfile(path: &Path) -> Result<RunFile, DynError> {
    let file = File::open(path).map_err(|e| format!("cannot open run file {}: {e}", path.display()))?;
    let params = parse_kv_lines(BufReader::new(file))?;
    from_params(&params)
}
