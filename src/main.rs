mod args;
mod capture;
mod engine;
mod error;
mod kicker;
mod npy;
mod plot;
mod ranges;
mod runfile;
mod source;
mod spectrogram;
mod timestamp;

use std::time::Instant;

use clap::{CommandFactory, Parser};
use libc;
use tracing_subscriber::EnvFilter;

use capture::{list_captures, IqFileSource, ScFileSource};
use engine::ChopStack;
use error::DynError;
use kicker::kick_times;
use npy::write_npy;
use plot::{gap_subsets, plot_file_gaps, plot_stacked_spectrum};
use ranges::FileRangeIndex;
use runfile::{parse_runfile, RunFile};
use timestamp::analyser_file_deltas;

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn report_gaps(settings: &args::Settings, index: &FileRangeIndex) -> Result<(), DynError> {
    let deltas = index.start_deltas();
    println!("[info] Start-to-start spacing of {} IQ captures:", index.len());
    for (pair, (delta, range)) in deltas.iter().zip(index.ranges().iter().skip(1)).enumerate() {
        println!(
            "  {:>5}  {:>14.9} s  {}  {}",
            pair + 1,
            delta,
            range.start.to_analyser_name(""),
            range.file_id.display()
        );
    }
    if !deltas.is_empty() {
        let max_gap = deltas.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        println!("[info] Largest spacing: {:.9} s", max_gap);
    }
    for (i, (range, mean)) in gap_subsets(&deltas, settings.gap_subsets).iter().enumerate() {
        println!(
            "[info] Subset {} (deltas {}..{}): average delta {:.9} s",
            i + 1,
            range.start + 1,
            range.end,
            mean
        );
    }

    // Analyser-named captures also carry their start time in the file name.
    let ids: Vec<_> = index.ranges().iter().map(|r| r.file_id.clone()).collect();
    if let Ok(name_deltas) = analyser_file_deltas(&ids) {
        for (pair, (from_name, from_header)) in name_deltas.iter().zip(deltas.iter()).enumerate() {
            let skew = from_header - from_name;
            if skew.abs() > 1e-3 {
                eprintln!(
                    "[warn] Capture pair {}: file names imply {:.3} s but headers give {:.9} s",
                    pair + 1,
                    from_name,
                    from_header
                );
            }
        }
    }

    if settings.plot && !deltas.is_empty() {
        for path in plot_file_gaps(&deltas, settings.gap_subsets, &settings.gaps_plot_path())? {
            println!("[info] Capture spacing plot written to {}", path.display());
        }
    }
    Ok(())
}

fn main() -> Result<(), DynError> {
    if std::env::args_os().len() == 1 {
        args::Args::command().print_help()?;
        println!();
        return Ok(());
    }

    let cli = args::Args::parse();
    let run = match &cli.runfile {
        Some(path) => parse_runfile(path)?,
        None => RunFile::default(),
    };
    let settings = args::resolve(&cli, &run)?;

    let available_cores = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) } as usize;
    if settings.cpu > available_cores {
        return Err(format!(
            "--cpu value ({}) exceeds the number of available cores ({})",
            settings.cpu, available_cores
        )
        .into());
    }

    rayon::ThreadPoolBuilder::new()
        .num_threads(settings.cpu)
        .build_global()
        .map_err(|_| "Failed to initialise rayon thread pool")?;

    init_logging(cli.debug);

    let iq_files = list_captures(&settings.iq_dir, &settings.iq_list, &settings.iq_suffix)?;
    let sc_files = list_captures(&settings.sc_dir, &settings.sc_list, &settings.sc_suffix)?;

    let kicks = kick_times(&ScFileSource, &sc_files, &settings.kicker)?;
    let index = FileRangeIndex::build(&IqFileSource, &iq_files, &settings.clock, settings.tolerance_ns)?;

    let nframes = settings.chop.nframes();
    println!("Starting kicker stacking with the following arguments:");
    println!("--------------------------------------------------");
    println!("  iq-dir:     {} ({} captures)", settings.iq_dir.display(), iq_files.len());
    println!("  sc-dir:     {} ({} captures)", settings.sc_dir.display(), sc_files.len());
    if let Some(path) = &cli.runfile {
        println!("  runfile:    {}", path.display());
    }
    println!("  kicks:      {}", kicks.len());
    if let (Some(first), Some(last)) = (kicks.first(), kicks.last()) {
        println!("  first/last: {} / {}", first, last);
    }
    println!("  sampling:   {} Hz", settings.chop.fs);
    println!(
        "  frames:     {} x {} bins ({:.6} s analysed, {:.6} s requested)",
        nframes,
        settings.chop.lframes,
        (nframes * settings.chop.lframes) as f64 / settings.chop.fs,
        settings.chop.time_s
    );
    println!("  skip:       {} s", settings.chop.skip_s);
    println!(
        "  sc channel: {} @ {} Hz (offset {} ns)",
        settings.kicker.channel, settings.kicker.fs, settings.kicker.clock_offset_ns
    );
    println!(
        "  iq clock:   {} - {} ns (tolerance {} ns)",
        settings.clock.reference, settings.clock.correction_ns, settings.tolerance_ns
    );
    println!("  cpu:        {}", settings.cpu);
    println!("  output:     {}", settings.output.display());
    println!("--------------------------------------------------");

    if settings.gaps {
        report_gaps(&settings, &index)?;
    }

    if kicks.is_empty() {
        eprintln!("[warn] No kicker edges found; the output will be all zeros.");
    }

    let started = Instant::now();
    let stack = ChopStack::new(&IqFileSource, &index, settings.chop)?.with_workers(settings.cpu);
    let stacked = stack.run(&kicks)?;
    let elapsed = started.elapsed().as_secs_f64();

    write_npy(&settings.output, &stacked)?;
    println!(
        "[info] Stacked {} kicks into a {} x {} spectrogram in {:.2} s.",
        kicks.len(),
        stacked.nframes(),
        stacked.lframes(),
        elapsed
    );
    println!("[info] Spectrogram written to {}", settings.output.display());

    if settings.plot {
        let path = settings.spectrum_plot_path();
        plot_stacked_spectrum(&stacked, settings.chop.fs, kicks.len(), &path)?;
        println!("[info] Stacked spectrum plot written to {}", path.display());
    }

    Ok(())
}
