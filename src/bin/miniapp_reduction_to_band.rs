//! Miniapp for the reduction to band.
//!
//! Builds a random hermitian matrix, distributes it over an in-process grid of ranks and
//! times the reduction to band on every rank, repeated `--nruns` times. Each run is
//! reported as one CSV row (time of the slowest rank, GFLOP/s, peak RSS of the process),
//! on stdout or in the file given with `--output`. With `--check`, the result is gathered
//! and the residual `||A - Q B Q^H|| / ||A||` is verified.

use anyhow::{Context, Result, anyhow, ensure};
use clap::{Parser, ValueEnum};
use faer::{c32, c64};
use serde::{Deserialize, Serialize};
use std::{fs::File, io::Write, path::PathBuf, time::Instant};
use tiledla::{
    DlaError, Scalar,
    comm::{CommunicatorGrid, GridOrdering},
    matrix::Size2D,
    reduction_to_band, reduction_to_band_distributed,
    runtime::Runtime,
    tune::TuneParameters,
    utils::{
        check::{
            LocalPart, distribute, gather, random_hermitian, reduction_to_band_residual,
            run_on_world, tolerance,
        },
        perf::{get_peak_rss_kb, reduction_to_band_flops},
    },
};

/// Element type of the matrix.
#[derive(ValueEnum, Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
enum ElementType {
    F32,
    F64,
    C32,
    C64,
}

#[derive(Parser, Debug)]
#[clap(
    name = "miniapp-reduction-to-band",
    about = "Times the reduction of a random hermitian matrix to band form."
)]
struct Args {
    /// Order of the matrix.
    #[clap(long, default_value_t = 1024)]
    matrix_size: usize,
    /// Tile size.
    #[clap(long, default_value_t = 256)]
    block_size: usize,
    /// Number of sub-diagonals of the result (defaults to the tile size).
    #[clap(long)]
    band: Option<usize>,
    #[clap(long, default_value_t = 1)]
    grid_rows: usize,
    #[clap(long, default_value_t = 1)]
    grid_cols: usize,
    /// Compute threads of each rank.
    #[clap(long, default_value_t = num_cpus::get())]
    threads: usize,
    /// Independent row and column communicators of each rank.
    #[clap(long, default_value_t = 2)]
    pipelines: usize,
    #[clap(long, value_enum, default_value_t = ElementType::F64)]
    element_type: ElementType,
    #[clap(long, default_value_t = 1)]
    nruns: usize,
    /// Seed of the random input matrix.
    #[clap(long, default_value_t = 0)]
    seed: u64,
    /// Verify the result of every run.
    #[clap(long)]
    check: bool,
    /// Path of the CSV output (stdout if omitted).
    #[clap(long, value_name = "PATH")]
    output: Option<PathBuf>,
}

/// One row of the CSV output.
#[derive(Debug, Serialize, Deserialize)]
struct RunResult {
    element_type: ElementType,
    n: usize,
    nb: usize,
    band: usize,
    grid_rows: usize,
    grid_cols: usize,
    threads: usize,
    run: usize,
    time_s: f64,
    gflops: f64,
    rss_kb: u64,
    residual: Option<f64>,
}

type RankOutput<T> = (f64, LocalPart<T>, LocalPart<T>);

fn run<T: Scalar>(args: &Args, element_type: ElementType) -> Result<Vec<RunResult>> {
    let n = args.matrix_size;
    let nb = args.block_size;
    let band = args.band.unwrap_or(nb);
    let nranks = args.grid_rows * args.grid_cols;
    ensure!(nranks > 0, "the grid must have at least one rank");
    let tune = TuneParameters::from_env()?;
    log::info!("Tuning parameters: {tune:?}");

    let a0 = random_hermitian::<T>(n, args.seed, 0.0);
    let mut results = Vec::with_capacity(args.nruns);
    for run in 0..args.nruns {
        let world = CommunicatorGrid::world(
            args.grid_rows,
            args.grid_cols,
            GridOrdering::RowMajor,
            args.pipelines,
        );
        let outputs = run_on_world(&world, |grid| -> Result<RankOutput<T>, DlaError> {
            let dist = grid.distribution(Size2D::new(n, n), Size2D::new(nb, nb));
            let mut mat_a = distribute(dist, a0.as_ref());
            let runtime = Runtime::new(args.threads).with_tune(tune.clone());
            let start = Instant::now();
            let taus = if nranks == 1 {
                reduction_to_band(&runtime, &mut mat_a, band)?
            } else {
                reduction_to_band_distributed(&runtime, grid, &mut mat_a, band)?
            };
            let time_s = start.elapsed().as_secs_f64();
            Ok((time_s, mat_a.local_tiles(), taus.local_tiles()))
        });
        let outputs = outputs
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Run {run} failed"))?;

        let time_s = outputs.iter().map(|(t, _, _)| *t).fold(0.0, f64::max);
        let gflops = reduction_to_band_flops(n, band, T::IS_COMPLEX) / time_s / 1e9;
        let residual = if args.check {
            let (reduced, taus): (Vec<_>, Vec<_>) =
                outputs.into_iter().map(|(_, a, t)| (a, t)).unzip();
            let reduced = gather(Size2D::new(n, n), Size2D::new(nb, nb), &reduced);
            let nrefls = n.saturating_sub(band + 1);
            let taus = gather(Size2D::new(nrefls, 1), Size2D::new(nb, 1), &taus);
            let residual =
                reduction_to_band_residual(a0.as_ref(), reduced.as_ref(), taus.as_ref(), band);
            ensure!(
                residual < tolerance::<T>(n),
                "run {run}: residual {residual:e} above tolerance {:e}",
                tolerance::<T>(n)
            );
            Some(residual)
        } else {
            None
        };

        log::info!("Run {run}: {time_s:.3}s, {gflops:.2} GFLOP/s");
        results.push(RunResult {
            element_type,
            n,
            nb,
            band,
            grid_rows: args.grid_rows,
            grid_cols: args.grid_cols,
            threads: args.threads,
            run,
            time_s,
            gflops,
            rss_kb: get_peak_rss_kb(),
            residual,
        });
    }
    Ok(results)
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;

    let args = Args::parse();
    let results = match args.element_type {
        ElementType::F32 => run::<f32>(&args, ElementType::F32)?,
        ElementType::F64 => run::<f64>(&args, ElementType::F64)?,
        ElementType::C32 => run::<c32>(&args, ElementType::C32)?,
        ElementType::C64 => run::<c64>(&args, ElementType::C64)?,
    };

    let sink: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("Failed to create {path:?}"))?,
        ),
        None => Box::new(std::io::stdout()),
    };
    let mut writer = csv::Writer::from_writer(sink);
    for record in &results {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}
