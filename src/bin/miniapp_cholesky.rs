//! Miniapp for the Cholesky factorization.
//!
//! Same protocol as the reduction to band miniapp: a random hermitian positive definite
//! matrix is factorized `--nruns` times on an in-process grid, and every run is reported as
//! one CSV row. `--check` verifies `||A - L L^H|| / ||A||`.

use anyhow::{Context, Result, anyhow, ensure};
use clap::{Parser, ValueEnum};
use faer::{c32, c64};
use serde::{Deserialize, Serialize};
use std::{fs::File, io::Write, path::PathBuf, time::Instant};
use tiledla::{
    DlaError, Scalar, Uplo, cholesky_factorization, cholesky_factorization_distributed,
    comm::{CommunicatorGrid, GridOrdering},
    matrix::Size2D,
    runtime::Runtime,
    tune::TuneParameters,
    utils::{
        check::{LocalPart, cholesky_residual, distribute, gather, random_hermitian, run_on_world, tolerance},
        perf::{cholesky_flops, get_peak_rss_kb},
    },
};

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
    name = "miniapp-cholesky",
    about = "Times the Cholesky factorization of a random hermitian positive definite matrix."
)]
struct Args {
    #[clap(long, default_value_t = 1024)]
    matrix_size: usize,
    #[clap(long, default_value_t = 256)]
    block_size: usize,
    #[clap(long, default_value_t = 1)]
    grid_rows: usize,
    #[clap(long, default_value_t = 1)]
    grid_cols: usize,
    /// Compute threads of each rank.
    #[clap(long, default_value_t = num_cpus::get())]
    threads: usize,
    #[clap(long, default_value_t = 1)]
    pipelines: usize,
    #[clap(long, value_enum, default_value_t = ElementType::F64)]
    element_type: ElementType,
    #[clap(long, default_value_t = 1)]
    nruns: usize,
    #[clap(long, default_value_t = 0)]
    seed: u64,
    #[clap(long)]
    check: bool,
    /// Path of the CSV output (stdout if omitted).
    #[clap(long, value_name = "PATH")]
    output: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RunResult {
    element_type: ElementType,
    n: usize,
    nb: usize,
    grid_rows: usize,
    grid_cols: usize,
    threads: usize,
    run: usize,
    time_s: f64,
    gflops: f64,
    rss_kb: u64,
    residual: Option<f64>,
}

fn run<T: Scalar>(args: &Args, element_type: ElementType) -> Result<Vec<RunResult>> {
    let n = args.matrix_size;
    let nb = args.block_size;
    let nranks = args.grid_rows * args.grid_cols;
    ensure!(nranks > 0, "the grid must have at least one rank");
    let tune = TuneParameters::from_env()?;

    let a0 = random_hermitian::<T>(n, args.seed, n as f64);
    let mut results = Vec::with_capacity(args.nruns);
    for run in 0..args.nruns {
        let world = CommunicatorGrid::world(
            args.grid_rows,
            args.grid_cols,
            GridOrdering::RowMajor,
            args.pipelines,
        );
        let outputs = run_on_world(&world, |grid| -> Result<(f64, LocalPart<T>), DlaError> {
            let dist = grid.distribution(Size2D::new(n, n), Size2D::new(nb, nb));
            let mut mat_a = distribute(dist, a0.as_ref());
            let runtime = Runtime::new(args.threads).with_tune(tune.clone());
            let start = Instant::now();
            if nranks == 1 {
                cholesky_factorization(&runtime, Uplo::Lower, &mut mat_a)?;
            } else {
                cholesky_factorization_distributed(&runtime, grid, Uplo::Lower, &mut mat_a)?;
            }
            Ok((start.elapsed().as_secs_f64(), mat_a.local_tiles()))
        });
        let outputs = outputs
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Run {run} failed"))?;

        let time_s = outputs.iter().map(|(t, _)| *t).fold(0.0, f64::max);
        let gflops = cholesky_flops(n, T::IS_COMPLEX) / time_s / 1e9;
        let residual = if args.check {
            let parts: Vec<_> = outputs.into_iter().map(|(_, part)| part).collect();
            let factor = gather(Size2D::new(n, n), Size2D::new(nb, nb), &parts);
            let residual = cholesky_residual(a0.as_ref(), factor.as_ref());
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
