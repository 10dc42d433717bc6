//! Tunable parameters of the algorithms.
//!
//! Defaults can be overridden from the environment with
//! [`TuneParameters::from_env`]:
//!
//! | variable                                  | field                             |
//! |-------------------------------------------|-----------------------------------|
//! | `TILEDLA_RED2BAND_PANEL_NUM_THREADS`      | `red2band_panel_num_threads`      |
//! | `TILEDLA_RED2BAND_BARRIER_BUSY_WAIT_US`   | `red2band_barrier_busy_wait_us`   |
//! | `TILEDLA_PANEL_STRATEGY`                  | `panel_strategy` (`in-place`, `staged`) |

use crate::error::{DlaError, DlaErrorKind};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// How the reflectors of a panel are computed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PanelStrategy {
    /// Directly on the matrix tiles.
    #[default]
    InPlace,
    /// On a workspace copy of the panel, copied back afterwards.
    Staged,
}

impl FromStr for PanelStrategy {
    type Err = DlaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in-place" => Ok(PanelStrategy::InPlace),
            "staged" => Ok(PanelStrategy::Staged),
            other => Err(DlaErrorKind::InputError(format!(
                "unknown panel strategy `{other}` (expected `in-place` or `staged`)"
            ))
            .into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuneParameters {
    /// Upper bound on the number of workers computing the reflectors of one panel.
    pub red2band_panel_num_threads: usize,
    /// Time a worker spins at a panel barrier before blocking, in microseconds.
    pub red2band_barrier_busy_wait_us: u64,
    pub panel_strategy: PanelStrategy,
}

impl Default for TuneParameters {
    fn default() -> Self {
        Self {
            red2band_panel_num_threads: (num_cpus::get() / 2).max(1),
            red2band_barrier_busy_wait_us: 1000,
            panel_strategy: PanelStrategy::InPlace,
        }
    }
}

fn parse_env<V: FromStr>(name: &str) -> Result<Option<V>, DlaError> {
    match std::env::var(name) {
        Ok(value) => value.trim().parse().map(Some).map_err(|_| {
            DlaErrorKind::InputError(format!("cannot parse environment variable {name}={value}"))
                .into()
        }),
        Err(_) => Ok(None),
    }
}

impl TuneParameters {
    /// Default parameters with the overrides found in the environment.
    pub fn from_env() -> Result<Self, DlaError> {
        let mut tune = Self::default();
        if let Some(v) = parse_env("TILEDLA_RED2BAND_PANEL_NUM_THREADS")? {
            tune.red2band_panel_num_threads = v;
        }
        if let Some(v) = parse_env("TILEDLA_RED2BAND_BARRIER_BUSY_WAIT_US")? {
            tune.red2band_barrier_busy_wait_us = v;
        }
        if let Ok(strategy) = std::env::var("TILEDLA_PANEL_STRATEGY") {
            tune.panel_strategy = strategy.trim().parse()?;
        }
        Ok(tune)
    }

    pub fn red2band_barrier_busy_wait(&self) -> Duration {
        Duration::from_micros(self.red2band_barrier_busy_wait_us)
    }
}

/// Minimum number of tiles assigned to each panel worker.
pub const RED2BAND_PANEL_WORKER_MINWORK: usize = 1;

/// Number of panel workers that may run concurrently, keeping one compute thread free for
/// the rest of the task graph.
pub fn red2band_panel_max_workers(tune: &TuneParameters, compute_threads: usize) -> usize {
    let available = compute_threads.saturating_sub(1).max(1);
    tune.red2band_panel_num_threads.clamp(1, available)
}

/// Number of workers used for a panel of `ntiles` local tiles.
pub fn red2band_panel_num_workers(ntiles: usize, max_workers: usize) -> usize {
    ntiles
        .div_ceil(RED2BAND_PANEL_WORKER_MINWORK)
        .clamp(1, max_workers.max(1))
}
