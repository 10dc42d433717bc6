//! Helpers for the miniapps and the test suites.
//!
//! - **`check`**: builds random test matrices, gathers distributed matrices on one
//!   process and measures the residuals of the factorizations.
//! - **`perf`**: flop counts of the algorithms and the peak resident set size of the
//!   process, for throughput and memory reports.

pub mod check;
pub mod perf;
