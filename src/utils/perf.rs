//! Performance measurement utilities: operation counts and memory usage.
//!
//! Flop counts follow the LAPACK working notes convention: a complex multiplication counts
//! as six real flops and a complex addition as two.

/// Flops of a computation with `muls` multiplications and `adds` additions.
fn flops(muls: f64, adds: f64, is_complex: bool) -> f64 {
    if is_complex {
        6.0 * muls + 2.0 * adds
    } else {
        muls + adds
    }
}

/// Flop count of the reduction of an `n x n` hermitian matrix to band form, i.e. the one of
/// the reduction to tridiagonal form minus the work saved by the band.
pub fn reduction_to_band_flops(n: usize, band: usize, is_complex: bool) -> f64 {
    let n = n as f64;
    let b = (band as f64).min(n);
    let m = n - b;
    let muls = 2.0 / 3.0 * m * m * m + 2.0 * b * m * m;
    flops(muls, muls, is_complex)
}

/// Flop count of the Cholesky factorization of an `n x n` matrix.
pub fn cholesky_flops(n: usize, is_complex: bool) -> f64 {
    let n = n as f64;
    let muls = n * n * n / 6.0 + n * n / 2.0 + n / 3.0;
    let adds = n * n * n / 6.0 - n / 6.0;
    flops(muls, adds, is_complex)
}

/// Reads the peak resident set size (VmHWM) from /proc/self/status on Linux.
///
/// # Returns
/// The peak memory usage in kilobytes (KB), or 0 if the value cannot be read.
#[cfg(target_os = "linux")]
pub fn get_peak_rss_kb() -> u64 {
    let status_content = match std::fs::read_to_string("/proc/self/status") {
        Ok(content) => content,
        Err(_) => return 0,
    };

    status_content
        .lines()
        .find_map(|line| line.strip_prefix("VmHWM:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

/// Fallback for platforms without /proc.
#[cfg(not(target_os = "linux"))]
pub fn get_peak_rss_kb() -> u64 {
    use std::sync::Once;
    static WARN_ONCE: Once = Once::new();
    WARN_ONCE.call_once(|| {
        log::warn!("Peak RSS measurement is only supported on Linux; returning 0.");
    });
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cholesky_flops_leading_term() {
        let n = 3000;
        let expected = (n as f64).powi(3) / 3.0;
        assert!((cholesky_flops(n, false) / expected - 1.0).abs() < 1e-3);
        assert!((cholesky_flops(n, true) / cholesky_flops(n, false) - 4.0).abs() < 1e-3);
    }

    #[test]
    fn test_band_flops_vanish_for_full_band() {
        assert_eq!(reduction_to_band_flops(100, 100, false), 0.0);
        assert!(reduction_to_band_flops(100, 1, false) > reduction_to_band_flops(100, 10, false));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_peak_rss_is_reported() {
        assert!(get_peak_rss_kb() > 0);
    }
}
