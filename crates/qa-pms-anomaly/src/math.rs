//! Shared numerical helpers used across detectors and the severity engine.
//!
//! Small fixed-size vectors are plain `[f64; N]` arithmetic; no linear-algebra
//! crate is pulled in, matching `qa-pms-ai::anomaly_detector`'s hand-rolled
//! `MovingAverage` at this scale.

/// `1 / (1 + e^-x)`.
#[must_use]
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// `|x - mean| / (std + epsilon)`, epsilon-guarded against a zero baseline.
#[must_use]
pub fn z_score(x: f64, mean: f64, std: f64) -> f64 {
    (x - mean).abs() / (std + 1e-10)
}

/// EWMA mean/variance update. `first` selects the seeding rule from §4.5:
/// on the first observation, mean is set to `x` and std to 0.1 rather than 0.
#[must_use]
pub fn ewma_update(mean: f64, variance: f64, x: f64, alpha: f64, first: bool) -> (f64, f64) {
    ewma_update_dual(mean, variance, x, alpha, alpha, first)
}

/// EWMA mean/variance update with separate mean and variance weights: the
/// mean is folded in with `alpha_mean`, then the variance is folded in with
/// `alpha_var` against the *new* mean's squared deviation, matching the
/// original implementation's fast-mean/slow-variance split.
#[must_use]
pub fn ewma_update_dual(mean: f64, variance: f64, x: f64, alpha_mean: f64, alpha_var: f64, first: bool) -> (f64, f64) {
    if first {
        return (x, 0.01);
    }
    let new_mean = alpha_mean.mul_add(x, (1.0 - alpha_mean) * mean);
    let diff = x - new_mean;
    let new_variance = alpha_var.mul_add(diff * diff, (1.0 - alpha_var) * variance);
    (new_mean, new_variance)
}

/// Shannon entropy of a probability distribution (values need not be
/// pre-normalized; this normalizes them internally). Returns 0 for an empty
/// or all-zero input.
#[must_use]
pub fn shannon_entropy(counts: &[f64]) -> f64 {
    let total: f64 = counts.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    -counts
        .iter()
        .filter(|&&c| c > 0.0)
        .map(|&c| {
            let p = c / total;
            p * p.log2()
        })
        .sum::<f64>()
}

/// Coefficient of variation: `std / mean`, guarded against a zero mean.
#[must_use]
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if mean.abs() < 1e-10 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt() / mean
}

/// Slope of an ordinary least-squares fit of `ys` against `0..ys.len()`.
#[must_use]
pub fn linear_regression_slope(ys: &[f64]) -> f64 {
    let n = ys.len();
    if n < 2 {
        return 0.0;
    }
    let xs: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let x_mean = xs.iter().sum::<f64>() / n as f64;
    let y_mean = ys.iter().sum::<f64>() / n as f64;
    let mut num = 0.0;
    let mut den = 0.0;
    for i in 0..n {
        let dx = xs[i] - x_mean;
        num += dx * (ys[i] - y_mean);
        den += dx * dx;
    }
    if den.abs() < 1e-10 {
        0.0
    } else {
        num / den
    }
}

/// Chi-square critical value at p=0.95 for a handful of degrees of freedom
/// actually used by this crate (hand-rolled lookup; no `statrs` dependency,
/// matching the teacher's preference for closed-form math over a stats crate
/// at this scale).
#[must_use]
pub fn chi_square_critical_95(df: usize) -> f64 {
    match df {
        10 => 18.307,
        23 => 35.172,
        _ => 0.5 * df as f64 + 2.0 * (df as f64).sqrt() + 3.0,
    }
}

/// Mahalanobis distance of `x` from a distribution with `mean` and
/// covariance `cov`, with `cov` already regularized by the caller
/// (`Σ + εI`). Returns `None` if `cov` is singular (determinant ~0), in
/// which case the caller should skip the multivariate check rather than fail.
#[must_use]
pub fn mahalanobis_distance<const N: usize>(
    x: &[f64; N],
    mean: &[f64; N],
    cov: &[[f64; N]; N],
) -> Option<f64> {
    let diff: Vec<f64> = (0..N).map(|i| x[i] - mean[i]).collect();
    let inv = invert_matrix(cov)?;
    let mut quad = 0.0;
    for i in 0..N {
        let mut row_sum = 0.0;
        for j in 0..N {
            row_sum += inv[i][j] * diff[j];
        }
        quad += diff[i] * row_sum;
    }
    if quad < 0.0 {
        // Numerical noise near zero; covariance is still well-conditioned.
        Some(0.0)
    } else {
        Some(quad.sqrt())
    }
}

/// Gauss-Jordan matrix inversion. Returns `None` for a singular matrix.
fn invert_matrix<const N: usize>(m: &[[f64; N]; N]) -> Option<[[f64; N]; N]> {
    let mut a = *m;
    let mut inv = [[0.0; N]; N];
    for (i, row) in inv.iter_mut().enumerate() {
        row[i] = 1.0;
    }

    for col in 0..N {
        let mut pivot_row = col;
        let mut pivot_val = a[col][col].abs();
        for row in (col + 1)..N {
            if a[row][col].abs() > pivot_val {
                pivot_val = a[row][col].abs();
                pivot_row = row;
            }
        }
        if pivot_val < 1e-12 {
            return None;
        }
        a.swap(col, pivot_row);
        inv.swap(col, pivot_row);

        let pivot = a[col][col];
        for j in 0..N {
            a[col][j] /= pivot;
            inv[col][j] /= pivot;
        }

        for row in 0..N {
            if row == col {
                continue;
            }
            let factor = a[row][col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..N {
                a[row][j] -= factor * a[col][j];
                inv[row][j] -= factor * inv[col][j];
            }
        }
    }

    Some(inv)
}

/// Clamp a value into `[lo, hi]`, mapping NaN/infinite inputs to `lo`.
#[must_use]
pub fn clamp_finite(x: f64, lo: f64, hi: f64) -> f64 {
    if !x.is_finite() {
        lo
    } else {
        x.clamp(lo, hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigmoid_midpoint() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_z_score_zero_std_guarded() {
        assert!(z_score(10.0, 0.0, 0.0) > 0.0);
        assert!(z_score(0.0, 0.0, 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_ewma_first_update_seeds_mean_and_small_std() {
        let (mean, variance) = ewma_update(0.0, 0.0, 5.0, 0.3, true);
        assert!((mean - 5.0).abs() < 1e-9);
        assert!((variance - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_ewma_subsequent_update_moves_toward_x() {
        let (mean, _) = ewma_update(10.0, 1.0, 20.0, 0.5, false);
        assert!((mean - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_shannon_entropy_uniform_is_max() {
        let uniform = shannon_entropy(&[1.0, 1.0, 1.0, 1.0]);
        assert!((uniform - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_shannon_entropy_single_bucket_is_zero() {
        assert!(shannon_entropy(&[5.0, 0.0, 0.0]).abs() < 1e-9);
    }

    #[test]
    fn test_coefficient_of_variation_constant_series_is_zero() {
        assert!(coefficient_of_variation(&[3.0, 3.0, 3.0]).abs() < 1e-9);
    }

    #[test]
    fn test_linear_regression_slope_of_line() {
        let slope = linear_regression_slope(&[1.0, 2.0, 3.0, 4.0]);
        assert!((slope - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_mahalanobis_identity_covariance_matches_euclidean() {
        let mean = [0.0, 0.0];
        let cov = [[1.0, 0.0], [0.0, 1.0]];
        let x = [3.0, 4.0];
        let d = mahalanobis_distance(&x, &mean, &cov).expect("non-singular");
        assert!((d - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_mahalanobis_singular_covariance_returns_none() {
        let mean = [0.0, 0.0];
        let cov = [[0.0, 0.0], [0.0, 0.0]];
        let x = [1.0, 1.0];
        assert!(mahalanobis_distance(&x, &mean, &cov).is_none());
    }

    #[test]
    fn test_clamp_finite_handles_nan() {
        assert!((clamp_finite(f64::NAN, 0.0, 1.0) - 0.0).abs() < 1e-9);
        assert!((clamp_finite(1.5, 0.0, 1.0) - 1.0).abs() < 1e-9);
    }
}
