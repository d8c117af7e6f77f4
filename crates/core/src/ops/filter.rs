use super::{OpsError, OpsResult};
use crate::table::Series;

/// Rows this many standard deviations above the fit are rejected
pub const DEFAULT_MAX_VARIANCE: f64 = 2.0;

/// Least-squares line `f = slope * t + intercept`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    pub fn predict(&self, t: f64) -> f64 {
        self.slope * t + self.intercept
    }
}

/// Result of outlier rejection
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub filtered: Series,
    pub fit: LinearFit,
    pub rejected: usize,
}

pub fn linregress(t: &[f64], f: &[f64]) -> OpsResult<LinearFit> {
    if t.len() != f.len() {
        return Err(OpsError::LengthMismatch {
            t: t.len(),
            f: f.len(),
        });
    }
    if t.len() < 2 {
        return Err(OpsError::TooFewPoints(t.len()));
    }

    let n = t.len() as f64;
    let t_mean = t.iter().sum::<f64>() / n;
    let f_mean = f.iter().sum::<f64>() / n;

    let (sxy, sxx) = t
        .iter()
        .zip(f)
        .fold((0.0, 0.0), |(sxy, sxx), (&ti, &fi)| {
            let dt = ti - t_mean;
            (sxy + dt * (fi - f_mean), sxx + dt * dt)
        });

    if sxx == 0.0 {
        return Err(OpsError::DegenerateRegression);
    }

    let slope = sxy / sxx;
    Ok(LinearFit {
        slope,
        intercept: f_mean - slope * t_mean,
    })
}

/// Drop rows whose standardized residual is `>= max_variance`.
///
/// The test is one-sided: only points far above the fitted line are removed.
/// Surviving rows keep their original order. When the points lie on a line
/// (no residual spread beyond rounding) nothing is rejected.
pub fn filter_outliers(series: &Series, max_variance: f64) -> OpsResult<FilterOutcome> {
    let fit = linregress(&series.t, &series.f)?;

    let residuals: Vec<f64> = series
        .t
        .iter()
        .zip(&series.f)
        .map(|(&t, &f)| f - fit.predict(t))
        .collect();

    let n = residuals.len() as f64;
    let mean = residuals.iter().sum::<f64>() / n;
    // population standard deviation (ddof = 0)
    let sd = (residuals.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n).sqrt();

    // Residuals of points on an exact line are rounding noise, not spread
    let scale = series.f.iter().fold(0.0_f64, |m, f| m.max(f.abs()));
    let no_spread = sd <= f64::EPSILON * scale * n;

    let mut filtered = Series::default();
    for ((&t, &f), &r) in series.t.iter().zip(&series.f).zip(&residuals) {
        let keep = no_spread || (r - mean) / sd < max_variance;
        if keep {
            filtered.t.push(t);
            filtered.f.push(f);
        }
    }

    let rejected = series.len() - filtered.len();
    tracing::debug!(
        slope = fit.slope,
        intercept = fit.intercept,
        residual_sd = sd,
        rejected,
        "Filtered outliers"
    );

    Ok(FilterOutcome {
        filtered,
        fit,
        rejected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_linregress_exact_line() {
        let t = vec![0.0, 1.0, 2.0, 3.0];
        let f: Vec<f64> = t.iter().map(|t| 2.0 * t + 1.0).collect();

        let fit = linregress(&t, &f).unwrap();
        assert!(approx(fit.slope, 2.0));
        assert!(approx(fit.intercept, 1.0));
    }

    #[test]
    fn test_linregress_rejects_degenerate_input() {
        assert!(matches!(
            linregress(&[1.0], &[2.0]),
            Err(OpsError::TooFewPoints(1))
        ));
        assert!(matches!(
            linregress(&[1.0, 1.0, 1.0], &[0.0, 1.0, 2.0]),
            Err(OpsError::DegenerateRegression)
        ));
        assert!(matches!(
            linregress(&[1.0, 2.0], &[0.0]),
            Err(OpsError::LengthMismatch { t: 2, f: 1 })
        ));
    }

    #[test]
    fn test_spike_above_line_is_removed() {
        let t: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let mut f: Vec<f64> = t.iter().map(|t| 0.5 * t).collect();
        f[10] += 50.0;

        let series = Series::new(t.clone(), f).unwrap();
        let outcome = filter_outliers(&series, DEFAULT_MAX_VARIANCE).unwrap();

        assert_eq!(outcome.rejected, 1);
        assert_eq!(outcome.filtered.len(), 19);
        assert!(!outcome.filtered.t.contains(&10.0));
        // order preserved
        assert!(outcome.filtered.t.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_dip_below_line_is_kept() {
        let t: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let mut f: Vec<f64> = t.iter().map(|t| 0.5 * t).collect();
        f[10] -= 50.0;

        let series = Series::new(t, f).unwrap();
        let outcome = filter_outliers(&series, DEFAULT_MAX_VARIANCE).unwrap();

        assert_eq!(outcome.rejected, 0);
        assert_eq!(outcome.filtered, series);
    }

    #[test]
    fn test_perfect_line_keeps_everything() {
        let t = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        let f = vec![1.0, 1.0, 1.0, 1.0, 1.0];
        let series = Series::new(t, f).unwrap();

        let outcome = filter_outliers(&series, DEFAULT_MAX_VARIANCE).unwrap();
        assert_eq!(outcome.rejected, 0);
        assert_eq!(outcome.filtered.len(), 5);
    }

    #[test]
    fn test_sloped_exact_lines_keep_everything() {
        let t = crate::ops::linspace(0.0, 100.0, 100);

        for k in 1..200 {
            let slope = 0.0137 * k as f64;
            let f: Vec<f64> = t.iter().map(|t| slope * t + 0.3).collect();
            let series = Series::new(t.clone(), f).unwrap();

            let outcome = filter_outliers(&series, DEFAULT_MAX_VARIANCE).unwrap();
            assert_eq!(outcome.rejected, 0, "slope {slope} lost rows");
        }
    }

    #[test]
    fn test_noisy_stream_still_filtered() {
        let t = crate::ops::linspace(0.0, 100.0, 100);
        let mut f: Vec<f64> = t.iter().map(|t| 2.5 * t + 0.3).collect();
        f[40] += 1e-6;

        let series = Series::new(t, f).unwrap();
        let outcome = filter_outliers(&series, DEFAULT_MAX_VARIANCE).unwrap();
        assert_eq!(outcome.rejected, 1);
        assert!(!outcome.filtered.t.contains(&series.t[40]));
    }
}
