use super::{OpsError, OpsResult};

/// Area under `f(t)` by the trapezoidal rule.
///
/// `t` need not be evenly spaced. Fewer than two samples enclose no area.
pub fn trapezoid(t: &[f64], f: &[f64]) -> OpsResult<f64> {
    if t.len() != f.len() {
        return Err(OpsError::LengthMismatch {
            t: t.len(),
            f: f.len(),
        });
    }

    let area = t
        .windows(2)
        .zip(f.windows(2))
        .map(|(t, f)| (t[1] - t[0]) * (f[0] + f[1]) / 2.0)
        .sum();

    Ok(area)
}
