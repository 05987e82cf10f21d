//! Coarse-to-fine search for a single scalar parameter.
//!
//! Each level evaluates the cost on a small evenly spaced grid around the
//! current guess, picks the best grid point and refines it with a parabola
//! through its neighbours. The grid half-width is `pixel_size × subscale`
//! and the subscale halves after every level, so the search narrows from
//! `max_subscale` pixels down to a single pixel.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tomocal_core::{CancelToken, GeometryError, Real};

#[derive(Debug, Error)]
pub enum CalibrateError {
    #[error("invalid calibrator input: {0}")]
    Validation(String),
    #[error("calibration cancelled")]
    Cancelled,
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error("cost evaluation failed: {0}")]
    Cost(#[from] anyhow::Error),
}

/// Calibrator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibratorOptions {
    /// Initial search half-width in pixels. Must be a power of two.
    pub max_subscale: usize,
    /// Trials per level (>= 3).
    pub grid_points: usize,
}

impl Default for CalibratorOptions {
    fn default() -> Self {
        Self {
            max_subscale: 1,
            grid_points: 5,
        }
    }
}

impl CalibratorOptions {
    pub fn validate(&self) -> Result<(), CalibrateError> {
        if !self.max_subscale.is_power_of_two() {
            return Err(CalibrateError::Validation(format!(
                "max_subscale must be a power of two, got {}",
                self.max_subscale
            )));
        }
        if self.grid_points < 3 {
            return Err(CalibrateError::Validation(format!(
                "grid_points must be at least 3, got {}",
                self.grid_points
            )));
        }
        Ok(())
    }
}

/// Trials of one search level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationLevel {
    pub subscale: usize,
    pub values: Vec<Real>,
    pub costs: Vec<Real>,
    /// Refined minimum of this level; the centre of the next one.
    pub estimate: Real,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTrace {
    pub value: Real,
    pub levels: Vec<CalibrationLevel>,
}

/// `n` evenly spaced samples over `[lo, hi]`, both ends included.
pub fn linspace(lo: Real, hi: Real, n: usize) -> Vec<Real> {
    match n {
        0 => Vec::new(),
        1 => vec![lo],
        _ => {
            let step = (hi - lo) / (n - 1) as Real;
            (0..n).map(|i| lo + i as Real * step).collect()
        }
    }
}

/// Vertex of the parabola through `(space[i], values[i])` for `i` in
/// `index - 1 ..= index + 1`.
///
/// Falls back to `space[index]` when `index` is on the boundary or the three
/// points do not bracket a finite minimum.
pub fn parabolic_min(values: &[Real], index: usize, space: &[Real]) -> Real {
    let n = values.len().min(space.len());
    if index == 0 || index + 1 >= n {
        return space[index.min(n.saturating_sub(1))];
    }
    let (x0, x1, x2) = (space[index - 1], space[index], space[index + 1]);
    let (y0, y1, y2) = (values[index - 1], values[index], values[index + 1]);

    let denom = (x0 - x1) * (x0 - x2) * (x1 - x2);
    let a = (x2 * (y1 - y0) + x1 * (y0 - y2) + x0 * (y2 - y1)) / denom;
    let b = (x2 * x2 * (y0 - y1) + x1 * x1 * (y2 - y0) + x0 * x0 * (y1 - y2)) / denom;

    let vertex = -b / (2.0 * a);
    if a > 0.0 && vertex.is_finite() && vertex >= x0.min(x2) && vertex <= x0.max(x2) {
        vertex
    } else {
        x1
    }
}

/// Index of the smallest cost; the first one wins ties. NaN never wins.
fn argmin(costs: &[Real]) -> usize {
    let mut best = 0;
    for (i, &c) in costs.iter().enumerate() {
        if c < costs[best] || costs[best].is_nan() {
            best = i;
        }
    }
    best
}

/// Evaluate `cost` on every point of `values` and refine the best one.
fn grid_search<F>(
    values: Vec<Real>,
    subscale: usize,
    cost: &mut F,
    cancel: &CancelToken,
) -> Result<CalibrationLevel, CalibrateError>
where
    F: FnMut(Real, usize) -> anyhow::Result<Real>,
{
    let mut costs = Vec::with_capacity(values.len());
    for &v in &values {
        if cancel.is_cancelled() {
            return Err(CalibrateError::Cancelled);
        }
        let c = cost(v, subscale)?;
        debug!("subscale {subscale}: cost({v:.6}) = {c:.6e}");
        costs.push(c);
    }
    if costs.iter().all(|c| !c.is_finite()) {
        warn!("no finite cost at subscale {subscale}");
    }
    let estimate = parabolic_min(&costs, argmin(&costs), &values);
    Ok(CalibrationLevel {
        subscale,
        values,
        costs,
        estimate,
    })
}

/// Exhaustive search over `values` followed by a parabolic refinement.
pub fn optimize_modifier<F>(
    values: &[Real],
    mut cost: F,
    cancel: &CancelToken,
) -> Result<CalibrationLevel, CalibrateError>
where
    F: FnMut(Real) -> anyhow::Result<Real>,
{
    if values.is_empty() {
        return Err(CalibrateError::Validation("empty search space".into()));
    }
    grid_search(values.to_vec(), 1, &mut |v: Real, _: usize| cost(v), cancel)
}

/// Hierarchical grid search with parabolic refinement.
#[derive(Debug, Clone, Default)]
pub struct ScalarCalibrator {
    pub options: CalibratorOptions,
}

impl ScalarCalibrator {
    pub fn new(options: CalibratorOptions) -> Self {
        Self { options }
    }

    /// Minimise `cost` starting from `initial`.
    pub fn calibrate<F>(
        &self,
        initial: Real,
        pixel_size: Real,
        mut cost: F,
        cancel: &CancelToken,
    ) -> Result<CalibrationTrace, CalibrateError>
    where
        F: FnMut(Real) -> anyhow::Result<Real>,
    {
        self.calibrate_subsampled(initial, pixel_size, |v: Real, _: usize| cost(v), cancel)
    }

    /// Like [`ScalarCalibrator::calibrate`], but the cost also receives the
    /// current subscale so expensive evaluations can run at reduced
    /// resolution on coarse levels.
    pub fn calibrate_subsampled<F>(
        &self,
        initial: Real,
        pixel_size: Real,
        mut cost: F,
        cancel: &CancelToken,
    ) -> Result<CalibrationTrace, CalibrateError>
    where
        F: FnMut(Real, usize) -> anyhow::Result<Real>,
    {
        self.options.validate()?;
        if !(pixel_size.is_finite() && pixel_size > 0.0) {
            return Err(CalibrateError::Validation(format!(
                "pixel size must be positive, got {pixel_size}"
            )));
        }
        if !initial.is_finite() {
            return Err(CalibrateError::Validation(format!(
                "initial guess must be finite, got {initial}"
            )));
        }

        let mut guess = initial;
        let mut levels = Vec::new();
        let mut subscale = self.options.max_subscale;
        while subscale >= 1 {
            let half = pixel_size * subscale as Real;
            let values = linspace(guess - half, guess + half, self.options.grid_points);
            let level = grid_search(values, subscale, &mut cost, cancel)?;
            guess = level.estimate;
            info!("subscale {subscale}: estimate {guess:.6}");
            levels.push(level);
            subscale /= 2;
        }

        Ok(CalibrationTrace {
            value: guess,
            levels,
        })
    }
}

/// Minimise `cost` with a `max_subscale`-pixel initial search window.
pub fn calibrate<F>(
    initial: Real,
    cost: F,
    pixel_size: Real,
    max_subscale: usize,
    cancel: &CancelToken,
) -> Result<Real, CalibrateError>
where
    F: FnMut(Real) -> anyhow::Result<Real>,
{
    let calibrator = ScalarCalibrator::new(CalibratorOptions {
        max_subscale,
        ..Default::default()
    });
    Ok(calibrator.calibrate(initial, pixel_size, cost, cancel)?.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linspace_includes_ends() {
        let v = linspace(-1.0, 1.0, 5);
        assert_eq!(v.len(), 5);
        assert!((v[0] + 1.0).abs() < 1e-15 && (v[4] - 1.0).abs() < 1e-15);
        assert!((v[2]).abs() < 1e-15);
    }

    #[test]
    fn parabola_vertex_is_exact() {
        let space = [0.0, 1.0, 2.0, 3.0];
        let values: Vec<Real> = space.iter().map(|x| (x - 1.3) * (x - 1.3) + 2.0).collect();
        assert!((parabolic_min(&values, 1, &space) - 1.3).abs() < 1e-12);
    }

    #[test]
    fn boundary_and_flat_fall_back_to_grid_point() {
        let space = [0.0, 1.0, 2.0];
        assert_eq!(parabolic_min(&[0.0, 1.0, 2.0], 0, &space), 0.0);
        assert_eq!(parabolic_min(&[2.0, 1.0, 0.0], 2, &space), 2.0);
        assert_eq!(parabolic_min(&[1.0, 1.0, 1.0], 1, &space), 1.0);
    }

    #[test]
    fn argmin_prefers_first_and_skips_nan() {
        assert_eq!(argmin(&[2.0, 1.0, 1.0]), 1);
        assert_eq!(argmin(&[Real::NAN, 3.0, 4.0]), 1);
    }

    #[test]
    fn options_validation() {
        assert!(CalibratorOptions::default().validate().is_ok());
        for bad in [0, 3, 6, 12] {
            let opts = CalibratorOptions {
                max_subscale: bad,
                ..Default::default()
            };
            assert!(matches!(opts.validate(), Err(CalibrateError::Validation(_))));
        }
        let opts = CalibratorOptions {
            grid_points: 2,
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn options_json_uses_defaults() {
        let opts: CalibratorOptions = serde_json::from_str(r#"{"max_subscale":8}"#).unwrap();
        assert_eq!(opts.max_subscale, 8);
        assert_eq!(opts.grid_points, 5);
    }

    #[test]
    fn modifier_search_over_explicit_values() {
        let values = linspace(0.0, 1.0, 11);
        let level =
            optimize_modifier(&values, |x| Ok((x - 0.42).powi(2)), &CancelToken::new()).unwrap();
        assert!((level.estimate - 0.42).abs() < 1e-9);
        assert_eq!(level.costs.len(), 11);
        assert!(optimize_modifier(&[], |x| Ok(x), &CancelToken::new()).is_err());
    }
}
