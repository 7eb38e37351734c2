//! Control curves over `(position, value)` points.
//!
//! A `Curve` feeds node graphs (`curve`/`curf` lookups, harmonic
//! spectral envelopes). Queries outside the point range clamp to the
//! nearest endpoint.

use alloc::vec::Vec;
use core::f64::consts::PI;
use core::fmt;
use serde::{Deserialize, Serialize};

/// Interpolation between neighbouring curve points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveMode {
    /// Hold each point's value until the next point.
    Step,
    /// Straight line between points.
    #[default]
    Linear,
    /// Half-cosine ease between points.
    Cosine,
    /// Cubic Bezier with Catmull-Rom control points.
    Cubic,
}

/// A control point.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub position: f64,
    pub value: f64,
}

impl CurvePoint {
    pub const fn new(position: f64, value: f64) -> Self {
        Self { position, value }
    }
}

/// Error raised when inserting a point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CurveError {
    /// A point already sits at this position.
    DuplicatePosition(f64),
    /// Position or value is NaN or infinite.
    NonFinite,
}

impl fmt::Display for CurveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurveError::DuplicatePosition(p) => write!(f, "duplicate curve position {}", p),
            CurveError::NonFinite => write!(f, "curve point is not finite"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CurveError {}

/// Ordered control points queried by interpolation.
///
/// Invariant: positions are finite and strictly increasing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Curve {
    points: Vec<CurvePoint>,
    mode: CurveMode,
}

impl Curve {
    /// Create an empty curve.
    pub fn new(mode: CurveMode) -> Self {
        Self { points: Vec::new(), mode }
    }

    /// Build a curve from unordered points.
    pub fn from_points(points: &[CurvePoint], mode: CurveMode) -> Result<Self, CurveError> {
        let mut curve = Self::new(mode);
        for p in points {
            curve.insert(p.position, p.value)?;
        }
        Ok(curve)
    }

    /// Insert a point, keeping positions sorted. Returns its index.
    pub fn insert(&mut self, position: f64, value: f64) -> Result<usize, CurveError> {
        if !position.is_finite() || !value.is_finite() {
            return Err(CurveError::NonFinite);
        }
        let idx = self.points.partition_point(|p| p.position < position);
        if self.points.get(idx).is_some_and(|p| p.position == position) {
            return Err(CurveError::DuplicatePosition(position));
        }
        self.points.insert(idx, CurvePoint::new(position, value));
        Ok(idx)
    }

    /// Remove the point at `index`.
    pub fn remove(&mut self, index: usize) -> Option<CurvePoint> {
        (index < self.points.len()).then(|| self.points.remove(index))
    }

    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    pub fn mode(&self) -> CurveMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: CurveMode) {
        self.mode = mode;
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Value at `position`. Empty curves read as 0 and a NaN position
    /// reads as NaN.
    pub fn value_at(&self, position: f64) -> f64 {
        let pts = &self.points;
        let (first, last) = match (pts.first(), pts.last()) {
            (Some(f), Some(l)) => (f, l),
            _ => return 0.0,
        };
        if position.is_nan() {
            return f64::NAN;
        }
        if position <= first.position {
            return first.value;
        }
        if position >= last.position {
            return last.value;
        }

        // pts[i].position <= position < pts[i + 1].position
        let i = pts.partition_point(|p| p.position <= position) - 1;
        let (a, b) = (pts[i], pts[i + 1]);
        let t = (position - a.position) / (b.position - a.position);

        match self.mode {
            CurveMode::Step => a.value,
            CurveMode::Linear => a.value + (b.value - a.value) * t,
            CurveMode::Cosine => {
                let eased = (1.0 - libm::cos(PI * t)) * 0.5;
                a.value + (b.value - a.value) * eased
            }
            CurveMode::Cubic => {
                let before = if i > 0 { pts[i - 1].value } else { a.value };
                let after = pts.get(i + 2).map_or(b.value, |p| p.value);
                let c1 = a.value + (b.value - before) / 6.0;
                let c2 = b.value - (after - a.value) / 6.0;
                bezier(&[a.value, c1, c2, b.value], t)
            }
        }
    }

    /// Evaluate at each of `positions`.
    pub fn sample(&self, positions: &[f64]) -> Vec<f64> {
        positions.iter().map(|&p| self.value_at(p)).collect()
    }

    /// `n` equally spaced samples over `[l, r)`.
    pub fn bake(&self, l: f64, r: f64, n: usize) -> Vec<f64> {
        if n == 0 {
            return Vec::new();
        }
        let step = (r - l) / n as f64;
        (0..n).map(|i| self.value_at(l + step * i as f64)).collect()
    }
}

/// Bezier curve through control values `points` at parameter `t`
/// (de Casteljau). An empty slice reads as 0.
pub fn bezier(points: &[f64], t: f64) -> f64 {
    casteljau(points, t)
}

/// Like [`bezier`] but every blend uses a half-cosine eased parameter.
pub fn sine_bezier(points: &[f64], t: f64) -> f64 {
    casteljau(points, (1.0 - libm::cos(PI * t)) * 0.5)
}

fn casteljau(points: &[f64], t: f64) -> f64 {
    match points.len() {
        0 => 0.0,
        1 => points[0],
        _ => {
            let mut work: Vec<f64> = points.to_vec();
            for level in (1..work.len()).rev() {
                for i in 0..level {
                    work[i] += (work[i + 1] - work[i]) * t;
                }
            }
            work[0]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(mode: CurveMode) -> Curve {
        Curve::from_points(
            &[
                CurvePoint::new(1.0, 10.0),
                CurvePoint::new(0.0, 0.0),
                CurvePoint::new(2.0, 0.0),
            ],
            mode,
        )
        .unwrap()
    }

    #[test]
    fn from_points_sorts_by_position() {
        let curve = ramp(CurveMode::Linear);
        let positions: Vec<f64> = curve.points().iter().map(|p| p.position).collect();
        assert_eq!(positions, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn duplicate_position_rejected() {
        let mut curve = ramp(CurveMode::Linear);
        assert_eq!(curve.insert(1.0, 3.0), Err(CurveError::DuplicatePosition(1.0)));
        assert_eq!(curve.insert(f64::NAN, 3.0), Err(CurveError::NonFinite));
    }

    #[test]
    fn linear_interpolates_between_points() {
        let curve = ramp(CurveMode::Linear);
        assert_eq!(curve.value_at(0.5), 5.0);
        assert_eq!(curve.value_at(1.5), 5.0);
        assert_eq!(curve.value_at(1.0), 10.0);
    }

    #[test]
    fn clamps_outside_range() {
        let curve = ramp(CurveMode::Cubic);
        assert_eq!(curve.value_at(-3.0), 0.0);
        assert_eq!(curve.value_at(7.0), 0.0);
    }

    #[test]
    fn step_holds_left_value() {
        let curve = ramp(CurveMode::Step);
        assert_eq!(curve.value_at(0.99), 0.0);
        assert_eq!(curve.value_at(1.5), 10.0);
    }

    #[test]
    fn cosine_and_cubic_hit_points_exactly() {
        for mode in [CurveMode::Cosine, CurveMode::Cubic] {
            let curve = ramp(mode);
            assert!((curve.value_at(1.0) - 10.0).abs() < 1e-12);
            let mid = curve.value_at(0.5);
            assert!(mid > 0.0 && mid < 10.0, "{:?} midpoint {}", mode, mid);
        }
    }

    #[test]
    fn non_finite_positions() {
        let curve = ramp(CurveMode::Cubic);
        assert!(curve.value_at(f64::NAN).is_nan());
        assert_eq!(curve.value_at(f64::INFINITY), 0.0);
        assert_eq!(curve.value_at(f64::NEG_INFINITY), 0.0);
    }

    #[test]
    fn empty_curve_reads_zero() {
        assert_eq!(Curve::new(CurveMode::Linear).value_at(0.3), 0.0);
    }

    #[test]
    fn bake_samples_half_open_range() {
        let curve = ramp(CurveMode::Linear);
        assert_eq!(curve.bake(0.0, 2.0, 4), vec![0.0, 5.0, 10.0, 5.0]);
        assert!(curve.bake(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn sample_matches_value_at() {
        let curve = ramp(CurveMode::Cosine);
        let xs = [0.1, 0.7, 1.3];
        let ys = curve.sample(&xs);
        for (x, y) in xs.iter().zip(ys) {
            assert_eq!(curve.value_at(*x), y);
        }
    }

    #[test]
    fn bezier_endpoints_and_midpoint() {
        assert_eq!(bezier(&[2.0, 4.0], 0.5), 3.0);
        assert_eq!(bezier(&[0.0, 1.0, 0.0], 0.5), 0.5);
        assert_eq!(bezier(&[1.0, 5.0, 9.0], 0.0), 1.0);
        assert_eq!(bezier(&[], 0.3), 0.0);
        assert!((sine_bezier(&[0.0, 1.0], 0.5) - 0.5).abs() < 1e-12);
        assert!(sine_bezier(&[0.0, 1.0], 0.25) < 0.25);
    }
}
