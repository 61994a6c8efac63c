//! Implicit potential functions summed into the grid's density field.
//!
//! Every model has a finite support: beyond [`ImplicitModel::cutoff`] from
//! the nearest feature its contribution is exactly zero. Contributions of
//! overlapping features are added without normalization, so field values
//! may exceed the peak of a single model.

use glam::Vec3;

use crate::{
    error::ConfigError,
    geometry::{closest_on_path, distance_to_segment},
};

/// The closed set of supported potential functions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ImplicitModel {
    /// Wyvill-style piecewise quadratic metaballs.
    Metaballs { max_val: f32, range: f32 },
    /// Blinn's exponential blob. `blobiness` is negative so the
    /// potential decays with distance.
    Blinn {
        radius: f32,
        blobiness: f32,
        cutoff_val: f32,
        cutoff: f32,
    },
    /// Convolution surface with a Cauchy kernel of sharpness `sharpness`.
    Convolution { sharpness: f32, cutoff: f32 },
}

impl ImplicitModel {
    pub fn metaballs(max_val: f32, range: f32) -> Result<Self, ConfigError> {
        if !(range > 0.0) {
            return Err(ConfigError::invalid("metaballs", "range must be positive"));
        }
        Ok(Self::Metaballs { max_val, range })
    }

    /// Builds a Blinn blob whose potential equals `cutoff_val` exactly at
    /// the derived cutoff radius.
    pub fn blinn(radius: f32, blobiness: f32, cutoff_val: f32) -> Result<Self, ConfigError> {
        if !(radius > 0.0) {
            return Err(ConfigError::invalid("blinn", "radius must be positive"));
        }
        if !(blobiness < 0.0) {
            return Err(ConfigError::invalid("blinn", "blobiness must be negative"));
        }
        if !(cutoff_val > 0.0 && cutoff_val < 1.0) {
            return Err(ConfigError::invalid("blinn", "cutoff_val must lie in (0, 1)"));
        }
        let cutoff = radius * (cutoff_val.ln() / blobiness + 1.0).sqrt();
        Ok(Self::Blinn {
            radius,
            blobiness,
            cutoff_val,
            cutoff,
        })
    }

    pub fn convolution(sharpness: f32, cutoff: f32) -> Result<Self, ConfigError> {
        if !(sharpness > 0.0) {
            return Err(ConfigError::invalid(
                "convolution",
                "sharpness must be positive",
            ));
        }
        if !(cutoff > 0.0) {
            return Err(ConfigError::invalid("convolution", "cutoff must be positive"));
        }
        Ok(Self::Convolution { sharpness, cutoff })
    }

    /// Support radius of the model.
    pub fn cutoff(&self) -> f32 {
        match *self {
            ImplicitModel::Metaballs { range, .. } => range,
            ImplicitModel::Blinn { cutoff, .. } => cutoff,
            ImplicitModel::Convolution { cutoff, .. } => cutoff,
        }
    }

    /// Potential at distance `d` from a point feature, ignoring the cutoff.
    pub fn potential(&self, d: f32) -> f32 {
        match *self {
            ImplicitModel::Metaballs { max_val, range } => {
                let r = d / range;
                if d <= range / 3.0 {
                    max_val * (1.0 - 3.0 * r * r)
                } else {
                    1.5 * max_val * (1.0 - r) * (1.0 - r)
                }
            }
            ImplicitModel::Blinn {
                radius, blobiness, ..
            } => {
                let r = d / radius;
                (blobiness * (r * r - 1.0)).exp()
            }
            ImplicitModel::Convolution { sharpness, .. } => {
                let q = 1.0 + sharpness * sharpness * d * d;
                1.0 / (q * q)
            }
        }
    }

    /// Contribution of a point feature at `center`.
    pub fn eval_point(&self, p: Vec3, center: Vec3) -> f32 {
        let d = p.distance(center);
        if d >= self.cutoff() {
            return 0.0;
        }
        self.potential(d)
    }

    /// Contribution of the segment `a -> b`.
    pub fn eval_segment(&self, p: Vec3, a: Vec3, b: Vec3) -> f32 {
        let d = distance_to_segment(p, a, b);
        if d >= self.cutoff() {
            return 0.0;
        }
        match *self {
            ImplicitModel::Convolution { sharpness, .. } => convolve_segment(p, a, b, sharpness),
            _ => self.potential(d),
        }
    }

    /// Contribution of a polyline, using `hint` as the segment where the
    /// local nearest-segment search starts and `overshoot` as its patience
    /// (see [`closest_on_path`]).
    pub fn eval_path(&self, p: Vec3, path: &[Vec3], hint: usize, overshoot: usize) -> f32 {
        let Some(hit) = closest_on_path(p, path, hint, overshoot) else {
            return 0.0;
        };
        if hit.distance >= self.cutoff() {
            return 0.0;
        }
        match *self {
            ImplicitModel::Convolution { sharpness, .. } if path.len() > 1 => {
                convolve_segment(p, path[hit.segment], path[hit.segment + 1], sharpness)
            }
            _ => self.potential(hit.distance),
        }
    }
}

/// Closed-form integral of the Cauchy kernel `1 / (1 + s^2 r^2)^2` along
/// the segment `a -> b`.
///
/// `x` is the arc-length coordinate of the projection of `p` onto the
/// carrier line, measured from `a`; `h` is the distance to that line.
fn convolve_segment(p: Vec3, a: Vec3, b: Vec3, s: f32) -> f32 {
    let axis = b - a;
    let l = axis.length();
    let s2 = s * s;
    if l <= f32::EPSILON {
        let q = 1.0 + s2 * p.distance_squared(a);
        return 1.0 / (q * q);
    }
    let u = axis / l;
    let ap = p - a;
    let x = ap.dot(u);
    let h2 = (ap.length_squared() - x * x).max(0.0);

    let p2 = 1.0 + s2 * h2;
    let p1 = p2.sqrt();
    let antiderivative =
        |t: f32| t / (2.0 * p2 * (p2 + s2 * t * t)) + (s * t / p1).atan() / (2.0 * s * p2 * p1);

    antiderivative(x) - antiderivative(x - l)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_non_increasing(model: &ImplicitModel) {
        let cutoff = model.cutoff();
        let steps = 200;
        let mut prev = f32::INFINITY;
        for i in 0..steps {
            let d = cutoff * (i as f32) / (steps as f32);
            let v = model.eval_point(Vec3::new(d, 0.0, 0.0), Vec3::ZERO);
            assert!(
                v <= prev + 1e-6,
                "potential increased at d={d}: {v} > {prev}"
            );
            prev = v;
        }
        assert_eq!(model.eval_point(Vec3::new(cutoff, 0.0, 0.0), Vec3::ZERO), 0.0);
        assert_eq!(
            model.eval_point(Vec3::new(cutoff * 1.5, 0.0, 0.0), Vec3::ZERO),
            0.0
        );
    }

    #[test]
    fn metaballs_potential_is_monotone_and_bounded() {
        let model = ImplicitModel::metaballs(1.0, 2.0).unwrap();
        assert_non_increasing(&model);
        assert_relative_eq!(model.potential(0.0), 1.0);
        // Both pieces meet at a third of the range.
        assert_relative_eq!(model.potential(2.0 / 3.0), 2.0 / 3.0, epsilon = 1e-6);
        assert_relative_eq!(model.potential(2.0), 0.0);
    }

    #[test]
    fn blinn_potential_is_monotone_and_hits_cutoff_value() {
        let model = ImplicitModel::blinn(0.5, -3.0, 0.1).unwrap();
        assert_non_increasing(&model);
        let cutoff = model.cutoff();
        assert!(cutoff > 0.5);
        assert_relative_eq!(model.potential(cutoff), 0.1, epsilon = 1e-5);
        // At the nominal radius the exponent vanishes.
        assert_relative_eq!(model.potential(0.5), 1.0);
    }

    #[test]
    fn blinn_rejects_growing_parameters() {
        assert!(ImplicitModel::blinn(0.5, 3.0, 0.1).is_err());
        assert!(ImplicitModel::blinn(0.5, -3.0, 1.5).is_err());
        assert!(ImplicitModel::blinn(0.0, -3.0, 0.1).is_err());
    }

    #[test]
    fn segment_and_path_forms_use_nearest_distance() {
        let model = ImplicitModel::metaballs(1.0, 1.0).unwrap();
        let a = Vec3::ZERO;
        let b = Vec3::new(4.0, 0.0, 0.0);
        let p = Vec3::new(2.0, 0.5, 0.0);

        assert_relative_eq!(model.eval_segment(p, a, b), model.potential(0.5));

        let path = [a, Vec3::new(2.0, 0.0, 0.0), b];
        assert_relative_eq!(model.eval_path(p, &path, 0, 3), model.potential(0.5));
        assert_eq!(model.eval_path(p, &[], 0, 3), 0.0);

        // Far from the segment nothing is contributed.
        assert_eq!(model.eval_segment(Vec3::new(2.0, 3.0, 0.0), a, b), 0.0);
    }

    #[test]
    fn convolution_matches_numeric_integral() {
        let s = 2.0;
        let model = ImplicitModel::convolution(s, 10.0).unwrap();
        let a = Vec3::ZERO;
        let b = Vec3::new(1.0, 0.0, 0.0);
        let p = Vec3::new(0.3, 0.4, 0.0);

        let n = 20_000;
        let mut numeric = 0.0f64;
        for i in 0..n {
            let t = (i as f64 + 0.5) / n as f64;
            let q = a.as_dvec3().lerp(b.as_dvec3(), t);
            let r2 = p.as_dvec3().distance_squared(q);
            let k = 1.0 / (1.0 + (s as f64).powi(2) * r2);
            numeric += k * k / n as f64;
        }

        assert_relative_eq!(model.eval_segment(p, a, b) as f64, numeric, epsilon = 1e-4);
    }

    #[test]
    fn convolution_is_symmetric_along_segment() {
        let model = ImplicitModel::convolution(3.0, 10.0).unwrap();
        let a = Vec3::ZERO;
        let b = Vec3::new(2.0, 0.0, 0.0);
        let left = model.eval_segment(Vec3::new(0.5, 0.2, 0.0), a, b);
        let right = model.eval_segment(Vec3::new(1.5, 0.2, 0.0), a, b);
        assert_relative_eq!(left, right, epsilon = 1e-5);
    }

    #[test]
    fn degenerate_convolution_segment_falls_back_to_point_kernel() {
        let model = ImplicitModel::convolution(1.0, 10.0).unwrap();
        let a = Vec3::new(1.0, 0.0, 0.0);
        let p = Vec3::new(1.0, 1.0, 0.0);
        assert_relative_eq!(model.eval_segment(p, a, a), model.potential(1.0));
    }
}
