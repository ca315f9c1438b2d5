// motion.rs — Inter-frame rigid motion estimation.
//
// Fits a 2D rigid transform (rotation + translation, no scale) to the
// feature correspondences the tracker produces. The least-squares
// rotation has a closed form for the rigid case:
//
//   θ = atan2( Σ (p'×q'), Σ (p'·q') )      p', q' centered point sets
//   t = q̄ − R·p̄
//
// which is the 2D orthogonal Procrustes solution. One outlier-trim
// refit pass rejects correspondences whose residual exceeds 3× the
// median, then solves again on the survivors.

use nalgebra::{Matrix3, Rotation2, Vector2};

/// Rigid motion between consecutive frames, parameterised as the
/// translation and rotation angle extracted from the fitted transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformParam {
    pub dx: f64,
    pub dy: f64,
    /// Rotation angle in radians.
    pub da: f64,
}

impl TransformParam {
    pub const ZERO: TransformParam = TransformParam {
        dx: 0.0,
        dy: 0.0,
        da: 0.0,
    };

    /// Homogeneous 3×3 rigid transform matrix for these parameters.
    pub fn to_matrix(&self) -> Matrix3<f64> {
        let (s, c) = self.da.sin_cos();
        Matrix3::new(
            c, -s, self.dx, //
            s, c, self.dy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Recover (dx, dy, da) from a rigid transform matrix.
    ///
    /// The angle comes from atan2 of the first column, which is exact
    /// for a true rotation and the stable choice when the matrix
    /// carries numerical noise.
    pub fn from_matrix(m: &Matrix3<f64>) -> TransformParam {
        TransformParam {
            dx: m[(0, 2)],
            dy: m[(1, 2)],
            da: m[(1, 0)].atan2(m[(0, 0)]),
        }
    }
}

/// Why a fit could not be produced for a frame pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EstimateError {
    /// Fewer than two usable correspondences.
    TooFewPoints { got: usize },
    /// The centered point sets have no angular spread (all points
    /// coincident after centering), so the rotation is unobservable.
    Degenerate,
}

/// Least-squares rigid motion estimator with one outlier-trim pass.
pub struct MotionEstimator {
    /// Residuals above `trim_factor × median residual` are dropped
    /// before the refit. 0 disables trimming.
    pub trim_factor: f64,
}

impl Default for MotionEstimator {
    fn default() -> Self {
        MotionEstimator { trim_factor: 3.0 }
    }
}

impl MotionEstimator {
    /// Estimate the rigid motion mapping `prev_pts` onto `curr_pts`.
    ///
    /// The slices are parallel: prev_pts[i] corresponds to curr_pts[i].
    pub fn estimate(
        &self,
        prev_pts: &[(f32, f32)],
        curr_pts: &[(f32, f32)],
    ) -> Result<TransformParam, EstimateError> {
        assert_eq!(
            prev_pts.len(),
            curr_pts.len(),
            "correspondence length mismatch: {} vs {}",
            prev_pts.len(),
            curr_pts.len()
        );

        let first = fit_rigid(prev_pts, curr_pts)?;
        if self.trim_factor <= 0.0 {
            return Ok(first);
        }

        // Residual per correspondence under the first fit.
        let rot = Rotation2::new(first.da);
        let t = Vector2::new(first.dx, first.dy);
        let mut residuals: Vec<f64> = prev_pts
            .iter()
            .zip(curr_pts)
            .map(|(&(px, py), &(qx, qy))| {
                let mapped = rot * Vector2::new(px as f64, py as f64) + t;
                (mapped - Vector2::new(qx as f64, qy as f64)).norm()
            })
            .collect();

        let mut sorted = residuals.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("residuals are finite"));
        let median = sorted[sorted.len() / 2];
        if median <= f64::EPSILON {
            // Already an exact fit. Nothing to trim.
            return Ok(first);
        }

        let cutoff = self.trim_factor * median;
        let mut kept_prev = Vec::new();
        let mut kept_curr = Vec::new();
        for (i, r) in residuals.drain(..).enumerate() {
            if r <= cutoff {
                kept_prev.push(prev_pts[i]);
                kept_curr.push(curr_pts[i]);
            }
        }

        // If trimming removed too much, keep the first fit.
        if kept_prev.len() < 2 || kept_prev.len() == prev_pts.len() {
            return Ok(first);
        }
        fit_rigid(&kept_prev, &kept_curr).or(Ok(first))
    }
}

/// Closed-form 2D rigid Procrustes fit.
fn fit_rigid(
    prev_pts: &[(f32, f32)],
    curr_pts: &[(f32, f32)],
) -> Result<TransformParam, EstimateError> {
    let n = prev_pts.len();
    if n < 2 {
        return Err(EstimateError::TooFewPoints { got: n });
    }

    let inv_n = 1.0 / n as f64;
    let mut p_mean = Vector2::zeros();
    let mut q_mean = Vector2::zeros();
    for (&(px, py), &(qx, qy)) in prev_pts.iter().zip(curr_pts) {
        p_mean += Vector2::new(px as f64, py as f64);
        q_mean += Vector2::new(qx as f64, qy as f64);
    }
    p_mean *= inv_n;
    q_mean *= inv_n;

    // θ maximises Σ q'·(R p'), which reduces to atan2 of the summed
    // cross and dot products of the centered pairs.
    let mut sum_cross = 0.0f64;
    let mut sum_dot = 0.0f64;
    let mut spread = 0.0f64;
    for (&(px, py), &(qx, qy)) in prev_pts.iter().zip(curr_pts) {
        let p = Vector2::new(px as f64, py as f64) - p_mean;
        let q = Vector2::new(qx as f64, qy as f64) - q_mean;
        sum_cross += p.x * q.y - p.y * q.x;
        sum_dot += p.x * q.x + p.y * q.y;
        spread += p.norm_squared();
    }

    // All previous points coincident: rotation is unobservable.
    if spread < 1e-9 {
        return Err(EstimateError::Degenerate);
    }

    let da = sum_cross.atan2(sum_dot);
    let rot = Rotation2::new(da);
    let t = q_mean - rot * p_mean;

    Ok(TransformParam {
        dx: t.x,
        dy: t.y,
        da,
    })
}
