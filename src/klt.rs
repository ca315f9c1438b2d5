// klt.rs — Pyramidal Lucas-Kanade optical flow tracker.
//
// Forward-additive formulation: gradients are evaluated at the warped
// position in the current frame each iteration, so the 2×2 Hessian is
// recomputed every iteration. Robust to the large displacements a shaky
// camera produces, at the cost of a few extra multiplies per pixel.
//
// Coarse-to-fine: displacement solved at the coarsest pyramid level is
// doubled and used to seed the next finer level.

use crate::detect::FeaturePoint;
use crate::image::{interpolate_bilinear, Image};
use crate::pyramid::Pyramid;

/// Outcome of tracking one feature across a frame pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackStatus {
    /// Successfully tracked to a new position.
    Tracked,
    /// The iterative solver hit a singular Hessian (textureless or
    /// degenerate patch).
    Lost,
    /// The tracked position fell outside the image bounds.
    OutOfBounds,
}

/// A feature position in the current frame, with tracking outcome.
///
/// If `status != Tracked` the position is the solver's last estimate
/// and should not be trusted.
#[derive(Debug, Clone, Copy)]
pub struct TrackedPoint {
    pub x: f32,
    pub y: f32,
    pub status: TrackStatus,
    /// Mean absolute intensity residual over the patch at the final
    /// position. Smaller = better match. Meaningful only when Tracked.
    pub error: f32,
}

/// Pyramidal forward-additive Lucas-Kanade tracker.
pub struct FlowTracker {
    /// Patch half-size. The actual patch is (2*window_size + 1)².
    pub window_size: usize,
    /// Maximum Gauss-Newton iterations per pyramid level.
    pub max_iterations: usize,
    /// Convergence threshold in pixels. Iteration stops when
    /// |delta| < epsilon.
    pub epsilon: f32,
    /// Number of pyramid levels to use; clamped to the pyramids' depth.
    pub max_levels: usize,
}

/// Result of the iterative solve at one pyramid level.
enum LkResult {
    Converged(f32, f32),
    MaxIter(f32, f32),
    Singular,
}

impl FlowTracker {
    pub fn new(window_size: usize, max_iterations: usize, epsilon: f32, max_levels: usize) -> Self {
        FlowTracker {
            window_size,
            max_iterations,
            epsilon,
            max_levels,
        }
    }

    /// Track features from the previous frame into the current frame.
    ///
    /// Takes two pre-built pyramids (as produced by `Pyramid::build`)
    /// and the features detected in the previous frame. Returns one
    /// `TrackedPoint` per input feature, in the same order.
    pub fn track(
        &self,
        prev_pyramid: &Pyramid,
        curr_pyramid: &Pyramid,
        features: &[FeaturePoint],
    ) -> Vec<TrackedPoint> {
        let num_levels = self
            .max_levels
            .min(prev_pyramid.num_levels())
            .min(curr_pyramid.num_levels());

        features
            .iter()
            .map(|feat| self.track_single(prev_pyramid, curr_pyramid, feat, num_levels))
            .collect()
    }

    /// Track one feature coarse-to-fine through the pyramid.
    fn track_single(
        &self,
        prev_pyr: &Pyramid,
        curr_pyr: &Pyramid,
        feature: &FeaturePoint,
        num_levels: usize,
    ) -> TrackedPoint {
        let mut dx = 0.0f32;
        let mut dy = 0.0f32;

        for level in (0..num_levels).rev() {
            let prev_img = &prev_pyr.levels[level];
            let curr_img = &curr_pyr.levels[level];

            let scale = 1.0 / (1u32 << level) as f32;
            let feat_x = feature.x * scale;
            let feat_y = feature.y * scale;

            // Bilinear interpolation clamps to image borders, so no
            // bounds check is needed here. A patch mostly outside the
            // image yields degenerate gradients → singular Hessian → Lost.
            match self.lk_iterate(prev_img, curr_img, feat_x, feat_y, dx, dy) {
                LkResult::Converged(new_dx, new_dy) | LkResult::MaxIter(new_dx, new_dy) => {
                    dx = new_dx;
                    dy = new_dy;
                }
                LkResult::Singular => {
                    return TrackedPoint {
                        x: feature.x + dx / scale,
                        y: feature.y + dy / scale,
                        status: TrackStatus::Lost,
                        error: f32::INFINITY,
                    };
                }
            }

            // Propagate to the next finer level.
            if level > 0 {
                dx *= 2.0;
                dy *= 2.0;
            }
        }

        let new_x = feature.x + dx;
        let new_y = feature.y + dy;

        let w = curr_pyr.levels[0].width() as f32;
        let h = curr_pyr.levels[0].height() as f32;
        if !(new_x >= 0.0 && new_x < w && new_y >= 0.0 && new_y < h) {
            return TrackedPoint {
                x: new_x,
                y: new_y,
                status: TrackStatus::OutOfBounds,
                error: f32::INFINITY,
            };
        }

        let error = self.patch_residual(
            &prev_pyr.levels[0],
            &curr_pyr.levels[0],
            feature.x,
            feature.y,
            dx,
            dy,
        );

        TrackedPoint {
            x: new_x,
            y: new_y,
            status: TrackStatus::Tracked,
            error,
        }
    }

    /// Iterative forward-additive Lucas-Kanade at one pyramid level.
    fn lk_iterate(
        &self,
        prev_img: &Image<f32>,
        curr_img: &Image<f32>,
        feat_x: f32,
        feat_y: f32,
        mut dx: f32,
        mut dy: f32,
    ) -> LkResult {
        let half_i = self.window_size as isize;

        for _iter in 0..self.max_iterations {
            // 2×2 Hessian (symmetric) and 2×1 right-hand side.
            let mut h00 = 0.0f32;
            let mut h01 = 0.0f32;
            let mut h11 = 0.0f32;
            let mut b0 = 0.0f32;
            let mut b1 = 0.0f32;

            for py in -half_i..=half_i {
                for px in -half_i..=half_i {
                    let px_f = px as f32;
                    let py_f = py as f32;

                    // Template pixel at the original feature position.
                    let t_val = interpolate_bilinear(prev_img, feat_x + px_f, feat_y + py_f);

                    // Warped pixel at feature + displacement.
                    let wx = feat_x + dx + px_f;
                    let wy = feat_y + dy + py_f;
                    let i_val = interpolate_bilinear(curr_img, wx, wy);

                    let e = t_val - i_val;

                    // Gradients at the warped position, central differences.
                    let gx = 0.5
                        * (interpolate_bilinear(curr_img, wx + 1.0, wy)
                            - interpolate_bilinear(curr_img, wx - 1.0, wy));
                    let gy = 0.5
                        * (interpolate_bilinear(curr_img, wx, wy + 1.0)
                            - interpolate_bilinear(curr_img, wx, wy - 1.0));

                    h00 += gx * gx;
                    h01 += gx * gy;
                    h11 += gy * gy;
                    b0 += gx * e;
                    b1 += gy * e;
                }
            }

            // Solve H * delta = b for the 2×2 system.
            let det = h00 * h11 - h01 * h01;
            if det.abs() < 1e-6 {
                return LkResult::Singular;
            }
            let inv_det = 1.0 / det;
            let delta_x = inv_det * (h11 * b0 - h01 * b1);
            let delta_y = inv_det * (h00 * b1 - h01 * b0);

            dx += delta_x;
            dy += delta_y;

            if delta_x * delta_x + delta_y * delta_y < self.epsilon * self.epsilon {
                return LkResult::Converged(dx, dy);
            }
        }

        LkResult::MaxIter(dx, dy)
    }

    /// Mean absolute intensity residual over the patch at the final
    /// displacement, computed at full resolution.
    fn patch_residual(
        &self,
        prev_img: &Image<f32>,
        curr_img: &Image<f32>,
        feat_x: f32,
        feat_y: f32,
        dx: f32,
        dy: f32,
    ) -> f32 {
        let half_i = self.window_size as isize;
        let mut sum = 0.0f32;
        let mut count = 0u32;
        for py in -half_i..=half_i {
            for px in -half_i..=half_i {
                let t_val = interpolate_bilinear(prev_img, feat_x + px as f32, feat_y + py as f32);
                let i_val = interpolate_bilinear(
                    curr_img,
                    feat_x + dx + px as f32,
                    feat_y + dy + py as f32,
                );
                sum += (t_val - i_val).abs();
                count += 1;
            }
        }
        sum / count as f32
    }
}

/// Keep only feature pairs where tracking succeeded.
///
/// Returns parallel (previous, current) position lists, the input to
/// rigid-motion estimation. Input slices must be the same length.
pub fn filter_correspondences(
    features: &[FeaturePoint],
    tracked: &[TrackedPoint],
) -> (Vec<(f32, f32)>, Vec<(f32, f32)>) {
    assert_eq!(
        features.len(),
        tracked.len(),
        "feature/tracked length mismatch: {} vs {}",
        features.len(),
        tracked.len()
    );
    let mut prev_pts = Vec::new();
    let mut curr_pts = Vec::new();
    for (f, t) in features.iter().zip(tracked) {
        if t.status == TrackStatus::Tracked {
            prev_pts.push((f.x, f.y));
            curr_pts.push((t.x, t.y));
        }
    }
    (prev_pts, curr_pts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::CornerDetector;

    /// Smooth blob scene: a few Gaussian bumps on a dark background.
    /// Smooth intensity is what LK's linearization assumes.
    fn make_blob_scene(w: usize, h: usize, offset_x: f32, offset_y: f32) -> Image<u8> {
        let centers = [(20.0, 20.0), (60.0, 25.0), (35.0, 55.0), (70.0, 60.0)];
        let mut img = Image::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let mut val = 10.0f32;
                for &(cx, cy) in &centers {
                    let dx = x as f32 - (cx + offset_x);
                    let dy = y as f32 - (cy + offset_y);
                    let d2 = dx * dx + dy * dy;
                    val += 200.0 * (-d2 / 50.0).exp();
                }
                img.set(x, y, val.min(255.0) as u8);
            }
        }
        img
    }

    #[test]
    fn test_zero_motion() {
        let img = make_blob_scene(96, 96, 0.0, 0.0);
        let pyr_a = Pyramid::build(&img, 3, 1.0);
        let pyr_b = Pyramid::build(&img, 3, 1.0);

        let det = CornerDetector::new(20, 0.01, 8.0);
        let features = det.detect(&img);
        assert!(!features.is_empty());

        let tracker = FlowTracker::new(7, 30, 0.01, 3);
        let tracked = tracker.track(&pyr_a, &pyr_b, &features);

        for (f, t) in features.iter().zip(&tracked) {
            assert_eq!(t.status, TrackStatus::Tracked);
            assert!(
                (t.x - f.x).abs() < 0.5 && (t.y - f.y).abs() < 0.5,
                "feature drifted under zero motion: ({:.1},{:.1}) -> ({:.1},{:.1})",
                f.x,
                f.y,
                t.x,
                t.y
            );
        }
    }

    #[test]
    fn test_known_translation() {
        let shift = 3.0f32;
        let img_a = make_blob_scene(96, 96, 0.0, 0.0);
        let img_b = make_blob_scene(96, 96, shift, 0.0);
        let pyr_a = Pyramid::build(&img_a, 3, 1.0);
        let pyr_b = Pyramid::build(&img_b, 3, 1.0);

        let det = CornerDetector::new(20, 0.01, 8.0);
        let features = det.detect(&img_a);
        assert!(!features.is_empty());

        let tracker = FlowTracker::new(7, 30, 0.01, 3);
        let tracked = tracker.track(&pyr_a, &pyr_b, &features);

        let mut good = 0;
        for (f, t) in features.iter().zip(&tracked) {
            if t.status != TrackStatus::Tracked {
                continue;
            }
            good += 1;
            assert!(
                (t.x - f.x - shift).abs() < 1.0,
                "dx = {:.2}, expected ~{shift}",
                t.x - f.x
            );
            assert!((t.y - f.y).abs() < 1.0, "dy = {:.2}, expected ~0", t.y - f.y);
        }
        assert!(good >= features.len() / 2, "too few tracked: {good}");
    }

    #[test]
    fn test_flat_patch_is_lost() {
        let flat = Image::from_vec(64, 64, vec![128u8; 64 * 64]);
        let pyr_a = Pyramid::build(&flat, 2, 1.0);
        let pyr_b = Pyramid::build(&flat, 2, 1.0);

        let features = vec![FeaturePoint {
            x: 32.0,
            y: 32.0,
            score: 1.0,
        }];
        let tracker = FlowTracker::new(7, 30, 0.01, 2);
        let tracked = tracker.track(&pyr_a, &pyr_b, &features);

        assert_eq!(tracked[0].status, TrackStatus::Lost);
    }

    #[test]
    fn test_tracked_error_is_small_on_clean_shift() {
        let img_a = make_blob_scene(96, 96, 0.0, 0.0);
        let img_b = make_blob_scene(96, 96, 2.0, 1.0);
        let pyr_a = Pyramid::build(&img_a, 3, 1.0);
        let pyr_b = Pyramid::build(&img_b, 3, 1.0);

        let det = CornerDetector::new(10, 0.01, 8.0);
        let features = det.detect(&img_a);
        let tracker = FlowTracker::new(7, 30, 0.01, 3);
        let tracked = tracker.track(&pyr_a, &pyr_b, &features);

        for t in tracked.iter().filter(|t| t.status == TrackStatus::Tracked) {
            assert!(t.error < 10.0, "residual too large: {}", t.error);
        }
    }

    #[test]
    fn test_filter_correspondences_drops_failures() {
        let features = vec![
            FeaturePoint { x: 1.0, y: 1.0, score: 1.0 },
            FeaturePoint { x: 2.0, y: 2.0, score: 1.0 },
            FeaturePoint { x: 3.0, y: 3.0, score: 1.0 },
        ];
        let tracked = vec![
            TrackedPoint { x: 1.5, y: 1.0, status: TrackStatus::Tracked, error: 0.1 },
            TrackedPoint { x: 0.0, y: 0.0, status: TrackStatus::Lost, error: f32::INFINITY },
            TrackedPoint { x: 3.5, y: 3.0, status: TrackStatus::Tracked, error: 0.2 },
        ];
        let (prev_pts, curr_pts) = filter_correspondences(&features, &tracked);
        assert_eq!(prev_pts, vec![(1.0, 1.0), (3.0, 3.0)]);
        assert_eq!(curr_pts, vec![(1.5, 1.0), (3.5, 3.0)]);
    }
}
