// detect.rs — Shi-Tomasi corner detection ("good features to track").
//
// Corners are where the local structure tensor has two large eigenvalues —
// the patch changes in every direction, so optical flow can lock onto it.
// Shi-Tomasi scores each pixel by the *minimum* eigenvalue of the tensor,
// which directly measures how trackable the point is.
//
// Algorithm:
//   1. Sobel gradients Ix, Iy
//   2. Element-wise products Ix², Iy², Ix·Iy
//   3. Gaussian-blur each product (structure tensor window)
//   4. Response R = λ_min of the 2×2 tensor at each pixel
//   5. Keep R > quality_level × max(R)
//   6. Greedy acceptance, strongest first, enforcing pairwise separation
//      ≥ min_distance; truncate to max_corners
//
// Deterministic given fixed inputs.

use crate::convolution::{convolve_separable, gaussian_kernel_1d, sobel_x, sobel_y};
use crate::image::Image;

/// A corner detected in a source frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeaturePoint {
    pub x: f32,
    pub y: f32,
    /// Minimum-eigenvalue response. Larger = more trackable.
    pub score: f32,
}

/// Shi-Tomasi corner detector.
pub struct CornerDetector {
    /// Maximum number of corners to return.
    pub max_corners: usize,
    /// Fraction of the strongest response below which corners are
    /// rejected. Typical: 0.01.
    pub quality_level: f32,
    /// Minimum pairwise distance between accepted corners, in pixels.
    pub min_distance: f32,
    /// Half-size of the Gaussian structure-tensor window. Typical: 1–2.
    pub block_size: usize,
}

impl CornerDetector {
    pub fn new(max_corners: usize, quality_level: f32, min_distance: f32) -> Self {
        CornerDetector {
            max_corners,
            quality_level,
            min_distance,
            block_size: 2,
        }
    }

    /// Compute the minimum-eigenvalue response image.
    ///
    /// For the 2×2 structure tensor M = [[Sxx, Sxy], [Sxy, Syy]]:
    ///   λ_min = (Sxx + Syy)/2 − sqrt(((Sxx − Syy)/2)² + Sxy²)
    pub fn corner_response(&self, image: &Image<u8>) -> Image<f32> {
        let w = image.width();
        let h = image.height();

        let ix = sobel_x(image);
        let iy = sobel_y(image);

        let mut ix2 = Image::<f32>::new(w, h);
        let mut iy2 = Image::<f32>::new(w, h);
        let mut ixiy = Image::<f32>::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let gx = ix.get(x, y);
                let gy = iy.get(x, y);
                ix2.set(x, y, gx * gx);
                iy2.set(x, y, gy * gy);
                ixiy.set(x, y, gx * gy);
            }
        }

        let sigma = self.block_size as f32 * 0.5 + 0.5;
        let kernel = gaussian_kernel_1d(self.block_size, sigma);
        let sxx = convolve_separable(&ix2, &kernel, &kernel);
        let syy = convolve_separable(&iy2, &kernel, &kernel);
        let sxy = convolve_separable(&ixiy, &kernel, &kernel);

        let mut response = Image::<f32>::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let a = sxx.get(x, y);
                let b = syy.get(x, y);
                let c = sxy.get(x, y);
                let half_trace = 0.5 * (a + b);
                let discr = (0.5 * (a - b)).powi(2) + c * c;
                response.set(x, y, half_trace - discr.sqrt());
            }
        }
        response
    }

    /// Detect up to `max_corners` corners, strongest first, with pairwise
    /// separation >= `min_distance`.
    pub fn detect(&self, image: &Image<u8>) -> Vec<FeaturePoint> {
        let w = image.width();
        let h = image.height();

        // Skip a border so Sobel + Gaussian edge artifacts never qualify.
        let border = self.block_size + 2;
        if w <= 2 * border || h <= 2 * border {
            return Vec::new();
        }

        let response = self.corner_response(image);

        let mut max_r = 0.0f32;
        for y in border..(h - border) {
            for x in border..(w - border) {
                max_r = max_r.max(response.get(x, y));
            }
        }
        if max_r <= 0.0 {
            return Vec::new();
        }

        let threshold = self.quality_level * max_r;
        let mut candidates = Vec::new();
        for y in border..(h - border) {
            for x in border..(w - border) {
                let r = response.get(x, y);
                if r > threshold {
                    candidates.push(FeaturePoint {
                        x: x as f32,
                        y: y as f32,
                        score: r,
                    });
                }
            }
        }

        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).expect("scores are finite"));
        self.enforce_min_distance(&candidates, w, h)
    }

    /// Greedy minimum-distance acceptance over score-sorted candidates.
    ///
    /// An occupancy grid with cell size = min_distance keeps the neighbor
    /// search at the 3×3 surrounding cells instead of all accepted points.
    fn enforce_min_distance(
        &self,
        sorted: &[FeaturePoint],
        img_w: usize,
        img_h: usize,
    ) -> Vec<FeaturePoint> {
        if self.min_distance <= 0.0 {
            return sorted.iter().take(self.max_corners).copied().collect();
        }

        let cell = self.min_distance.ceil().max(1.0) as usize;
        let grid_cols = img_w.div_ceil(cell);
        let grid_rows = img_h.div_ceil(cell);
        let mut grid: Vec<Vec<FeaturePoint>> = vec![Vec::new(); grid_rows * grid_cols];
        let min_dist_sq = self.min_distance * self.min_distance;

        let mut accepted = Vec::new();
        for cand in sorted {
            if accepted.len() >= self.max_corners {
                break;
            }
            let col = (cand.x as usize / cell).min(grid_cols - 1);
            let row = (cand.y as usize / cell).min(grid_rows - 1);

            let mut too_close = false;
            'cells: for gy in row.saturating_sub(1)..=(row + 1).min(grid_rows - 1) {
                for gx in col.saturating_sub(1)..=(col + 1).min(grid_cols - 1) {
                    for p in &grid[gy * grid_cols + gx] {
                        let dx = p.x - cand.x;
                        let dy = p.y - cand.y;
                        if dx * dx + dy * dy < min_dist_sq {
                            too_close = true;
                            break 'cells;
                        }
                    }
                }
            }

            if !too_close {
                grid[row * grid_cols + col].push(*cand);
                accepted.push(*cand);
            }
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Chessboard: the canonical corner-detector test scene.
    fn make_chessboard(img_size: usize, cell_size: usize, lo: u8, hi: u8) -> Image<u8> {
        let mut img = Image::new(img_size, img_size);
        for y in 0..img_size {
            for x in 0..img_size {
                let val = if (x / cell_size + y / cell_size) % 2 == 0 {
                    lo
                } else {
                    hi
                };
                img.set(x, y, val);
            }
        }
        img
    }

    #[test]
    fn test_chessboard_detects_corners() {
        let img = make_chessboard(80, 10, 20, 230);
        let det = CornerDetector::new(50, 0.01, 5.0);
        let corners = det.detect(&img);
        assert!(
            corners.len() >= 10,
            "expected many corners on a chessboard, got {}",
            corners.len()
        );
    }

    #[test]
    fn test_corners_land_near_junctions() {
        let cell = 10;
        let img = make_chessboard(80, cell, 20, 230);
        let det = CornerDetector::new(50, 0.05, 5.0);
        let corners = det.detect(&img);

        let tolerance = cell as f32 / 2.0;
        for c in &corners {
            let nearest_x = (c.x / cell as f32).round() * cell as f32;
            let nearest_y = (c.y / cell as f32).round() * cell as f32;
            let dist = ((c.x - nearest_x).powi(2) + (c.y - nearest_y).powi(2)).sqrt();
            assert!(
                dist <= tolerance,
                "corner at ({:.0},{:.0}) is {dist:.1}px from nearest junction",
                c.x,
                c.y,
            );
        }
    }

    #[test]
    fn test_flat_image_no_corners() {
        let img = Image::from_vec(40, 40, vec![128u8; 1600]);
        let det = CornerDetector::new(50, 0.01, 5.0);
        assert!(det.detect(&img).is_empty(), "flat image should yield nothing");
    }

    #[test]
    fn test_max_corners_respected() {
        let img = make_chessboard(120, 10, 20, 230);
        let det = CornerDetector::new(8, 0.01, 3.0);
        let corners = det.detect(&img);
        assert!(corners.len() <= 8, "got {} corners", corners.len());
    }

    #[test]
    fn test_min_distance_enforced() {
        let img = make_chessboard(120, 10, 20, 230);
        let min_dist = 15.0f32;
        let det = CornerDetector::new(100, 0.01, min_dist);
        let corners = det.detect(&img);

        for i in 0..corners.len() {
            for j in (i + 1)..corners.len() {
                let dx = corners[i].x - corners[j].x;
                let dy = corners[i].y - corners[j].y;
                let d = (dx * dx + dy * dy).sqrt();
                assert!(
                    d >= min_dist,
                    "corners {i} and {j} are only {d:.1}px apart"
                );
            }
        }
    }

    #[test]
    fn test_sorted_strongest_first() {
        let img = make_chessboard(80, 10, 20, 230);
        let det = CornerDetector::new(50, 0.01, 5.0);
        let corners = det.detect(&img);
        for i in 1..corners.len() {
            assert!(
                corners[i - 1].score >= corners[i].score,
                "corners not sorted by score at index {i}"
            );
        }
    }

    #[test]
    fn test_image_too_small() {
        let img = Image::from_vec(6, 6, vec![128u8; 36]);
        let det = CornerDetector::new(50, 0.01, 5.0);
        assert!(det.detect(&img).is_empty());
    }

    #[test]
    fn test_deterministic() {
        let img = make_chessboard(80, 10, 20, 230);
        let det = CornerDetector::new(50, 0.01, 5.0);
        let a = det.detect(&img);
        let b = det.detect(&img);
        assert_eq!(a.len(), b.len());
        for (pa, pb) in a.iter().zip(&b) {
            assert_eq!(pa.x, pb.x);
            assert_eq!(pa.y, pb.y);
        }
    }
}
