// trajectory.rs — Trajectory accumulation, smoothing, and correction.
//
// The camera's cumulative pose is the prefix-sum of the per-frame rigid
// transforms. Smoothing that trajectory with a windowed mean separates
// intentional motion (low-frequency panning, which survives averaging)
// from unintentional jitter (high-frequency shake, which is averaged
// out). The per-frame correction is then smoothed-minus-raw pose.

use crate::motion::TransformParam;

/// Cumulative camera pose at a frame index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryPoint {
    pub x: f64,
    pub y: f64,
    /// Cumulative rotation angle in radians.
    pub a: f64,
}

impl TrajectoryPoint {
    pub const ORIGIN: TrajectoryPoint = TrajectoryPoint { x: 0.0, y: 0.0, a: 0.0 };
}

/// Prefix-sum integrator for per-frame transforms.
///
/// The trajectory is append-only: point k is the sum of all deltas up
/// to and including frame k, and is never revised. Frame 0 carries the
/// origin pose.
#[derive(Debug, Default)]
pub struct TrajectoryAccumulator {
    points: Vec<TrajectoryPoint>,
}

impl TrajectoryAccumulator {
    pub fn new() -> Self {
        TrajectoryAccumulator { points: Vec::new() }
    }

    /// Integrate the next per-frame delta and return the new pose.
    pub fn push(&mut self, delta: &TransformParam) -> TrajectoryPoint {
        let prev = self.points.last().copied().unwrap_or(TrajectoryPoint::ORIGIN);
        let next = TrajectoryPoint {
            x: prev.x + delta.dx,
            y: prev.y + delta.dy,
            a: prev.a + delta.da,
        };
        self.points.push(next);
        next
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, index: usize) -> Option<TrajectoryPoint> {
        self.points.get(index).copied()
    }

    pub fn points(&self) -> &[TrajectoryPoint] {
        &self.points
    }
}

/// Sliding windowed-mean smoother with radius `radius`.
///
/// The smoothed pose at frame k is the arithmetic mean over the raw
/// points in `[k-radius, k+radius]`, truncated at stream boundaries so
/// early and late frames average over fewer samples. Radius 0 is the
/// identity.
#[derive(Debug, Clone, Copy)]
pub struct TrajectorySmoother {
    pub radius: usize,
}

impl TrajectorySmoother {
    pub fn new(radius: usize) -> Self {
        TrajectorySmoother { radius }
    }

    /// Smooth point `index` of `raw`.
    ///
    /// The caller is responsible for having `min(index + radius, len-1)`
    /// points available; with fewer, the window silently truncates on
    /// the right, which is exactly the end-of-stream drain behavior.
    ///
    /// Panics if `index` is out of range.
    pub fn smooth_at(&self, raw: &[TrajectoryPoint], index: usize) -> TrajectoryPoint {
        assert!(
            index < raw.len(),
            "smooth index {index} out of range (len {})",
            raw.len()
        );
        let lo = index.saturating_sub(self.radius);
        let hi = (index + self.radius).min(raw.len() - 1);

        let mut sum = TrajectoryPoint::ORIGIN;
        for p in &raw[lo..=hi] {
            sum.x += p.x;
            sum.y += p.y;
            sum.a += p.a;
        }
        let n = (hi - lo + 1) as f64;
        TrajectoryPoint {
            x: sum.x / n,
            y: sum.y / n,
            a: sum.a / n,
        }
    }
}

/// Bounds applied to per-frame corrections.
///
/// Oversized corrections crop excessive border or flip the frame, so
/// they are clamped rather than rejected; quality degrades but the
/// stream continues.
#[derive(Debug, Clone, Copy)]
pub struct CorrectionLimits {
    /// Maximum |dx| and |dy| in pixels.
    pub max_translation: f64,
    /// Maximum |da| in radians.
    pub max_rotation: f64,
}

impl Default for CorrectionLimits {
    fn default() -> Self {
        CorrectionLimits {
            max_translation: 100.0,
            max_rotation: 0.5,
        }
    }
}

/// Corrective transform for one frame: smoothed pose minus raw pose,
/// clamped to `limits`.
pub fn compute_correction(
    raw: TrajectoryPoint,
    smoothed: TrajectoryPoint,
    limits: &CorrectionLimits,
) -> TransformParam {
    TransformParam {
        dx: (smoothed.x - raw.x).clamp(-limits.max_translation, limits.max_translation),
        dy: (smoothed.y - raw.y).clamp(-limits.max_translation, limits.max_translation),
        da: (smoothed.a - raw.a).clamp(-limits.max_rotation, limits.max_rotation),
    }
}
