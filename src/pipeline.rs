// pipeline.rs — Stabilization orchestrator.
//
// Ties every stage together into the frame-by-frame loop:
//
//   1. Pull frame, convert to grayscale, build pyramid
//   2. Detect corners in the previous frame, track them into this one
//   3. Fit the rigid transform (fall back to the last good one if the
//      fit is degenerate)
//   4. Accumulate the trajectory, enqueue the frame
//   5. Once `radius` frames of look-ahead exist, smooth + correct +
//      warp + emit the oldest buffered frame
//
// Output is delayed by `radius` frames relative to input; at end of
// stream the buffer drains with shrinking windows so the output count
// always equals the input count.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::detect::CornerDetector;
use crate::error::{Result, StabError};
use crate::frame::{Frame, PixelFormat};
use crate::image::Image;
use crate::klt::{filter_correspondences, FlowTracker};
use crate::motion::{MotionEstimator, TransformParam};
use crate::pyramid::Pyramid;
use crate::trajectory::{
    compute_correction, CorrectionLimits, TrajectoryAccumulator, TrajectorySmoother,
};
use crate::warp::{BorderMode, FrameWarper};

/// Stream properties a sink needs before it can be opened.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    pub width: usize,
    pub height: usize,
    pub frame_rate: f64,
    pub format: PixelFormat,
}

/// Supplies decoded frames in sequence order.
///
/// `next_frame` returns `Ok(None)` at end of stream — that is the
/// normal termination signal, not an error.
pub trait FrameSource {
    /// Stream metadata, available before the first frame is pulled.
    fn info(&self) -> StreamInfo;

    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Accepts stabilized frames in sequence order.
pub trait FrameSink {
    fn write(&mut self, frame: Frame) -> Result<()>;

    /// Flush and finalize. Called exactly once, after the last write.
    fn finish(&mut self) -> Result<()>;
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct StabilizerConfig {
    /// Maximum corners to detect per frame.
    pub max_corners: usize,
    /// Corner quality threshold as a fraction of the strongest response.
    pub quality_level: f32,
    /// Minimum pixel distance between detected corners.
    pub min_distance: f32,
    /// Minimum surviving correspondences for a fit to be trusted.
    pub min_correspondences: usize,
    /// Smoothing window radius in frames. Also the output delay.
    pub smoothing_radius: usize,
    /// Clamp bounds on the per-frame correction.
    pub limits: CorrectionLimits,
    /// Border fill policy for warped pixels without a source.
    pub border: BorderMode,
    /// Border pixels to crop and rescale away after warping. 0 = off.
    pub border_crop: usize,
    /// Gaussian pyramid depth for tracking.
    pub pyramid_levels: usize,
    /// Gaussian pyramid sigma.
    pub pyramid_sigma: f32,
    /// KLT patch half-size.
    pub klt_window: usize,
    /// KLT max iterations per level.
    pub klt_max_iter: usize,
    /// KLT convergence threshold in pixels.
    pub klt_epsilon: f32,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        StabilizerConfig {
            max_corners: 200,
            quality_level: 0.01,
            min_distance: 30.0,
            min_correspondences: 6,
            smoothing_radius: 30,
            limits: CorrectionLimits::default(),
            border: BorderMode::Replicate,
            border_crop: 0,
            pyramid_levels: 3,
            pyramid_sigma: 1.0,
            klt_window: 7,
            klt_max_iter: 30,
            klt_epsilon: 0.01,
        }
    }
}

impl StabilizerConfig {
    /// Reject parameter combinations that cannot produce a working
    /// pipeline, before any frame is touched.
    pub fn validate(&self) -> Result<()> {
        if self.max_corners == 0 {
            return Err(StabError::config("max_corners must be > 0"));
        }
        if !(self.quality_level > 0.0 && self.quality_level <= 1.0) {
            return Err(StabError::config(format!(
                "quality_level must be in (0, 1], got {}",
                self.quality_level
            )));
        }
        if self.min_distance < 0.0 {
            return Err(StabError::config("min_distance must be >= 0"));
        }
        if self.min_correspondences < 2 {
            return Err(StabError::config("min_correspondences must be >= 2"));
        }
        if self.pyramid_levels == 0 {
            return Err(StabError::config("pyramid_levels must be > 0"));
        }
        if self.klt_window == 0 {
            return Err(StabError::config("klt_window must be > 0"));
        }
        if self.limits.max_translation <= 0.0 || self.limits.max_rotation <= 0.0 {
            return Err(StabError::config("correction limits must be positive"));
        }
        Ok(())
    }
}

/// Orchestrator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No frame pulled yet.
    Init,
    /// Processing frames, look-ahead buffer filling/cycling.
    Streaming,
    /// Source exhausted; emitting buffered frames with shrinking windows.
    Draining,
    /// All frames emitted, sink finalized.
    Done,
    /// Unrecoverable I/O error or cancellation; no further emission.
    Failed,
}

/// Counters reported after a run.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub frames_in: u64,
    pub frames_out: u64,
    /// Frames where the fit was degenerate and the last good transform
    /// was substituted.
    pub degenerate_frames: u64,
    /// Sum of surviving correspondences over all frame pairs.
    pub total_correspondences: u64,
}

/// State carried per frame pair after motion estimation: what the
/// tracker saw between frame k-1 and frame k.
struct TrackOutcome {
    delta: TransformParam,
    correspondences: usize,
    degenerate: bool,
}

/// The stabilization pipeline.
///
/// Single logical thread of control: ingestion and emission both run on
/// the caller's thread, so the look-ahead buffer needs no locking. The
/// cancellation flag is the one piece of shared state, checked once per
/// frame boundary.
pub struct Stabilizer {
    config: StabilizerConfig,
    detector: CornerDetector,
    tracker: FlowTracker,
    estimator: MotionEstimator,
    smoother: TrajectorySmoother,
    warper: FrameWarper,

    state: PipelineState,
    /// Grayscale pyramid of the previous frame.
    prev_pyramid: Option<Pyramid>,
    /// Grayscale plane of the previous frame, kept for corner detection.
    prev_gray: Option<Image<u8>>,
    /// Frame dimensions, fixed by the first frame.
    dims: Option<(usize, usize, PixelFormat)>,
    /// Raw cumulative trajectory, one point per ingested frame.
    accumulator: TrajectoryAccumulator,
    /// Ingested frames not yet emitted. Bounded at radius + 1 entries.
    buffer: VecDeque<Frame>,
    /// Index of the next frame to emit.
    emit_index: u64,
    /// Most recent successful fit; substituted on degenerate frames.
    last_good: Option<TransformParam>,
    cancel: Arc<AtomicBool>,
    stats: RunStats,
}

impl Stabilizer {
    pub fn new(config: StabilizerConfig) -> Result<Self> {
        config.validate()?;
        let detector =
            CornerDetector::new(config.max_corners, config.quality_level, config.min_distance);
        let tracker = FlowTracker::new(
            config.klt_window,
            config.klt_max_iter,
            config.klt_epsilon,
            config.pyramid_levels,
        );
        let smoother = TrajectorySmoother::new(config.smoothing_radius);
        let warper = FrameWarper {
            border: config.border,
            border_crop: config.border_crop,
        };
        Ok(Stabilizer {
            config,
            detector,
            tracker,
            estimator: MotionEstimator::default(),
            smoother,
            warper,
            state: PipelineState::Init,
            prev_pyramid: None,
            prev_gray: None,
            dims: None,
            accumulator: TrajectoryAccumulator::new(),
            buffer: VecDeque::new(),
            emit_index: 0,
            last_good: None,
            cancel: Arc::new(AtomicBool::new(false)),
            stats: RunStats::default(),
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Handle for requesting cooperative cancellation from another
    /// thread. Checked once per frame boundary.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Run the pipeline to completion: pull every frame from `source`,
    /// write every stabilized frame to `sink`, finalize the sink.
    ///
    /// On success the output frame count equals the input frame count.
    /// On source/sink failure or cancellation the pipeline transitions
    /// to `Failed` and the error is returned; the sink is left
    /// unfinalized.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
    ) -> Result<RunStats> {
        assert_eq!(
            self.state,
            PipelineState::Init,
            "run() may only be called once per Stabilizer"
        );

        match self.run_inner(source, sink) {
            Ok(stats) => Ok(stats),
            Err(e) => {
                self.state = PipelineState::Failed;
                self.buffer.clear();
                self.prev_pyramid = None;
                self.prev_gray = None;
                Err(e)
            }
        }
    }

    fn run_inner(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
    ) -> Result<RunStats> {
        loop {
            self.check_cancelled()?;

            let frame = match source.next_frame()? {
                Some(f) => f,
                None => break,
            };

            if self.state == PipelineState::Init {
                self.ingest_first(frame)?;
                self.state = PipelineState::Streaming;
            } else {
                self.ingest(frame)?;
            }

            // Emit every frame whose full look-ahead window is present.
            while self.front_window_complete() {
                self.emit_front(sink)?;
            }
        }

        // Source exhausted: drain with shrinking right windows.
        self.state = PipelineState::Draining;
        debug!(
            buffered = self.buffer.len(),
            "source exhausted, draining look-ahead buffer"
        );
        while !self.buffer.is_empty() {
            self.check_cancelled()?;
            self.emit_front(sink)?;
        }

        sink.finish()?;
        self.state = PipelineState::Done;
        info!(
            frames_in = self.stats.frames_in,
            frames_out = self.stats.frames_out,
            degenerate = self.stats.degenerate_frames,
            "stabilization complete"
        );
        Ok(self.stats.clone())
    }

    fn check_cancelled(&mut self) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            warn!(frame = self.stats.frames_in, "cancellation requested");
            return Err(StabError::Cancelled {
                frame_index: self.stats.frames_in,
            });
        }
        Ok(())
    }

    /// First frame: establish dimensions and the tracking baseline.
    /// Its trajectory point is the origin pose.
    fn ingest_first(&mut self, frame: Frame) -> Result<()> {
        let gray = frame.to_gray()?;
        self.dims = Some((frame.width, frame.height, frame.format));
        self.prev_pyramid = Some(Pyramid::build(
            &gray,
            self.config.pyramid_levels,
            self.config.pyramid_sigma,
        ));
        self.prev_gray = Some(gray);
        self.accumulator.push(&TransformParam::ZERO);
        self.buffer.push_back(frame);
        self.stats.frames_in += 1;
        Ok(())
    }

    /// Every subsequent frame: track, fit, accumulate, enqueue.
    fn ingest(&mut self, frame: Frame) -> Result<()> {
        let (want_w, want_h, _) = self.dims.expect("dims set by first frame");
        if frame.width != want_w || frame.height != want_h {
            return Err(StabError::DimensionMismatch {
                frame_index: frame.index,
                got_w: frame.width,
                got_h: frame.height,
                want_w,
                want_h,
            });
        }

        let gray = frame.to_gray()?;
        let pyramid = Pyramid::build(&gray, self.config.pyramid_levels, self.config.pyramid_sigma);

        let outcome = self.estimate_motion(&pyramid);
        if outcome.degenerate {
            self.stats.degenerate_frames += 1;
        }
        self.stats.total_correspondences += outcome.correspondences as u64;
        debug!(
            frame = frame.index,
            flow = outcome.correspondences,
            dx = outcome.delta.dx,
            dy = outcome.delta.dy,
            da = outcome.delta.da,
            "frame motion"
        );

        self.accumulator.push(&outcome.delta);
        self.prev_pyramid = Some(pyramid);
        self.prev_gray = Some(gray);
        self.buffer.push_back(frame);
        self.stats.frames_in += 1;
        Ok(())
    }

    /// Detect corners in the previous gray frame, track them into the
    /// current pyramid, and fit the rigid transform. Degenerate fits
    /// fall back to the last good transform (zero before any success).
    fn estimate_motion(&mut self, curr_pyramid: &Pyramid) -> TrackOutcome {
        let prev_gray = self.prev_gray.as_ref().expect("previous gray frame");
        let prev_pyramid = self.prev_pyramid.as_ref().expect("previous pyramid");

        let features = self.detector.detect(prev_gray);
        let tracked = self.tracker.track(prev_pyramid, curr_pyramid, &features);
        let (prev_pts, curr_pts) = filter_correspondences(&features, &tracked);

        if prev_pts.len() < self.config.min_correspondences {
            let fallback = self.last_good.unwrap_or(TransformParam::ZERO);
            warn!(
                flow = prev_pts.len(),
                min = self.config.min_correspondences,
                "too few correspondences, reusing last good transform"
            );
            return TrackOutcome {
                delta: fallback,
                correspondences: prev_pts.len(),
                degenerate: true,
            };
        }

        match self.estimator.estimate(&prev_pts, &curr_pts) {
            Ok(delta) => {
                self.last_good = Some(delta);
                TrackOutcome {
                    delta,
                    correspondences: prev_pts.len(),
                    degenerate: false,
                }
            }
            Err(e) => {
                let fallback = self.last_good.unwrap_or(TransformParam::ZERO);
                warn!(?e, "degenerate fit, reusing last good transform");
                TrackOutcome {
                    delta: fallback,
                    correspondences: prev_pts.len(),
                    degenerate: true,
                }
            }
        }
    }

    /// Whether the oldest buffered frame has its full right window of
    /// `radius` trajectory points available.
    fn front_window_complete(&self) -> bool {
        if self.buffer.is_empty() {
            return false;
        }
        self.accumulator.len() as u64 > self.emit_index + self.config.smoothing_radius as u64
    }

    /// Smooth, correct, warp, and write the oldest buffered frame.
    fn emit_front(&mut self, sink: &mut dyn FrameSink) -> Result<()> {
        let frame = self.buffer.pop_front().expect("emit on empty buffer");
        let k = self.emit_index as usize;

        let raw = self
            .accumulator
            .point(k)
            .expect("trajectory point for buffered frame");
        let smoothed = self.smoother.smooth_at(self.accumulator.points(), k);
        let correction = compute_correction(raw, smoothed, &self.config.limits);

        let warped = self.warper.warp(&frame, &correction)?;
        sink.write(warped)?;
        self.emit_index += 1;
        self.stats.frames_out += 1;
        Ok(())
    }
}

/// In-memory frame source for tests and synthetic pipelines.
pub struct MemorySource {
    frames: VecDeque<Frame>,
    info: StreamInfo,
    /// Injected failure: error after yielding this many frames.
    fail_after: Option<u64>,
    yielded: u64,
}

impl MemorySource {
    pub fn new(frames: Vec<Frame>) -> Self {
        let info = match frames.first() {
            Some(f) => StreamInfo {
                width: f.width,
                height: f.height,
                frame_rate: 30.0,
                format: f.format,
            },
            None => StreamInfo {
                width: 0,
                height: 0,
                frame_rate: 30.0,
                format: PixelFormat::Gray8,
            },
        };
        MemorySource {
            frames: frames.into(),
            info,
            fail_after: None,
            yielded: 0,
        }
    }

    /// Fail with a source error after yielding `n` frames.
    pub fn failing_after(frames: Vec<Frame>, n: u64) -> Self {
        let mut src = MemorySource::new(frames);
        src.fail_after = Some(n);
        src
    }
}

impl FrameSource for MemorySource {
    fn info(&self) -> StreamInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(n) = self.fail_after {
            if self.yielded >= n {
                return Err(StabError::source(self.yielded, "injected source failure"));
            }
        }
        match self.frames.pop_front() {
            Some(f) => {
                self.yielded += 1;
                Ok(Some(f))
            }
            None => Ok(None),
        }
    }
}

/// In-memory frame sink for tests and synthetic pipelines.
#[derive(Default)]
pub struct MemorySink {
    pub frames: Vec<Frame>,
    pub finished: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }
}

impl FrameSink for MemorySink {
    fn write(&mut self, frame: Frame) -> Result<()> {
        assert!(!self.finished, "write after finish");
        self.frames.push(frame);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}
