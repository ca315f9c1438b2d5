// unstutter: video stabilization for shaky handheld footage.
//
// Estimates camera motion between consecutive frames with pyramidal
// Lucas-Kanade optical flow, accumulates it into a trajectory, removes
// jitter with a windowed mean over a bounded look-ahead, and warps each
// frame by the residual correction. Container decoding/encoding is left
// to the caller behind the FrameSource/FrameSink traits.

pub mod convolution;
pub mod detect;
pub mod error;
pub mod frame;
pub mod image;
pub mod klt;
pub mod motion;
pub mod pipeline;
pub mod pyramid;
pub mod trajectory;
pub mod warp;

pub use error::{Result, StabError};
pub use frame::{Frame, PixelFormat};
pub use motion::TransformParam;
pub use pipeline::{
    FrameSink, FrameSource, MemorySink, MemorySource, PipelineState, RunStats, Stabilizer,
    StabilizerConfig, StreamInfo,
};
pub use warp::BorderMode;
