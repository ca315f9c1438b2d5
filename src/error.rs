// error.rs — Error taxonomy for the stabilization pipeline.
//
// Three things can go wrong, and they are handled very differently:
//
//   1. Bad configuration — rejected up front, before any frame is touched.
//   2. Source/sink I/O failure — fatal; the pipeline transitions to FAILED
//      and the error is surfaced with the frame index it happened at.
//   3. A degenerate transform fit — NOT an error. It is recovered locally
//      by substituting the last good transform, so no variant exists for it.
//
// End of stream is also not an error: `FrameSource::next_frame` returns
// `Ok(None)`.

use thiserror::Error;

/// Top-level error type for stabilization operations.
#[derive(Debug, Error)]
pub enum StabError {
    /// Invalid configuration, detected before any frame is processed.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The frame source failed while decoding/yielding a frame.
    #[error("source error at frame {frame_index}: {message}")]
    Source { frame_index: u64, message: String },

    /// The frame sink failed while accepting an output frame.
    #[error("sink error at frame {frame_index}: {message}")]
    Sink { frame_index: u64, message: String },

    /// A frame with zero area was received; nothing can be tracked in it.
    #[error("empty frame: {width}x{height}")]
    EmptyFrame { width: usize, height: usize },

    /// Input and pipeline dimensions disagree mid-stream.
    #[error("frame {frame_index} is {got_w}x{got_h}, expected {want_w}x{want_h}")]
    DimensionMismatch {
        frame_index: u64,
        got_w: usize,
        got_h: usize,
        want_w: usize,
        want_h: usize,
    },

    /// Cooperative cancellation was requested at a frame boundary.
    #[error("cancelled at frame {frame_index}")]
    Cancelled { frame_index: u64 },
}

impl StabError {
    pub fn config(msg: impl Into<String>) -> Self {
        StabError::Config {
            message: msg.into(),
        }
    }

    pub fn source(frame_index: u64, msg: impl Into<String>) -> Self {
        StabError::Source {
            frame_index,
            message: msg.into(),
        }
    }

    pub fn sink(frame_index: u64, msg: impl Into<String>) -> Self {
        StabError::Sink {
            frame_index,
            message: msg.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StabError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_frame_index() {
        let e = StabError::source(17, "decoder hiccup");
        let msg = e.to_string();
        assert!(msg.contains("17"), "message should carry frame index: {msg}");
        assert!(msg.contains("decoder hiccup"));
    }

    #[test]
    fn test_config_error_display() {
        let e = StabError::config("quality_level must be in (0, 1]");
        assert!(e.to_string().starts_with("configuration error"));
    }
}
