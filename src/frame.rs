// frame.rs — Color video frames and grayscale conversion.
//
// A `Frame` is what the external FrameSource hands us and what we hand the
// FrameSink back: an interleaved pixel grid tagged with its format and a
// monotonically increasing sequence index. The pipeline never subclasses
// or wraps frames per format — the format tag carries the capabilities
// (channel count, luma channel order) and conversions are pure functions
// dispatched on it.

use crate::error::{Result, StabError};
use crate::image::Image;

/// Pixel layout of a frame's interleaved data buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Single luminance channel.
    Gray8,
    /// Interleaved red, green, blue.
    Rgb8,
    /// Interleaved blue, green, red (the layout most decoders emit).
    Bgr8,
}

impl PixelFormat {
    /// Number of bytes per pixel.
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
        }
    }
}

/// One decoded video frame.
///
/// Immutable once constructed; each pipeline stage consumes it, then
/// forwards or discards it. `index` starts at 0 and increases by 1 per
/// frame — output frames keep the index of the input they correspond to.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub width: usize,
    pub height: usize,
    pub format: PixelFormat,
    /// Interleaved pixel data, `width * height * format.channels()` bytes.
    pub data: Vec<u8>,
}

impl Frame {
    /// Construct a frame, validating the buffer length against the
    /// dimensions and format.
    pub fn new(
        index: u64,
        width: usize,
        height: usize,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(StabError::EmptyFrame { width, height });
        }
        let expected = width * height * format.channels();
        if data.len() != expected {
            return Err(StabError::config(format!(
                "frame {index}: buffer length {} does not match {width}x{height} {format:?} ({expected} bytes)",
                data.len(),
            )));
        }
        Ok(Frame {
            index,
            width,
            height,
            format,
            data,
        })
    }

    /// Byte offset of the pixel at (x, y).
    #[inline]
    fn pixel_offset(&self, x: usize, y: usize) -> usize {
        (y * self.width + x) * self.format.channels()
    }

    /// Convert to a single-channel luminance plane using BT.601 weights
    /// (Y = 0.299 R + 0.587 G + 0.114 B). `Gray8` input is copied through.
    ///
    /// This is the pipeline's only color-dependent step; everything
    /// downstream of it tracks on the gray plane.
    pub fn to_gray(&self) -> Result<Image<u8>> {
        if self.width == 0 || self.height == 0 {
            return Err(StabError::EmptyFrame {
                width: self.width,
                height: self.height,
            });
        }

        let mut gray = Image::new(self.width, self.height);
        match self.format {
            PixelFormat::Gray8 => {
                for y in 0..self.height {
                    for x in 0..self.width {
                        gray.set(x, y, self.data[self.pixel_offset(x, y)]);
                    }
                }
            }
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => {
                // Channel order differs; luma weights do not.
                let (ri, gi, bi) = match self.format {
                    PixelFormat::Rgb8 => (0, 1, 2),
                    PixelFormat::Bgr8 => (2, 1, 0),
                    PixelFormat::Gray8 => unreachable!(),
                };
                for y in 0..self.height {
                    for x in 0..self.width {
                        let off = self.pixel_offset(x, y);
                        let r = self.data[off + ri] as f32;
                        let g = self.data[off + gi] as f32;
                        let b = self.data[off + bi] as f32;
                        let luma = 0.299 * r + 0.587 * g + 0.114 * b;
                        gray.set(x, y, luma.clamp(0.0, 255.0).round() as u8);
                    }
                }
            }
        }
        Ok(gray)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gray_passthrough() {
        let data = vec![0u8, 64, 128, 255];
        let frame = Frame::new(0, 2, 2, PixelFormat::Gray8, data).unwrap();
        let gray = frame.to_gray().unwrap();
        assert_eq!(gray.get(0, 0), 0);
        assert_eq!(gray.get(1, 0), 64);
        assert_eq!(gray.get(0, 1), 128);
        assert_eq!(gray.get(1, 1), 255);
    }

    #[test]
    fn test_rgb_luma_weights() {
        // Pure red, green, blue, white pixels.
        let data = vec![
            255, 0, 0, //
            0, 255, 0, //
            0, 0, 255, //
            255, 255, 255,
        ];
        let frame = Frame::new(0, 2, 2, PixelFormat::Rgb8, data).unwrap();
        let gray = frame.to_gray().unwrap();
        assert_eq!(gray.get(0, 0), (0.299f32 * 255.0).round() as u8);
        assert_eq!(gray.get(1, 0), (0.587f32 * 255.0).round() as u8);
        assert_eq!(gray.get(0, 1), (0.114f32 * 255.0).round() as u8);
        assert_eq!(gray.get(1, 1), 255);
    }

    #[test]
    fn test_bgr_swaps_channel_order() {
        // The same physical red pixel, stored BGR.
        let rgb = Frame::new(0, 1, 1, PixelFormat::Rgb8, vec![255, 0, 0]).unwrap();
        let bgr = Frame::new(0, 1, 1, PixelFormat::Bgr8, vec![0, 0, 255]).unwrap();
        assert_eq!(
            rgb.to_gray().unwrap().get(0, 0),
            bgr.to_gray().unwrap().get(0, 0)
        );
    }

    #[test]
    fn test_zero_area_rejected() {
        let err = Frame::new(0, 0, 10, PixelFormat::Gray8, vec![]).unwrap_err();
        assert!(matches!(err, StabError::EmptyFrame { .. }));
    }

    #[test]
    fn test_buffer_length_validated() {
        let err = Frame::new(3, 2, 2, PixelFormat::Rgb8, vec![0u8; 5]).unwrap_err();
        assert!(matches!(err, StabError::Config { .. }));
    }
}
