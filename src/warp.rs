// warp.rs — Corrective affine warp of color frames.
//
// Inverse mapping: for every output pixel we apply the inverse of the
// correction transform to find where it came from in the source frame,
// then sample there with bilinear interpolation. Forward mapping would
// leave holes; inverse mapping never does.
//
// Pixels whose source position falls outside the frame are filled by the
// border policy. Optionally the warped frame is cropped by a few border
// pixels and scaled back up, hiding the border artifacts the correction
// exposes.

use crate::error::Result;
use crate::frame::Frame;
use crate::motion::TransformParam;
use nalgebra::{Rotation2, Vector2};

/// Fill policy for output pixels that map outside the source frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderMode {
    /// Replicate the nearest edge pixel.
    Replicate,
    /// Fill with a constant value in every channel.
    Constant(u8),
}

/// Applies a rigid correction transform to color frames.
#[derive(Debug, Clone, Copy)]
pub struct FrameWarper {
    pub border: BorderMode,
    /// Horizontal border pixels to crop after warping; the vertical crop
    /// is scaled to preserve aspect ratio, and the cropped frame is
    /// resized back to the original dimensions. 0 disables cropping.
    pub border_crop: usize,
}

impl Default for FrameWarper {
    fn default() -> Self {
        FrameWarper {
            border: BorderMode::Replicate,
            border_crop: 0,
        }
    }
}

impl FrameWarper {
    /// Warp `frame` by `correction`, producing a frame of identical
    /// dimensions, format, and index.
    pub fn warp(&self, frame: &Frame, correction: &TransformParam) -> Result<Frame> {
        let w = frame.width;
        let h = frame.height;
        let channels = frame.format.channels();

        // Inverse of a rigid transform: R^T, then -R^T t.
        let rot_inv = Rotation2::new(-correction.da);
        let t = Vector2::new(correction.dx, correction.dy);

        let mut out = vec![0u8; frame.data.len()];
        for y in 0..h {
            for x in 0..w {
                let dst = Vector2::new(x as f64, y as f64);
                let src = rot_inv * (dst - t);
                let sx = src.x as f32;
                let sy = src.y as f32;

                let off = (y * w + x) * channels;
                let inside = sx >= 0.0 && sx <= (w - 1) as f32 && sy >= 0.0 && sy <= (h - 1) as f32;

                match (inside, self.border) {
                    (false, BorderMode::Constant(fill)) => {
                        for c in 0..channels {
                            out[off + c] = fill;
                        }
                    }
                    // Replicate relies on sample_channel clamping to the
                    // edge, so out-of-bounds coordinates fall through.
                    _ => {
                        for c in 0..channels {
                            out[off + c] = sample_channel(frame, sx, sy, c);
                        }
                    }
                }
            }
        }

        let warped = Frame::new(frame.index, w, h, frame.format, out)?;
        if self.border_crop == 0 {
            return Ok(warped);
        }
        crop_and_rescale(&warped, self.border_crop)
    }
}

/// Bilinear sample of one channel of an interleaved frame, clamped to
/// the frame boundary.
fn sample_channel(frame: &Frame, x: f32, y: f32, channel: usize) -> u8 {
    let channels = frame.format.channels();
    let max_x = (frame.width - 1) as f32;
    let max_y = (frame.height - 1) as f32;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(frame.width - 1);
    let y1 = (y0 + 1).min(frame.height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let at = |px: usize, py: usize| frame.data[(py * frame.width + px) * channels + channel] as f32;

    let v = (1.0 - fx) * (1.0 - fy) * at(x0, y0)
        + fx * (1.0 - fy) * at(x1, y0)
        + (1.0 - fx) * fy * at(x0, y1)
        + fx * fy * at(x1, y1);
    v.clamp(0.0, 255.0).round() as u8
}

/// Crop `crop` pixels from the left/right borders (vertical crop scaled
/// to keep aspect), then bilinearly resize back to the original size.
fn crop_and_rescale(frame: &Frame, crop: usize) -> Result<Frame> {
    let w = frame.width;
    let h = frame.height;
    let crop_y = crop * h / w;
    if 2 * crop >= w || 2 * crop_y >= h {
        // Crop would consume the whole frame; skip it.
        return Ok(frame.clone());
    }

    let inner_w = w - 2 * crop;
    let inner_h = h - 2 * crop_y;
    let channels = frame.format.channels();

    let mut out = vec![0u8; frame.data.len()];
    for y in 0..h {
        for x in 0..w {
            // Map the output pixel into the cropped interior.
            let sx = crop as f32 + x as f32 * (inner_w - 1) as f32 / (w - 1) as f32;
            let sy = crop_y as f32 + y as f32 * (inner_h - 1) as f32 / (h - 1) as f32;
            let off = (y * w + x) * channels;
            for c in 0..channels {
                out[off + c] = sample_channel(frame, sx, sy, c);
            }
        }
    }
    Frame::new(frame.index, w, h, frame.format, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    fn gradient_frame(w: usize, h: usize) -> Frame {
        let data = (0..w * h).map(|i| (i % 251) as u8).collect();
        Frame::new(0, w, h, PixelFormat::Gray8, data).unwrap()
    }

    #[test]
    fn test_identity_warp_is_lossless() {
        let frame = gradient_frame(32, 24);
        let warper = FrameWarper::default();
        let out = warper.warp(&frame, &TransformParam::ZERO).unwrap();
        assert_eq!(out.data, frame.data);
        assert_eq!(out.index, frame.index);
    }

    #[test]
    fn test_integer_translation_shifts_pixels() {
        let frame = gradient_frame(32, 24);
        let warper = FrameWarper::default();
        // dx = +3: output pixel (x, y) samples source (x - 3, y).
        let shift = TransformParam { dx: 3.0, dy: 0.0, da: 0.0 };
        let out = warper.warp(&frame, &shift).unwrap();
        for y in 0..24 {
            for x in 3..32 {
                assert_eq!(
                    out.data[y * 32 + x],
                    frame.data[y * 32 + (x - 3)],
                    "mismatch at ({x},{y})"
                );
            }
        }
    }

    #[test]
    fn test_constant_border_fill() {
        let frame = gradient_frame(16, 16);
        let warper = FrameWarper {
            border: BorderMode::Constant(7),
            border_crop: 0,
        };
        let shift = TransformParam { dx: 5.0, dy: 0.0, da: 0.0 };
        let out = warper.warp(&frame, &shift).unwrap();
        // The left 5 columns have no source and take the fill value.
        for y in 0..16 {
            for x in 0..5 {
                assert_eq!(out.data[y * 16 + x], 7, "expected fill at ({x},{y})");
            }
        }
    }

    #[test]
    fn test_replicate_border_extends_edge() {
        let frame = gradient_frame(16, 16);
        let warper = FrameWarper::default();
        let shift = TransformParam { dx: 4.0, dy: 0.0, da: 0.0 };
        let out = warper.warp(&frame, &shift).unwrap();
        for y in 0..16 {
            let edge = frame.data[y * 16];
            for x in 0..4 {
                assert_eq!(out.data[y * 16 + x], edge, "expected edge value at ({x},{y})");
            }
        }
    }

    #[test]
    fn test_rgb_channels_warp_independently() {
        let mut data = vec![0u8; 8 * 8 * 3];
        // A single saturated red pixel at (4, 4).
        data[(4 * 8 + 4) * 3] = 255;
        let frame = Frame::new(0, 8, 8, PixelFormat::Rgb8, data).unwrap();

        let warper = FrameWarper {
            border: BorderMode::Constant(0),
            border_crop: 0,
        };
        let shift = TransformParam { dx: 2.0, dy: 1.0, da: 0.0 };
        let out = warper.warp(&frame, &shift).unwrap();

        let off = ((4 + 1) * 8 + (4 + 2)) * 3;
        assert_eq!(out.data[off], 255, "red channel should move with the warp");
        assert_eq!(out.data[off + 1], 0);
        assert_eq!(out.data[off + 2], 0);
    }

    #[test]
    fn test_border_crop_preserves_dimensions() {
        let frame = gradient_frame(40, 30);
        let warper = FrameWarper {
            border: BorderMode::Replicate,
            border_crop: 2,
        };
        let out = warper.warp(&frame, &TransformParam::ZERO).unwrap();
        assert_eq!(out.width, 40);
        assert_eq!(out.height, 30);
        assert_eq!(out.data.len(), frame.data.len());
    }

    #[test]
    fn test_excessive_crop_skipped() {
        let frame = gradient_frame(8, 8);
        let warper = FrameWarper {
            border: BorderMode::Replicate,
            border_crop: 10,
        };
        let out = warper.warp(&frame, &TransformParam::ZERO).unwrap();
        assert_eq!(out.data, frame.data);
    }
}
