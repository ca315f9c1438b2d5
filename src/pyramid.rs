// pyramid.rs — Gaussian image pyramid.
//
// Gaussian blur then 2× downsample at each level. The pyramid is what makes
// the optical flow tolerant of large inter-frame motion: the tracker solves
// for coarse displacement on the small levels and refines it down to
// sub-pixel on the full-resolution level.
//
// All levels are stored as `Image<f32>`: blur accumulation and sub-pixel
// tracking both want float precision, and converting once avoids repeated
// u8↔f32 hops per level.

use crate::convolution::{convolve_separable, gaussian_kernel_1d};
use crate::image::{Image, Pixel};

/// A Gaussian image pyramid.
///
/// `levels[0]` is the original resolution; `levels[n]` is approximately
/// `(width / 2^n, height / 2^n)`.
pub struct Pyramid {
    pub levels: Vec<Image<f32>>,
}

impl Pyramid {
    /// Build a Gaussian pyramid from an input image.
    ///
    /// # Panics
    /// Panics if `num_levels` is 0 or `sigma` is not positive.
    pub fn build<T: Pixel>(src: &Image<T>, num_levels: usize, sigma: f32) -> Self {
        assert!(num_levels >= 1, "pyramid must have at least 1 level");

        let half_size = (3.0 * sigma).ceil().max(1.0) as usize;
        let kernel = gaussian_kernel_1d(half_size, sigma);

        let mut levels = Vec::with_capacity(num_levels);
        // Level 0 is the source converted to f32, unblurred.
        levels.push(src.to_f32());

        for _ in 1..num_levels {
            let prev = levels.last().expect("at least level 0 exists");
            // Stop before a level collapses to zero area.
            if prev.width() < 2 || prev.height() < 2 {
                break;
            }
            let blurred = convolve_separable(prev, &kernel, &kernel);
            levels.push(downsample_2x(&blurred));
        }

        Pyramid { levels }
    }

    /// Number of pyramid levels actually built.
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// A specific level, 0 = finest.
    pub fn level(&self, level: usize) -> &Image<f32> {
        &self.levels[level]
    }
}

/// Downsample by 2× in both dimensions: `dst(x, y) = src(2x, 2y)`.
/// Odd dimensions drop the last row/column.
fn downsample_2x(src: &Image<f32>) -> Image<f32> {
    let new_w = src.width() / 2;
    let new_h = src.height() / 2;
    let mut dst = Image::new(new_w, new_h);

    for y in 0..new_h {
        for x in 0..new_w {
            dst.set(x, y, src.get(x * 2, y * 2));
        }
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_dimensions() {
        let img: Image<u8> = Image::new(640, 480);
        let pyr = Pyramid::build(&img, 4, 1.0);

        assert_eq!(pyr.num_levels(), 4);
        assert_eq!(pyr.level(0).width(), 640);
        assert_eq!(pyr.level(1).width(), 320);
        assert_eq!(pyr.level(2).width(), 160);
        assert_eq!(pyr.level(3).width(), 80);
        assert_eq!(pyr.level(3).height(), 60);
    }

    #[test]
    fn test_tiny_image_stops_early() {
        // A 5x5 image cannot support 4 levels; building must not panic.
        let img: Image<u8> = Image::new(5, 5);
        let pyr = Pyramid::build(&img, 4, 1.0);
        assert!(pyr.num_levels() >= 1);
        for level in &pyr.levels {
            assert!(level.width() >= 1 && level.height() >= 1);
        }
    }

    #[test]
    fn test_constant_image_stays_constant() {
        // Blur of a constant is the constant; so is its downsample.
        let img = Image::from_vec(64, 64, vec![128u8; 64 * 64]);
        let pyr = Pyramid::build(&img, 4, 1.0);

        for (lvl, level) in pyr.levels.iter().enumerate() {
            for (x, y, v) in level.pixels() {
                assert!(
                    (v - 128.0).abs() < 0.5,
                    "level {lvl} pixel ({x},{y}) = {v}, expected 128.0"
                );
            }
        }
    }

    #[test]
    fn test_single_level_is_f32_copy() {
        let img = Image::from_vec(2, 2, vec![10u8, 20, 30, 40]);
        let pyr = Pyramid::build(&img, 1, 1.0);
        assert_eq!(pyr.num_levels(), 1);
        assert!((pyr.level(0).get(0, 0) - 10.0).abs() < 1e-6);
        assert!((pyr.level(0).get(1, 1) - 40.0).abs() < 1e-6);
    }

    #[test]
    #[should_panic(expected = "at least 1")]
    fn test_zero_levels_panics() {
        let img: Image<u8> = Image::new(10, 10);
        Pyramid::build(&img, 0, 1.0);
    }
}
