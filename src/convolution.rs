// convolution.rs — Separable 1D convolution, Gaussian kernels, Sobel gradients.
//
// A 2D convolution with a separable kernel K = k_col * k_row^T decomposes
// into two 1D passes, reducing cost from O(k²) to O(2k) per pixel. Both the
// pyramid blur and the corner detector's structure tensor run through here.
//
// Border handling: clamp (replicate edge pixels). When the kernel window
// extends beyond the boundary, out-of-bounds indices snap to the nearest
// edge pixel.

use crate::image::{Image, Pixel};

/// Convolve each row of `src` with a 1D kernel (horizontal pass).
///
/// The kernel is applied centered: for a kernel of length K, the center
/// element is at index K/2.
pub fn convolve_rows<T: Pixel>(src: &Image<T>, kernel: &[f32]) -> Image<f32> {
    assert!(!kernel.is_empty(), "kernel must not be empty");
    assert!(
        kernel.len() % 2 == 1,
        "kernel length must be odd (got {})",
        kernel.len()
    );

    let w = src.width();
    let h = src.height();
    let half = (kernel.len() / 2) as isize;
    let mut dst = Image::<f32>::new(w, h);

    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0f32;
            for (ki, &kv) in kernel.iter().enumerate() {
                let sx = (x as isize + ki as isize - half).clamp(0, (w - 1) as isize) as usize;
                acc += src.get(sx, y).to_f32() * kv;
            }
            dst.set(x, y, acc);
        }
    }
    dst
}

/// Convolve each column of `src` with a 1D kernel (vertical pass).
pub fn convolve_cols(src: &Image<f32>, kernel: &[f32]) -> Image<f32> {
    assert!(!kernel.is_empty(), "kernel must not be empty");
    assert!(
        kernel.len() % 2 == 1,
        "kernel length must be odd (got {})",
        kernel.len()
    );

    let w = src.width();
    let h = src.height();
    let half = (kernel.len() / 2) as isize;
    let mut dst = Image::<f32>::new(w, h);

    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0f32;
            for (ki, &kv) in kernel.iter().enumerate() {
                let sy = (y as isize + ki as isize - half).clamp(0, (h - 1) as isize) as usize;
                acc += src.get(x, sy) * kv;
            }
            dst.set(x, y, acc);
        }
    }
    dst
}

/// Full separable 2D convolution: horizontal pass then vertical pass.
///
/// Returns `Image<f32>` regardless of input pixel type, because the
/// intermediate accumulation is in f32.
pub fn convolve_separable<T: Pixel>(
    src: &Image<T>,
    kernel_row: &[f32],
    kernel_col: &[f32],
) -> Image<f32> {
    let intermediate = convolve_rows(src, kernel_row);
    convolve_cols(&intermediate, kernel_col)
}

/// Generate a 1D Gaussian kernel of length `2 * half_size + 1`, normalized
/// so the coefficients sum to 1.0.
pub fn gaussian_kernel_1d(half_size: usize, sigma: f32) -> Vec<f32> {
    assert!(sigma > 0.0, "sigma must be positive");
    let len = 2 * half_size + 1;
    let mut kernel = Vec::with_capacity(len);
    let two_sigma_sq = 2.0 * sigma * sigma;

    for i in 0..len {
        let x = i as f32 - half_size as f32;
        kernel.push((-x * x / two_sigma_sq).exp());
    }

    let sum: f32 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel
}

// Sobel kernels are separable:
//   Sobel_x: row [-1, 0, 1] (derivative along x), col [1, 2, 1] (smooth)
//   Sobel_y: row [ 1, 2, 1] (smooth),             col [-1, 0, 1] (derivative)
const SOBEL_DERIV: [f32; 3] = [-1.0, 0.0, 1.0];
const SOBEL_SMOOTH: [f32; 3] = [1.0, 2.0, 1.0];

/// Horizontal gradient Ix via the Sobel operator. Positive values mean
/// intensity increasing to the right. Unnormalized.
pub fn sobel_x<T: Pixel>(src: &Image<T>) -> Image<f32> {
    convolve_separable(src, &SOBEL_DERIV, &SOBEL_SMOOTH)
}

/// Vertical gradient Iy via the Sobel operator. Positive values mean
/// intensity increasing downward.
pub fn sobel_y<T: Pixel>(src: &Image<T>) -> Image<f32> {
    convolve_separable(src, &SOBEL_SMOOTH, &SOBEL_DERIV)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gaussian_kernel_properties() {
        let k = gaussian_kernel_1d(2, 1.0);
        assert_eq!(k.len(), 5);
        assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        // Symmetric with the largest value at the center.
        assert!((k[0] - k[4]).abs() < 1e-6);
        assert!((k[1] - k[3]).abs() < 1e-6);
        assert!(k[2] > k[1] && k[1] > k[0]);
    }

    #[test]
    fn test_identity_kernel() {
        let data: Vec<u8> = (0..12).collect();
        let img = Image::from_vec(4, 3, data);
        let kernel = vec![0.0, 0.0, 1.0, 0.0, 0.0];
        let out = convolve_separable(&img, &kernel, &kernel);
        for y in 0..3 {
            for x in 0..4 {
                assert!(
                    (out.get(x, y) - img.get(x, y).to_f32()).abs() < 1e-6,
                    "identity mismatch at ({x}, {y})"
                );
            }
        }
    }

    #[test]
    fn test_constant_image_unchanged_by_blur() {
        let img = Image::from_vec(5, 5, vec![100.0f32; 25]);
        let k = gaussian_kernel_1d(2, 1.0);
        let out = convolve_separable(&img, &k, &k);
        for (x, y, v) in out.pixels() {
            assert!(
                (v - 100.0).abs() < 1e-4,
                "constant image changed at ({x}, {y}): {v}"
            );
        }
    }

    #[test]
    fn test_clamp_border() {
        // 1D image [10, 20, 30], kernel [0.25, 0.5, 0.25].
        // At x=0 the clamp yields pixel[-1] = pixel[0] = 10:
        //   0.25*10 + 0.5*10 + 0.25*20 = 12.5
        let img = Image::from_vec(3, 1, vec![10.0f32, 20.0, 30.0]);
        let out = convolve_rows(&img, &[0.25, 0.5, 0.25]);
        assert!((out.get(0, 0) - 12.5).abs() < 1e-6);
    }

    #[test]
    fn test_sobel_x_on_vertical_edge() {
        // Left half 0, right half 100 → strong positive Ix at the edge,
        // zero Iy away from top/bottom borders.
        let mut img = Image::<u8>::new(20, 10);
        for y in 0..10 {
            for x in 10..20 {
                img.set(x, y, 100);
            }
        }
        let ix = sobel_x(&img);
        let iy = sobel_y(&img);
        assert!(ix.get(10, 5) > 100.0, "Ix at edge = {}", ix.get(10, 5));
        assert!(ix.get(3, 5).abs() < 1e-3, "Ix in flat region should be 0");
        assert!(iy.get(10, 5).abs() < 1e-3, "Iy should be 0 on a vertical edge");
    }

    #[test]
    #[should_panic(expected = "odd")]
    fn test_even_kernel_panics() {
        let img = Image::from_vec(4, 4, vec![0.0f32; 16]);
        convolve_rows(&img, &[0.5, 0.5]);
    }
}
