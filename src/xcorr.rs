// xcorr.rs — CPU reference 2-D cross-correlation.
//
// This is the host-side twin of src/shaders/xcorr.wgsl. The GPU program is
// the production path; this function is the oracle every device is checked
// against and the compute body of `HostDevice`.
//
// For an output pixel (i0, i1) inside the valid region
//
//   left0 <= i0 < rows - right0   and   left1 <= i1 < cols - right1
//
// the result is
//
//   dst[i0, i1] = Σ_{a=-left0..=right0} Σ_{b=-left1..=right1}
//                   kern[(a + left0) * kcols + (b + left1)] * src[i0 + a, i1 + b]
//
// Pixels outside the valid region have an incomplete neighbourhood and are
// written as 0.0. The shader does the same so device output is fully
// defined regardless of what a reused destination buffer held before.

use crate::image::{ImageShape, XcorrKernel};

/// Cross-correlate one image into `dst`.
///
/// # Panics
/// Panics if `src` or `dst` do not hold exactly `shape.len()` elements.
pub fn xcorr_into(src: &[f32], dst: &mut [f32], shape: ImageShape, kernel: &XcorrKernel) {
    assert_eq!(src.len(), shape.len(), "source length must match shape {shape}");
    assert_eq!(dst.len(), shape.len(), "destination length must match shape {shape}");

    let p = kernel.padding();
    let (_, kcols) = p.footprint();
    let weights = kernel.as_slice();
    let ImageShape { rows, cols } = shape;

    dst.fill(0.0);

    // Footprint larger than the image: no pixel has a full neighbourhood.
    if rows < p.left0 + p.right0 + 1 || cols < p.left1 + p.right1 + 1 {
        return;
    }

    for i0 in p.left0..rows - p.right0 {
        let out_row = &mut dst[i0 * cols..(i0 + 1) * cols];
        for i1 in p.left1..cols - p.right1 {
            let mut acc = 0.0f32;
            for ka in 0..=p.left0 + p.right0 {
                let src_row = (i0 + ka - p.left0) * cols;
                let w_row = &weights[ka * kcols..(ka + 1) * kcols];
                let src_start = src_row + i1 - p.left1;
                let window = &src[src_start..src_start + kcols];
                for (w, s) in w_row.iter().zip(window) {
                    acc += w * s;
                }
            }
            out_row[i1] = acc;
        }
    }
}

/// Allocating convenience wrapper around [`xcorr_into`].
pub fn xcorr(src: &[f32], shape: ImageShape, kernel: &XcorrKernel) -> Vec<f32> {
    let mut dst = vec![0.0; shape.len()];
    xcorr_into(src, &mut dst, shape, kernel);
    dst
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Padding;

    fn ramp(shape: ImageShape) -> Vec<f32> {
        (0..shape.len()).map(|i| i as f32).collect()
    }

    #[test]
    fn test_identity_zero_padding_reproduces_input() {
        let shape = ImageShape::new(4, 5);
        let src = ramp(shape);
        let out = xcorr(&src, shape, &XcorrKernel::identity(Padding::zero()));
        assert_eq!(out, src);
    }

    #[test]
    fn test_identity_with_padding_keeps_valid_region() {
        let shape = ImageShape::new(6, 6);
        let p = Padding::new(1, 1, 1, 1);
        let src = ramp(shape);
        let out = xcorr(&src, shape, &XcorrKernel::identity(p));
        for i0 in 0..6 {
            for i1 in 0..6 {
                let v = out[i0 * 6 + i1];
                if (1..5).contains(&i0) && (1..5).contains(&i1) {
                    assert_eq!(v, src[i0 * 6 + i1], "valid pixel ({i0}, {i1})");
                } else {
                    assert_eq!(v, 0.0, "border pixel ({i0}, {i1})");
                }
            }
        }
    }

    #[test]
    fn test_zero_kernel_gives_zero_output() {
        let shape = ImageShape::new(4, 4);
        let src = vec![3.5f32; 16];
        let out = xcorr(&src, shape, &XcorrKernel::zeros(Padding::zero()));
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_box_sum_asymmetric_padding() {
        // Right-hanging 3×3 window, as in the default L0=0, R0=2, L1=0, R1=2.
        let shape = ImageShape::new(4, 4);
        let p = Padding::new(0, 2, 0, 2);
        let kernel = XcorrKernel::from_vec(p, vec![1.0; 9]).unwrap();
        let src = vec![1.0f32; 16];
        let out = xcorr(&src, shape, &kernel);
        // Valid region: rows 0..2, cols 0..2.
        assert_eq!(out[0], 9.0);
        assert_eq!(out[1], 9.0);
        assert_eq!(out[4 + 1], 9.0);
        assert_eq!(out[2], 0.0);
        assert_eq!(out[2 * 4], 0.0);
    }

    #[test]
    fn test_correlation_not_convolution() {
        // A shift kernel [0, 1] along columns reads the right neighbour.
        let shape = ImageShape::new(1, 4);
        let p = Padding::new(0, 0, 0, 1);
        let kernel = XcorrKernel::from_vec(p, vec![0.0, 1.0]).unwrap();
        let out = xcorr(&[10.0, 20.0, 30.0, 40.0], shape, &kernel);
        assert_eq!(out, vec![20.0, 30.0, 40.0, 0.0]);
    }

    #[test]
    fn test_footprint_larger_than_image() {
        let shape = ImageShape::new(2, 2);
        let kernel = XcorrKernel::identity(Padding::new(2, 2, 2, 2));
        let out = xcorr(&[1.0; 4], shape, &kernel);
        assert_eq!(out, vec![0.0; 4]);
    }
}
