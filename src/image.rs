// image.rs — Host-side image batch and correlation kernel containers.
//
// A batch is NIMAGES single-channel f32 images stored back to back in one
// contiguous row-major Vec, exactly the layout of the raw input file:
//
//   data index:  [ image 0: rows × cols ][ image 1: rows × cols ] ...
//   offset(n) = n * rows * cols
//
// Images never overlap, so the batch can be split into disjoint mutable
// slots (`slots_mut`) and handed to independent workers without locking
// the whole array.
//
// The correlation kernel is described by its padding extents:
//
//   dimension 0 (rows):    left0 above, right0 below the centre pixel
//   dimension 1 (columns): left1 left,  right1 right of the centre pixel
//
// so its footprint is (left0 + right0 + 1) × (left1 + right1 + 1) weights,
// stored row-major.

use std::fmt;

use crate::error::{DispatchError, Result};

// ---------------------------------------------------------------------------
// ImageShape
// ---------------------------------------------------------------------------

/// Dimensions of one image in the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageShape {
    pub rows: usize,
    pub cols: usize,
}

impl ImageShape {
    pub fn new(rows: usize, cols: usize) -> Self {
        ImageShape { rows, cols }
    }

    /// Number of f32 elements in one image.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size in bytes of one image, which is also the size of every
    /// per-device source and destination buffer.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.len() * std::mem::size_of::<f32>()
    }
}

impl fmt::Display for ImageShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{}", self.rows, self.cols)
    }
}

// ---------------------------------------------------------------------------
// Padding
// ---------------------------------------------------------------------------

/// Padding extents of the correlation footprint around the centre pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Padding {
    pub left0: usize,
    pub right0: usize,
    pub left1: usize,
    pub right1: usize,
}

impl Padding {
    pub fn new(left0: usize, right0: usize, left1: usize, right1: usize) -> Self {
        Padding { left0, right0, left1, right1 }
    }

    /// A 1×1 footprint.
    pub fn zero() -> Self {
        Padding::default()
    }

    /// Footprint as (rows, cols).
    #[inline]
    pub fn footprint(&self) -> (usize, usize) {
        (self.left0 + self.right0 + 1, self.left1 + self.right1 + 1)
    }

    /// Number of weights in the kernel.
    #[inline]
    pub fn kernel_len(&self) -> usize {
        let (r, c) = self.footprint();
        r * c
    }
}

impl fmt::Display for Padding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (r, c) = self.footprint();
        write!(
            f,
            "[{},{}]×[{},{}] ({r}×{c} footprint)",
            self.left0, self.right0, self.left1, self.right1
        )
    }
}

// ---------------------------------------------------------------------------
// XcorrKernel
// ---------------------------------------------------------------------------

/// Correlation weights plus the padding that defines their footprint.
#[derive(Debug, Clone, PartialEq)]
pub struct XcorrKernel {
    padding: Padding,
    weights: Vec<f32>,
}

impl XcorrKernel {
    /// Wrap a weight vector, checking it matches the footprint exactly.
    pub fn from_vec(padding: Padding, weights: Vec<f32>) -> Result<Self> {
        if weights.len() != padding.kernel_len() {
            return Err(DispatchError::Precondition(format!(
                "kernel has {} weights, padding {padding} needs {}",
                weights.len(),
                padding.kernel_len()
            )));
        }
        Ok(XcorrKernel { padding, weights })
    }

    /// All-zero weights over the given footprint.
    pub fn zeros(padding: Padding) -> Self {
        XcorrKernel {
            padding,
            weights: vec![0.0; padding.kernel_len()],
        }
    }

    /// Identity impulse: a single 1.0 at the centre of the footprint.
    ///
    /// The centre sits at (left0, left1), so for asymmetric padding the
    /// impulse lands where the correlation reads the pixel itself.
    pub fn identity(padding: Padding) -> Self {
        let mut kernel = Self::zeros(padding);
        let (_, cols) = padding.footprint();
        kernel.weights[padding.left0 * cols + padding.left1] = 1.0;
        kernel
    }

    pub fn padding(&self) -> Padding {
        self.padding
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.weights
    }
}

// ---------------------------------------------------------------------------
// ImageBatch
// ---------------------------------------------------------------------------

/// A batch of equally sized f32 images in one contiguous buffer.
#[derive(Clone, PartialEq)]
pub struct ImageBatch {
    shape: ImageShape,
    count: usize,
    data: Vec<f32>,
}

impl ImageBatch {
    /// Zero-initialised batch. Used for the output array.
    pub fn zeros(shape: ImageShape, count: usize) -> Self {
        ImageBatch {
            shape,
            count,
            data: vec![0.0; shape.len() * count],
        }
    }

    /// Wrap existing data, inferring the image count from its length.
    ///
    /// Fails with a precondition error if the length is not a whole number
    /// of images.
    pub fn from_vec(shape: ImageShape, data: Vec<f32>) -> Result<Self> {
        if shape.is_empty() {
            return Err(DispatchError::Precondition(format!(
                "image shape {shape} has no pixels"
            )));
        }
        if data.len() % shape.len() != 0 {
            return Err(DispatchError::Precondition(format!(
                "{} elements is not a whole number of {shape} images",
                data.len()
            )));
        }
        let count = data.len() / shape.len();
        Ok(ImageBatch { shape, count, data })
    }

    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    /// Number of images (NIMAGES).
    pub fn count(&self) -> usize {
        self.count
    }

    /// Element offset of image `index` within the flat array.
    #[inline]
    pub fn offset(&self, index: usize) -> usize {
        index * self.shape.len()
    }

    /// Borrow one image.
    ///
    /// # Panics
    /// Panics if `index >= count`.
    pub fn image(&self, index: usize) -> &[f32] {
        assert!(index < self.count, "image {index} out of range ({})", self.count);
        let start = self.offset(index);
        &self.data[start..start + self.shape.len()]
    }

    /// Split the batch into one disjoint mutable slot per image.
    pub fn slots_mut(&mut self) -> impl Iterator<Item = &mut [f32]> + '_ {
        // An empty shape yields no slots at all; the scheduler rejects such
        // batches before splitting them.
        let len = self.shape.len().max(1);
        self.data.chunks_mut(len)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

impl fmt::Debug for ImageBatch {
    // The data vector can be hundreds of megabytes; print metadata only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBatch")
            .field("shape", &self.shape)
            .field("count", &self.count)
            .finish()
    }
}
