// io.rs — Raw float files and program text.
//
// Images and kernels are headerless little-endian f32 arrays, row-major.
// Every size check happens here, before any device is touched, so a bad
// file never costs a context or a compile.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::debug;

use crate::error::{DispatchError, Result};
use crate::image::{ImageBatch, ImageShape, Padding, XcorrKernel};

const F32_BYTES: usize = std::mem::size_of::<f32>();

fn decode_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(F32_BYTES)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| DispatchError::io(path, e))
}

/// Load an image batch of `shape`, optionally requiring exactly `expected`
/// images.
pub fn read_image_batch(path: &Path, shape: ImageShape, expected: Option<usize>) -> Result<ImageBatch> {
    let bytes = read_bytes(path)?;
    let image_bytes = shape.byte_len();
    if image_bytes == 0 || bytes.len() % image_bytes != 0 {
        return Err(DispatchError::Precondition(format!(
            "{}: {} bytes is not a whole number of {shape} images ({image_bytes} bytes each)",
            path.display(),
            bytes.len()
        )));
    }
    let count = bytes.len() / image_bytes;
    if let Some(n) = expected {
        if n != count {
            return Err(DispatchError::Precondition(format!(
                "{}: holds {count} images, expected {n}",
                path.display()
            )));
        }
    }
    debug!("{}: {count} images of {shape}", path.display());
    ImageBatch::from_vec(shape, decode_f32(&bytes))
}

/// Load correlation weights for `padding`. The file must hold exactly the
/// footprint.
pub fn read_kernel(path: &Path, padding: Padding) -> Result<XcorrKernel> {
    let bytes = read_bytes(path)?;
    let want = padding.kernel_len() * F32_BYTES;
    if bytes.len() != want {
        return Err(DispatchError::Precondition(format!(
            "{}: {} bytes, a {padding} kernel needs {want}",
            path.display(),
            bytes.len()
        )));
    }
    XcorrKernel::from_vec(padding, decode_f32(&bytes))
}

/// Read the device program text.
pub fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| DispatchError::io(path, e))
}

/// Write `data` as little-endian f32, replacing any existing file.
pub fn write_f32_file(path: &Path, data: &[f32]) -> Result<()> {
    let file = fs::File::create(path).map_err(|e| DispatchError::io(path, e))?;
    let mut out = BufWriter::new(file);
    for v in data {
        out.write_all(&v.to_le_bytes()).map_err(|e| DispatchError::io(path, e))?;
    }
    out.flush().map_err(|e| DispatchError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_raw(dir: &tempfile::TempDir, name: &str, values: &[f32]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        write_f32_file(&path, values).unwrap();
        path
    }

    #[test]
    fn test_batch_count_is_inferred() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_raw(&dir, "in.dat", &[0.5; 24]);
        let batch = read_image_batch(&path, ImageShape::new(2, 4), None).unwrap();
        assert_eq!(batch.count(), 3);
        assert_eq!(batch.image(2), &[0.5; 8]);
    }

    #[test]
    fn test_partial_image_is_precondition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.dat");
        fs::write(&path, vec![0u8; 4 * 4 * 4 + 2]).unwrap();
        let err = read_image_batch(&path, ImageShape::new(4, 4), None).unwrap_err();
        assert!(matches!(err, DispatchError::Precondition(_)));
    }

    #[test]
    fn test_explicit_count_must_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_raw(&dir, "in.dat", &[0.0; 32]);
        assert!(read_image_batch(&path, ImageShape::new(4, 4), Some(2)).is_ok());
        let err = read_image_batch(&path, ImageShape::new(4, 4), Some(3)).unwrap_err();
        assert!(matches!(err, DispatchError::Precondition(_)));
    }

    #[test]
    fn test_kernel_must_fill_footprint() {
        let dir = tempfile::tempdir().unwrap();
        let padding = Padding::new(0, 2, 0, 2);
        let good = write_raw(&dir, "k9.dat", &[1.0; 9]);
        assert_eq!(read_kernel(&good, padding).unwrap().as_slice().len(), 9);
        let bad = write_raw(&dir, "k8.dat", &[1.0; 8]);
        assert!(matches!(read_kernel(&bad, padding), Err(DispatchError::Precondition(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_source(&dir.path().join("nope.wgsl")).unwrap_err();
        assert!(matches!(err, DispatchError::Io { .. }));
    }

    #[test]
    fn test_write_truncates_and_is_little_endian() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_raw(&dir, "out.dat", &[9.0; 16]);
        write_f32_file(&path, &[1.0, -2.5]).unwrap();
        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        assert_eq!(decode_f32(&bytes), vec![1.0, -2.5]);
    }
}
