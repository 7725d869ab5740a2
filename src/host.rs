// host.rs — In-process reference device.
//
// `HostDevice` implements `ComputeDevice` with plain Vec<f32> buffers and
// the CPU reference correlation. It behaves like a device with an in-order
// queue that finishes every command before returning, so "non-blocking"
// stages simply complete immediately.
//
// Two uses:
//   - tests: several host devices with different per-image latencies stand
//     in for a heterogeneous GPU pool, no adapter required;
//   - runs: `--host-devices N` adds host workers next to the GPUs.

use std::time::Duration;

use crate::backend::{ComputeDevice, DeviceClass};
use crate::error::{DispatchError, Result};
use crate::image::{ImageShape, XcorrKernel};
use crate::xcorr::xcorr_into;

/// A reference device that computes on the calling thread.
pub struct HostDevice {
    label: String,
    shape: ImageShape,
    src: Vec<f32>,
    dst: Vec<f32>,
    kernel: XcorrKernel,
    /// Extra time spent per `execute`, to simulate a slower device.
    latency: Duration,
    profiling: bool,
}

impl HostDevice {
    /// Allocate the buffer triple and upload the kernel once.
    pub fn new(label: impl Into<String>, shape: ImageShape, kernel: &XcorrKernel) -> Self {
        HostDevice {
            label: label.into(),
            shape,
            src: vec![0.0; shape.len()],
            dst: vec![0.0; shape.len()],
            kernel: kernel.clone(),
            latency: Duration::ZERO,
            profiling: false,
        }
    }

    /// Add a fixed delay to every kernel execution.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_profiling(mut self, profiling: bool) -> Self {
        self.profiling = profiling;
        self
    }
}

impl ComputeDevice for HostDevice {
    fn label(&self) -> &str {
        &self.label
    }

    fn class(&self) -> DeviceClass {
        DeviceClass::Cpu
    }

    fn shape(&self) -> ImageShape {
        self.shape
    }

    fn profiling(&self) -> bool {
        self.profiling
    }

    fn write_source(&mut self, image: &[f32]) -> Result<()> {
        if image.len() != self.src.len() {
            return Err(DispatchError::compute(
                "Writing to source buffer",
                format!("{} elements into a buffer of {}", image.len(), self.src.len()),
            ));
        }
        self.src.copy_from_slice(image);
        Ok(())
    }

    fn write_kernel(&mut self, weights: &[f32]) -> Result<()> {
        self.kernel = XcorrKernel::from_vec(self.kernel.padding(), weights.to_vec())
            .map_err(|e| DispatchError::compute("Writing to image kernel buffer", e))?;
        Ok(())
    }

    fn execute(&mut self) -> Result<()> {
        xcorr_into(&self.src, &mut self.dst, self.shape, &self.kernel);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        Ok(())
    }

    fn read_destination(&mut self, out: &mut [f32]) -> Result<()> {
        if out.len() != self.dst.len() {
            return Err(DispatchError::compute(
                "Reading from destination buffer",
                format!("{} elements from a buffer of {}", out.len(), self.dst.len()),
            ));
        }
        out.copy_from_slice(&self.dst);
        Ok(())
    }
}
