// gpu/xcorr.rs — `ComputeDevice` over one wgpu adapter.
//
// Bundles a context, its compiled program and its buffer set. The stages
// map onto wgpu as:
//
//   write_source      queue.write_buffer(src)                 staged, no wait
//   write_kernel      queue.write_buffer(kern)                staged, no wait
//   execute           submit one compute pass                 no wait
//   read_destination  submit dst → staging copy, map, poll    waits
//
// `queue.write_buffer` is ordered before any later submission on the same
// queue, so the single `poll` in `read_destination` covers the whole
// per-image sequence.
//
// Field order matters for drop: buffers and pipeline are released before
// the device that created them.

use log::debug;

use crate::backend::{ComputeDevice, DeviceClass};
use crate::error::{DispatchError, Result};
use crate::gpu::device::{GpuContext, WorkgroupSize};
use crate::gpu::program::XcorrProgram;
use crate::gpu::resources::DeviceBuffers;
use crate::image::{ImageShape, XcorrKernel};

pub struct GpuXcorrDevice {
    label: String,
    buffers: DeviceBuffers,
    program: XcorrProgram,
    ctx: GpuContext,
}

impl GpuXcorrDevice {
    /// Compile the program on `ctx` and allocate the buffer set for `shape`.
    pub fn new(
        ctx: GpuContext,
        source: &str,
        workgroup: WorkgroupSize,
        shape: ImageShape,
        kernel: &XcorrKernel,
    ) -> Result<Self> {
        let program = XcorrProgram::build(&ctx, source, workgroup)?;
        let buffers = DeviceBuffers::new(&ctx, &program, shape, kernel)?;
        let label = format!("{} [{:?}]", ctx.adapter_info.name, ctx.adapter_info.backend);
        let (gx, gy) = workgroup.global_size(shape.rows as u32, shape.cols as u32);
        debug!(
            "{label}: buffers ready ({} bytes per image, {} weights), global grid {gx}×{gy}",
            buffers.image_bytes(),
            buffers.kernel_len
        );
        Ok(GpuXcorrDevice { label, buffers, program, ctx })
    }

    fn check_len(&self, operation: &'static str, got: usize, want: usize) -> Result<()> {
        if got != want {
            return Err(DispatchError::compute(
                operation,
                format!("{got} elements against a buffer of {want}"),
            ));
        }
        Ok(())
    }
}

impl ComputeDevice for GpuXcorrDevice {
    fn label(&self) -> &str {
        &self.label
    }

    fn class(&self) -> DeviceClass {
        self.ctx.class()
    }

    fn shape(&self) -> ImageShape {
        self.buffers.shape
    }

    fn profiling(&self) -> bool {
        self.ctx.queue_config.profiling
    }

    fn write_source(&mut self, image: &[f32]) -> Result<()> {
        const OP: &str = "Writing to source buffer";
        self.check_len(OP, image.len(), self.buffers.shape.len())?;
        self.ctx.scoped(OP, || {
            self.ctx.queue.write_buffer(&self.buffers.src, 0, bytemuck::cast_slice(image));
        })
    }

    fn write_kernel(&mut self, weights: &[f32]) -> Result<()> {
        const OP: &str = "Writing to image kernel buffer";
        self.check_len(OP, weights.len(), self.buffers.kernel_len)?;
        self.ctx.scoped(OP, || {
            self.ctx.queue.write_buffer(&self.buffers.kern, 0, bytemuck::cast_slice(weights));
        })
    }

    fn execute(&mut self) -> Result<()> {
        let shape = self.buffers.shape;
        let (wg_x, wg_y) = self
            .program
            .workgroup
            .dispatch_size(shape.rows as u32, shape.cols as u32);

        self.ctx.scoped("Enqueueing xcorr kernel", || {
            let mut encoder = self.ctx.device.create_command_encoder(
                &wgpu::CommandEncoderDescriptor { label: Some("xcorr dispatch") },
            );
            {
                let mut pass = encoder.begin_compute_pass(
                    &wgpu::ComputePassDescriptor { label: Some("xcorr"), timestamp_writes: None },
                );
                pass.set_pipeline(&self.program.pipeline);
                pass.set_bind_group(0, &self.buffers.bind_group, &[]);
                pass.dispatch_workgroups(wg_x, wg_y, 1);
            }
            self.ctx.queue.submit(std::iter::once(encoder.finish()));
        })
    }

    fn read_destination(&mut self, out: &mut [f32]) -> Result<()> {
        const OP: &str = "Reading from destination buffer";
        self.check_len(OP, out.len(), self.buffers.shape.len())?;
        let size = self.buffers.image_bytes();

        let index = self.ctx.scoped(OP, || {
            let mut encoder = self.ctx.device.create_command_encoder(
                &wgpu::CommandEncoderDescriptor { label: Some("xcorr readback") },
            );
            encoder.copy_buffer_to_buffer(&self.buffers.dst, 0, &self.buffers.staging, 0, size);
            self.ctx.queue.submit(std::iter::once(encoder.finish()))
        })?;

        let slice = self.buffers.staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            // The receiver outlives the poll below.
            let _ = tx.send(r);
        });
        self.ctx.device.poll(wgpu::Maintain::WaitForSubmissionIndex(index));

        rx.recv()
            .map_err(|e| DispatchError::compute(OP, e))?
            .map_err(|e| DispatchError::compute(OP, e))?;
        {
            let mapped = slice.get_mapped_range();
            out.copy_from_slice(bytemuck::cast_slice(&mapped));
        }
        self.buffers.staging.unmap();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::device::{acquire_devices, default_backends, QueueConfig};
    use crate::gpu::program::DEFAULT_SOURCE;
    use crate::image::Padding;
    use crate::xcorr::xcorr;

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn test_gpu_matches_reference() {
        let shape = ImageShape::new(37, 53);
        let padding = Padding::new(1, 2, 0, 3);
        let weights: Vec<f32> = (0..padding.kernel_len()).map(|i| (i as f32 * 0.37).sin()).collect();
        let kernel = XcorrKernel::from_vec(padding, weights).unwrap();
        let image: Vec<f32> = (0..shape.len()).map(|i| ((i * 7) % 31) as f32 / 31.0).collect();
        let expected = xcorr(&image, shape, &kernel);

        let groups = acquire_devices(DeviceClass::All, default_backends(), QueueConfig::default())
            .expect("GPU adapter");
        for ctx in groups.into_iter().flat_map(|g| g.devices) {
            let mut dev =
                GpuXcorrDevice::new(ctx, DEFAULT_SOURCE, WorkgroupSize::default(), shape, &kernel)
                    .unwrap();
            dev.write_source(&image).unwrap();
            dev.execute().unwrap();
            let mut out = vec![f32::NAN; shape.len()];
            dev.read_destination(&mut out).unwrap();

            for (i, (g, c)) in out.iter().zip(&expected).enumerate() {
                assert!((g - c).abs() < 1e-4, "{}: pixel {i}: gpu {g} vs cpu {c}", dev.label());
            }
        }
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn test_broken_program_is_compile_error() {
        let groups = acquire_devices(DeviceClass::All, default_backends(), QueueConfig::default())
            .expect("GPU adapter");
        let ctx = groups.into_iter().flat_map(|g| g.devices).next().unwrap();
        let kernel = XcorrKernel::zeros(Padding::zero());
        let err = GpuXcorrDevice::new(
            ctx,
            "fn not_the_entry_point() {}",
            WorkgroupSize::default(),
            ImageShape::new(4, 4),
            &kernel,
        )
        .err()
        .unwrap();
        assert!(matches!(err, DispatchError::Compile { .. }));
    }
}
