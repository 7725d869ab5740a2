// gpu/resources.rs — Per-device buffer set for the correlation pipeline.
//
// Every device owns exactly one of these for the whole run:
//
//   src      STORAGE | COPY_DST            one image, filled per dispatch
//   dst      STORAGE | COPY_SRC            one image, read back per dispatch
//   kern     STORAGE | COPY_DST            weights, uploaded at creation
//   params   UNIFORM                       shape + padding, never changes
//   staging  MAP_READ | COPY_DST           host-visible copy of dst
//
// Because none of the bound buffers is ever replaced, the bind group is
// created once here and reused for every image.

use wgpu::util::DeviceExt;

use crate::error::Result;
use crate::gpu::device::GpuContext;
use crate::gpu::program::XcorrProgram;
use crate::image::{ImageShape, XcorrKernel};

/// Uniform block matching `Params` in xcorr.wgsl. 32 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct XcorrParams {
    pub len0:   u32,
    pub len1:   u32,
    pub pad0_l: u32,
    pub pad0_r: u32,
    pub pad1_l: u32,
    pub pad1_r: u32,
    _pad:       [u32; 2],
}

impl XcorrParams {
    pub fn new(shape: ImageShape, kernel: &XcorrKernel) -> Self {
        let p = kernel.padding();
        XcorrParams {
            len0:   shape.rows as u32,
            len1:   shape.cols as u32,
            pad0_l: p.left0 as u32,
            pad0_r: p.right0 as u32,
            pad1_l: p.left1 as u32,
            pad1_r: p.right1 as u32,
            _pad:   [0; 2],
        }
    }
}

/// Device buffers plus the bind group tying them to the program.
pub struct DeviceBuffers {
    pub src: wgpu::Buffer,
    pub dst: wgpu::Buffer,
    pub kern: wgpu::Buffer,
    pub staging: wgpu::Buffer,
    pub(crate) bind_group: wgpu::BindGroup,
    pub shape: ImageShape,
    pub kernel_len: usize,
    // Bound through `bind_group`; held so the buffer lives as long as it.
    _params: wgpu::Buffer,
}

impl DeviceBuffers {
    /// Allocate the buffer set and upload the kernel weights once.
    pub fn new(
        ctx: &GpuContext,
        program: &XcorrProgram,
        shape: ImageShape,
        kernel: &XcorrKernel,
    ) -> Result<Self> {
        let image_bytes = shape.byte_len() as u64;
        let device = &ctx.device;

        ctx.scoped("Creating device buffers", || {
            let src = device.create_buffer(&wgpu::BufferDescriptor {
                label:              Some("xcorr src"),
                size:               image_bytes,
                usage:              wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let dst = device.create_buffer(&wgpu::BufferDescriptor {
                label:              Some("xcorr dst"),
                size:               image_bytes,
                usage:              wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            });
            let kern = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label:    Some("xcorr kernel"),
                contents: bytemuck::cast_slice(kernel.as_slice()),
                usage:    wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            });
            let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label:    Some("xcorr params"),
                contents: bytemuck::bytes_of(&XcorrParams::new(shape, kernel)),
                usage:    wgpu::BufferUsages::UNIFORM,
            });
            let staging = device.create_buffer(&wgpu::BufferDescriptor {
                label:              Some("xcorr readback"),
                size:               image_bytes,
                usage:              wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });

            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label:  Some("xcorr BG"),
                layout: &program.bgl,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: src.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 1, resource: dst.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 2, resource: kern.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 3, resource: params.as_entire_binding() },
                ],
            });

            DeviceBuffers {
                src,
                dst,
                kern,
                staging,
                bind_group,
                shape,
                kernel_len: kernel.as_slice().len(),
                _params: params,
            }
        })
    }

    /// Size of one image buffer in bytes.
    pub fn image_bytes(&self) -> u64 {
        self.shape.byte_len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Padding;

    #[test]
    fn test_params_layout_matches_shader() {
        assert_eq!(std::mem::size_of::<XcorrParams>(), 32);
        let kernel = XcorrKernel::zeros(Padding::new(0, 2, 1, 3));
        let p = XcorrParams::new(ImageShape::new(1024, 1280), &kernel);
        let words: &[u32] = bytemuck::cast_slice(bytemuck::bytes_of(&p));
        assert_eq!(words, &[1024, 1280, 0, 2, 1, 3, 0, 0]);
    }
}
