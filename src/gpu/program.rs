// gpu/program.rs — Building the correlation program for one device.
//
// The program text is WGSL with `{{WG_X}}` / `{{WG_Y}}` placeholders for the
// workgroup tile. It is specialised on the host, then compiled into a
// compute pipeline whose entry point must be named `xcorr`.
//
// Compilation happens once per device, before any image is dispatched.
// A shader that fails to parse or validate is reported with the compiler's
// log and the device it failed on; the run does not continue.
//
//
// BINDINGS
// ─────────
//   0  src     storage, read        one image, row-major f32
//   1  dst     storage, read_write  one image, row-major f32
//   2  kern    storage, read        (l0+r0+1)·(l1+r1+1) weights
//   3  params  uniform              shape + padding (XcorrParams)
//
//
// NEW WGPU / RUST CONCEPTS
// ─────────────────────────
// - `push_error_scope` / `pop_error_scope` — captures validation errors
//   raised while creating the shader module and pipeline instead of routing
//   them to the uncaptured-error handler. WGSL compile errors arrive here.

use log::info;

use crate::error::{DispatchError, Result};
use crate::gpu::device::{GpuContext, WorkgroupSize};

/// Name of the compute entry point the program must export.
pub const XCORR_ENTRY_POINT: &str = "xcorr";

/// The correlation shader shipped with the crate, used when no program
/// file is given.
pub const DEFAULT_SOURCE: &str = include_str!("../shaders/xcorr.wgsl");

/// Replace the workgroup placeholders with a concrete tile.
pub fn specialise(source: &str, workgroup: WorkgroupSize) -> String {
    source
        .replace("{{WG_X}}", &workgroup.x.to_string())
        .replace("{{WG_Y}}", &workgroup.y.to_string())
}

/// A compiled correlation pipeline and the layout its resources bind to.
pub struct XcorrProgram {
    pub(crate) pipeline: wgpu::ComputePipeline,
    pub(crate) bgl: wgpu::BindGroupLayout,
    pub workgroup: WorkgroupSize,
}

impl XcorrProgram {
    /// Compile `source` on `ctx`.
    ///
    /// Fails with `ComputeApi` if the tile exceeds the device limit, and with
    /// `Compile` (carrying the compiler log) if the shader does not build.
    pub fn build(ctx: &GpuContext, source: &str, workgroup: WorkgroupSize) -> Result<Self> {
        ctx.validate_workgroup_size(workgroup)?;
        let shader_src = specialise(source, workgroup);

        ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = ctx.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label:  Some("xcorr.wgsl"),
            source: wgpu::ShaderSource::Wgsl(shader_src.into()),
        });

        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bgl = ctx.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("xcorr BGL"),
            entries: &[
                storage(0, true),
                storage(1, false),
                storage(2, true),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = ctx.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("xcorr pipeline layout"),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });

        let pipeline = ctx.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label:               Some(XCORR_ENTRY_POINT),
            layout:              Some(&pipeline_layout),
            module:              &shader,
            entry_point:         XCORR_ENTRY_POINT,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache:               None,
        });

        if let Some(err) = pollster::block_on(ctx.device.pop_error_scope()) {
            return Err(DispatchError::Compile {
                device: ctx.adapter_info.name.clone(),
                log: err.to_string(),
            });
        }

        info!("built xcorr program on {} (workgroup {workgroup})", ctx.adapter_info.name);
        Ok(XcorrProgram { pipeline, bgl, workgroup })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(source: &str) -> std::result::Result<(), String> {
        let module = naga::front::wgsl::parse_str(source).map_err(|e| e.emit_to_string(source))?;
        naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::empty(),
        )
        .validate(&module)
        .map_err(|e| format!("{e:?}"))?;
        Ok(())
    }

    #[test]
    fn test_specialise_replaces_both_placeholders() {
        let src = specialise(DEFAULT_SOURCE, WorkgroupSize { x: 32, y: 8 });
        assert!(src.contains("@workgroup_size(32, 8, 1)"));
        assert!(!src.contains("{{WG_"));
    }

    #[test]
    fn test_default_source_compiles() {
        let src = specialise(DEFAULT_SOURCE, WorkgroupSize::default());
        validate(&src).unwrap();
    }

    #[test]
    fn test_default_source_exports_entry_point() {
        let src = specialise(DEFAULT_SOURCE, WorkgroupSize::default());
        let module = naga::front::wgsl::parse_str(&src).unwrap();
        let entry = module
            .entry_points
            .iter()
            .find(|ep| ep.name == XCORR_ENTRY_POINT)
            .expect("xcorr entry point");
        assert_eq!(entry.stage, naga::ShaderStage::Compute);
        assert_eq!(entry.workgroup_size, [16, 16, 1]);
    }

    #[test]
    fn test_broken_source_is_rejected() {
        let src = specialise(
            "@compute @workgroup_size({{WG_X}}, {{WG_Y}}, 1) fn xcorr() { let x: f32 = y; }",
            WorkgroupSize::default(),
        );
        assert!(validate(&src).is_err());
    }
}
