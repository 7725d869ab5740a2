// config.rs — Run configuration.
//
// Plain struct with a `Default` matching the historical run: 1024×1280
// images, padding (0, 2, 0, 2), ten outer iterations over every device.
// The binary fills it from the command line; tests build it directly.

use std::path::PathBuf;
use std::time::Duration;

use crate::backend::DeviceClass;
use crate::gpu::device::{QueueConfig, WorkgroupSize};
use crate::image::{ImageShape, Padding};

/// Everything a run needs, from device filter to file paths.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Which devices to use.
    pub device_class: DeviceClass,
    /// Outer passes over the whole batch.
    pub iterations: usize,
    pub shape: ImageShape,
    /// Expected image count. `None` infers it from the input file size.
    pub images: Option<usize>,
    pub padding: Padding,
    pub workgroup: WorkgroupSize,
    pub queue: QueueConfig,
    /// Re-send the kernel weights before every image.
    pub reupload_kernel: bool,
    /// Enumerate wgpu adapters. Off means host devices only.
    pub probe_gpus: bool,
    /// In-process reference devices added to the pool (CPU class).
    pub host_devices: usize,
    /// Artificial per-image delay on every host device.
    pub host_latency: Duration,
    pub input_path: PathBuf,
    pub kernel_path: PathBuf,
    /// WGSL program. `None` uses the shader shipped with the crate.
    pub source_path: Option<PathBuf>,
    pub output_path: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            device_class: DeviceClass::All,
            iterations: 10,
            shape: ImageShape::new(1024, 1280),
            images: None,
            padding: Padding::new(0, 2, 0, 2),
            workgroup: WorkgroupSize::default(),
            queue: QueueConfig::default(),
            reupload_kernel: false,
            probe_gpus: true,
            host_devices: 0,
            host_latency: Duration::ZERO,
            input_path: PathBuf::from("images_in.dat"),
            kernel_path: PathBuf::from("image_kernel.dat"),
            source_path: None,
            output_path: PathBuf::from("images_out.dat"),
        }
    }
}
