// run.rs — One complete run: load, acquire, dispatch, store.
//
//   1. read images + kernel (size checks, no device touched yet)
//   2. read or embed the program text
//   3. build the device pool: every matching wgpu adapter, then host devices
//   4. schedule NITERS × NIMAGES dispatches across the pool
//   5. write the output batch once
//
// Devices are dropped when `run` returns, on success and error alike.

use std::borrow::Cow;

use log::{info, warn};

use crate::backend::{ComputeDevice, DeviceClass};
use crate::config::RunConfig;
use crate::error::{DispatchError, Result};
use crate::gpu::device::{acquire_devices, default_backends};
use crate::gpu::program::DEFAULT_SOURCE;
use crate::gpu::xcorr::GpuXcorrDevice;
use crate::host::HostDevice;
use crate::image::{ImageBatch, ImageShape, XcorrKernel};
use crate::io;
use crate::scheduler::{CancelToken, ScheduleConfig, Scheduler};
use crate::throughput::ThroughputReport;

/// Outcome of a finished run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub report: ThroughputReport,
    /// NIMAGES.
    pub images: usize,
    /// Labels of the devices that took part, in scheduling order.
    pub devices: Vec<String>,
}

/// Execute a run described by `config`.
pub fn run(config: &RunConfig) -> Result<RunSummary> {
    run_with_cancel(config, CancelToken::new())
}

/// Like [`run`], stopping between dispatches once `cancel` is set.
pub fn run_with_cancel(config: &RunConfig, cancel: CancelToken) -> Result<RunSummary> {
    let input = io::read_image_batch(&config.input_path, config.shape, config.images)?;
    let kernel = io::read_kernel(&config.kernel_path, config.padding)?;
    let source: Cow<'static, str> = match &config.source_path {
        Some(path) => Cow::Owned(io::read_source(path)?),
        None => Cow::Borrowed(DEFAULT_SOURCE),
    };

    let mut devices = build_devices(config, input.shape(), &kernel, &source)?;
    let labels: Vec<String> = devices.iter().map(|d| d.label().to_string()).collect();
    for (i, label) in labels.iter().enumerate() {
        info!("device {i}: {label}");
    }

    let scheduler = Scheduler::new(ScheduleConfig {
        iterations: config.iterations,
        reupload_kernel: config.reupload_kernel,
    })
    .with_cancel_token(cancel);

    let mut output = ImageBatch::zeros(input.shape(), input.count());
    let report = scheduler.run(&mut devices, &input, &kernel, &mut output)?;
    drop(devices);

    io::write_f32_file(&config.output_path, output.as_slice())?;
    info!("wrote {} images to {}", output.count(), config.output_path.display());

    Ok(RunSummary {
        report,
        images: input.count(),
        devices: labels,
    })
}

/// Open every device passing the class filter and prepare it for `shape`.
///
/// GPUs come first, then `host_devices` in-process devices when the filter
/// admits CPUs. Fails with `DeviceUnavailable` if the pool ends up empty;
/// no program is compiled in that case.
pub fn build_devices(
    config: &RunConfig,
    shape: ImageShape,
    kernel: &XcorrKernel,
    source: &str,
) -> Result<Vec<Box<dyn ComputeDevice>>> {
    let class = config.device_class;
    let hosts = if class.accepts(DeviceClass::Cpu) {
        config.host_devices
    } else {
        0
    };
    let mut devices: Vec<Box<dyn ComputeDevice>> = Vec::new();

    if config.probe_gpus {
        match acquire_devices(class, default_backends(), config.queue) {
            Ok(groups) => {
                for group in groups {
                    info!("platform {:?}: {} devices", group.backend, group.devices.len());
                    for ctx in group.devices {
                        info!("{ctx}");
                        let device = GpuXcorrDevice::new(ctx, source, config.workgroup, shape, kernel)?;
                        devices.push(Box::new(device));
                    }
                }
            }
            Err(DispatchError::DeviceUnavailable { .. }) if hosts > 0 => {
                warn!("no {class} adapter found, continuing with {hosts} host devices");
            }
            Err(e) => return Err(e),
        }
    }

    for i in 0..hosts {
        let device = HostDevice::new(format!("host {i}"), shape, kernel)
            .with_latency(config.host_latency)
            .with_profiling(config.queue.profiling);
        devices.push(Box::new(device));
    }

    if devices.is_empty() {
        return Err(DispatchError::DeviceUnavailable { class: class.to_string() });
    }
    Ok(devices)
}
