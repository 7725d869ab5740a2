// gpu/device.rs — Adapter discovery, per-device contexts and queues.
//
// Responsibilities:
//   - Enumerate adapters on the selected backends (one backend = one
//     "platform") and keep those whose class passes the filter.
//   - Open one `wgpu::Device` + `wgpu::Queue` per adapter. The pair is the
//     device's private context and command queue; nothing is shared across
//     adapters.
//   - Wrap compute-API calls in error scopes so a failing call becomes a
//     `DispatchError::ComputeApi` naming the operation instead of a panic.
//   - Provide `WorkgroupSize`, the local tile used by every dispatch.
//
// CONTEXT FAILURES
// A matching adapter whose `request_device` fails is excluded with a
// warning; the registry only fails when no context could be opened at all.
//
// BACKENDS
// Vulkan by default. Listing the same GPU through two backends (e.g.
// Vulkan and GL) would give it two queues and double-count it, so other
// backends are opt-in via the WGPU_BACKEND environment variable.
//
// NEW RUST CONCEPTS:
// - `pollster::block_on` drives wgpu's async device request and error-scope
//   futures to completion on the calling thread.
// - Generic helper `open_matching` takes closures for "describe" and
//   "open", which lets the exclusion policy be tested without an adapter.

use std::fmt;
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::backend::DeviceClass;
use crate::error::{DispatchError, Result};

/// Queue creation flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueConfig {
    /// Request out-of-order execution. wgpu queues are always in-order, so
    /// this is logged and ignored.
    pub out_of_order: bool,
    /// Time each pipeline stage on the host and report it per device.
    pub profiling: bool,
}

/// A workgroup (local tile) size for the 2-D correlation dispatch.
///
/// `x` tiles the column dimension, `y` tiles the row dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl Default for WorkgroupSize {
    fn default() -> Self {
        WorkgroupSize { x: 16, y: 16 }
    }
}

impl WorkgroupSize {
    /// Total invocations per workgroup (x * y).
    pub fn total(&self) -> u32 {
        self.x * self.y
    }

    /// Global grid covering a `rows × cols` image, each dimension rounded
    /// up independently to the next multiple of the tile.
    ///
    /// Returns `(global_x, global_y)` = (columns, rows).
    pub fn global_size(&self, rows: u32, cols: u32) -> (u32, u32) {
        (cols.div_ceil(self.x) * self.x, rows.div_ceil(self.y) * self.y)
    }

    /// Number of workgroups to dispatch in each dimension.
    ///
    /// The shader must guard against invocations past the image edge.
    pub fn dispatch_size(&self, rows: u32, cols: u32) -> (u32, u32) {
        (cols.div_ceil(self.x), rows.div_ceil(self.y))
    }
}

impl fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{} ({} invocations)", self.x, self.y, self.total())
    }
}

/// Cached adapter information for logging and class filtering.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl AdapterInfo {
    pub fn class(&self) -> DeviceClass {
        class_of(self.device_type)
    }
}

impl From<wgpu::AdapterInfo> for AdapterInfo {
    fn from(raw: wgpu::AdapterInfo) -> Self {
        AdapterInfo {
            name: raw.name,
            vendor: raw.vendor,
            device: raw.device,
            device_type: raw.device_type,
            backend: raw.backend,
        }
    }
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.name, self.backend, self.device_type)
    }
}

/// Map a wgpu device type onto the filter classes.
pub fn class_of(device_type: wgpu::DeviceType) -> DeviceClass {
    match device_type {
        wgpu::DeviceType::DiscreteGpu
        | wgpu::DeviceType::IntegratedGpu
        | wgpu::DeviceType::VirtualGpu => DeviceClass::Gpu,
        wgpu::DeviceType::Cpu => DeviceClass::Cpu,
        wgpu::DeviceType::Other => DeviceClass::Other,
    }
}

// ============================================================
// GpuContext
// ============================================================

/// One adapter's private context (`wgpu::Device`) and command queue.
///
/// # Field drop order
/// Fields drop top to bottom. `_instance` is last so the instance outlives
/// the device and queue created from it.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: AdapterInfo,
    pub limits: wgpu::Limits,
    pub queue_config: QueueConfig,
    _instance: Arc<wgpu::Instance>,
}

impl GpuContext {
    fn open(
        instance: &Arc<wgpu::Instance>,
        adapter: &wgpu::Adapter,
        adapter_info: AdapterInfo,
        queue_config: QueueConfig,
    ) -> std::result::Result<Self, wgpu::RequestDeviceError> {
        // Ask for everything the adapter supports: image buffers can exceed
        // the conservative default storage-binding limit.
        let limits = adapter.limits();
        let (device, queue): (wgpu::Device, wgpu::Queue) =
            pollster::block_on(adapter.request_device(
                &wgpu::DeviceDescriptor {
                    label: Some(adapter_info.name.as_str()),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits.clone(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            ))?;

        // Anything that slips past an error scope is logged, not a panic.
        let name = adapter_info.name.clone();
        device.on_uncaptured_error(Box::new(move |e: wgpu::Error| {
            error!("uncaptured wgpu error on {name}: {e}");
        }));

        if queue_config.out_of_order {
            warn!(
                "{}: out-of-order queues are not available, submitting in order",
                adapter_info.name
            );
        }

        Ok(GpuContext {
            device,
            queue,
            adapter_info,
            limits,
            queue_config,
            _instance: Arc::clone(instance),
        })
    }

    pub fn class(&self) -> DeviceClass {
        self.adapter_info.class()
    }

    /// Reject a tile the device cannot launch.
    pub fn validate_workgroup_size(&self, size: WorkgroupSize) -> Result<()> {
        let max = self.limits.max_compute_invocations_per_workgroup;
        if size.x == 0
            || size.y == 0
            || size.x > self.limits.max_compute_workgroup_size_x
            || size.y > self.limits.max_compute_workgroup_size_y
            || size.total() > max
        {
            return Err(DispatchError::compute(
                "Validating workgroup size",
                format!("workgroup {size} exceeds device limit of {max} invocations"),
            ));
        }
        Ok(())
    }

    /// Run `f` inside validation and out-of-memory error scopes.
    ///
    /// Any error raised by wgpu while `f` runs is returned as a
    /// `ComputeApi` error carrying `operation`.
    pub(crate) fn scoped<T>(&self, operation: &'static str, f: impl FnOnce() -> T) -> Result<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        match validation.or(oom) {
            Some(err) => Err(DispatchError::compute(operation, err)),
            None => Ok(value),
        }
    }
}

impl fmt::Display for GpuContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GpuContext {{ adapter: {}, class: {}, max invocations: {}, max storage binding: {} MiB }}",
            self.adapter_info,
            self.class(),
            self.limits.max_compute_invocations_per_workgroup,
            self.limits.max_storage_buffer_binding_size >> 20
        )
    }
}

// ============================================================
// Registry
// ============================================================

/// Devices found on one backend.
#[derive(Debug)]
pub struct PlatformGroup<C> {
    pub backend: wgpu::Backend,
    pub devices: Vec<C>,
}

/// Backends to enumerate: `WGPU_BACKEND` if set, otherwise Vulkan.
pub fn default_backends() -> wgpu::Backends {
    wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::VULKAN)
}

/// Enumerate adapters of `class` and open a context + queue on each.
///
/// Fails with `DeviceUnavailable` when nothing matches or every matching
/// adapter failed to open.
pub fn acquire_devices(
    class: DeviceClass,
    backends: wgpu::Backends,
    queue_config: QueueConfig,
) -> Result<Vec<PlatformGroup<GpuContext>>> {
    let flags = if cfg!(debug_assertions) {
        wgpu::InstanceFlags::VALIDATION | wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
    } else {
        wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
    };
    let instance = Arc::new(wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends,
        flags,
        ..Default::default()
    }));

    let adapters = instance.enumerate_adapters(backends);
    debug!("{} adapters on {backends:?}", adapters.len());

    open_matching(
        adapters,
        class,
        |adapter| AdapterInfo::from(adapter.get_info()),
        |adapter, info| GpuContext::open(&instance, &adapter, info.clone(), queue_config),
    )
}

/// Filter candidates by class, open each survivor, group by backend.
///
/// Candidates whose `open` fails are dropped with a warning.
pub(crate) fn open_matching<A, C, E, D, O>(
    candidates: Vec<A>,
    class: DeviceClass,
    describe: D,
    mut open: O,
) -> Result<Vec<PlatformGroup<C>>>
where
    E: fmt::Display,
    D: Fn(&A) -> AdapterInfo,
    O: FnMut(A, &AdapterInfo) -> std::result::Result<C, E>,
{
    let mut groups: Vec<PlatformGroup<C>> = Vec::new();

    for candidate in candidates {
        let info = describe(&candidate);
        if !class.accepts(info.class()) {
            debug!("skipping {info}: class {} does not match {class}", info.class());
            continue;
        }
        match open(candidate, &info) {
            Ok(ctx) => {
                info!("opened context on {info}");
                match groups.iter_mut().find(|g| g.backend == info.backend) {
                    Some(group) => group.devices.push(ctx),
                    None => groups.push(PlatformGroup {
                        backend: info.backend,
                        devices: vec![ctx],
                    }),
                }
            }
            Err(e) => warn!("excluding {info}: context creation failed: {e}"),
        }
    }

    if groups.is_empty() {
        return Err(DispatchError::DeviceUnavailable { class: class.to_string() });
    }
    Ok(groups)
}

// ============================================================
// Tests
// ============================================================
