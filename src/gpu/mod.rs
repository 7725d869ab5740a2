// gpu/mod.rs — wgpu compute layer.
//
// One adapter = one device. Each gets its own wgpu::Device + Queue, its own
// compiled correlation program and its own buffer triple; nothing here is
// shared between adapters, so every `GpuXcorrDevice` can be driven from its
// own worker thread.
//
//   device     adapter discovery, class filter, contexts, error scopes
//   program    WGSL specialisation and pipeline build
//   resources  src / dst / kern / params / staging buffers + bind group
//   xcorr      the `ComputeDevice` implementation tying them together
//
// The CPU reference in `crate::xcorr` is the authority every GPU result is
// checked against.

pub mod device;
pub mod program;
pub mod resources;
pub mod xcorr;

pub use device::{acquire_devices, default_backends, AdapterInfo, GpuContext, PlatformGroup, QueueConfig, WorkgroupSize};
pub use program::{XcorrProgram, DEFAULT_SOURCE, XCORR_ENTRY_POINT};
pub use xcorr::GpuXcorrDevice;
