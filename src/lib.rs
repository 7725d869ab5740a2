// xcorr-dispatch: multi-device dispatch for batched 2-D cross-correlation
//
// A batch of images is correlated against one small kernel on every compute
// device the machine exposes. Devices pull image indices from a shared queue
// as they become free, so a fast GPU ends up with more of the batch than a
// slow one.
//
// Layers, bottom to top:
//   image / xcorr     data containers and the CPU reference correlation
//   backend           `ComputeDevice`, the seam the scheduler drives
//   gpu, host         wgpu-backed and in-process implementations
//   scheduler         worker-per-device dynamic distribution
//   throughput        per-device counters and the final report
//   config / io / run a complete file-to-file run

pub mod error;
pub mod image;
pub mod xcorr;
pub mod backend;
pub mod host;
pub mod gpu;
pub mod scheduler;
pub mod throughput;
pub mod config;
pub mod io;
pub mod run;

pub use backend::{ComputeDevice, DeviceClass};
pub use config::RunConfig;
pub use error::{DispatchError, Result};
pub use gpu::{GpuXcorrDevice, QueueConfig, WorkgroupSize};
pub use host::HostDevice;
pub use image::{ImageBatch, ImageShape, Padding, XcorrKernel};
pub use run::{build_devices, run, run_with_cancel, RunSummary};
pub use scheduler::{CancelToken, ScheduleConfig, Scheduler};
pub use throughput::{DeviceShare, StageTimings, ThroughputReport};
