// scheduler.rs — Dynamic multi-device work distribution.
//
// One long-lived worker thread per device. Within each outer iteration the
// workers race for image indices on a shared atomic counter: whoever is
// free first claims the next index, so faster devices naturally take more
// images. A barrier closes every iteration; iteration i+1 starts only once
// every image of iteration i has been written back.
//
//   worker d:  for it in 0..NITERS {
//                  while let Some(n) = claim(it) {
//                      write_source(image n)      non-blocking
//                      [write_kernel]             non-blocking, optional
//                      execute                    non-blocking
//                      read_destination(slot n)   blocking
//                      count[d] += 1
//                  }
//                  barrier
//              }
//
// OUTPUT OWNERSHIP
// ─────────────────
// The output batch is split up front into one slot per image. A worker
// only touches slot n after claiming index n, and an index is claimed by
// exactly one worker per iteration, so each slot's mutex is never
// contended: the lock is never waited on, and the blocking read-back stays
// the only point where a worker actually waits on a device. The barrier
// separates the two iterations that write the same slot.
//
// FAILURE
// ────────
// The first error wins. The failing worker records it and raises the abort
// flag; the others stop claiming work. Every worker still passes every
// barrier so nobody is left waiting on a thread that has given up.
//
// A panicking device is treated the same way: the panic is caught in its
// worker, the run is aborted, the remaining barriers are passed, and the
// panic is resumed on the calling thread once every worker has joined.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use log::{debug, info, warn};

use crate::backend::ComputeDevice;
use crate::error::{DispatchError, Result};
use crate::image::{ImageBatch, XcorrKernel};
use crate::throughput::{DeviceTally, ThroughputReport};

/// Scheduling options.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Number of outer passes over the whole batch (NITERS).
    pub iterations: usize,
    /// Re-send the correlation kernel before every image instead of relying
    /// on the copy made when the device was set up.
    pub reupload_kernel: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            iterations: 10,
            reupload_kernel: false,
        }
    }
}

/// Cooperative cancellation flag, checked before each dispatch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Work queue
// ---------------------------------------------------------------------------

/// First-available index dispenser, one counter per outer iteration.
///
/// Separate counters avoid resetting a shared one between iterations, which
/// would race with workers already leaving the barrier.
struct WorkQueue {
    next: Vec<AtomicUsize>,
    images: usize,
}

impl WorkQueue {
    fn new(iterations: usize, images: usize) -> Self {
        WorkQueue {
            next: (0..iterations).map(|_| AtomicUsize::new(0)).collect(),
            images,
        }
    }

    fn claim(&self, iteration: usize) -> Option<usize> {
        let index = self.next[iteration].fetch_add(1, Ordering::Relaxed);
        (index < self.images).then_some(index)
    }
}

/// Everything the workers share. Read-only apart from the slots, the
/// atomics, and the first-error cell.
struct Shared<'a> {
    input: &'a ImageBatch,
    kernel: &'a XcorrKernel,
    reupload_kernel: bool,
    queue: WorkQueue,
    slots: Vec<Mutex<&'a mut [f32]>>,
    barrier: Barrier,
    abort: AtomicBool,
    completed: AtomicU64,
    first_error: Mutex<Option<DispatchError>>,
    first_panic: Mutex<Option<Box<dyn Any + Send>>>,
    cancel: &'a CancelToken,
}

impl Shared<'_> {
    fn fail(&self, err: DispatchError) {
        self.abort.store(true, Ordering::Release);
        let mut slot = self.first_error.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn fail_with_panic(&self, payload: Box<dyn Any + Send>) {
        self.abort.store(true, Ordering::Release);
        let mut slot = self.first_panic.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(payload);
        }
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Drives a pool of devices over a batch of images.
pub struct Scheduler {
    config: ScheduleConfig,
    cancel: CancelToken,
}

impl Scheduler {
    pub fn new(config: ScheduleConfig) -> Self {
        Scheduler {
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run every iteration over `input`, writing results into `output`.
    ///
    /// Returns the per-device throughput report. Any device error aborts
    /// the whole run and is returned as-is.
    pub fn run<D: ComputeDevice>(
        &self,
        devices: &mut [D],
        input: &ImageBatch,
        kernel: &XcorrKernel,
        output: &mut ImageBatch,
    ) -> Result<ThroughputReport> {
        self.check(devices, input, output)?;

        let iterations = self.config.iterations;
        let images = input.count();
        let total = (iterations * images) as u64;
        let labels: Vec<String> = devices.iter().map(|d| d.label().to_string()).collect();

        info!(
            "dispatching {images} images × {iterations} iterations across {} devices",
            devices.len()
        );

        let shared = Shared {
            input,
            kernel,
            reupload_kernel: self.config.reupload_kernel,
            queue: WorkQueue::new(iterations, images),
            slots: output.slots_mut().take(images).map(Mutex::new).collect(),
            barrier: Barrier::new(devices.len()),
            abort: AtomicBool::new(false),
            completed: AtomicU64::new(0),
            first_error: Mutex::new(None),
            first_panic: Mutex::new(None),
            cancel: &self.cancel,
        };

        let start = Instant::now();
        let tallies: Vec<DeviceTally> = thread::scope(|s| {
            let handles: Vec<_> = devices
                .iter_mut()
                .map(|device| {
                    let shared = &shared;
                    s.spawn(move || run_worker(device, shared, iterations))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|payload| panic::resume_unwind(payload)))
                .collect()
        });
        let elapsed = start.elapsed();

        if let Some(payload) = shared
            .first_panic
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
        {
            panic::resume_unwind(payload);
        }

        let first_error = shared
            .first_error
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(err) = first_error {
            warn!("run aborted: {err}");
            return Err(err);
        }

        let report = ThroughputReport::aggregate(
            labels.iter().map(String::as_str).zip(tallies),
            total,
            elapsed,
        );
        debug_assert_eq!(report.processed(), total);
        Ok(report)
    }

    fn check<D: ComputeDevice>(
        &self,
        devices: &[D],
        input: &ImageBatch,
        output: &ImageBatch,
    ) -> Result<()> {
        if devices.is_empty() {
            return Err(DispatchError::DeviceUnavailable { class: "any".into() });
        }
        if input.shape().is_empty() {
            return Err(DispatchError::Precondition(format!(
                "image shape {} has no pixels",
                input.shape()
            )));
        }
        if output.shape() != input.shape() || output.count() != input.count() {
            return Err(DispatchError::Precondition(format!(
                "output batch {}×{} does not match input batch {}×{}",
                output.count(),
                output.shape(),
                input.count(),
                input.shape()
            )));
        }
        if let Some(d) = devices.iter().find(|d| d.shape() != input.shape()) {
            return Err(DispatchError::Precondition(format!(
                "{} buffers are sized for {} images, batch holds {}",
                d.label(),
                d.shape(),
                input.shape()
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

fn run_worker<D: ComputeDevice>(device: &mut D, shared: &Shared<'_>, iterations: usize) -> DeviceTally {
    let mut tally = DeviceTally::new(device.profiling());

    for iteration in 0..iterations {
        if !shared.aborted() {
            let drained = panic::catch_unwind(AssertUnwindSafe(|| {
                drain_iteration(device, shared, iteration, &mut tally)
            }));
            match drained {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    debug!("{} failed in iteration {}: {err}", device.label(), iteration + 1);
                    shared.fail(err);
                }
                Err(payload) => {
                    warn!("{} panicked in iteration {}", device.label(), iteration + 1);
                    shared.fail_with_panic(payload);
                }
            }
        }
        if shared.barrier.wait().is_leader() && !shared.aborted() {
            info!("completed iteration {} of {iterations}", iteration + 1);
        }
    }
    tally
}

fn drain_iteration<D: ComputeDevice>(
    device: &mut D,
    shared: &Shared<'_>,
    iteration: usize,
    tally: &mut DeviceTally,
) -> Result<()> {
    while !shared.aborted() {
        if shared.cancel.is_cancelled() {
            return Err(DispatchError::Cancelled {
                completed: shared.completed.load(Ordering::Relaxed),
            });
        }
        let Some(index) = shared.queue.claim(iteration) else {
            break;
        };
        process_image(device, shared, index, tally)?;
        tally.images += 1;
        shared.completed.fetch_add(1, Ordering::Relaxed);
    }
    Ok(())
}

/// Transfer-in, execute, transfer-out for one image on one device.
fn process_image<D: ComputeDevice>(
    device: &mut D,
    shared: &Shared<'_>,
    index: usize,
    tally: &mut DeviceTally,
) -> Result<()> {
    let t0 = Instant::now();
    device.write_source(shared.input.image(index))?;
    if shared.reupload_kernel {
        device.write_kernel(shared.kernel.as_slice())?;
    }
    let t1 = Instant::now();
    device.execute()?;
    let t2 = Instant::now();
    {
        let mut slot = shared.slots[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        device.read_destination(&mut **slot)?;
    }

    if let Some(stages) = tally.stages.as_mut() {
        let t3 = Instant::now();
        stages.transfer_in += t1 - t0;
        stages.execute += t2 - t1;
        stages.transfer_out += t3 - t2;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostDevice;
    use crate::image::{ImageShape, Padding};

    #[test]
    fn test_work_queue_hands_out_each_index_once() {
        let q = WorkQueue::new(2, 3);
        let first: Vec<_> = std::iter::from_fn(|| q.claim(0)).collect();
        assert_eq!(first, vec![0, 1, 2]);
        assert_eq!(q.claim(0), None);
        // Iteration 1 has its own counter.
        assert_eq!(q.claim(1), Some(0));
    }

    #[test]
    fn test_single_device_takes_everything() {
        let shape = ImageShape::new(3, 3);
        let kernel = XcorrKernel::identity(Padding::zero());
        let input = ImageBatch::from_vec(shape, (0..27).map(|v| v as f32).collect()).unwrap();
        let mut output = ImageBatch::zeros(shape, 3);
        let mut devices = vec![HostDevice::new("host 0", shape, &kernel)];

        let report = Scheduler::new(ScheduleConfig { iterations: 2, reupload_kernel: false })
            .run(&mut devices, &input, &kernel, &mut output)
            .unwrap();

        assert_eq!(report.total_images, 6);
        assert_eq!(report.devices[0].images, 6);
        assert_eq!(output, input);
    }

    #[test]
    fn test_empty_pool_is_device_unavailable() {
        let shape = ImageShape::new(2, 2);
        let kernel = XcorrKernel::identity(Padding::zero());
        let input = ImageBatch::zeros(shape, 1);
        let mut output = ImageBatch::zeros(shape, 1);
        let mut devices: Vec<HostDevice> = Vec::new();
        let err = Scheduler::new(ScheduleConfig::default())
            .run(&mut devices, &input, &kernel, &mut output)
            .unwrap_err();
        assert!(matches!(err, DispatchError::DeviceUnavailable { .. }));
    }

    #[test]
    fn test_device_shape_mismatch_is_precondition() {
        let kernel = XcorrKernel::identity(Padding::zero());
        let input = ImageBatch::zeros(ImageShape::new(2, 2), 1);
        let mut output = ImageBatch::zeros(ImageShape::new(2, 2), 1);
        let mut devices = vec![HostDevice::new("host 0", ImageShape::new(4, 4), &kernel)];
        let err = Scheduler::new(ScheduleConfig::default())
            .run(&mut devices, &input, &kernel, &mut output)
            .unwrap_err();
        assert!(matches!(err, DispatchError::Precondition(_)));
    }

    #[test]
    fn test_empty_shape_is_precondition() {
        let shape = ImageShape::new(0, 4);
        let kernel = XcorrKernel::identity(Padding::zero());
        let input = ImageBatch::zeros(shape, 3);
        let mut output = ImageBatch::zeros(shape, 3);
        let mut devices = vec![HostDevice::new("host 0", shape, &kernel)];
        let err = Scheduler::new(ScheduleConfig::default())
            .run(&mut devices, &input, &kernel, &mut output)
            .unwrap_err();
        assert!(matches!(err, DispatchError::Precondition(_)));
    }

    #[test]
    fn test_cancelled_before_start() {
        let shape = ImageShape::new(2, 2);
        let kernel = XcorrKernel::identity(Padding::zero());
        let input = ImageBatch::zeros(shape, 4);
        let mut output = ImageBatch::zeros(shape, 4);
        let mut devices = vec![
            HostDevice::new("host 0", shape, &kernel),
            HostDevice::new("host 1", shape, &kernel),
        ];
        let token = CancelToken::new();
        token.cancel();
        let err = Scheduler::new(ScheduleConfig::default())
            .with_cancel_token(token)
            .run(&mut devices, &input, &kernel, &mut output)
            .unwrap_err();
        assert!(matches!(err, DispatchError::Cancelled { completed: 0 }));
    }
}
