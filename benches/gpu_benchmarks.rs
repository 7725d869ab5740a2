// benches/gpu_benchmarks.rs — Whole-pool GPU dispatch benchmarks.
//
//   cargo bench --bench gpu_benchmarks
//
// Every matching adapter is opened once and reused across samples; each
// sample is one full pass of the scheduler over the batch, which includes
// transfer-in, kernel execution and the blocking read-back per image.
//
//
// CRITERION + GPU CAVEATS
// ────────────────────────
// Criterion measures wall time including host overhead (write_buffer,
// submit, poll). The first dispatches on some drivers pay pipeline
// compilation, so warm-up time is set explicitly.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

use xcorr_dispatch::gpu::{acquire_devices, default_backends, DEFAULT_SOURCE};
use xcorr_dispatch::{
    ComputeDevice, DeviceClass, GpuXcorrDevice, ImageBatch, ImageShape, Padding, QueueConfig,
    ScheduleConfig, Scheduler, WorkgroupSize, XcorrKernel,
};

fn make_batch(shape: ImageShape, count: usize) -> ImageBatch {
    let data = (0..shape.len() * count)
        .map(|i| ((i * 17) % 256) as f32)
        .collect();
    ImageBatch::from_vec(shape, data).unwrap()
}

fn open_pool(shape: ImageShape, kernel: &XcorrKernel, workgroup: WorkgroupSize) -> Vec<GpuXcorrDevice> {
    let groups = match acquire_devices(DeviceClass::Gpu, default_backends(), QueueConfig::default()) {
        Ok(groups) => groups,
        Err(e) => {
            eprintln!("{e}, skipping GPU benchmarks.");
            return Vec::new();
        }
    };
    groups
        .into_iter()
        .flat_map(|g| g.devices)
        .map(|ctx| GpuXcorrDevice::new(ctx, DEFAULT_SOURCE, workgroup, shape, kernel).unwrap())
        .collect()
}

fn bench_gpu_pool(c: &mut Criterion) {
    let shape = ImageShape::new(1024, 1280);
    let padding = Padding::new(0, 2, 0, 2);
    let kernel = XcorrKernel::from_vec(padding, vec![1.0 / 9.0; 9]).unwrap();
    let input = make_batch(shape, 16);
    let mut output = ImageBatch::zeros(shape, 16);
    let scheduler = Scheduler::new(ScheduleConfig { iterations: 1, reupload_kernel: false });

    let mut group = c.benchmark_group("gpu_pool");
    group.warm_up_time(Duration::from_secs(2));
    group.sample_size(10);
    group.throughput(Throughput::Elements(input.count() as u64));

    for (tx, ty) in [(16u32, 16u32), (32, 8)] {
        let mut pool = open_pool(shape, &kernel, WorkgroupSize { x: tx, y: ty });
        if pool.is_empty() {
            break;
        }
        eprintln!("pool: {:?}", pool.iter().map(|d| d.label()).collect::<Vec<_>>());
        group.bench_function(BenchmarkId::new("16_images_1024x1280", format!("{tx}x{ty}")), |b| {
            b.iter(|| scheduler.run(&mut pool, &input, &kernel, &mut output).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_gpu_pool);
criterion_main!(benches);
