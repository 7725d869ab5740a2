use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use xcorr_dispatch::{
    run, DeviceClass, ImageShape, Padding, QueueConfig, RunConfig, WorkgroupSize,
};

#[derive(Parser)]
#[command(name = "xcorr-dispatch")]
#[command(about = "Cross-correlate a batch of images across every available compute device", long_about = None)]
#[command(version)]
struct Cli {
    /// Device class: GPU, CPU (exact, case-sensitive), or anything else for all devices
    #[arg(value_name = "CLASS", default_value = "ALL")]
    class: DeviceClass,

    /// Outer passes over the whole batch
    #[arg(value_name = "NITERS", default_value = "10")]
    iterations: usize,

    // ===== Image Options =====
    /// Image rows (dimension 0)
    #[arg(long, value_name = "INT", default_value = "1024")]
    rows: usize,

    /// Image columns (dimension 1)
    #[arg(long, value_name = "INT", default_value = "1280")]
    cols: usize,

    /// Number of images in the input file (default: inferred from its size)
    #[arg(short = 'n', long, value_name = "INT")]
    images: Option<usize>,

    /// Kernel padding L0,R0,L1,R1
    #[arg(long, value_name = "INT,INT,INT,INT", value_delimiter = ',', num_args = 4, default_values_t = [0, 2, 0, 2])]
    padding: Vec<usize>,

    // ===== Device Options =====
    /// Workgroup tile along columns
    #[arg(long, value_name = "INT", default_value = "16")]
    tile_x: u32,

    /// Workgroup tile along rows
    #[arg(long, value_name = "INT", default_value = "16")]
    tile_y: u32,

    /// Request out-of-order queues where supported
    #[arg(long)]
    out_of_order: bool,

    /// Report per-stage timings for every device
    #[arg(long)]
    profile: bool,

    /// Re-send the kernel weights before every image
    #[arg(long)]
    reupload_kernel: bool,

    /// Skip GPU adapters entirely
    #[arg(long)]
    no_gpu: bool,

    /// Add INT in-process CPU devices to the pool
    #[arg(long, value_name = "INT", default_value = "0")]
    host_devices: usize,

    /// Extra delay per image on host devices, in milliseconds
    #[arg(long, value_name = "MS", default_value = "0")]
    host_latency_ms: u64,

    // ===== Input/Output Options =====
    /// Input image batch (raw little-endian f32)
    #[arg(short = 'i', long, value_name = "FILE", default_value = "images_in.dat")]
    input: PathBuf,

    /// Correlation kernel weights (raw little-endian f32)
    #[arg(short = 'k', long, value_name = "FILE", default_value = "image_kernel.dat")]
    kernel: PathBuf,

    /// WGSL program source (default: built-in shader)
    #[arg(short = 's', long, value_name = "FILE")]
    source: Option<PathBuf>,

    /// Output image batch
    #[arg(short = 'o', long, value_name = "FILE", default_value = "images_out.dat")]
    output: PathBuf,

    /// Verbosity: -v info, -vv debug, -vvv trace
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn into_config(self) -> RunConfig {
        let p = &self.padding;
        RunConfig {
            device_class: self.class,
            iterations: self.iterations,
            shape: ImageShape::new(self.rows, self.cols),
            images: self.images,
            padding: Padding::new(p[0], p[1], p[2], p[3]),
            workgroup: WorkgroupSize { x: self.tile_x, y: self.tile_y },
            queue: QueueConfig {
                out_of_order: self.out_of_order,
                profiling: self.profile,
            },
            reupload_kernel: self.reupload_kernel,
            probe_gpus: !self.no_gpu,
            host_devices: self.host_devices,
            host_latency: Duration::from_millis(self.host_latency_ms),
            input_path: self.input,
            kernel_path: self.kernel,
            source_path: self.source,
            output_path: self.output,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None) // Don't show timestamps
        .format_target(false) // Don't show module names
        .init();

    let config = cli.into_config();
    match run(&config) {
        Ok(summary) => {
            println!("{}", summary.report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}
