// throughput.rs — Per-device counters and the end-of-run report.
//
// Each worker thread owns one `DeviceTally` for the whole run and hands it
// back when it joins, so counters are never shared between threads and need
// no atomics. The aggregator only reads them after every iteration is done.

use std::fmt;
use std::time::Duration;

/// Accumulated host-side time spent in each pipeline stage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTimings {
    pub transfer_in: Duration,
    pub execute: Duration,
    pub transfer_out: Duration,
}

/// Running counters for one device, owned by that device's worker.
#[derive(Debug, Clone, Default)]
pub struct DeviceTally {
    /// Images completed across all outer iterations.
    pub images: u64,
    /// Present only when the device was created with profiling enabled.
    pub stages: Option<StageTimings>,
}

impl DeviceTally {
    pub fn new(profiling: bool) -> Self {
        DeviceTally {
            images: 0,
            stages: profiling.then(StageTimings::default),
        }
    }
}

/// One device's line in the report.
#[derive(Debug, Clone)]
pub struct DeviceShare {
    pub label: String,
    pub images: u64,
    /// images / total, in [0, 1].
    pub share: f64,
    pub stages: Option<StageTimings>,
}

/// Aggregate throughput of a finished run.
#[derive(Debug, Clone)]
pub struct ThroughputReport {
    pub devices: Vec<DeviceShare>,
    /// NITERS × NIMAGES.
    pub total_images: u64,
    pub elapsed: Duration,
}

impl ThroughputReport {
    /// Build the report from per-device tallies, in device order.
    pub fn aggregate<'a>(
        tallies: impl IntoIterator<Item = (&'a str, DeviceTally)>,
        total_images: u64,
        elapsed: Duration,
    ) -> Self {
        let devices = tallies
            .into_iter()
            .map(|(label, tally)| DeviceShare {
                label: label.to_string(),
                images: tally.images,
                share: if total_images == 0 {
                    0.0
                } else {
                    tally.images as f64 / total_images as f64
                },
                stages: tally.stages,
            })
            .collect();
        ThroughputReport { devices, total_images, elapsed }
    }

    /// Sum of all per-device counters.
    pub fn processed(&self) -> u64 {
        self.devices.iter().map(|d| d.images).sum()
    }

    /// Overall images per second. Zero if no time elapsed.
    pub fn images_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total_images as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for ThroughputReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.devices.iter().enumerate() {
            writeln!(
                f,
                "Device {i} ({}) processed {} of {} images ({:.2}%)",
                d.label,
                d.images,
                self.total_images,
                100.0 * d.share
            )?;
            if let (Some(s), true) = (d.stages, d.images > 0) {
                let per = |t: Duration| t.as_secs_f64() * 1e3 / d.images as f64;
                writeln!(
                    f,
                    "  per image: transfer-in {:.3} ms, execute {:.3} ms, transfer-out {:.3} ms",
                    per(s.transfer_in),
                    per(s.execute),
                    per(s.transfer_out)
                )?;
            }
        }
        write!(f, "Overall processing rate {:.2} images/s", self.images_per_second())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally(images: u64) -> DeviceTally {
        DeviceTally { images, stages: None }
    }

    #[test]
    fn test_shares_sum_to_one() {
        let r = ThroughputReport::aggregate(
            [("a", tally(30)), ("b", tally(10))],
            40,
            Duration::from_secs(2),
        );
        assert_eq!(r.processed(), 40);
        assert!((r.devices[0].share - 0.75).abs() < 1e-12);
        assert!((r.devices[1].share - 0.25).abs() < 1e-12);
        assert!((r.images_per_second() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_elapsed_rate() {
        let r = ThroughputReport::aggregate([("a", tally(0))], 0, Duration::ZERO);
        assert_eq!(r.images_per_second(), 0.0);
        assert_eq!(r.devices[0].share, 0.0);
    }

    #[test]
    fn test_display_lists_every_device() {
        let mut profiled = DeviceTally::new(true);
        profiled.images = 4;
        let r = ThroughputReport::aggregate(
            [("gpu0", profiled), ("host", tally(0))],
            4,
            Duration::from_secs(1),
        );
        let text = r.to_string();
        assert!(text.contains("Device 0 (gpu0) processed 4 of 4 images (100.00%)"));
        assert!(text.contains("Device 1 (host) processed 0 of 4 images (0.00%)"));
        assert!(text.contains("transfer-in"));
        assert!(text.ends_with("Overall processing rate 4.00 images/s"));
    }
}
