// backend.rs — The seam between the scheduler and concrete compute devices.
//
// The scheduler only ever talks to a device through `ComputeDevice`. Each
// implementation owns its whole resource set (context, queue, program,
// source/destination/kernel buffers) and is driven by exactly one worker
// thread, so the trait takes `&mut self` and requires `Send` but not `Sync`.
//
// Per image the scheduler calls, in order:
//
//   write_source      transfer-in, non-blocking
//   write_kernel      transfer-in, non-blocking (only when re-upload is on)
//   execute           kernel launch, non-blocking
//   read_destination  transfer-out, BLOCKING — the only sync point
//
// Implementations must keep these in submission order on their queue.

use std::fmt;
use std::str::FromStr;

use crate::error::Result;
use crate::image::ImageShape;

// ---------------------------------------------------------------------------
// DeviceClass
// ---------------------------------------------------------------------------

/// Device class filter / attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceClass {
    /// Any device. As a filter this matches everything.
    #[default]
    All,
    Gpu,
    Cpu,
    /// Neither GPU nor CPU (e.g. translation layers reporting `Other`).
    Other,
}

impl DeviceClass {
    /// Parse a command-line class token.
    ///
    /// Exactly `"GPU"` or `"CPU"` selects that class. Matching is
    /// case-sensitive; any other token (including `"gpu"`) selects all
    /// devices.
    pub fn from_token(token: &str) -> Self {
        match token {
            "GPU" => DeviceClass::Gpu,
            "CPU" => DeviceClass::Cpu,
            _ => DeviceClass::All,
        }
    }

    /// Whether a device of class `device` passes this filter.
    pub fn accepts(self, device: DeviceClass) -> bool {
        self == DeviceClass::All || self == device
    }
}

impl FromStr for DeviceClass {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(DeviceClass::from_token(s))
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::All => write!(f, "ALL"),
            DeviceClass::Gpu => write!(f, "GPU"),
            DeviceClass::Cpu => write!(f, "CPU"),
            DeviceClass::Other => write!(f, "OTHER"),
        }
    }
}

// ---------------------------------------------------------------------------
// ComputeDevice
// ---------------------------------------------------------------------------

/// One compute device with its own queue and buffer triple.
pub trait ComputeDevice: Send {
    /// Human-readable name used in logs and the throughput report.
    fn label(&self) -> &str;

    fn class(&self) -> DeviceClass;

    /// Shape the source/destination buffers were sized for.
    fn shape(&self) -> ImageShape;

    /// Whether the scheduler should time each pipeline stage on this device.
    fn profiling(&self) -> bool {
        false
    }

    /// Stage one image into the source buffer. Must not wait for the device.
    fn write_source(&mut self, image: &[f32]) -> Result<()>;

    /// Stage the correlation weights into the kernel buffer.
    fn write_kernel(&mut self, weights: &[f32]) -> Result<()>;

    /// Enqueue the correlation over the whole image.
    fn execute(&mut self) -> Result<()>;

    /// Copy the destination buffer into `out`, blocking until every
    /// previously enqueued operation on this device has completed.
    fn read_destination(&mut self, out: &mut [f32]) -> Result<()>;
}

impl<D: ComputeDevice + ?Sized> ComputeDevice for Box<D> {
    fn label(&self) -> &str {
        (**self).label()
    }

    fn class(&self) -> DeviceClass {
        (**self).class()
    }

    fn shape(&self) -> ImageShape {
        (**self).shape()
    }

    fn profiling(&self) -> bool {
        (**self).profiling()
    }

    fn write_source(&mut self, image: &[f32]) -> Result<()> {
        (**self).write_source(image)
    }

    fn write_kernel(&mut self, weights: &[f32]) -> Result<()> {
        (**self).write_kernel(weights)
    }

    fn execute(&mut self) -> Result<()> {
        (**self).execute()
    }

    fn read_destination(&mut self, out: &mut [f32]) -> Result<()> {
        (**self).read_destination(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_tokens() {
        assert_eq!(DeviceClass::from_token("GPU"), DeviceClass::Gpu);
        assert_eq!(DeviceClass::from_token("CPU"), DeviceClass::Cpu);
        assert_eq!(DeviceClass::from_token("ALL"), DeviceClass::All);
        assert_eq!(DeviceClass::from_token("fpga"), DeviceClass::All);
        assert_eq!("GPU".parse::<DeviceClass>().unwrap(), DeviceClass::Gpu);
    }

    #[test]
    fn test_class_tokens_are_case_sensitive() {
        assert_eq!(DeviceClass::from_token("gpu"), DeviceClass::All);
        assert_eq!(DeviceClass::from_token("Cpu"), DeviceClass::All);
        assert_eq!("cpu".parse::<DeviceClass>().unwrap(), DeviceClass::All);
    }

    #[test]
    fn test_class_filter() {
        assert!(DeviceClass::All.accepts(DeviceClass::Gpu));
        assert!(DeviceClass::All.accepts(DeviceClass::Other));
        assert!(DeviceClass::Gpu.accepts(DeviceClass::Gpu));
        assert!(!DeviceClass::Gpu.accepts(DeviceClass::Cpu));
        assert!(!DeviceClass::Cpu.accepts(DeviceClass::Other));
    }
}
