// error.rs — Crate-wide error type.
//
// Every failure in a run is fatal: nothing here is retried or downgraded.
// The variants exist so the binary can name the failing operation and map
// each kind to its own exit code.

use std::path::PathBuf;

/// Errors raised while acquiring devices, building programs, or dispatching.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No compute device matched the requested class filter.
    #[error("no compute device matches class {class}")]
    DeviceUnavailable { class: String },

    /// The device program failed to compile or link on one device.
    #[error("program build failed on {device}:\n{log}")]
    Compile { device: String, log: String },

    /// A lifecycle or dispatch call reported a non-success status.
    #[error("{operation} failed: {status}")]
    ComputeApi {
        operation: &'static str,
        status: String,
    },

    /// Input data does not have the size the run was configured for.
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The run was cancelled between dispatches.
    #[error("run cancelled after {completed} images")]
    Cancelled { completed: u64 },
}

impl DispatchError {
    pub(crate) fn compute(operation: &'static str, status: impl ToString) -> Self {
        DispatchError::ComputeApi {
            operation,
            status: status.to_string(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DispatchError::Io {
            path: path.into(),
            source,
        }
    }

    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            DispatchError::DeviceUnavailable { .. } => 2,
            DispatchError::Compile { .. } => 3,
            DispatchError::ComputeApi { .. } => 4,
            DispatchError::Precondition(_) => 5,
            DispatchError::Io { .. } => 6,
            DispatchError::Cancelled { .. } => 130,
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let errors = [
            DispatchError::DeviceUnavailable { class: "GPU".into() },
            DispatchError::Compile { device: "d".into(), log: "l".into() },
            DispatchError::compute("enqueue", "lost"),
            DispatchError::Precondition("size".into()),
            DispatchError::io("x.dat", std::io::Error::from(std::io::ErrorKind::NotFound)),
            DispatchError::Cancelled { completed: 0 },
        ];
        let mut codes: Vec<u8> = errors.iter().map(|e| e.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(codes.iter().all(|&c| c != 0));
    }

    #[test]
    fn test_compute_error_names_operation() {
        let e = DispatchError::compute("Writing to source buffer", "out of memory");
        assert_eq!(e.to_string(), "Writing to source buffer failed: out of memory");
    }
}
