// THEORY:
// The mixture engine itself cannot fail: it performs no I/O and allocates nothing
// on the hot path. Everything that can go wrong is a broken precondition on the
// caller's side (a buffer of the wrong length, an image of the wrong resolution,
// a nonsensical configuration) or, for the parallel pipeline, a worker that has
// gone away. These are reported eagerly, before any model state is touched, so a
// rejected call never leaves the store half-updated.

/// Common result type for the vision engine.
pub type Result<T> = std::result::Result<T, VisionError>;

/// Coarse classification of a [`VisionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller violated a precondition. Retrying with the same input fails again.
    InvalidInput,
    /// Something inside the engine broke (a parallel worker disappeared).
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("{buffer} buffer holds {actual} bytes, expected {expected}")]
    FrameSizeMismatch {
        buffer: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("image is {}x{}, subtractor is configured for {}x{}", .actual.0, .actual.1, .expected.0, .expected.1)]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("learning rate must be a number, got {0}")]
    InvalidLearningRate(f64),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("worker pool error: {0}")]
    WorkerPool(String),
}

impl VisionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VisionError::WorkerPool(_) => ErrorKind::Internal,
            _ => ErrorKind::InvalidInput,
        }
    }

    /// Returns an error unless `buffer` is exactly `expected` bytes long.
    pub(crate) fn check_len(buffer: &'static str, expected: usize, actual: usize) -> Result<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(VisionError::FrameSizeMismatch {
                buffer,
                expected,
                actual,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_errors_are_invalid_input() {
        let err = VisionError::check_len("input", 6, 5).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(err.to_string(), "input buffer holds 5 bytes, expected 6");
        assert!(VisionError::check_len("input", 6, 6).is_ok());
    }

    #[test]
    fn worker_errors_are_internal() {
        let err = VisionError::WorkerPool("band 0 closed".into());
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
