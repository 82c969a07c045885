//! Bounding volume error types.

/// Errors raised while building bounding volumes from tile headers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BoundsError {
    /// The header carried none of `box`, `region` or `sphere`.
    #[error("bounding volume has no box, region or sphere")]
    MissingVolume,

    /// A volume array had the wrong number of elements.
    #[error("bounding {kind} needs {expected} numbers, got {actual}")]
    InvalidLength {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A volume array contained NaN or infinity.
    #[error("bounding {kind} contains a non-finite value")]
    NonFinite { kind: &'static str },
}
