//! Tileset and content error types.

use strata_bounds::BoundsError;

/// Structural errors raised while building a tile tree.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TilesetError {
    /// A tile's bounding volume could not be built.
    #[error("invalid bounding volume: {0}")]
    Bounds(#[from] BoundsError),

    /// A tile header has no `geometricError`.
    #[error("tile header is missing a geometric error")]
    MissingGeometricError,

    /// A geometric error was negative or not finite.
    #[error("geometric error must be a non-negative finite number, got {0}")]
    InvalidGeometricError(f64),

    /// The tileset document is not valid JSON of the expected shape.
    #[error("malformed tileset document: {0}")]
    Document(String),
}

/// Errors raised while turning fetched bytes into tile content.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ContentError {
    /// The payload does not start with a recognized magic.
    #[error("unrecognized content magic {0:?}")]
    UnknownMagic([u8; 4]),

    /// The payload is shorter than a magic number.
    #[error("content payload is too short ({0} bytes)")]
    Truncated(usize),

    /// The content factory rejected the payload.
    #[error("failed to decode {variant} content: {message}")]
    Decode { variant: String, message: String },

    /// An external tileset document failed to build.
    #[error("external tileset: {0}")]
    ExternalTileset(#[from] TilesetError),
}
