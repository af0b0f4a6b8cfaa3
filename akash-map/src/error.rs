//! Error types for akash-map.

use thiserror::Error;

/// Map error type.
///
/// Soft failures (absent layer, non-resident chunk, invalid accessor) are
/// reported through `Option` / `bool` returns rather than errors; this type
/// covers construction and serialisation failures.
#[derive(Error, Debug)]
pub enum MapError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid layer: {0}")]
    InvalidLayer(String),

    #[error("layout is frozen: {0}")]
    LayoutFrozen(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid map file: {0}")]
    Format(String),

    #[error("unsupported map version: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

pub type Result<T> = std::result::Result<T, MapError>;
