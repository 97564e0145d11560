//! Error types for the geoheight crate.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while opening elevation sources.
///
/// Query-time absence of data is never an error: height queries return NaN
/// and accuracy queries return `None`. These variants only surface from
/// opening cells, databases and configuration.
#[derive(Debug, Error)]
pub enum ElevationError {
    /// I/O error reading a file or directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF decoding error.
    #[error("TIFF decode error: {0}")]
    TiffDecode(#[from] tiff::TiffError),

    /// Invalid GeoTIFF - missing or malformed georeferencing.
    #[error("Invalid GeoTIFF: {0}")]
    InvalidGeoTiff(String),

    /// Invalid cell filename - cannot parse coordinates.
    #[error("Invalid cell filename: {0}")]
    InvalidFilename(String),

    /// Configuration could not be parsed.
    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_yaml::Error),

    /// A database connection produced no candidate cell files.
    #[error("No elevation cells found under {0}")]
    EmptyCatalog(PathBuf),

    /// A directory holds rasters that are not named like 1° cells.
    #[error("{0} is not a grid cell directory: {1} is not named like a cell")]
    MixedDirectory(PathBuf, PathBuf),

    /// The connection path is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// No registered database type recognised the connection path.
    #[error("Unrecognized elevation source: {0}")]
    UnrecognizedSource(PathBuf),
}
