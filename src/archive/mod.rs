//! The SoS results archive: release creation and record serialization.
//!
//! Each run produces one new release of the SWORD of Science archive for its
//! continent. [`VersionManager`] fresh-creates the release file from the
//! prior SoS (bumped version, stamped production date, identifier groups and
//! shared dimensions), and [`ArchiveWriter`] serializes the module records
//! into it. The release moves through [`ArchiveState`]: created, appended to
//! and finally finalized, at which point it is eligible for upload.

mod version;
mod writer;

pub use version::{ArchiveState, SosArchive, VersionManager, VERSION_WIDTH};
pub use writer::ArchiveWriter;

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while creating or writing the archive. Creation failures
/// are fatal to the run; per-module write failures are reported and the run
/// moves on.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NetCDF error: {0}")]
    NetCdf(#[from] netcdf::Error),

    #[error("prior SoS file not found: {0}")]
    MissingPrior(PathBuf),

    #[error("prior SoS file is missing global attribute '{0}'")]
    MissingGlobal(String),

    #[error("prior SoS version '{0}' is not numeric")]
    BadVersion(String),

    #[error("archive group '{0}' not found")]
    MissingGroup(String),

    #[error("archive variable '{0}' not found")]
    MissingVariable(String),
}
