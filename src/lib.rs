//! # sos-output
//!
//! The output stage of the Confluence workflow: merges per-reach and
//! per-node results from every upstream module into a new version of the
//! SWORD of Science (SoS) archive for one continent.
//!
//! This crate provides the building blocks of that merge:
//! - Master reach/node topology loaded from the priors archive
//! - Fill-value conventions shared by every module
//! - Typed in-memory records of one module's merged results
//! - Per-module readers for NetCDF and CSV result files
//! - Versioned archive creation and record serialization
//! - The append loop and upload of a finalized release

pub mod archive;
pub mod config;
pub mod fill;
pub mod modules;
pub mod orchestrator;
pub mod record;
pub mod topology;
pub mod upload;

// Re-export main types for convenience
pub use archive::{ArchiveError, ArchiveState, ArchiveWriter, SosArchive, VersionManager};
pub use config::{
    load_continent, ConfigError, ContinentSelection, RunPaths, RunType, VariableMetadata,
};
pub use fill::{FillPolicy, FLOAT_FILL, INT_FILL, LONG_FILL, STRING_FILL};
pub use modules::{parse_module_list, ExtractContext, ModuleError, ModuleKind, ResultReader};
pub use orchestrator::{run, ModuleOutcome, ModuleStatus, OutputError, RunConfig, RunReport};
pub use record::{
    AttrPair, DimRef, Field, FieldData, GroupTarget, LocalDim, Matrix, Matrix2Strings, Ragged,
    RecordGroup, ResultRecord,
};
pub use topology::{priors_file_name, results_file_name, SosTopology, TopologyError, SWORD_VERSION};
pub use upload::{upload_archive, LocalDirSink, UploadError, UploadSink};
