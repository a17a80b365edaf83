//! The module append loop.
//!
//! One invocation merges every requested module into a freshly created
//! archive release for one continent. Failures are isolated per module: a
//! reader that cannot produce data still gets its all-sentinel schema
//! written, and the loop carries on. Only the surrounding plumbing is fatal:
//! configuration, topology, release creation and upload.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::archive::{ArchiveError, ArchiveWriter, SosArchive, VersionManager};
use crate::config::{load_continent, ConfigError, RunPaths, RunType, VariableMetadata};
use crate::fill::FillPolicy;
use crate::modules::{priors, ExtractContext, ModuleKind, ResultReader};
use crate::record::ResultRecord;
use crate::topology::{SosTopology, TopologyError};
use crate::upload::{upload_archive, UploadError, UploadSink};

/// Anything that ends a run early.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("upload error: {0}")]
    Upload(#[from] UploadError),
}

/// Everything one invocation needs.
pub struct RunConfig {
    /// Continent configuration file.
    pub continent_json: PathBuf,
    /// Index into the continent configuration array.
    pub index: usize,
    pub run_type: RunType,
    /// Modules to append; reordered into the canonical append order.
    pub modules: Vec<ModuleKind>,
    pub paths: RunPaths,
    pub metadata: VariableMetadata,
    /// Where to push the finalized release. `None` leaves it on disk.
    pub upload: Option<Box<dyn UploadSink>>,
}

/// How one module fared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleStatus {
    /// Extracted and written.
    Appended,
    /// Extraction failed; the all-sentinel schema was written instead.
    AppendedEmpty,
    /// Not applicable to this run.
    Skipped,
    /// Nothing could be written for this module.
    Failed,
}

#[derive(Debug, Clone)]
pub struct ModuleOutcome {
    pub module: ModuleKind,
    pub status: ModuleStatus,
    pub detail: Option<String>,
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub continent: String,
    pub version: String,
    pub archive_path: PathBuf,
    pub outcomes: Vec<ModuleOutcome>,
}

impl RunReport {
    /// Number of modules that produced real data.
    pub fn appended(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == ModuleStatus::Appended)
            .count()
    }
}

/// Create the next archive release and append every requested module.
pub fn run(config: &RunConfig) -> Result<RunReport, OutputError> {
    let continent = load_continent(&config.continent_json, config.index)?;
    info!(
        continent = continent.code.as_str(),
        run_type = config.run_type.as_str(),
        "starting output run"
    );

    let topology = SosTopology::load(
        &continent.code,
        &config.paths.sos_dir(),
        &config.paths.swot_dir(),
    )?;
    info!(
        reaches = topology.num_reaches(),
        nodes = topology.num_nodes(),
        time_steps = topology.num_time_steps(),
        "topology loaded"
    );

    let mut archive = VersionManager::new(&continent, &config.paths).create_new_version(&topology)?;

    let ctx = ExtractContext {
        topology: &topology,
        paths: &config.paths,
        continent: &continent,
        run_type: config.run_type,
        fill: FillPolicy::default(),
    };
    let writer = ArchiveWriter::new(&ctx.fill, &config.metadata);

    let mut outcomes = Vec::new();
    for kind in order(&config.modules) {
        let outcome = match kind.reader() {
            Some(reader) => append_module(&mut archive, &writer, reader.as_ref(), &ctx),
            None => append_priors(&mut archive, &ctx, &config.metadata),
        };
        outcomes.push(outcome);
    }

    archive.finalize();
    info!(
        version = archive.version(),
        path = %archive.path().display(),
        "archive finalized"
    );

    match &config.upload {
        Some(sink) => {
            let figs = config.paths.validation_figs_dir();
            upload_archive(sink.as_ref(), &archive, config.run_type, Some(&figs))?;
        }
        None => info!("no upload sink configured, release left on disk"),
    }

    Ok(RunReport {
        continent: continent.code.clone(),
        version: archive.version().to_string(),
        archive_path: archive.path().to_path_buf(),
        outcomes,
    })
}

/// Requested modules, deduplicated and put in the canonical append order.
fn order(requested: &[ModuleKind]) -> Vec<ModuleKind> {
    ModuleKind::ALL
        .iter()
        .copied()
        .filter(|kind| requested.contains(kind))
        .collect()
}

fn append_module(
    archive: &mut SosArchive,
    writer: &ArchiveWriter,
    reader: &dyn ResultReader,
    ctx: &ExtractContext,
) -> ModuleOutcome {
    let kind = reader.kind();
    let (record, status, detail) = match reader.extract(ctx) {
        Ok(record) => (record, ModuleStatus::Appended, None),
        Err(e) => {
            warn!(
                module = kind.name(),
                error = %e,
                "extraction failed, appending sentinel schema"
            );
            let record = reader.empty(ctx);
            (record, ModuleStatus::AppendedEmpty, Some(e.to_string()))
        }
    };
    if let Err(e) = write_scoped(archive, writer, &record) {
        error!(module = kind.name(), error = %e, "append failed");
        return ModuleOutcome {
            module: kind,
            status: ModuleStatus::Failed,
            detail: Some(e.to_string()),
        };
    }
    info!(module = kind.name(), fields = record.field_count(), "appended");
    ModuleOutcome {
        module: kind,
        status,
        detail,
    }
}

/// The handle has to close between modules so every append lands on disk
/// before the next one opens the file.
fn write_scoped(
    archive: &mut SosArchive,
    writer: &ArchiveWriter,
    record: &ResultRecord,
) -> Result<(), ArchiveError> {
    let mut file = archive.open_append()?;
    writer.write_record(&mut file, record)
}

fn append_priors(
    archive: &mut SosArchive,
    ctx: &ExtractContext,
    metadata: &VariableMetadata,
) -> ModuleOutcome {
    if ctx.run_type == RunType::Unconstrained {
        info!(module = "priors", "unconstrained run, model priors not appended");
        return ModuleOutcome {
            module: ModuleKind::Priors,
            status: ModuleStatus::Skipped,
            detail: None,
        };
    }
    let result = archive
        .open_append()
        .map_err(|e| e.to_string())
        .and_then(|mut file| {
            priors::append_model_group(&mut file, ctx, metadata).map_err(|e| e.to_string())
        });
    match result {
        Ok(()) => {
            info!(module = "priors", "appended");
            ModuleOutcome {
                module: ModuleKind::Priors,
                status: ModuleStatus::Appended,
                detail: None,
            }
        }
        Err(detail) => {
            error!(module = "priors", error = detail.as_str(), "append failed");
            ModuleOutcome {
                module: ModuleKind::Priors,
                status: ModuleStatus::Failed,
                detail: Some(detail),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requested_modules_run_in_canonical_order() {
        let requested = vec![ModuleKind::Swot, ModuleKind::Hivdi, ModuleKind::Moi];
        assert_eq!(
            order(&requested),
            vec![ModuleKind::Hivdi, ModuleKind::Moi, ModuleKind::Swot]
        );
    }

    #[test]
    fn test_duplicate_requests_collapse() {
        let requested = vec![ModuleKind::Sad, ModuleKind::Sad];
        assert_eq!(order(&requested), vec![ModuleKind::Sad]);
    }

    #[test]
    fn test_report_counts_appended_modules() {
        let report = RunReport {
            continent: "na".to_string(),
            version: "0042".to_string(),
            archive_path: PathBuf::from("archive.nc"),
            outcomes: vec![
                ModuleOutcome {
                    module: ModuleKind::Hivdi,
                    status: ModuleStatus::Appended,
                    detail: None,
                },
                ModuleOutcome {
                    module: ModuleKind::Moi,
                    status: ModuleStatus::AppendedEmpty,
                    detail: Some("no result files".to_string()),
                },
                ModuleOutcome {
                    module: ModuleKind::Priors,
                    status: ModuleStatus::Skipped,
                    detail: None,
                },
            ],
        };
        assert_eq!(report.appended(), 1);
    }
}
