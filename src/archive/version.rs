//! Creation of a new archive release.
//!
//! A release is always fresh-created from the prior SoS file rather than
//! updated in place: the prior supplies the `Name` and `run_type` globals,
//! the version to bump and the identifier attributes, while the master
//! topology supplies the dimensions, the time axis and the identifier
//! arrays themselves.

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::info;

use crate::config::{ContinentSelection, RunPaths};
use crate::topology::{priors_file_name, results_file_name, SosTopology};

use super::ArchiveError;

/// Width of the zero-padded version identifier.
pub const VERSION_WIDTH: usize = 4;

/// Format of the `production_date` global attribute.
const PRODUCTION_DATE_FORMAT: &str = "%d-%b-%Y %H:%M:%S";

/// Lifecycle of the release within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    /// The file exists with identifiers and time axis, no module data yet.
    VersionCreated,
    /// At least one module record has been appended.
    ModulesAppended,
    /// All requested modules are in; the file will not change again.
    Finalized,
}

/// Handle to the release created by this run: where it lives, which version
/// it carries and how far the run has progressed.
#[derive(Debug)]
pub struct SosArchive {
    path: PathBuf,
    version: String,
    state: ArchiveState,
}

impl SosArchive {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Zero-padded version identifier of this release.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn state(&self) -> ArchiveState {
        self.state
    }

    /// Open the file for one module's append. The handle must be dropped
    /// before the next call so the file is closed and readable in between.
    pub fn open_append(&mut self) -> Result<netcdf::FileMut, ArchiveError> {
        let file = netcdf::append(&self.path)?;
        self.state = ArchiveState::ModulesAppended;
        Ok(file)
    }

    /// Mark the release complete. Upload only happens from this state.
    pub fn finalize(&mut self) {
        self.state = ArchiveState::Finalized;
    }

    pub fn is_finalized(&self) -> bool {
        self.state == ArchiveState::Finalized
    }
}

/// Creates the release file for one continent.
pub struct VersionManager<'a> {
    continent: &'a ContinentSelection,
    paths: &'a RunPaths,
}

impl<'a> VersionManager<'a> {
    pub fn new(continent: &'a ContinentSelection, paths: &'a RunPaths) -> Self {
        Self { continent, paths }
    }

    /// Fresh-create the next release under `output/sos`: bump the prior's
    /// version, stamp the production date, lay down the shared dimensions
    /// and time axis and copy the identifier groups.
    pub fn create_new_version(&self, topology: &SosTopology) -> Result<SosArchive, ArchiveError> {
        let prior_path = self
            .paths
            .sos_dir()
            .join(priors_file_name(&self.continent.code));
        if !prior_path.exists() {
            return Err(ArchiveError::MissingPrior(prior_path));
        }
        let prior = netcdf::open(&prior_path)?;

        let name = global_str(&prior, "Name")?;
        let run_type = global_str(&prior, "run_type")?;
        let version = next_version(&global_str(&prior, "version")?)?;

        let out_dir = self.paths.output.join("sos");
        std::fs::create_dir_all(&out_dir)?;
        let path = out_dir.join(results_file_name(&self.continent.code));

        {
            let mut file = netcdf::create(&path)?;
            file.add_attribute("Name", name.as_str())?;
            file.add_attribute("version", version.as_str())?;
            file.add_attribute(
                "production_date",
                Local::now().format(PRODUCTION_DATE_FORMAT).to_string(),
            )?;
            file.add_attribute("run_type", run_type.as_str())?;

            file.add_dimension("num_reaches", topology.num_reaches())?;
            file.add_dimension("num_nodes", topology.num_nodes())?;
            file.add_dimension("time_steps", topology.num_time_steps())?;

            {
                let mut time = file.add_variable::<i64>("time", &["time_steps"])?;
                if !topology.time().is_empty() {
                    time.put_values(topology.time(), ..)?;
                }
            }

            write_reaches(&prior, &mut file, topology)?;
            write_nodes(&prior, &mut file, topology)?;
        }

        info!(
            path = %path.display(),
            version = version.as_str(),
            "created new archive release"
        );
        Ok(SosArchive {
            path,
            version,
            state: ArchiveState::VersionCreated,
        })
    }
}

/// The `reaches` identifier group: ids from the topology, attributes from
/// the prior file.
fn write_reaches(
    prior: &netcdf::File,
    file: &mut netcdf::FileMut,
    topology: &SosTopology,
) -> Result<(), ArchiveError> {
    let mut group = file.add_group("reaches")?;
    let mut var = group.add_variable::<i64>("reach_id", &["num_reaches"])?;
    copy_identifier_attrs(prior, "reaches", "reach_id", &mut var)?;
    if !topology.reach_ids().is_empty() {
        var.put_values(topology.reach_ids(), ..)?;
    }
    Ok(())
}

/// The `nodes` identifier group: node ids and their owning reach ids.
fn write_nodes(
    prior: &netcdf::File,
    file: &mut netcdf::FileMut,
    topology: &SosTopology,
) -> Result<(), ArchiveError> {
    let mut group = file.add_group("nodes")?;
    {
        let mut var = group.add_variable::<i64>("node_id", &["num_nodes"])?;
        copy_identifier_attrs(prior, "nodes", "node_id", &mut var)?;
        if !topology.node_ids().is_empty() {
            var.put_values(topology.node_ids(), ..)?;
        }
    }
    {
        let mut var = group.add_variable::<i64>("reach_id", &["num_nodes"])?;
        copy_identifier_attrs(prior, "nodes", "reach_id", &mut var)?;
        if !topology.node_reach_ids().is_empty() {
            var.put_values(topology.node_reach_ids(), ..)?;
        }
    }
    Ok(())
}

/// Carry an identifier variable's attributes (`format` and friends) over
/// from the prior file, when the prior has the variable at all.
fn copy_identifier_attrs(
    prior: &netcdf::File,
    group: &str,
    var: &str,
    new: &mut netcdf::VariableMut,
) -> Result<(), ArchiveError> {
    let Some(source_group) = prior.group(group)? else {
        return Ok(());
    };
    let Some(source) = source_group.variable(var) else {
        return Ok(());
    };
    for attr in source.attributes() {
        let name = attr.name().to_string();
        if let Ok(value) = attr.value() {
            new.put_attribute(&name, value)?;
        }
    }
    Ok(())
}

/// A required string-typed global attribute of the prior file.
fn global_str(file: &netcdf::File, name: &str) -> Result<String, ArchiveError> {
    let value = file
        .attribute(name)
        .ok_or_else(|| ArchiveError::MissingGlobal(name.to_string()))?
        .value()?;
    match value {
        netcdf::AttributeValue::Str(s) => Ok(s),
        _ => Err(ArchiveError::MissingGlobal(name.to_string())),
    }
}

/// The bumped, zero-padded version identifier.
fn next_version(prior_version: &str) -> Result<String, ArchiveError> {
    let n: u32 = prior_version
        .trim()
        .parse()
        .map_err(|_| ArchiveError::BadVersion(prior_version.to_string()))?;
    Ok(format!("{:0width$}", n + 1, width = VERSION_WIDTH))
}
