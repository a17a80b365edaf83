//! Result readers, one per upstream module.
//!
//! Every reader follows the same shape: enumerate the module's result files,
//! allocate a [`ResultRecord`] sized to the master topology and pre-filled
//! with sentinels, then copy each discovered reach's values into the rows the
//! topology assigns. A reach without a file keeps its sentinels; a reach
//! whose file fails to read is logged and keeps its sentinels; a module with
//! no files at all yields its all-sentinel record so the archive schema stays
//! identical from run to run.
//!
//! Result files are named after the reach they cover, e.g.
//! `74267100051_hivdi.nc`, except for modules that solve sets of reaches at
//! once and join the ids with dashes, e.g.
//! `74267100051-74267100061_metroman.nc`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use tracing::warn;

use crate::config::{ConfigError, ContinentSelection, RunPaths, RunType};
use crate::fill::FillPolicy;
use crate::record::{AttrPair, DimRef, Field, FieldData, Matrix, Ragged, ResultRecord};
use crate::topology::SosTopology;

pub mod consensus;
pub mod hivdi;
pub mod lakeflow;
pub mod metroman;
pub mod moi;
pub mod momma;
pub mod neobam;
pub mod offline;
pub mod postdiagnostics;
pub mod prediagnostics;
pub mod priors;
pub mod sad;
pub mod sic4dvar;
pub mod ssc;
pub mod swot;
pub mod table;
pub mod validation;

/// Errors raised while reading one module's results. The orchestrator treats
/// these as recoverable: the module's group is still written, all sentinel.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NetCDF error: {0}")]
    NetCdf(#[from] netcdf::Error),

    #[error("missing group '{0}'")]
    MissingGroup(String),

    #[error("missing variable '{0}'")]
    MissingVariable(String),

    #[error("variable '{0}' has no values")]
    EmptyVariable(String),

    #[error("variable '{variable}' has {actual} dimensions, expected {expected}")]
    Shape {
        variable: String,
        expected: usize,
        actual: usize,
    },

    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("invalid timestamp '{0}'")]
    Timestamp(String),

    #[error("reach {0} not present in source file")]
    ReachNotInFile(i64),

    #[error("no result files found in {0}")]
    NoFiles(PathBuf),
}

// ============================================================================
// Module identity
// ============================================================================

/// The upstream modules whose results the output stage can merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Neobam,
    Hivdi,
    Metroman,
    Moi,
    Momma,
    Offline,
    Postdiagnostics,
    Prediagnostics,
    Priors,
    Sad,
    Sic4dvar,
    Swot,
    Validation,
    Consensus,
    Lakeflow,
    Ssc,
}

impl ModuleKind {
    /// Every known module, in append order.
    pub const ALL: [ModuleKind; 16] = [
        ModuleKind::Neobam,
        ModuleKind::Hivdi,
        ModuleKind::Metroman,
        ModuleKind::Moi,
        ModuleKind::Momma,
        ModuleKind::Offline,
        ModuleKind::Postdiagnostics,
        ModuleKind::Prediagnostics,
        ModuleKind::Priors,
        ModuleKind::Sad,
        ModuleKind::Sic4dvar,
        ModuleKind::Swot,
        ModuleKind::Validation,
        ModuleKind::Consensus,
        ModuleKind::Lakeflow,
        ModuleKind::Ssc,
    ];

    /// The modules appended when no explicit list is given.
    pub const DEFAULT_SET: [ModuleKind; 13] = [
        ModuleKind::Neobam,
        ModuleKind::Hivdi,
        ModuleKind::Metroman,
        ModuleKind::Moi,
        ModuleKind::Momma,
        ModuleKind::Offline,
        ModuleKind::Postdiagnostics,
        ModuleKind::Prediagnostics,
        ModuleKind::Priors,
        ModuleKind::Sad,
        ModuleKind::Sic4dvar,
        ModuleKind::Swot,
        ModuleKind::Validation,
    ];

    /// Module name as it appears in the archive and on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            ModuleKind::Neobam => "neobam",
            ModuleKind::Hivdi => "hivdi",
            ModuleKind::Metroman => "metroman",
            ModuleKind::Moi => "moi",
            ModuleKind::Momma => "momma",
            ModuleKind::Offline => "offline",
            ModuleKind::Postdiagnostics => "postdiagnostics",
            ModuleKind::Prediagnostics => "prediagnostics",
            ModuleKind::Priors => "priors",
            ModuleKind::Sad => "sad",
            ModuleKind::Sic4dvar => "sic4dvar",
            ModuleKind::Swot => "swot",
            ModuleKind::Validation => "validation",
            ModuleKind::Consensus => "consensus",
            ModuleKind::Lakeflow => "lakeflow",
            ModuleKind::Ssc => "ssc",
        }
    }

    /// The reader implementation for this module. Priors has none: it is a
    /// wholesale group copy appended directly by the orchestrator.
    pub fn reader(&self) -> Option<Box<dyn ResultReader>> {
        match self {
            ModuleKind::Neobam => Some(Box::new(neobam::NeobamReader)),
            ModuleKind::Hivdi => Some(Box::new(hivdi::HivdiReader)),
            ModuleKind::Metroman => Some(Box::new(metroman::MetromanReader)),
            ModuleKind::Moi => Some(Box::new(moi::MoiReader)),
            ModuleKind::Momma => Some(Box::new(momma::MommaReader)),
            ModuleKind::Offline => Some(Box::new(offline::OfflineReader)),
            ModuleKind::Postdiagnostics => Some(Box::new(postdiagnostics::PostdiagnosticsReader)),
            ModuleKind::Prediagnostics => Some(Box::new(prediagnostics::PrediagnosticsReader)),
            ModuleKind::Priors => None,
            ModuleKind::Sad => Some(Box::new(sad::SadReader)),
            ModuleKind::Sic4dvar => Some(Box::new(sic4dvar::Sic4dvarReader)),
            ModuleKind::Swot => Some(Box::new(swot::SwotReader)),
            ModuleKind::Validation => Some(Box::new(validation::ValidationReader)),
            ModuleKind::Consensus => Some(Box::new(consensus::ConsensusReader)),
            ModuleKind::Lakeflow => Some(Box::new(lakeflow::LakeflowReader)),
            ModuleKind::Ssc => Some(Box::new(ssc::SscReader)),
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModuleKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModuleKind::ALL
            .iter()
            .find(|m| m.name() == s)
            .copied()
            .ok_or_else(|| ConfigError::UnknownModule(s.to_string()))
    }
}

/// Parse a comma-separated module list, e.g. `"hivdi,moi,swot"`.
pub fn parse_module_list(s: &str) -> Result<Vec<ModuleKind>, ConfigError> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(ModuleKind::from_str)
        .collect()
}

// ============================================================================
// Reader interface
// ============================================================================

/// Everything a reader needs to locate its files and size its record.
pub struct ExtractContext<'a> {
    pub topology: &'a SosTopology,
    pub paths: &'a RunPaths,
    pub continent: &'a ContinentSelection,
    pub run_type: RunType,
    pub fill: FillPolicy,
}

/// One upstream module's reader.
pub trait ResultReader {
    fn kind(&self) -> ModuleKind;

    /// The all-sentinel record written when the module produced nothing, or
    /// when reading it failed outright. Must carry the same groups,
    /// dimensions and fields as a populated record.
    fn empty(&self, ctx: &ExtractContext) -> ResultRecord;

    /// Read every discovered result file and merge into one record shaped by
    /// the master topology. Per-reach problems are logged and leave
    /// sentinels behind; only environmental failures surface as errors.
    fn extract(&self, ctx: &ExtractContext) -> Result<ResultRecord, ModuleError>;
}

// ============================================================================
// Result file discovery
// ============================================================================

/// `.nc` entries of `dir` in name order. A missing directory is treated as
/// an empty one.
fn nc_entries(dir: &Path) -> Result<Vec<PathBuf>, ModuleError> {
    let read = match std::fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut paths: Vec<PathBuf> = read
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().map(|e| e == "nc").unwrap_or(false))
        .collect();
    paths.sort();
    Ok(paths)
}

/// Discover per-reach result files named `<reach_id><suffix>`, filtered to
/// the continent, keyed by reach id.
pub(crate) fn reach_files(
    dir: &Path,
    continent: &ContinentSelection,
    suffix: &str,
) -> Result<BTreeMap<i64, PathBuf>, ModuleError> {
    let mut files = BTreeMap::new();
    for path in nc_entries(dir)? {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(stem) = name.strip_suffix(suffix) else {
            continue;
        };
        let Ok(rid) = stem.parse::<i64>() else {
            continue;
        };
        if continent.matches_reach(rid) {
            files.insert(rid, path.clone());
        }
    }
    Ok(files)
}

/// Discover result files covering a set of reaches, named with dash-joined
/// ids like `74267100051-74267100061<suffix>`. Every listed reach maps to
/// the file.
pub(crate) fn reach_set_files(
    dir: &Path,
    continent: &ContinentSelection,
    suffix: &str,
) -> Result<BTreeMap<i64, PathBuf>, ModuleError> {
    let mut files = BTreeMap::new();
    for path in nc_entries(dir)? {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(stem) = name.strip_suffix(suffix) else {
            continue;
        };
        for token in stem.split('-') {
            let Ok(rid) = token.parse::<i64>() else {
                continue;
            };
            if continent.matches_reach(rid) {
                files.entry(rid).or_insert_with(|| path.clone());
            }
        }
    }
    Ok(files)
}

/// Discover `.csv` files in `dir`, in name order, optionally filtered by the
/// continent's reach-id prefixes.
pub(crate) fn csv_files(
    dir: &Path,
    continent: Option<&ContinentSelection>,
) -> Result<Vec<PathBuf>, ModuleError> {
    let read = match std::fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut paths: Vec<PathBuf> = read
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().map(|e| e == "csv").unwrap_or(false))
        .filter(|p| match continent {
            Some(cont) => p
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| cont.matches_stem(s))
                .unwrap_or(false),
            None => true,
        })
        .collect();
    paths.sort();
    Ok(paths)
}

// ============================================================================
// Source variable access
// ============================================================================

/// Variable lookup shared by files and groups, so the read helpers below
/// work at any level of a source file.
pub(crate) trait VarLookup {
    fn lookup(&self, name: &str) -> Option<netcdf::Variable<'_>>;
}

impl VarLookup for netcdf::File {
    fn lookup(&self, name: &str) -> Option<netcdf::Variable<'_>> {
        self.variable(name)
    }
}

impl VarLookup for netcdf::Group<'_> {
    fn lookup(&self, name: &str) -> Option<netcdf::Variable<'_>> {
        self.variable(name)
    }
}

/// Open a named child group, erroring when it is absent.
pub(crate) fn require_group<'f>(
    file: &'f netcdf::File,
    name: &str,
) -> Result<netcdf::Group<'f>, ModuleError> {
    file.group(name)?
        .ok_or_else(|| ModuleError::MissingGroup(name.to_string()))
}

fn require_var<'a>(
    src: &'a impl VarLookup,
    name: &str,
) -> Result<netcdf::Variable<'a>, ModuleError> {
    src.lookup(name)
        .ok_or_else(|| ModuleError::MissingVariable(name.to_string()))
}

fn attr_as_f64(var: &netcdf::Variable, name: &str) -> Option<f64> {
    var.attribute_value(name)
        .and_then(|a| a.ok())
        .and_then(|v| match v {
            netcdf::AttributeValue::Double(x) => Some(x),
            netcdf::AttributeValue::Float(x) => Some(x as f64),
            netcdf::AttributeValue::Int(x) => Some(x as f64),
            netcdf::AttributeValue::Longlong(x) => Some(x as f64),
            netcdf::AttributeValue::Short(x) => Some(x as f64),
            _ => None,
        })
}

/// The source variable's own missing marker, from `_FillValue` or
/// `missing_value`.
pub(crate) fn source_fill_f64(var: &netcdf::Variable) -> Option<f64> {
    attr_as_f64(var, "_FillValue").or_else(|| attr_as_f64(var, "missing_value"))
}

pub(crate) fn source_fill_i32(var: &netcdf::Variable) -> Option<i32> {
    source_fill_f64(var).map(|v| v as i32)
}

pub(crate) fn source_fill_i64(var: &netcdf::Variable) -> Option<i64> {
    source_fill_f64(var).map(|v| v as i64)
}

/// Read a 1-D f64 variable, mapping the source's missing convention onto
/// the archive sentinel.
pub(crate) fn read_f64_vec(
    src: &impl VarLookup,
    name: &str,
    fill: &FillPolicy,
) -> Result<Vec<f64>, ModuleError> {
    let var = require_var(src, name)?;
    let mut values = var.get_values::<f64, _>(..)?;
    fill.normalize_f64_slice(&mut values, source_fill_f64(&var));
    Ok(values)
}

pub(crate) fn read_i32_vec(
    src: &impl VarLookup,
    name: &str,
    fill: &FillPolicy,
) -> Result<Vec<i32>, ModuleError> {
    let var = require_var(src, name)?;
    let mut values = var.get_values::<i32, _>(..)?;
    fill.normalize_i32_slice(&mut values, source_fill_i32(&var));
    Ok(values)
}

pub(crate) fn read_i64_vec(
    src: &impl VarLookup,
    name: &str,
    fill: &FillPolicy,
) -> Result<Vec<i64>, ModuleError> {
    let var = require_var(src, name)?;
    let source_fill = source_fill_i64(&var);
    let values = var
        .get_values::<i64, _>(..)?
        .into_iter()
        .map(|v| fill.normalize_i64(v, source_fill))
        .collect();
    Ok(values)
}

/// Read a variable holding a single value (scalar or length-1 array).
pub(crate) fn read_scalar_f64(
    src: &impl VarLookup,
    name: &str,
    fill: &FillPolicy,
) -> Result<f64, ModuleError> {
    read_f64_vec(src, name, fill)?
        .first()
        .copied()
        .ok_or_else(|| ModuleError::EmptyVariable(name.to_string()))
}

/// Read a 2-D f64 variable with its row/column extent.
pub(crate) fn read_f64_matrix(
    src: &impl VarLookup,
    name: &str,
    fill: &FillPolicy,
) -> Result<crate::record::Matrix<f64>, ModuleError> {
    let var = require_var(src, name)?;
    let dims = var.dimensions();
    if dims.len() != 2 {
        return Err(ModuleError::Shape {
            variable: name.to_string(),
            expected: 2,
            actual: dims.len(),
        });
    }
    let nrows = dims[0].len();
    let ncols = dims[1].len();
    let mut values = var.get_values::<f64, _>(..)?;
    fill.normalize_f64_slice(&mut values, source_fill_f64(&var));
    Ok(crate::record::Matrix::from_vec(values, nrows, ncols))
}

/// Read a 2-D i32 variable with its row/column extent.
pub(crate) fn read_i32_matrix(
    src: &impl VarLookup,
    name: &str,
    fill: &FillPolicy,
) -> Result<crate::record::Matrix<i32>, ModuleError> {
    let var = require_var(src, name)?;
    let dims = var.dimensions();
    if dims.len() != 2 {
        return Err(ModuleError::Shape {
            variable: name.to_string(),
            expected: 2,
            actual: dims.len(),
        });
    }
    let nrows = dims[0].len();
    let ncols = dims[1].len();
    let mut values = var.get_values::<i32, _>(..)?;
    fill.normalize_i32_slice(&mut values, source_fill_i32(&var));
    Ok(crate::record::Matrix::from_vec(values, nrows, ncols))
}

/// Read a 1-D string variable element by element.
pub(crate) fn read_string_vec(
    src: &impl VarLookup,
    name: &str,
) -> Result<Vec<String>, ModuleError> {
    let var = require_var(src, name)?;
    let len = var
        .dimensions()
        .first()
        .map(|d| d.len())
        .ok_or_else(|| ModuleError::EmptyVariable(name.to_string()))?;
    let mut values = Vec::with_capacity(len);
    for i in 0..len {
        values.push(var.get_string([i])?);
    }
    Ok(values)
}

/// Capture a variable's attributes for re-emission. `_FillValue` is skipped
/// since the archive sets its own; an absent variable yields no attributes.
pub(crate) fn capture_attrs(src: &impl VarLookup, name: &str) -> Vec<AttrPair> {
    let Some(var) = src.lookup(name) else {
        return Vec::new();
    };
    var.attributes()
        .filter(|attr| attr.name() != "_FillValue")
        .filter_map(|attr| {
            let name = attr.name().to_string();
            attr.value().ok().map(|v| (name, v))
        })
        .collect()
}

/// Row of `reach_id` inside a source file covering several reaches.
pub(crate) fn file_row_of_reach(
    src: &impl VarLookup,
    reach_id: i64,
) -> Result<usize, ModuleError> {
    let ids = require_var(src, "reach_id")?.get_values::<i64, _>(..)?;
    ids.iter()
        .position(|&v| v == reach_id)
        .ok_or(ModuleError::ReachNotInFile(reach_id))
}

/// Unix timestamp of 2000-01-01T00:00:00Z, the archive's time origin.
pub(crate) const EPOCH_2000_UNIX: i64 = 946_684_800;

/// Seconds between a UTC timestamp string and the 2000-01-01 origin.
pub(crate) fn seconds_since_2000(value: &str, format: &str) -> Result<i64, ModuleError> {
    let dt = chrono::NaiveDateTime::parse_from_str(value, format)
        .map_err(|_| ModuleError::Timestamp(value.to_string()))?;
    Ok(dt.and_utc().timestamp() - EPOCH_2000_UNIX)
}

// ============================================================================
// Flat module layouts
// ============================================================================

/// Shape of one field in a flat (all-f64) module layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlatKind {
    /// One series per reach over the shared time axis.
    Series,
    /// One value per reach.
    Scalar,
}

/// One field in a flat module layout. Specs are declared in archive write
/// order; source values are read by name.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FlatSpec {
    pub name: &'static str,
    pub kind: FlatKind,
    /// Some sources omit the field; an optional field is skipped silently
    /// when absent instead of failing the reach.
    pub optional: bool,
}

impl FlatSpec {
    pub const fn series(name: &'static str) -> Self {
        Self {
            name,
            kind: FlatKind::Series,
            optional: false,
        }
    }

    pub const fn scalar(name: &'static str) -> Self {
        Self {
            name,
            kind: FlatKind::Scalar,
            optional: false,
        }
    }

    pub const fn optional_series(name: &'static str) -> Self {
        Self {
            name,
            kind: FlatKind::Series,
            optional: true,
        }
    }
}

enum FlatStorage {
    Series(Matrix<f64>),
    Scalar(Vec<f64>),
}

/// Working storage for a flat module: every field allocated against the
/// topology and pre-filled with the f64 sentinel.
pub(crate) struct FlatData {
    spec: &'static [FlatSpec],
    storage: Vec<FlatStorage>,
    attrs: Vec<Vec<AttrPair>>,
}

impl FlatData {
    pub fn new(spec: &'static [FlatSpec], ctx: &ExtractContext) -> Self {
        let nr = ctx.topology.num_reaches();
        let nt = ctx.topology.num_time_steps();
        let fv = ctx.fill.float64();
        let storage = spec
            .iter()
            .map(|s| match s.kind {
                FlatKind::Series => FlatStorage::Series(Matrix::filled(nr, nt, fv)),
                FlatKind::Scalar => FlatStorage::Scalar(vec![fv; nr]),
            })
            .collect();
        let attrs = vec![Vec::new(); spec.len()];
        Self {
            spec,
            storage,
            attrs,
        }
    }

    /// Capture every field's attributes from one source location.
    pub fn capture_attrs(&mut self, src: &impl VarLookup) {
        for (i, s) in self.spec.iter().enumerate() {
            self.attrs[i] = capture_attrs(src, s.name);
        }
    }

    /// Copy one reach's values from a source covering that reach alone.
    pub fn read_reach(
        &mut self,
        src: &impl VarLookup,
        row: usize,
        fill: &FillPolicy,
    ) -> Result<(), ModuleError> {
        for (i, s) in self.spec.iter().enumerate() {
            if s.optional && src.lookup(s.name).is_none() {
                continue;
            }
            match &mut self.storage[i] {
                FlatStorage::Series(m) => m.set_row(row, &read_f64_vec(src, s.name, fill)?),
                FlatStorage::Scalar(v) => v[row] = read_scalar_f64(src, s.name, fill)?,
            }
        }
        Ok(())
    }

    /// Copy one reach's values from a source covering several reaches,
    /// taking the `file_row`th entry of every field.
    pub fn read_reach_at(
        &mut self,
        src: &impl VarLookup,
        row: usize,
        file_row: usize,
        fill: &FillPolicy,
    ) -> Result<(), ModuleError> {
        for (i, s) in self.spec.iter().enumerate() {
            if s.optional && src.lookup(s.name).is_none() {
                continue;
            }
            match &mut self.storage[i] {
                FlatStorage::Series(m) => {
                    let source = read_f64_matrix(src, s.name, fill)?;
                    m.set_row(row, source.row(file_row));
                }
                FlatStorage::Scalar(v) => {
                    let source = read_f64_vec(src, s.name, fill)?;
                    v[row] = source
                        .get(file_row)
                        .copied()
                        .ok_or_else(|| ModuleError::EmptyVariable(s.name.to_string()))?;
                }
            }
        }
        Ok(())
    }

    /// Convert into archive fields, in declaration order.
    pub fn into_fields(self) -> Vec<Field> {
        self.spec
            .iter()
            .zip(self.storage)
            .zip(self.attrs)
            .map(|((s, storage), attrs)| match storage {
                FlatStorage::Series(m) => Field::new(
                    s.name,
                    &[DimRef::NumReaches, DimRef::TimeSteps],
                    FieldData::F64Matrix(m),
                )
                .with_attrs(attrs),
                FlatStorage::Scalar(v) => {
                    Field::new(s.name, &[DimRef::NumReaches], FieldData::F64(v))
                        .with_attrs(attrs)
                }
            })
            .collect()
    }
}

// ============================================================================
// Node placement
// ============================================================================

/// Reach whose per-node results omit the last two SWORD nodes.
pub const NODE_SHORT_TWO: i64 = 77444000061;

/// Reach whose per-node results omit the first SWORD node.
pub const NODE_SHORT_ONE: i64 = 77444000073;

/// Place per-node source rows into `target` at one reach's topology rows.
///
/// Two reaches are known to disagree with SWORD's node inventory:
/// [`NODE_SHORT_TWO`] results end two nodes early and [`NODE_SHORT_ONE`]
/// results start one node late. Their absent rows are padded with sentinel
/// series matching the source row length. Any other count mismatch is
/// logged and the leading rows are placed.
pub(crate) fn place_node_rows<T: Copy>(
    target: &mut Ragged<T>,
    rows: &[usize],
    source: Vec<Vec<T>>,
    reach_id: i64,
    sentinel: T,
) {
    let n = rows.len();
    let m = source.len();
    let inner = source.first().map(Vec::len).unwrap_or(1);

    if reach_id == NODE_SHORT_TWO && m + 2 == n {
        for (row, values) in rows.iter().zip(source) {
            target.set_row(*row, values);
        }
        target.set_row(rows[n - 2], vec![sentinel; inner]);
        target.set_row(rows[n - 1], vec![sentinel; inner]);
        return;
    }

    if reach_id == NODE_SHORT_ONE && m + 1 == n {
        target.set_row(rows[0], vec![sentinel; inner]);
        for (row, values) in rows[1..].iter().zip(source) {
            target.set_row(*row, values);
        }
        return;
    }

    if m != n {
        warn!(
            reach_id,
            expected = n,
            actual = m,
            "node count mismatch, placing leading rows"
        );
    }
    for (row, values) in rows.iter().zip(source) {
        target.set_row(*row, values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_names_round_trip() {
        for kind in ModuleKind::ALL {
            assert_eq!(kind.name().parse::<ModuleKind>().unwrap(), kind);
        }
        assert!("geobam".parse::<ModuleKind>().is_err());
    }

    #[test]
    fn test_parse_module_list() {
        let mods = parse_module_list("hivdi, moi,swot").unwrap();
        assert_eq!(
            mods,
            vec![ModuleKind::Hivdi, ModuleKind::Moi, ModuleKind::Swot]
        );
        assert!(parse_module_list("hivdi,nope").is_err());
    }

    #[test]
    fn test_default_set_has_no_opt_ins() {
        for kind in [ModuleKind::Consensus, ModuleKind::Lakeflow, ModuleKind::Ssc] {
            assert!(!ModuleKind::DEFAULT_SET.contains(&kind));
        }
        assert_eq!(ModuleKind::DEFAULT_SET.len(), 13);
    }

    fn cont() -> ContinentSelection {
        ContinentSelection {
            code: "na".into(),
            prefixes: vec![7],
        }
    }

    #[test]
    fn test_reach_file_discovery() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "74267100051_hivdi.nc",
            "74267100061_hivdi.nc",
            "44267100071_hivdi.nc",
            "74267100081_momma.nc",
            "readme.txt",
        ] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let files = reach_files(dir.path(), &cont(), "_hivdi.nc").unwrap();
        let rids: Vec<i64> = files.keys().copied().collect();
        assert_eq!(rids, vec![74267100051, 74267100061]);
    }

    #[test]
    fn test_reach_set_file_discovery() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("74267100051-74267100061_metroman.nc"),
            b"",
        )
        .unwrap();
        std::fs::write(dir.path().join("74267100071_metroman.nc"), b"").unwrap();
        let files = reach_set_files(dir.path(), &cont(), "_metroman.nc").unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(
            files[&74267100051],
            dir.path().join("74267100051-74267100061_metroman.nc")
        );
        assert_eq!(files[&74267100051], files[&74267100061]);
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let files = reach_files(Path::new("/nonexistent/xyz"), &cont(), "_hivdi.nc").unwrap();
        assert!(files.is_empty());
        let csvs = csv_files(Path::new("/nonexistent/xyz"), None).unwrap();
        assert!(csvs.is_empty());
    }

    #[test]
    fn test_csv_discovery_with_prefix_filter() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["74_a.csv", "44_b.csv", "74_c.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let all = csv_files(dir.path(), None).unwrap();
        assert_eq!(all.len(), 2);
        let filtered = csv_files(dir.path(), Some(&cont())).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0], dir.path().join("74_a.csv"));
    }

    #[test]
    fn test_place_node_rows_exact() {
        let mut target = Ragged::filled(4, -1.0);
        place_node_rows(
            &mut target,
            &[1, 2],
            vec![vec![1.0, 2.0], vec![3.0, 4.0]],
            123,
            -1.0,
        );
        assert_eq!(target.row(0), &[-1.0]);
        assert_eq!(target.row(1), &[1.0, 2.0]);
        assert_eq!(target.row(2), &[3.0, 4.0]);
    }

    #[test]
    fn test_place_node_rows_short_two() {
        let mut target = Ragged::filled(5, -1.0);
        place_node_rows(
            &mut target,
            &[0, 1, 2, 3],
            vec![vec![1.0, 1.5], vec![2.0, 2.5]],
            NODE_SHORT_TWO,
            -1.0,
        );
        assert_eq!(target.row(0), &[1.0, 1.5]);
        assert_eq!(target.row(1), &[2.0, 2.5]);
        assert_eq!(target.row(2), &[-1.0, -1.0]);
        assert_eq!(target.row(3), &[-1.0, -1.0]);
    }

    #[test]
    fn test_place_node_rows_short_one() {
        let mut target = Ragged::filled(4, -1.0);
        place_node_rows(
            &mut target,
            &[0, 1, 2],
            vec![vec![5.0], vec![6.0]],
            NODE_SHORT_ONE,
            -1.0,
        );
        assert_eq!(target.row(0), &[-1.0]);
        assert_eq!(target.row(1), &[5.0]);
        assert_eq!(target.row(2), &[6.0]);
    }

    #[test]
    fn test_place_node_rows_unexpected_mismatch_places_prefix() {
        let mut target = Ragged::filled(3, -1.0);
        place_node_rows(&mut target, &[0, 1, 2], vec![vec![9.0]], 555, -1.0);
        assert_eq!(target.row(0), &[9.0]);
        assert_eq!(target.row(1), &[-1.0]);
        assert_eq!(target.row(2), &[-1.0]);
    }
}
