//! Run configuration: continent selection, directory layout, run type and
//! the optional variable-metadata overlay.
//!
//! A batch deployment runs one process per continent. The continent JSON is
//! an array of single-key objects, e.g.
//!
//! ```json
//! [{"af": [1]}, {"as": [4, 3]}, {"eu": [2]}, {"na": [7, 8, 9]}]
//! ```
//!
//! and the job's array index picks the entry. The key is the continent code
//! used in file names; the values are the leading reach-id digits belonging
//! to that continent, used to filter source files.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use thiserror::Error;

use crate::record::AttrPair;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("continent index {index} out of range ({len} entries)")]
    ContinentIndex { index: usize, len: usize },

    #[error("continent entry {0} has no key")]
    EmptyContinentEntry(usize),

    #[error("unknown run type '{0}' (expected 'constrained' or 'unconstrained')")]
    UnknownRunType(String),

    #[error("unknown module '{0}'")]
    UnknownModule(String),
}

// ============================================================================
// Continent selection
// ============================================================================

/// The continent a run operates on: its file-name code and the reach-id
/// prefixes that identify its reaches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinentSelection {
    pub code: String,
    pub prefixes: Vec<i64>,
}

impl ContinentSelection {
    /// True when `reach_id` belongs to this continent, judged by its leading
    /// digits.
    pub fn matches_reach(&self, reach_id: i64) -> bool {
        let s = reach_id.to_string();
        self.prefixes.iter().any(|p| s.starts_with(&p.to_string()))
    }

    /// True when a file stem's leading digits belong to this continent.
    pub fn matches_stem(&self, stem: &str) -> bool {
        self.prefixes.iter().any(|p| stem.starts_with(&p.to_string()))
    }
}

/// Load the continent entry at `index` from the continent JSON file.
pub fn load_continent(path: &Path, index: usize) -> Result<ContinentSelection, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let entries: Vec<BTreeMap<String, Vec<i64>>> = serde_json::from_str(&text)?;
    let len = entries.len();
    let entry = entries
        .get(index)
        .ok_or(ConfigError::ContinentIndex { index, len })?;
    let (code, prefixes) = entry
        .iter()
        .next()
        .ok_or(ConfigError::EmptyContinentEntry(index))?;
    Ok(ContinentSelection {
        code: code.clone(),
        prefixes: prefixes.clone(),
    })
}

// ============================================================================
// Run type
// ============================================================================

/// Whether the run used gauge-constrained priors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunType {
    Constrained,
    Unconstrained,
}

impl RunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunType::Constrained => "constrained",
            RunType::Unconstrained => "unconstrained",
        }
    }
}

impl fmt::Display for RunType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "constrained" => Ok(RunType::Constrained),
            "unconstrained" => Ok(RunType::Unconstrained),
            other => Err(ConfigError::UnknownRunType(other.to_string())),
        }
    }
}

// ============================================================================
// Directory layout
// ============================================================================

/// The mounted directory layout of one run. Defaults match the batch
/// container mounts; every path can be overridden for local runs.
#[derive(Debug, Clone)]
pub struct RunPaths {
    /// Inputs: `sos/` priors archives and `swot/` observation files.
    pub input: PathBuf,
    /// Reach-scale FLPE algorithm outputs, one subdirectory per algorithm.
    pub flpe: PathBuf,
    /// Basin-scale integrator outputs.
    pub moi: PathBuf,
    /// Diagnostic outputs (`prediagnostics/`, `postdiagnostics/`).
    pub diagnostics: PathBuf,
    /// Offline discharge outputs.
    pub offline: PathBuf,
    /// Validation outputs (`stats/`, `figs/`).
    pub validation: PathBuf,
    /// Lake discharge outputs (`out/` CSVs).
    pub lakeflow: PathBuf,
    /// Sediment concentration CSVs.
    pub ssc: PathBuf,
    /// Where the new archive version is written.
    pub output: PathBuf,
}

impl Default for RunPaths {
    fn default() -> Self {
        Self {
            input: PathBuf::from("/mnt/data/input"),
            flpe: PathBuf::from("/mnt/data/flpe"),
            moi: PathBuf::from("/mnt/data/moi"),
            diagnostics: PathBuf::from("/mnt/data/diagnostics"),
            offline: PathBuf::from("/mnt/data/offline"),
            validation: PathBuf::from("/mnt/data/validation"),
            lakeflow: PathBuf::from("/mnt/data/lakeflow"),
            ssc: PathBuf::from("/mnt/data/ssc"),
            output: PathBuf::from("/mnt/data/output"),
        }
    }
}

impl RunPaths {
    /// All directories rooted under one base, mirroring the mount layout.
    /// Used by local runs and tests.
    pub fn under(base: &Path) -> Self {
        Self {
            input: base.join("input"),
            flpe: base.join("flpe"),
            moi: base.join("moi"),
            diagnostics: base.join("diagnostics"),
            offline: base.join("offline"),
            validation: base.join("validation"),
            lakeflow: base.join("lakeflow"),
            ssc: base.join("ssc"),
            output: base.join("output"),
        }
    }

    pub fn sos_dir(&self) -> PathBuf {
        self.input.join("sos")
    }

    pub fn swot_dir(&self) -> PathBuf {
        self.input.join("swot")
    }

    pub fn prediagnostics_dir(&self) -> PathBuf {
        self.diagnostics.join("prediagnostics")
    }

    pub fn postdiagnostics_dir(&self) -> PathBuf {
        self.diagnostics.join("postdiagnostics")
    }

    pub fn validation_stats_dir(&self) -> PathBuf {
        self.validation.join("stats")
    }

    pub fn validation_figs_dir(&self) -> PathBuf {
        self.validation.join("figs")
    }

    pub fn consensus_dir(&self) -> PathBuf {
        self.flpe.join("consensus")
    }

    pub fn lakeflow_out_dir(&self) -> PathBuf {
        self.lakeflow.join("out")
    }
}

// ============================================================================
// Variable metadata overlay
// ============================================================================

/// Curated attribute overlay, keyed by module, optional child group and
/// variable name. Attributes found here are applied on top of whatever the
/// source files carried, so curated metadata wins on conflicts.
#[derive(Debug, Clone, Default)]
pub struct VariableMetadata {
    root: Value,
}

impl VariableMetadata {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let root: Value = serde_json::from_str(&text)?;
        Ok(Self { root })
    }

    /// An overlay with no entries; every lookup yields nothing.
    pub fn empty() -> Self {
        Self { root: Value::Null }
    }

    /// Attributes registered for the variable at `path`, e.g.
    /// `["prediagnostics", "reach", "ice_clim_f"]`.
    pub fn attrs_for(&self, path: &[&str]) -> Vec<AttrPair> {
        let mut node = &self.root;
        for key in path {
            match node.get(key) {
                Some(next) => node = next,
                None => return Vec::new(),
            }
        }
        let Some(map) = node.as_object() else {
            return Vec::new();
        };
        map.iter()
            .filter_map(|(name, value)| {
                json_to_attr(value).map(|attr| (name.clone(), attr))
            })
            .collect()
    }
}

/// Convert a JSON value into a NetCDF attribute value. Unrepresentable
/// values (objects, booleans, mixed arrays) are dropped.
fn json_to_attr(value: &Value) -> Option<netcdf::AttributeValue> {
    match value {
        Value::String(s) => Some(netcdf::AttributeValue::Str(s.clone())),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(netcdf::AttributeValue::Longlong(i))
            } else {
                n.as_f64().map(netcdf::AttributeValue::Double)
            }
        }
        Value::Array(items) => {
            if items.iter().all(|v| v.is_string()) {
                let strs: Vec<String> = items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
                Some(netcdf::AttributeValue::Strs(strs))
            } else if items.iter().all(|v| v.is_number()) {
                let nums: Vec<f64> = items.iter().filter_map(Value::as_f64).collect();
                Some(netcdf::AttributeValue::Doubles(nums))
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_continent_matching() {
        let cont = ContinentSelection {
            code: "na".into(),
            prefixes: vec![7, 8],
        };
        assert!(cont.matches_reach(77444000063));
        assert!(cont.matches_reach(81234000015));
        assert!(!cont.matches_reach(12345000011));
        assert!(cont.matches_stem("74267100051_hivdi.nc"));
        assert!(!cont.matches_stem("44267100051_hivdi.nc"));
    }

    #[test]
    fn test_load_continent_by_index() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"[{{"af": [1]}}, {{"as": [4, 3]}}, {{"na": [7, 8, 9]}}]"#
        )
        .unwrap();
        let cont = load_continent(f.path(), 2).unwrap();
        assert_eq!(cont.code, "na");
        assert_eq!(cont.prefixes, vec![7, 8, 9]);

        let err = load_continent(f.path(), 5).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ContinentIndex { index: 5, len: 3 }
        ));
    }

    #[test]
    fn test_run_type_round_trip() {
        assert_eq!(
            "constrained".parse::<RunType>().unwrap(),
            RunType::Constrained
        );
        assert_eq!(
            "unconstrained".parse::<RunType>().unwrap(),
            RunType::Unconstrained
        );
        assert!("priors".parse::<RunType>().is_err());
        assert_eq!(RunType::Constrained.to_string(), "constrained");
    }

    #[test]
    fn test_paths_under_base() {
        let paths = RunPaths::under(Path::new("/tmp/run"));
        assert_eq!(paths.sos_dir(), Path::new("/tmp/run/input/sos"));
        assert_eq!(paths.swot_dir(), Path::new("/tmp/run/input/swot"));
        assert_eq!(
            paths.postdiagnostics_dir(),
            Path::new("/tmp/run/diagnostics/postdiagnostics")
        );
        assert_eq!(
            paths.validation_stats_dir(),
            Path::new("/tmp/run/validation/stats")
        );
    }

    #[test]
    fn test_metadata_lookup() {
        let json = r#"{
            "hivdi": {
                "A0": {"long_name": "baseflow area", "units": "m^2", "valid_min": 0}
            },
            "prediagnostics": {
                "reach": {"ice_clim_f": {"flag_values": [0, 1, 2]}}
            }
        }"#;
        let meta = VariableMetadata {
            root: serde_json::from_str(json).unwrap(),
        };

        let attrs = meta.attrs_for(&["hivdi", "A0"]);
        assert_eq!(attrs.len(), 3);
        assert!(attrs.iter().any(|(n, v)| n == "units"
            && matches!(v, netcdf::AttributeValue::Str(s) if s == "m^2")));
        assert!(attrs.iter().any(|(n, v)| n == "valid_min"
            && matches!(v, netcdf::AttributeValue::Longlong(0))));

        let flags = meta.attrs_for(&["prediagnostics", "reach", "ice_clim_f"]);
        assert_eq!(flags.len(), 1);
        assert!(matches!(
            &flags[0].1,
            netcdf::AttributeValue::Doubles(v) if v == &[0.0, 1.0, 2.0]
        ));

        assert!(meta.attrs_for(&["nope", "nothing"]).is_empty());
        assert!(VariableMetadata::empty().attrs_for(&["hivdi", "A0"]).is_empty());
    }
}
