//! Master reach/node topology for one continent.
//!
//! The prior SoS file is the authority on which reaches and nodes exist and
//! in what order. Every variable the output stage writes is sized and ordered
//! against this topology, never against whatever subset of reaches a module
//! happened to produce. The time axis comes from the SWOT observation files,
//! which all share the same `nt` coordinate.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

/// Errors raised while loading the topology. All of these are fatal: without
/// a topology there is nothing to size the archive against.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NetCDF error: {0}")]
    NetCdf(#[from] netcdf::Error),

    #[error("missing group '{0}' in SoS file")]
    MissingGroup(String),

    #[error("missing variable '{0}' in SoS file")]
    MissingVariable(String),

    #[error("node arrays disagree in length: {node_ids} node ids, {reach_ids} reach ids")]
    NodeLengthMismatch { node_ids: usize, reach_ids: usize },

    #[error("no SWOT observation files found in {0}")]
    NoSwotFiles(PathBuf),
}

/// SWORD version tag baked into the SoS file names.
pub const SWORD_VERSION: &str = "v11";

/// File name of the prior SoS archive for a continent, e.g.
/// `na_sword_v11_SOS_priors.nc`.
pub fn priors_file_name(continent: &str) -> String {
    format!("{continent}_sword_{SWORD_VERSION}_SOS_priors.nc")
}

/// File name of the results SoS archive for a continent, e.g.
/// `na_sword_v11_SOS_results.nc`.
pub fn results_file_name(continent: &str) -> String {
    format!("{continent}_sword_{SWORD_VERSION}_SOS_results.nc")
}

/// The master ordering of reaches, nodes and time steps for one continent.
#[derive(Debug, Clone)]
pub struct SosTopology {
    reach_ids: Vec<i64>,
    node_ids: Vec<i64>,
    node_reach_ids: Vec<i64>,
    time: Vec<i64>,
    reach_index: HashMap<i64, usize>,
    node_rows: HashMap<i64, Vec<usize>>,
}

impl SosTopology {
    /// Load the topology from the prior SoS file in `sos_dir` and the time
    /// axis from the first SWOT observation file in `swot_dir`.
    pub fn load(continent: &str, sos_dir: &Path, swot_dir: &Path) -> Result<Self, TopologyError> {
        let priors_path = sos_dir.join(priors_file_name(continent));
        let file = netcdf::open(&priors_path)?;

        let reaches = file
            .group("reaches")?
            .ok_or_else(|| TopologyError::MissingGroup("reaches".into()))?;
        let reach_ids = reaches
            .variable("reach_id")
            .ok_or_else(|| TopologyError::MissingVariable("reaches/reach_id".into()))?
            .get_values::<i64, _>(..)?;

        let nodes = file
            .group("nodes")?
            .ok_or_else(|| TopologyError::MissingGroup("nodes".into()))?;
        let node_ids = nodes
            .variable("node_id")
            .ok_or_else(|| TopologyError::MissingVariable("nodes/node_id".into()))?
            .get_values::<i64, _>(..)?;
        let node_reach_ids = nodes
            .variable("reach_id")
            .ok_or_else(|| TopologyError::MissingVariable("nodes/reach_id".into()))?
            .get_values::<i64, _>(..)?;

        if node_ids.len() != node_reach_ids.len() {
            return Err(TopologyError::NodeLengthMismatch {
                node_ids: node_ids.len(),
                reach_ids: node_reach_ids.len(),
            });
        }

        let time = read_time_axis(swot_dir)?;

        info!(
            continent,
            reaches = reach_ids.len(),
            nodes = node_ids.len(),
            time_steps = time.len(),
            "loaded topology"
        );

        Ok(Self::from_arrays(reach_ids, node_ids, node_reach_ids, time))
    }

    /// Build a topology from already-loaded arrays. Used by tests and by the
    /// loader above.
    pub fn from_arrays(
        reach_ids: Vec<i64>,
        node_ids: Vec<i64>,
        node_reach_ids: Vec<i64>,
        time: Vec<i64>,
    ) -> Self {
        let reach_index = reach_ids
            .iter()
            .enumerate()
            .map(|(i, &rid)| (rid, i))
            .collect();
        let mut node_rows: HashMap<i64, Vec<usize>> = HashMap::new();
        for (i, &rid) in node_reach_ids.iter().enumerate() {
            node_rows.entry(rid).or_default().push(i);
        }
        Self {
            reach_ids,
            node_ids,
            node_reach_ids,
            time,
            reach_index,
            node_rows,
        }
    }

    pub fn num_reaches(&self) -> usize {
        self.reach_ids.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.node_ids.len()
    }

    pub fn num_time_steps(&self) -> usize {
        self.time.len()
    }

    pub fn reach_ids(&self) -> &[i64] {
        &self.reach_ids
    }

    pub fn node_ids(&self) -> &[i64] {
        &self.node_ids
    }

    pub fn node_reach_ids(&self) -> &[i64] {
        &self.node_reach_ids
    }

    pub fn time(&self) -> &[i64] {
        &self.time
    }

    /// Row of a reach in the per-reach arrays, if it is part of the topology.
    pub fn reach_row(&self, reach_id: i64) -> Option<usize> {
        self.reach_index.get(&reach_id).copied()
    }

    /// Rows of a reach's nodes in the per-node arrays, in topology order.
    /// Empty when the reach has no nodes (or is unknown).
    pub fn node_rows(&self, reach_id: i64) -> &[usize] {
        self.node_rows
            .get(&reach_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Read the shared time axis (`nt`) from the first SWOT file, in name order.
fn read_time_axis(swot_dir: &Path) -> Result<Vec<i64>, TopologyError> {
    let mut names: Vec<PathBuf> = std::fs::read_dir(swot_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().map(|e| e == "nc").unwrap_or(false))
        .collect();
    names.sort();

    let first = names
        .first()
        .ok_or_else(|| TopologyError::NoSwotFiles(swot_dir.to_path_buf()))?;
    let file = netcdf::open(first)?;
    let nt = file
        .variable("nt")
        .ok_or_else(|| TopologyError::MissingVariable("nt".into()))?
        .get_values::<i64, _>(..)?;
    Ok(nt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SosTopology {
        SosTopology::from_arrays(
            vec![77444000063, 77444000073, 77444000083],
            vec![
                77444000630011,
                77444000630021,
                77444000730011,
                77444000730021,
                77444000730031,
                77444000830011,
            ],
            vec![
                77444000063,
                77444000063,
                77444000073,
                77444000073,
                77444000073,
                77444000083,
            ],
            vec![0, 1, 2, 3],
        )
    }

    #[test]
    fn test_counts() {
        let topo = sample();
        assert_eq!(topo.num_reaches(), 3);
        assert_eq!(topo.num_nodes(), 6);
        assert_eq!(topo.num_time_steps(), 4);
    }

    #[test]
    fn test_reach_row_lookup() {
        let topo = sample();
        assert_eq!(topo.reach_row(77444000073), Some(1));
        assert_eq!(topo.reach_row(123), None);
    }

    #[test]
    fn test_node_rows_in_order() {
        let topo = sample();
        assert_eq!(topo.node_rows(77444000073), &[2, 3, 4]);
        assert_eq!(topo.node_rows(77444000083), &[5]);
        assert!(topo.node_rows(99).is_empty());
    }

    #[test]
    fn test_file_names() {
        assert_eq!(priors_file_name("na"), "na_sword_v11_SOS_priors.nc");
        assert_eq!(results_file_name("eu"), "eu_sword_v11_SOS_results.nc");
    }
}
