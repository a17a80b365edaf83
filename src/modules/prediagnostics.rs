//! Prediagnostics quality flags.
//!
//! The prediagnostics stage filters SWOT observations before any algorithm
//! runs and records, per time step, which filters fired. Flags are integer
//! coded and ragged since each reach carries its own observation count.
//! The archive gets a `prediagnostics` group with `reach` and `node`
//! children; node flags sit columnwise in the source files (one column per
//! node, observations down the rows).

use std::path::Path;

use tracing::warn;

use crate::record::{Field, FieldData, GroupTarget, RecordGroup, ResultRecord};

use super::{
    capture_attrs, place_node_rows, reach_files, read_i32_matrix, read_i32_vec, require_group,
    ExtractContext, ModuleError, ModuleKind, ResultReader,
};

const REACH_FIELDS: &[&str] = &[
    "ice_clim_f",
    "ice_dyn_f",
    "dark_frac",
    "n_good_nod",
    "obs_frac_n",
    "width_outliers",
    "wse_outliers",
    "slope_outliers",
    "slope2_outliers",
    "low_slope_flag",
    "d_x_area_flag",
];

const NODE_FIELDS: &[&str] = &[
    "ice_clim_f",
    "ice_dyn_f",
    "dark_frac",
    "width_outliers",
    "wse_outliers",
    "slope_outliers",
    "slope2_outliers",
    "low_slope_flag",
    "d_x_area_flag",
];

struct PreData {
    reach: Vec<Field>,
    node: Vec<Field>,
}

/// Reader for prediagnostics flags.
pub struct PrediagnosticsReader;

impl PrediagnosticsReader {
    fn allocate(ctx: &ExtractContext) -> PreData {
        let nr = ctx.topology.num_reaches();
        let nn = ctx.topology.num_nodes();
        PreData {
            reach: REACH_FIELDS
                .iter()
                .map(|&name| Field::ragged_i32_by_reach(name, nr, &ctx.fill))
                .collect(),
            node: NODE_FIELDS
                .iter()
                .map(|&name| Field::ragged_i32_by_node(name, nn, &ctx.fill))
                .collect(),
        }
    }

    fn build(data: PreData) -> ResultRecord {
        ResultRecord::new("prediagnostics").with_groups(vec![
            RecordGroup::new(GroupTarget::ModuleChild("reach")).with_fields(data.reach),
            RecordGroup::new(GroupTarget::ModuleChild("node")).with_fields(data.node),
        ])
    }
}

fn capture(path: &Path, data: &mut PreData) -> Result<(), ModuleError> {
    let ds = netcdf::open(path)?;
    let reach = require_group(&ds, "reach")?;
    for field in &mut data.reach {
        field.attrs = capture_attrs(&reach, field.name);
    }
    let node = require_group(&ds, "node")?;
    for field in &mut data.node {
        field.attrs = capture_attrs(&node, field.name);
    }
    Ok(())
}

fn read_reach(
    path: &Path,
    data: &mut PreData,
    ctx: &ExtractContext,
    row: usize,
    reach_id: i64,
) -> Result<(), ModuleError> {
    let ds = netcdf::open(path)?;

    let reach = require_group(&ds, "reach")?;
    for field in &mut data.reach {
        if let FieldData::RaggedI32(r) = &mut field.data {
            r.set_row(row, read_i32_vec(&reach, field.name, &ctx.fill)?);
        }
    }

    let node = require_group(&ds, "node")?;
    let rows = ctx.topology.node_rows(reach_id);
    for field in &mut data.node {
        let m = read_i32_matrix(&node, field.name, &ctx.fill)?;
        // One column per node, observations down the rows.
        let columns: Vec<Vec<i32>> = (0..m.ncols())
            .map(|c| (0..m.nrows()).map(|r| m.get(r, c)).collect())
            .collect();
        if let FieldData::RaggedI32(r) = &mut field.data {
            place_node_rows(r, rows, columns, reach_id, ctx.fill.int32());
        }
    }
    Ok(())
}

impl ResultReader for PrediagnosticsReader {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Prediagnostics
    }

    fn empty(&self, ctx: &ExtractContext) -> ResultRecord {
        Self::build(Self::allocate(ctx))
    }

    fn extract(&self, ctx: &ExtractContext) -> Result<ResultRecord, ModuleError> {
        let dir = ctx.paths.prediagnostics_dir();
        let files = reach_files(&dir, ctx.continent, "_prediagnostics.nc")?;
        let mut data = Self::allocate(ctx);

        if let Some(first) = files.values().next() {
            if let Err(e) = capture(first, &mut data) {
                warn!(error = %e, "prediagnostics attribute capture failed");
            }
        }

        for (row, &rid) in ctx.topology.reach_ids().iter().enumerate() {
            let Some(path) = files.get(&rid) else {
                continue;
            };
            if let Err(e) = read_reach(path, &mut data, ctx, row, rid) {
                warn!(reach_id = rid, error = %e, "prediagnostics reach failed, keeping sentinels");
            }
        }

        Ok(Self::build(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContinentSelection, RunPaths, RunType};
    use crate::fill::{FillPolicy, INT_FILL};
    use crate::topology::SosTopology;

    fn write_result(path: &Path, nt: usize, num_nodes: usize) {
        let mut file = netcdf::create(path).unwrap();
        file.add_dimension("nt", nt).unwrap();
        file.add_dimension("nn", num_nodes).unwrap();

        let mut reach = file.add_group("reach").unwrap();
        for (i, &name) in REACH_FIELDS.iter().enumerate() {
            let values: Vec<i32> = (0..nt).map(|t| (i * 10 + t) as i32).collect();
            let mut var = reach.add_variable::<i32>(name, &["nt"]).unwrap();
            var.put_values(&values, ..).unwrap();
        }

        let mut node = file.add_group("node").unwrap();
        for (i, &name) in NODE_FIELDS.iter().enumerate() {
            // Row-major [nt, nn]: column j holds node j's flags.
            let values: Vec<i32> = (0..nt * num_nodes)
                .map(|k| {
                    let t = k / num_nodes;
                    let n = k % num_nodes;
                    (i * 100 + n * 10 + t) as i32
                })
                .collect();
            let mut var = node.add_variable::<i32>(name, &["nt", "nn"]).unwrap();
            var.put_values(&values, ..).unwrap();
        }
    }

    #[test]
    fn test_reach_and_node_flags_placed() {
        let dir = tempfile::tempdir().unwrap();
        let topology = SosTopology::from_arrays(
            vec![10, 20],
            vec![101, 201, 202],
            vec![10, 20, 20],
            vec![0, 1],
        );
        let paths = RunPaths::under(dir.path());
        let continent = ContinentSelection {
            code: "na".into(),
            prefixes: vec![1, 2],
        };
        std::fs::create_dir_all(paths.prediagnostics_dir()).unwrap();
        write_result(
            &paths.prediagnostics_dir().join("20_prediagnostics.nc"),
            2,
            2,
        );

        let ctx = ExtractContext {
            topology: &topology,
            paths: &paths,
            continent: &continent,
            run_type: RunType::Unconstrained,
            fill: FillPolicy::default(),
        };
        let record = PrediagnosticsReader.extract(&ctx).unwrap();

        let reach = record.group(GroupTarget::ModuleChild("reach")).unwrap();
        assert_eq!(reach.fields.len(), REACH_FIELDS.len());
        match &reach.field("dark_frac").unwrap().data {
            FieldData::RaggedI32(r) => {
                assert_eq!(r.row(0), &[INT_FILL]);
                assert_eq!(r.row(1), &[20, 21]);
            }
            _ => panic!("expected ragged i32"),
        }

        let node = record.group(GroupTarget::ModuleChild("node")).unwrap();
        assert_eq!(node.fields.len(), NODE_FIELDS.len());
        // ice_dyn_f is node field 1; node 201 takes column 0, node 202
        // column 1.
        match &node.field("ice_dyn_f").unwrap().data {
            FieldData::RaggedI32(r) => {
                assert_eq!(r.row(0), &[INT_FILL]);
                assert_eq!(r.row(1), &[100, 101]);
                assert_eq!(r.row(2), &[110, 111]);
            }
            _ => panic!("expected ragged i32"),
        }
    }
}
