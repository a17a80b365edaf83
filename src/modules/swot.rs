//! SWOT observation times.
//!
//! The SWOT input files carry the observation inventory the algorithms ran
//! against: cycle/pass counts per reach and the actual observation times at
//! reach and node level. Unlike algorithm results these land in the shared
//! parts of the archive, not a module group: `observations` at the root,
//! `time` in `reaches` and `time` in `nodes`. All three are ragged since
//! each reach sees its own number of passes.
//!
//! An empty SWOT directory is reported as an error rather than quietly
//! yielding sentinels; without observations the run has nothing to merge.

use std::path::Path;

use tracing::warn;

use crate::record::{Field, FieldData, GroupTarget, RecordGroup, ResultRecord};

use super::{
    capture_attrs, place_node_rows, reach_files, read_f64_matrix, read_f64_vec, read_i32_vec,
    require_group, ExtractContext, ModuleError, ModuleKind, ResultReader,
};

struct SwotData {
    observations: Field,
    reach_time: Field,
    node_time: Field,
}

/// Reader for SWOT observation inventories.
pub struct SwotReader;

impl SwotReader {
    fn allocate(ctx: &ExtractContext) -> SwotData {
        let nr = ctx.topology.num_reaches();
        let nn = ctx.topology.num_nodes();
        SwotData {
            observations: Field::ragged_i32_by_reach("observations", nr, &ctx.fill),
            reach_time: Field::ragged_f64_by_reach("time", nr, &ctx.fill),
            node_time: Field::ragged_f64_by_node("time", nn, &ctx.fill),
        }
    }

    fn build(data: SwotData) -> ResultRecord {
        ResultRecord::new("swot").with_groups(vec![
            RecordGroup::new(GroupTarget::Root).with_fields(vec![data.observations]),
            RecordGroup::new(GroupTarget::Reaches).with_fields(vec![data.reach_time]),
            RecordGroup::new(GroupTarget::Nodes).with_fields(vec![data.node_time]),
        ])
    }
}

fn capture(path: &Path, data: &mut SwotData) -> Result<(), ModuleError> {
    let ds = netcdf::open(path)?;
    data.observations.attrs = capture_attrs(&ds, "observations");
    let reach = require_group(&ds, "reach")?;
    data.reach_time.attrs = capture_attrs(&reach, "time");
    let node = require_group(&ds, "node")?;
    data.node_time.attrs = capture_attrs(&node, "time");
    Ok(())
}

fn read_reach(
    path: &Path,
    data: &mut SwotData,
    ctx: &ExtractContext,
    row: usize,
    reach_id: i64,
) -> Result<(), ModuleError> {
    let ds = netcdf::open(path)?;

    if let FieldData::RaggedI32(r) = &mut data.observations.data {
        r.set_row(row, read_i32_vec(&ds, "observations", &ctx.fill)?);
    }

    let reach = require_group(&ds, "reach")?;
    if let FieldData::RaggedF64(r) = &mut data.reach_time.data {
        r.set_row(row, read_f64_vec(&reach, "time", &ctx.fill)?);
    }

    let node = require_group(&ds, "node")?;
    let m = read_f64_matrix(&node, "time", &ctx.fill)?;
    let source: Vec<Vec<f64>> = (0..m.nrows()).map(|r| m.row(r).to_vec()).collect();
    if let FieldData::RaggedF64(r) = &mut data.node_time.data {
        place_node_rows(
            r,
            ctx.topology.node_rows(reach_id),
            source,
            reach_id,
            ctx.fill.float64(),
        );
    }
    Ok(())
}

impl ResultReader for SwotReader {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Swot
    }

    fn empty(&self, ctx: &ExtractContext) -> ResultRecord {
        Self::build(Self::allocate(ctx))
    }

    fn extract(&self, ctx: &ExtractContext) -> Result<ResultRecord, ModuleError> {
        let dir = ctx.paths.swot_dir();
        let files = reach_files(&dir, ctx.continent, "_SWOT.nc")?;
        if files.is_empty() {
            return Err(ModuleError::NoFiles(dir));
        }
        let mut data = Self::allocate(ctx);

        if let Some(first) = files.values().next() {
            if let Err(e) = capture(first, &mut data) {
                warn!(error = %e, "swot attribute capture failed");
            }
        }

        for (row, &rid) in ctx.topology.reach_ids().iter().enumerate() {
            let Some(path) = files.get(&rid) else {
                continue;
            };
            if let Err(e) = read_reach(path, &mut data, ctx, row, rid) {
                warn!(reach_id = rid, error = %e, "swot reach failed, keeping sentinels");
            }
        }

        Ok(Self::build(data))
    }
}
