//! SIC4DVar results.
//!
//! Reach-level output is flat: `A0`, `n` and two discharge series, one per
//! algorithm variant. Node-level output (`half_width`, `elevation`) only
//! exists for reaches the module actually ran, so it is archived as a
//! compacted node subset: an unlimited `num_sic4dvar_nodes` dimension with
//! `sic4dvar_node_id` / `sic4dvar_reach_id` coordinates and one ragged
//! series per node. Node placement honors the two reaches whose result
//! files disagree with the SWORD node inventory.

use std::path::Path;

use tracing::warn;

use crate::record::{
    AttrPair, DimRef, Field, FieldData, GroupTarget, LocalDim, Ragged, RecordGroup, ResultRecord,
};
use crate::topology::SosTopology;

use super::{
    capture_attrs, place_node_rows, reach_files, read_f64_matrix, ExtractContext, FlatData,
    FlatSpec, ModuleError, ModuleKind, ResultReader,
};

const SPEC: &[FlatSpec] = &[
    FlatSpec::scalar("A0"),
    FlatSpec::scalar("n"),
    FlatSpec::series("Qalgo31"),
    FlatSpec::series("Qalgo5"),
];

const NODE_DIM: &str = "num_sic4dvar_nodes";

struct SicData {
    flat: FlatData,
    /// Zero until a reach's file marks its nodes.
    node_id: Vec<i64>,
    half_width: Ragged<f64>,
    elevation: Ragged<f64>,
    hw_attrs: Vec<AttrPair>,
    el_attrs: Vec<AttrPair>,
}

/// Reader for SIC4DVar results.
pub struct Sic4dvarReader;

impl Sic4dvarReader {
    fn allocate(ctx: &ExtractContext) -> SicData {
        let nn = ctx.topology.num_nodes();
        SicData {
            flat: FlatData::new(SPEC, ctx),
            node_id: vec![0; nn],
            half_width: Ragged::filled(nn, ctx.fill.float64()),
            elevation: Ragged::filled(nn, ctx.fill.float64()),
            hw_attrs: Vec::new(),
            el_attrs: Vec::new(),
        }
    }

    /// Compact the node-level arrays down to the nodes that were marked,
    /// then assemble the record.
    fn build(data: SicData, topology: &SosTopology) -> ResultRecord {
        let mut ids = Vec::new();
        let mut reach_ids = Vec::new();
        let mut half_width = Ragged::empty();
        let mut elevation = Ragged::empty();
        for (i, &nid) in data.node_id.iter().enumerate() {
            if nid != 0 {
                ids.push(nid);
                reach_ids.push(topology.node_reach_ids()[i]);
                half_width.push_row(data.half_width.row(i).to_vec());
                elevation.push_row(data.elevation.row(i).to_vec());
            }
        }
        let subset_len = ids.len();

        let mut fields = data.flat.into_fields();
        fields.push(Field::new(
            "sic4dvar_node_id",
            &[DimRef::Local(NODE_DIM)],
            FieldData::I64(ids),
        ));
        fields.push(Field::new(
            "sic4dvar_reach_id",
            &[DimRef::Local(NODE_DIM)],
            FieldData::I64(reach_ids),
        ));
        fields.push(
            Field::new(
                "half_width",
                &[DimRef::Local(NODE_DIM)],
                FieldData::RaggedF64(half_width),
            )
            .with_attrs(data.hw_attrs),
        );
        fields.push(
            Field::new(
                "elevation",
                &[DimRef::Local(NODE_DIM)],
                FieldData::RaggedF64(elevation),
            )
            .with_attrs(data.el_attrs),
        );

        ResultRecord::new("sic4dvar").with_groups(vec![RecordGroup::new(GroupTarget::Module)
            .with_dims(vec![LocalDim::unlimited(NODE_DIM, subset_len)])
            .with_fields(fields)])
    }
}

fn capture(path: &Path, data: &mut SicData) -> Result<(), ModuleError> {
    let ds = netcdf::open(path)?;
    data.flat.capture_attrs(&ds);
    data.hw_attrs = capture_attrs(&ds, "half_width");
    data.el_attrs = capture_attrs(&ds, "elevation");
    Ok(())
}

fn read_reach(
    path: &Path,
    data: &mut SicData,
    ctx: &ExtractContext,
    row: usize,
    reach_id: i64,
) -> Result<(), ModuleError> {
    let ds = netcdf::open(path)?;
    data.flat.read_reach(&ds, row, &ctx.fill)?;

    let rows = ctx.topology.node_rows(reach_id);
    for (name, target) in [
        ("half_width", &mut data.half_width),
        ("elevation", &mut data.elevation),
    ] {
        let m = read_f64_matrix(&ds, name, &ctx.fill)?;
        let source: Vec<Vec<f64>> = (0..m.nrows()).map(|r| m.row(r).to_vec()).collect();
        place_node_rows(target, rows, source, reach_id, ctx.fill.float64());
    }
    for &node_row in rows {
        data.node_id[node_row] = ctx.topology.node_ids()[node_row];
    }
    Ok(())
}

impl ResultReader for Sic4dvarReader {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Sic4dvar
    }

    fn empty(&self, ctx: &ExtractContext) -> ResultRecord {
        Self::build(Self::allocate(ctx), ctx.topology)
    }

    fn extract(&self, ctx: &ExtractContext) -> Result<ResultRecord, ModuleError> {
        let dir = ctx.paths.flpe.join("sic4dvar");
        let files = reach_files(&dir, ctx.continent, "_sic4dvar.nc")?;
        let mut data = Self::allocate(ctx);

        if let Some(first) = files.values().next() {
            if let Err(e) = capture(first, &mut data) {
                warn!(error = %e, "sic4dvar attribute capture failed");
            }
        }

        for (row, &rid) in ctx.topology.reach_ids().iter().enumerate() {
            let Some(path) = files.get(&rid) else {
                continue;
            };
            if let Err(e) = read_reach(path, &mut data, ctx, row, rid) {
                warn!(reach_id = rid, error = %e, "sic4dvar reach failed, keeping sentinels");
            }
        }

        Ok(Self::build(data, ctx.topology))
    }
}
