//! Postdiagnostics flags.
//!
//! Postdiagnostics scores every algorithm's discharge after integration,
//! one flag per algorithm per reach. Results arrive as a file pair per
//! reach: `basin/<reach_id>_moi_diag.nc` with basin-scale flags and
//! `reach/<reach_id>_flpe_diag.nc` with reach-scale flags. The algorithm
//! inventory (`algo_names`, and with it the `num_algos` dimension) comes
//! from the first basin file; a run with no basin files archives the group
//! with a zero-length algorithm axis so the schema stays stable.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::fill::FillPolicy;
use crate::record::{
    AttrPair, DimRef, Field, FieldData, GroupTarget, LocalDim, Matrix, RecordGroup, ResultRecord,
};

use super::{
    capture_attrs, reach_files, read_f64_vec, read_string_vec, ExtractContext, ModuleError,
    ModuleKind, ResultReader,
};

const ALGO_DIM: &str = "num_algos";

const BASIN_FIELDS: &[&str] = &["realism_flags", "stability_flags", "prepost_flags"];
const REACH_FIELDS: &[&str] = &["realism_flags", "stability_flags"];

struct FlagSet {
    names: &'static [&'static str],
    matrices: Vec<Matrix<i32>>,
    attrs: Vec<Vec<AttrPair>>,
}

impl FlagSet {
    fn new(names: &'static [&'static str], num_reaches: usize, num_algos: usize, fill: i32) -> Self {
        Self {
            names,
            matrices: names
                .iter()
                .map(|_| Matrix::filled(num_reaches, num_algos, fill))
                .collect(),
            attrs: vec![Vec::new(); names.len()],
        }
    }

    fn capture(&mut self, ds: &netcdf::File) {
        for (i, &name) in self.names.iter().enumerate() {
            self.attrs[i] = capture_attrs(ds, name);
        }
    }

    fn read_row(&mut self, ds: &netcdf::File, row: usize, fill: &FillPolicy) -> Result<(), ModuleError> {
        for (i, &name) in self.names.iter().enumerate() {
            let values: Vec<i32> = read_f64_vec(ds, name, fill)?
                .into_iter()
                .map(|v| if fill.is_float_fill(v) { fill.int32() } else { v as i32 })
                .collect();
            self.matrices[i].set_row(row, &values);
        }
        Ok(())
    }

    fn into_fields(self) -> Vec<Field> {
        self.names
            .iter()
            .zip(self.matrices)
            .zip(self.attrs)
            .map(|((&name, m), attrs)| {
                Field::new(
                    name,
                    &[DimRef::NumReaches, DimRef::Local(ALGO_DIM)],
                    FieldData::I32Matrix(m),
                )
                .with_attrs(attrs)
            })
            .collect()
    }
}

struct PostData {
    algo_names: Vec<String>,
    basin: FlagSet,
    reach: FlagSet,
}

/// Reader for postdiagnostics flags.
pub struct PostdiagnosticsReader;

impl PostdiagnosticsReader {
    fn allocate(ctx: &ExtractContext, algo_names: Vec<String>) -> PostData {
        let nr = ctx.topology.num_reaches();
        let na = algo_names.len();
        let fv = ctx.fill.int32();
        PostData {
            algo_names,
            basin: FlagSet::new(BASIN_FIELDS, nr, na, fv),
            reach: FlagSet::new(REACH_FIELDS, nr, na, fv),
        }
    }

    fn build(data: PostData) -> ResultRecord {
        let num_algos = data.algo_names.len();
        let counter: Vec<i32> = (1..=num_algos as i32).collect();
        ResultRecord::new("postdiagnostics").with_groups(vec![
            RecordGroup::new(GroupTarget::Module)
                .with_dims(vec![LocalDim::unlimited(ALGO_DIM, num_algos)])
                .with_fields(vec![
                    Field::new("num_algos", &[DimRef::Local(ALGO_DIM)], FieldData::I32(counter)),
                    Field::new(
                        "algo_names",
                        &[DimRef::Local(ALGO_DIM)],
                        FieldData::Strings(data.algo_names),
                    ),
                ]),
            RecordGroup::new(GroupTarget::ModuleChild("basin"))
                .with_fields(data.basin.into_fields()),
            RecordGroup::new(GroupTarget::ModuleChild("reach"))
                .with_fields(data.reach.into_fields()),
        ])
    }

    fn reach_file(ctx: &ExtractContext, reach_id: i64) -> PathBuf {
        ctx.paths
            .postdiagnostics_dir()
            .join("reach")
            .join(format!("{reach_id}_flpe_diag.nc"))
    }
}

fn read_pair(
    basin_path: &Path,
    reach_path: &Path,
    data: &mut PostData,
    row: usize,
    fill: &FillPolicy,
) -> Result<(), ModuleError> {
    let basin_ds = netcdf::open(basin_path)?;
    data.basin.read_row(&basin_ds, row, fill)?;
    let reach_ds = netcdf::open(reach_path)?;
    data.reach.read_row(&reach_ds, row, fill)?;
    Ok(())
}

impl ResultReader for PostdiagnosticsReader {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Postdiagnostics
    }

    fn empty(&self, ctx: &ExtractContext) -> ResultRecord {
        Self::build(Self::allocate(ctx, Vec::new()))
    }

    fn extract(&self, ctx: &ExtractContext) -> Result<ResultRecord, ModuleError> {
        let basin_dir = ctx.paths.postdiagnostics_dir().join("basin");
        let files = reach_files(&basin_dir, ctx.continent, "_moi_diag.nc")?;

        let Some((&first_rid, first)) = files.iter().next() else {
            return Ok(self.empty(ctx));
        };
        let mut data = {
            let ds = netcdf::open(first)?;
            let mut data = Self::allocate(ctx, read_string_vec(&ds, "algo_names")?);
            data.basin.capture(&ds);
            data
        };
        match netcdf::open(Self::reach_file(ctx, first_rid)) {
            Ok(ds) => data.reach.capture(&ds),
            Err(e) => warn!(error = %e, "postdiagnostics reach attribute capture failed"),
        }

        for (row, &rid) in ctx.topology.reach_ids().iter().enumerate() {
            let Some(basin_path) = files.get(&rid) else {
                continue;
            };
            let reach_path = Self::reach_file(ctx, rid);
            if let Err(e) = read_pair(basin_path, &reach_path, &mut data, row, &ctx.fill) {
                warn!(reach_id = rid, error = %e, "postdiagnostics reach failed, keeping sentinels");
            }
        }

        Ok(Self::build(data))
    }
}
