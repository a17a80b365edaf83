//! Validation statistics.
//!
//! Validation compares algorithm discharge against gauge records and writes
//! one `<reach_id>_validation.nc` per reach with a per-algorithm vector for
//! each goodness-of-fit metric. The algorithm axis is shared across files,
//! so its length is probed from the first file discovered; a reach without
//! a stats file keeps sentinel metrics and an empty algorithm list.

use tracing::warn;

use crate::record::{
    DimRef, Field, FieldData, GroupTarget, LocalDim, Matrix, Matrix2Strings, RecordGroup,
    ResultRecord,
};

use super::{
    reach_files, read_f64_vec, read_string_vec, ExtractContext, ModuleError, ModuleKind,
    ResultReader,
};

const ALGO_DIM: &str = "num_algos";

/// Archive name and source variable name for each metric.
const METRICS: &[(&str, &str)] = &[
    ("nse", "NSE"),
    ("rsq", "Rsq"),
    ("kge", "KGE"),
    ("rmse", "RMSE"),
    ("testn", "testn"),
];

struct ValData {
    num_algos: usize,
    algo_names: Matrix2Strings,
    has_validation: Vec<i32>,
    metrics: Vec<Matrix<f64>>,
}

/// Reader for gauge validation statistics.
pub struct ValidationReader;

impl ValidationReader {
    fn allocate(ctx: &ExtractContext, num_algos: usize) -> ValData {
        let nr = ctx.topology.num_reaches();
        ValData {
            num_algos,
            algo_names: Matrix2Strings::filled(nr, num_algos, ""),
            has_validation: vec![ctx.fill.int32(); nr],
            metrics: METRICS
                .iter()
                .map(|_| Matrix::filled(nr, num_algos, ctx.fill.float64()))
                .collect(),
        }
    }

    fn build(data: ValData) -> ResultRecord {
        let mut fields = vec![
            Field::new(
                "algo_names",
                &[DimRef::NumReaches, DimRef::Local(ALGO_DIM)],
                FieldData::StringMatrix(data.algo_names),
            ),
            Field::new(
                "has_validation",
                &[DimRef::NumReaches],
                FieldData::I32(data.has_validation),
            ),
        ];
        fields.extend(METRICS.iter().zip(data.metrics).map(|(&(name, _), m)| {
            Field::new(
                name,
                &[DimRef::NumReaches, DimRef::Local(ALGO_DIM)],
                FieldData::F64Matrix(m),
            )
        }));
        ResultRecord::new("validation").with_groups(vec![RecordGroup::new(GroupTarget::Module)
            .with_dims(vec![LocalDim::fixed(ALGO_DIM, data.num_algos)])
            .with_fields(fields)])
    }
}

fn read_reach(
    path: &std::path::Path,
    data: &mut ValData,
    row: usize,
    ctx: &ExtractContext,
) -> Result<(), ModuleError> {
    let ds = netcdf::open(path)?;
    if let Some(v) = ds.attribute("has_validation").and_then(|a| a.value().ok()) {
        if let Some(flag) = attr_i32(&v) {
            data.has_validation[row] = flag;
        }
    }
    for (j, name) in read_string_vec(&ds, "algorithm")?
        .into_iter()
        .enumerate()
        .take(data.num_algos)
    {
        data.algo_names.set(row, j, name);
    }
    for (k, &(_, source)) in METRICS.iter().enumerate() {
        let values = read_f64_vec(&ds, source, &ctx.fill)?;
        data.metrics[k].set_row(row, &values);
    }
    Ok(())
}

fn attr_i32(value: &netcdf::AttributeValue) -> Option<i32> {
    match value {
        netcdf::AttributeValue::Int(x) => Some(*x),
        netcdf::AttributeValue::Short(x) => Some(i32::from(*x)),
        netcdf::AttributeValue::Longlong(x) => Some(*x as i32),
        netcdf::AttributeValue::Double(x) => Some(*x as i32),
        netcdf::AttributeValue::Float(x) => Some(*x as i32),
        _ => None,
    }
}

impl ResultReader for ValidationReader {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Validation
    }

    fn empty(&self, ctx: &ExtractContext) -> ResultRecord {
        Self::build(Self::allocate(ctx, 0))
    }

    fn extract(&self, ctx: &ExtractContext) -> Result<ResultRecord, ModuleError> {
        let dir = ctx.paths.validation_stats_dir();
        let files = reach_files(&dir, ctx.continent, "_validation.nc")?;

        let Some(first) = files.values().next() else {
            return Ok(self.empty(ctx));
        };
        let num_algos = {
            let ds = netcdf::open(first)?;
            read_string_vec(&ds, "algorithm")?.len()
        };
        let mut data = Self::allocate(ctx, num_algos);

        for (row, &rid) in ctx.topology.reach_ids().iter().enumerate() {
            let Some(path) = files.get(&rid) else {
                continue;
            };
            if let Err(e) = read_reach(path, &mut data, row, ctx) {
                warn!(reach_id = rid, error = %e, "validation reach failed, keeping sentinels");
            }
        }

        Ok(Self::build(data))
    }
}
