//! Lakeflow lake discharge.
//!
//! Lakeflow estimates discharge into and out of lakes and writes one CSV
//! per lake system under `out/`, each row keyed by reach id and date. All
//! tables of the continent are concatenated; the distinct dates become the
//! group's own `lakeflow_dates` axis and every dated column lands in a
//! `(num_reaches, lakeflow_dates)` matrix. Per-reach constants are taken
//! from the reach's first row.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::record::{
    DimRef, Field, FieldData, GroupTarget, LocalDim, Matrix, RecordGroup, ResultRecord,
};

use super::{csv_files, table::CsvTable, ExtractContext, ModuleError, ModuleKind, ResultReader};

const DATE_DIM: &str = "lakeflow_dates";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Dated columns, one archive matrix each.
const SERIES: &[&str] = &[
    "width",
    "slope2",
    "da",
    "wse",
    "storage",
    "dv",
    "q_model",
    "tributary",
    "et",
    "bayes_q",
    "bayes_q_sd",
    "q_lakeflow",
    "n_lakeflow",
];

/// Per-reach f64 constants, from the reach's first row.
const SCALARS: &[&str] = &["q_upper", "q_lower", "n_lakeflow_sd", "a0_lakeflow"];

struct LakeflowData {
    dates: Vec<NaiveDate>,
    reach_id: Vec<f64>,
    lake_id: Vec<i32>,
    prior_fit: Vec<i32>,
    flow_type: Vec<i32>,
    scalars: Vec<Vec<f64>>,
    series: Vec<Matrix<f64>>,
}

/// Reader for lakeflow CSV tables.
pub struct LakeflowReader;

impl LakeflowReader {
    fn allocate(ctx: &ExtractContext, dates: Vec<NaiveDate>) -> LakeflowData {
        let nr = ctx.topology.num_reaches();
        let nd = dates.len();
        LakeflowData {
            dates,
            reach_id: ctx.topology.reach_ids().iter().map(|&r| r as f64).collect(),
            lake_id: vec![ctx.fill.int32(); nr],
            prior_fit: vec![ctx.fill.int32(); nr],
            flow_type: vec![ctx.fill.int32(); nr],
            scalars: SCALARS
                .iter()
                .map(|_| vec![ctx.fill.float64(); nr])
                .collect(),
            series: SERIES
                .iter()
                .map(|_| Matrix::filled(nr, nd, ctx.fill.float64()))
                .collect(),
        }
    }

    fn build(data: LakeflowData) -> ResultRecord {
        let seconds: Vec<i64> = data
            .dates
            .iter()
            .map(|d| d.and_time(chrono::NaiveTime::MIN).and_utc().timestamp())
            .collect();
        let mut fields = vec![
            Field::new("reach_id", &[DimRef::NumReaches], FieldData::F64(data.reach_id)),
            Field::new("lake_id", &[DimRef::NumReaches], FieldData::I32(data.lake_id)),
            Field::new("prior_fit", &[DimRef::NumReaches], FieldData::I32(data.prior_fit)),
            Field::new("type", &[DimRef::NumReaches], FieldData::I32(data.flow_type)),
        ];
        fields.extend(
            SCALARS
                .iter()
                .zip(data.scalars)
                .map(|(&name, v)| Field::new(name, &[DimRef::NumReaches], FieldData::F64(v))),
        );
        fields.push(Field::new(
            "date",
            &[DimRef::Local(DATE_DIM)],
            FieldData::I64(seconds),
        ));
        fields.extend(SERIES.iter().zip(data.series).map(|(&name, m)| {
            Field::new(
                name,
                &[DimRef::NumReaches, DimRef::Local(DATE_DIM)],
                FieldData::F64Matrix(m),
            )
        }));
        ResultRecord::new("lakeflow").with_groups(vec![RecordGroup::new(GroupTarget::Module)
            .with_dims(vec![LocalDim::fixed(DATE_DIM, data.dates.len())])
            .with_fields(fields)])
    }
}

fn flow_type_code(raw: &str) -> Option<i32> {
    match raw {
        "inflow" => Some(0),
        "outflow" => Some(1),
        _ => None,
    }
}

fn prior_fit_code(raw: &str) -> Option<i32> {
    match raw {
        "sos" => Some(0),
        "geobam" => Some(1),
        _ => None,
    }
}

fn concatenate(paths: &[std::path::PathBuf]) -> Result<CsvTable, ModuleError> {
    let mut iter = paths.iter();
    let first = iter
        .next()
        .ok_or_else(|| ModuleError::Parse {
            line: 1,
            message: "no tables to concatenate".into(),
        })?;
    let mut table = CsvTable::read(first)?;
    for path in iter {
        table.extend(CsvTable::read(path)?)?;
    }
    Ok(table)
}

fn fill_reach(table: &CsvTable, rows: &[usize], data: &mut LakeflowData, index: usize) {
    let first = rows[0];
    if let Some(v) = table.i64_cell(first, "lake_id") {
        data.lake_id[index] = v as i32;
    }
    if let Some(v) = table.cell(first, "prior_fit").and_then(prior_fit_code) {
        data.prior_fit[index] = v;
    }
    if let Some(v) = table.cell(first, "type").and_then(flow_type_code) {
        data.flow_type[index] = v;
    }
    for (k, &name) in SCALARS.iter().enumerate() {
        if let Some(v) = table.f64_cell(first, name) {
            data.scalars[k][index] = v;
        }
    }
    for &row in rows {
        let Some(date) = table
            .cell(row, "date")
            .and_then(|raw| NaiveDate::parse_from_str(raw, DATE_FORMAT).ok())
        else {
            continue;
        };
        let Ok(col) = data.dates.binary_search(&date) else {
            continue;
        };
        for (k, &name) in SERIES.iter().enumerate() {
            if let Some(v) = table.f64_cell(row, name) {
                data.series[k].set(index, col, v);
            }
        }
    }
}

impl ResultReader for LakeflowReader {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Lakeflow
    }

    fn empty(&self, ctx: &ExtractContext) -> ResultRecord {
        Self::build(Self::allocate(ctx, Vec::new()))
    }

    fn extract(&self, ctx: &ExtractContext) -> Result<ResultRecord, ModuleError> {
        let dir = ctx.paths.lakeflow_out_dir();
        let files = csv_files(&dir, Some(ctx.continent))?;
        if files.is_empty() {
            return Err(ModuleError::NoFiles(dir));
        }
        let table = concatenate(&files)?;

        let mut dates: Vec<NaiveDate> = (0..table.num_rows())
            .filter_map(|row| table.cell(row, "date"))
            .filter_map(|raw| NaiveDate::parse_from_str(raw, DATE_FORMAT).ok())
            .collect();
        dates.sort_unstable();
        dates.dedup();

        let mut rows_by_reach: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for row in 0..table.num_rows() {
            if let Some(rid) = table.i64_cell(row, "reach_id") {
                rows_by_reach.entry(rid).or_default().push(row);
            }
        }

        let mut data = Self::allocate(ctx, dates);
        for (index, &rid) in ctx.topology.reach_ids().iter().enumerate() {
            let Some(rows) = rows_by_reach.get(&rid) else {
                continue;
            };
            fill_reach(&table, rows, &mut data, index);
        }

        Ok(Self::build(data))
    }
}
