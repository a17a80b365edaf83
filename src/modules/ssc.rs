//! Suspended sediment concentration.
//!
//! SSC predictions arrive as one CSV per satellite tile, each row keyed by
//! node id and date. Every tile of the mount is read (tiles are not named
//! by reach prefix, so there is no continent filter); the node axis is the
//! set of node ids in first-seen order and grows as an unlimited dimension,
//! the date axis is the sorted distinct dates as seconds since 2000-01-01.
//! The tile a prediction came from is kept alongside the prediction.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::NaiveDate;

use crate::record::{
    DimRef, Field, FieldData, GroupTarget, LocalDim, Matrix, Matrix2Strings, RecordGroup,
    ResultRecord,
};

use super::{
    csv_files, table::CsvTable, ExtractContext, ModuleError, ModuleKind, ResultReader,
    EPOCH_2000_UNIX,
};

const DATE_DIM: &str = "ssc_dates";
const NODE_DIM: &str = "num_ssc_nodes";
const DATE_FORMAT: &str = "%Y-%m-%d";

struct SscData {
    dates: Vec<i64>,
    node_ids: Vec<i64>,
    pred: Matrix<f64>,
    tiles: Matrix2Strings,
}

/// Reader for SSC tile tables.
pub struct SscReader;

impl SscReader {
    fn allocate(ctx: &ExtractContext, dates: Vec<i64>, node_ids: Vec<i64>) -> SscData {
        let nn = node_ids.len();
        let nd = dates.len();
        SscData {
            dates,
            node_ids,
            pred: Matrix::filled(nn, nd, ctx.fill.float64()),
            tiles: Matrix2Strings::filled(nn, nd, ctx.fill.string()),
        }
    }

    fn build(data: SscData) -> ResultRecord {
        let dates: Vec<f64> = data.dates.iter().map(|&s| s as f64).collect();
        let nodes: Vec<f64> = data.node_ids.iter().map(|&n| n as f64).collect();
        ResultRecord::new("ssc").with_groups(vec![RecordGroup::new(GroupTarget::Module)
            .with_dims(vec![
                LocalDim::fixed(DATE_DIM, data.dates.len()),
                LocalDim::unlimited(NODE_DIM, data.node_ids.len()),
            ])
            .with_fields(vec![
                Field::new("ssc_date", &[DimRef::Local(DATE_DIM)], FieldData::F64(dates)),
                Field::new("ssc_nodes", &[DimRef::Local(NODE_DIM)], FieldData::F64(nodes)),
                Field::new(
                    "ssc_pred",
                    &[DimRef::Local(NODE_DIM), DimRef::Local(DATE_DIM)],
                    FieldData::F64Matrix(data.pred),
                ),
                Field::new(
                    "tile_name",
                    &[DimRef::Local(NODE_DIM), DimRef::Local(DATE_DIM)],
                    FieldData::StringMatrix(data.tiles),
                ),
            ])])
    }
}

fn date_seconds(raw: &str) -> Option<i64> {
    let date = NaiveDate::parse_from_str(raw, DATE_FORMAT).ok()?;
    Some(date.and_time(chrono::NaiveTime::MIN).and_utc().timestamp() - EPOCH_2000_UNIX)
}

fn tile_stem(path: &std::path::Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

/// Read every tile, tagging each table with its tile name.
fn read_tiles(paths: &[PathBuf]) -> Result<Vec<(String, CsvTable)>, ModuleError> {
    paths
        .iter()
        .map(|p| Ok((tile_stem(p), CsvTable::read(p)?)))
        .collect()
}

impl ResultReader for SscReader {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Ssc
    }

    fn empty(&self, ctx: &ExtractContext) -> ResultRecord {
        Self::build(Self::allocate(ctx, Vec::new(), Vec::new()))
    }

    fn extract(&self, ctx: &ExtractContext) -> Result<ResultRecord, ModuleError> {
        let dir = ctx.paths.ssc.clone();
        let files = csv_files(&dir, None)?;
        if files.is_empty() {
            return Err(ModuleError::NoFiles(dir));
        }
        let tiles = read_tiles(&files)?;

        let mut dates = Vec::new();
        let mut node_ids = Vec::new();
        let mut node_index: BTreeMap<i64, usize> = BTreeMap::new();
        for (_, table) in &tiles {
            for row in 0..table.num_rows() {
                if let Some(s) = table.cell(row, "date").and_then(date_seconds) {
                    dates.push(s);
                }
                if let Some(nid) = table.i64_cell(row, "node_id") {
                    if !node_index.contains_key(&nid) {
                        node_index.insert(nid, node_ids.len());
                        node_ids.push(nid);
                    }
                }
            }
        }
        dates.sort_unstable();
        dates.dedup();

        let mut data = Self::allocate(ctx, dates, node_ids);
        for (tile, table) in &tiles {
            for row in 0..table.num_rows() {
                let Some(&node) = table
                    .i64_cell(row, "node_id")
                    .as_ref()
                    .and_then(|nid| node_index.get(nid))
                else {
                    continue;
                };
                let Some(col) = table
                    .cell(row, "date")
                    .and_then(date_seconds)
                    .and_then(|s| data.dates.binary_search(&s).ok())
                else {
                    continue;
                };
                if let Some(v) = table.f64_cell(row, "SSC") {
                    data.pred.set(node, col, v);
                }
                data.tiles.set(node, col, tile.clone());
            }
        }

        Ok(Self::build(data))
    }
}
