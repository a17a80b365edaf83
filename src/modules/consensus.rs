//! Consensus discharge.
//!
//! Consensus blends the algorithm estimates into a single discharge series
//! per reach, stored with an irregular time axis. Each `<reach_id>_consensus.nc`
//! carries `consensus_q` and a matching `time_str` of UTC timestamps; the
//! archive keeps the discharge as a ragged series and converts the
//! timestamps to integer seconds since 2000-01-01, masked wherever the
//! discharge itself is fill.

use tracing::warn;

use crate::fill::FillPolicy;
use crate::record::{AttrPair, DimRef, Field, FieldData, GroupTarget, Ragged, RecordGroup, ResultRecord};

use super::{
    capture_attrs, reach_files, read_f64_vec, read_string_vec, seconds_since_2000,
    ExtractContext, ModuleError, ModuleKind, ResultReader,
};

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

struct ConsensusData {
    q: Ragged<f64>,
    time: Ragged<i64>,
    q_attrs: Vec<AttrPair>,
    time_attrs: Vec<AttrPair>,
}

/// Reader for consensus discharge series.
pub struct ConsensusReader;

impl ConsensusReader {
    fn allocate(ctx: &ExtractContext) -> ConsensusData {
        let nr = ctx.topology.num_reaches();
        ConsensusData {
            q: Ragged::filled(nr, ctx.fill.float64()),
            time: Ragged::filled(nr, ctx.fill.int64()),
            q_attrs: Vec::new(),
            time_attrs: Vec::new(),
        }
    }

    fn build(data: ConsensusData) -> ResultRecord {
        ResultRecord::new("consensus").with_groups(vec![RecordGroup::new(GroupTarget::Module)
            .with_fields(vec![
                Field::new(
                    "consensus_q",
                    &[DimRef::NumReaches],
                    FieldData::RaggedF64(data.q),
                )
                .with_attrs(data.q_attrs),
                Field::new(
                    "time_int",
                    &[DimRef::NumReaches],
                    FieldData::RaggedI64(data.time),
                )
                .with_attrs(data.time_attrs),
            ])])
    }
}

fn capture(path: &std::path::Path, data: &mut ConsensusData, fill: &FillPolicy) {
    let Ok(ds) = netcdf::open(path) else {
        return;
    };
    data.q_attrs = capture_attrs(&ds, "consensus_q");
    data.time_attrs = time_int_attrs(&capture_attrs(&ds, "time_str"), fill);
}

/// `time_int` does not exist in the source, so its attributes are put
/// together here from the `time_str` attributes it replaces.
fn time_int_attrs(time_str_attrs: &[AttrPair], fill: &FillPolicy) -> Vec<AttrPair> {
    let carried = |name: &str| {
        time_str_attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    };
    let mut attrs: Vec<AttrPair> = vec![(
        "long_name".into(),
        "integer time (seconds) for consensus Q".into(),
    )];
    if let Some(v) = carried("calendar") {
        attrs.push(("calendar".into(), v));
    }
    attrs.push(("short_name".into(), "time_int".into()));
    attrs.push(("standard_name".into(), "time (seconds)".into()));
    if let Some(v) = carried("tag_basic_expert") {
        attrs.push(("tag_basic_expert".into(), v));
    }
    attrs.push((
        "missing_value".into(),
        netcdf::AttributeValue::Longlong(fill.int64()),
    ));
    attrs.push((
        "fill".into(),
        netcdf::AttributeValue::Longlong(fill.int64()),
    ));
    attrs.push((
        "comment".into(),
        "seconds since beginning of January 1, 2000".into(),
    ));
    attrs
}

fn read_reach(
    path: &std::path::Path,
    data: &mut ConsensusData,
    row: usize,
    fill: &FillPolicy,
) -> Result<(), ModuleError> {
    let ds = netcdf::open(path)?;
    let q = read_f64_vec(&ds, "consensus_q", fill)?;
    let times = read_string_vec(&ds, "time_str")?;
    let seconds = q
        .iter()
        .enumerate()
        .map(|(i, &qv)| {
            if fill.is_float_fill(qv) {
                return Ok(fill.int64());
            }
            match times.get(i) {
                Some(t) => seconds_since_2000(t, TIME_FORMAT),
                None => Ok(fill.int64()),
            }
        })
        .collect::<Result<Vec<i64>, ModuleError>>()?;
    data.q.set_row(row, q);
    data.time.set_row(row, seconds);
    Ok(())
}

impl ResultReader for ConsensusReader {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Consensus
    }

    fn empty(&self, ctx: &ExtractContext) -> ResultRecord {
        Self::build(Self::allocate(ctx))
    }

    fn extract(&self, ctx: &ExtractContext) -> Result<ResultRecord, ModuleError> {
        let dir = ctx.paths.consensus_dir();
        let files = reach_files(&dir, ctx.continent, "_consensus.nc")?;
        let mut data = Self::allocate(ctx);

        if let Some(first) = files.values().next() {
            capture(first, &mut data, &ctx.fill);
        }

        for (row, &rid) in ctx.topology.reach_ids().iter().enumerate() {
            let Some(path) = files.get(&rid) else {
                continue;
            };
            if let Err(e) = read_reach(path, &mut data, row, &ctx.fill) {
                warn!(reach_id = rid, error = %e, "consensus reach failed, keeping sentinels");
            }
        }

        Ok(Self::build(data))
    }
}
