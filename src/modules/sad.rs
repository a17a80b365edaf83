//! SAD results.
//!
//! One file per reach named `<reach_id>_sad.nc` under `flpe/sad/`, with
//! root-level variables: scalar `A0` and `n`, plus the discharge series `Qa`
//! and its uncertainty `Q_u`. Merged into the `sad` archive group.

use std::path::Path;

use tracing::warn;

use crate::fill::FillPolicy;
use crate::record::{GroupTarget, RecordGroup, ResultRecord};

use super::{
    reach_files, ExtractContext, FlatData, FlatSpec, ModuleError, ModuleKind, ResultReader,
};

const SPEC: &[FlatSpec] = &[
    FlatSpec::scalar("A0"),
    FlatSpec::scalar("n"),
    FlatSpec::series("Qa"),
    FlatSpec::series("Q_u"),
];

/// Reader for SAD reach results.
pub struct SadReader;

impl SadReader {
    fn build(data: FlatData) -> ResultRecord {
        ResultRecord::new("sad").with_groups(vec![
            RecordGroup::new(GroupTarget::Module).with_fields(data.into_fields()),
        ])
    }
}

fn read_reach(
    path: &Path,
    data: &mut FlatData,
    row: usize,
    fill: &FillPolicy,
) -> Result<(), ModuleError> {
    let ds = netcdf::open(path)?;
    data.read_reach(&ds, row, fill)
}

impl ResultReader for SadReader {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Sad
    }

    fn empty(&self, ctx: &ExtractContext) -> ResultRecord {
        Self::build(FlatData::new(SPEC, ctx))
    }

    fn extract(&self, ctx: &ExtractContext) -> Result<ResultRecord, ModuleError> {
        let dir = ctx.paths.flpe.join("sad");
        let files = reach_files(&dir, ctx.continent, "_sad.nc")?;
        let mut data = FlatData::new(SPEC, ctx);

        if let Some(first) = files.values().next() {
            match netcdf::open(first) {
                Ok(ds) => data.capture_attrs(&ds),
                Err(e) => warn!(error = %e, "sad attribute capture failed"),
            }
        }

        for (row, &rid) in ctx.topology.reach_ids().iter().enumerate() {
            let Some(path) = files.get(&rid) else {
                continue;
            };
            if let Err(e) = read_reach(path, &mut data, row, &ctx.fill) {
                warn!(reach_id = rid, error = %e, "sad reach failed, keeping sentinels");
            }
        }

        Ok(Self::build(data))
    }
}
