//! Offline discharge results.
//!
//! The offline module re-runs every discharge algorithm's flow law against
//! the full observation record, so each file carries one time series per
//! algorithm in both constrained (`*_q_c`) and unconstrained (`*_q_uc`)
//! flavors. Files sit directly under the offline mount and may be named for
//! a dash-joined set of reaches, but each holds plain 1-D series for the
//! reach being read. Older runs lack `d_x_area_u`; the field stays sentinel
//! when absent.

use std::path::Path;

use tracing::warn;

use crate::fill::FillPolicy;
use crate::record::{GroupTarget, RecordGroup, ResultRecord};

use super::{
    reach_set_files, ExtractContext, FlatData, FlatSpec, ModuleError, ModuleKind, ResultReader,
};

const SPEC: &[FlatSpec] = &[
    FlatSpec::series("d_x_area"),
    FlatSpec::optional_series("d_x_area_u"),
    FlatSpec::series("metro_q_c"),
    FlatSpec::series("bam_q_c"),
    FlatSpec::series("hivdi_q_c"),
    FlatSpec::series("momma_q_c"),
    FlatSpec::series("sads_q_c"),
    FlatSpec::series("consensus_q_c"),
    FlatSpec::series("metro_q_uc"),
    FlatSpec::series("bam_q_uc"),
    FlatSpec::series("hivdi_q_uc"),
    FlatSpec::series("momma_q_uc"),
    FlatSpec::series("sads_q_uc"),
    FlatSpec::series("consensus_q_uc"),
];

/// Reader for offline discharge results.
pub struct OfflineReader;

impl OfflineReader {
    fn build(data: FlatData) -> ResultRecord {
        ResultRecord::new("offline").with_groups(vec![
            RecordGroup::new(GroupTarget::Module).with_fields(data.into_fields()),
        ])
    }
}

fn capture(path: &Path, data: &mut FlatData) -> Result<(), ModuleError> {
    let ds = netcdf::open(path)?;
    data.capture_attrs(&ds);
    Ok(())
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

impl ResultReader for OfflineReader {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Offline
    }

    fn empty(&self, ctx: &ExtractContext) -> ResultRecord {
        Self::build(FlatData::new(SPEC, ctx))
    }

    fn extract(&self, ctx: &ExtractContext) -> Result<ResultRecord, ModuleError> {
        let files = reach_set_files(&ctx.paths.offline, ctx.continent, "_offline.nc")?;
        let mut data = FlatData::new(SPEC, ctx);

        if let Some(first) = files.values().next() {
            if let Err(e) = capture(first, &mut data) {
                warn!(error = %e, "offline attribute capture failed");
            }
        }

        for (row, &rid) in ctx.topology.reach_ids().iter().enumerate() {
            let Some(path) = files.get(&rid) else {
                continue;
            };
            if let Err(e) = read_reach(path, &mut data, row, &ctx.fill) {
                warn!(reach_id = rid, error = %e, "offline reach failed, keeping sentinels");
            }
        }

        Ok(Self::build(data))
    }
}
