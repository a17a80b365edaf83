//! MOMMA results.
//!
//! One file per reach named `<reach_id>_momma.nc` under `flpe/momma/`. The
//! source is flat: ten observation/discharge series over time plus a long
//! tail of per-reach diagnostic scalars. All fields are merged into the
//! `momma` archive group in the order below.

use std::path::Path;

use tracing::warn;

use crate::fill::FillPolicy;
use crate::record::{GroupTarget, RecordGroup, ResultRecord};

use super::{
    reach_files, ExtractContext, FlatData, FlatSpec, ModuleError, ModuleKind, ResultReader,
};

const SPEC: &[FlatSpec] = &[
    FlatSpec::series("stage"),
    FlatSpec::series("width"),
    FlatSpec::series("slope"),
    FlatSpec::series("Qgage"),
    FlatSpec::series("seg"),
    FlatSpec::series("n"),
    FlatSpec::series("Y"),
    FlatSpec::series("v"),
    FlatSpec::series("Q"),
    FlatSpec::series("Q_constrained"),
    FlatSpec::scalar("gage_constrained"),
    FlatSpec::scalar("input_MBL_prior"),
    FlatSpec::scalar("input_Qm_prior"),
    FlatSpec::scalar("input_Qb_prior"),
    FlatSpec::scalar("input_Yb_prior"),
    FlatSpec::scalar("input_known_ezf"),
    FlatSpec::scalar("input_known_bkfl_stage"),
    FlatSpec::scalar("input_known_nb_seg1"),
    FlatSpec::scalar("input_known_x_seg1"),
    FlatSpec::scalar("Qgage_constrained_nb_seg1"),
    FlatSpec::scalar("Qgage_constrained_x_seg1"),
    FlatSpec::scalar("input_known_nb_seg2"),
    FlatSpec::scalar("input_known_x_seg2"),
    FlatSpec::scalar("Qgage_constrained_nb_seg2"),
    FlatSpec::scalar("Qgage_constrained_x_seg2"),
    FlatSpec::scalar("n_bkfl_Qb_prior"),
    FlatSpec::scalar("n_bkfl_final_used"),
    FlatSpec::scalar("vel_bkfl_Qb_prior"),
    FlatSpec::scalar("vel_bkfl_diag_MBL"),
    FlatSpec::scalar("Froude_bkfl_diag_Smean"),
    FlatSpec::scalar("width_bkfl_empirical"),
    FlatSpec::scalar("width_bkfl_solved_obs"),
    FlatSpec::scalar("depth_bkfl_solved_obs"),
    FlatSpec::scalar("depth_bkfl_diag_MBL"),
    FlatSpec::scalar("depth_bkfl_diag_Wb_Smean"),
    FlatSpec::scalar("zero_flow_stage"),
    FlatSpec::scalar("bankfull_stage"),
    FlatSpec::scalar("Qmean_prior"),
    FlatSpec::scalar("Qmean_momma"),
    FlatSpec::scalar("Qmean_momma.constrained"),
];

/// Reader for MOMMA reach results.
pub struct MommaReader;

impl MommaReader {
    fn build(data: FlatData) -> ResultRecord {
        ResultRecord::new("momma").with_groups(vec![
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

impl ResultReader for MommaReader {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Momma
    }

    fn empty(&self, ctx: &ExtractContext) -> ResultRecord {
        Self::build(FlatData::new(SPEC, ctx))
    }

    fn extract(&self, ctx: &ExtractContext) -> Result<ResultRecord, ModuleError> {
        let dir = ctx.paths.flpe.join("momma");
        let files = reach_files(&dir, ctx.continent, "_momma.nc")?;
        let mut data = FlatData::new(SPEC, ctx);

        if let Some(first) = files.values().next() {
            match netcdf::open(first) {
                Ok(ds) => data.capture_attrs(&ds),
                Err(e) => warn!(error = %e, "momma attribute capture failed"),
            }
        }

        for (row, &rid) in ctx.topology.reach_ids().iter().enumerate() {
            let Some(path) = files.get(&rid) else {
                continue;
            };
            if let Err(e) = read_reach(path, &mut data, row, &ctx.fill) {
                warn!(reach_id = rid, error = %e, "momma reach failed, keeping sentinels");
            }
        }

        Ok(Self::build(data))
    }
}
