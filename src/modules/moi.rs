//! MOI (basin-scale integrator) results.
//!
//! MOI reconciles every reach-scale algorithm's discharge against basin
//! mass conservation, so each `<reach_id>_integrator.nc` file carries one
//! subgroup per algorithm. The archive mirrors that layout: a `moi` group
//! with six child groups, each holding the integrated series `q` plus the
//! algorithm's adjusted parameters and the reach/basin scale mean flows.

use std::path::Path;

use tracing::warn;

use crate::fill::FillPolicy;
use crate::record::{GroupTarget, RecordGroup, ResultRecord};

use super::{
    reach_files, require_group, ExtractContext, FlatData, FlatSpec, ModuleError, ModuleKind,
    ResultReader,
};

const GEOBAM: &[FlatSpec] = &[
    FlatSpec::series("q"),
    FlatSpec::scalar("a0"),
    FlatSpec::scalar("n"),
    FlatSpec::scalar("qbar_reachScale"),
    FlatSpec::scalar("qbar_basinScale"),
];

const HIVDI: &[FlatSpec] = &[
    FlatSpec::series("q"),
    FlatSpec::scalar("Abar"),
    FlatSpec::scalar("alpha"),
    FlatSpec::scalar("beta"),
    FlatSpec::scalar("qbar_reachScale"),
    FlatSpec::scalar("qbar_basinScale"),
];

const METROMAN: &[FlatSpec] = &[
    FlatSpec::series("q"),
    FlatSpec::scalar("Abar"),
    FlatSpec::scalar("na"),
    FlatSpec::scalar("x1"),
    FlatSpec::scalar("qbar_reachScale"),
    FlatSpec::scalar("qbar_basinScale"),
];

const MOMMA: &[FlatSpec] = &[
    FlatSpec::series("q"),
    FlatSpec::scalar("B"),
    FlatSpec::scalar("H"),
    FlatSpec::scalar("Save"),
    FlatSpec::scalar("qbar_reachScale"),
    FlatSpec::scalar("qbar_basinScale"),
];

const SAD: &[FlatSpec] = &[
    FlatSpec::series("q"),
    FlatSpec::scalar("a0"),
    FlatSpec::scalar("n"),
    FlatSpec::scalar("qbar_reachScale"),
    FlatSpec::scalar("qbar_basinScale"),
];

const SIC4DVAR: &[FlatSpec] = &[
    FlatSpec::series("q"),
    FlatSpec::scalar("a0"),
    FlatSpec::scalar("n"),
    FlatSpec::scalar("qbar_reachScale"),
    FlatSpec::scalar("qbar_basinScale"),
];

/// Child group names paired with their field layouts, in archive order.
const SUBGROUPS: &[(&str, &[FlatSpec])] = &[
    ("geobam", GEOBAM),
    ("hivdi", HIVDI),
    ("metroman", METROMAN),
    ("momma", MOMMA),
    ("sad", SAD),
    ("sic4dvar", SIC4DVAR),
];

/// Reader for basin-scale integrator results.
pub struct MoiReader;

impl MoiReader {
    fn allocate(ctx: &ExtractContext) -> Vec<FlatData> {
        SUBGROUPS
            .iter()
            .map(|&(_, spec)| FlatData::new(spec, ctx))
            .collect()
    }

    fn build(data: Vec<FlatData>) -> ResultRecord {
        let groups = SUBGROUPS
            .iter()
            .zip(data)
            .map(|(&(name, _), d)| {
                RecordGroup::new(GroupTarget::ModuleChild(name)).with_fields(d.into_fields())
            })
            .collect();
        ResultRecord::new("moi").with_groups(groups)
    }
}

fn capture(path: &Path, data: &mut [FlatData]) -> Result<(), ModuleError> {
    let ds = netcdf::open(path)?;
    for (&(name, _), d) in SUBGROUPS.iter().zip(data) {
        let grp = require_group(&ds, name)?;
        d.capture_attrs(&grp);
    }
    Ok(())
}

fn read_reach(
    path: &Path,
    data: &mut [FlatData],
    row: usize,
    fill: &FillPolicy,
) -> Result<(), ModuleError> {
    let ds = netcdf::open(path)?;
    for (&(name, _), d) in SUBGROUPS.iter().zip(data) {
        let grp = require_group(&ds, name)?;
        d.read_reach(&grp, row, fill)?;
    }
    Ok(())
}

impl ResultReader for MoiReader {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Moi
    }

    fn empty(&self, ctx: &ExtractContext) -> ResultRecord {
        Self::build(Self::allocate(ctx))
    }

    fn extract(&self, ctx: &ExtractContext) -> Result<ResultRecord, ModuleError> {
        let files = reach_files(&ctx.paths.moi, ctx.continent, "_integrator.nc")?;
        let mut data = Self::allocate(ctx);

        if let Some(first) = files.values().next() {
            if let Err(e) = capture(first, &mut data) {
                warn!(error = %e, "moi attribute capture failed");
            }
        }

        for (row, &rid) in ctx.topology.reach_ids().iter().enumerate() {
            let Some(path) = files.get(&rid) else {
                continue;
            };
            if let Err(e) = read_reach(path, &mut data, row, &ctx.fill) {
                warn!(reach_id = rid, error = %e, "moi reach failed, keeping sentinels");
            }
        }

        Ok(Self::build(data))
    }
}
