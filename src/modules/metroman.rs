//! MetroMan results.
//!
//! MetroMan solves sets of reaches together, so files under
//! `flpe/metroman/` are named with dash-joined ids like
//! `74267100051-74267100061-74267100071_metroman.nc` and every variable
//! carries a leading set dimension. Each reach's row inside the file is
//! located through the file's own `reach_id` variable before copying into
//! the `metroman` archive group.

use std::path::Path;

use tracing::warn;

use crate::fill::FillPolicy;
use crate::record::{GroupTarget, RecordGroup, ResultRecord};

use super::{
    file_row_of_reach, reach_set_files, ExtractContext, FlatData, FlatSpec, ModuleError,
    ModuleKind, ResultReader,
};

const SPEC: &[FlatSpec] = &[
    FlatSpec::series("allq"),
    FlatSpec::scalar("A0hat"),
    FlatSpec::scalar("nahat"),
    FlatSpec::scalar("x1hat"),
    FlatSpec::series("q_u"),
];

/// Reader for MetroMan reach-set results.
pub struct MetromanReader;

impl MetromanReader {
    fn build(data: FlatData) -> ResultRecord {
        ResultRecord::new("metroman").with_groups(vec![
            RecordGroup::new(GroupTarget::Module).with_fields(data.into_fields()),
        ])
    }
}

fn read_reach(
    path: &Path,
    data: &mut FlatData,
    row: usize,
    reach_id: i64,
    fill: &FillPolicy,
) -> Result<(), ModuleError> {
    let ds = netcdf::open(path)?;
    let file_row = file_row_of_reach(&ds, reach_id)?;
    data.read_reach_at(&ds, row, file_row, fill)
}

impl ResultReader for MetromanReader {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Metroman
    }

    fn empty(&self, ctx: &ExtractContext) -> ResultRecord {
        Self::build(FlatData::new(SPEC, ctx))
    }

    fn extract(&self, ctx: &ExtractContext) -> Result<ResultRecord, ModuleError> {
        let dir = ctx.paths.flpe.join("metroman");
        let files = reach_set_files(&dir, ctx.continent, "_metroman.nc")?;
        let mut data = FlatData::new(SPEC, ctx);

        if let Some(first) = files.values().next() {
            match netcdf::open(first) {
                Ok(ds) => data.capture_attrs(&ds),
                Err(e) => warn!(error = %e, "metroman attribute capture failed"),
            }
        }

        for (row, &rid) in ctx.topology.reach_ids().iter().enumerate() {
            let Some(path) = files.get(&rid) else {
                continue;
            };
            if let Err(e) = read_reach(path, &mut data, row, rid, &ctx.fill) {
                warn!(reach_id = rid, error = %e, "metroman reach failed, keeping sentinels");
            }
        }

        Ok(Self::build(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContinentSelection, RunPaths, RunType};
    use crate::fill::FLOAT_FILL;
    use crate::record::FieldData;
    use crate::topology::SosTopology;

    fn write_set(path: &Path, reach_ids: &[i64], nt: usize) {
        let mut file = netcdf::create(path).unwrap();
        file.add_dimension("nr", reach_ids.len()).unwrap();
        file.add_dimension("nt", nt).unwrap();
        let mut var = file.add_variable::<i64>("reach_id", &["nr"]).unwrap();
        var.put_values(reach_ids, ..).unwrap();

        // Row r of every matrix carries (r+1)-based values so placement is
        // visible in the assertions.
        let nr = reach_ids.len();
        let mut allq = Vec::new();
        let mut q_u = Vec::new();
        for r in 0..nr {
            for t in 0..nt {
                allq.push((r + 1) as f64 * 10.0 + t as f64);
                q_u.push((r + 1) as f64 * 0.1);
            }
        }
        let mut var = file.add_variable::<f64>("allq", &["nr", "nt"]).unwrap();
        var.put_values(&allq, ..).unwrap();
        let mut var = file.add_variable::<f64>("q_u", &["nr", "nt"]).unwrap();
        var.put_values(&q_u, ..).unwrap();
        for name in ["A0hat", "nahat", "x1hat"] {
            let scalars: Vec<f64> = (0..nr).map(|r| (r + 1) as f64).collect();
            let mut var = file.add_variable::<f64>(name, &["nr"]).unwrap();
            var.put_values(&scalars, ..).unwrap();
        }
    }

    #[test]
    fn test_rows_located_by_reach_id() {
        let dir = tempfile::tempdir().unwrap();
        let topology = SosTopology::from_arrays(vec![10, 20, 30], vec![], vec![], vec![0, 1]);
        let paths = RunPaths::under(dir.path());
        let continent = ContinentSelection {
            code: "na".into(),
            prefixes: vec![1, 2, 3],
        };
        let mn_dir = paths.flpe.join("metroman");
        std::fs::create_dir_all(&mn_dir).unwrap();
        // File lists 30 before 10; rows must still land by id, not order.
        write_set(&mn_dir.join("30-10_metroman.nc"), &[30, 10], 2);

        let ctx = ExtractContext {
            topology: &topology,
            paths: &paths,
            continent: &continent,
            run_type: RunType::Unconstrained,
            fill: FillPolicy::default(),
        };
        let record = MetromanReader.extract(&ctx).unwrap();
        let grp = record.group(GroupTarget::Module).unwrap();

        match &grp.field("A0hat").unwrap().data {
            FieldData::F64(v) => assert_eq!(v, &[2.0, FLOAT_FILL, 1.0]),
            _ => panic!("expected f64 data"),
        }
        match &grp.field("allq").unwrap().data {
            FieldData::F64Matrix(m) => {
                assert_eq!(m.row(0), &[20.0, 21.0]);
                assert_eq!(m.row(1), &[FLOAT_FILL, FLOAT_FILL]);
                assert_eq!(m.row(2), &[10.0, 11.0]);
            }
            _ => panic!("expected matrix data"),
        }
    }
}
