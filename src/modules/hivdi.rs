//! HiVDI results.
//!
//! One file per reach named `<reach_id>_hivdi.nc` under `flpe/hivdi/`, each
//! carrying a `reach` group with a discharge series `Q` plus the algorithm
//! parameters `A0`, `alpha` and `beta`. Merged into the `hivdi` archive
//! group as `Q(num_reaches, time_steps)` and per-reach scalars.

use std::path::Path;

use tracing::warn;

use crate::fill::FillPolicy;
use crate::record::{GroupTarget, RecordGroup, ResultRecord};

use super::{
    reach_files, require_group, ExtractContext, FlatData, FlatSpec, ModuleError, ModuleKind,
    ResultReader,
};

const SPEC: &[FlatSpec] = &[
    FlatSpec::series("Q"),
    FlatSpec::scalar("A0"),
    FlatSpec::scalar("beta"),
    FlatSpec::scalar("alpha"),
];

/// Reader for HiVDI reach results.
pub struct HivdiReader;

impl HivdiReader {
    fn build(data: FlatData) -> ResultRecord {
        ResultRecord::new("hivdi").with_groups(vec![
            RecordGroup::new(GroupTarget::Module).with_fields(data.into_fields()),
        ])
    }
}

fn capture(path: &Path, data: &mut FlatData) -> Result<(), ModuleError> {
    let ds = netcdf::open(path)?;
    let reach = require_group(&ds, "reach")?;
    data.capture_attrs(&reach);
    Ok(())
}

fn read_reach(
    path: &Path,
    data: &mut FlatData,
    row: usize,
    fill: &FillPolicy,
) -> Result<(), ModuleError> {
    let ds = netcdf::open(path)?;
    let reach = require_group(&ds, "reach")?;
    data.read_reach(&reach, row, fill)
}

impl ResultReader for HivdiReader {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Hivdi
    }

    fn empty(&self, ctx: &ExtractContext) -> ResultRecord {
        Self::build(FlatData::new(SPEC, ctx))
    }

    fn extract(&self, ctx: &ExtractContext) -> Result<ResultRecord, ModuleError> {
        let dir = ctx.paths.flpe.join("hivdi");
        let files = reach_files(&dir, ctx.continent, "_hivdi.nc")?;
        let mut data = FlatData::new(SPEC, ctx);

        if let Some(first) = files.values().next() {
            if let Err(e) = capture(first, &mut data) {
                warn!(error = %e, "hivdi attribute capture failed");
            }
        }

        for (row, &rid) in ctx.topology.reach_ids().iter().enumerate() {
            let Some(path) = files.get(&rid) else {
                continue;
            };
            if let Err(e) = read_reach(path, &mut data, row, &ctx.fill) {
                warn!(reach_id = rid, error = %e, "hivdi reach failed, keeping sentinels");
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

    fn topology() -> SosTopology {
        SosTopology::from_arrays(vec![10, 20, 30], vec![], vec![], vec![0, 1])
    }

    fn continent() -> ContinentSelection {
        ContinentSelection {
            code: "na".into(),
            prefixes: vec![1, 2, 3],
        }
    }

    fn write_result(path: &Path, q: &[f64], a0: f64, alpha: f64, beta: f64) {
        let mut file = netcdf::create(path).unwrap();
        file.add_dimension("nt", q.len()).unwrap();
        let mut grp = file.add_group("reach").unwrap();
        let mut var = grp.add_variable::<f64>("Q", &["nt"]).unwrap();
        var.put_values(q, ..).unwrap();
        var.put_attribute("units", "m^3/s").unwrap();
        let mut var = grp.add_variable::<f64>("A0", &[]).unwrap();
        var.put_values(&[a0], ..).unwrap();
        let mut var = grp.add_variable::<f64>("alpha", &[]).unwrap();
        var.put_values(&[alpha], ..).unwrap();
        let mut var = grp.add_variable::<f64>("beta", &[]).unwrap();
        var.put_values(&[beta], ..).unwrap();
    }

    #[test]
    fn test_partial_coverage_leaves_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        let topology = topology();
        let paths = RunPaths::under(dir.path());
        let continent = continent();
        let hv_dir = paths.flpe.join("hivdi");
        std::fs::create_dir_all(&hv_dir).unwrap();
        write_result(&hv_dir.join("20_hivdi.nc"), &[4.5, 9.0], 5.5, 0.1, 0.2);

        let ctx = ExtractContext {
            topology: &topology,
            paths: &paths,
            continent: &continent,
            run_type: RunType::Unconstrained,
            fill: FillPolicy::default(),
        };
        let record = HivdiReader.extract(&ctx).unwrap();
        let grp = record.group(GroupTarget::Module).unwrap();

        let a0 = grp.field("A0").unwrap();
        match &a0.data {
            FieldData::F64(v) => assert_eq!(v, &[FLOAT_FILL, 5.5, FLOAT_FILL]),
            _ => panic!("expected f64 data"),
        }

        let q = grp.field("Q").unwrap();
        match &q.data {
            FieldData::F64Matrix(m) => {
                assert_eq!(m.row(0), &[FLOAT_FILL, FLOAT_FILL]);
                assert_eq!(m.row(1), &[4.5, 9.0]);
                assert_eq!(m.row(2), &[FLOAT_FILL, FLOAT_FILL]);
            }
            _ => panic!("expected matrix data"),
        }

        assert!(q
            .attrs
            .iter()
            .any(|(n, v)| n == "units"
                && matches!(v, netcdf::AttributeValue::Str(s) if s == "m^3/s")));
    }

    #[test]
    fn test_no_files_yields_empty_record() {
        let dir = tempfile::tempdir().unwrap();
        let topology = topology();
        let paths = RunPaths::under(dir.path());
        let continent = continent();
        let ctx = ExtractContext {
            topology: &topology,
            paths: &paths,
            continent: &continent,
            run_type: RunType::Unconstrained,
            fill: FillPolicy::default(),
        };

        let record = HivdiReader.extract(&ctx).unwrap();
        let grp = record.group(GroupTarget::Module).unwrap();
        assert_eq!(grp.fields.len(), 4);
        for field in &grp.fields {
            match &field.data {
                FieldData::F64(v) => assert!(v.iter().all(|&x| x == FLOAT_FILL)),
                FieldData::F64Matrix(m) => {
                    assert!(m.as_slice().iter().all(|&x| x == FLOAT_FILL))
                }
                _ => panic!("unexpected field data"),
            }
        }
    }
}
