//! neoBAM results.
//!
//! neoBAM is a three-chain Bayesian sampler, so every posterior parameter
//! comes as `mean1..mean3` and `sd1..sd3` in subgroups named for the
//! parameter (`r`, `logn`, `logDb`, `logWb`). Discharge lives in a `q`
//! subgroup as one variable-length series per chain, kept ragged since each
//! reach file carries its own observation count. Result files are written
//! under the legacy `geobam/` directory name.

use std::path::Path;

use tracing::warn;

use crate::fill::FillPolicy;
use crate::record::{Field, FieldData, GroupTarget, RecordGroup, ResultRecord};

use super::{
    capture_attrs, reach_files, read_f64_vec, require_group, ExtractContext, FlatData, FlatSpec,
    ModuleError, ModuleKind, ResultReader,
};

const CHAIN_FIELDS: &[FlatSpec] = &[
    FlatSpec::scalar("mean1"),
    FlatSpec::scalar("mean2"),
    FlatSpec::scalar("mean3"),
    FlatSpec::scalar("sd1"),
    FlatSpec::scalar("sd2"),
    FlatSpec::scalar("sd3"),
];

/// Parameter subgroups, in archive order.
const PARAM_GROUPS: &[&str] = &["r", "logn", "logDb", "logWb"];

const Q_CHAINS: [&str; 3] = ["q1", "q2", "q3"];

struct NeobamData {
    params: Vec<FlatData>,
    q: Vec<Field>,
}

/// Reader for neoBAM chain results.
pub struct NeobamReader;

impl NeobamReader {
    fn allocate(ctx: &ExtractContext) -> NeobamData {
        let params = PARAM_GROUPS
            .iter()
            .map(|_| FlatData::new(CHAIN_FIELDS, ctx))
            .collect();
        let q = Q_CHAINS
            .iter()
            .map(|&name| Field::ragged_f64_by_reach(name, ctx.topology.num_reaches(), &ctx.fill))
            .collect();
        NeobamData { params, q }
    }

    fn build(data: NeobamData) -> ResultRecord {
        let mut groups: Vec<RecordGroup> = PARAM_GROUPS
            .iter()
            .zip(data.params)
            .map(|(&name, d)| {
                RecordGroup::new(GroupTarget::ModuleChild(name)).with_fields(d.into_fields())
            })
            .collect();
        groups.push(RecordGroup::new(GroupTarget::ModuleChild("q")).with_fields(data.q));
        ResultRecord::new("neobam").with_groups(groups)
    }
}

fn capture(path: &Path, data: &mut NeobamData) -> Result<(), ModuleError> {
    let ds = netcdf::open(path)?;
    for (&name, d) in PARAM_GROUPS.iter().zip(&mut data.params) {
        let grp = require_group(&ds, name)?;
        d.capture_attrs(&grp);
    }
    let q_grp = require_group(&ds, "q")?;
    for field in &mut data.q {
        field.attrs = capture_attrs(&q_grp, field.name);
    }
    Ok(())
}

fn read_reach(
    path: &Path,
    data: &mut NeobamData,
    row: usize,
    fill: &FillPolicy,
) -> Result<(), ModuleError> {
    let ds = netcdf::open(path)?;
    for (&name, d) in PARAM_GROUPS.iter().zip(&mut data.params) {
        let grp = require_group(&ds, name)?;
        d.read_reach(&grp, row, fill)?;
    }
    let q_grp = require_group(&ds, "q")?;
    for field in &mut data.q {
        let values = read_f64_vec(&q_grp, field.name, fill)?;
        if let FieldData::RaggedF64(r) = &mut field.data {
            r.set_row(row, values);
        }
    }
    Ok(())
}

impl ResultReader for NeobamReader {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Neobam
    }

    fn empty(&self, ctx: &ExtractContext) -> ResultRecord {
        Self::build(Self::allocate(ctx))
    }

    fn extract(&self, ctx: &ExtractContext) -> Result<ResultRecord, ModuleError> {
        let dir = ctx.paths.flpe.join("geobam");
        let files = reach_files(&dir, ctx.continent, "_geobam.nc")?;
        let mut data = Self::allocate(ctx);

        if let Some(first) = files.values().next() {
            if let Err(e) = capture(first, &mut data) {
                warn!(error = %e, "neobam attribute capture failed");
            }
        }

        for (row, &rid) in ctx.topology.reach_ids().iter().enumerate() {
            let Some(path) = files.get(&rid) else {
                continue;
            };
            if let Err(e) = read_reach(path, &mut data, row, &ctx.fill) {
                warn!(reach_id = rid, error = %e, "neobam reach failed, keeping sentinels");
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
    use crate::topology::SosTopology;

    fn write_result(path: &Path, nt: usize, base: f64) {
        let mut file = netcdf::create(path).unwrap();
        file.add_dimension("nt", nt).unwrap();
        for (g, name) in PARAM_GROUPS.iter().enumerate() {
            let mut grp = file.add_group(name).unwrap();
            for (i, s) in CHAIN_FIELDS.iter().enumerate() {
                let mut var = grp.add_variable::<f64>(s.name, &[]).unwrap();
                var.put_values(&[base + g as f64 * 10.0 + i as f64], ..).unwrap();
            }
        }
        let mut q_grp = file.add_group("q").unwrap();
        for (i, name) in Q_CHAINS.iter().enumerate() {
            let values: Vec<f64> = (0..nt).map(|t| base + i as f64 + t as f64 * 0.1).collect();
            let mut var = q_grp.add_variable::<f64>(name, &["nt"]).unwrap();
            var.put_values(&values, ..).unwrap();
        }
    }

    #[test]
    fn test_chain_groups_and_ragged_q() {
        let dir = tempfile::tempdir().unwrap();
        let topology = SosTopology::from_arrays(vec![10, 20], vec![], vec![], vec![0, 1, 2]);
        let paths = RunPaths::under(dir.path());
        let continent = ContinentSelection {
            code: "na".into(),
            prefixes: vec![1, 2],
        };
        let gb_dir = paths.flpe.join("geobam");
        std::fs::create_dir_all(&gb_dir).unwrap();
        write_result(&gb_dir.join("20_geobam.nc"), 3, 5.0);

        let ctx = ExtractContext {
            topology: &topology,
            paths: &paths,
            continent: &continent,
            run_type: RunType::Unconstrained,
            fill: FillPolicy::default(),
        };
        let record = NeobamReader.extract(&ctx).unwrap();
        assert_eq!(record.groups.len(), 5);

        let logdb = record.group(GroupTarget::ModuleChild("logDb")).unwrap();
        match &logdb.field("sd3").unwrap().data {
            FieldData::F64(v) => assert_eq!(v, &[FLOAT_FILL, 5.0 + 20.0 + 5.0]),
            _ => panic!("expected f64 data"),
        }

        let q = record.group(GroupTarget::ModuleChild("q")).unwrap();
        match &q.field("q2").unwrap().data {
            FieldData::RaggedF64(r) => {
                assert_eq!(r.row(0), &[FLOAT_FILL]);
                assert_eq!(r.row(1), &[6.0, 6.1, 6.2]);
            }
            _ => panic!("expected ragged f64"),
        }
    }

    #[test]
    fn test_empty_record_layout() {
        let dir = tempfile::tempdir().unwrap();
        let topology = SosTopology::from_arrays(vec![10], vec![], vec![], vec![0]);
        let paths = RunPaths::under(dir.path());
        let continent = ContinentSelection {
            code: "na".into(),
            prefixes: vec![1],
        };
        let ctx = ExtractContext {
            topology: &topology,
            paths: &paths,
            continent: &continent,
            run_type: RunType::Unconstrained,
            fill: FillPolicy::default(),
        };
        let record = NeobamReader.empty(&ctx);
        assert_eq!(record.field_count(), 4 * 6 + 3);
    }
}
