//! Integration tests for the full output run.
//!
//! Each test builds a miniature data tree on disk (prior SoS file, SWOT
//! observations, module results), runs the append loop end to end and reads
//! the produced archive back.

use std::fs;

use sos_output::archive::VersionManager;
use sos_output::config::{load_continent, RunPaths, RunType, VariableMetadata};
use sos_output::fill::{FLOAT_FILL, INT_FILL};
use sos_output::modules::ModuleKind;
use sos_output::orchestrator::{run, ModuleStatus, RunConfig};
use sos_output::topology::{priors_file_name, results_file_name, SosTopology};
use sos_output::upload::{upload_archive, LocalDirSink, UploadError};

const CONTINENT: &str = "na";
const CONTINENT_JSON: &str = r#"[{"na": [1, 2, 3]}]"#;

/// Prior SoS file for reaches [10, 20, 30] and nodes [100, 101, 200], with
/// the `model` group a constrained run copies.
fn write_prior_sos(paths: &RunPaths) {
    let sos_dir = paths.sos_dir();
    fs::create_dir_all(&sos_dir).unwrap();
    let mut file = netcdf::create(sos_dir.join(priors_file_name(CONTINENT))).unwrap();
    file.add_attribute("Name", "confluence_sos").unwrap();
    file.add_attribute("version", "0041").unwrap();
    file.add_attribute("run_type", "constrained").unwrap();
    file.add_dimension("num_reaches", 3).unwrap();
    file.add_dimension("num_nodes", 3).unwrap();
    {
        let mut reaches = file.add_group("reaches").unwrap();
        let mut var = reaches
            .add_variable::<i64>("reach_id", &["num_reaches"])
            .unwrap();
        var.put_attribute("format", "i8").unwrap();
        var.put_values(&[10i64, 20, 30], ..).unwrap();
    }
    {
        let mut nodes = file.add_group("nodes").unwrap();
        let mut var = nodes
            .add_variable::<i64>("node_id", &["num_nodes"])
            .unwrap();
        var.put_values(&[100i64, 101, 200], ..).unwrap();
        let mut var = nodes
            .add_variable::<i64>("reach_id", &["num_nodes"])
            .unwrap();
        var.put_values(&[10i64, 10, 20], ..).unwrap();
    }
    {
        let mut model = file.add_group("model").unwrap();
        model.add_attribute("source", "grades").unwrap();
        let mut var = model
            .add_variable::<f64>("mean_q", &["num_reaches"])
            .unwrap();
        var.put_attribute("units", "m^3/s").unwrap();
        var.put_values(&[800.0, 900.0, 1000.0], ..).unwrap();
    }
}

/// One SWOT observation file: the `nt` time axis plus observation counts and
/// times at reach and node level.
fn write_swot(paths: &RunPaths, name: &str, nt: usize, num_nodes: usize, base: f64) {
    let dir = paths.swot_dir();
    fs::create_dir_all(&dir).unwrap();
    let mut file = netcdf::create(dir.join(name)).unwrap();
    file.add_dimension("nt", nt).unwrap();
    file.add_dimension("nn", num_nodes).unwrap();

    let steps: Vec<i64> = (0..nt as i64).collect();
    let mut var = file.add_variable::<i64>("nt", &["nt"]).unwrap();
    var.put_values(&steps, ..).unwrap();

    let obs: Vec<i32> = (1..=nt as i32).collect();
    let mut var = file.add_variable::<i32>("observations", &["nt"]).unwrap();
    var.put_values(&obs, ..).unwrap();

    let mut reach = file.add_group("reach").unwrap();
    let times: Vec<f64> = (0..nt).map(|t| base + t as f64).collect();
    let mut var = reach.add_variable::<f64>("time", &["nt"]).unwrap();
    var.put_values(&times, ..).unwrap();

    let mut node = file.add_group("node").unwrap();
    let node_times: Vec<f64> = (0..num_nodes * nt)
        .map(|i| base * 10.0 + i as f64)
        .collect();
    let mut var = node.add_variable::<f64>("time", &["nn", "nt"]).unwrap();
    var.put_values(&node_times, ..).unwrap();
}

fn write_hivdi(paths: &RunPaths, name: &str, q: &[f64], a0: f64) {
    let dir = paths.flpe.join("hivdi");
    fs::create_dir_all(&dir).unwrap();
    let mut file = netcdf::create(dir.join(name)).unwrap();
    file.add_dimension("nt", q.len()).unwrap();
    let mut grp = file.add_group("reach").unwrap();
    let mut var = grp.add_variable::<f64>("Q", &["nt"]).unwrap();
    var.put_values(q, ..).unwrap();
    var.put_attribute("units", "m^3/s").unwrap();
    let mut var = grp.add_variable::<f64>("A0", &[]).unwrap();
    var.put_values(&[a0], ..).unwrap();
    let mut var = grp.add_variable::<f64>("alpha", &[]).unwrap();
    var.put_values(&[0.1], ..).unwrap();
    let mut var = grp.add_variable::<f64>("beta", &[]).unwrap();
    var.put_values(&[0.2], ..).unwrap();
}

fn write_continent_json(paths: &RunPaths) -> std::path::PathBuf {
    fs::create_dir_all(&paths.input).unwrap();
    let path = paths.input.join("continent.json");
    fs::write(&path, CONTINENT_JSON).unwrap();
    path
}

fn global_str(file: &netcdf::File, name: &str) -> String {
    match file.attribute(name).unwrap().value().unwrap() {
        netcdf::AttributeValue::Str(s) => s,
        other => panic!("global {name} is not a string: {other:?}"),
    }
}

#[test]
fn test_constrained_run_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let paths = RunPaths::under(dir.path());
    write_prior_sos(&paths);
    write_swot(&paths, "20_SWOT.nc", 2, 1, 100.0);
    write_hivdi(&paths, "20_hivdi.nc", &[4.5, 9.0], 5.5);
    let continent_json = write_continent_json(&paths);

    let config = RunConfig {
        continent_json,
        index: 0,
        run_type: RunType::Constrained,
        modules: vec![ModuleKind::Hivdi, ModuleKind::Swot, ModuleKind::Priors],
        paths: paths.clone(),
        metadata: VariableMetadata::empty(),
        upload: None,
    };
    let report = run(&config).unwrap();

    assert_eq!(report.continent, CONTINENT);
    assert_eq!(report.version, "0042", "prior version 0041 should bump");
    assert_eq!(
        report
            .outcomes
            .iter()
            .map(|o| o.module)
            .collect::<Vec<_>>(),
        vec![ModuleKind::Hivdi, ModuleKind::Priors, ModuleKind::Swot],
        "modules should append in canonical order"
    );
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.status == ModuleStatus::Appended));

    let archive_path = paths.output.join("sos").join(results_file_name(CONTINENT));
    assert_eq!(report.archive_path, archive_path);
    let ds = netcdf::open(&archive_path).unwrap();

    assert_eq!(global_str(&ds, "Name"), "confluence_sos");
    assert_eq!(global_str(&ds, "version"), "0042");
    assert_eq!(global_str(&ds, "run_type"), "constrained");

    // hivdi landed keyed by the master reach order, sentinels elsewhere
    let hivdi = ds.group("hivdi").unwrap().unwrap();
    let a0 = hivdi.variable("A0").unwrap();
    assert_eq!(
        a0.get_values::<f64, _>(..).unwrap(),
        vec![FLOAT_FILL, 5.5, FLOAT_FILL]
    );
    let q = hivdi.variable("Q").unwrap();
    assert_eq!(
        q.get_values::<f64, _>(..).unwrap(),
        vec![FLOAT_FILL, FLOAT_FILL, 4.5, 9.0, FLOAT_FILL, FLOAT_FILL]
    );
    assert_eq!(
        q.attribute_value("units").unwrap().unwrap(),
        netcdf::AttributeValue::Str("m^3/s".into()),
        "source attribute should carry into the archive"
    );

    // swot observations at the root as a ragged pair
    let obs = ds.variable("observations").unwrap();
    assert_eq!(
        obs.get_values::<i32, _>(..).unwrap(),
        vec![INT_FILL, 1, 2, INT_FILL]
    );
    let row_size = ds.variable("observations_row_size").unwrap();
    assert_eq!(row_size.get_values::<i32, _>(..).unwrap(), vec![1, 2, 1]);

    // shared identifier groups hold both the ids and the swot times
    let reaches = ds.group("reaches").unwrap().unwrap();
    assert_eq!(
        reaches
            .variable("reach_id")
            .unwrap()
            .get_values::<i64, _>(..)
            .unwrap(),
        vec![10, 20, 30]
    );
    assert!(reaches.variable("time").is_some());
    let nodes = ds.group("nodes").unwrap().unwrap();
    assert_eq!(
        nodes
            .variable("time")
            .unwrap()
            .get_values::<f64, _>(..)
            .unwrap(),
        vec![FLOAT_FILL, FLOAT_FILL, 1000.0, 1001.0],
        "node times should land on the nodes of reach 20"
    );

    // constrained run copies the model priors wholesale
    let priors = ds.group("priors").unwrap().unwrap();
    assert_eq!(
        priors
            .variable("mean_q")
            .unwrap()
            .get_values::<f64, _>(..)
            .unwrap(),
        vec![800.0, 900.0, 1000.0]
    );
}

#[test]
fn test_missing_results_still_produce_schema() {
    let dir = tempfile::tempdir().unwrap();
    let paths = RunPaths::under(dir.path());
    write_prior_sos(&paths);
    write_swot(&paths, "10_SWOT.nc", 2, 2, 50.0);
    let continent_json = write_continent_json(&paths);

    let config = RunConfig {
        continent_json,
        index: 0,
        run_type: RunType::Unconstrained,
        modules: vec![
            ModuleKind::Moi,
            ModuleKind::Lakeflow,
            ModuleKind::Priors,
            ModuleKind::Swot,
        ],
        paths: paths.clone(),
        metadata: VariableMetadata::empty(),
        upload: None,
    };
    let report = run(&config).unwrap();

    let statuses: Vec<(ModuleKind, ModuleStatus)> = report
        .outcomes
        .iter()
        .map(|o| (o.module, o.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            (ModuleKind::Moi, ModuleStatus::Appended),
            (ModuleKind::Priors, ModuleStatus::Skipped),
            (ModuleKind::Swot, ModuleStatus::Appended),
            (ModuleKind::Lakeflow, ModuleStatus::AppendedEmpty),
        ]
    );

    let ds = netcdf::open(&report.archive_path).unwrap();

    // an absent module directory still yields the full group schema
    let moi = ds.group("moi").unwrap().unwrap();
    assert!(moi.group("hivdi").is_some());
    let lakeflow = ds.group("lakeflow").unwrap().unwrap();
    assert_eq!(
        lakeflow
            .variable("reach_id")
            .unwrap()
            .get_values::<f64, _>(..)
            .unwrap(),
        vec![FLOAT_FILL, FLOAT_FILL, FLOAT_FILL]
    );
    assert!(lakeflow.variable("q_lakeflow").is_some());

    // unconstrained runs leave the model priors in the priors file
    assert!(ds.group("priors").unwrap().is_none());
}

#[test]
fn test_upload_places_archive_and_figures() {
    let dir = tempfile::tempdir().unwrap();
    let paths = RunPaths::under(dir.path());
    write_prior_sos(&paths);
    write_swot(&paths, "20_SWOT.nc", 2, 1, 100.0);
    let continent_json = write_continent_json(&paths);
    let figs = paths.validation_figs_dir();
    fs::create_dir_all(&figs).unwrap();
    fs::write(figs.join("20_validation.png"), b"png").unwrap();

    let bucket = dir.path().join("bucket");
    let config = RunConfig {
        continent_json,
        index: 0,
        run_type: RunType::Unconstrained,
        modules: vec![ModuleKind::Swot],
        paths: paths.clone(),
        metadata: VariableMetadata::empty(),
        upload: Some(Box::new(LocalDirSink::new(bucket.clone()))),
    };
    let report = run(&config).unwrap();

    let archive_key = bucket
        .join("confluence-sos/unconstrained")
        .join(&report.version)
        .join(results_file_name(CONTINENT));
    assert!(archive_key.is_file(), "archive should land under its key");
    let fig_key = bucket
        .join("confluence-sos/figs/unconstrained")
        .join(&report.version)
        .join("20_validation.png");
    assert!(fig_key.is_file(), "figures should land under the figs key");
}

#[test]
fn test_upload_requires_finalized_archive() {
    let dir = tempfile::tempdir().unwrap();
    let paths = RunPaths::under(dir.path());
    write_prior_sos(&paths);
    write_swot(&paths, "20_SWOT.nc", 2, 1, 100.0);
    let continent_json = write_continent_json(&paths);

    let continent = load_continent(&continent_json, 0).unwrap();
    let topology =
        SosTopology::load(CONTINENT, &paths.sos_dir(), &paths.swot_dir()).unwrap();
    let archive = VersionManager::new(&continent, &paths)
        .create_new_version(&topology)
        .unwrap();

    let sink = LocalDirSink::new(dir.path().join("bucket"));
    let err = upload_archive(&sink, &archive, RunType::Unconstrained, None).unwrap_err();
    assert!(matches!(err, UploadError::NotFinalized));
}
