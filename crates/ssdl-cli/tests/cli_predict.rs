use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_ssdl"))
}

fn repo_root() -> PathBuf {
    // crates/ssdl-cli -> repo root
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..").canonicalize().unwrap()
}

fn fixture_path(name: &str) -> PathBuf {
    repo_root().join("tests/fixtures").join(name)
}

fn tmp_path(filename: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("ssdl_cli_{}_{}_{}", std::process::id(), nanos, filename));
    p
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

fn run_json(args: &[&str]) -> serde_json::Value {
    let out = run(args);
    assert!(
        out.status.success(),
        "{:?} should succeed, stderr={}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).expect("stdout should be valid JSON")
}

fn fixture_args(cmd: &str, config: &str) -> Vec<String> {
    vec![
        cmd.to_string(),
        "--config".to_string(),
        fixture_path(config).to_string_lossy().into_owned(),
        "--events".to_string(),
        fixture_path("events.json").to_string_lossy().into_owned(),
    ]
}

fn as_strs(v: &[String]) -> Vec<&str> {
    v.iter().map(String::as_str).collect()
}

fn f(v: &serde_json::Value, path: &[&str]) -> f64 {
    let mut cur = v;
    for key in path {
        cur = cur.get(*key).unwrap_or_else(|| panic!("missing key {} in {:?}", key, path));
    }
    cur.as_f64().unwrap_or_else(|| panic!("{:?} is not a number", path))
}

fn region<'a>(report: &'a serde_json::Value, name: &str) -> &'a serde_json::Value {
    report["regions"]
        .as_array()
        .expect("regions should be an array")
        .iter()
        .find(|r| r["region"]["name"] == name)
        .unwrap_or_else(|| panic!("region {} missing", name))
}

fn channel<'a>(region: &'a serde_json::Value, name: &str) -> &'a serde_json::Value {
    region["channels"]
        .as_array()
        .expect("channels should be an array")
        .iter()
        .find(|c| c["channel"] == name)
        .unwrap_or_else(|| panic!("channel {} missing", name))
}

#[test]
fn version_smoke() {
    let out = run(&["version"]);
    assert!(out.status.success(), "version should succeed");
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.starts_with("ssdl "), "unexpected stdout: {}", stdout);
}

#[test]
fn weights_sum_to_one_for_tight_tight_and_zero_for_loose_loose() {
    let common = ["--f1", "0.2", "--f2", "0.1", "--p1", "0.9", "--p2", "0.85"];

    let mut args = vec!["weights", "--category", "tight-tight"];
    args.extend(common);
    let v = run_json(&args);
    let sum = f(&v, &["pp"]) + f(&v, &["fakes"]);
    assert!((sum - 1.0).abs() < 1e-12, "tight-tight weights sum to {}", sum);

    let mut args = vec!["weights", "--category", "loose-loose"];
    args.extend(common);
    let v = run_json(&args);
    let sum = f(&v, &["pp"]) + f(&v, &["fakes"]);
    assert!(sum.abs() < 1e-12, "loose-loose weights sum to {}", sum);
    assert!(f(&v, &["pp"]) > 0.0);
}

#[test]
fn weights_reject_equal_ratios() {
    let out =
        run(&["weights", "--category", "tight-loose", "--f1", "0.5", "--f2", "0.1", "--p1", "0.5", "--p2", "0.9"]);
    assert!(!out.status.success(), "p == f must fail");
}

#[test]
fn matrix_reproduces_golden_scenario() {
    let v = run_json(&[
        "matrix", "--channel", "mu-mu", "--f1", "0.085", "--f1-err", "5.8e-5", "--p1", "0.930",
        "--p1-err", "1.6e-3", "--tt", "196", "--tl", "4600", "--ll", "768",
    ]);
    assert!((f(&v, &["pp", "value"]) - -227.870276937082).abs() < 1e-8);
    assert!((f(&v, &["pf", "value"]) - 420.1694296138091).abs() < 1e-8);
    assert!((f(&v, &["ff", "value"]) - 3.7008473232729964).abs() < 1e-8);
    assert!(f(&v, &["fakes", "stat"]) > 0.0);
    assert_eq!(v["n_toys"], 100);
}

#[test]
fn matrix_mixed_channel_requires_second_leg() {
    let out = run(&[
        "matrix", "--channel", "el-mu", "--f1", "0.1", "--p1", "0.9", "--tt", "5", "--tl", "10",
        "--lt", "8", "--ll", "20",
    ]);
    assert!(!out.status.success(), "el-mu without --f2/--p2 must fail");
}

#[test]
fn matrix_output_is_independent_of_threads() {
    let base = [
        "matrix", "--channel", "el-mu", "--f1", "0.1", "--f1-err", "0.01", "--p1", "0.9",
        "--p1-err", "0.01", "--f2", "0.2", "--f2-err", "0.02", "--p2", "0.85", "--p2-err", "0.02",
        "--tt", "12", "--tl", "30", "--lt", "27", "--ll", "88", "--n-toys", "500",
    ];
    let mut one = base.to_vec();
    one.extend(["--threads", "1"]);
    let mut four = base.to_vec();
    four.extend(["--threads", "4"]);
    assert_eq!(run_json(&one), run_json(&four));
}

#[test]
fn ratios_match_control_lepton_counts() {
    let args = fixture_args("ratios", "analysis.yaml");
    let v = run_json(&as_strs(&args));
    assert!((f(&v, &["ratios", "mu_fake", "value"]) - 0.10).abs() < 1e-12);
    assert!((f(&v, &["ratios", "mu_prompt", "value"]) - 0.95).abs() < 1e-12);
    assert!((f(&v, &["ratios", "el_fake", "value"]) - 0.20).abs() < 1e-12);
    assert!((f(&v, &["ratios", "el_prompt", "value"]) - 0.90).abs() < 1e-12);
    assert_eq!(v["ratios"]["mu_fake"]["method"], "clopper_pearson");
    assert!(v.get("maps").is_none(), "maps only with --binned");
}

#[test]
fn ratios_binned_writes_maps_to_file() {
    let out_path = tmp_path("ratios.json");
    let mut args = fixture_args("ratios", "analysis.yaml");
    args.extend(["--binned".to_string(), "-o".to_string()]);
    args.push(out_path.to_string_lossy().into_owned());
    let out = run(&as_strs(&args));
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));

    let bytes = std::fs::read(&out_path).expect("output file should exist");
    let _ = std::fs::remove_file(&out_path);
    let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let cells = v["maps"]["mu_fake"]["cells"].as_array().expect("cells");
    assert_eq!(cells.len(), 16);
    assert_eq!(v["maps"]["el_prompt"]["pt_projection"].as_array().map(Vec::len), Some(4));
}

#[test]
fn chmid_measures_per_partition_probabilities() {
    let args = fixture_args("chmid", "analysis.yaml");
    let v = run_json(&as_strs(&args));
    assert!((f(&v, &["bb", "value"]) - 0.001).abs() < 1e-12);
    assert!((f(&v, &["be", "value"]) - 0.002).abs() < 1e-12);
    assert!((f(&v, &["ee", "value"]) - 0.005).abs() < 1e-12);
    assert!((f(&v, &["ee", "syst"]) - 0.0005).abs() < 1e-12);
}

#[test]
fn predict_combines_all_backgrounds() {
    let args = fixture_args("predict", "analysis.yaml");
    let v = run_json(&as_strs(&args));

    let incl = region(&v, "inclusive");
    assert_eq!(f(incl, &["observed", "count"]), 24.0);
    for ch in ["mu_mu", "el_mu", "el_el"] {
        assert_eq!(f(channel(incl, ch), &["observed", "count"]), 8.0);
    }

    let mm = channel(incl, "mu_mu");
    assert!((f(mm, &["fakes", "value"]) - 3.4656401384083044).abs() < 1e-9);
    assert!((f(mm, &["rare_sm", "value"]) - 2.0).abs() < 1e-12);
    assert_eq!(f(mm, &["charge_mis_id", "value"]), 0.0);

    let ee = channel(incl, "el_el");
    assert!((f(ee, &["fakes", "value"]) - 6.8097959183673495).abs() < 1e-9);
    assert!((f(ee, &["charge_mis_id", "value"]) - 1.8).abs() < 1e-12);
    assert!((f(ee, &["diboson", "value"]) - 8.0).abs() < 1e-12);

    let em = channel(incl, "el_mu");
    assert!((f(em, &["charge_mis_id", "value"]) - 0.2).abs() < 1e-12);

    let ht = region(&v, "HT200");
    assert_eq!(f(ht, &["observed", "count"]), 12.0);
    let mm_ht = channel(ht, "mu_mu");
    assert!((f(mm_ht, &["fakes", "value"]) - 1.7890311418685125).abs() < 1e-9);
    assert!((f(channel(ht, "el_el"), &["charge_mis_id", "value"]) - 0.9).abs() < 1e-12);

    let total = f(incl, &["total", "value"]);
    let parts = f(incl, &["fakes", "value"])
        + f(incl, &["charge_mis_id", "value"])
        + f(incl, &["rare_sm", "value"])
        + f(incl, &["diboson", "value"]);
    assert!((total - parts).abs() < 1e-9);
}

#[test]
fn predict_single_region() {
    let mut args = fixture_args("predict", "analysis.yaml");
    args.extend(["--region".to_string(), "HT200".to_string()]);
    let v = run_json(&as_strs(&args));
    let regions = v["regions"].as_array().unwrap();
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0]["region"]["name"], "HT200");
}

#[test]
fn predict_unknown_region_fails() {
    let mut args = fixture_args("predict", "analysis.yaml");
    args.extend(["--region".to_string(), "HT9000".to_string()]);
    let out = run(&as_strs(&args));
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("HT9000"));
}

#[test]
fn predict_is_deterministic() {
    let args = fixture_args("predict", "analysis.yaml");
    assert_eq!(run_json(&as_strs(&args)), run_json(&as_strs(&args)));
}

#[test]
fn predict_per_event_from_json_config() {
    let args = fixture_args("predict", "analysis_per_event.json");
    let v = run_json(&as_strs(&args));
    let incl = region(&v, "inclusive");

    // One flat cell: per-event weights reproduce the integrated solution.
    let mm = channel(incl, "mu_mu");
    assert!((f(mm, &["fakes", "value"]) - 3.4656401384083044).abs() < 1e-9);
    assert!(f(mm, &["fakes", "stat"]) > 0.0);
    assert_eq!(f(incl, &["rare_sm", "value"]), 0.0);
    assert_eq!(f(incl, &["diboson", "value"]), 0.0);
}

#[test]
fn bad_config_fails() {
    let cfg = tmp_path("bad.yaml");
    std::fs::write(
        &cfg,
        "target_lumi: -1.0\nsamples: []\nroles: {data: [], mu_fake: [], mu_prompt: [], \
         el_fake: [], el_prompt: [], charge_flip: []}\n",
    )
    .unwrap();
    let events = fixture_path("events.json");
    let out = run(&[
        "predict",
        "--config",
        cfg.to_string_lossy().as_ref(),
        "--events",
        events.to_string_lossy().as_ref(),
    ]);
    let _ = std::fs::remove_file(&cfg);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("target_lumi"));
}

#[test]
fn missing_events_file_fails() {
    let out = run(&[
        "ratios",
        "--config",
        fixture_path("analysis.yaml").to_string_lossy().as_ref(),
        "--events",
        "/nonexistent/events.json",
    ]);
    assert!(!out.status.success());
}
