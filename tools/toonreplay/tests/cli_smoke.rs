use assert_cmd::cargo::cargo_bin_cmd;

fn fixture(path: &str) -> String {
    format!("{}/tests/fixtures/{path}", env!("CARGO_MANIFEST_DIR"))
}

fn stdout_of(assert: assert_cmd::assert::Assert) -> String {
    String::from_utf8(assert.get_output().stdout.clone()).expect("utf8")
}

#[test]
fn help_lists_subcommands() {
    let mut cmd = cargo_bin_cmd!("toonreplay");
    cmd.arg("--help");
    let stdout = stdout_of(cmd.assert().success());

    for subcommand in ["list", "show", "clear", "simulate"] {
        assert!(stdout.contains(subcommand), "missing {subcommand}");
    }
    assert!(stdout.contains("--config"));
}

#[test]
fn list_skips_cells_without_a_valid_trail() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cmd = cargo_bin_cmd!("toonreplay");
    cmd.current_dir(temp.path())
        .arg("list")
        .arg(fixture("notebooks/recorded.ipynb"));
    let stdout = stdout_of(cmd.assert().success());

    assert_eq!(stdout.trim(), "c1 events=4 clicks=1");
    let log = std::fs::read_to_string(temp.path().join(".toonreplay/activity.jsonl"))
        .expect("activity log");
    assert!(log.contains("trail_malformed"));
}

#[test]
fn show_prints_one_json_line_per_event() {
    let mut cmd = cargo_bin_cmd!("toonreplay");
    cmd.arg("show")
        .arg(fixture("notebooks/recorded.ipynb"))
        .arg("--cell")
        .arg("c1")
        .arg("--config")
        .arg(fixture("configs/fast.toml"));
    let stdout = stdout_of(cmd.assert().success());

    let lines = stdout.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 4);
    let first: serde_json::Value = serde_json::from_str(lines[0]).expect("json");
    assert_eq!(first["kind"], "mousedown");
    assert_eq!(first["child_index"], 0);
    let last: serde_json::Value = serde_json::from_str(lines[3]).expect("json");
    assert_eq!(last["descent_path"], serde_json::json!([1]));
}

#[test]
fn simulate_replays_against_the_fixture_layout() {
    let mut cmd = cargo_bin_cmd!("toonreplay");
    cmd.arg("simulate")
        .arg(fixture("notebooks/recorded.ipynb"))
        .arg("--cell")
        .arg("c1")
        .arg("--layout")
        .arg(fixture("layouts/single_plot.json"))
        .arg("--config")
        .arg(fixture("configs/fast.toml"));
    let stdout = stdout_of(cmd.assert().success());

    assert_eq!(
        stdout.lines().collect::<Vec<_>>(),
        vec![
            "mousedown node=4 x=120.00 y=60.00",
            "mousemove node=5 x=220.00 y=100.00",
            "mouseup node=5 x=220.00 y=100.00",
            "click node=5 x=250.00 y=100.00",
            "cell_id=c1 state=completed message=dispatched=4 skipped=0 ",
        ]
    );
}

#[test]
fn simulate_json_output_marks_events_as_bubbling() {
    let mut cmd = cargo_bin_cmd!("toonreplay");
    cmd.arg("simulate")
        .arg(fixture("notebooks/recorded.ipynb"))
        .arg("--cell")
        .arg("c1")
        .arg("--layout")
        .arg(fixture("layouts/single_plot.json"))
        .arg("--json")
        .arg("--config")
        .arg(fixture("configs/fast.toml"));
    let stdout = stdout_of(cmd.assert().success());

    let first: serde_json::Value =
        serde_json::from_str(stdout.lines().next().expect("line")).expect("json");
    assert_eq!(first["node"], 4);
    assert_eq!(first["event"]["bubbles"], true);
    assert_eq!(first["event"]["kind"], "mousedown");
}

#[test]
fn clear_rewrites_the_notebook_in_place() {
    let temp = tempfile::tempdir().expect("tempdir");
    let notebook = temp.path().join("copy.ipynb");
    std::fs::copy(fixture("notebooks/recorded.ipynb"), &notebook).expect("copy");

    let mut cmd = cargo_bin_cmd!("toonreplay");
    cmd.arg("clear")
        .arg(&notebook)
        .arg("--cell")
        .arg("c1")
        .arg("--config")
        .arg(fixture("configs/fast.toml"));
    cmd.assert().success();

    let mut list = cargo_bin_cmd!("toonreplay");
    list.arg("list")
        .arg(&notebook)
        .arg("--config")
        .arg(fixture("configs/fast.toml"));
    assert_eq!(stdout_of(list.assert().success()).trim(), "");

    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&notebook).expect("read")).expect("json");
    assert_eq!(saved["cells"][1]["metadata"]["tags"], serde_json::json!(["comic", "half"]));
}

#[test]
fn unknown_cell_exits_nonzero() {
    let mut cmd = cargo_bin_cmd!("toonreplay");
    cmd.arg("show")
        .arg(fixture("notebooks/recorded.ipynb"))
        .arg("--cell")
        .arg("nope")
        .arg("--config")
        .arg(fixture("configs/fast.toml"));
    let out = cmd.assert().failure();
    let stderr = String::from_utf8(out.get_output().stderr.clone()).expect("utf8");
    assert!(stderr.contains("unknown cell: nope"));
}

#[test]
fn invalid_config_exits_nonzero() {
    let mut cmd = cargo_bin_cmd!("toonreplay");
    cmd.arg("list")
        .arg(fixture("notebooks/recorded.ipynb"))
        .arg("--config")
        .arg(fixture("configs/invalid.toml"));
    cmd.assert().failure();

    let mut missing = cargo_bin_cmd!("toonreplay");
    missing
        .arg("list")
        .arg(fixture("notebooks/recorded.ipynb"))
        .arg("--config")
        .arg(fixture("configs/missing.toml"));
    missing.assert().failure();
}
