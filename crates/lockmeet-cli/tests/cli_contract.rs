use std::process::{Command, Output};

use serde_json::Value;

fn lockmeet(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_lockmeet"))
        .args(args)
        .current_dir(format!("{}/../..", env!("CARGO_MANIFEST_DIR")))
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to execute lockmeet")
}

fn stdout_json(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("stdout is not JSON ({e}): {stdout}"))
}

#[test]
fn help_lists_subcommands() {
    let output = lockmeet(&["--help"]);
    assert!(output.status.success(), "--help should succeed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    for cmd in ["analyze", "clusters", "parse"] {
        assert!(stdout.contains(cmd), "help should mention {cmd}: {stdout}");
    }
}

#[test]
fn analyze_cluster12_proves_both_equalities() {
    let output = lockmeet(&["analyze", "fixtures/mutex_meet_cluster12.lmt"]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("assert g == h"), "{stdout}");
    assert!(
        stdout.contains("Summary: 2 holds, 0 violated, 0 unknown"),
        "{stdout}"
    );
}

#[test]
fn relational_width_flag_overrides_file_block() {
    let output = lockmeet(&[
        "analyze",
        "fixtures/mutex_meet_cluster12.lmt",
        "--relational-width",
        "1",
        "--format",
        "json",
    ]);
    assert_eq!(output.status.code(), Some(0));
    let json = stdout_json(&output);
    assert_eq!(json["options"]["relational_width"], 1);
    let verdicts: Vec<&str> = json["assertions"]
        .as_array()
        .expect("assertions array")
        .iter()
        .map(|a| a["verdict"].as_str().unwrap_or_default())
        .collect();
    assert_eq!(verdicts, vec!["unknown", "unknown"]);
    assert_eq!(json["source_sha256"].as_str().map(str::len), Some(64));
}

#[test]
fn unprotected_write_exits_with_findings() {
    let output = lockmeet(&["analyze", "fixtures/unprotected_write.lmt", "--format", "json"]);
    assert_eq!(output.status.code(), Some(2));
    let json = stdout_json(&output);
    let diag = &json["diagnostics"][0];
    assert_eq!(diag["kind"], "unprotected_write");
    assert_eq!(diag["thread"], "t_fun");
    assert_eq!(diag["location"]["line"], 9);
}

#[test]
fn out_flag_writes_json_report() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("reports").join("two_clusters.json");
    let out_arg = out.display().to_string();
    let output = lockmeet(&[
        "analyze",
        "fixtures/two_clusters.lmt",
        "--out",
        &out_arg,
    ]);
    assert_eq!(output.status.code(), Some(0));
    let written: Value =
        serde_json::from_str(&std::fs::read_to_string(&out).expect("report written"))
            .expect("report is JSON");
    assert_eq!(written["program"], "TwoClusters");
    assert_eq!(written["converged"], true);
}

#[test]
fn clusters_respects_cluster_size() {
    let output = lockmeet(&["clusters", "fixtures/two_clusters.lmt", "--format", "json"]);
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["clusters"].as_array().map(Vec::len), Some(2));

    let output = lockmeet(&[
        "clusters",
        "fixtures/two_clusters.lmt",
        "--format",
        "json",
        "--cluster-size",
        "1",
    ]);
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["clusters"].as_array().map(Vec::len), Some(3));
}

#[test]
fn parse_prints_syntax_tree() {
    let output = lockmeet(&["parse", "fixtures/broken_equality.lmt"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("BrokenEquality"), "{stdout}");
    stdout_json(&output);
}

#[test]
fn syntax_error_fails_with_diagnostic() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bad.lmt");
    std::fs::write(&path, "program Bad { thread main { lock ; } }").expect("write");
    let output = lockmeet(&["analyze", &path.display().to_string()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(!output.stderr.is_empty());
}

#[test]
fn invalid_option_value_is_rejected() {
    let output = lockmeet(&[
        "analyze",
        "fixtures/two_clusters.lmt",
        "--path-sensitivity",
        "sideways",
    ]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("path_sensitivity"), "{stderr}");
}

#[test]
fn missing_file_fails() {
    let output = lockmeet(&["analyze", "fixtures/does_not_exist.lmt"]);
    assert!(!output.status.success());
}
