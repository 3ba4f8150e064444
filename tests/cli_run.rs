use assert_cmd::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

const QUOTE_FLOW: &str = r##"platform: acme
slug: quote
name: Acme quote
steps:
  - type: goto
    url: "https://acme.test/quote?zip={{ project.zip }}"
  - type: fill
    selector: "#zip"
    leadKey: project.zip
  - type: select
    selector: "#status"
    leadKey: project.status
    valueMap:
      TNS: independent
      "*": employee
  - type: click
    selector: "#submit"
"##;

fn workspace() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let flows = dir.path().join("flows/acme");
    fs::create_dir_all(&flows).unwrap();
    fs::write(flows.join("quote.yaml"), QUOTE_FLOW).unwrap();
    fs::write(
        dir.path().join("leads.json"),
        r#"[
            {"id": "L-1", "project": {"zip": "75001", "status": "TNS"}},
            {"id": "L-2", "project": {"zip": "69002", "status": "SALARIE"}},
            {"id": "L-3", "project": {"zip": "13001"}}
        ]"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("leadflow.yaml"),
        format!(
            "flows_dir: {}\nartifacts_dir: {}\nconcurrency: 2\n",
            dir.path().join("flows").display(),
            dir.path().join("artifacts").display()
        ),
    )
    .unwrap();
    dir
}

fn leadflow(dir: &Path) -> Command {
    let bin = assert_cmd::cargo::cargo_bin!("leadflow");
    let mut cmd = Command::new(bin);
    cmd.current_dir(dir)
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(dir.join("leadflow.yaml"));
    cmd
}

fn json_lines(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8(stdout.to_vec())
        .expect("utf8 output")
        .lines()
        .filter(|line| line.starts_with('{'))
        .map(|line| serde_json::from_str(line).expect("json event"))
        .collect()
}

#[test]
fn run_reports_progress_and_summary() {
    let dir = workspace();
    let snapshot = dir.path().join("snapshot.json");
    let assert = leadflow(dir.path())
        .args(["--output", "json", "run", "--flow", "acme/quote", "--leads", "leads.json"])
        .arg("--snapshot")
        .arg(&snapshot)
        .assert()
        .success();

    let events = json_lines(&assert.get_output().stdout);
    let count = |name: &str| events.iter().filter(|e| e["event"] == name).count();
    assert_eq!(count("queued"), 3);
    assert_eq!(count("succeeded"), 3);
    assert_eq!(count("progress"), 12);

    let done = events.last().unwrap();
    assert_eq!(done["event"], "done");
    assert_eq!(done["summary"]["status"], "completed");
    assert_eq!(done["summary"]["counts"]["success"], 3);

    let snapshot: Value = serde_json::from_str(&fs::read_to_string(snapshot).unwrap()).unwrap();
    let text = snapshot.to_string();
    assert!(text.contains("\"independent\""));
    assert!(text.contains("\"employee\""));
    assert!(dir.path().join("artifacts").is_dir());
}

#[test]
fn failing_selector_fails_the_run() {
    let dir = workspace();
    let assert = leadflow(dir.path())
        .args(["--output", "json", "run", "--flow", "acme/quote", "--leads", "leads.json"])
        .args(["--fail-on", "#submit", "--max-attempts", "1"])
        .assert()
        .failure();

    let events = json_lines(&assert.get_output().stdout);
    let failed: Vec<_> = events.iter().filter(|e| e["event"] == "failed").collect();
    assert_eq!(failed.len(), 3);
    assert!(failed[0]["error"]
        .as_str()
        .unwrap()
        .starts_with("step 4 (click #submit) failed"));
    assert!(events.iter().all(|e| e["event"] != "retrying"));
    assert_eq!(events.last().unwrap()["summary"]["status"], "failed");
}

#[test]
fn csv_leads_are_accepted() {
    let dir = workspace();
    fs::write(
        dir.path().join("leads.csv"),
        "id,project.zip,project.status\nL-9,75001,TNS\n",
    )
    .unwrap();
    let assert = leadflow(dir.path())
        .args(["run", "--flow", "acme/quote", "--leads", "leads.csv"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(stdout.contains("lead L-9 -> acme/quote"));
    assert!(stdout.contains("1 succeeded"));
}

#[test]
fn unknown_flow_is_a_setup_error() {
    let dir = workspace();
    leadflow(dir.path())
        .args(["run", "--flow", "acme/renewal", "--leads", "leads.json"])
        .assert()
        .failure();
}

#[test]
fn malformed_flow_reference_is_rejected_by_the_parser() {
    let dir = workspace();
    leadflow(dir.path())
        .args(["run", "--flow", "acme", "--leads", "leads.json"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn validate_checks_every_flow_in_the_directory() {
    let dir = workspace();
    let assert = leadflow(dir.path())
        .args(["--output", "json", "validate"])
        .assert()
        .success();
    let reports = json_lines(&assert.get_output().stdout);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["flow"], "acme/quote");
    assert_eq!(reports[0]["valid"], true);
    assert_eq!(reports[0]["steps"], 4);
}

#[test]
fn validate_reports_invalid_flows() {
    let dir = workspace();
    fs::create_dir_all(dir.path().join("flows/zen")).unwrap();
    fs::write(
        dir.path().join("flows/zen/login.yaml"),
        "platform: zen\nslug: login\nname: Login\nsteps:\n  - type: click\n    selector: \"\"\n",
    )
    .unwrap();
    let assert = leadflow(dir.path())
        .args(["validate", "--flow", "zen/login"])
        .assert()
        .failure();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(stdout.contains("invalid  zen/login"));
}
