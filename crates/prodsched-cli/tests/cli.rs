//! End-to-end tests driving the compiled `prodsched` binary against a JSON
//! bundle round-tripped through a temp file.

use std::io::Write;
use std::process::Command;

fn bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_prodsched"))
}

fn write_bundle(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp file");
    file.write_all(contents.as_bytes()).expect("write bundle");
    file
}

const SINGLE_TASK_BUNDLE: &str = r#"{
  "tasks": [
    { "id": 1, "duration_minutes": 60, "workers_required": 1, "team": "M1", "kind": "Production", "primary_task": null }
  ],
  "quality_links": [],
  "precedence": [],
  "late_parts": [],
  "reworks": [],
  "teams": [
    { "name": "M1", "role": "Mechanic", "capacity": 2, "shifts": ["Shift1"] }
  ],
  "products": [
    { "name": "P", "delivery": "2025-09-01T00:00:00", "task_ids": [1], "holidays": [] }
  ]
}"#;

#[test]
fn check_command_accepts_a_valid_bundle() {
    let file = write_bundle(SINGLE_TASK_BUNDLE);
    let output = bin().arg("check").arg(file.path()).output().expect("run prodsched check");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("bundle is valid"));
}

#[test]
fn check_command_rejects_an_invalid_bundle() {
    let file = write_bundle(r#"{"tasks":[{"id":1,"duration_minutes":-5,"workers_required":1,"team":null,"kind":"Production","primary_task":null}],"quality_links":[],"precedence":[],"late_parts":[],"reworks":[],"teams":[],"products":[]}"#);
    let output = bin().arg("check").arg(file.path()).output().expect("run prodsched check");
    assert!(!output.status.success());
}

#[test]
fn schedule_command_emits_json_report() {
    let file = write_bundle(SINGLE_TASK_BUNDLE);
    let output = bin().arg("schedule").arg(file.path()).arg("--format").arg("json").output().expect("run prodsched schedule");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON output");
    assert_eq!(parsed["tasks"].as_array().unwrap().len(), 1);
    assert_eq!(parsed["summary"]["scenario"], "schedule");
}

#[test]
fn schedule_command_emits_text_report_by_default() {
    let file = write_bundle(SINGLE_TASK_BUNDLE);
    let output = bin().arg("schedule").arg(file.path()).output().expect("run prodsched schedule");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("scenario: schedule"));
    assert!(stdout.contains("PRODUCT"));
}

#[test]
fn scenario2_command_finds_a_complete_schedule() {
    let file = write_bundle(SINGLE_TASK_BUNDLE);
    let output = bin()
        .arg("scenario2")
        .arg(file.path())
        .arg("--format")
        .arg("json")
        .arg("--max-mechanics")
        .arg("4")
        .arg("--max-quality")
        .arg("4")
        .output()
        .expect("run prodsched scenario2");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON output");
    assert_eq!(parsed["summary"]["unscheduled_count"], 0);
}

#[test]
fn reads_bundle_from_stdin_when_no_file_given() {
    use std::io::Write as _;
    let mut child = bin()
        .arg("check")
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .spawn()
        .expect("spawn prodsched check");
    child.stdin.take().unwrap().write_all(SINGLE_TASK_BUNDLE.as_bytes()).unwrap();
    let output = child.wait_with_output().expect("wait for prodsched check");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
}
