use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    // No API key: the narrative collaborator is unavailable and every
    // analysis must come back with the deterministic fallback.
    let mut child = Command::new(exe)
        .env_remove("GEMINI_API_KEY")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

struct Fixture {
    subject_id: String,
}

fn seed(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> Fixture {
    let _ = request_ok(
        stdin,
        reader,
        "seed-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let subject = request_ok(
        stdin,
        reader,
        "seed-sub",
        "subjects.create",
        json!({ "subjectCode": "CS101", "subjectName": "Intro to Computing" }),
    );
    let subject_id = subject
        .get("subjectId")
        .and_then(|v| v.as_str())
        .expect("subjectId")
        .to_string();

    let mut entries = Vec::new();
    for (i, (first, last, score)) in [
        ("Ana", "Cruz", 2.0),
        ("Ben", "Reyes", 4.0),
        ("Carla", "Santos", 1.5),
    ]
    .iter()
    .enumerate()
    {
        let created = request_ok(
            stdin,
            reader,
            &format!("seed-s{}", i),
            "students.create",
            json!({ "firstName": first, "lastName": last }),
        );
        let student_id = created
            .get("studentId")
            .and_then(|v| v.as_str())
            .expect("studentId")
            .to_string();
        entries.push(json!({
            "studentId": student_id,
            "prelim": score,
            "midterm": score,
            "semifinal": score,
            "final": score
        }));
    }
    let _ = request_ok(
        stdin,
        reader,
        "seed-save",
        "grades.save",
        json!({ "subjectId": subject_id, "entries": entries }),
    );

    Fixture { subject_id }
}

#[test]
fn analysis_without_collaborator_uses_fallback_narrative() {
    let workspace = temp_dir("gradebookd-analysis");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, &workspace);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "analysis.generate",
        json!({ "subjectId": fx.subject_id }),
    );

    assert_eq!(
        result.pointer("/subject/subjectCode").and_then(|v| v.as_str()),
        Some("CS101")
    );
    assert_eq!(
        result
            .pointer("/analysis/narrativeSource")
            .and_then(|v| v.as_str()),
        Some("fallback")
    );
    assert_eq!(
        result.pointer("/analysis/summary/total").and_then(|v| v.as_u64()),
        Some(3)
    );
    assert_eq!(
        result
            .pointer("/analysis/summary/passed")
            .and_then(|v| v.as_u64()),
        Some(2)
    );
    assert_eq!(
        result
            .pointer("/analysis/summary/failed")
            .and_then(|v| v.as_u64()),
        Some(1)
    );

    let narrative = result
        .pointer("/analysis/narrative")
        .and_then(|v| v.as_str())
        .expect("narrative");
    assert!(narrative.contains("Out of 3 students: 2 passed, 1 failed."));

    // Passed list preserves roster (last-name) order.
    let passed_names: Vec<&str> = result
        .pointer("/analysis/studentsPassed")
        .and_then(|v| v.as_array())
        .expect("studentsPassed")
        .iter()
        .filter_map(|s| s.get("name").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(passed_names, vec!["Cruz, Ana", "Santos, Carla"]);

    let failed = result
        .pointer("/analysis/studentsFailed")
        .and_then(|v| v.as_array())
        .expect("studentsFailed");
    assert_eq!(failed.len(), 1);
    assert_eq!(
        failed[0].get("average").and_then(|v| v.as_f64()),
        Some(4.0)
    );
}

#[test]
fn analysis_of_empty_roster_reports_zero_counts() {
    let workspace = temp_dir("gradebookd-analysis-empty");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "subjects.create",
        json!({ "subjectCode": "EM101", "subjectName": "Empty Class" }),
    );
    let subject_id = subject
        .get("subjectId")
        .and_then(|v| v.as_str())
        .expect("subjectId");

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "analysis.generate",
        json!({ "subjectId": subject_id }),
    );
    assert_eq!(
        result.pointer("/analysis/summary/total").and_then(|v| v.as_u64()),
        Some(0)
    );
    assert!(result
        .pointer("/analysis/narrative")
        .and_then(|v| v.as_str())
        .map(|s| !s.is_empty())
        .unwrap_or(false));
}

#[test]
fn report_export_writes_markdown_artifact() {
    let workspace = temp_dir("gradebookd-report");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, &workspace);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "report.export",
        json!({
            "subjectId": fx.subject_id,
            "narrative": "Two thirds of the class passed comfortably."
        }),
    );

    let path = result
        .get("path")
        .and_then(|v| v.as_str())
        .expect("report path")
        .to_string();
    assert!(path.ends_with("cs101-grade-report.md"));

    let rendered = std::fs::read_to_string(&path).expect("read report");
    assert!(rendered.starts_with("# Intro to Computing - Grade Report"));
    assert!(rendered.contains("Two thirds of the class passed comfortably."));
    assert!(rendered.contains("| Cruz, Ana | 2.00 | 2.00 | 2.00 | 2.00 | 2.00 | Passed |"));
    assert!(rendered.contains("| Reyes, Ben | 4.00 | 4.00 | 4.00 | 4.00 | 4.00 | Failed |"));
    assert!(rendered.contains("- Total students: 3"));
}
