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
    let exe = env!("CARGO_BIN_EXE_reportcardd");
    let mut child = Command::new(exe)
        .env("REPORTCARDD_AI_PROVIDER", "mock")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn reportcardd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn read_response(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response line");
    serde_json::from_str(line.trim()).expect("parse response json")
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

    let value = read_response(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
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
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("reportcard-router-smoke");
    let bundle_out = workspace.join("smoke-backup.zip");
    let csv_out = workspace.join("smoke-export.csv");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert_eq!(
        health.pointer("/narrative/available").and_then(|v| v.as_bool()),
        Some(true)
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "3", "settings.get", json!({}));

    let class_id = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classes.create",
        json!({ "name": "JSS 1A", "level": "JSS1", "academicYear": "2025/2026" }),
    )
    .get("classId")
    .and_then(|v| v.as_str())
    .expect("classId")
    .to_string();
    let student_id = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.create",
        json!({ "classId": class_id, "lastName": "Obi", "firstName": "Ada" }),
    )
    .get("studentId")
    .and_then(|v| v.as_str())
    .expect("studentId")
    .to_string();
    let report_id = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "reports.upsert",
        json!({
            "classId": class_id,
            "studentId": student_id,
            "term": 1,
            "academicYear": "2025/2026",
            "subjects": [
                { "subjectName": "Mathematics", "continuousAssessment": 45, "examinationMark": 80 }
            ]
        }),
    )
    .get("reportId")
    .and_then(|v| v.as_str())
    .expect("reportId")
    .to_string();

    let scope = json!({ "classId": class_id, "term": 1, "academicYear": "2025/2026" });
    let calls: Vec<(&str, serde_json::Value)> = vec![
        ("settings.update", json!({ "patch": { "schoolName": "Hill Top" } })),
        ("classes.list", json!({})),
        (
            "classes.update",
            json!({ "classId": class_id, "patch": { "level": "JSS 1" } }),
        ),
        ("students.list", json!({ "classId": class_id })),
        (
            "students.update",
            json!({ "classId": class_id, "studentId": student_id, "patch": { "gender": "F" } }),
        ),
        (
            "students.importCsv",
            json!({ "classId": class_id, "csvText": "lastName,firstName\nEze,Chidi\n" }),
        ),
        ("reports.preview", json!({ "subjects": [] })),
        ("reports.get", json!({ "reportId": report_id })),
        ("reports.list", json!({ "classId": class_id })),
        ("rankings.class", scope.clone()),
        ("stats.class", scope.clone()),
        ("stats.school", json!({ "term": 1, "academicYear": "2025/2026" })),
        ("narrative.status", json!({})),
        ("narrative.studentFeedback", json!({ "reportId": report_id })),
        ("narrative.classInsights", scope.clone()),
        (
            "narrative.schoolInsights",
            json!({ "term": 1, "academicYear": "2025/2026" }),
        ),
        (
            "exchange.exportReportsCsv",
            json!({
                "classId": class_id,
                "term": 1,
                "academicYear": "2025/2026",
                "outPath": csv_out.to_string_lossy()
            }),
        ),
        (
            "backup.exportWorkspaceBundle",
            json!({ "outPath": bundle_out.to_string_lossy() }),
        ),
    ];
    for (i, (method, params)) in calls.into_iter().enumerate() {
        let id = format!("call-{}", i);
        let _ = request_ok(&mut stdin, &mut reader, &id, method, params);
    }

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "reports.delete",
        json!({ "reportId": report_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "students.delete",
        json!({ "classId": class_id, "studentId": student_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "classes.delete",
        json!({ "classId": class_id }),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unknown_method_and_bad_json_are_reported() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "{{\"id\":\"1\",\"method\":\"nope.nothing\",\"params\":{{}}}}")
        .expect("write request");
    stdin.flush().expect("flush request");
    let resp = read_response(&mut reader);
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(error_code(&resp), Some("not_implemented"));

    writeln!(stdin, "this is not json").expect("write junk");
    stdin.flush().expect("flush junk");
    let resp = read_response(&mut reader);
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(error_code(&resp), Some("bad_json"));
    assert!(resp.get("id").is_none());

    // The daemon keeps serving after a bad line.
    let health = request_ok(&mut stdin, &mut reader, "2", "health", json!({}));
    assert!(health.get("workspacePath").map(|v| v.is_null()).unwrap_or(false));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn workspace_methods_require_a_selected_workspace() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    for (i, method) in ["classes.list", "settings.get", "stats.school", "reports.get"]
        .iter()
        .enumerate()
    {
        let resp = request(&mut stdin, &mut reader, &i.to_string(), method, json!({}));
        assert_eq!(error_code(&resp), Some("no_workspace"), "{}", method);
    }

    // Preview is pure computation and works without a workspace.
    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "p",
        "reports.preview",
        json!({
            "subjects": [
                { "subjectName": "Mathematics", "continuousAssessment": 45, "examinationMark": 80 }
            ]
        }),
    );
    assert_eq!(
        preview.get("overallAverage").and_then(|v| v.as_f64()),
        Some(77.5)
    );

    let resp = request(&mut stdin, &mut reader, "w", "workspace.select", json!({}));
    assert_eq!(error_code(&resp), Some("bad_params"));

    drop(stdin);
    let _ = child.wait();
}
