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
        .env("REPORTCARDD_AI_PROVIDER", "none")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn reportcardd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn create_class(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    name: &str,
) -> String {
    request_ok(stdin, reader, name, "classes.create", json!({ "name": name }))
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string()
}

/// Creates a student and saves a term 1 report for them.
fn add_report(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    class_id: &str,
    last: &str,
    first: &str,
    subjects: serde_json::Value,
) {
    let student_id = request_ok(
        stdin,
        reader,
        &format!("s-{}", last),
        "students.create",
        json!({ "classId": class_id, "lastName": last, "firstName": first }),
    )
    .get("studentId")
    .and_then(|v| v.as_str())
    .expect("studentId")
    .to_string();
    let _ = request_ok(
        stdin,
        reader,
        &format!("r-{}", last),
        "reports.upsert",
        json!({
            "classId": class_id,
            "studentId": student_id,
            "term": 1,
            "academicYear": "2025/2026",
            "subjects": subjects,
        }),
    );
}

fn seed_school(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> (String, String) {
    let jss1 = create_class(stdin, reader, "JSS 1A");
    add_report(
        stdin,
        reader,
        &jss1,
        "Obi",
        "Ada",
        json!([
            { "subjectName": "Mathematics", "continuousAssessment": 45, "examinationMark": 80 },
            { "subjectName": "English", "continuousAssessment": 30, "examinationMark": 60 }
        ]),
    );
    add_report(
        stdin,
        reader,
        &jss1,
        "Bello",
        "Musa",
        json!([
            { "subjectName": "Mathematics", "continuousAssessment": 60, "examinationMark": 100 },
            { "subjectName": "english", "examinationMark": 50 }
        ]),
    );
    add_report(
        stdin,
        reader,
        &jss1,
        "Eze",
        "Chidi",
        json!([
            { "subjectName": "Mathematics", "continuousAssessment": 30, "examinationMark": 70 },
            { "subjectName": "English", "continuousAssessment": 45, "examinationMark": 55 }
        ]),
    );

    let jss2 = create_class(stdin, reader, "JSS 2A");
    add_report(
        stdin,
        reader,
        &jss2,
        "Adamu",
        "Zainab",
        json!([
            { "subjectName": "Mathematics", "continuousAssessment": 12, "examinationMark": 20 }
        ]),
    );
    (jss1, jss2)
}

#[test]
fn class_and_school_stats_aggregate_final_marks() {
    let workspace = temp_dir("reportcard-stats");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (jss1, _jss2) = seed_school(&mut stdin, &mut reader);

    let stats = request_ok(
        &mut stdin,
        &mut reader,
        "stats-class",
        "stats.class",
        json!({ "classId": jss1, "term": 1, "academicYear": "2025/2026" }),
    );
    assert_eq!(stats.get("reportCount").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(stats.get("classAverage").and_then(|v| v.as_f64()), Some(63.75));
    assert_eq!(stats.get("passRate").and_then(|v| v.as_f64()), Some(100.0));

    let subjects = stats.get("subjects").and_then(|v| v.as_array()).expect("subjects");
    assert_eq!(subjects.len(), 2, "english spellings group together");
    let maths = &subjects[0];
    assert_eq!(maths.get("subjectName").and_then(|v| v.as_str()), Some("Mathematics"));
    assert_eq!(maths.get("average").and_then(|v| v.as_f64()), Some(79.17));
    assert_eq!(maths.get("highest").and_then(|v| v.as_f64()), Some(100.0));
    assert_eq!(maths.get("lowest").and_then(|v| v.as_f64()), Some(60.0));
    let english = &subjects[1];
    assert_eq!(english.get("subjectName").and_then(|v| v.as_str()), Some("English"));
    assert_eq!(english.get("average").and_then(|v| v.as_f64()), Some(48.33));
    assert_eq!(english.get("passCount").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(english.get("passRate").and_then(|v| v.as_f64()), Some(66.7));

    let top = stats.get("topStudents").and_then(|v| v.as_array()).expect("topStudents");
    assert_eq!(top.len(), 3);
    assert_eq!(top[0].get("displayName").and_then(|v| v.as_str()), Some("Obi, Ada"));

    // Raising the pass mark changes pass counts, not marks.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "pm",
        "settings.update",
        json!({ "patch": { "passMark": 65 } }),
    );
    let school = request_ok(
        &mut stdin,
        &mut reader,
        "stats-school",
        "stats.school",
        json!({ "term": 1, "academicYear": "2025/2026" }),
    );
    assert_eq!(school.get("reportCount").and_then(|v| v.as_u64()), Some(4));
    // (66.25 + 62.5 + 62.5 + 20) / 4 = 52.8125
    assert_eq!(school.get("schoolAverage").and_then(|v| v.as_f64()), Some(52.81));
    assert_eq!(school.get("passCount").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(school.get("passRate").and_then(|v| v.as_f64()), Some(25.0));
    assert_eq!(
        school.get("classes").and_then(|v| v.as_array()).map(|c| c.len()),
        Some(2)
    );

    // Nothing recorded for term 2 yet.
    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "stats-empty",
        "stats.class",
        json!({ "classId": jss1, "term": 2, "academicYear": "2025/2026" }),
    );
    assert_eq!(empty.get("reportCount").and_then(|v| v.as_u64()), Some(0));
    assert!(empty.get("classAverage").map(|v| v.is_null()).unwrap_or(false));
    assert!(empty.get("passRate").map(|v| v.is_null()).unwrap_or(false));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn reports_csv_export_lists_each_subject_row() {
    let workspace = temp_dir("reportcard-csv-export");
    let out = workspace.join("exports").join("jss1.csv");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (jss1, _jss2) = seed_school(&mut stdin, &mut reader);

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "csv",
        "exchange.exportReportsCsv",
        json!({
            "classId": jss1,
            "term": 1,
            "academicYear": "2025/2026",
            "outPath": out.to_string_lossy()
        }),
    );
    assert_eq!(res.get("reportCount").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(res.get("rowsExported").and_then(|v| v.as_u64()), Some(6));

    let text = std::fs::read_to_string(&out).expect("read csv");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 7);
    assert!(lines[0].starts_with("student_id,student_name,term,academic_year,subject"));
    assert!(
        lines[1].contains(",\"Obi, Ada\",1,2025/2026,Mathematics,45,80,77.5,66.25,1"),
        "{}",
        lines[1]
    );
    assert!(
        lines[4].contains(",english,,50,25,62.5,2"),
        "{}",
        lines[4]
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
