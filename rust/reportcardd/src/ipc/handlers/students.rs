use crate::db;
use crate::ipc::helpers::{
    class_exists, get_optional_str, get_required_str, parse_csv_record, student_in_class, with_db,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

fn require_class(conn: &Connection, class_id: &str) -> Result<(), HandlerErr> {
    if class_exists(conn, class_id)? {
        Ok(())
    } else {
        Err(HandlerErr::not_found("class not found"))
    }
}

fn next_sort_order(conn: &Connection, class_id: &str) -> Result<i64, HandlerErr> {
    conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE class_id = ?",
        [class_id],
        |r| r.get(0),
    )
    .map_err(HandlerErr::query)
}

fn parse_active(v: Option<&Value>) -> Result<bool, HandlerErr> {
    match v {
        None | Some(Value::Null) => Ok(true),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(HandlerErr::bad_params("active must be a boolean")),
    }
}

fn students_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    require_class(conn, &class_id)?;
    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, student_no, gender, active, sort_order
             FROM students
             WHERE class_id = ?
             ORDER BY sort_order, id",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([&class_id], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "lastName": last,
                "firstName": first,
                "displayName": format!("{}, {}", last, first),
                "studentNo": r.get::<_, Option<String>>(3)?,
                "gender": r.get::<_, Option<String>>(4)?,
                "active": r.get::<_, i64>(5)? != 0,
                "sortOrder": r.get::<_, i64>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "students": rows }))
}

fn insert_student(
    conn: &Connection,
    class_id: &str,
    last_name: &str,
    first_name: &str,
    student_no: Option<&str>,
    gender: Option<&str>,
    active: bool,
) -> Result<String, HandlerErr> {
    let student_id = Uuid::new_v4().to_string();
    let sort_order = next_sort_order(conn, class_id)?;
    conn.execute(
        "INSERT INTO students(id, class_id, last_name, first_name, student_no, gender, active, sort_order, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            class_id,
            last_name,
            first_name,
            student_no,
            gender,
            active as i64,
            sort_order,
            db::now_stamp(),
        ),
    )
    .map_err(|e| HandlerErr::write("db_insert_failed", "students", e))?;
    Ok(student_id)
}

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let last_name = get_required_str(params, "lastName")?;
    let first_name = get_required_str(params, "firstName")?;
    let student_no = get_optional_str(params, "studentNo")?;
    let gender = get_optional_str(params, "gender")?;
    let active = parse_active(params.get("active"))?;
    require_class(conn, &class_id)?;
    let student_id = insert_student(
        conn,
        &class_id,
        &last_name,
        &first_name,
        student_no.as_deref(),
        gender.as_deref(),
        active,
    )?;
    Ok(json!({ "studentId": student_id }))
}

fn students_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;
    let Some(patch) = params.get("patch").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    if !student_in_class(conn, &class_id, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (key, column, required) in [
        ("lastName", "last_name", true),
        ("firstName", "first_name", true),
        ("studentNo", "student_no", false),
        ("gender", "gender", false),
    ] {
        if patch.get(key).is_none() {
            continue;
        }
        let value = if required {
            Some(get_required_str(patch, key)?)
        } else {
            get_optional_str(patch, key)?
        };
        let sql = format!("UPDATE students SET {} = ? WHERE id = ?", column);
        tx.execute(&sql, (&value, &student_id))
            .map_err(|e| HandlerErr::write("db_update_failed", "students", e))?;
    }
    if let Some(v) = patch.get("active") {
        let active = parse_active(Some(v))?;
        tx.execute(
            "UPDATE students SET active = ? WHERE id = ?",
            (active as i64, &student_id),
        )
        .map_err(|e| HandlerErr::write("db_update_failed", "students", e))?;
    }
    tx.execute(
        "UPDATE students SET updated_at = ? WHERE id = ?",
        (db::now_stamp(), &student_id),
    )
    .map_err(|e| HandlerErr::write("db_update_failed", "students", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn students_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;
    if !student_in_class(conn, &class_id, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "DELETE FROM report_subjects WHERE report_id IN (SELECT id FROM reports WHERE student_id = ?)",
        [&student_id],
    )
    .map_err(|e| HandlerErr::write("db_delete_failed", "report_subjects", e))?;
    tx.execute("DELETE FROM reports WHERE student_id = ?", [&student_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", "reports", e))?;
    tx.execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", "students", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

#[derive(Debug, Clone, PartialEq)]
struct ImportedStudent {
    line: usize,
    last_name: String,
    first_name: String,
    student_no: Option<String>,
    gender: Option<String>,
    active: bool,
}

/// Parse a student roster CSV. Column order is taken from the header row;
/// header names ignore case, spaces and underscores.
fn parse_student_csv(text: &str) -> Result<(Vec<ImportedStudent>, Vec<Value>), HandlerErr> {
    let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());
    let Some((_, header)) = lines.next() else {
        return Err(HandlerErr::bad_params("csvText has no header row"));
    };
    let columns: Vec<String> = parse_csv_record(header)
        .iter()
        .map(|c| {
            c.chars()
                .filter(|ch| ch.is_ascii_alphanumeric())
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .collect();
    let col = |name: &str| columns.iter().position(|c| c == name);
    let (Some(last_idx), Some(first_idx)) = (col("lastname"), col("firstname")) else {
        return Err(HandlerErr::bad_params(
            "csv header must include lastName and firstName",
        ));
    };
    let no_idx = col("studentno");
    let gender_idx = col("gender");
    let active_idx = col("active");

    let mut rows = Vec::new();
    let mut warnings = Vec::new();
    for (line_no, line) in lines {
        let fields = parse_csv_record(line);
        let field = |idx: Option<usize>| {
            idx.and_then(|i| fields.get(i))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let (Some(last_name), Some(first_name)) = (field(Some(last_idx)), field(Some(first_idx)))
        else {
            warnings.push(json!({
                "line": line_no + 1,
                "code": "missing_name",
                "message": "row skipped: lastName and firstName are required"
            }));
            continue;
        };
        let active = match field(active_idx).map(|s| s.to_ascii_lowercase()) {
            None => true,
            Some(s) => !matches!(s.as_str(), "0" | "false" | "no" | "n"),
        };
        rows.push(ImportedStudent {
            line: line_no + 1,
            last_name,
            first_name,
            student_no: field(no_idx),
            gender: field(gender_idx),
            active,
        });
    }
    Ok((rows, warnings))
}

fn students_import_csv(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let Some(text) = params.get("csvText").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::bad_params("missing csvText"));
    };
    require_class(conn, &class_id)?;
    let (rows, warnings) = parse_student_csv(text)?;
    let skipped = warnings.len();

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut created = 0usize;
    let mut updated = 0usize;
    for row in rows {
        let existing: Option<String> = match row.student_no.as_deref() {
            Some(no) => tx
                .query_row(
                    "SELECT id FROM students WHERE class_id = ? AND student_no = ?",
                    (&class_id, no),
                    |r| r.get(0),
                )
                .optional()
                .map_err(HandlerErr::query)?,
            None => None,
        };
        match existing {
            Some(student_id) => {
                tx.execute(
                    "UPDATE students
                     SET last_name = ?, first_name = ?, gender = COALESCE(?, gender), active = ?, updated_at = ?
                     WHERE id = ?",
                    (
                        &row.last_name,
                        &row.first_name,
                        &row.gender,
                        row.active as i64,
                        db::now_stamp(),
                        &student_id,
                    ),
                )
                .map_err(|e| HandlerErr::write("db_update_failed", "students", e))?;
                updated += 1;
            }
            None => {
                insert_student(
                    &tx,
                    &class_id,
                    &row.last_name,
                    &row.first_name,
                    row.student_no.as_deref(),
                    row.gender.as_deref(),
                    row.active,
                )
                .map_err(|mut e| {
                    e.details = Some(json!({ "line": row.line }));
                    e
                })?;
                created += 1;
            }
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(class_id = %class_id, created, updated, skipped, "student roster imported");
    Ok(json!({
        "created": created,
        "updated": updated,
        "skipped": skipped,
        "warnings": warnings,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(with_db(state, req, students_list)),
        "students.create" => Some(with_db(state, req, students_create)),
        "students.update" => Some(with_db(state, req, students_update)),
        "students.delete" => Some(with_db(state, req, students_delete)),
        "students.importCsv" => Some(with_db(state, req, students_import_csv)),
        _ => None,
    }
}
