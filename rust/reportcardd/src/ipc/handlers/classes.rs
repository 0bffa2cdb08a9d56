use crate::db;
use crate::ipc::helpers::{class_exists, get_optional_str, get_required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

fn classes_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.name, c.level, c.academic_year,
                    (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id)
             FROM classes c
             ORDER BY c.name, c.id",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "level": r.get::<_, Option<String>>(2)?,
                "academicYear": r.get::<_, Option<String>>(3)?,
                "studentCount": r.get::<_, i64>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "classes": rows }))
}

fn classes_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let level = get_optional_str(params, "level")?;
    let academic_year = get_optional_str(params, "academicYear")?;
    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name, level, academic_year, updated_at) VALUES(?, ?, ?, ?, ?)",
        (&class_id, &name, &level, &academic_year, db::now_stamp()),
    )
    .map_err(|e| HandlerErr::write("db_insert_failed", "classes", e))?;
    tracing::info!(class_id = %class_id, "class created");
    Ok(json!({ "classId": class_id }))
}

fn classes_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let Some(patch) = params.get("patch").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    if patch.get("name").is_some() {
        let name = get_required_str(patch, "name")?;
        tx.execute("UPDATE classes SET name = ? WHERE id = ?", (&name, &class_id))
            .map_err(|e| HandlerErr::write("db_update_failed", "classes", e))?;
    }
    if patch.get("level").is_some() {
        let level = get_optional_str(patch, "level")?;
        tx.execute("UPDATE classes SET level = ? WHERE id = ?", (&level, &class_id))
            .map_err(|e| HandlerErr::write("db_update_failed", "classes", e))?;
    }
    if patch.get("academicYear").is_some() {
        let year = get_optional_str(patch, "academicYear")?;
        tx.execute(
            "UPDATE classes SET academic_year = ? WHERE id = ?",
            (&year, &class_id),
        )
        .map_err(|e| HandlerErr::write("db_update_failed", "classes", e))?;
    }
    tx.execute(
        "UPDATE classes SET updated_at = ? WHERE id = ?",
        (db::now_stamp(), &class_id),
    )
    .map_err(|e| HandlerErr::write("db_update_failed", "classes", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn classes_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "DELETE FROM report_subjects WHERE report_id IN (SELECT id FROM reports WHERE class_id = ?)",
        [&class_id],
    )
    .map_err(|e| HandlerErr::write("db_delete_failed", "report_subjects", e))?;
    tx.execute("DELETE FROM reports WHERE class_id = ?", [&class_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", "reports", e))?;
    tx.execute("DELETE FROM students WHERE class_id = ?", [&class_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", "students", e))?;
    tx.execute("DELETE FROM classes WHERE id = ?", [&class_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", "classes", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    tracing::info!(class_id = %class_id, "class deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(with_db(state, req, classes_list)),
        "classes.create" => Some(with_db(state, req, classes_create)),
        "classes.update" => Some(with_db(state, req, classes_update)),
        "classes.delete" => Some(with_db(state, req, classes_delete)),
        _ => None,
    }
}
