use crate::db::{self, SchoolSettings};
use crate::ipc::helpers::{with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn load(conn: &Connection) -> Result<SchoolSettings, HandlerErr> {
    db::load_school_settings(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn settings_get(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!(load(conn)?))
}

fn apply_patch(current: &mut SchoolSettings, patch: &serde_json::Map<String, Value>) -> Result<(), HandlerErr> {
    for (key, value) in patch {
        match key.as_str() {
            "schoolName" | "district" | "academicYear" => {
                let Some(s) = value.as_str() else {
                    return Err(HandlerErr::bad_params(format!("{} must be a string", key)));
                };
                let s = s.trim().to_string();
                match key.as_str() {
                    "schoolName" => current.school_name = s,
                    "district" => current.district = s,
                    _ => current.academic_year = s,
                }
            }
            "passMark" => {
                let pm = value
                    .as_f64()
                    .filter(|v| (0.0..=100.0).contains(v))
                    .ok_or_else(|| HandlerErr::bad_params("passMark must be a number between 0 and 100"))?;
                current.pass_mark = pm;
            }
            "currentTerm" => {
                let t = value
                    .as_i64()
                    .filter(|v| (1..=3).contains(v))
                    .ok_or_else(|| HandlerErr::bad_params("currentTerm must be 1, 2 or 3"))?;
                current.current_term = t;
            }
            other => {
                return Err(HandlerErr {
                    code: "bad_params",
                    message: format!("unknown setting: {}", other),
                    details: Some(json!({ "key": other })),
                })
            }
        }
    }
    Ok(())
}

fn settings_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    let mut current = load(conn)?;
    apply_patch(&mut current, patch)?;
    db::settings_set_json(conn, db::SCHOOL_SETTINGS_KEY, &json!(current))
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(json!(current))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(with_db(state, req, settings_get)),
        "settings.update" => Some(with_db(state, req, settings_update)),
        _ => None,
    }
}
