use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::narrative::NarrativeError;
use crate::summary::SummaryError;
use rusqlite::{Connection, OptionalExtension};

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn query(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn write(code: &'static str, table: &str, e: rusqlite::Error) -> Self {
        Self {
            code,
            message: e.to_string(),
            details: Some(serde_json::json!({ "table": table })),
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<SummaryError> for HandlerErr {
    fn from(e: SummaryError) -> Self {
        Self {
            code: e.code,
            message: e.message,
            details: None,
        }
    }
}

impl From<NarrativeError> for HandlerErr {
    fn from(e: NarrativeError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

/// Run `f` against the open workspace, mapping the result into a response.
pub fn with_db<F>(state: &AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Absent and null both read as `None`; any other non-string is an error.
pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => {
            let t = s.trim();
            Ok(if t.is_empty() { None } else { Some(t.to_string()) })
        }
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn get_optional_i64(params: &serde_json::Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key))),
    }
}

pub fn get_term(params: &serde_json::Value) -> Result<i64, HandlerErr> {
    let term = get_optional_i64(params, "term")?
        .ok_or_else(|| HandlerErr::bad_params("missing term"))?;
    if !(1..=3).contains(&term) {
        return Err(HandlerErr::bad_params("term must be 1, 2 or 3"));
    }
    Ok(term)
}

pub fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

pub fn student_in_class(conn: &Connection, class_id: &str, student_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM students WHERE class_id = ? AND id = ?",
        (class_id, student_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn parse_csv_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                buf.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => out.push(std::mem::take(&mut buf)),
            _ => buf.push(ch),
        }
    }
    out.push(buf);
    out
}
