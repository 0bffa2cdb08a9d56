use crate::db;
use crate::ipc::helpers::{get_required_str, get_term, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::summary::{self, ClassInfo};
use rusqlite::Connection;
use serde_json::{json, Value};

struct TermScope {
    term: i64,
    academic_year: String,
}

fn parse_scope(params: &Value) -> Result<TermScope, HandlerErr> {
    Ok(TermScope {
        term: get_term(params)?,
        academic_year: get_required_str(params, "academicYear")?,
    })
}

fn require_class(conn: &Connection, params: &Value) -> Result<ClassInfo, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    summary::load_class(conn, &class_id)?.ok_or_else(|| HandlerErr::not_found("class not found"))
}

pub fn pass_mark(conn: &Connection) -> Result<f64, HandlerErr> {
    db::load_school_settings(conn)
        .map(|s| s.pass_mark)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn rankings_class(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class = require_class(conn, params)?;
    let scope = parse_scope(params)?;
    let reports = summary::load_class_reports(
        conn,
        &class.id,
        Some(scope.term),
        Some(&scope.academic_year),
    )?;
    let rows = summary::class_ranking(&reports);
    Ok(json!({
        "class": class,
        "term": scope.term,
        "academicYear": scope.academic_year,
        "rows": rows,
    }))
}

pub fn compute_class_stats(
    conn: &Connection,
    params: &Value,
) -> Result<summary::ClassStats, HandlerErr> {
    let class = require_class(conn, params)?;
    let scope = parse_scope(params)?;
    let reports = summary::load_class_reports(
        conn,
        &class.id,
        Some(scope.term),
        Some(&scope.academic_year),
    )?;
    Ok(summary::class_stats(
        &class,
        scope.term,
        &scope.academic_year,
        &reports,
        pass_mark(conn)?,
    ))
}

pub fn compute_school_stats(
    conn: &Connection,
    params: &Value,
) -> Result<summary::SchoolStats, HandlerErr> {
    let scope = parse_scope(params)?;
    Ok(summary::school_stats(
        conn,
        scope.term,
        &scope.academic_year,
        pass_mark(conn)?,
    )?)
}

fn stats_class(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!(compute_class_stats(conn, params)?))
}

fn stats_school(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!(compute_school_stats(conn, params)?))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "rankings.class" => Some(with_db(state, req, rankings_class)),
        "stats.class" => Some(with_db(state, req, stats_class)),
        "stats.school" => Some(with_db(state, req, stats_school)),
        _ => None,
    }
}
