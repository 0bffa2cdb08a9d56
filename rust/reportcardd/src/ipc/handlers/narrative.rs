use crate::calc::{self, RankInput};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::reports::report_position;
use crate::ipc::handlers::stats::{compute_class_stats, compute_school_stats};
use crate::ipc::helpers::{get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::narrative::{
    FeedbackRequest, InsightRequest, InsightScope, NarrativeService, NarrativeStatus, SubjectMark,
    TopStudent,
};
use crate::summary::{self, RankedRow};
use rusqlite::Connection;
use serde_json::{json, Value};

/// Like `with_db`, but also refuses up front when the narrative service is
/// unavailable.
fn with_narrative<F>(state: &AppState, req: &Request, f: F) -> Value
where
    F: FnOnce(&Connection, &NarrativeService, &Value) -> Result<Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let NarrativeStatus::Unavailable { reason } = state.narrative.status() {
        return err(&req.id, "ai_unavailable", reason, None);
    }
    match f(conn, &state.narrative, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn top_students(rows: &[RankedRow]) -> Vec<TopStudent> {
    rows.iter()
        .map(|r| TopStudent {
            name: r.display_name.clone(),
            average: r.overall_average,
            position: r.position,
        })
        .collect()
}

fn student_feedback(
    conn: &Connection,
    service: &NarrativeService,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let report_id = get_required_str(params, "reportId")?;
    let save = params.get("save").and_then(|v| v.as_bool()).unwrap_or(false);
    let notes = get_optional_str(params, "notes")?;
    let Some(report) = summary::load_report(conn, &report_id)? else {
        return Err(HandlerErr::not_found("report not found"));
    };
    let class_name = summary::load_class(conn, &report.class_id)?
        .map(|c| c.name)
        .unwrap_or_default();
    let (position, class_size) = report_position(conn, &report)?;

    let request = FeedbackRequest {
        student_name: report.display_name.clone(),
        class_name,
        term: report.term,
        academic_year: report.academic_year.clone(),
        subjects: report
            .subjects
            .iter()
            .filter(|s| s.is_named())
            .map(|s| SubjectMark {
                name: s.subject_name.trim().to_string(),
                final_mark: calc::subject_final_mark(s),
            })
            .collect(),
        overall_average: report.overall_average(),
        position: position.map(calc::ordinal),
        class_size: Some(class_size),
        attendance_rate: report.attendance_rate(),
        teacher_notes: notes,
    };
    let response = service.feedback(&request)?;

    if save {
        conn.execute(
            "UPDATE reports SET teacher_feedback = ?, updated_at = ? WHERE id = ?",
            (&response.text, db::now_stamp(), &report.id),
        )
        .map_err(|e| HandlerErr::write("db_update_failed", "reports", e))?;
    }
    tracing::info!(report_id = %report.id, saved = save, "student feedback drafted");
    Ok(json!({ "text": response.text, "saved": save }))
}

fn class_insights(
    conn: &Connection,
    service: &NarrativeService,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let stats = compute_class_stats(conn, params)?;
    let settings = db::load_school_settings(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let request = InsightRequest {
        scope: InsightScope::Class,
        scope_name: stats.class.name.clone(),
        district: Some(settings.district).filter(|d| !d.is_empty()),
        term: stats.term,
        academic_year: stats.academic_year.clone(),
        student_count: stats.report_count,
        average: stats.class_average,
        pass_rate: stats.pass_rate,
        subjects: stats.subjects.clone(),
        top_students: top_students(&stats.top_students),
    };
    let response = service.insights(&request)?;
    Ok(json!({ "text": response.text, "stats": stats }))
}

fn school_insights(
    conn: &Connection,
    service: &NarrativeService,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let settings = db::load_school_settings(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    if settings.school_name.trim().is_empty() {
        return Err(HandlerErr::bad_params(
            "schoolName is not set; update settings before requesting school insights",
        ));
    }
    let stats = compute_school_stats(conn, params)?;

    // School-wide leaders: re-rank the per-class leaders against each other.
    let leaders: Vec<&RankedRow> = stats
        .classes
        .iter()
        .flat_map(|c| c.top_students.iter())
        .collect();
    let inputs: Vec<RankInput<usize>> = leaders
        .iter()
        .enumerate()
        .map(|(i, r)| RankInput {
            key: i,
            average: r.overall_average,
        })
        .collect();
    let top: Vec<TopStudent> = calc::rank_by_average(&inputs)
        .into_iter()
        .filter(|r| r.position.is_some())
        .take(3)
        .map(|r| TopStudent {
            name: leaders[r.key].display_name.clone(),
            average: r.average,
            position: r.position,
        })
        .collect();

    let request = InsightRequest {
        scope: InsightScope::School,
        scope_name: settings.school_name.clone(),
        district: Some(settings.district).filter(|d| !d.is_empty()),
        term: stats.term,
        academic_year: stats.academic_year.clone(),
        student_count: stats.report_count,
        average: stats.school_average,
        pass_rate: stats.pass_rate,
        subjects: stats.subjects.clone(),
        top_students: top,
    };
    let response = service.insights(&request)?;
    Ok(json!({ "text": response.text, "stats": stats }))
}

fn handle_status(state: &mut AppState, req: &Request) -> Value {
    ok(&req.id, state.narrative.status_json())
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "narrative.status" => Some(handle_status(state, req)),
        "narrative.studentFeedback" => Some(with_narrative(state, req, student_feedback)),
        "narrative.classInsights" => Some(with_narrative(state, req, class_insights)),
        "narrative.schoolInsights" => Some(with_narrative(state, req, school_insights)),
        _ => None,
    }
}
