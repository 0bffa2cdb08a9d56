use crate::calc::{self, SubjectEntry};
use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_optional_i64, get_optional_str, get_required_str, get_term, student_in_class, with_db,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::summary::{self, ReportRecord};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

pub fn subject_json(s: &SubjectEntry) -> Value {
    json!({
        "subjectName": s.subject_name,
        "continuousAssessment": s.continuous_assessment,
        "examinationMark": s.examination_mark,
        "finalMark": calc::subject_final_mark(s),
    })
}

fn parse_subjects(params: &Value) -> Result<Vec<SubjectEntry>, HandlerErr> {
    let Some(items) = params.get("subjects").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing subjects"));
    };
    items
        .iter()
        .enumerate()
        .map(|(i, v)| {
            if v.is_object() {
                Ok(SubjectEntry::from_json(v))
            } else {
                Err(HandlerErr {
                    code: "bad_params",
                    message: "each subject must be an object".to_string(),
                    details: Some(json!({ "index": i })),
                })
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
struct Attendance {
    days_present: Option<i64>,
    days_absent: Option<i64>,
    total_days: Option<i64>,
}

fn parse_attendance(v: &Value) -> Result<Attendance, HandlerErr> {
    if !v.is_object() {
        return Err(HandlerErr::bad_params("attendance must be an object"));
    }
    let field = |key: &str| -> Result<Option<i64>, HandlerErr> {
        match get_optional_i64(v, key)? {
            Some(n) if n < 0 => Err(HandlerErr::bad_params(format!(
                "attendance.{} must not be negative",
                key
            ))),
            other => Ok(other),
        }
    };
    let a = Attendance {
        days_present: field("daysPresent")?,
        days_absent: field("daysAbsent")?,
        total_days: field("totalDays")?,
    };
    if let (Some(p), Some(t)) = (a.days_present, a.total_days) {
        if p > t {
            return Err(HandlerErr::bad_params(
                "attendance.daysPresent exceeds attendance.totalDays",
            ));
        }
    }
    Ok(a)
}

fn handle_reports_preview(req: &Request) -> Value {
    match parse_subjects(&req.params) {
        Ok(subjects) => ok(
            &req.id,
            json!({
                "subjects": subjects.iter().map(subject_json).collect::<Vec<_>>(),
                "overallAverage": calc::overall_average(&subjects),
            }),
        ),
        Err(e) => e.response(&req.id),
    }
}

fn reports_upsert(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;
    let term = get_term(params)?;
    let academic_year = get_required_str(params, "academicYear")?;
    let subjects = parse_subjects(params)?;
    let attendance = match params.get("attendance") {
        None | Some(Value::Null) => None,
        Some(v) => Some(parse_attendance(v)?),
    };
    let feedback = match params.get("teacherFeedback") {
        None => None,
        Some(_) => Some(get_optional_str(params, "teacherFeedback")?),
    };
    let remark = match params.get("principalRemark") {
        None => None,
        Some(_) => Some(get_optional_str(params, "principalRemark")?),
    };
    if !student_in_class(conn, &class_id, &student_id)? {
        return Err(HandlerErr::not_found("student not found in class"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM reports WHERE student_id = ? AND term = ? AND academic_year = ?",
            (&student_id, term, &academic_year),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let now = db::now_stamp();

    let (report_id, created) = match existing {
        Some(report_id) => {
            tx.execute(
                "UPDATE reports SET class_id = ?, updated_at = ? WHERE id = ?",
                (&class_id, &now, &report_id),
            )
            .map_err(|e| HandlerErr::write("db_update_failed", "reports", e))?;
            if let Some(a) = attendance {
                tx.execute(
                    "UPDATE reports SET days_present = ?, days_absent = ?, total_days = ? WHERE id = ?",
                    (a.days_present, a.days_absent, a.total_days, &report_id),
                )
                .map_err(|e| HandlerErr::write("db_update_failed", "reports", e))?;
            }
            if let Some(f) = &feedback {
                tx.execute(
                    "UPDATE reports SET teacher_feedback = ? WHERE id = ?",
                    (f, &report_id),
                )
                .map_err(|e| HandlerErr::write("db_update_failed", "reports", e))?;
            }
            if let Some(r) = &remark {
                tx.execute(
                    "UPDATE reports SET principal_remark = ? WHERE id = ?",
                    (r, &report_id),
                )
                .map_err(|e| HandlerErr::write("db_update_failed", "reports", e))?;
            }
            (report_id, false)
        }
        None => {
            let report_id = Uuid::new_v4().to_string();
            let a = attendance.unwrap_or_default();
            tx.execute(
                "INSERT INTO reports(id, class_id, student_id, term, academic_year, days_present, days_absent,
                                     total_days, teacher_feedback, principal_remark, created_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    &report_id,
                    &class_id,
                    &student_id,
                    term,
                    &academic_year,
                    a.days_present,
                    a.days_absent,
                    a.total_days,
                    feedback.clone().flatten(),
                    remark.clone().flatten(),
                    &now,
                    &now,
                ),
            )
            .map_err(|e| HandlerErr::write("db_insert_failed", "reports", e))?;
            (report_id, true)
        }
    };

    tx.execute("DELETE FROM report_subjects WHERE report_id = ?", [&report_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", "report_subjects", e))?;
    for (idx, s) in subjects.iter().enumerate() {
        tx.execute(
            "INSERT INTO report_subjects(report_id, idx, subject_name, continuous_assessment, examination_mark)
             VALUES(?, ?, ?, ?, ?)",
            (
                &report_id,
                idx as i64,
                &s.subject_name,
                s.continuous_assessment,
                s.examination_mark,
            ),
        )
        .map_err(|e| HandlerErr::write("db_insert_failed", "report_subjects", e))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::debug!(report_id = %report_id, created, "report saved");
    Ok(json!({
        "reportId": report_id,
        "created": created,
        "subjects": subjects.iter().map(subject_json).collect::<Vec<_>>(),
        "overallAverage": calc::overall_average(&subjects),
    }))
}

/// Position of a report within its class for the same term and year,
/// plus the number of reports ranked against it.
pub fn report_position(
    conn: &Connection,
    report: &ReportRecord,
) -> Result<(Option<usize>, usize), HandlerErr> {
    let peers = summary::load_class_reports(
        conn,
        &report.class_id,
        Some(report.term),
        Some(&report.academic_year),
    )?;
    let ranking = summary::class_ranking(&peers);
    let position = ranking
        .iter()
        .find(|r| r.report_id == report.id)
        .and_then(|r| r.position);
    Ok((position, ranking.len()))
}

fn reports_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let report_id = get_required_str(params, "reportId")?;
    let Some(report) = summary::load_report(conn, &report_id)? else {
        return Err(HandlerErr::not_found("report not found"));
    };
    let class = summary::load_class(conn, &report.class_id)?;
    let (position, class_size) = report_position(conn, &report)?;
    let settings = db::load_school_settings(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    Ok(json!({
        "reportId": report.id,
        "school": {
            "name": settings.school_name,
            "district": settings.district,
        },
        "class": class,
        "student": {
            "id": report.student_id,
            "displayName": report.display_name,
        },
        "term": report.term,
        "academicYear": report.academic_year,
        "subjects": report.subjects.iter().map(subject_json).collect::<Vec<_>>(),
        "overallAverage": report.overall_average(),
        "attendance": {
            "daysPresent": report.days_present,
            "daysAbsent": report.days_absent,
            "totalDays": report.total_days,
            "rate": report.attendance_rate(),
        },
        "position": position,
        "ordinal": position.map(calc::ordinal),
        "classSize": class_size,
        "teacherFeedback": report.teacher_feedback,
        "principalRemark": report.principal_remark,
        "updatedAt": report.updated_at,
    }))
}

fn reports_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let term = get_optional_i64(params, "term")?;
    let academic_year = get_optional_str(params, "academicYear")?;
    if summary::load_class(conn, &class_id)?.is_none() {
        return Err(HandlerErr::not_found("class not found"));
    }
    let reports =
        summary::load_class_reports(conn, &class_id, term, academic_year.as_deref())?;
    let rows: Vec<Value> = reports
        .iter()
        .map(|r| {
            json!({
                "reportId": r.id,
                "studentId": r.student_id,
                "displayName": r.display_name,
                "term": r.term,
                "academicYear": r.academic_year,
                "subjectCount": r.subjects.iter().filter(|s| s.is_named()).count(),
                "overallAverage": r.overall_average(),
                "updatedAt": r.updated_at,
            })
        })
        .collect();
    Ok(json!({ "reports": rows }))
}

fn reports_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let report_id = get_required_str(params, "reportId")?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute("DELETE FROM report_subjects WHERE report_id = ?", [&report_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", "report_subjects", e))?;
    let n = tx
        .execute("DELETE FROM reports WHERE id = ?", [&report_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", "reports", e))?;
    if n == 0 {
        return Err(HandlerErr::not_found("report not found"));
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.preview" => Some(handle_reports_preview(req)),
        "reports.upsert" => Some(with_db(state, req, reports_upsert)),
        "reports.get" => Some(with_db(state, req, reports_get)),
        "reports.list" => Some(with_db(state, req, reports_list)),
        "reports.delete" => Some(with_db(state, req, reports_delete)),
        _ => None,
    }
}
