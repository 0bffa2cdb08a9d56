use crate::backup;
use crate::calc;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{csv_quote, get_required_str, get_term, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::summary;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;

fn fmt_cell(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

fn handle_backup_export_workspace_bundle(state: &mut AppState, req: &Request) -> Value {
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing outPath", None),
    };
    let Some(workspace_path) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    if let Some(conn) = state.db.as_ref() {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }

    let out = PathBuf::from(&out_path);
    let export = match backup::export_workspace_bundle(&workspace_path, &out) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": out_path })),
            )
        }
    };
    tracing::info!(path = %out_path, "workspace bundle exported");

    ok(
        &req.id,
        json!({
            "ok": true,
            "path": out_path,
            "bundleFormat": export.bundle_format,
            "entryCount": export.entry_count,
            "dbSha256": export.db_sha256,
        }),
    )
}

fn handle_backup_import_workspace_bundle(state: &mut AppState, req: &Request) -> Value {
    let in_path = match req.params.get("inPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing inPath", None),
    };
    let workspace_path = req
        .params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone());
    let Some(workspace_path) = workspace_path else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path })),
        );
    }

    // Drop open handle before replacing file.
    state.db = None;

    let import = match backup::import_workspace_bundle(&src, &workspace_path) {
        Ok(v) => v,
        Err(e) => {
            // Leave the previous workspace usable after a rejected bundle.
            if let Some(ws) = state.workspace.clone() {
                state.db = db::open_db(&ws).ok();
            }
            return err(
                &req.id,
                "io_failed",
                format!("{:#}", e),
                Some(json!({ "path": src.to_string_lossy() })),
            );
        }
    };

    match db::open_db(&workspace_path) {
        Ok(conn) => {
            backup::discard_previous_db(&workspace_path);
            tracing::info!(workspace = %workspace_path.display(), "workspace bundle imported");
            state.workspace = Some(workspace_path.clone());
            state.db = Some(conn);
            ok(
                &req.id,
                json!({
                    "ok": true,
                    "workspacePath": workspace_path.to_string_lossy(),
                    "bundleFormatDetected": import.bundle_format_detected
                }),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "imported database failed to open, restoring previous");
            let restored = backup::restore_previous_db(&workspace_path);
            if let Some(ws) = state.workspace.clone() {
                state.db = db::open_db(&ws).ok();
            }
            err(
                &req.id,
                "db_open_failed",
                e.to_string(),
                Some(json!({ "previousRestored": restored.is_ok() })),
            )
        }
    }
}

fn exchange_export_reports_csv(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let term = get_term(params)?;
    let academic_year = get_required_str(params, "academicYear")?;
    let out_path = get_required_str(params, "outPath")?;
    if summary::load_class(conn, &class_id)?.is_none() {
        return Err(HandlerErr::not_found("class not found"));
    }

    let reports = summary::load_class_reports(conn, &class_id, Some(term), Some(&academic_year))?;
    let positions: HashMap<String, Option<usize>> = summary::class_ranking(&reports)
        .into_iter()
        .map(|r| (r.report_id, r.position))
        .collect();

    let mut csv = String::from(
        "student_id,student_name,term,academic_year,subject,continuous_assessment,examination_mark,final_mark,overall_average,position\n",
    );
    let mut row_count = 0usize;
    for r in &reports {
        let average = fmt_cell(r.overall_average());
        let position = positions
            .get(&r.id)
            .copied()
            .flatten()
            .map(|p| p.to_string())
            .unwrap_or_default();
        for s in r.subjects.iter().filter(|s| s.is_named()) {
            csv.push_str(&format!(
                "{},{},{},{},{},{},{},{},{},{}\n",
                csv_quote(&r.student_id),
                csv_quote(&r.display_name),
                r.term,
                csv_quote(&r.academic_year),
                csv_quote(s.subject_name.trim()),
                fmt_cell(s.continuous_assessment),
                fmt_cell(s.examination_mark),
                fmt_cell(calc::subject_final_mark(s)),
                average,
                position,
            ));
            row_count += 1;
        }
    }

    let out = PathBuf::from(&out_path);
    if let Some(parent) = out.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| HandlerErr {
                code: "io_failed",
                message: e.to_string(),
                details: Some(json!({ "path": out_path })),
            })?;
        }
    }
    std::fs::write(&out, csv).map_err(|e| HandlerErr {
        code: "io_failed",
        message: e.to_string(),
        details: Some(json!({ "path": out_path })),
    })?;

    Ok(json!({
        "ok": true,
        "path": out_path,
        "reportCount": reports.len(),
        "rowsExported": row_count,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_backup_export_workspace_bundle(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_backup_import_workspace_bundle(state, req)),
        "exchange.exportReportsCsv" => Some(with_db(state, req, exchange_export_reports_csv)),
        _ => None,
    }
}
