use crate::calc::{self, RankInput, SubjectEntry, SubjectStats};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct SummaryError {
    pub code: &'static str,
    pub message: String,
}

impl SummaryError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

fn query_err(e: rusqlite::Error) -> SummaryError {
    SummaryError::new("db_query_failed", e.to_string())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInfo {
    pub id: String,
    pub name: String,
    pub level: Option<String>,
    pub academic_year: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReportRecord {
    pub id: String,
    pub class_id: String,
    pub student_id: String,
    pub display_name: String,
    pub term: i64,
    pub academic_year: String,
    pub days_present: Option<i64>,
    pub days_absent: Option<i64>,
    pub total_days: Option<i64>,
    pub teacher_feedback: Option<String>,
    pub principal_remark: Option<String>,
    pub updated_at: String,
    pub subjects: Vec<SubjectEntry>,
}

impl ReportRecord {
    pub fn overall_average(&self) -> Option<f64> {
        calc::overall_average(&self.subjects)
    }

    pub fn attendance_rate(&self) -> Option<f64> {
        calc::attendance_rate(self.days_present, self.total_days)
    }
}

pub fn load_class(conn: &Connection, class_id: &str) -> Result<Option<ClassInfo>, SummaryError> {
    conn.query_row(
        "SELECT id, name, level, academic_year FROM classes WHERE id = ?",
        [class_id],
        |r| {
            Ok(ClassInfo {
                id: r.get(0)?,
                name: r.get(1)?,
                level: r.get(2)?,
                academic_year: r.get(3)?,
            })
        },
    )
    .optional()
    .map_err(query_err)
}

pub fn list_classes(conn: &Connection) -> Result<Vec<ClassInfo>, SummaryError> {
    let mut stmt = conn
        .prepare("SELECT id, name, level, academic_year FROM classes ORDER BY name, id")
        .map_err(query_err)?;
    stmt.query_map([], |r| {
        Ok(ClassInfo {
            id: r.get(0)?,
            name: r.get(1)?,
            level: r.get(2)?,
            academic_year: r.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(query_err)
}

const REPORT_COLUMNS: &str = "r.id, r.class_id, r.student_id, s.last_name, s.first_name,
     r.term, r.academic_year, r.days_present, r.days_absent, r.total_days,
     r.teacher_feedback, r.principal_remark, r.updated_at";

fn read_report_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ReportRecord> {
    let last: String = r.get(3)?;
    let first: String = r.get(4)?;
    Ok(ReportRecord {
        id: r.get(0)?,
        class_id: r.get(1)?,
        student_id: r.get(2)?,
        display_name: format!("{}, {}", last, first),
        term: r.get(5)?,
        academic_year: r.get(6)?,
        days_present: r.get(7)?,
        days_absent: r.get(8)?,
        total_days: r.get(9)?,
        teacher_feedback: r.get(10)?,
        principal_remark: r.get(11)?,
        updated_at: r.get(12)?,
        subjects: Vec::new(),
    })
}

pub fn load_report(conn: &Connection, report_id: &str) -> Result<Option<ReportRecord>, SummaryError> {
    let sql = format!(
        "SELECT {} FROM reports r JOIN students s ON s.id = r.student_id WHERE r.id = ?",
        REPORT_COLUMNS
    );
    let report = conn
        .query_row(&sql, [report_id], read_report_row)
        .optional()
        .map_err(query_err)?;
    let Some(mut report) = report else {
        return Ok(None);
    };
    report.subjects = load_subjects(conn, &[report.id.clone()])?
        .remove(&report.id)
        .unwrap_or_default();
    Ok(Some(report))
}

/// Reports for a class in student order, optionally narrowed to a term/year.
pub fn load_class_reports(
    conn: &Connection,
    class_id: &str,
    term: Option<i64>,
    academic_year: Option<&str>,
) -> Result<Vec<ReportRecord>, SummaryError> {
    let mut sql = format!(
        "SELECT {} FROM reports r JOIN students s ON s.id = r.student_id WHERE r.class_id = ?",
        REPORT_COLUMNS
    );
    let mut binds: Vec<Value> = vec![Value::Text(class_id.to_string())];
    if let Some(t) = term {
        sql.push_str(" AND r.term = ?");
        binds.push(Value::Integer(t));
    }
    if let Some(y) = academic_year {
        sql.push_str(" AND r.academic_year = ?");
        binds.push(Value::Text(y.to_string()));
    }
    sql.push_str(" ORDER BY r.academic_year, r.term, s.sort_order, r.id");

    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    let mut reports: Vec<ReportRecord> = stmt
        .query_map(params_from_iter(binds), read_report_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;

    let ids: Vec<String> = reports.iter().map(|r| r.id.clone()).collect();
    let mut subjects = load_subjects(conn, &ids)?;
    for r in reports.iter_mut() {
        r.subjects = subjects.remove(&r.id).unwrap_or_default();
    }
    Ok(reports)
}

fn load_subjects(
    conn: &Connection,
    report_ids: &[String],
) -> Result<HashMap<String, Vec<SubjectEntry>>, SummaryError> {
    let mut out: HashMap<String, Vec<SubjectEntry>> = HashMap::new();
    if report_ids.is_empty() {
        return Ok(out);
    }
    let placeholders = std::iter::repeat("?")
        .take(report_ids.len())
        .collect::<Vec<_>>()
        .join(",");
    let sql = format!(
        "SELECT report_id, subject_name, continuous_assessment, examination_mark
         FROM report_subjects
         WHERE report_id IN ({})
         ORDER BY report_id, idx",
        placeholders
    );
    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    let rows = stmt
        .query_map(params_from_iter(report_ids.iter()), |r| {
            Ok((
                r.get::<_, String>(0)?,
                SubjectEntry {
                    subject_name: r.get(1)?,
                    continuous_assessment: r.get(2)?,
                    examination_mark: r.get(3)?,
                },
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    for (report_id, subject) in rows {
        out.entry(report_id).or_default().push(subject);
    }
    Ok(out)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedRow {
    pub report_id: String,
    pub student_id: String,
    pub display_name: String,
    pub overall_average: Option<f64>,
    pub position: Option<usize>,
    pub ordinal: Option<String>,
}

/// Rank reports of one class/term/year by overall average.
pub fn class_ranking(reports: &[ReportRecord]) -> Vec<RankedRow> {
    let inputs: Vec<RankInput<usize>> = reports
        .iter()
        .enumerate()
        .map(|(i, r)| RankInput {
            key: i,
            average: r.overall_average(),
        })
        .collect();
    calc::rank_by_average(&inputs)
        .into_iter()
        .map(|ranked| {
            let r = &reports[ranked.key];
            RankedRow {
                report_id: r.id.clone(),
                student_id: r.student_id.clone(),
                display_name: r.display_name.clone(),
                overall_average: ranked.average,
                position: ranked.position,
                ordinal: ranked.position.map(calc::ordinal),
            }
        })
        .collect()
}

/// Per-subject statistics. Names group case-insensitively after trimming;
/// the first spelling seen is the one reported.
pub fn subject_breakdown<'a, I>(reports: I, pass_mark: f64) -> Vec<SubjectStats>
where
    I: IntoIterator<Item = &'a ReportRecord>,
{
    let mut order: Vec<String> = Vec::new();
    let mut by_key: HashMap<String, (String, Vec<Option<f64>>)> = HashMap::new();
    for report in reports {
        for s in report.subjects.iter().filter(|s| s.is_named()) {
            let display = s.subject_name.trim().to_string();
            let key = display.to_lowercase();
            let entry = by_key.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                (display, Vec::new())
            });
            entry.1.push(calc::subject_final_mark(s));
        }
    }
    order
        .iter()
        .filter_map(|k| by_key.remove(k))
        .map(|(name, finals)| calc::subject_stats(&name, finals, pass_mark))
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStats {
    pub class: ClassInfo,
    pub term: i64,
    pub academic_year: String,
    pub report_count: usize,
    pub graded_count: usize,
    pub class_average: Option<f64>,
    pub pass_count: usize,
    pub pass_rate: Option<f64>,
    pub attendance_rate: Option<f64>,
    pub subjects: Vec<SubjectStats>,
    pub top_students: Vec<RankedRow>,
}

pub fn class_stats(
    class: &ClassInfo,
    term: i64,
    academic_year: &str,
    reports: &[ReportRecord],
    pass_mark: f64,
) -> ClassStats {
    let averages: Vec<Option<f64>> = reports.iter().map(|r| r.overall_average()).collect();
    let graded: Vec<f64> = averages.iter().flatten().copied().collect();
    let pass_count = graded.iter().filter(|a| **a >= pass_mark).count();
    let pass_rate = if graded.is_empty() {
        None
    } else {
        Some(calc::round_1dp(100.0 * pass_count as f64 / graded.len() as f64))
    };
    let top_students: Vec<RankedRow> = class_ranking(reports)
        .into_iter()
        .filter(|r| r.position.is_some())
        .take(3)
        .collect();

    ClassStats {
        class: class.clone(),
        term,
        academic_year: academic_year.to_string(),
        report_count: reports.len(),
        graded_count: graded.len(),
        class_average: calc::mean_of_present(averages, calc::round_2dp),
        pass_count,
        pass_rate,
        attendance_rate: calc::mean_of_present(
            reports.iter().map(|r| r.attendance_rate()),
            calc::round_1dp,
        ),
        subjects: subject_breakdown(reports, pass_mark),
        top_students,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolStats {
    pub term: i64,
    pub academic_year: String,
    pub report_count: usize,
    pub graded_count: usize,
    pub school_average: Option<f64>,
    pub pass_count: usize,
    pub pass_rate: Option<f64>,
    pub classes: Vec<ClassStats>,
    pub subjects: Vec<SubjectStats>,
}

pub fn school_stats(
    conn: &Connection,
    term: i64,
    academic_year: &str,
    pass_mark: f64,
) -> Result<SchoolStats, SummaryError> {
    let mut all_reports: Vec<ReportRecord> = Vec::new();
    let mut classes: Vec<ClassStats> = Vec::new();
    for class in list_classes(conn)? {
        let reports = load_class_reports(conn, &class.id, Some(term), Some(academic_year))?;
        classes.push(class_stats(&class, term, academic_year, &reports, pass_mark));
        all_reports.extend(reports);
    }

    let averages: Vec<Option<f64>> = all_reports.iter().map(|r| r.overall_average()).collect();
    let graded_count = averages.iter().flatten().count();
    let pass_count = averages.iter().flatten().filter(|a| **a >= pass_mark).count();
    Ok(SchoolStats {
        term,
        academic_year: academic_year.to_string(),
        report_count: all_reports.len(),
        graded_count,
        school_average: calc::mean_of_present(averages, calc::round_2dp),
        pass_count,
        pass_rate: if graded_count == 0 {
            None
        } else {
            Some(calc::round_1dp(100.0 * pass_count as f64 / graded_count as f64))
        },
        classes,
        subjects: subject_breakdown(&all_reports, pass_mark),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(id: &str, name: &str, subjects: Vec<SubjectEntry>) -> ReportRecord {
        ReportRecord {
            id: id.to_string(),
            class_id: "c1".to_string(),
            student_id: format!("s-{}", id),
            display_name: name.to_string(),
            term: 1,
            academic_year: "2025/2026".to_string(),
            days_present: None,
            days_absent: None,
            total_days: None,
            teacher_feedback: None,
            principal_remark: None,
            updated_at: String::new(),
            subjects,
        }
    }

    #[test]
    fn breakdown_groups_subject_names_case_insensitively() {
        let reports = vec![
            report("r1", "A", vec![SubjectEntry::new("Math ", Some(60.0), Some(100.0))]),
            report(
                "r2",
                "B",
                vec![
                    SubjectEntry::new("math", Some(30.0), Some(50.0)),
                    SubjectEntry::new("", Some(60.0), Some(100.0)),
                    SubjectEntry::new("Art", None, None),
                ],
            ),
        ];
        let stats = subject_breakdown(&reports, 50.0);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].subject_name, "Math");
        assert_eq!(stats[0].graded_count, 2);
        assert_eq!(stats[0].average, Some(75.0));
        assert_eq!(stats[1].subject_name, "Art");
        assert_eq!(stats[1].graded_count, 0);
    }

    #[test]
    fn class_stats_ignore_ungradable_reports_in_averages() {
        let class = ClassInfo {
            id: "c1".to_string(),
            name: "JSS 1A".to_string(),
            level: None,
            academic_year: None,
        };
        let reports = vec![
            report("r1", "A", vec![SubjectEntry::new("Math", Some(60.0), Some(100.0))]),
            report("r2", "B", vec![SubjectEntry::new("Math", Some(0.0), Some(40.0))]),
            report("r3", "C", vec![SubjectEntry::new("Math", None, None)]),
        ];
        let st = class_stats(&class, 1, "2025/2026", &reports, 50.0);
        assert_eq!(st.report_count, 3);
        assert_eq!(st.graded_count, 2);
        assert_eq!(st.class_average, Some(60.0));
        assert_eq!(st.pass_count, 1);
        assert_eq!(st.pass_rate, Some(50.0));
        assert_eq!(st.top_students.len(), 2);
        assert_eq!(st.top_students[0].ordinal.as_deref(), Some("1st"));
        assert_eq!(st.attendance_rate, None);
    }
}
