use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DB_FILE_NAME: &str = "reportcard.sqlite3";
pub const SCHOOL_SETTINGS_KEY: &str = "school.profile";

/// School-wide profile stored in the `settings` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchoolSettings {
    pub school_name: String,
    pub district: String,
    pub pass_mark: f64,
    pub current_term: i64,
    pub academic_year: String,
}

impl Default for SchoolSettings {
    fn default() -> Self {
        Self {
            school_name: String::new(),
            district: String::new(),
            pass_mark: 50.0,
            current_term: 1,
            academic_year: String::new(),
        }
    }
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            level TEXT,
            academic_year TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            student_no TEXT,
            active INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_sort ON students(class_id, sort_order)",
        [],
    )?;
    // Gender was added after the first workspaces were created.
    ensure_students_gender(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS reports(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            term INTEGER NOT NULL,
            academic_year TEXT NOT NULL,
            days_present INTEGER,
            days_absent INTEGER,
            total_days INTEGER,
            teacher_feedback TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, term, academic_year)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_reports_class_term ON reports(class_id, term, academic_year)",
        [],
    )?;
    ensure_reports_principal_remark(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS report_subjects(
            report_id TEXT NOT NULL,
            idx INTEGER NOT NULL,
            subject_name TEXT NOT NULL,
            continuous_assessment REAL,
            examination_mark REAL,
            PRIMARY KEY(report_id, idx),
            FOREIGN KEY(report_id) REFERENCES reports(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    let s = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, s),
    )?;
    Ok(())
}

pub fn load_school_settings(conn: &Connection) -> anyhow::Result<SchoolSettings> {
    match settings_get_json(conn, SCHOOL_SETTINGS_KEY)? {
        Some(v) => Ok(serde_json::from_value(v)?),
        None => Ok(SchoolSettings::default()),
    }
}

/// Current time as RFC 3339, used for `created_at`/`updated_at` columns.
pub fn now_stamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn ensure_students_gender(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "gender")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN gender TEXT", [])?;
    Ok(())
}

fn ensure_reports_principal_remark(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "reports", "principal_remark")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE reports ADD COLUMN principal_remark TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
