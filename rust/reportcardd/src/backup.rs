use crate::db::DB_FILE_NAME;
use anyhow::{anyhow, Context};
use rusqlite::{Connection, OpenFlags};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/reportcard.sqlite3";
pub const BUNDLE_FORMAT_V1: &str = "reportcard-workspace-v1";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE_NAME);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let db_bytes = std::fs::read(&db_path)
        .with_context(|| format!("failed to read database {}", db_path.to_string_lossy()))?;
    let db_sha256 = sha256_hex(&db_bytes);

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": chrono::Utc::now().to_rfc3339(),
        "dbSha256": db_sha256,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    zip.write_all(&db_bytes)
        .context("failed to write database entry")?;

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: 2,
        db_sha256,
    })
}

pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    if !is_zip_file(in_path)? {
        return Err(anyhow!(
            "not a workspace bundle: {}",
            in_path.to_string_lossy()
        ));
    }

    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }
    let expected_sha = manifest
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("manifest.json has no dbSha256 checksum"))?;

    let mut db_bytes: Vec<u8> = Vec::new();
    archive
        .by_name(DB_ENTRY)
        .context("bundle missing db/reportcard.sqlite3")?
        .read_to_end(&mut db_bytes)
        .context("failed to extract database entry")?;
    let actual_sha = sha256_hex(&db_bytes);
    if actual_sha != expected_sha {
        return Err(anyhow!(
            "database checksum mismatch: manifest {} vs bundle {}",
            expected_sha,
            actual_sha
        ));
    }

    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;
    let tmp_dst = workspace_path.join(format!("{}.importing", DB_FILE_NAME));
    if tmp_dst.exists() {
        let _ = std::fs::remove_file(&tmp_dst);
    }
    let mut db_out = File::create(&tmp_dst).with_context(|| {
        format!(
            "failed to create temp database {}",
            tmp_dst.to_string_lossy()
        )
    })?;
    db_out
        .write_all(&db_bytes)
        .context("failed to write extracted database")?;
    db_out
        .flush()
        .context("failed to flush extracted database")?;
    drop(db_out);

    if let Err(e) = check_workspace_db(&tmp_dst) {
        let _ = std::fs::remove_file(&tmp_dst);
        return Err(e);
    }

    // The live database is set aside, not deleted, until the caller has
    // reopened the workspace.
    let dst = workspace_path.join(DB_FILE_NAME);
    let previous = previous_db_path(workspace_path);
    if previous.exists() {
        let _ = std::fs::remove_file(&previous);
    }
    if dst.exists() {
        std::fs::rename(&dst, &previous).with_context(|| {
            format!(
                "failed to set aside existing database {}",
                dst.to_string_lossy()
            )
        })?;
    }
    if let Err(e) = std::fs::rename(&tmp_dst, &dst) {
        if previous.exists() {
            let _ = std::fs::rename(&previous, &dst);
        }
        let _ = std::fs::remove_file(&tmp_dst);
        return Err(anyhow!(e).context(format!(
            "failed to move extracted database to {}",
            dst.to_string_lossy()
        )));
    }

    Ok(ImportSummary {
        bundle_format_detected: BUNDLE_FORMAT_V1.to_string(),
    })
}

fn previous_db_path(workspace_path: &Path) -> PathBuf {
    workspace_path.join(format!("{}.previous", DB_FILE_NAME))
}

/// Put back the database that the last import set aside.
pub fn restore_previous_db(workspace_path: &Path) -> anyhow::Result<()> {
    let previous = previous_db_path(workspace_path);
    if !previous.exists() {
        return Ok(());
    }
    let dst = workspace_path.join(DB_FILE_NAME);
    std::fs::rename(&previous, &dst).with_context(|| {
        format!(
            "failed to restore previous database {}",
            previous.to_string_lossy()
        )
    })
}

pub fn discard_previous_db(workspace_path: &Path) {
    let previous = previous_db_path(workspace_path);
    if previous.exists() {
        let _ = std::fs::remove_file(previous);
    }
}

/// The extracted file must be a readable SQLite database holding a
/// report-card schema.
fn check_workspace_db(path: &Path) -> anyhow::Result<()> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .context("bundle database cannot be opened")?;
    let status: String = conn
        .query_row("PRAGMA quick_check", [], |r| r.get(0))
        .context("bundle database is not a valid sqlite file")?;
    if status != "ok" {
        return Err(anyhow!("bundle database failed integrity check: {}", status));
    }
    let tables: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('classes', 'students', 'reports')",
            [],
            |r| r.get(0),
        )
        .context("bundle database schema cannot be read")?;
    if tables < 3 {
        return Err(anyhow!("bundle database is not a report-card workspace"));
    }
    Ok(())
}

fn is_zip_file(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 4];
    let read = f.read(&mut sig).context("failed to read file signature")?;
    if read < 4 {
        return Ok(false);
    }
    Ok(sig == [0x50, 0x4B, 0x03, 0x04])
}
