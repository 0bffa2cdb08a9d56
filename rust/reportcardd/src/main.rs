mod backup;
mod calc;
mod db;
mod ipc;
mod narrative;
mod summary;

use std::io::{self, BufRead, Write};

use narrative::{NarrativeConfig, NarrativeService, NarrativeStatus};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "REPORTCARDD_LOG";

fn init_tracing() {
    // stdout carries the protocol, so logs go to stderr.
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new("reportcardd=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
}

fn main() {
    init_tracing();

    let narrative = NarrativeService::from_config(NarrativeConfig::from_env());
    match narrative.status() {
        NarrativeStatus::Available { provider } => {
            tracing::info!(%provider, "narrative service ready")
        }
        NarrativeStatus::Unavailable { reason } => {
            tracing::info!(%reason, "narrative service unavailable")
        }
    }
    let mut state = ipc::AppState::new(narrative);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                tracing::warn!(error = %e, "unparseable request line");
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    tracing::info!("stdin closed, shutting down");
}
