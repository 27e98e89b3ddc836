use crate::ai;
use crate::db;
use crate::grades;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::report;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::path::PathBuf;

use super::gradesheet::{load_roster, HandlerErr};

fn subject_info(conn: &Connection, subject_id: &str) -> Result<(String, String), HandlerErr> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT subject_code, subject_name FROM subjects WHERE id = ?",
            [subject_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
        })?;
    row.ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "subject not found".to_string(),
    })
}

/// Ask the narrative collaborator if one is configured. Any failure — no
/// client, network, API status, unusable reply — returns None and the caller
/// assembles the deterministic fallback instead.
fn request_narrative(
    state: &AppState,
    subject_name: &str,
    roster: &[grades::RosterRow],
    custom_prompt: Option<&str>,
) -> Option<String> {
    let client = state.narrative.as_ref()?;
    let prompt = match custom_prompt {
        Some(p) => p.to_string(),
        None => ai::build_analysis_prompt(subject_name, roster),
    };
    match client.generate_narrative(&prompt) {
        Ok(narrative) => Some(narrative),
        Err(e) => {
            tracing::warn!(error = %e, "narrative request failed, using fallback summary");
            None
        }
    }
}

fn handle_analysis_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (subject_code, subject_name) = match subject_info(conn, &subject_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let roster = match load_roster(conn, &subject_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let custom_prompt = optional_str(req, "prompt");
    let narrative = request_narrative(state, &subject_name, &roster, custom_prompt.as_deref());
    let analysis = grades::assemble(&roster, narrative.as_deref());

    ok(
        &req.id,
        json!({
            "subject": {
                "id": subject_id,
                "subjectCode": subject_code,
                "subjectName": subject_name
            },
            "generatedAt": db::now_utc(),
            "analysis": analysis
        }),
    )
}

fn report_file_name(subject_code: &str) -> String {
    let slug: String = subject_code
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    format!("{}-grade-report.md", slug.trim_matches('-'))
}

fn handle_report_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (subject_code, subject_name) = match subject_info(conn, &subject_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let roster = match load_roster(conn, &subject_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    // The export consumes a narrative the caller already has (typically from
    // analysis.generate); without one the fallback summary stands in.
    let narrative = optional_str(req, "narrative");
    let analysis = grades::assemble(&roster, narrative.as_deref());

    let out_path = match optional_str(req, "outPath").map(PathBuf::from) {
        Some(p) => p,
        None => {
            let Some(workspace) = state.workspace.as_ref() else {
                return err(&req.id, "no_workspace", "select a workspace first", None);
            };
            workspace.join("reports").join(report_file_name(&subject_code))
        }
    };

    let generated_at = db::now_utc();
    let rendered = report::build_report(&subject_name, &generated_at, &roster, &analysis);

    if let Some(parent) = out_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": parent.to_string_lossy() })),
            );
        }
    }
    if let Err(e) = std::fs::write(&out_path, &rendered) {
        return err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": out_path.to_string_lossy() })),
        );
    }

    tracing::info!(path = %out_path.to_string_lossy(), "grade report exported");

    ok(
        &req.id,
        json!({
            "ok": true,
            "path": out_path.to_string_lossy(),
            "generatedAt": generated_at,
            "summary": analysis.summary
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analysis.generate" => Some(handle_analysis_generate(state, req)),
        "report.export" => Some(handle_report_export(state, req)),
        _ => None,
    }
}
