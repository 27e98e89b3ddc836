use crate::db;
use crate::grades::{self, GradeRecord, PeriodScore, RosterRow, Verdict};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::required_str;
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

const GRADES_SAVE_MAX_ENTRIES: usize = 2000;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, None)
    }
}

fn subject_name(conn: &Connection, subject_id: &str) -> Result<String, HandlerErr> {
    let name: Option<String> = conn
        .query_row(
            "SELECT subject_name FROM subjects WHERE id = ?",
            [subject_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
        })?;
    name.ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "subject not found".to_string(),
    })
}

/// Full roster left-joined with the subject's grade rows: every student
/// appears, graded or not, so first-time entry flows through the same save
/// path as edits.
pub fn load_roster(conn: &Connection, subject_id: &str) -> Result<Vec<RosterRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.last_name, s.first_name,
                    g.id, g.prelim, g.midterm, g.semifinal, g.final
             FROM students s
             LEFT JOIN grades g ON g.student_id = s.id AND g.subject_id = ?
             ORDER BY s.last_name, s.first_name",
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
        })?;

    stmt.query_map([subject_id], |r| {
        let student_id: String = r.get(0)?;
        let last_name: String = r.get(1)?;
        let first_name: String = r.get(2)?;
        let row_id: Option<String> = r.get(3)?;
        Ok(RosterRow {
            display_name: format!("{}, {}", last_name, first_name),
            record: GradeRecord {
                id: row_id,
                student_id: student_id.clone(),
                subject_id: subject_id.to_string(),
                prelim: r.get(4)?,
                midterm: r.get(5)?,
                semifinal: r.get(6)?,
                finals: r.get(7)?,
            },
            student_id,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
    })
}

fn existing_records(conn: &Connection, subject_id: &str) -> Result<Vec<GradeRecord>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, student_id, prelim, midterm, semifinal, final
             FROM grades
             WHERE subject_id = ?",
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
        })?;

    stmt.query_map([subject_id], |r| {
        Ok(GradeRecord {
            id: Some(r.get::<_, String>(0)?),
            student_id: r.get(1)?,
            subject_id: subject_id.to_string(),
            prelim: r.get(2)?,
            midterm: r.get(3)?,
            semifinal: r.get(4)?,
            finals: r.get(5)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
    })
}

fn handle_grades_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = subject_name(conn, &subject_id) {
        return e.response(&req.id);
    }

    let roster = match load_roster(conn, &subject_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let rows: Vec<serde_json::Value> = roster
        .iter()
        .map(|row| {
            let composite = row.record.composite().map(grades::round_off_2_decimals);
            let verdict = match row.record.verdict() {
                Verdict::Unknown => None,
                v => Some(v.as_str()),
            };
            json!({
                "studentId": row.student_id,
                "displayName": row.display_name,
                "prelim": row.record.prelim,
                "midterm": row.record.midterm,
                "semifinal": row.record.semifinal,
                "final": row.record.finals,
                "composite": composite,
                "verdict": verdict
            })
        })
        .collect();

    ok(&req.id, json!({ "subjectId": subject_id, "rows": rows }))
}

/// Grade cells arrive as whatever the sheet held: numbers, numeric strings,
/// blanks. Anything non-numeric is an ungraded period, never an error.
fn coerce_score(value: Option<&serde_json::Value>) -> Option<f64> {
    match value {
        Some(v) => v
            .as_f64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse::<f64>().ok())),
        None => None,
    }
}

fn stored_score(raw: Option<f64>) -> Option<f64> {
    match grades::normalize(raw) {
        PeriodScore::Scored(v) => Some(v),
        PeriodScore::Empty => None,
    }
}

fn handle_grades_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = subject_name(conn, &subject_id) {
        return e.response(&req.id);
    }
    let Some(entries) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing entries[]", None);
    };

    if entries.len() > GRADES_SAVE_MAX_ENTRIES {
        let rejected = entries.len();
        return ok(
            &req.id,
            json!({
                "ok": true,
                "updated": 0,
                "inserted": 0,
                "rejected": rejected,
                "limitExceeded": true,
                "errors": [{
                    "studentId": serde_json::Value::Null,
                    "code": "too_many_entries",
                    "message": format!(
                        "save payload exceeds max entries: {} > {}",
                        rejected, GRADES_SAVE_MAX_ENTRIES
                    )
                }]
            }),
        );
    }

    let known_students: HashSet<String> = {
        let mut stmt = match conn.prepare("SELECT id FROM students") {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match stmt
            .query_map([], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<HashSet<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    let mut desired: Vec<GradeRecord> = Vec::new();
    let mut errors: Vec<serde_json::Value> = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        let Some(obj) = entry.as_object() else {
            errors.push(json!({
                "studentId": serde_json::Value::Null,
                "code": "bad_params",
                "message": format!("entry at index {} must be an object", i),
            }));
            continue;
        };
        let Some(student_id) = obj.get("studentId").and_then(|v| v.as_str()) else {
            errors.push(json!({
                "studentId": serde_json::Value::Null,
                "code": "bad_params",
                "message": format!("entry at index {} missing studentId", i),
            }));
            continue;
        };
        if !known_students.contains(student_id) {
            errors.push(json!({
                "studentId": student_id,
                "code": "not_found",
                "message": "student not found",
            }));
            continue;
        }

        desired.push(GradeRecord {
            id: None,
            student_id: student_id.to_string(),
            subject_id: subject_id.clone(),
            prelim: stored_score(coerce_score(obj.get("prelim"))),
            midterm: stored_score(coerce_score(obj.get("midterm"))),
            semifinal: stored_score(coerce_score(obj.get("semifinal"))),
            finals: stored_score(coerce_score(obj.get("final"))),
        });
    }

    let existing = match existing_records(conn, &subject_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let plan = grades::reconcile(desired, &existing);

    // Each operation stands alone: a failing row is reported and the rest of
    // the batch still applies.
    let mut updated: usize = 0;
    let mut inserted: usize = 0;
    let now = db::now_utc();

    for rec in &plan.to_update {
        let Some(row_id) = rec.id.as_deref() else {
            errors.push(json!({
                "studentId": rec.student_id,
                "code": "internal",
                "message": "update operation without a row id",
            }));
            continue;
        };
        match conn.execute(
            "UPDATE grades
             SET prelim = ?, midterm = ?, semifinal = ?, final = ?, updated_at = ?
             WHERE id = ?",
            (
                rec.prelim,
                rec.midterm,
                rec.semifinal,
                rec.finals,
                &now,
                row_id,
            ),
        ) {
            Ok(_) => updated += 1,
            Err(e) => errors.push(json!({
                "studentId": rec.student_id,
                "code": "db_update_failed",
                "message": e.to_string(),
            })),
        }
    }

    for rec in &plan.to_insert {
        let row_id = Uuid::new_v4().to_string();
        match conn.execute(
            "INSERT INTO grades(id, student_id, subject_id, prelim, midterm, semifinal, final, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &row_id,
                &rec.student_id,
                &rec.subject_id,
                rec.prelim,
                rec.midterm,
                rec.semifinal,
                rec.finals,
                &now,
            ),
        ) {
            Ok(_) => inserted += 1,
            Err(e) => errors.push(json!({
                "studentId": rec.student_id,
                "code": "db_insert_failed",
                "message": e.to_string(),
            })),
        }
    }

    tracing::debug!(
        subject_id = %subject_id,
        updated,
        inserted,
        rejected = errors.len(),
        "grade sheet saved"
    );

    let rejected = errors.len();
    let mut result = json!({ "ok": true, "updated": updated, "inserted": inserted });
    if rejected > 0 {
        let obj = result.as_object_mut().expect("result should be object");
        obj.insert("rejected".into(), json!(rejected));
        obj.insert("errors".into(), json!(errors));
    }

    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.get" => Some(handle_grades_get(state, req)),
        "grades.save" => Some(handle_grades_save(state, req)),
        _ => None,
    }
}
