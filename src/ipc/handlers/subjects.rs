use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "subjects": [] }));
    };

    // Include an enrollment count so the UI can show a useful dashboard.
    let mut stmt = match conn.prepare(
        "SELECT
           sub.id,
           sub.subject_code,
           sub.subject_name,
           sub.instructor,
           sub.created_at,
           (SELECT COUNT(*) FROM grades g WHERE g.subject_id = sub.id) AS enrolled_count
         FROM subjects sub
         ORDER BY sub.subject_code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let subject_code: String = row.get(1)?;
            let subject_name: String = row.get(2)?;
            let instructor: Option<String> = row.get(3)?;
            let created_at: String = row.get(4)?;
            let enrolled_count: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "subjectCode": subject_code,
                "subjectName": subject_name,
                "instructor": instructor,
                "createdAt": created_at,
                "enrolledCount": enrolled_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let subject_code = match required_str(req, "subjectCode") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_name = match required_str(req, "subjectName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let instructor = optional_str(req, "instructor");

    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, subject_code, subject_name, instructor, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            &subject_id,
            &subject_code,
            &subject_name,
            instructor.as_deref(),
            db::now_utc(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }

    ok(&req.id, json!({ "subjectId": subject_id }))
}

fn handle_subjects_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let mut set_parts: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    for (key, column, required) in [
        ("subjectCode", "subject_code", true),
        ("subjectName", "subject_name", true),
        ("instructor", "instructor", false),
    ] {
        let Some(v) = patch.get(key) else {
            continue;
        };
        if v.is_null() && !required {
            set_parts.push(format!("{} = NULL", column));
            continue;
        }
        let Some(s) = v.as_str() else {
            return err(
                &req.id,
                "bad_params",
                format!("patch.{} must be a string", key),
                None,
            );
        };
        let s = s.trim().to_string();
        if s.is_empty() && required {
            return err(
                &req.id,
                "bad_params",
                format!("{} must not be empty", key),
                None,
            );
        }
        set_parts.push(format!("{} = ?", column));
        bind_values.push(Value::Text(s));
    }

    if set_parts.is_empty() {
        return err(&req.id, "bad_params", "patch has no recognized fields", None);
    }

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "subject not found", None);
    }

    let sql = format!(
        "UPDATE subjects SET {} WHERE id = ?",
        set_parts.join(", ")
    );
    bind_values.push(Value::Text(subject_id.clone()));
    if let Err(e) = conn.execute(&sql, rusqlite::params_from_iter(bind_values)) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "subject not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute("DELETE FROM grades WHERE subject_id = ?", [&subject_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "grades" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM subjects WHERE id = ?", [&subject_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.update" => Some(handle_subjects_update(state, req)),
        "subjects.delete" => Some(handle_subjects_delete(state, req)),
        _ => None,
    }
}
