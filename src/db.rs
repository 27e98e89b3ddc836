use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "gradebook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            course TEXT,
            year_level TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_name ON students(last_name, first_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            subject_code TEXT NOT NULL,
            subject_name TEXT NOT NULL,
            instructor TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            prelim REAL,
            midterm REAL,
            semifinal REAL,
            final REAL,
            updated_at TEXT,
            UNIQUE(student_id, subject_id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_subject ON grades(subject_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(student_id)",
        [],
    )?;

    // Existing workspaces may predate the updated_at column. Add if needed.
    ensure_grades_updated_at(&conn)?;

    Ok(conn)
}

fn ensure_grades_updated_at(conn: &Connection) -> anyhow::Result<()> {
    let mut stmt = conn.prepare("PRAGMA table_info(grades)")?;
    let has_column = stmt
        .query_map([], |r| r.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?
        .iter()
        .any(|name| name == "updated_at");
    if !has_column {
        conn.execute("ALTER TABLE grades ADD COLUMN updated_at TEXT", [])?;
    }
    Ok(())
}

pub fn now_utc() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_workspace() -> std::path::PathBuf {
        let p = std::env::temp_dir().join(format!(
            "gradebookd-db-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn open_db_is_idempotent() {
        let ws = temp_workspace();
        {
            let conn = open_db(&ws).expect("first open");
            conn.execute(
                "INSERT INTO students(id, first_name, last_name, course, year_level, created_at)
                 VALUES('s1', 'Ana', 'Cruz', 'BSCS', '2', ?)",
                [now_utc()],
            )
            .expect("insert student");
        }
        let conn = open_db(&ws).expect("reopen");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 1);
    }

    #[test]
    fn grade_pair_is_unique() {
        let ws = temp_workspace();
        let conn = open_db(&ws).expect("open");
        conn.execute(
            "INSERT INTO students(id, first_name, last_name, course, year_level, created_at)
             VALUES('s1', 'Ana', 'Cruz', 'BSCS', '2', ?)",
            [now_utc()],
        )
        .expect("insert student");
        conn.execute(
            "INSERT INTO subjects(id, subject_code, subject_name, instructor, created_at)
             VALUES('sub1', 'CS101', 'Intro', 'Dr. Reyes', ?)",
            [now_utc()],
        )
        .expect("insert subject");
        conn.execute(
            "INSERT INTO grades(id, student_id, subject_id, prelim) VALUES('g1', 's1', 'sub1', 2.0)",
            [],
        )
        .expect("insert grade");
        let dup = conn.execute(
            "INSERT INTO grades(id, student_id, subject_id, prelim) VALUES('g2', 's1', 'sub1', 3.0)",
            [],
        );
        assert!(dup.is_err(), "second row for the same pair must be rejected");
    }
}
