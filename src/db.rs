use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("classtask.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'teacher',
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_school ON teachers(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            name TEXT NOT NULL,
            class_name TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            exp INTEGER NOT NULL DEFAULT 0,
            current_progress_json TEXT,
            updated_at INTEGER,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_school_teacher ON students(school_id, teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lesson_plans(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            title TEXT NOT NULL,
            date TEXT NOT NULL,
            content_json TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lesson_plans_school_teacher ON lesson_plans(school_id, teacher_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lesson_plans_date ON lesson_plans(school_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS task_records(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            lesson_plan_id TEXT,
            type TEXT NOT NULL,
            title TEXT NOT NULL,
            category TEXT NOT NULL DEFAULT 'task',
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            exp_awarded INTEGER NOT NULL DEFAULT 0,
            is_overridden INTEGER NOT NULL DEFAULT 0,
            content_json TEXT NOT NULL,
            submitted_at INTEGER,
            settled_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(lesson_plan_id) REFERENCES lesson_plans(id)
        )",
        [],
    )?;
    // Older workspaces predate settlement stamping. Add and leave NULL.
    ensure_task_records_settled_at(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_task_records_student ON task_records(school_id, student_id)",
        [],
    )?;
    // The content-embedded day key is the hot lookup path for daily views.
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_task_records_task_date
         ON task_records(json_extract(content_json, '$.taskDate'))",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_task_records_status ON task_records(student_id, status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS task_library(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            domain TEXT NOT NULL,
            subcategory TEXT NOT NULL,
            category TEXT NOT NULL,
            description TEXT,
            default_exp INTEGER NOT NULL,
            type TEXT NOT NULL,
            difficulty INTEGER,
            active INTEGER NOT NULL DEFAULT 1,
            updated_at INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_task_library_school ON task_library(school_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_task_records_settled_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "task_records", "settled_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE task_records ADD COLUMN settled_at INTEGER", [])?;
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
