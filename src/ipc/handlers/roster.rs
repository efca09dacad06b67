use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_bool, parse_opt_string, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::{new_id, now_ms};
use rusqlite::{params, params_from_iter, types::Value, OptionalExtension};
use serde_json::{json, Value as JsonValue};

fn valid_role(role: &str) -> bool {
    matches!(role, "teacher" | "admin" | "platform_admin")
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let role = match parse_opt_string(req.params.get("role")) {
        Ok(v) => v.unwrap_or_else(|| "teacher".to_string()),
        Err(m) => return err(&req.id, "bad_params", format!("role {}", m), None),
    };
    if !valid_role(&role) {
        return err(
            &req.id,
            "bad_params",
            "role must be one of: teacher, admin, platform_admin",
            None,
        );
    }

    let teacher_id = new_id();
    if let Err(e) = conn.execute(
        "INSERT INTO teachers(id, school_id, name, role, active) VALUES(?, ?, ?, ?, 1)",
        params![teacher_id, school_id, name, role],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "teacherId": teacher_id }))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_name = match parse_opt_string(req.params.get("className")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("className {}", m), None),
    };

    let teacher_exists = match conn
        .query_row(
            "SELECT 1 FROM teachers WHERE id = ? AND school_id = ?",
            params![teacher_id, school_id],
            |_r| Ok(()),
        )
        .optional()
    {
        Ok(v) => v.is_some(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !teacher_exists {
        return err(&req.id, "not_found", "teacher not found", None);
    }

    let student_id = new_id();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, school_id, teacher_id, name, class_name, active, exp, updated_at)
         VALUES(?, ?, ?, ?, ?, 1, 0, ?)",
        params![student_id, school_id, teacher_id, name, class_name, now_ms()],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match parse_opt_string(req.params.get("teacherId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("teacherId {}", m), None),
    };

    let row_to_json = |r: &rusqlite::Row| -> rusqlite::Result<JsonValue> {
        let progress_raw: Option<String> = r.get(6)?;
        let progress: JsonValue = progress_raw
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or(JsonValue::Null);
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "teacherId": r.get::<_, String>(1)?,
            "name": r.get::<_, String>(2)?,
            "className": r.get::<_, Option<String>>(3)?,
            "active": r.get::<_, i64>(4)? != 0,
            "exp": r.get::<_, i64>(5)?,
            "currentProgress": progress,
            "updatedAt": r.get::<_, Option<i64>>(7)?,
        }))
    };

    let mut sql = "SELECT id, teacher_id, name, class_name, active, exp, current_progress_json, updated_at
         FROM students WHERE school_id = ?"
        .to_string();
    let mut values: Vec<Value> = vec![Value::Text(school_id)];
    if let Some(tid) = teacher_id {
        sql.push_str(" AND teacher_id = ?");
        values.push(Value::Text(tid));
    }
    sql.push_str(" ORDER BY name, id");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let students = match stmt.query_map(params_from_iter(values), row_to_json) {
        Ok(rows) => match rows.collect::<Result<Vec<_>, _>>() {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "students": students }))
}

fn handle_students_set_active(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let active = match parse_bool(req.params.get("active"), true) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("active {}", m), None),
    };
    let updated = match conn.execute(
        "UPDATE students SET active = ?, updated_at = ? WHERE id = ? AND school_id = ?",
        params![if active { 1 } else { 0 }, now_ms(), student_id, school_id],
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "student not found", None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "students.setActive" => Some(handle_students_set_active(state, req)),
        _ => None,
    }
}
