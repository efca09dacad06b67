use crate::content::{CourseInfo, TaskContent, STATUS_COMPLETED, TYPE_TASK};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_and_notifier, db_conn, parse_opt_string, required_str};
use crate::ipc::types::{AppState, Request};
use crate::notify::Notifier;
use crate::resolve::{self, ResolveError};
use crate::store::{self, NewTaskRecord};
use serde_json::json;

fn handle_get_effective(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match resolve::effective_progress(conn, &student_id) {
        Ok(progress) => ok(
            &req.id,
            json!({
                "positions": progress.positions,
                "source": progress.source,
                "updatedAt": progress.updated_at,
            }),
        ),
        Err(ResolveError::StudentNotFound) => err(&req.id, "not_found", "student not found", None),
        Err(ResolveError::Db(e)) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_override(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, notifier) = match db_and_notifier(state, req) {
        Ok(v) => v,
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
    let note = match parse_opt_string(req.params.get("note")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("note {}", m), None),
    };
    let course_info: CourseInfo = match req.params.get("courseInfo") {
        None => return err(&req.id, "bad_params", "missing courseInfo", None),
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(info) => info,
            Err(e) => {
                return err(&req.id, "bad_params", format!("courseInfo is malformed: {}", e), None)
            }
        },
    };
    if course_info.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "courseInfo must set a position for at least one subject",
            None,
        );
    }

    let belongs = match conn.query_row(
        "SELECT COUNT(*) FROM students WHERE id = ? AND school_id = ?",
        rusqlite::params![student_id, school_id],
        |r| r.get::<_, i64>(0),
    ) {
        Ok(n) => n > 0,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !belongs {
        return err(&req.id, "not_found", "student not found", None);
    }

    // The correction is recorded as an overridden row carrying the full
    // snapshot; the resolver treats its timestamp as the override side.
    let mut content = TaskContent::default();
    content.task_date = Some(store::today_key());
    content.category = "progress".to_string();
    content.course_info = Some(course_info.clone());
    content.teacher_message = note;

    let record = NewTaskRecord {
        id: store::new_id(),
        school_id,
        student_id: student_id.clone(),
        lesson_plan_id: None,
        record_type: TYPE_TASK.to_string(),
        title: "Progress adjustment".to_string(),
        category: "progress".to_string(),
        status: STATUS_COMPLETED.to_string(),
        exp_awarded: 0,
        is_overridden: true,
        content,
        settled_at: None,
    };
    let record_id = record.id.clone();
    if let Err(e) = store::insert_task_records(conn, &[record]) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    if let Err(e) = store::update_progress_cache(conn, &[student_id.clone()], &course_info) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    notifier.student_data_changed(&student_id);
    ok(&req.id, json!({ "recordId": record_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "progress.getEffective" => Some(handle_get_effective(state, req)),
        "progress.override" => Some(handle_override(state, req)),
        _ => None,
    }
}
