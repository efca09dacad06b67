use crate::catalog;
use crate::content::{
    map_business_category, subject_for_category, valid_record_type, valid_status, CourseInfo,
    TaskContent, STATUS_PENDING,
};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_and_notifier, db_conn, parse_bool, parse_opt_i64, parse_opt_string, parse_string_array,
    required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::notify::Notifier;
use crate::store::{self, NewTaskRecord};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;

fn handle_daily_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let date = match required_str(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(date_key) = store::canonical_date_key(&json!(date)) else {
        return err(&req.id, "bad_date", "date must be a YYYY-MM-DD string", None);
    };
    match store::records_for_date(conn, &school_id, &student_id, &date_key) {
        Ok(records) => ok(&req.id, json!({ "records": records })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn student_ids_for_filters(
    conn: &Connection,
    school_id: &str,
    teacher_id: Option<&str>,
    class_name: Option<&str>,
) -> rusqlite::Result<Vec<String>> {
    let mut sql = "SELECT id FROM students WHERE school_id = ?".to_string();
    let mut values: Vec<rusqlite::types::Value> =
        vec![rusqlite::types::Value::Text(school_id.to_string())];
    if let Some(tid) = teacher_id {
        sql.push_str(" AND teacher_id = ?");
        values.push(rusqlite::types::Value::Text(tid.to_string()));
    }
    if let Some(cls) = class_name {
        sql.push_str(" AND class_name = ?");
        values.push(rusqlite::types::Value::Text(cls.to_string()));
    }
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(values), |r| r.get::<_, String>(0))?;
    rows.collect()
}

fn handle_batch_daily_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date = match required_str(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(date_key) = store::canonical_date_key(&json!(date)) else {
        return err(&req.id, "bad_date", "date must be a YYYY-MM-DD string", None);
    };
    let teacher_id = match parse_opt_string(req.params.get("teacherId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("teacherId {}", m), None),
    };
    let class_name = match parse_opt_string(req.params.get("className")) {
        Ok(v) => v.filter(|c| c != "ALL"),
        Err(m) => return err(&req.id, "bad_params", format!("className {}", m), None),
    };

    let student_ids = match student_ids_for_filters(
        conn,
        &school_id,
        teacher_id.as_deref(),
        class_name.as_deref(),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match store::records_for_date_batch(conn, &school_id, &student_ids, &date_key) {
        Ok(records) => ok(&req.id, json!({ "records": records })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_history(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let limit = match parse_opt_i64(req.params.get("limit")) {
        Ok(v) => v.unwrap_or(100).clamp(1, 1000),
        Err(m) => return err(&req.id, "bad_params", format!("limit {}", m), None),
    };
    match store::student_history(conn, &school_id, &student_id, limit) {
        Ok(records) => ok(&req.id, json!({ "records": records })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_create_manual(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let record_type = match required_str(req, "type") {
        Ok(v) if valid_record_type(&v) => v,
        Ok(_) => return err(&req.id, "bad_params", "type is not a known task type", None),
        Err(e) => return e,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let category = match parse_opt_string(req.params.get("category")) {
        Ok(v) => v.unwrap_or_default(),
        Err(m) => return err(&req.id, "bad_params", format!("category {}", m), None),
    };
    let subcategory = match parse_opt_string(req.params.get("subcategory")) {
        Ok(v) => v.unwrap_or_default(),
        Err(m) => return err(&req.id, "bad_params", format!("subcategory {}", m), None),
    };
    let status = match parse_opt_string(req.params.get("status")) {
        Ok(Some(s)) if !valid_status(&s) => {
            return err(&req.id, "bad_params", "status must be pending, submitted or completed", None)
        }
        Ok(v) => v.unwrap_or_else(|| STATUS_PENDING.to_string()),
        Err(m) => return err(&req.id, "bad_params", format!("status {}", m), None),
    };
    let exp = match parse_opt_i64(req.params.get("exp")) {
        Ok(v) => v.unwrap_or(0).max(0),
        Err(m) => return err(&req.id, "bad_params", format!("exp {}", m), None),
    };
    let is_overridden = match parse_bool(req.params.get("isOverridden"), true) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("isOverridden {}", m), None),
    };
    let date_key = match req.params.get("date") {
        None => store::today_key(),
        Some(v) => match store::canonical_date_key(v) {
            Some(k) => k,
            None => return err(&req.id, "bad_date", "date must be a YYYY-MM-DD string", None),
        },
    };
    let course_info: Option<CourseInfo> = match req.params.get("courseInfo") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(info) => Some(info),
            Err(e) => {
                return err(&req.id, "bad_params", format!("courseInfo is malformed: {}", e), None)
            }
        },
    };

    let student_exists = match conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ? AND school_id = ?",
            params![student_id, school_id],
            |_r| Ok(()),
        )
        .optional()
    {
        Ok(v) => v.is_some(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !student_exists {
        return err(&req.id, "not_found", "student not found", None);
    }

    // Methodology and growth items take their reward from the catalog when
    // the school has configured one; the caller's exp is the fallback.
    let mapped_category = map_business_category(&category);
    let final_exp = if matches!(mapped_category, "methodology" | "task") {
        match catalog::default_exp_for(conn, &school_id, &subcategory, &title) {
            Ok(Some(configured)) => configured,
            Ok(None) => exp,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    } else {
        exp
    };

    let subject = subject_for_category(&category);
    let position = subject.and_then(|s| course_info.as_ref().and_then(|info| info.get(s)));

    let mut content = TaskContent::default();
    content.task_date = Some(date_key);
    content.category = category;
    content.subcategory = subcategory;
    content.subject = subject.map(|s| s.to_string());
    content.unit = position.map(|p| p.unit.clone());
    content.lesson = position.map(|p| p.lesson.clone());
    content.task_name = Some(title.clone());
    content.course_info = course_info;

    let record = NewTaskRecord {
        id: store::new_id(),
        school_id,
        student_id: student_id.clone(),
        lesson_plan_id: None,
        record_type,
        title,
        category: mapped_category.to_string(),
        status,
        exp_awarded: final_exp,
        is_overridden,
        content,
        settled_at: None,
    };
    let record_id = record.id.clone();
    if let Err(e) = store::insert_task_records(conn, &[record]) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    notifier.student_data_changed(&student_id);
    ok(&req.id, json!({ "recordId": record_id, "expAwarded": final_exp }))
}

fn handle_mark_attempt(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, notifier) = match db_and_notifier(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let record_id = match required_str(req, "recordId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match store::bump_attempts(conn, &record_id) {
        Ok(Some(student_id)) => {
            notifier.student_data_changed(&student_id);
            ok(&req.id, json!({ "ok": true }))
        }
        Ok(None) => err(&req.id, "not_found", "record not found", None),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_set_status_bulk(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, notifier) = match db_and_notifier(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let record_ids = match parse_string_array(req.params.get("recordIds")) {
        Ok(v) if !v.is_empty() => v,
        Ok(_) => return err(&req.id, "bad_params", "recordIds must not be empty", None),
        Err(m) => return err(&req.id, "bad_params", format!("recordIds {}", m), None),
    };
    let status = match required_str(req, "status") {
        Ok(v) if valid_status(&v) => v,
        Ok(_) => {
            return err(&req.id, "bad_params", "status must be pending, submitted or completed", None)
        }
        Err(e) => return e,
    };
    let course_info: Option<CourseInfo> = match req.params.get("courseInfo") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(info) => Some(info),
            Err(e) => {
                return err(&req.id, "bad_params", format!("courseInfo is malformed: {}", e), None)
            }
        },
    };

    match store::set_status_bulk(conn, &school_id, &record_ids, &status, course_info.as_ref()) {
        Ok((updated, student_ids)) => {
            for sid in &student_ids {
                notifier.student_data_changed(sid);
            }
            ok(&req.id, json!({ "updated": updated }))
        }
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "records.dailyList" => Some(handle_daily_list(state, req)),
        "records.batchDailyList" => Some(handle_batch_daily_list(state, req)),
        "records.history" => Some(handle_history(state, req)),
        "records.createManual" => Some(handle_create_manual(state, req)),
        "records.markAttempt" => Some(handle_mark_attempt(state, req)),
        "records.setStatusBulk" => Some(handle_set_status_bulk(state, req)),
        _ => None,
    }
}
