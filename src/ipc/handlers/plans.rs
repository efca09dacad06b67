use crate::content::{valid_record_type, CourseInfo};
use crate::distribute::{self, PlanTask, PublishError, PublishRequest};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_and_notifier, db_conn, parse_opt_i64, parse_opt_string, parse_string_array, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, now_ms};
use rusqlite::{params, OptionalExtension};
use serde_json::{json, Value as JsonValue};

fn parse_tasks(req: &Request) -> Result<Vec<PlanTask>, serde_json::Value> {
    let Some(raw) = req.params.get("tasks").and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", "missing tasks", None));
    };
    let mut out = Vec::with_capacity(raw.len());
    for (i, item) in raw.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            return Err(err(&req.id, "bad_params", format!("tasks[{}] must be an object", i), None));
        };
        let record_type = match obj.get("type").and_then(|v| v.as_str()) {
            Some(t) if valid_record_type(t) => t.to_string(),
            _ => {
                return Err(err(
                    &req.id,
                    "bad_params",
                    format!("tasks[{}].type is not a known task type", i),
                    None,
                ))
            }
        };
        let title = match obj.get("title").and_then(|v| v.as_str()) {
            Some(t) if !t.trim().is_empty() => t.trim().to_string(),
            _ => {
                return Err(err(
                    &req.id,
                    "bad_params",
                    format!("tasks[{}].title is required", i),
                    None,
                ))
            }
        };
        let exp_awarded = match obj.get("expAwarded") {
            None => 0,
            Some(v) => match v.as_i64() {
                Some(n) if n >= 0 => n,
                _ => {
                    return Err(err(
                        &req.id,
                        "bad_params",
                        format!("tasks[{}].expAwarded must be >= 0", i),
                        None,
                    ))
                }
            },
        };
        let content = obj.get("content").and_then(|v| v.as_object());
        let category = content
            .and_then(|c| c.get("category"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        let subcategory = content
            .and_then(|c| c.get("subcategory"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        let target_student_names =
            match parse_string_array(content.and_then(|c| c.get("targetStudentNames"))) {
                Ok(v) => v,
                Err(m) => {
                    return Err(err(
                        &req.id,
                        "bad_params",
                        format!("tasks[{}].content.targetStudentNames {}", i, m),
                        None,
                    ))
                }
            };
        out.push(PlanTask {
            record_type,
            title,
            exp_awarded,
            category,
            subcategory,
            target_student_names,
        });
    }
    Ok(out)
}

fn handle_publish(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, notifier) = match db_and_notifier(state, req) {
        Ok(v) => v,
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
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(date) = req.params.get("date").cloned() else {
        return err(&req.id, "bad_params", "missing date", None);
    };
    let course_info: CourseInfo = match req.params.get("coursePositions") {
        None => CourseInfo::default(),
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(info) => info,
            Err(e) => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("coursePositions is malformed: {}", e),
                    None,
                )
            }
        },
    };
    let tasks = match parse_tasks(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let request = PublishRequest {
        school_id,
        teacher_id,
        title,
        date,
        course_info,
        tasks,
    };
    match distribute::publish_plan(conn, notifier, &request) {
        Ok(result) => ok(
            &req.id,
            json!({
                "planId": result.plan_id,
                "date": result.date_key,
                "createdCount": result.created_count,
                "cleanedCount": result.cleaned_count,
                "affectedStudentCount": result.affected_student_count,
                "totalExpPotential": result.total_exp_potential,
                "affectedClasses": result.affected_classes,
            }),
        ),
        Err(e @ PublishError::PartialWrite { .. }) => err(
            &req.id,
            e.code(),
            e.message(),
            Some(json!({
                "teacherId": request.teacher_id,
                "replayable": true,
            })),
        ),
        Err(e) => err(&req.id, e.code(), e.message(), None),
    }
}

fn plan_row_to_json(r: &rusqlite::Row) -> rusqlite::Result<JsonValue> {
    let content_raw: String = r.get(4)?;
    let content: JsonValue = serde_json::from_str(&content_raw).unwrap_or(JsonValue::Null);
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "teacherId": r.get::<_, String>(1)?,
        "title": r.get::<_, String>(2)?,
        "date": r.get::<_, String>(3)?,
        "content": content,
        "active": r.get::<_, i64>(5)? != 0,
        "createdAt": r.get::<_, i64>(6)?,
        "updatedAt": r.get::<_, i64>(7)?,
    }))
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let page = match parse_opt_i64(req.params.get("page")) {
        Ok(v) => v.unwrap_or(1).max(1),
        Err(m) => return err(&req.id, "bad_params", format!("page {}", m), None),
    };
    let limit = match parse_opt_i64(req.params.get("limit")) {
        Ok(v) => v.unwrap_or(20).clamp(1, 200),
        Err(m) => return err(&req.id, "bad_params", format!("limit {}", m), None),
    };
    let start_date = match parse_opt_string(req.params.get("startDate")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("startDate {}", m), None),
    };
    let end_date = match parse_opt_string(req.params.get("endDate")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("endDate {}", m), None),
    };
    let offset = (page - 1) * limit;

    // The date column holds YYYY-MM-DD keys, so string range compare is day
    // range compare.
    let sql = "SELECT id, teacher_id, title, date, content_json, active, created_at, updated_at
         FROM lesson_plans
         WHERE school_id = ? AND active = 1
           AND (? IS NULL OR date >= ?)
           AND (? IS NULL OR date <= ?)
         ORDER BY date DESC, updated_at DESC
         LIMIT ? OFFSET ?";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let plans = match stmt.query_map(
        params![school_id, start_date, start_date, end_date, end_date, limit, offset],
        plan_row_to_json,
    ) {
        Ok(rows) => match rows.collect::<Result<Vec<_>, _>>() {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let total: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM lesson_plans
         WHERE school_id = ? AND active = 1
           AND (? IS NULL OR date >= ?)
           AND (? IS NULL OR date <= ?)",
        params![school_id, start_date, start_date, end_date, end_date],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "plans": plans, "total": total }))
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let plan_id = match required_str(req, "planId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let plan = match conn
        .query_row(
            "SELECT id, teacher_id, title, date, content_json, active, created_at, updated_at
             FROM lesson_plans WHERE id = ?",
            [&plan_id],
            |r| plan_row_to_json(r),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(plan) = plan else {
        return err(&req.id, "not_found", "lesson plan not found", None);
    };
    let records = match store::records_for_plan(conn, &plan_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "plan": plan, "records": records }))
}

fn handle_latest(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    match store::latest_active_plan(conn, &school_id, &teacher_id) {
        Ok(Some(plan)) => ok(
            &req.id,
            json!({
                "plan": {
                    "id": plan.id,
                    "title": plan.title,
                    "date": plan.date,
                    "content": plan.content,
                    "createdAt": plan.created_at,
                    "updatedAt": plan.updated_at,
                }
            }),
        ),
        Ok(None) => ok(&req.id, json!({ "plan": null })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let plan_id = match required_str(req, "planId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let updated = match conn.execute(
        "UPDATE lesson_plans SET active = 0, updated_at = ? WHERE id = ? AND school_id = ?",
        params![now_ms(), plan_id, school_id],
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "lesson plan not found", None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "plans.publish" => Some(handle_publish(state, req)),
        "plans.list" => Some(handle_list(state, req)),
        "plans.open" => Some(handle_open(state, req)),
        "plans.latest" => Some(handle_latest(state, req)),
        "plans.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
