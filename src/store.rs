use crate::content::{CourseInfo, TaskContent, AUTO_DISTRIBUTABLE_TYPES};
use chrono::{Local, NaiveDate, TimeZone};
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::{json, Value as JsonValue};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Canonical `YYYY-MM-DD` key for "which day does this belong to".
///
/// An explicit date string is taken as-is (a trailing time part is cut off,
/// never converted through UTC); a millisecond timestamp is formatted in
/// local time. Anything else is rejected.
pub fn canonical_date_key(v: &JsonValue) -> Option<String> {
    if let Some(s) = v.as_str() {
        let day = s.split('T').next().unwrap_or("").trim();
        return NaiveDate::parse_from_str(day, "%Y-%m-%d")
            .ok()
            .map(|_| day.to_string());
    }
    if let Some(ms) = v.as_i64() {
        return Local
            .timestamp_millis_opt(ms)
            .single()
            .map(|dt| dt.format("%Y-%m-%d").to_string());
    }
    None
}

pub fn today_key() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

/// Millisecond bounds of a calendar day in local time. Used only by the
/// pre-date-key compatibility shim; taskDate matching is the real path.
pub fn local_day_bounds_ms(date_key: &str) -> Option<(i64, i64)> {
    let day = NaiveDate::parse_from_str(date_key, "%Y-%m-%d").ok()?;
    let start = Local
        .from_local_datetime(&day.and_hms_opt(0, 0, 0)?)
        .earliest()?;
    let end = Local
        .from_local_datetime(&day.and_hms_milli_opt(23, 59, 59, 999)?)
        .latest()?;
    Some((start.timestamp_millis(), end.timestamp_millis()))
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn auto_types_sql_list() -> String {
    AUTO_DISTRIBUTABLE_TYPES
        .iter()
        .map(|t| format!("'{}'", t))
        .collect::<Vec<_>>()
        .join(", ")
}

pub struct NewTaskRecord {
    pub id: String,
    pub school_id: String,
    pub student_id: String,
    pub lesson_plan_id: Option<String>,
    pub record_type: String,
    pub title: String,
    pub category: String,
    pub status: String,
    pub exp_awarded: i64,
    pub is_overridden: bool,
    pub content: TaskContent,
    pub settled_at: Option<i64>,
}

pub fn insert_task_records(conn: &Connection, records: &[NewTaskRecord]) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT INTO task_records(
            id, school_id, student_id, lesson_plan_id, type, title, category,
            status, attempts, exp_awarded, is_overridden, content_json,
            submitted_at, settled_at, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, NULL, ?, ?, ?)",
    )?;
    let ts = now_ms();
    for r in records {
        stmt.execute(params![
            r.id,
            r.school_id,
            r.student_id,
            r.lesson_plan_id,
            r.record_type,
            r.title,
            r.category,
            r.status,
            r.exp_awarded,
            if r.is_overridden { 1 } else { 0 },
            r.content.to_json_string(),
            r.settled_at,
            ts,
            ts
        ])?;
    }
    Ok(records.len())
}

/// Same-day cleanup for a plan re-publish: removes the cohort's
/// auto-distributed records for the canonical day. Overridden records are
/// never touched. Records written before the date key existed fall back to a
/// local-day creation-time match.
pub fn delete_auto_records_for_day(
    conn: &Connection,
    school_id: &str,
    student_ids: &[String],
    date_key: &str,
) -> rusqlite::Result<usize> {
    if student_ids.is_empty() {
        return Ok(0);
    }
    let (day_start, day_end) = local_day_bounds_ms(date_key).unwrap_or((0, -1));
    let sql = format!(
        "DELETE FROM task_records
         WHERE school_id = ?
           AND is_overridden = 0
           AND type IN ({})
           AND student_id IN ({})
           AND (
                json_extract(content_json, '$.taskDate') = ?
                OR (json_extract(content_json, '$.taskDate') IS NULL
                    AND created_at BETWEEN ? AND ?)
           )",
        auto_types_sql_list(),
        placeholders(student_ids.len())
    );
    let mut values: Vec<Value> = Vec::with_capacity(student_ids.len() + 4);
    values.push(Value::Text(school_id.to_string()));
    for sid in student_ids {
        values.push(Value::Text(sid.clone()));
    }
    values.push(Value::Text(date_key.to_string()));
    values.push(Value::Integer(day_start));
    values.push(Value::Integer(day_end));
    conn.execute(&sql, params_from_iter(values))
}

const RECORD_COLUMNS: &str = "id, student_id, lesson_plan_id, type, title, category, status, \
     attempts, exp_awarded, is_overridden, content_json, submitted_at, settled_at, \
     created_at, updated_at";

fn record_row_to_json(r: &rusqlite::Row) -> rusqlite::Result<JsonValue> {
    let content_raw: String = r.get(10)?;
    let content: JsonValue = serde_json::from_str(&content_raw).unwrap_or(JsonValue::Null);
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "studentId": r.get::<_, String>(1)?,
        "lessonPlanId": r.get::<_, Option<String>>(2)?,
        "type": r.get::<_, String>(3)?,
        "title": r.get::<_, String>(4)?,
        "category": r.get::<_, String>(5)?,
        "status": r.get::<_, String>(6)?,
        "attempts": r.get::<_, i64>(7)?,
        "expAwarded": r.get::<_, i64>(8)?,
        "isOverridden": r.get::<_, i64>(9)? != 0,
        "content": content,
        "submittedAt": r.get::<_, Option<i64>>(11)?,
        "settledAt": r.get::<_, Option<i64>>(12)?,
        "createdAt": r.get::<_, i64>(13)?,
        "updatedAt": r.get::<_, i64>(14)?,
    }))
}

/// Daily view lookup: matches the content-embedded date key, not the
/// creation timestamp.
pub fn records_for_date(
    conn: &Connection,
    school_id: &str,
    student_id: &str,
    date_key: &str,
) -> rusqlite::Result<Vec<JsonValue>> {
    let sql = format!(
        "SELECT {} FROM task_records
         WHERE school_id = ? AND student_id = ?
           AND json_extract(content_json, '$.taskDate') = ?
         ORDER BY created_at ASC",
        RECORD_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![school_id, student_id, date_key], record_row_to_json)?;
    rows.collect()
}

pub fn records_for_date_batch(
    conn: &Connection,
    school_id: &str,
    student_ids: &[String],
    date_key: &str,
) -> rusqlite::Result<Vec<JsonValue>> {
    if student_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {} FROM task_records
         WHERE school_id = ?
           AND student_id IN ({})
           AND json_extract(content_json, '$.taskDate') = ?
         ORDER BY created_at ASC",
        RECORD_COLUMNS,
        placeholders(student_ids.len())
    );
    let mut values: Vec<Value> = Vec::with_capacity(student_ids.len() + 2);
    values.push(Value::Text(school_id.to_string()));
    for sid in student_ids {
        values.push(Value::Text(sid.clone()));
    }
    values.push(Value::Text(date_key.to_string()));
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values), record_row_to_json)?;
    rows.collect()
}

pub fn student_history(
    conn: &Connection,
    school_id: &str,
    student_id: &str,
    limit: i64,
) -> rusqlite::Result<Vec<JsonValue>> {
    let sql = format!(
        "SELECT {} FROM task_records
         WHERE school_id = ? AND student_id = ?
         ORDER BY created_at DESC
         LIMIT ?",
        RECORD_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![school_id, student_id, limit], record_row_to_json)?;
    rows.collect()
}

pub fn records_for_plan(conn: &Connection, plan_id: &str) -> rusqlite::Result<Vec<JsonValue>> {
    let sql = format!(
        "SELECT {} FROM task_records WHERE lesson_plan_id = ? ORDER BY created_at ASC",
        RECORD_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([plan_id], record_row_to_json)?;
    rows.collect()
}

/// Returns the owning student id, or None when the record does not exist.
pub fn bump_attempts(conn: &Connection, record_id: &str) -> rusqlite::Result<Option<String>> {
    let student: Option<String> = conn
        .query_row(
            "SELECT student_id FROM task_records WHERE id = ?",
            [record_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(student_id) = student else {
        return Ok(None);
    };
    conn.execute(
        "UPDATE task_records SET attempts = attempts + 1, updated_at = ? WHERE id = ?",
        params![now_ms(), record_id],
    )?;
    Ok(Some(student_id))
}

/// Bulk status flip. Manual bulk operations are teacher actions, so the
/// touched records are marked overridden and survive future cleanup passes.
/// When course info is supplied it is merged into the content blob in place.
pub fn set_status_bulk(
    conn: &Connection,
    school_id: &str,
    record_ids: &[String],
    status: &str,
    course_info: Option<&CourseInfo>,
) -> rusqlite::Result<(usize, Vec<String>)> {
    if record_ids.is_empty() {
        return Ok((0, Vec::new()));
    }
    let ts = now_ms();
    let submitted = matches!(status, "submitted" | "completed");
    let mut sql = format!(
        "UPDATE task_records SET status = ?, is_overridden = 1, updated_at = ?{}{} WHERE school_id = ? AND id IN ({})",
        if submitted { ", submitted_at = ?" } else { "" },
        if course_info.is_some() {
            ", content_json = json_set(content_json, '$.courseInfo', json(?))"
        } else {
            ""
        },
        placeholders(record_ids.len())
    );
    // json_set placeholder must come after the fixed ones we pushed.
    let mut values: Vec<Value> = Vec::new();
    values.push(Value::Text(status.to_string()));
    values.push(Value::Integer(ts));
    if submitted {
        values.push(Value::Integer(ts));
    }
    if let Some(info) = course_info {
        let raw = serde_json::to_string(info).unwrap_or_else(|_| "{}".to_string());
        values.push(Value::Text(raw));
    }
    values.push(Value::Text(school_id.to_string()));
    for id in record_ids {
        values.push(Value::Text(id.clone()));
    }
    let updated = conn.execute(&sql, params_from_iter(values))?;

    sql = format!(
        "SELECT DISTINCT student_id FROM task_records WHERE school_id = ? AND id IN ({})",
        placeholders(record_ids.len())
    );
    let mut sel_values: Vec<Value> = Vec::with_capacity(record_ids.len() + 1);
    sel_values.push(Value::Text(school_id.to_string()));
    for id in record_ids {
        sel_values.push(Value::Text(id.clone()));
    }
    let mut stmt = conn.prepare(&sql)?;
    let students = stmt
        .query_map(params_from_iter(sel_values), |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok((updated, students))
}

#[derive(Debug, Clone)]
pub struct PlanRow {
    pub id: String,
    pub title: String,
    pub date: String,
    pub content: JsonValue,
    pub created_at: i64,
    pub updated_at: i64,
}

pub fn latest_active_plan(
    conn: &Connection,
    school_id: &str,
    teacher_id: &str,
) -> rusqlite::Result<Option<PlanRow>> {
    conn.query_row(
        "SELECT id, title, date, content_json, created_at, updated_at
         FROM lesson_plans
         WHERE school_id = ? AND teacher_id = ? AND active = 1
         ORDER BY updated_at DESC, created_at DESC
         LIMIT 1",
        params![school_id, teacher_id],
        |r| {
            let content_raw: String = r.get(3)?;
            Ok(PlanRow {
                id: r.get(0)?,
                title: r.get(1)?,
                date: r.get(2)?,
                content: serde_json::from_str(&content_raw).unwrap_or(JsonValue::Null),
                created_at: r.get(4)?,
                updated_at: r.get(5)?,
            })
        },
    )
    .optional()
}

/// Most recent teacher-authored progress correction for a student: an
/// overridden record whose content carries a course-position snapshot.
pub fn latest_override_snapshot(
    conn: &Connection,
    student_id: &str,
) -> rusqlite::Result<Option<(CourseInfo, i64)>> {
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT content_json, updated_at
             FROM task_records
             WHERE student_id = ?
               AND is_overridden = 1
               AND json_extract(content_json, '$.courseInfo') IS NOT NULL
             ORDER BY updated_at DESC
             LIMIT 1",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    Ok(row.and_then(|(raw, ts)| {
        let content = TaskContent::from_json_str(&raw);
        content.course_info.map(|info| (info, ts))
    }))
}

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: String,
    pub name: String,
    pub class_name: Option<String>,
}

pub fn active_students_of_teacher(
    conn: &Connection,
    school_id: &str,
    teacher_id: &str,
) -> rusqlite::Result<Vec<StudentRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, class_name FROM students
         WHERE school_id = ? AND teacher_id = ? AND active = 1
         ORDER BY name, id",
    )?;
    let rows = stmt.query_map(params![school_id, teacher_id], |r| {
        Ok(StudentRow {
            id: r.get(0)?,
            name: r.get(1)?,
            class_name: r.get(2)?,
        })
    })?;
    rows.collect()
}

pub fn update_progress_cache(
    conn: &Connection,
    student_ids: &[String],
    course_info: &CourseInfo,
) -> rusqlite::Result<usize> {
    if student_ids.is_empty() {
        return Ok(0);
    }
    let raw = serde_json::to_string(course_info).unwrap_or_else(|_| "{}".to_string());
    let sql = format!(
        "UPDATE students SET current_progress_json = ?, updated_at = ? WHERE id IN ({})",
        placeholders(student_ids.len())
    );
    let mut values: Vec<Value> = Vec::with_capacity(student_ids.len() + 2);
    values.push(Value::Text(raw));
    values.push(Value::Integer(now_ms()));
    for sid in student_ids {
        values.push(Value::Text(sid.clone()));
    }
    conn.execute(&sql, params_from_iter(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn date_key_prefers_the_raw_string() {
        assert_eq!(
            canonical_date_key(&json!("2025-12-20")),
            Some("2025-12-20".to_string())
        );
        // A time suffix is cut, never round-tripped through UTC.
        assert_eq!(
            canonical_date_key(&json!("2025-12-20T23:30:00.000Z")),
            Some("2025-12-20".to_string())
        );
        assert_eq!(canonical_date_key(&json!("not a date")), None);
        assert_eq!(canonical_date_key(&json!("2025-13-40")), None);
    }

    #[test]
    fn day_bounds_cover_the_whole_day() {
        let (start, end) = local_day_bounds_ms("2024-03-01").expect("bounds");
        assert!(end > start);
        assert_eq!(end - start, 24 * 3600 * 1000 - 1);
    }
}
