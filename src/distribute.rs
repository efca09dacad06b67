use crate::content::{
    map_business_category, subject_for_category, CourseInfo, TaskContent, STATUS_PENDING, TYPE_QC,
    TYPE_SPECIAL,
};
use crate::notify::Notifier;
use crate::store::{self, NewTaskRecord};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value as JsonValue};

pub struct PlanTask {
    pub record_type: String,
    pub title: String,
    pub exp_awarded: i64,
    pub category: String,
    pub subcategory: String,
    pub target_student_names: Vec<String>,
}

pub struct PublishRequest {
    pub school_id: String,
    pub teacher_id: String,
    pub title: String,
    pub date: JsonValue,
    pub course_info: CourseInfo,
    pub tasks: Vec<PlanTask>,
}

pub struct DistributionResult {
    pub plan_id: String,
    pub date_key: String,
    pub created_count: usize,
    pub cleaned_count: usize,
    pub affected_student_count: usize,
    pub total_exp_potential: i64,
    pub affected_classes: Vec<String>,
}

pub enum PublishError {
    TeacherNotFound,
    NotTeacher(String),
    EmptyCohort,
    BadDate,
    PartialWrite {
        attempted: usize,
        source: rusqlite::Error,
    },
    Db(rusqlite::Error),
}

impl PublishError {
    pub fn code(&self) -> &'static str {
        match self {
            PublishError::TeacherNotFound => "not_found",
            PublishError::NotTeacher(_) => "forbidden_role",
            PublishError::EmptyCohort => "empty_cohort",
            PublishError::BadDate => "bad_date",
            PublishError::PartialWrite { .. } => "partial_write",
            PublishError::Db(_) => "db_query_failed",
        }
    }

    pub fn message(&self) -> String {
        match self {
            PublishError::TeacherNotFound => "teacher not found".to_string(),
            PublishError::NotTeacher(role) => {
                format!("only the teacher of record may publish (caller role: {})", role)
            }
            PublishError::EmptyCohort => {
                "teacher has no bound active students to distribute to".to_string()
            }
            PublishError::BadDate => "date must be a YYYY-MM-DD string".to_string(),
            PublishError::PartialWrite { attempted, source } => {
                format!("record insert failed after cleanup ({} attempted): {}", attempted, source)
            }
            PublishError::Db(e) => e.to_string(),
        }
    }
}

impl From<rusqlite::Error> for PublishError {
    fn from(e: rusqlite::Error) -> Self {
        PublishError::Db(e)
    }
}

fn special_excludes(task: &PlanTask, student_name: &str) -> bool {
    task.record_type == TYPE_SPECIAL
        && !task.target_student_names.is_empty()
        && !task
            .target_student_names
            .iter()
            .any(|n| n == student_name)
}

/// Fan a teacher's daily plan out to the bound cohort.
///
/// Plan insert, same-day cleanup, snapshot-cache update and record insert
/// run inside one transaction, so a re-publish can never leave the day half
/// cleaned. Re-publishing the same day replaces the auto-distributed set and
/// leaves overridden records alone.
pub fn publish_plan(
    conn: &Connection,
    notifier: &mut dyn Notifier,
    req: &PublishRequest,
) -> Result<DistributionResult, PublishError> {
    let role: Option<String> = conn
        .query_row(
            "SELECT role FROM teachers WHERE id = ? AND school_id = ? AND active = 1",
            params![req.teacher_id, req.school_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(role) = role else {
        return Err(PublishError::TeacherNotFound);
    };
    if role != "teacher" {
        return Err(PublishError::NotTeacher(role));
    }

    let cohort = store::active_students_of_teacher(conn, &req.school_id, &req.teacher_id)?;
    if cohort.is_empty() {
        return Err(PublishError::EmptyCohort);
    }
    let Some(date_key) = store::canonical_date_key(&req.date) else {
        return Err(PublishError::BadDate);
    };

    let cohort_ids: Vec<String> = cohort.iter().map(|s| s.id.clone()).collect();
    let plan_id = store::new_id();
    let ts = store::now_ms();
    let plan_content = json!({
        "coursePositions": req.course_info,
        "publisherId": req.teacher_id,
    });

    let tx = conn
        .unchecked_transaction()
        .map_err(PublishError::Db)?;

    tx.execute(
        "INSERT INTO lesson_plans(id, school_id, teacher_id, title, date, content_json, active, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, 1, ?, ?)",
        params![
            plan_id,
            req.school_id,
            req.teacher_id,
            req.title,
            date_key,
            plan_content.to_string(),
            ts,
            ts
        ],
    )?;

    let cleaned_count =
        store::delete_auto_records_for_day(&tx, &req.school_id, &cohort_ids, &date_key)?;
    store::update_progress_cache(&tx, &cohort_ids, &req.course_info)?;

    let mut records: Vec<NewTaskRecord> = Vec::new();
    for student in &cohort {
        for task in &req.tasks {
            // Quick-check items render from the client catalog; they only
            // become records when explicitly checked off.
            if task.record_type == TYPE_QC {
                continue;
            }
            if special_excludes(task, &student.name) {
                continue;
            }

            let position = subject_for_category(&task.category)
                .and_then(|subject| req.course_info.get(subject));
            let unit = position.map(|p| p.unit.clone()).unwrap_or_else(|| "1".to_string());
            let lesson = position.map(|p| p.lesson.clone()).unwrap_or_else(|| "1".to_string());

            let mut content = TaskContent::default();
            content.task_date = Some(date_key.clone());
            content.category = task.category.clone();
            content.subcategory = task.subcategory.clone();
            content.unit = Some(unit);
            content.lesson = Some(lesson);
            content.task_name = Some(task.title.clone());
            content.publisher_id = Some(req.teacher_id.clone());
            if !task.target_student_names.is_empty() {
                content.target_student_names = Some(task.target_student_names.clone());
            }

            records.push(NewTaskRecord {
                id: store::new_id(),
                school_id: req.school_id.clone(),
                student_id: student.id.clone(),
                lesson_plan_id: Some(plan_id.clone()),
                record_type: task.record_type.clone(),
                title: task.title.clone(),
                category: map_business_category(&task.category).to_string(),
                status: STATUS_PENDING.to_string(),
                exp_awarded: task.exp_awarded,
                is_overridden: false,
                content,
                settled_at: None,
            });
        }
    }

    if let Err(source) = store::insert_task_records(&tx, &records) {
        let attempted = records.len();
        let _ = tx.rollback();
        eprintln!(
            "publish rollback: teacher={} date={} cleaned={} attempted={}: {}",
            req.teacher_id, date_key, cleaned_count, attempted, source
        );
        return Err(PublishError::PartialWrite { attempted, source });
    }
    tx.commit().map_err(PublishError::Db)?;

    let total_exp_potential: i64 = records.iter().map(|r| r.exp_awarded).sum();
    let mut affected_classes: Vec<String> = cohort
        .iter()
        .map(|s| s.class_name.clone().unwrap_or_else(|| "unassigned".to_string()))
        .collect();
    affected_classes.sort();
    affected_classes.dedup();

    let result = DistributionResult {
        plan_id: plan_id.clone(),
        date_key,
        created_count: records.len(),
        cleaned_count,
        affected_student_count: cohort.len(),
        total_exp_potential,
        affected_classes,
    };

    notifier.plan_published(
        &req.teacher_id,
        &plan_id,
        json!({
            "createdCount": result.created_count,
            "affectedStudentCount": result.affected_student_count,
            "totalExpPotential": result.total_exp_potential,
            "affectedClasses": result.affected_classes,
        }),
    );

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn special(targets: &[&str]) -> PlanTask {
        PlanTask {
            record_type: "special".to_string(),
            title: "Extra set".to_string(),
            exp_awarded: 5,
            category: "personalized".to_string(),
            subcategory: String::new(),
            target_student_names: targets.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn special_allowlist_gates_by_name() {
        let task = special(&["Alice"]);
        assert!(!special_excludes(&task, "Alice"));
        assert!(special_excludes(&task, "Bob"));
    }

    #[test]
    fn empty_allowlist_targets_everyone() {
        let task = special(&[]);
        assert!(!special_excludes(&task, "Bob"));
    }

    #[test]
    fn non_special_types_ignore_the_allowlist() {
        let mut task = special(&["Alice"]);
        task.record_type = "task".to_string();
        assert!(!special_excludes(&task, "Bob"));
    }
}
