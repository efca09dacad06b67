use serde::{Deserialize, Serialize};

pub const TYPE_QC: &str = "qc";
pub const TYPE_TASK: &str = "task";
pub const TYPE_SPECIAL: &str = "special";

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_SUBMITTED: &str = "submitted";
pub const STATUS_COMPLETED: &str = "completed";

/// Record kinds a plan publish may emit, and therefore the only kinds the
/// same-day cleanup pass is allowed to purge.
pub const AUTO_DISTRIBUTABLE_TYPES: [&str; 6] =
    ["qc", "task", "special", "homework", "daily", "quiz"];

pub fn valid_record_type(t: &str) -> bool {
    matches!(
        t,
        "qc" | "task" | "special" | "challenge" | "homework" | "daily" | "quiz"
    )
}

pub fn valid_status(s: &str) -> bool {
    matches!(s, STATUS_PENDING | STATUS_SUBMITTED | STATUS_COMPLETED)
}

/// One subject's course position: which unit/lesson the cohort is on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoursePosition {
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub lesson: String,
    #[serde(default)]
    pub title: String,
}

impl CoursePosition {
    pub fn new(unit: &str, lesson: &str, title: &str) -> Self {
        CoursePosition {
            unit: unit.to_string(),
            lesson: lesson.to_string(),
            title: title.to_string(),
        }
    }
}

/// The per-subject course-position map carried by plans and overrides.
///
/// Subjects are a fixed struct rather than a free map so that the shape the
/// resolver and the daily views depend on cannot drift between writers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourseInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chinese: Option<CoursePosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub math: Option<CoursePosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub english: Option<CoursePosition>,
}

impl CourseInfo {
    pub fn get(&self, subject: &str) -> Option<&CoursePosition> {
        match subject {
            "chinese" => self.chinese.as_ref(),
            "math" => self.math.as_ref(),
            "english" => self.english.as_ref(),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chinese.is_none() && self.math.is_none() && self.english.is_none()
    }
}

/// Snapshot used when a student has neither a plan nor an override yet.
pub fn default_course_info() -> CourseInfo {
    CourseInfo {
        chinese: Some(CoursePosition::new("1", "1", "Default lesson")),
        math: Some(CoursePosition::new("1", "1", "Default lesson")),
        english: Some(CoursePosition::new("1", "1", "Default lesson")),
    }
}

/// The persisted content blob of a task record.
///
/// Historical records are read by multiple components, so the key names here
/// are a compatibility contract: `taskDate`, `category`, `subcategory` and
/// `courseInfo` must keep their shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_date: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subcategory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lesson: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_info: Option<CourseInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_student_names: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_exp_awarded: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp_bonus: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_message: Option<String>,
}

impl TaskContent {
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_json_str(raw: &str) -> TaskContent {
        serde_json::from_str(raw).unwrap_or_default()
    }
}

/// Map a free-text business label onto the stored category enum.
pub fn map_business_category(raw: &str) -> &'static str {
    let cat = raw.trim().to_ascii_lowercase();
    if cat.contains("methodolog") {
        return "methodology";
    }
    if cat.contains("personal") || cat.contains("custom") {
        return "personalized";
    }
    if cat.contains("progress") || subject_for_category(&cat).is_some() {
        return "progress";
    }
    // Everything else ("holistic growth" and friends) lands in the general bucket.
    "task"
}

/// Resolve which subject a task's business label belongs to, if any.
///
/// Checked in order: "english" must win before the generic language match,
/// since labels like "english language" contain both.
pub fn subject_for_category(raw: &str) -> Option<&'static str> {
    let cat = raw.trim().to_ascii_lowercase();
    if cat.contains("english") || cat.contains("foreign") {
        return Some("english");
    }
    if cat.contains("math") {
        return Some("math");
    }
    if cat.contains("chinese") || cat.contains("language") || cat.contains("reading") {
        return Some("chinese");
    }
    None
}
