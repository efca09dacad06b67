use crate::content::{default_course_info, CourseInfo};
use crate::store;
use rusqlite::{Connection, OptionalExtension};

pub const SOURCE_DEFAULT: &str = "default";
pub const SOURCE_PLAN: &str = "lesson_plan";
pub const SOURCE_OVERRIDE: &str = "override";

pub struct EffectiveProgress {
    pub positions: CourseInfo,
    pub source: &'static str,
    pub updated_at: Option<i64>,
}

pub enum ResolveError {
    StudentNotFound,
    Db(rusqlite::Error),
}

impl From<rusqlite::Error> for ResolveError {
    fn from(e: rusqlite::Error) -> Self {
        ResolveError::Db(e)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Winner {
    Default,
    Plan,
    Override,
}

/// The single "who moved last" decision. The override must be strictly
/// newer; a tie resolves to the plan so the outcome is deterministic.
fn pick_winner(plan_ts: Option<i64>, override_ts: Option<i64>) -> Winner {
    match (plan_ts, override_ts) {
        (None, None) => Winner::Default,
        (Some(_), None) => Winner::Plan,
        (None, Some(_)) => Winner::Override,
        (Some(p), Some(o)) => {
            if o > p {
                Winner::Override
            } else {
                Winner::Plan
            }
        }
    }
}

/// Effective per-subject progress for one student.
///
/// Compares the bound teacher's most recent plan snapshot against the
/// student's most recent teacher-authored override. The winner supplies the
/// whole per-subject map; snapshots are never merged subject-by-subject,
/// because overrides are whole-snapshot corrections and a partial merge
/// would let a stale plan re-overwrite a subject the teacher just fixed.
pub fn effective_progress(
    conn: &Connection,
    student_id: &str,
) -> Result<EffectiveProgress, ResolveError> {
    let student: Option<(String, String)> = conn
        .query_row(
            "SELECT school_id, teacher_id FROM students WHERE id = ?",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((school_id, teacher_id)) = student else {
        return Err(ResolveError::StudentNotFound);
    };

    let plan = store::latest_active_plan(conn, &school_id, &teacher_id)?;
    let plan_side: Option<(CourseInfo, i64)> = plan.and_then(|p| {
        let positions: CourseInfo = p
            .content
            .get("coursePositions")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        // A plan without any position carries no progress signal.
        if positions.is_empty() {
            None
        } else {
            Some((positions, p.updated_at))
        }
    });
    let override_side = store::latest_override_snapshot(conn, student_id)?;

    let winner = pick_winner(
        plan_side.as_ref().map(|(_, ts)| *ts),
        override_side.as_ref().map(|(_, ts)| *ts),
    );
    let chosen = match winner {
        Winner::Default => None,
        Winner::Plan => plan_side.map(|(p, ts)| (p, ts, SOURCE_PLAN)),
        Winner::Override => override_side.map(|(p, ts)| (p, ts, SOURCE_OVERRIDE)),
    };
    Ok(match chosen {
        Some((positions, ts, source)) => EffectiveProgress {
            positions,
            source,
            updated_at: Some(ts),
        },
        None => EffectiveProgress {
            positions: default_course_info(),
            source: SOURCE_DEFAULT,
            updated_at: None,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strictly_newer_override_wins() {
        assert_eq!(pick_winner(Some(100), Some(101)), Winner::Override);
    }

    #[test]
    fn tie_resolves_to_plan() {
        assert_eq!(pick_winner(Some(100), Some(100)), Winner::Plan);
        assert_eq!(pick_winner(Some(100), Some(99)), Winner::Plan);
    }

    #[test]
    fn absent_sides_fall_through() {
        assert_eq!(pick_winner(None, None), Winner::Default);
        assert_eq!(pick_winner(Some(1), None), Winner::Plan);
        assert_eq!(pick_winner(None, Some(1)), Winner::Override);
    }
}
