use crate::content::{TaskContent, STATUS_COMPLETED, STATUS_PENDING, TYPE_QC, TYPE_TASK};
use crate::notify::Notifier;
use crate::store::{self, NewTaskRecord};
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension};

pub struct SettlementResult {
    pub count: usize,
    pub total_exp_awarded: i64,
}

pub enum SettleError {
    StudentNotFound,
    Db(rusqlite::Error),
}

impl From<rusqlite::Error> for SettleError {
    fn from(e: rusqlite::Error) -> Self {
        SettleError::Db(e)
    }
}

/// End-of-day close-out for one student.
///
/// Flips the outstanding checklist work to completed, sums today's
/// unsettled completed rewards plus the bonus, applies the cumulative
/// experience increment exactly once, and writes one terminal summary
/// record. The whole read-then-write sequence runs in a transaction and the
/// summed records are stamped `settled_at` inside it, so a second
/// invocation finds nothing left to award.
pub fn settle_day(
    conn: &Connection,
    notifier: &mut dyn Notifier,
    school_id: &str,
    student_id: &str,
    bonus_exp: i64,
) -> Result<SettlementResult, SettleError> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ? AND school_id = ?",
            params![student_id, school_id],
            |r| r.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Err(SettleError::StudentNotFound);
    }

    let today = store::today_key();
    let ts = store::now_ms();
    let tx = conn.unchecked_transaction()?;

    // Bulk pending -> completed is an explicit teacher action, so the rows
    // are marked overridden and survive later cleanup passes.
    tx.execute(
        "UPDATE task_records
         SET status = ?, is_overridden = 1, submitted_at = ?, updated_at = ?
         WHERE school_id = ? AND student_id = ? AND status = ? AND type IN (?, ?)",
        params![
            STATUS_COMPLETED,
            ts,
            ts,
            school_id,
            student_id,
            STATUS_PENDING,
            TYPE_QC,
            TYPE_TASK
        ],
    )?;

    // Today's unsettled completions. Earlier settlements are excluded twice
    // over: their rows carry settled_at, and their summary records carry the
    // settlement flag.
    let mut stmt = tx.prepare(
        "SELECT id, exp_awarded FROM task_records
         WHERE school_id = ? AND student_id = ?
           AND status = ?
           AND settled_at IS NULL
           AND json_extract(content_json, '$.taskDate') = ?
           AND COALESCE(json_extract(content_json, '$.settlement'), 0) = 0",
    )?;
    let rows = stmt
        .query_map(
            params![school_id, student_id, STATUS_COMPLETED, today],
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    drop(stmt);

    let count = rows.len();
    let summed: i64 = rows.iter().map(|(_, exp)| exp).sum();
    let total = summed + bonus_exp;

    if total > 0 {
        tx.execute(
            "UPDATE students SET exp = exp + ?, updated_at = ? WHERE id = ?",
            params![total, ts, student_id],
        )?;

        if !rows.is_empty() {
            let sql = format!(
                "UPDATE task_records SET settled_at = ? WHERE id IN ({})",
                vec!["?"; rows.len()].join(", ")
            );
            let mut values: Vec<Value> = Vec::with_capacity(rows.len() + 1);
            values.push(Value::Integer(ts));
            for (id, _) in &rows {
                values.push(Value::Text(id.clone()));
            }
            tx.execute(&sql, params_from_iter(values))?;
        }

        let mut content = TaskContent::default();
        content.task_date = Some(today.clone());
        content.settlement = Some(true);
        content.task_count = Some(count as i64);
        content.total_exp_awarded = Some(total);
        content.exp_bonus = Some(bonus_exp);
        content.teacher_message = Some(format!(
            "Cleared all {} tasks for the day and earned a {} exp bonus. Great work!",
            count, bonus_exp
        ));
        store::insert_task_records(
            &tx,
            &[NewTaskRecord {
                id: store::new_id(),
                school_id: school_id.to_string(),
                student_id: student_id.to_string(),
                lesson_plan_id: None,
                record_type: TYPE_TASK.to_string(),
                title: "Daily settlement".to_string(),
                category: "task".to_string(),
                status: STATUS_COMPLETED.to_string(),
                exp_awarded: 0,
                is_overridden: true,
                content,
                settled_at: Some(ts),
            }],
        )?;
    }

    tx.commit()?;
    notifier.student_data_changed(student_id);

    Ok(SettlementResult {
        count,
        total_exp_awarded: total,
    })
}
