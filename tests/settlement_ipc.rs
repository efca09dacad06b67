mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, seed_cohort, spawn_sidecar, temp_dir};

fn manual_record(student_id: &str, title: &str, status: &str, exp: i64) -> serde_json::Value {
    // No date: the record lands on today, which is the day settlement closes.
    json!({
        "schoolId": "school-1",
        "studentId": student_id,
        "type": "task",
        "title": title,
        "category": "personalized",
        "status": status,
        "exp": exp
    })
}

fn student_exp(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
    id: &str,
    student_id: &str,
) -> i64 {
    let listed = request_ok(
        stdin,
        reader,
        id,
        "students.list",
        json!({ "schoolId": "school-1" }),
    );
    listed
        .get("students")
        .and_then(|v| v.as_array())
        .and_then(|arr| {
            arr.iter()
                .find(|s| s.get("id").and_then(|v| v.as_str()) == Some(student_id))
        })
        .and_then(|s| s.get("exp"))
        .and_then(|v| v.as_i64())
        .expect("student exp")
}

#[test]
fn settlement_awards_once_and_is_idempotent() {
    let workspace = temp_dir("classtask-settle");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let cohort = seed_cohort(&mut stdin, &mut reader, "school-1", &["Alice"]);
    let student_id = cohort.student_ids[0].clone();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "records.createManual",
        manual_record(&student_id, "Science project", "completed", 5),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "records.createManual",
        manual_record(&student_id, "Art journal", "completed", 8),
    );
    // Still pending at close-out; the settlement flips it.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "records.createManual",
        manual_record(&student_id, "Tidy desk", "pending", 0),
    );

    let settled = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "settlement.settleDay",
        json!({ "schoolId": "school-1", "studentId": student_id, "bonusExp": 3 }),
    );
    assert_eq!(settled.get("count").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(
        settled.get("totalExpAwarded").and_then(|v| v.as_i64()),
        Some(5 + 8 + 0 + 3)
    );
    assert_eq!(student_exp(&mut stdin, &mut reader, "6", &student_id), 16);

    // A double-click settles nothing new.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "settlement.settleDay",
        json!({ "schoolId": "school-1", "studentId": student_id, "bonusExp": 0 }),
    );
    assert_eq!(again.get("count").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(again.get("totalExpAwarded").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(student_exp(&mut stdin, &mut reader, "8", &student_id), 16);

    // The close-out left exactly one summary record behind.
    let history = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "records.history",
        json!({ "schoolId": "school-1", "studentId": student_id }),
    );
    let records = history.get("records").and_then(|v| v.as_array()).expect("records");
    let summaries: Vec<_> = records
        .iter()
        .filter(|r| {
            r.pointer("/content/settlement").and_then(|v| v.as_bool()) == Some(true)
        })
        .collect();
    assert_eq!(summaries.len(), 1);
    assert_eq!(
        summaries[0]
            .pointer("/content/totalExpAwarded")
            .and_then(|v| v.as_i64()),
        Some(16)
    );
    assert_eq!(
        summaries[0].pointer("/content/taskCount").and_then(|v| v.as_i64()),
        Some(3)
    );
    // All three task rows carry the settlement stamp now.
    let stamped = records
        .iter()
        .filter(|r| {
            r.get("settledAt").and_then(|v| v.as_i64()).is_some()
                && r.pointer("/content/settlement").is_none()
        })
        .count();
    assert_eq!(stamped, 3);
}

#[test]
fn settlement_with_nothing_to_award_is_a_no_op() {
    let workspace = temp_dir("classtask-settle-empty");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let cohort = seed_cohort(&mut stdin, &mut reader, "school-1", &["Bob"]);
    let student_id = cohort.student_ids[0].clone();

    let settled = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "settlement.settleDay",
        json!({ "schoolId": "school-1", "studentId": student_id, "bonusExp": 0 }),
    );
    assert_eq!(settled.get("count").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(settled.get("totalExpAwarded").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(student_exp(&mut stdin, &mut reader, "3", &student_id), 0);

    // A bonus with no task work still counts as an award.
    let bonus_only = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "settlement.settleDay",
        json!({ "schoolId": "school-1", "studentId": student_id, "bonusExp": 2 }),
    );
    assert_eq!(bonus_only.get("count").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(
        bonus_only.get("totalExpAwarded").and_then(|v| v.as_i64()),
        Some(2)
    );
    assert_eq!(student_exp(&mut stdin, &mut reader, "5", &student_id), 2);

    let code = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "settlement.settleDay",
        json!({ "schoolId": "school-1", "studentId": "missing", "bonusExp": 0 }),
    );
    assert_eq!(code, "not_found");
}
