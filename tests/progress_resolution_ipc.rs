mod test_support;

use serde_json::json;
use std::thread::sleep;
use std::time::Duration;
use test_support::{request_err, request_ok, seed_cohort, spawn_sidecar, temp_dir};

fn plan_with_math_unit(teacher_id: &str, unit: &str) -> serde_json::Value {
    json!({
        "schoolId": "school-1",
        "teacherId": teacher_id,
        "title": format!("Plan unit {}", unit),
        "date": "2024-03-01",
        "coursePositions": {
            "math": { "unit": unit, "lesson": "1", "title": "Numbers" }
        },
        "tasks": [
            {
                "type": "task",
                "title": "Worksheet",
                "expAwarded": 5,
                "content": { "category": "math" }
            }
        ]
    })
}

#[test]
fn effective_progress_follows_the_most_recent_writer() {
    let workspace = temp_dir("classtask-progress");
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

    // No plan, no override: defaults.
    let progress = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "progress.getEffective",
        json!({ "studentId": student_id }),
    );
    assert_eq!(progress.get("source").and_then(|v| v.as_str()), Some("default"));
    assert_eq!(
        progress.pointer("/positions/math/unit").and_then(|v| v.as_str()),
        Some("1")
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "plans.publish",
        plan_with_math_unit(&cohort.teacher_id, "3"),
    );
    let progress = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "progress.getEffective",
        json!({ "studentId": student_id }),
    );
    assert_eq!(
        progress.get("source").and_then(|v| v.as_str()),
        Some("lesson_plan")
    );
    assert_eq!(
        progress.pointer("/positions/math/unit").and_then(|v| v.as_str()),
        Some("3")
    );

    // A strictly newer correction beats the plan.
    sleep(Duration::from_millis(30));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "progress.override",
        json!({
            "schoolId": "school-1",
            "studentId": student_id,
            "courseInfo": {
                "math": { "unit": "5", "lesson": "2", "title": "Fractions" }
            },
            "note": "Skipped ahead after assessment"
        }),
    );
    let progress = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "progress.getEffective",
        json!({ "studentId": student_id }),
    );
    assert_eq!(progress.get("source").and_then(|v| v.as_str()), Some("override"));
    assert_eq!(
        progress.pointer("/positions/math/unit").and_then(|v| v.as_str()),
        Some("5")
    );
    // The winner supplies the whole snapshot; the plan's other subjects do
    // not bleed through.
    assert!(progress
        .pointer("/positions/chinese")
        .map(|v| v.is_null())
        .unwrap_or(true));

    // A newer plan re-publish takes over again.
    sleep(Duration::from_millis(30));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "plans.publish",
        plan_with_math_unit(&cohort.teacher_id, "4"),
    );
    let progress = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "progress.getEffective",
        json!({ "studentId": student_id }),
    );
    assert_eq!(
        progress.get("source").and_then(|v| v.as_str()),
        Some("lesson_plan")
    );
    assert_eq!(
        progress.pointer("/positions/math/unit").and_then(|v| v.as_str()),
        Some("4")
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "progress.getEffective",
        json!({ "studentId": "missing" }),
    );
    assert_eq!(code, "not_found");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "progress.override",
        json!({ "schoolId": "school-1", "studentId": student_id, "courseInfo": {} }),
    );
    assert_eq!(code, "bad_params");
}
