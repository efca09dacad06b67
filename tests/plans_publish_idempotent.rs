mod test_support;

use serde_json::json;
use test_support::{request_ok, seed_cohort, spawn_sidecar, temp_dir};

fn plan_params(teacher_id: &str, title: &str) -> serde_json::Value {
    json!({
        "schoolId": "school-1",
        "teacherId": teacher_id,
        "title": title,
        "date": "2024-03-01",
        "coursePositions": {
            "math": { "unit": "2", "lesson": "4", "title": "Long division" }
        },
        "tasks": [
            {
                "type": "task",
                "title": "Worksheet",
                "expAwarded": 5,
                "content": { "category": "math", "subcategory": "practice" }
            }
        ]
    })
}

#[test]
fn republish_replaces_auto_records_and_spares_overrides() {
    let workspace = temp_dir("classtask-republish");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let cohort = seed_cohort(&mut stdin, &mut reader, "school-1", &["Alice", "Bob"]);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "plans.publish",
        plan_params(&cohort.teacher_id, "Morning plan"),
    );
    assert_eq!(first.get("createdCount").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(first.get("cleanedCount").and_then(|v| v.as_i64()), Some(0));

    // A teacher hand-places an extra record for Alice on the same day.
    let manual = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "records.createManual",
        json!({
            "schoolId": "school-1",
            "studentId": cohort.student_ids[0],
            "type": "task",
            "title": "Make-up assignment",
            "category": "personalized",
            "date": "2024-03-01",
            "exp": 6
        }),
    );
    let manual_id = manual
        .get("recordId")
        .and_then(|v| v.as_str())
        .expect("recordId")
        .to_string();

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "plans.publish",
        plan_params(&cohort.teacher_id, "Corrected plan"),
    );
    // The two auto records from the first publish are swept; the manual
    // record is overridden and stays put.
    assert_eq!(second.get("cleanedCount").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(second.get("createdCount").and_then(|v| v.as_i64()), Some(2));

    let alice = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "records.dailyList",
        json!({
            "schoolId": "school-1",
            "studentId": cohort.student_ids[0],
            "date": "2024-03-01"
        }),
    );
    let records = alice.get("records").and_then(|v| v.as_array()).expect("records");
    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .any(|r| r.get("id").and_then(|v| v.as_str()) == Some(manual_id.as_str())));

    let bob = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "records.dailyList",
        json!({
            "schoolId": "school-1",
            "studentId": cohort.student_ids[1],
            "date": "2024-03-01"
        }),
    );
    assert_eq!(
        bob.get("records").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );

    // Both plans remain in the archive; only the records were replaced.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "plans.list",
        json!({ "schoolId": "school-1" }),
    );
    assert_eq!(listed.get("total").and_then(|v| v.as_i64()), Some(2));
}
