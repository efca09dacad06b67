mod test_support;

use serde_json::json;
use std::io::{BufRead, Write};
use test_support::{request_ok, seed_cohort, spawn_sidecar, temp_dir};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("classtask-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let cohort = seed_cohort(&mut stdin, &mut reader, "school-1", &["Alice"]);

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.list",
        json!({ "schoolId": "school-1", "teacherId": cohort.teacher_id }),
    );
    assert_eq!(
        listed.get("students").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );

    // First catalog list seeds the shared defaults.
    let catalog = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "library.list",
        json!({ "schoolId": "school-1" }),
    );
    assert!(
        catalog
            .get("items")
            .and_then(|v| v.as_array())
            .map(|a| !a.is_empty())
            .unwrap_or(false),
        "catalog should be seeded on first list"
    );

    let latest = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "plans.latest",
        json!({ "schoolId": "school-1", "teacherId": cohort.teacher_id }),
    );
    assert!(latest.get("plan").map(|v| v.is_null()).unwrap_or(false));

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "records.history",
        json!({ "schoolId": "school-1", "studentId": cohort.student_ids[0] }),
    );
    assert_eq!(
        history.get("records").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    let drained = request_ok(&mut stdin, &mut reader, "7", "events.drain", json!({}));
    assert!(drained.get("events").and_then(|v| v.as_array()).is_some());

    // Unknown methods fall off the end of the router chain.
    writeln!(
        stdin,
        "{}",
        json!({ "id": "8", "method": "no.suchMethod", "params": {} })
    )
    .expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let resp: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response");
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_implemented")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
