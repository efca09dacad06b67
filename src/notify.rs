use serde_json::{json, Value};

/// Post-mutation change notification hook.
///
/// Injected into every mutating operation so nothing reaches for a shared
/// socket handle. Implementations must be infallible: a notification can
/// never fail the mutation it follows.
pub trait Notifier {
    fn plan_published(&mut self, teacher_id: &str, plan_id: &str, stats: Value);
    fn student_data_changed(&mut self, student_id: &str);
}

/// Buffers events until the host shell drains them (`events.drain`) and
/// forwards to its real-time transport.
pub struct EventQueue {
    events: Vec<Value>,
}

impl EventQueue {
    pub fn new() -> Self {
        EventQueue { events: Vec::new() }
    }

    pub fn drain(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.events)
    }
}

impl Notifier for EventQueue {
    fn plan_published(&mut self, teacher_id: &str, plan_id: &str, stats: Value) {
        self.events.push(json!({
            "event": "planPublished",
            "teacherId": teacher_id,
            "planId": plan_id,
            "stats": stats,
        }));
    }

    fn student_data_changed(&mut self, student_id: &str) {
        // Collapse bursts: bulk flips touch many records per student.
        let already = self.events.iter().any(|e| {
            e.get("event").and_then(|v| v.as_str()) == Some("studentDataChanged")
                && e.get("studentId").and_then(|v| v.as_str()) == Some(student_id)
        });
        if !already {
            self.events.push(json!({
                "event": "studentDataChanged",
                "studentId": student_id,
            }));
        }
    }
}
