use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_and_notifier, parse_opt_i64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::settle::{self, SettleError};
use serde_json::json;

fn handle_settle_day(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, notifier) = match db_and_notifier(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let bonus_exp = match parse_opt_i64(req.params.get("bonusExp")) {
        Ok(v) => v.unwrap_or(0),
        Err(m) => return err(&req.id, "bad_params", format!("bonusExp {}", m), None),
    };
    if bonus_exp < 0 {
        return err(&req.id, "bad_params", "bonusExp must be >= 0", None);
    }

    match settle::settle_day(conn, notifier, &school_id, &student_id, bonus_exp) {
        Ok(result) => ok(
            &req.id,
            json!({
                "count": result.count,
                "totalExpAwarded": result.total_exp_awarded,
            }),
        ),
        Err(SettleError::StudentNotFound) => err(&req.id, "not_found", "student not found", None),
        Err(SettleError::Db(e)) => err(&req.id, "db_tx_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settlement.settleDay" => Some(handle_settle_day(state, req)),
        _ => None,
    }
}
