use crate::catalog;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_bool, parse_opt_i64, parse_opt_string, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::{new_id, now_ms};
use rusqlite::{params, params_from_iter, types::Value, OptionalExtension};
use serde_json::json;

fn is_catalog_admin(role: &str) -> bool {
    matches!(role, "admin" | "platform_admin")
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = catalog::ensure_seeded(conn) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    let mut stmt = match conn.prepare(
        "SELECT id, school_id, name, domain, subcategory, category, description,
                default_exp, type, difficulty, active
         FROM task_library
         WHERE active = 1 AND school_id IN (?, 'default')
         ORDER BY category, difficulty, name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let items = match stmt.query_map([&school_id], |r| {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "schoolId": r.get::<_, String>(1)?,
            "name": r.get::<_, String>(2)?,
            "domain": r.get::<_, String>(3)?,
            "subcategory": r.get::<_, String>(4)?,
            "category": r.get::<_, String>(5)?,
            "description": r.get::<_, Option<String>>(6)?,
            "defaultExp": r.get::<_, i64>(7)?,
            "type": r.get::<_, String>(8)?,
            "difficulty": r.get::<_, Option<i64>>(9)?,
            "active": r.get::<_, i64>(10)? != 0,
        }))
    }) {
        Ok(rows) => match rows.collect::<Result<Vec<_>, _>>() {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "items": items }))
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let role = match required_str(req, "role") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !is_catalog_admin(&role) {
        return err(
            &req.id,
            "forbidden_role",
            "only a school admin may create catalog items",
            None,
        );
    }
    let Some(input) = req.params.get("input").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing input", None);
    };
    let name = match input.get("name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "input.name is required", None),
    };
    let domain = match input.get("domain").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "input.domain is required", None),
    };
    let subcategory = match parse_opt_string(input.get("subcategory")) {
        Ok(v) => v.unwrap_or_default(),
        Err(m) => return err(&req.id, "bad_params", format!("input.subcategory {}", m), None),
    };
    let default_exp = match input.get("defaultExp").and_then(|v| v.as_i64()) {
        Some(v) if v >= 0 => v,
        _ => return err(&req.id, "bad_params", "input.defaultExp must be >= 0", None),
    };
    let record_type = match input.get("type").and_then(|v| v.as_str()) {
        Some(v) if crate::content::valid_record_type(v) => v.to_string(),
        _ => return err(&req.id, "bad_params", "input.type is not a known task type", None),
    };
    let difficulty = match parse_opt_i64(input.get("difficulty")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("input.difficulty {}", m), None),
    };
    let description = match parse_opt_string(input.get("description")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("input.description {}", m), None),
    };
    let active = match parse_bool(input.get("active"), true) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("input.active {}", m), None),
    };

    let duplicate = match conn
        .query_row(
            "SELECT 1 FROM task_library
             WHERE school_id = ? AND domain = ? AND subcategory = ? AND name = ? AND active = 1",
            params![school_id, domain, subcategory, name],
            |_r| Ok(()),
        )
        .optional()
    {
        Ok(v) => v.is_some(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if duplicate {
        return err(&req.id, "duplicate", "catalog item already exists", None);
    }

    let item_id = new_id();
    if let Err(e) = conn.execute(
        "INSERT INTO task_library(
            id, school_id, name, domain, subcategory, category, description,
            default_exp, type, difficulty, active, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            item_id,
            school_id,
            name,
            domain,
            subcategory,
            subcategory,
            description,
            default_exp,
            record_type,
            difficulty,
            if active { 1 } else { 0 },
            now_ms()
        ],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "itemId": item_id }))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let item_id = match required_str(req, "itemId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let role = match required_str(req, "role") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !is_catalog_admin(&role) {
        return err(
            &req.id,
            "forbidden_role",
            "only a school admin may update catalog items",
            None,
        );
    }
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    let exists = match conn
        .query_row("SELECT 1 FROM task_library WHERE id = ?", [&item_id], |_r| Ok(()))
        .optional()
    {
        Ok(v) => v.is_some(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !exists {
        return err(&req.id, "not_found", "catalog item not found", None);
    }

    let mut fields: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    for (k, v) in patch {
        match k.as_str() {
            "name" => {
                let Some(s) = v.as_str() else {
                    return err(&req.id, "bad_params", "patch.name must be string", None);
                };
                let s = s.trim();
                if s.is_empty() {
                    return err(&req.id, "bad_params", "patch.name must not be empty", None);
                }
                fields.push("name = ?".to_string());
                values.push(Value::Text(s.to_string()));
            }
            "domain" => {
                let Some(s) = v.as_str() else {
                    return err(&req.id, "bad_params", "patch.domain must be string", None);
                };
                fields.push("domain = ?".to_string());
                values.push(Value::Text(s.trim().to_string()));
            }
            "subcategory" => {
                let Some(s) = v.as_str() else {
                    return err(&req.id, "bad_params", "patch.subcategory must be string", None);
                };
                fields.push("subcategory = ?".to_string());
                values.push(Value::Text(s.trim().to_string()));
                fields.push("category = ?".to_string());
                values.push(Value::Text(s.trim().to_string()));
            }
            "description" => {
                if v.is_null() {
                    fields.push("description = ?".to_string());
                    values.push(Value::Null);
                } else if let Some(s) = v.as_str() {
                    fields.push("description = ?".to_string());
                    values.push(Value::Text(s.to_string()));
                } else {
                    return err(&req.id, "bad_params", "patch.description must be string or null", None);
                }
            }
            "defaultExp" => {
                let Some(n) = v.as_i64().filter(|n| *n >= 0) else {
                    return err(&req.id, "bad_params", "patch.defaultExp must be >= 0", None);
                };
                fields.push("default_exp = ?".to_string());
                values.push(Value::Integer(n));
            }
            "active" => {
                let Some(b) = v.as_bool() else {
                    return err(&req.id, "bad_params", "patch.active must be boolean", None);
                };
                fields.push("active = ?".to_string());
                values.push(Value::Integer(if b { 1 } else { 0 }));
            }
            _ => return err(&req.id, "bad_params", format!("unknown patch field: {}", k), None),
        }
    }
    if fields.is_empty() {
        return ok(&req.id, json!({ "ok": true }));
    }
    fields.push("updated_at = ?".to_string());
    values.push(Value::Integer(now_ms()));
    values.push(Value::Text(item_id));
    let sql = format!("UPDATE task_library SET {} WHERE id = ?", fields.join(", "));
    if let Err(e) = conn.execute(&sql, params_from_iter(values)) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let item_id = match required_str(req, "itemId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let role = match required_str(req, "role") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !is_catalog_admin(&role) {
        return err(
            &req.id,
            "forbidden_role",
            "only a school admin may delete catalog items",
            None,
        );
    }

    let owner: Option<String> = match conn
        .query_row("SELECT school_id FROM task_library WHERE id = ?", [&item_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(owner) = owner else {
        return err(&req.id, "not_found", "catalog item not found", None);
    };

    // Shared defaults and foreign-school entries need platform authority.
    if owner == "default" || owner == "system" {
        if role != "platform_admin" {
            return err(
                &req.id,
                "forbidden_role",
                "system catalog entries can only be removed by a platform admin",
                None,
            );
        }
    } else if owner != school_id && role != "platform_admin" {
        return err(
            &req.id,
            "forbidden_role",
            "cannot delete another school's catalog entry",
            None,
        );
    }

    if let Err(e) = conn.execute(
        "UPDATE task_library SET active = 0, updated_at = ? WHERE id = ?",
        params![now_ms(), item_id],
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "library.list" => Some(handle_list(state, req)),
        "library.create" => Some(handle_create(state, req)),
        "library.update" => Some(handle_update(state, req)),
        "library.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
