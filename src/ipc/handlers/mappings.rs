use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn param_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.to_string()),
        _ => Err(err(
            &req.id,
            "bad_params",
            format!("missing params.{}", key),
            None,
        )),
    }
}

/// Replace the set of CLOs a question evidences. Delete-then-insert runs in
/// one transaction so a failed insert never leaves the question unlinked.
fn handle_question_clo_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let question_id = match param_str(req, "questionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let clo_ids: Vec<String> = match req.params.get("cloIds").and_then(|v| v.as_array()) {
        Some(arr) => {
            let mut out = Vec::with_capacity(arr.len());
            for v in arr {
                let Some(s) = v.as_str() else {
                    return err(
                        &req.id,
                        "bad_params",
                        "cloIds must be an array of strings",
                        None,
                    );
                };
                out.push(s.to_string());
            }
            out
        }
        None => return err(&req.id, "bad_params", "missing params.cloIds", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM questions WHERE id = ?", [&question_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "question not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "DELETE FROM question_clo_links WHERE question_id = ?",
        [&question_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "question_clo_links" })),
        );
    }
    for clo_id in &clo_ids {
        if let Err(e) = tx.execute(
            "INSERT INTO question_clo_links(question_id, clo_id) VALUES(?, ?)",
            (&question_id, clo_id),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "question_clo_links", "cloId": clo_id })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "linked": clo_ids.len() }))
}

/// Replace all PLO mappings of a CLO using a parameterized batch insert
/// inside one transaction. Strength is Low/Medium/High as 1/2/3, default 2.
fn handle_clo_plo_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let clo_id = match param_str(req, "cloId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(mappings) = req.params.get("mappings").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing params.mappings", None);
    };

    let mut parsed: Vec<(String, i64)> = Vec::with_capacity(mappings.len());
    for (i, m) in mappings.iter().enumerate() {
        let Some(plo_id) = m.get("ploId").and_then(|v| v.as_str()) else {
            return err(
                &req.id,
                "bad_params",
                "each mapping needs ploId",
                Some(json!({ "index": i })),
            );
        };
        let strength = m.get("strength").and_then(|v| v.as_i64()).unwrap_or(2);
        if !(1..=3).contains(&strength) {
            return err(
                &req.id,
                "bad_params",
                "strength must be 1, 2 or 3",
                Some(json!({ "index": i, "strength": strength })),
            );
        }
        parsed.push((plo_id.to_string(), strength));
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = replace_clo_mappings(&tx, &clo_id, &parsed) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "clo_plo_mappings" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "mapped": parsed.len() }))
}

// The prepared statement borrows the connection, so the whole delete/insert
// sequence lives here and the borrow ends before the caller rolls back.
fn replace_clo_mappings(
    conn: &Connection,
    clo_id: &str,
    mappings: &[(String, i64)],
) -> Result<(), rusqlite::Error> {
    conn.execute("DELETE FROM clo_plo_mappings WHERE clo_id = ?", [clo_id])?;
    let mut insert = conn.prepare(
        "INSERT INTO clo_plo_mappings(clo_id, plo_id, strength) VALUES(?, ?, ?)",
    )?;
    for (plo_id, strength) in mappings {
        insert.execute((clo_id, plo_id, strength))?;
    }
    Ok(())
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "mappings.questionCloSet" => Some(handle_question_clo_set(state, req)),
        "mappings.cloPloSet" => Some(handle_clo_plo_set(state, req)),
        _ => None,
    }
}
