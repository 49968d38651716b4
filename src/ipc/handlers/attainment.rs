use crate::calc::{self, CalcContext};
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

fn calc_err(id: &str, e: calc::CalcError) -> serde_json::Value {
    err(id, &e.code, e.message, e.details)
}

fn course_id_of_offering(conn: &Connection, offering_id: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT course_id FROM course_offerings WHERE id = ?",
        [offering_id],
        |r| r.get(0),
    )
    .optional()
}

fn handle_compute_clo(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let offering_id = match param_str(req, "offeringId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let clo_id = match param_str(req, "cloId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let ctx = CalcContext { conn };
    let row = match calc::compute_clo_attainment(&ctx, &offering_id, &clo_id) {
        Ok(v) => v,
        Err(e) => return calc_err(&req.id, e),
    };
    if let Err(e) = calc::persist_clo_summary(conn, &row) {
        return calc_err(&req.id, e);
    }
    ok(&req.id, json!({ "summary": row }))
}

/// Recompute and persist every CLO of the offering's course.
fn handle_compute_course(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let offering_id = match param_str(req, "offeringId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let course_id = match course_id_of_offering(conn, &offering_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "course offering not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let clo_ids: Vec<String> = {
        let mut stmt = match conn
            .prepare("SELECT id FROM clos WHERE course_id = ? ORDER BY code")
        {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match stmt
            .query_map([&course_id], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };
    if clo_ids.is_empty() {
        return err(
            &req.id,
            "no_clos",
            "course has no CLOs to compute",
            Some(json!({ "courseId": course_id })),
        );
    }

    let ctx = CalcContext { conn };
    let mut summaries = Vec::with_capacity(clo_ids.len());
    for clo_id in &clo_ids {
        let row = match calc::compute_clo_attainment(&ctx, &offering_id, clo_id) {
            Ok(v) => v,
            Err(e) => return calc_err(&req.id, e),
        };
        if let Err(e) = calc::persist_clo_summary(conn, &row) {
            return calc_err(&req.id, e);
        }
        summaries.push(row);
    }
    ok(&req.id, json!({ "summaries": summaries }))
}

fn handle_compute_plo(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let degree_id = match param_str(req, "degreeId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_session = match param_str(req, "academicSession") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let plo_id = match param_str(req, "ploId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let ctx = CalcContext { conn };
    let row = match calc::compute_plo_attainment(&ctx, &degree_id, &academic_session, &plo_id) {
        Ok(v) => v,
        Err(e) => return calc_err(&req.id, e),
    };
    if let Err(e) = calc::persist_plo_summary(conn, &row) {
        return calc_err(&req.id, e);
    }
    ok(&req.id, json!({ "summary": row }))
}

/// Recompute and persist every PLO of a degree for one session.
fn handle_compute_program(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let degree_id = match param_str(req, "degreeId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_session = match param_str(req, "academicSession") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let plo_ids: Vec<String> = {
        let mut stmt = match conn
            .prepare("SELECT id FROM plos WHERE degree_id = ? ORDER BY code")
        {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match stmt
            .query_map([&degree_id], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };
    if plo_ids.is_empty() {
        return err(
            &req.id,
            "no_plos",
            "degree has no PLOs to compute",
            Some(json!({ "degreeId": degree_id })),
        );
    }

    let ctx = CalcContext { conn };
    let mut summaries = Vec::with_capacity(plo_ids.len());
    for plo_id in &plo_ids {
        let row = match calc::compute_plo_attainment(&ctx, &degree_id, &academic_session, plo_id) {
            Ok(v) => v,
            Err(e) => return calc_err(&req.id, e),
        };
        if let Err(e) = calc::persist_plo_summary(conn, &row) {
            return calc_err(&req.id, e);
        }
        summaries.push(row);
    }
    ok(&req.id, json!({ "summaries": summaries }))
}

fn handle_clo_summaries(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let offering_id = match param_str(req, "offeringId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT s.clo_id, c.code, s.direct, s.indirect, s.combined, s.threshold, s.attained, s.computed_at
         FROM clo_attainment_summaries s
         JOIN clos c ON c.id = s.clo_id
         WHERE s.offering_id = ?
         ORDER BY c.code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&offering_id], |r| {
            Ok(json!({
                "cloId": r.get::<_, String>(0)?,
                "cloCode": r.get::<_, String>(1)?,
                "direct": r.get::<_, f64>(2)?,
                "indirect": r.get::<_, f64>(3)?,
                "combined": r.get::<_, f64>(4)?,
                "threshold": r.get::<_, f64>(5)?,
                "attained": r.get::<_, i64>(6)? != 0,
                "computedAt": r.get::<_, String>(7)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(list) => ok(&req.id, json!({ "summaries": list })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_plo_summaries(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let degree_id = match param_str(req, "degreeId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_session = match param_str(req, "academicSession") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT s.plo_id, p.code, s.attainment, s.threshold, s.attained, s.computed_at
         FROM plo_attainment_summaries s
         JOIN plos p ON p.id = s.plo_id
         WHERE s.degree_id = ? AND s.academic_session = ?
         ORDER BY p.code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&degree_id, &academic_session), |r| {
            Ok(json!({
                "ploId": r.get::<_, String>(0)?,
                "ploCode": r.get::<_, String>(1)?,
                "attainment": r.get::<_, f64>(2)?,
                "threshold": r.get::<_, f64>(3)?,
                "attained": r.get::<_, i64>(4)? != 0,
                "computedAt": r.get::<_, String>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(list) => ok(&req.id, json!({ "summaries": list })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attainment.computeClo" => Some(handle_compute_clo(state, req)),
        "attainment.computeCourse" => Some(handle_compute_course(state, req)),
        "attainment.computePlo" => Some(handle_compute_plo(state, req)),
        "attainment.computeProgram" => Some(handle_compute_program(state, req)),
        "attainment.cloSummaries" => Some(handle_clo_summaries(state, req)),
        "attainment.ploSummaries" => Some(handle_plo_summaries(state, req)),
        _ => None,
    }
}
