use crate::calc::{self, CalcContext};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::sync::atomic::AtomicBool;

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

fn handle_compute_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let offering_id = match param_str(req, "offeringId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match param_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let ctx = CalcContext { conn };
    let grade = match calc::compute_student_grade(&ctx, &offering_id, &student_id) {
        Ok(v) => v,
        Err(e) => return calc_err(&req.id, e),
    };
    if let Err(e) = calc::persist_course_result(conn, &offering_id, &grade) {
        return calc_err(&req.id, e);
    }
    ok(&req.id, json!({ "grade": grade }))
}

fn handle_compute_batch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let offering_id = match param_str(req, "offeringId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    // The IPC loop is synchronous, so a request-scoped flag is never raised
    // here; hosts embedding the engine crate can share one across threads.
    let cancel = AtomicBool::new(false);
    let ctx = CalcContext { conn };
    match calc::batch_compute_grades(&ctx, &offering_id, &cancel) {
        Ok(outcome) => ok(&req.id, json!({ "batch": outcome })),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_semester_compute(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match param_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester = match param_str(req, "semester") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let ctx = CalcContext { conn };
    let row = match calc::compute_semester_gpa(&ctx, &student_id, &semester) {
        Ok(v) => v,
        Err(e) => return calc_err(&req.id, e),
    };
    if let Err(e) = calc::persist_semester_result(conn, &row) {
        return calc_err(&req.id, e);
    }
    ok(&req.id, json!({ "semester": row }))
}

fn handle_cgpa(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match param_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let ctx = CalcContext { conn };
    match calc::compute_cgpa(&ctx, &student_id) {
        Ok(v) => ok(&req.id, json!({ "cgpa": v })),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_results(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let offering_id = match param_str(req, "offeringId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT r.student_id, st.reg_no, r.percentage, r.letter_grade, r.grade_points, r.computed_at
         FROM course_results r
         JOIN students st ON st.id = r.student_id
         WHERE r.offering_id = ?
         ORDER BY st.reg_no",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&offering_id], |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "regNo": r.get::<_, String>(1)?,
                "percentage": r.get::<_, f64>(2)?,
                "letterGrade": r.get::<_, String>(3)?,
                "gradePoints": r.get::<_, f64>(4)?,
                "computedAt": r.get::<_, String>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(list) => ok(&req.id, json!({ "results": list })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.computeStudent" => Some(handle_compute_student(state, req)),
        "grades.computeBatch" => Some(handle_compute_batch(state, req)),
        "grades.semesterCompute" => Some(handle_semester_compute(state, req)),
        "grades.cgpa" => Some(handle_cgpa(state, req)),
        "grades.results" => Some(handle_results(state, req)),
        _ => None,
    }
}
