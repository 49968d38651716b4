use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

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

fn handle_degree_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let name = match param_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let degree_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO degrees(id, name) VALUES(?, ?)",
        (&degree_id, &name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "degrees" })),
        );
    }
    ok(&req.id, json!({ "degreeId": degree_id }))
}

fn handle_course_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let degree_id = match param_str(req, "degreeId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let code = match param_str(req, "code") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = match param_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let credit_hours = req
        .params
        .get("creditHours")
        .and_then(|v| v.as_f64())
        .unwrap_or(3.0);

    let course_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO courses(id, degree_id, code, title, credit_hours)
         VALUES(?, ?, ?, ?, ?)",
        (&course_id, &degree_id, &code, &title, credit_hours),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }
    ok(&req.id, json!({ "courseId": course_id }))
}

fn handle_offering_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let course_id = match param_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_session = match param_str(req, "academicSession") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester = match param_str(req, "semester") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let offering_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO course_offerings(id, course_id, academic_session, semester)
         VALUES(?, ?, ?, ?)",
        (&offering_id, &course_id, &academic_session, &semester),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "course_offerings" })),
        );
    }
    ok(&req.id, json!({ "offeringId": offering_id }))
}

fn handle_student_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let reg_no = match param_str(req, "regNo") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match param_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, reg_no, name) VALUES(?, ?, ?)",
        (&student_id, &reg_no, &name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    ok(&req.id, json!({ "studentId": student_id }))
}

/// Replace the full enrollment list of an offering atomically.
fn handle_enrollments_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let offering_id = match param_str(req, "offeringId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_ids: Vec<String> = match req.params.get("studentIds").and_then(|v| v.as_array()) {
        Some(arr) => {
            let mut out = Vec::with_capacity(arr.len());
            for v in arr {
                let Some(s) = v.as_str() else {
                    return err(
                        &req.id,
                        "bad_params",
                        "studentIds must be an array of strings",
                        None,
                    );
                };
                out.push(s.to_string());
            }
            out
        }
        None => return err(&req.id, "bad_params", "missing params.studentIds", None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "DELETE FROM enrollments WHERE offering_id = ?",
        [&offering_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "enrollments" })),
        );
    }
    for sid in &student_ids {
        if let Err(e) = tx.execute(
            "INSERT INTO enrollments(offering_id, student_id) VALUES(?, ?)",
            (&offering_id, sid),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "enrollments", "studentId": sid })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "enrolled": student_ids.len() }))
}

fn handle_clo_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let course_id = match param_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let code = match param_str(req, "code") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let description = req
        .params
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let clo_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO clos(id, course_id, code, description) VALUES(?, ?, ?, ?)",
        (&clo_id, &course_id, &code, &description),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "clos" })),
        );
    }
    ok(&req.id, json!({ "cloId": clo_id }))
}

fn handle_plo_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let degree_id = match param_str(req, "degreeId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let code = match param_str(req, "code") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let description = req
        .params
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let plo_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO plos(id, degree_id, code, description) VALUES(?, ?, ?, ?)",
        (&plo_id, &degree_id, &code, &description),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "plos" })),
        );
    }
    ok(&req.id, json!({ "ploId": plo_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.degreeCreate" => Some(handle_degree_create(state, req)),
        "setup.courseCreate" => Some(handle_course_create(state, req)),
        "setup.offeringCreate" => Some(handle_offering_create(state, req)),
        "setup.studentCreate" => Some(handle_student_create(state, req)),
        "setup.enrollmentsSet" => Some(handle_enrollments_set(state, req)),
        "setup.cloCreate" => Some(handle_clo_create(state, req)),
        "setup.ploCreate" => Some(handle_plo_create(state, req)),
        _ => None,
    }
}
