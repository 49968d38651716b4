use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
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

fn param_f64(req: &Request, key: &str) -> Result<f64, serde_json::Value> {
    match req.params.get(key).and_then(|v| v.as_f64()) {
        Some(v) => Ok(v),
        None => Err(err(
            &req.id,
            "bad_params",
            format!("missing params.{}", key),
            None,
        )),
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let offering_id = match param_str(req, "offeringId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = match param_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let weightage = match param_f64(req, "weightage") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let total_marks = req
        .params
        .get("totalMarks")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);

    let assessment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO assessments(id, offering_id, title, weightage, total_marks)
         VALUES(?, ?, ?, ?, ?)",
        (&assessment_id, &offering_id, &title, weightage, total_marks),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "assessments" })),
        );
    }
    ok(&req.id, json!({ "assessmentId": assessment_id }))
}

fn handle_question_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let assessment_id = match param_str(req, "assessmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let number = match req.params.get("number").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing params.number", None),
    };
    let max_marks = match param_f64(req, "maxMarks") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if max_marks < 0.0 {
        return err(
            &req.id,
            "bad_params",
            "maxMarks must not be negative",
            Some(json!({ "maxMarks": max_marks })),
        );
    }

    let question_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO questions(id, assessment_id, number, max_marks)
         VALUES(?, ?, ?, ?)",
        (&question_id, &assessment_id, number, max_marks),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "questions" })),
        );
    }
    ok(&req.id, json!({ "questionId": question_id }))
}

/// Bulk upsert of (questionId, studentId, obtained) tuples. A row entered
/// twice takes the last value; absence of a row is "not yet entered".
fn handle_marks_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(entries) = req.params.get("marks").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing params.marks", None);
    };

    let mut parsed: Vec<(String, String, f64)> = Vec::with_capacity(entries.len());
    for (i, e) in entries.iter().enumerate() {
        let question_id = e.get("questionId").and_then(|v| v.as_str());
        let student_id = e.get("studentId").and_then(|v| v.as_str());
        let obtained = e.get("obtained").and_then(|v| v.as_f64());
        let (Some(qid), Some(sid), Some(obtained)) = (question_id, student_id, obtained) else {
            return err(
                &req.id,
                "bad_params",
                "each mark needs questionId, studentId, obtained",
                Some(json!({ "index": i })),
            );
        };
        if obtained < 0.0 {
            return err(
                &req.id,
                "bad_params",
                "negative marks are not allowed",
                Some(json!({ "index": i, "obtained": obtained })),
            );
        }
        parsed.push((qid.to_string(), sid.to_string(), obtained));
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for (qid, sid, obtained) in &parsed {
        if let Err(e) = tx.execute(
            "INSERT INTO marks(question_id, student_id, obtained)
             VALUES(?, ?, ?)
             ON CONFLICT(question_id, student_id) DO UPDATE SET
               obtained = excluded.obtained",
            (qid, sid, obtained),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "marks", "questionId": qid })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "written": parsed.len() }))
}

/// Replace the whole grade scale atomically. Bands are assumed ordered and
/// non-overlapping; the engine does not validate that here.
fn handle_grade_scale_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(bands) = req.params.get("bands").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing params.bands", None);
    };

    let mut parsed: Vec<(f64, f64, String, f64)> = Vec::with_capacity(bands.len());
    for (i, b) in bands.iter().enumerate() {
        let min = b.get("minPercentage").and_then(|v| v.as_f64());
        let max = b.get("maxPercentage").and_then(|v| v.as_f64());
        let letter = b.get("letter").and_then(|v| v.as_str());
        let points = b.get("points").and_then(|v| v.as_f64());
        let (Some(min), Some(max), Some(letter), Some(points)) = (min, max, letter, points) else {
            return err(
                &req.id,
                "bad_params",
                "each band needs minPercentage, maxPercentage, letter, points",
                Some(json!({ "index": i })),
            );
        };
        parsed.push((min, max, letter.to_string(), points));
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute("DELETE FROM grade_points", []) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "grade_points" })),
        );
    }
    for (min, max, letter, points) in &parsed {
        let band_id = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "INSERT INTO grade_points(id, min_percentage, max_percentage, letter, points)
             VALUES(?, ?, ?, ?, ?)",
            (&band_id, min, max, letter, points),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "grade_points" })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "bands": parsed.len() }))
}

fn handle_threshold_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let passing_percentage = match param_f64(req, "passingPercentage") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !(0.0..=100.0).contains(&passing_percentage) {
        return err(
            &req.id,
            "bad_params",
            "passingPercentage must be in [0, 100]",
            Some(json!({ "passingPercentage": passing_percentage })),
        );
    }
    let is_active = req
        .params
        .get("isActive")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let threshold_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO attainment_thresholds(id, passing_percentage, is_active, created_at)
         VALUES(?, ?, ?, ?)",
        (
            &threshold_id,
            passing_percentage,
            is_active as i64,
            Utc::now().to_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "attainment_thresholds" })),
        );
    }
    ok(&req.id, json!({ "thresholdId": threshold_id }))
}

fn handle_threshold_active(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match calc::resolve_threshold(conn) {
        Ok(v) => ok(&req.id, json!({ "passingPercentage": v })),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

/// Replace all survey rows for one (offering, CLO) pair atomically.
fn handle_survey_set(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let Some(scores) = req.params.get("averageScores").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing params.averageScores", None);
    };
    let mut parsed: Vec<f64> = Vec::with_capacity(scores.len());
    for (i, s) in scores.iter().enumerate() {
        let Some(v) = s.as_f64() else {
            return err(
                &req.id,
                "bad_params",
                "averageScores must be numbers",
                Some(json!({ "index": i })),
            );
        };
        if !(0.0..=calc::SURVEY_SCALE_MAX).contains(&v) {
            return err(
                &req.id,
                "bad_params",
                "averageScores must be on the 5-point scale",
                Some(json!({ "index": i, "value": v })),
            );
        }
        parsed.push(v);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "DELETE FROM survey_results WHERE offering_id = ? AND clo_id = ?",
        (&offering_id, &clo_id),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "survey_results" })),
        );
    }
    for v in &parsed {
        let row_id = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "INSERT INTO survey_results(id, offering_id, clo_id, average_score)
             VALUES(?, ?, ?, ?)",
            (&row_id, &offering_id, &clo_id, v),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "survey_results" })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "rows": parsed.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assessments.create" => Some(handle_create(state, req)),
        "assessments.questionCreate" => Some(handle_question_create(state, req)),
        "assessments.marksSet" => Some(handle_marks_set(state, req)),
        "assessments.gradeScaleSet" => Some(handle_grade_scale_set(state, req)),
        "assessments.thresholdSet" => Some(handle_threshold_set(state, req)),
        "assessments.thresholdActive" => Some(handle_threshold_active(state, req)),
        "assessments.surveySet" => Some(handle_survey_set(state, req)),
        _ => None,
    }
}
