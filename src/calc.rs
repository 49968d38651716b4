use chrono::Utc;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Fixed direct/indirect evidence blend for CLO attainment.
pub const DIRECT_WEIGHT: f64 = 0.8;
pub const INDIRECT_WEIGHT: f64 = 0.2;

/// Applied when no active threshold row exists.
pub const DEFAULT_PASSING_PERCENTAGE: f64 = 50.0;

/// Survey instruments report on a fixed 5-point scale.
pub const SURVEY_SCALE_MAX: f64 = 5.0;

/// Half-up 2-decimal rounding used for GPA values:
/// `Int(100*x + 0.5) / 100`
pub fn round2(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

fn clamp_percent(p: f64) -> f64 {
    p.clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

fn db_err(e: rusqlite::Error) -> CalcError {
    CalcError::new("db_query_failed", e.to_string())
}

#[derive(Debug, Clone)]
pub struct CalcContext<'a> {
    pub conn: &'a Connection,
}

/// Per-student obtained/possible sums over one question set. A missing mark
/// row contributes 0 to obtained while the question's max_marks still counts
/// toward possible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkTotals {
    pub obtained: f64,
    pub possible: f64,
}

impl MarkTotals {
    /// None when possible is 0: the student has no evaluable marks and is
    /// excluded from downstream denominators.
    pub fn percentage(&self) -> Option<f64> {
        if self.possible > 0.0 {
            Some(100.0 * self.obtained / self.possible)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectAttainment {
    pub percent: f64,
    pub evaluated_count: usize,
    pub attained_count: usize,
}

/// Cohort-level direct attainment: share of evaluable students whose
/// percentage meets the threshold. Students with possible == 0 are excluded
/// from both counts.
pub fn direct_attainment<I>(totals: I, threshold: f64) -> DirectAttainment
where
    I: IntoIterator<Item = MarkTotals>,
{
    let mut evaluated_count: usize = 0;
    let mut attained_count: usize = 0;

    for t in totals {
        let Some(pct) = t.percentage() else {
            continue;
        };
        evaluated_count += 1;
        if pct >= threshold {
            attained_count += 1;
        }
    }

    let percent = if evaluated_count > 0 {
        100.0 * (attained_count as f64) / (evaluated_count as f64)
    } else {
        0.0
    };

    DirectAttainment {
        percent,
        evaluated_count,
        attained_count,
    }
}

/// Survey-based attainment: mean of the 5-point averages, as a percentage.
pub fn indirect_attainment(average_scores: &[f64]) -> f64 {
    if average_scores.is_empty() {
        return 0.0;
    }
    let mean = average_scores.iter().sum::<f64>() / (average_scores.len() as f64);
    clamp_percent(100.0 * mean / SURVEY_SCALE_MAX)
}

pub fn combine_attainment(direct: f64, indirect: f64) -> f64 {
    direct * DIRECT_WEIGHT + indirect * INDIRECT_WEIGHT
}

/// Un-normalized weighted course percentage: each assessment contributes
/// percent * weightage / 100. When weightages do not sum to 100 the result
/// is proportionally skewed; callers get the weightage total to warn on.
pub fn weighted_final_percentage<I>(scores: I) -> f64
where
    I: IntoIterator<Item = (f64, f64)>,
{
    scores.into_iter().map(|(pct, w)| pct * w / 100.0).sum()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    pub min_percentage: f64,
    pub max_percentage: f64,
    pub letter: String,
    pub points: f64,
}

/// First band (in min_percentage order) whose inclusive range contains the
/// percentage; `F`/0.0 when nothing matches.
pub fn grade_for_percentage(bands: &[GradeBand], percentage: f64) -> (String, f64) {
    for b in bands {
        if percentage >= b.min_percentage && percentage <= b.max_percentage {
            return (b.letter.clone(), b.points);
        }
    }
    ("F".to_string(), 0.0)
}

pub fn load_grade_bands(conn: &Connection) -> Result<Vec<GradeBand>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT min_percentage, max_percentage, letter, points
             FROM grade_points
             ORDER BY min_percentage",
        )
        .map_err(db_err)?;
    stmt.query_map([], |r| {
        Ok(GradeBand {
            min_percentage: r.get(0)?,
            max_percentage: r.get(1)?,
            letter: r.get(2)?,
            points: r.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

/// Passing percentage of the most recently created active threshold row;
/// 50 when none is active.
pub fn resolve_threshold(conn: &Connection) -> Result<f64, CalcError> {
    let row: Option<f64> = conn
        .query_row(
            "SELECT passing_percentage
             FROM attainment_thresholds
             WHERE is_active = 1
             ORDER BY created_at DESC, rowid DESC
             LIMIT 1",
            [],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    Ok(row.unwrap_or(DEFAULT_PASSING_PERCENTAGE))
}

pub fn enrolled_students(conn: &Connection, offering_id: &str) -> Result<Vec<String>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT student_id FROM enrollments
             WHERE offering_id = ?
             ORDER BY student_id",
        )
        .map_err(db_err)?;
    stmt.query_map([offering_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)
}

/// One batched read of all (question, student) -> obtained tuples for the
/// given question set, replacing the reference's per-row query loop.
fn load_marks(
    conn: &Connection,
    question_ids: &[String],
) -> Result<HashMap<(String, String), f64>, CalcError> {
    let mut by_pair: HashMap<(String, String), f64> = HashMap::new();
    if question_ids.is_empty() {
        return Ok(by_pair);
    }

    let placeholders = std::iter::repeat("?")
        .take(question_ids.len())
        .collect::<Vec<_>>()
        .join(",");
    let sql = format!(
        "SELECT question_id, student_id, obtained
         FROM marks
         WHERE question_id IN ({})",
        placeholders
    );
    let bind_values: Vec<Value> = question_ids
        .iter()
        .map(|id| Value::Text(id.clone()))
        .collect();

    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let rows = stmt
        .query_map(params_from_iter(bind_values), |r| {
            let question_id: String = r.get(0)?;
            let student_id: String = r.get(1)?;
            let obtained: f64 = r.get(2)?;
            Ok((question_id, student_id, obtained))
        })
        .map_err(db_err)?;
    for row in rows {
        let (question_id, student_id, obtained) = row.map_err(db_err)?;
        by_pair.insert((question_id, student_id), obtained);
    }
    Ok(by_pair)
}

/// Questions linked to a CLO within one offering, deduplicated by id.
fn load_clo_questions(
    conn: &Connection,
    offering_id: &str,
    clo_id: &str,
) -> Result<Vec<(String, f64)>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT q.id, q.max_marks
             FROM questions q
             JOIN question_clo_links l ON l.question_id = q.id
             JOIN assessments a ON a.id = q.assessment_id
             WHERE l.clo_id = ? AND a.offering_id = ?
             ORDER BY q.id",
        )
        .map_err(db_err)?;
    stmt.query_map((clo_id, offering_id), |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

/// In-memory zero-fill aggregation over a batched marks read.
pub fn aggregate_marks(
    student_ids: &[String],
    questions: &[(String, f64)],
    marks: &HashMap<(String, String), f64>,
) -> HashMap<String, MarkTotals> {
    let possible: f64 = questions.iter().map(|(_, max)| *max).sum();
    let mut totals: HashMap<String, MarkTotals> = HashMap::new();
    for sid in student_ids {
        let mut obtained = 0.0;
        for (qid, _) in questions {
            if let Some(v) = marks.get(&(qid.clone(), sid.clone())) {
                obtained += *v;
            }
        }
        totals.insert(
            sid.clone(),
            MarkTotals {
                obtained,
                possible,
            },
        );
    }
    totals
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloAttainment {
    pub offering_id: String,
    pub clo_id: String,
    pub clo_code: String,
    pub direct: f64,
    pub indirect: f64,
    pub combined: f64,
    pub threshold: f64,
    pub attained: bool,
    pub question_count: usize,
    pub evaluated_students: usize,
    pub attained_students: usize,
}

pub fn compute_clo_attainment(
    ctx: &CalcContext<'_>,
    offering_id: &str,
    clo_id: &str,
) -> Result<CloAttainment, CalcError> {
    let conn = ctx.conn;

    let clo_code: Option<String> = conn
        .query_row("SELECT code FROM clos WHERE id = ?", [clo_id], |r| r.get(0))
        .optional()
        .map_err(db_err)?;
    let Some(clo_code) = clo_code else {
        return Err(CalcError::new("not_found", "clo not found"));
    };
    let offering_exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM course_offerings WHERE id = ?",
            [offering_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    if offering_exists.is_none() {
        return Err(CalcError::new("not_found", "course offering not found"));
    }

    let threshold = resolve_threshold(conn)?;
    let students = enrolled_students(conn, offering_id)?;
    let questions = load_clo_questions(conn, offering_id, clo_id)?;

    let direct = if questions.is_empty() {
        DirectAttainment {
            percent: 0.0,
            evaluated_count: 0,
            attained_count: 0,
        }
    } else {
        let question_ids: Vec<String> = questions.iter().map(|(id, _)| id.clone()).collect();
        let marks = load_marks(conn, &question_ids)?;
        let totals = aggregate_marks(&students, &questions, &marks);
        direct_attainment(totals.into_values(), threshold)
    };

    let mut survey_stmt = conn
        .prepare(
            "SELECT average_score FROM survey_results
             WHERE offering_id = ? AND clo_id = ?",
        )
        .map_err(db_err)?;
    let survey_scores: Vec<f64> = survey_stmt
        .query_map((offering_id, clo_id), |r| r.get::<_, f64>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let indirect = indirect_attainment(&survey_scores);
    let combined = combine_attainment(direct.percent, indirect);

    Ok(CloAttainment {
        offering_id: offering_id.to_string(),
        clo_id: clo_id.to_string(),
        clo_code,
        direct: direct.percent,
        indirect,
        combined,
        threshold,
        attained: combined >= threshold,
        question_count: questions.len(),
        evaluated_students: direct.evaluated_count,
        attained_students: direct.attained_count,
    })
}

/// Idempotent upsert; each recomputation overwrites the prior summary row.
pub fn persist_clo_summary(conn: &Connection, row: &CloAttainment) -> Result<(), CalcError> {
    conn.execute(
        "INSERT INTO clo_attainment_summaries(
             offering_id, clo_id, direct, indirect, combined, threshold, attained, computed_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(offering_id, clo_id) DO UPDATE SET
           direct = excluded.direct,
           indirect = excluded.indirect,
           combined = excluded.combined,
           threshold = excluded.threshold,
           attained = excluded.attained,
           computed_at = excluded.computed_at",
        (
            &row.offering_id,
            &row.clo_id,
            row.direct,
            row.indirect,
            row.combined,
            row.threshold,
            row.attained as i64,
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| CalcError::new("db_insert_failed", e.to_string()))?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PloAttainment {
    pub degree_id: String,
    pub academic_session: String,
    pub plo_id: String,
    pub plo_code: String,
    pub attainment: f64,
    pub threshold: f64,
    pub attained: bool,
    pub mapped_clos: usize,
    pub evaluated_clos: usize,
}

/// Weighted rollup of mapped CLOs' combined attainment for one session.
/// For each mapping the most recently computed summary among the session's
/// offerings wins; mappings with no summary at all are skipped, not zeroed.
pub fn compute_plo_attainment(
    ctx: &CalcContext<'_>,
    degree_id: &str,
    academic_session: &str,
    plo_id: &str,
) -> Result<PloAttainment, CalcError> {
    let conn = ctx.conn;

    let plo_code: Option<String> = conn
        .query_row("SELECT code FROM plos WHERE id = ?", [plo_id], |r| r.get(0))
        .optional()
        .map_err(db_err)?;
    let Some(plo_code) = plo_code else {
        return Err(CalcError::new("not_found", "plo not found"));
    };

    let mut mappings_stmt = conn
        .prepare(
            "SELECT clo_id, strength FROM clo_plo_mappings
             WHERE plo_id = ?
             ORDER BY clo_id",
        )
        .map_err(db_err)?;
    let mappings: Vec<(String, i64)> = mappings_stmt
        .query_map([plo_id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    // Latest combined value per CLO among the session's offerings, one
    // batched read with latest-wins resolution in memory.
    let mut latest_combined: HashMap<String, (f64, String, i64)> = HashMap::new();
    if !mappings.is_empty() {
        let placeholders = std::iter::repeat("?")
            .take(mappings.len())
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT s.clo_id, s.combined, s.computed_at, s.rowid
             FROM clo_attainment_summaries s
             JOIN course_offerings o ON o.id = s.offering_id
             WHERE o.academic_session = ? AND s.clo_id IN ({})",
            placeholders
        );
        let mut bind_values: Vec<Value> = Vec::with_capacity(mappings.len() + 1);
        bind_values.push(Value::Text(academic_session.to_string()));
        for (clo_id, _) in &mappings {
            bind_values.push(Value::Text(clo_id.clone()));
        }

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params_from_iter(bind_values), |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, f64>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, i64>(3)?,
                ))
            })
            .map_err(db_err)?;
        for row in rows {
            let (clo_id, combined, computed_at, rowid) = row.map_err(db_err)?;
            match latest_combined.get(&clo_id) {
                Some((_, at, rid)) if (at.as_str(), *rid) >= (computed_at.as_str(), rowid) => {}
                _ => {
                    latest_combined.insert(clo_id, (combined, computed_at, rowid));
                }
            }
        }
    }

    let mut weighted_sum = 0.0_f64;
    let mut weight_sum = 0.0_f64;
    let mut evaluated_clos: usize = 0;
    for (clo_id, strength) in &mappings {
        let Some((combined, _, _)) = latest_combined.get(clo_id) else {
            continue;
        };
        let weight = *strength as f64;
        weighted_sum += combined * weight;
        weight_sum += weight;
        evaluated_clos += 1;
    }

    let threshold = resolve_threshold(conn)?;
    let attainment = if weight_sum > 0.0 {
        clamp_percent(weighted_sum / weight_sum)
    } else {
        0.0
    };

    Ok(PloAttainment {
        degree_id: degree_id.to_string(),
        academic_session: academic_session.to_string(),
        plo_id: plo_id.to_string(),
        plo_code,
        attainment,
        threshold,
        attained: attainment >= threshold,
        mapped_clos: mappings.len(),
        evaluated_clos,
    })
}

pub fn persist_plo_summary(conn: &Connection, row: &PloAttainment) -> Result<(), CalcError> {
    conn.execute(
        "INSERT INTO plo_attainment_summaries(
             degree_id, academic_session, plo_id, attainment, threshold, attained, computed_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(degree_id, academic_session, plo_id) DO UPDATE SET
           attainment = excluded.attainment,
           threshold = excluded.threshold,
           attained = excluded.attained,
           computed_at = excluded.computed_at",
        (
            &row.degree_id,
            &row.academic_session,
            &row.plo_id,
            row.attainment,
            row.threshold,
            row.attained as i64,
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| CalcError::new("db_insert_failed", e.to_string()))?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentScore {
    pub assessment_id: String,
    pub title: String,
    pub weightage: f64,
    pub obtained: f64,
    pub possible: f64,
    pub percent: f64,
    pub weighted: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGrade {
    pub student_id: String,
    pub final_percentage: f64,
    pub letter_grade: String,
    pub grade_points: f64,
    pub weightage_total: f64,
    pub per_assessment: Vec<AssessmentScore>,
}

#[derive(Debug, Clone)]
struct OfferingAssessment {
    id: String,
    title: String,
    weightage: f64,
    questions: Vec<(String, f64)>,
}

/// Assessments and their questions for one offering, loaded once and shared
/// across the whole batch.
fn load_offering_assessments(
    conn: &Connection,
    offering_id: &str,
) -> Result<Vec<OfferingAssessment>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, title, weightage FROM assessments
             WHERE offering_id = ?
             ORDER BY rowid",
        )
        .map_err(db_err)?;
    let mut assessments: Vec<OfferingAssessment> = stmt
        .query_map([offering_id], |r| {
            Ok(OfferingAssessment {
                id: r.get(0)?,
                title: r.get(1)?,
                weightage: r.get(2)?,
                questions: Vec::new(),
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut q_stmt = conn
        .prepare(
            "SELECT q.assessment_id, q.id, q.max_marks
             FROM questions q
             JOIN assessments a ON a.id = q.assessment_id
             WHERE a.offering_id = ?
             ORDER BY q.assessment_id, q.number",
        )
        .map_err(db_err)?;
    let question_rows: Vec<(String, String, f64)> = q_stmt
        .query_map([offering_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, f64>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut by_assessment: HashMap<String, Vec<(String, f64)>> = HashMap::new();
    for (aid, qid, max) in question_rows {
        by_assessment.entry(aid).or_default().push((qid, max));
    }
    for a in &mut assessments {
        if let Some(qs) = by_assessment.remove(&a.id) {
            a.questions = qs;
        }
    }
    Ok(assessments)
}

fn grade_from_tables(
    student_id: &str,
    assessments: &[OfferingAssessment],
    marks: &HashMap<(String, String), f64>,
    bands: &[GradeBand],
) -> StudentGrade {
    let mut per_assessment: Vec<AssessmentScore> = Vec::with_capacity(assessments.len());
    let mut weightage_total = 0.0_f64;

    for a in assessments {
        let possible: f64 = a.questions.iter().map(|(_, max)| *max).sum();
        let mut obtained = 0.0_f64;
        for (qid, _) in &a.questions {
            if let Some(v) = marks.get(&(qid.clone(), student_id.to_string())) {
                obtained += *v;
            }
        }
        let percent = if possible > 0.0 {
            100.0 * obtained / possible
        } else {
            0.0
        };
        let weighted = percent * a.weightage / 100.0;
        weightage_total += a.weightage;
        per_assessment.push(AssessmentScore {
            assessment_id: a.id.clone(),
            title: a.title.clone(),
            weightage: a.weightage,
            obtained,
            possible,
            percent,
            weighted,
        });
    }

    let final_percentage =
        weighted_final_percentage(per_assessment.iter().map(|s| (s.percent, s.weightage)));
    let (letter_grade, grade_points) = grade_for_percentage(bands, final_percentage);

    StudentGrade {
        student_id: student_id.to_string(),
        final_percentage,
        letter_grade,
        grade_points,
        weightage_total,
        per_assessment,
    }
}

pub fn compute_student_grade(
    ctx: &CalcContext<'_>,
    offering_id: &str,
    student_id: &str,
) -> Result<StudentGrade, CalcError> {
    let conn = ctx.conn;
    let assessments = load_offering_assessments(conn, offering_id)?;
    if assessments.is_empty() {
        return Err(CalcError::new(
            "no_assessments",
            "offering has no assessments",
        ));
    }
    let question_ids: Vec<String> = assessments
        .iter()
        .flat_map(|a| a.questions.iter().map(|(qid, _)| qid.clone()))
        .collect();
    let marks = load_marks(conn, &question_ids)?;
    let bands = load_grade_bands(conn)?;
    Ok(grade_from_tables(student_id, &assessments, &marks, &bands))
}

pub fn persist_course_result(
    conn: &Connection,
    offering_id: &str,
    grade: &StudentGrade,
) -> Result<(), CalcError> {
    conn.execute(
        "INSERT INTO course_results(
             offering_id, student_id, percentage, letter_grade, grade_points, computed_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(offering_id, student_id) DO UPDATE SET
           percentage = excluded.percentage,
           letter_grade = excluded.letter_grade,
           grade_points = excluded.grade_points,
           computed_at = excluded.computed_at",
        (
            offering_id,
            &grade.student_id,
            grade.final_percentage,
            &grade.letter_grade,
            grade.grade_points,
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| CalcError::new("db_insert_failed", e.to_string()))?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchGradeError {
    pub student_id: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBatchOutcome {
    pub computed: Vec<StudentGrade>,
    pub errors: Vec<BatchGradeError>,
    pub cancelled: bool,
    pub weightage_total: f64,
}

/// Grades every enrolled student of an offering. Per-student failures are
/// collected, never propagated; a raised cancel flag stops the batch between
/// students with whatever was committed so far.
pub fn batch_compute_grades(
    ctx: &CalcContext<'_>,
    offering_id: &str,
    cancel: &AtomicBool,
) -> Result<GradeBatchOutcome, CalcError> {
    let conn = ctx.conn;
    let assessments = load_offering_assessments(conn, offering_id)?;
    if assessments.is_empty() {
        return Err(CalcError::new(
            "no_assessments",
            "offering has no assessments",
        ));
    }
    let weightage_total: f64 = assessments.iter().map(|a| a.weightage).sum();

    let students = enrolled_students(conn, offering_id)?;
    let question_ids: Vec<String> = assessments
        .iter()
        .flat_map(|a| a.questions.iter().map(|(qid, _)| qid.clone()))
        .collect();
    let marks = load_marks(conn, &question_ids)?;
    let bands = load_grade_bands(conn)?;

    let mut computed: Vec<StudentGrade> = Vec::new();
    let mut errors: Vec<BatchGradeError> = Vec::new();
    let mut cancelled = false;

    for sid in &students {
        if cancel.load(Ordering::Relaxed) {
            cancelled = true;
            break;
        }
        let grade = grade_from_tables(sid, &assessments, &marks, &bands);
        match persist_course_result(conn, offering_id, &grade) {
            Ok(()) => computed.push(grade),
            Err(e) => errors.push(BatchGradeError {
                student_id: sid.clone(),
                code: e.code,
                message: e.message,
            }),
        }
    }

    Ok(GradeBatchOutcome {
        computed,
        errors,
        cancelled,
        weightage_total,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterGpa {
    pub student_id: String,
    pub semester: String,
    pub total_credit_hours: f64,
    pub gpa: f64,
    pub course_count: usize,
}

/// Credit-hour-weighted GPA over the semester's recorded course results.
/// Courses without a result are excluded from both sums.
pub fn compute_semester_gpa(
    ctx: &CalcContext<'_>,
    student_id: &str,
    semester: &str,
) -> Result<SemesterGpa, CalcError> {
    let conn = ctx.conn;
    let mut stmt = conn
        .prepare(
            "SELECT r.grade_points, c.credit_hours
             FROM course_results r
             JOIN course_offerings o ON o.id = r.offering_id
             JOIN courses c ON c.id = o.course_id
             WHERE r.student_id = ? AND o.semester = ?",
        )
        .map_err(db_err)?;
    let rows: Vec<(f64, f64)> = stmt
        .query_map((student_id, semester), |r| {
            Ok((r.get::<_, f64>(0)?, r.get::<_, f64>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let total_credit_hours: f64 = rows.iter().map(|(_, cr)| *cr).sum();
    let gpa = if total_credit_hours > 0.0 {
        round2(
            rows.iter().map(|(gp, cr)| gp * cr).sum::<f64>() / total_credit_hours,
        )
    } else {
        0.0
    };

    Ok(SemesterGpa {
        student_id: student_id.to_string(),
        semester: semester.to_string(),
        total_credit_hours,
        gpa,
        course_count: rows.len(),
    })
}

pub fn persist_semester_result(conn: &Connection, row: &SemesterGpa) -> Result<(), CalcError> {
    conn.execute(
        "INSERT INTO semester_results(
             student_id, semester, total_credit_hours, gpa, computed_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(student_id, semester) DO UPDATE SET
           total_credit_hours = excluded.total_credit_hours,
           gpa = excluded.gpa,
           computed_at = excluded.computed_at",
        (
            &row.student_id,
            &row.semester,
            row.total_credit_hours,
            row.gpa,
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| CalcError::new("db_insert_failed", e.to_string()))?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cgpa {
    pub student_id: String,
    pub cgpa: f64,
    pub total_credit_hours: f64,
    pub semester_count: usize,
}

/// Credit-hour-weighted average of stored semester GPAs.
pub fn compute_cgpa(ctx: &CalcContext<'_>, student_id: &str) -> Result<Cgpa, CalcError> {
    let conn = ctx.conn;
    let mut stmt = conn
        .prepare(
            "SELECT gpa, total_credit_hours FROM semester_results
             WHERE student_id = ?",
        )
        .map_err(db_err)?;
    let rows: Vec<(f64, f64)> = stmt
        .query_map([student_id], |r| {
            Ok((r.get::<_, f64>(0)?, r.get::<_, f64>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let total_credit_hours: f64 = rows.iter().map(|(_, cr)| *cr).sum();
    let cgpa = if total_credit_hours > 0.0 {
        round2(
            rows.iter().map(|(gpa, cr)| gpa * cr).sum::<f64>() / total_credit_hours,
        )
    } else {
        0.0
    };

    Ok(Cgpa {
        student_id: student_id.to_string(),
        cgpa,
        total_credit_hours,
        semester_count: rows.len(),
    })
}
