use obed::calc::{self, CalcContext};
use obed::db;
use rusqlite::Connection;
use std::sync::atomic::{AtomicBool, Ordering};


/// Three enrolled students, one assessment worth everything, marks for two.
fn seed_batch_workspace(prefix: &str) -> Connection {
    let workspace = test_support::temp_dir(prefix);
    let conn = db::open_db(&workspace).expect("open workspace db");

    conn.execute("INSERT INTO degrees(id, name) VALUES('deg', 'BS CS')", [])
        .expect("insert degree");
    conn.execute(
        "INSERT INTO courses(id, degree_id, code, title, credit_hours)
         VALUES('course', 'deg', 'CS101', 'Programming', 3)",
        [],
    )
    .expect("insert course");
    conn.execute(
        "INSERT INTO course_offerings(id, course_id, academic_session, semester)
         VALUES('off', 'course', '2025-26', 'Fall 2025')",
        [],
    )
    .expect("insert offering");
    for (id, reg) in [("s1", "F23-501"), ("s2", "F23-502"), ("s3", "F23-503")] {
        conn.execute(
            "INSERT INTO students(id, reg_no, name) VALUES(?, ?, ?)",
            (id, reg, reg),
        )
        .expect("insert student");
        conn.execute(
            "INSERT INTO enrollments(offering_id, student_id) VALUES('off', ?)",
            [id],
        )
        .expect("insert enrollment");
    }
    conn.execute(
        "INSERT INTO assessments(id, offering_id, title, weightage, total_marks)
         VALUES('a1', 'off', 'Final', 100, 10)",
        [],
    )
    .expect("insert assessment");
    conn.execute(
        "INSERT INTO questions(id, assessment_id, number, max_marks)
         VALUES('q1', 'a1', 1, 10)",
        [],
    )
    .expect("insert question");
    conn.execute(
        "INSERT INTO marks(question_id, student_id, obtained) VALUES('q1', 's1', 8)",
        [],
    )
    .expect("insert mark");
    conn.execute(
        "INSERT INTO marks(question_id, student_id, obtained) VALUES('q1', 's2', 6)",
        [],
    )
    .expect("insert mark");
    conn
}

#[test]
fn raised_cancel_flag_stops_the_batch_before_any_work() {
    let conn = seed_batch_workspace("obed-batch-cancel");
    let ctx = CalcContext { conn: &conn };

    let cancel = AtomicBool::new(true);
    let outcome = calc::batch_compute_grades(&ctx, "off", &cancel).expect("batch");
    assert!(outcome.cancelled);
    assert!(outcome.computed.is_empty());
    assert!(outcome.errors.is_empty());

    let stored: i64 = conn
        .query_row("SELECT COUNT(*) FROM course_results", [], |r| r.get(0))
        .expect("count results");
    assert_eq!(stored, 0);
}

#[test]
fn per_student_failures_are_collected_not_fatal() {
    let conn = seed_batch_workspace("obed-batch-partial");
    // Make persisting s2's row fail while the others go through.
    conn.execute_batch(
        "CREATE TRIGGER block_s2 BEFORE INSERT ON course_results
         WHEN NEW.student_id = 's2'
         BEGIN SELECT RAISE(ABORT, 'result write rejected'); END",
    )
    .expect("create trigger");

    let ctx = CalcContext { conn: &conn };
    let cancel = AtomicBool::new(false);
    let outcome = calc::batch_compute_grades(&ctx, "off", &cancel).expect("batch");

    assert!(!outcome.cancelled);
    assert_eq!(outcome.weightage_total, 100.0);
    assert_eq!(outcome.computed.len(), 2);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].student_id, "s2");
    assert_eq!(outcome.errors[0].code, "db_insert_failed");

    let graded: Vec<String> = {
        let mut stmt = conn
            .prepare("SELECT student_id FROM course_results ORDER BY student_id")
            .expect("prepare");
        stmt.query_map([], |r| r.get(0))
            .and_then(|it| it.collect())
            .expect("collect graded")
    };
    assert_eq!(graded, vec!["s1".to_string(), "s3".to_string()]);

    // With the obstacle removed a rerun picks up the remaining student.
    conn.execute_batch("DROP TRIGGER block_s2")
        .expect("drop trigger");
    let outcome = calc::batch_compute_grades(&ctx, "off", &cancel).expect("rerun batch");
    assert_eq!(outcome.computed.len(), 3);
    assert!(outcome.errors.is_empty());
    assert!(!cancel.load(Ordering::Relaxed));
}

#[test]
fn batch_zero_fills_students_without_marks() {
    let conn = seed_batch_workspace("obed-batch-zero");
    conn.execute(
        "INSERT INTO grade_points(id, min_percentage, max_percentage, letter, points)
         VALUES('g1', 50, 100, 'P', 2.0)",
        [],
    )
    .expect("insert band");

    let ctx = CalcContext { conn: &conn };
    let cancel = AtomicBool::new(false);
    let outcome = calc::batch_compute_grades(&ctx, "off", &cancel).expect("batch");

    assert_eq!(outcome.computed.len(), 3);
    let by_id: std::collections::HashMap<&str, &calc::StudentGrade> = outcome
        .computed
        .iter()
        .map(|g| (g.student_id.as_str(), g))
        .collect();
    assert_eq!(by_id["s1"].final_percentage, 80.0);
    assert_eq!(by_id["s1"].letter_grade, "P");
    assert_eq!(by_id["s2"].final_percentage, 60.0);
    // No marks at all still yields a result row, scored at zero.
    assert_eq!(by_id["s3"].final_percentage, 0.0);
    assert_eq!(by_id["s3"].letter_grade, "F");
    assert_eq!(by_id["s3"].grade_points, 0.0);
}
