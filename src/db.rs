use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("obe.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS degrees(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            degree_id TEXT NOT NULL,
            code TEXT NOT NULL,
            title TEXT NOT NULL,
            credit_hours REAL NOT NULL DEFAULT 3,
            FOREIGN KEY(degree_id) REFERENCES degrees(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_degree ON courses(degree_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_offerings(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            academic_session TEXT NOT NULL,
            semester TEXT NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_offerings_course ON course_offerings(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_offerings_session ON course_offerings(academic_session)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            reg_no TEXT NOT NULL,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            offering_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            PRIMARY KEY(offering_id, student_id),
            FOREIGN KEY(offering_id) REFERENCES course_offerings(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS clos(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            code TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(course_id) REFERENCES courses(id),
            UNIQUE(course_id, code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_clos_course ON clos(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS plos(
            id TEXT PRIMARY KEY,
            degree_id TEXT NOT NULL,
            code TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(degree_id) REFERENCES degrees(id),
            UNIQUE(degree_id, code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_plos_degree ON plos(degree_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS clo_plo_mappings(
            clo_id TEXT NOT NULL,
            plo_id TEXT NOT NULL,
            strength INTEGER NOT NULL DEFAULT 2,
            PRIMARY KEY(clo_id, plo_id),
            FOREIGN KEY(clo_id) REFERENCES clos(id),
            FOREIGN KEY(plo_id) REFERENCES plos(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_clo_plo_plo ON clo_plo_mappings(plo_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessments(
            id TEXT PRIMARY KEY,
            offering_id TEXT NOT NULL,
            title TEXT NOT NULL,
            weightage REAL NOT NULL DEFAULT 0,
            total_marks REAL NOT NULL DEFAULT 0,
            FOREIGN KEY(offering_id) REFERENCES course_offerings(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessments_offering ON assessments(offering_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS questions(
            id TEXT PRIMARY KEY,
            assessment_id TEXT NOT NULL,
            number INTEGER NOT NULL,
            max_marks REAL NOT NULL DEFAULT 0,
            FOREIGN KEY(assessment_id) REFERENCES assessments(id),
            UNIQUE(assessment_id, number)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_questions_assessment ON questions(assessment_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS question_clo_links(
            question_id TEXT NOT NULL,
            clo_id TEXT NOT NULL,
            PRIMARY KEY(question_id, clo_id),
            FOREIGN KEY(question_id) REFERENCES questions(id),
            FOREIGN KEY(clo_id) REFERENCES clos(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_question_clo_links_clo ON question_clo_links(clo_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks(
            question_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            obtained REAL NOT NULL DEFAULT 0,
            PRIMARY KEY(question_id, student_id),
            FOREIGN KEY(question_id) REFERENCES questions(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_student ON marks(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS survey_results(
            id TEXT PRIMARY KEY,
            offering_id TEXT NOT NULL,
            clo_id TEXT NOT NULL,
            average_score REAL NOT NULL,
            FOREIGN KEY(offering_id) REFERENCES course_offerings(id),
            FOREIGN KEY(clo_id) REFERENCES clos(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_survey_results_pair ON survey_results(offering_id, clo_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attainment_thresholds(
            id TEXT PRIMARY KEY,
            passing_percentage REAL NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_points(
            id TEXT PRIMARY KEY,
            min_percentage REAL NOT NULL,
            max_percentage REAL NOT NULL,
            letter TEXT NOT NULL,
            points REAL NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS clo_attainment_summaries(
            offering_id TEXT NOT NULL,
            clo_id TEXT NOT NULL,
            direct REAL NOT NULL,
            indirect REAL NOT NULL,
            combined REAL NOT NULL,
            threshold REAL NOT NULL,
            attained INTEGER NOT NULL,
            computed_at TEXT NOT NULL,
            PRIMARY KEY(offering_id, clo_id),
            FOREIGN KEY(offering_id) REFERENCES course_offerings(id),
            FOREIGN KEY(clo_id) REFERENCES clos(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_clo_summaries_clo ON clo_attainment_summaries(clo_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS plo_attainment_summaries(
            degree_id TEXT NOT NULL,
            academic_session TEXT NOT NULL,
            plo_id TEXT NOT NULL,
            attainment REAL NOT NULL,
            threshold REAL NOT NULL,
            attained INTEGER NOT NULL,
            computed_at TEXT NOT NULL,
            PRIMARY KEY(degree_id, academic_session, plo_id),
            FOREIGN KEY(degree_id) REFERENCES degrees(id),
            FOREIGN KEY(plo_id) REFERENCES plos(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_results(
            offering_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            percentage REAL NOT NULL,
            letter_grade TEXT NOT NULL,
            grade_points REAL NOT NULL,
            computed_at TEXT NOT NULL,
            PRIMARY KEY(offering_id, student_id),
            FOREIGN KEY(offering_id) REFERENCES course_offerings(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_results_student ON course_results(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS semester_results(
            student_id TEXT NOT NULL,
            semester TEXT NOT NULL,
            total_credit_hours REAL NOT NULL,
            gpa REAL NOT NULL,
            computed_at TEXT NOT NULL,
            PRIMARY KEY(student_id, semester),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    // Workspaces created before the mapping-strength column need the additive
    // migration; newer ones already have it from the CREATE TABLE above.
    ensure_mappings_strength(&conn)?;

    Ok(conn)
}

fn ensure_mappings_strength(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "clo_plo_mappings", "strength")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE clo_plo_mappings ADD COLUMN strength INTEGER NOT NULL DEFAULT 2",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
