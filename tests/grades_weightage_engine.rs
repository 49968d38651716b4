
use serde_json::json;
use test_support::{error_code, request_err, request_ok, spawn_sidecar, temp_dir};

/// Final percentage is the plain weightage-scaled sum; it is never
/// renormalized when the weightages do not total 100. Grade lookup falls
/// back to F / 0.0 when no band covers the percentage.
#[test]
fn final_percentage_uses_raw_weightage_sum() {
    let workspace = temp_dir("obed-grades");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let degree = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.degreeCreate",
        json!({ "name": "BS Software Engineering" }),
    );
    let degree_id = degree["degreeId"].as_str().expect("degreeId").to_string();
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.courseCreate",
        json!({ "degreeId": degree_id.clone(), "code": "SE305", "title": "Databases", "creditHours": 3 }),
    );
    let course_id = course["courseId"].as_str().expect("courseId").to_string();
    let offering = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "setup.offeringCreate",
        json!({ "courseId": course_id.clone(), "academicSession": "2025-26", "semester": "Fall 2025" }),
    );
    let offering_id = offering["offeringId"].as_str().expect("offeringId").to_string();

    let graded = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "setup.studentCreate",
        json!({ "regNo": "F23-201", "name": "Graded Student" }),
    );
    let graded_id = graded["studentId"].as_str().expect("studentId").to_string();
    let absent = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "setup.studentCreate",
        json!({ "regNo": "F23-202", "name": "Absent Student" }),
    );
    let absent_id = absent["studentId"].as_str().expect("studentId").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "setup.enrollmentsSet",
        json!({ "offeringId": offering_id.clone(), "studentIds": [graded_id.clone(), absent_id.clone()] }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "assessments.gradeScaleSet",
        json!({ "bands": [
            { "minPercentage": 85.0, "maxPercentage": 100.0, "letter": "A", "points": 4.0 },
            { "minPercentage": 70.0, "maxPercentage": 84.99, "letter": "B", "points": 3.0 },
            { "minPercentage": 55.0, "maxPercentage": 69.99, "letter": "C", "points": 2.0 },
        ]}),
    );

    // Two assessments at 60% each: the totals deliberately exceed 100.
    let mut question_ids = Vec::new();
    for (n, title) in [(1, "Midterm"), (2, "Final")] {
        let assessment = request_ok(
            &mut stdin,
            &mut reader,
            &format!("a-{}", n),
            "assessments.create",
            json!({ "offeringId": offering_id.clone(), "title": title, "weightage": 60, "totalMarks": 50 }),
        );
        let assessment_id = assessment["assessmentId"].as_str().expect("assessmentId").to_string();
        let q = request_ok(
            &mut stdin,
            &mut reader,
            &format!("q-{}", n),
            "assessments.questionCreate",
            json!({ "assessmentId": assessment_id.clone(), "number": 1, "maxMarks": 50 }),
        );
        question_ids.push(q["questionId"].as_str().expect("questionId").to_string());
    }

    // 80% on both assessments: 0.8 * 60 + 0.8 * 60 = 96.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "assessments.marksSet",
        json!({ "marks": [
            { "questionId": question_ids[0].clone(), "studentId": graded_id.clone(), "obtained": 40 },
            { "questionId": question_ids[1].clone(), "studentId": graded_id.clone(), "obtained": 40 },
        ]}),
    );

    let computed = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "grades.computeStudent",
        json!({ "offeringId": offering_id.clone(), "studentId": graded_id.clone() }),
    );
    let grade = &computed["grade"];
    let final_pct = grade["finalPercentage"].as_f64().expect("finalPercentage");
    assert!((final_pct - 96.0).abs() < 1e-9, "finalPercentage = {}", final_pct);
    assert_eq!(grade["letterGrade"].as_str(), Some("A"));
    assert_eq!(grade["gradePoints"].as_f64(), Some(4.0));
    assert_eq!(grade["weightageTotal"].as_f64(), Some(120.0));
    let per_assessment = grade["perAssessment"].as_array().expect("perAssessment");
    assert_eq!(per_assessment.len(), 2);

    // Missing marks zero-fill: the absent student lands at 0, below every
    // band, so the default F / 0.0 applies.
    let computed = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "grades.computeStudent",
        json!({ "offeringId": offering_id.clone(), "studentId": absent_id.clone() }),
    );
    assert_eq!(computed["grade"]["finalPercentage"].as_f64(), Some(0.0));
    assert_eq!(computed["grade"]["letterGrade"].as_str(), Some("F"));
    assert_eq!(computed["grade"]["gradePoints"].as_f64(), Some(0.0));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "grades.results",
        json!({ "offeringId": offering_id.clone() }),
    );
    let results = listed["results"].as_array().expect("results");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["regNo"].as_str(), Some("F23-201"));
    assert_eq!(results[0]["letterGrade"].as_str(), Some("A"));
    assert_eq!(results[1]["regNo"].as_str(), Some("F23-202"));
    assert_eq!(results[1]["letterGrade"].as_str(), Some("F"));
}

#[test]
fn grading_without_assessments_is_an_error() {
    let workspace = temp_dir("obed-grades-empty");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let degree = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.degreeCreate",
        json!({ "name": "BS Software Engineering" }),
    );
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.courseCreate",
        json!({ "degreeId": degree["degreeId"].clone(), "code": "SE100", "title": "Intro" }),
    );
    let offering = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "setup.offeringCreate",
        json!({ "courseId": course["courseId"].clone(), "academicSession": "2025-26", "semester": "Fall 2025" }),
    );
    let offering_id = offering["offeringId"].as_str().expect("offeringId").to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "setup.studentCreate",
        json!({ "regNo": "F23-301", "name": "Lone Student" }),
    );
    let student_id = student["studentId"].as_str().expect("studentId").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "setup.enrollmentsSet",
        json!({ "offeringId": offering_id.clone(), "studentIds": [student_id.clone()] }),
    );

    let error = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "grades.computeStudent",
        json!({ "offeringId": offering_id.clone(), "studentId": student_id.clone() }),
    );
    assert_eq!(error_code(&error), "no_assessments");
}
