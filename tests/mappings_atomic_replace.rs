
use serde_json::json;
use test_support::{error_code, request_err, request_ok, spawn_sidecar, temp_dir};

/// Both mapping operations are replace-all inside one transaction: a failure
/// partway through must leave the previous mapping set untouched.
#[test]
fn failed_mapping_replace_rolls_back_to_prior_links() {
    let workspace = temp_dir("obed-mappings");
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
        json!({ "name": "BS Computer Science" }),
    );
    let degree_id = degree["degreeId"].as_str().expect("degreeId").to_string();
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.courseCreate",
        json!({ "degreeId": degree_id.clone(), "code": "CS220", "title": "Algorithms" }),
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

    let clo = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "setup.cloCreate",
        json!({ "courseId": course_id.clone(), "code": "CLO1" }),
    );
    let clo_id = clo["cloId"].as_str().expect("cloId").to_string();
    let plo = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "setup.ploCreate",
        json!({ "degreeId": degree_id.clone(), "code": "PLO1" }),
    );
    let plo_id = plo["ploId"].as_str().expect("ploId").to_string();

    let assessment = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "assessments.create",
        json!({ "offeringId": offering_id.clone(), "title": "Quiz 1", "weightage": 10, "totalMarks": 20 }),
    );
    let question = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "assessments.questionCreate",
        json!({ "assessmentId": assessment["assessmentId"].clone(), "number": 1, "maxMarks": 20 }),
    );
    let question_id = question["questionId"].as_str().expect("questionId").to_string();

    let linked = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "mappings.questionCloSet",
        json!({ "questionId": question_id.clone(), "cloIds": [clo_id.clone()] }),
    );
    assert_eq!(linked["linked"].as_u64(), Some(1));

    // Replacing with a list containing an unknown CLO fails on the foreign
    // key and must not wipe the existing link.
    let error = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "mappings.questionCloSet",
        json!({ "questionId": question_id.clone(), "cloIds": [clo_id.clone(), "no-such-clo"] }),
    );
    assert_eq!(error_code(&error), "db_insert_failed");

    let computed = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "attainment.computeClo",
        json!({ "offeringId": offering_id.clone(), "cloId": clo_id.clone() }),
    );
    assert_eq!(computed["summary"]["questionCount"].as_u64(), Some(1));

    // Unknown question is rejected up front.
    let error = request_err(
        &mut stdin,
        &mut reader,
        "12",
        "mappings.questionCloSet",
        json!({ "questionId": "no-such-question", "cloIds": [clo_id.clone()] }),
    );
    assert_eq!(error_code(&error), "not_found");

    // CLO to PLO: strength defaults to 2 and is bounded to 1..=3.
    let mapped = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "mappings.cloPloSet",
        json!({ "cloId": clo_id.clone(), "mappings": [{ "ploId": plo_id.clone() }] }),
    );
    assert_eq!(mapped["mapped"].as_u64(), Some(1));

    let error = request_err(
        &mut stdin,
        &mut reader,
        "14",
        "mappings.cloPloSet",
        json!({ "cloId": clo_id.clone(), "mappings": [{ "ploId": plo_id.clone(), "strength": 5 }] }),
    );
    assert_eq!(error_code(&error), "bad_params");

    // A replace that fails mid-transaction on an unknown PLO rolls back
    // the delete along with it.
    let error = request_err(
        &mut stdin,
        &mut reader,
        "15",
        "mappings.cloPloSet",
        json!({ "cloId": clo_id.clone(), "mappings": [
            { "ploId": plo_id.clone(), "strength": 3 },
            { "ploId": "no-such-plo" },
        ]}),
    );
    assert_eq!(error_code(&error), "db_insert_failed");

    // Neither rejected update ran, so a rollup still sees the default
    // strength-2 mapping from request 13.
    let rollup = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "attainment.computePlo",
        json!({ "degreeId": degree_id.clone(), "academicSession": "2025-26", "ploId": plo_id.clone() }),
    );
    assert_eq!(rollup["summary"]["mappedClos"].as_u64(), Some(1));
}
