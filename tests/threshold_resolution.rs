
use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn threshold_defaults_to_fifty_and_latest_active_wins() {
    let workspace = temp_dir("obed-threshold");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // No rows at all: exactly 50.
    let t = request_ok(&mut stdin, &mut reader, "2", "assessments.thresholdActive", json!({}));
    assert_eq!(t["passingPercentage"].as_f64(), Some(50.0));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "assessments.thresholdSet",
        json!({ "passingPercentage": 60.0 }),
    );
    let t = request_ok(&mut stdin, &mut reader, "4", "assessments.thresholdActive", json!({}));
    assert_eq!(t["passingPercentage"].as_f64(), Some(60.0));

    // A newer active row supersedes the older one.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "assessments.thresholdSet",
        json!({ "passingPercentage": 70.0 }),
    );
    let t = request_ok(&mut stdin, &mut reader, "6", "assessments.thresholdActive", json!({}));
    assert_eq!(t["passingPercentage"].as_f64(), Some(70.0));

    // Inactive rows never win, no matter how recent.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "assessments.thresholdSet",
        json!({ "passingPercentage": 80.0, "isActive": false }),
    );
    let t = request_ok(&mut stdin, &mut reader, "8", "assessments.thresholdActive", json!({}));
    assert_eq!(t["passingPercentage"].as_f64(), Some(70.0));

    // Out-of-range values are rejected at the boundary.
    let e = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "assessments.thresholdSet",
        json!({ "passingPercentage": 140.0 }),
    );
    assert_eq!(e["code"].as_str(), Some("bad_params"));
}
