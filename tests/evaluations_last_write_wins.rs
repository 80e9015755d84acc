mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

fn context(evaluation_type: &str) -> serde_json::Value {
    json!({
        "subject_code": "21CS51",
        "subject_name": "Database Management Systems",
        "evaluation_type": evaluation_type,
        "batch_id": "2021",
        "section": "A",
        "semester": "5",
        "academic_year": "2023-24"
    })
}

fn input(q1_scores: &[f64]) -> serde_json::Value {
    let responses: Vec<serde_json::Value> = q1_scores
        .iter()
        .enumerate()
        .map(|(i, s)| json!({ "student_id": format!("1RV21CS00{}", i + 1), "scores": { "Q1": s } }))
        .collect();
    json!({
        "questions": [{ "id": "Q1", "max_mark": 10 }],
        "question_co_map": { "Q1": ["CO1"] },
        "co_po_matrix": { "CO1": { "PO1": 2 } },
        "responses": responses
    })
}

#[test]
fn resubmission_replaces_result_and_keeps_id() {
    let workspace = temp_dir("attaind-lww");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "evaluations.submit",
        json!({ "context": context("CIE-1"), "input": input(&[8.0, 4.0]) }),
    );
    assert_eq!(first.get("replaced").and_then(|v| v.as_bool()), Some(false));
    let id = first
        .get("evaluationId")
        .and_then(|v| v.as_str())
        .expect("evaluation id")
        .to_string();
    assert_eq!(
        first.pointer("/result/co_data/co_attainment/CO1").and_then(|v| v.as_f64()),
        Some(50.0)
    );

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "evaluations.submit",
        json!({ "context": context(" CIE-1 "), "input": input(&[8.0, 9.0, 7.0]) }),
    );
    assert_eq!(second.get("replaced").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(second.get("evaluationId").and_then(|v| v.as_str()), Some(id.as_str()));
    assert_ne!(second.get("inputDigest"), first.get("inputDigest"));
    assert_eq!(
        second.pointer("/result/co_data/co_attainment/CO1").and_then(|v| v.as_f64()),
        Some(100.0)
    );

    let listed = request_ok(&mut stdin, &mut reader, "4", "evaluations.list", json!({}));
    let rows = listed
        .get("evaluations")
        .and_then(|v| v.as_array())
        .expect("evaluations");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].pointer("/context/evaluation_type").and_then(|v| v.as_str()),
        Some("CIE-1")
    );

    // Rejected resubmission leaves the stored evaluation untouched.
    let e = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "evaluations.submit",
        json!({ "context": context("CIE-1"), "input": input(&[8.0, 11.0]) }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("validation_failed"));
    assert_eq!(e.pointer("/details/row").and_then(|v| v.as_u64()), Some(2));

    let stored = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "evaluations.get",
        json!({ "evaluationId": id }),
    );
    assert_eq!(
        stored.pointer("/result/summary/total_students").and_then(|v| v.as_u64()),
        Some(3)
    );
    assert_eq!(stored.get("storedMarks").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(
        stored.pointer("/evaluation/inputDigest"),
        second.get("inputDigest")
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "evaluations.submit",
        json!({ "context": context("CIE-2"), "input": input(&[2.0]) }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "evaluations.list",
        json!({ "subject_code": "21CS51" }),
    );
    assert_eq!(
        listed.get("evaluations").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(2)
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "evaluations.list",
        json!({ "subject_code": "21CS52" }),
    );
    assert_eq!(
        listed.get("evaluations").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "evaluations.delete",
        json!({ "evaluationId": id }),
    );
    assert_eq!(deleted.get("deleted").and_then(|v| v.as_bool()), Some(true));
    let e = request_err(
        &mut stdin,
        &mut reader,
        "11",
        "evaluations.get",
        json!({ "evaluationId": id }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("not_found"));
    let e = request_err(
        &mut stdin,
        &mut reader,
        "12",
        "evaluations.delete",
        json!({ "evaluationId": id }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("not_found"));
}

#[test]
fn submission_requires_workspace_and_context() {
    let workspace = temp_dir("attaind-submit-ctx");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let e = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "evaluations.submit",
        json!({ "context": context("CIE-1"), "input": input(&[5.0]) }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("no_workspace"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let mut ctx = context("CIE-1");
    ctx["subject_code"] = json!("  ");
    let e = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "evaluations.submit",
        json!({ "context": ctx, "input": input(&[5.0]) }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("validation_failed"));
    assert_eq!(
        e.pointer("/details/field").and_then(|v| v.as_str()),
        Some("subject_code")
    );

    let e = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "evaluations.submit",
        json!({ "context": context("SEE") }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("bad_params"));

    let listed = request_ok(&mut stdin, &mut reader, "5", "evaluations.list", json!({}));
    assert_eq!(
        listed.get("evaluations").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );
}
