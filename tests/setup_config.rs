mod test_support;

use serde_json::json;
use test_support::{error_code, request, request_ok, seed_class, spawn_sidecar, temp_dir};

#[test]
fn defaults_are_reported_and_bad_patches_rejected() {
    let workspace = temp_dir("scorebook-setup-defaults");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let setup = request_ok(&mut stdin, &mut reader, "g1", "setup.get", json!({}));
    assert_eq!(setup["scoring"]["gradeScale"], "coarse");
    assert_eq!(setup["scoring"]["rankMode"], "sequential");
    assert_eq!(setup["scoring"]["termsPerYear"], 3);
    assert_eq!(setup["prediction"]["attendanceAdjust"], false);

    let bad_patches = [
        json!({ "role": "admin", "section": "scoring", "patch": { "gradeScale": "medium" } }),
        json!({ "role": "admin", "section": "scoring", "patch": { "termsPerYear": 0 } }),
        json!({ "role": "admin", "section": "scoring", "patch": { "colour": "red" } }),
        json!({ "role": "admin", "section": "printer", "patch": {} }),
        json!({ "role": "admin", "section": "prediction", "patch": "yes" }),
    ];
    for (i, params) in bad_patches.into_iter().enumerate() {
        let resp = request(&mut stdin, &mut reader, &format!("b{}", i), "setup.update", params);
        assert_eq!(error_code(&resp), Some("bad_params"), "{}", resp);
    }
    let parent = request(
        &mut stdin,
        &mut reader,
        "p1",
        "setup.update",
        json!({ "role": "parent", "section": "scoring", "patch": { "gradeScale": "fine" } }),
    );
    assert_eq!(error_code(&parent), Some("forbidden"));

    let unchanged = request_ok(&mut stdin, &mut reader, "g2", "setup.get", json!({}));
    assert_eq!(unchanged, setup);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn switching_to_fine_scale_regrades_stored_results() {
    let workspace = temp_dir("scorebook-setup-fine");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (class_id, students) = seed_class(&mut stdin, &mut reader, &workspace, &["A", "B"]);

    for (i, (idx, term, mark)) in [(0usize, 1, 77), (1, 1, 52), (0, 2, 64)].into_iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("m{}", i),
            "marks.upsert",
            json!({ "role": "teacher", "studentId": students[idx], "term": term, "subject": "Biology", "mark": mark }),
        );
    }
    let coarse = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "results.class",
        json!({ "classId": class_id, "term": 1 }),
    );
    assert_eq!(coarse["results"][0]["grade"], "B");
    assert!(coarse["results"][0]["points"].is_null());

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "setup.update",
        json!({ "role": "admin", "section": "scoring", "patch": { "gradeScale": "fine" } }),
    );
    assert_eq!(updated["rebuiltTerms"], 2);

    let fine = request_ok(
        &mut stdin,
        &mut reader,
        "r2",
        "results.class",
        json!({ "classId": class_id, "term": 1 }),
    );
    assert_eq!(fine["gradeScale"], "fine");
    assert_eq!(fine["results"][0]["grade"], "A-");
    assert_eq!(fine["results"][0]["points"], 11);
    assert_eq!(fine["results"][1]["grade"], "C");
    assert_eq!(fine["results"][1]["points"], 6);

    let term2 = request_ok(
        &mut stdin,
        &mut reader,
        "r3",
        "results.class",
        json!({ "classId": class_id, "term": 2 }),
    );
    assert_eq!(term2["results"][0]["grade"], "B-");

    // A shorter school year rejects terms beyond it.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "s2",
        "setup.update",
        json!({ "role": "admin", "section": "scoring", "patch": { "termsPerYear": 2 } }),
    );
    let beyond = request(
        &mut stdin,
        &mut reader,
        "m9",
        "marks.upsert",
        json!({ "role": "teacher", "studentId": students[0], "term": 3, "subject": "Biology", "mark": 50 }),
    );
    assert_eq!(error_code(&beyond), Some("bad_params"));

    drop(stdin);
    let _ = child.wait();
}
