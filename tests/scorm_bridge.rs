//! SCORM runtime sessions over the full service stack

mod common;

use std::time::Duration;

use bytes::Bytes;
use common::args;
use lamad_progress::scorm::{OpenOutcome, ScormVersion, SessionInfo, SessionRegistry};
use lamad_progress::services::unlock_service::AccessReason;
use lamad_progress::Services;
use tempfile::TempDir;

fn opened(registry: &SessionRegistry, user: &str, item: &str) -> SessionInfo {
    match registry.open(user, item, Some("Ada Lovelace")).unwrap() {
        OpenOutcome::Opened(info) => info,
        OpenOutcome::Denied(decision) => panic!("session denied: {:?}", decision),
    }
}

fn call(registry: &SessionRegistry, session: &str, method: &str, values: &[&str]) -> String {
    registry.call(session, method, &args(values)).unwrap().result
}

async fn wait_for_certificate(services: &Services, user: &str, course: &str) -> bool {
    for _ in 0..100 {
        let status = services.certification.completion_status(user, course).unwrap();
        if status.certificate.is_some() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_gated_package_then_resume_and_complete() {
    let dir = TempDir::new().unwrap();
    let services = common::services(&dir);
    common::seed(&services, common::workshop_course());
    services
        .packages
        .upload("safety-sco", Bytes::from(common::package_12()), false)
        .await
        .unwrap();

    let registry = SessionRegistry::new(services.clone());

    // Quiz not done yet: no session is created
    match registry.open("ada", "safety-sco", None).unwrap() {
        OpenOutcome::Denied(decision) => assert_eq!(
            decision.reason,
            AccessReason::PrerequisiteIncomplete {
                prerequisite_id: "intro-quiz".into()
            }
        ),
        OpenOutcome::Opened(_) => panic!("gated package opened"),
    }
    assert!(registry.is_empty());

    common::finish_prerequisites(&services, "ada");

    // First launch
    let first = opened(&registry, "ada", "safety-sco");
    assert_eq!(first.version, ScormVersion::V12);
    assert_eq!(first.launch_href, "index.html");
    let id = first.session_id.as_str();

    assert_eq!(call(&registry, id, "LMSGetValue", &["cmi.core.lesson_status"]), "");
    assert_eq!(registry.call(id, "LMSGetLastError", &[]).unwrap().last_error, 301);

    assert_eq!(call(&registry, id, "LMSInitialize", &[""]), "true");
    assert_eq!(call(&registry, id, "LMSGetValue", &["cmi.core.entry"]), "ab-initio");
    assert_eq!(call(&registry, id, "LMSGetValue", &["cmi.core.student_id"]), "ada");
    assert_eq!(call(&registry, id, "LMSGetValue", &["cmi.core.student_name"]), "Ada Lovelace");

    let blob = r#"{"answers":{"q7":["b","d"]},"page":4}"#;
    assert_eq!(call(&registry, id, "LMSSetValue", &["cmi.suspend_data", blob]), "true");
    assert_eq!(call(&registry, id, "LMSSetValue", &["cmi.core.lesson_location", "slide-4"]), "true");
    assert_eq!(call(&registry, id, "LMSSetValue", &["cmi.core.lesson_status", "incomplete"]), "true");
    assert_eq!(call(&registry, id, "LMSSetValue", &["cmi.core.session_time", "0000:05:00"]), "true");
    assert_eq!(call(&registry, id, "LMSSetValue", &["cmi.core.entry", "resume"]), "false");
    assert_eq!(call(&registry, id, "LMSCommit", &[""]), "true");
    assert_eq!(call(&registry, id, "LMSFinish", &[""]), "true");
    assert_eq!(call(&registry, id, "LMSCommit", &[""]), "false");
    assert!(registry.close(id));

    let record = services.progress.get_progress("ada", "safety-sco").unwrap().unwrap();
    assert!(!record.completed);
    assert_eq!(record.elapsed_measure, 300.0);

    // Second launch resumes with the saved blob returned verbatim
    let second = opened(&registry, "ada", "safety-sco");
    let id = second.session_id.as_str();
    assert_eq!(call(&registry, id, "LMSInitialize", &[""]), "true");
    assert_eq!(call(&registry, id, "LMSGetValue", &["cmi.core.entry"]), "resume");
    assert_eq!(call(&registry, id, "LMSGetValue", &["cmi.suspend_data"]), blob);
    assert_eq!(call(&registry, id, "LMSGetValue", &["cmi.core.lesson_location"]), "slide-4");
    assert_eq!(call(&registry, id, "LMSGetValue", &["cmi.core.total_time"]), "0000:05:00.00");

    assert_eq!(call(&registry, id, "LMSSetValue", &["cmi.core.lesson_status", "passed"]), "true");
    assert_eq!(call(&registry, id, "LMSFinish", &[""]), "true");
    assert!(registry.close(id));

    let record = services.progress.get_progress("ada", "safety-sco").unwrap().unwrap();
    assert!(record.completed);
    assert!(wait_for_certificate(&services, "ada", "workshop").await);
}

#[tokio::test]
async fn test_scorm_2004_status_pair_completes_item() {
    let dir = TempDir::new().unwrap();
    let services = common::services(&dir);
    common::seed(
        &services,
        serde_json::json!({
            "id": "ladders",
            "title": "Ladder Safety",
            "items": [
                { "id": "ladder-sco", "kind": "scorm_package", "title": "Ladders" }
            ]
        }),
    );
    let archive = common::zip_of(&[
        ("imsmanifest.xml", common::MANIFEST_2004),
        ("launch.html", "<html></html>"),
    ]);
    services
        .packages
        .upload("ladder-sco", Bytes::from(archive), false)
        .await
        .unwrap();

    let registry = SessionRegistry::new(services.clone());
    let info = opened(&registry, "grace", "ladder-sco");
    assert_eq!(info.version, ScormVersion::V2004);
    let id = info.session_id.as_str();

    assert_eq!(call(&registry, id, "Initialize", &[""]), "true");
    assert_eq!(call(&registry, id, "GetValue", &["cmi.session_time"]), "");
    assert_eq!(registry.call(id, "GetLastError", &[]).unwrap().last_error, 405);

    assert_eq!(call(&registry, id, "SetValue", &["cmi.completion_status", "incomplete"]), "true");
    assert_eq!(call(&registry, id, "SetValue", &["cmi.session_time", "PT1M30S"]), "true");
    assert_eq!(call(&registry, id, "Commit", &[""]), "true");
    let record = services.progress.get_progress("grace", "ladder-sco").unwrap().unwrap();
    assert!(!record.completed);
    assert_eq!(record.elapsed_measure, 90.0);

    assert_eq!(call(&registry, id, "SetValue", &["cmi.success_status", "passed"]), "true");
    assert_eq!(call(&registry, id, "Terminate", &[""]), "true");
    assert_eq!(call(&registry, id, "GetValue", &["cmi.location"]), "");
    assert_eq!(registry.call(id, "GetLastError", &[]).unwrap().last_error, 123);

    let record = services.progress.get_progress("grace", "ladder-sco").unwrap().unwrap();
    assert!(record.completed);
    assert!(wait_for_certificate(&services, "grace", "ladders").await);
}

#[tokio::test]
async fn test_unknown_session_and_missing_package() {
    let dir = TempDir::new().unwrap();
    let services = common::services(&dir);
    common::seed(&services, common::workshop_course());
    common::finish_prerequisites(&services, "ada");

    let registry = SessionRegistry::new(services.clone());
    assert!(registry.call("no-such-session", "LMSInitialize", &[]).is_none());
    assert!(!registry.close("no-such-session"));

    // Open item but nothing uploaded yet
    assert!(matches!(
        registry.open("ada", "safety-sco", None),
        Err(lamad_progress::LearningError::NotFound(_))
    ));
}
