//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::sync::Arc;

use lamad_progress::db::courses::CreateCourseInput;
use lamad_progress::services::quiz_service::QuizAnswer;
use lamad_progress::{Config, Services};
use serde_json::Value;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

pub const MANIFEST_12: &str = r#"<?xml version="1.0"?>
<manifest identifier="safety" xmlns:adlcp="http://www.adlnet.org/xsd/adlcp_rootv1p2">
  <metadata><schema>ADL SCORM</schema><schemaversion>1.2</schemaversion></metadata>
  <organizations><organization><title>Workshop Safety</title></organization></organizations>
  <resources>
    <resource identifier="sco1" type="webcontent" adlcp:scormtype="sco" href="index.html"/>
  </resources>
</manifest>"#;

pub const MANIFEST_2004: &str = r#"<?xml version="1.0"?>
<manifest identifier="safety-2004">
  <metadata><schema>ADL SCORM</schema><schemaversion>2004 4th Edition</schemaversion></metadata>
  <resources>
    <resource identifier="sco1" type="webcontent" href="launch.html"/>
  </resources>
</manifest>"#;

/// Services over a fresh storage directory
pub fn services(dir: &TempDir) -> Arc<Services> {
    Arc::new(Services::open(Config::with_storage_dir(dir.path())).unwrap())
}

/// Seed a course described as JSON, the same shape `PUT /courses/{id}` accepts
pub fn seed(services: &Services, course: Value) {
    let input: CreateCourseInput = serde_json::from_value(course).unwrap();
    services.upsert_course(&input).unwrap();
}

/// Video -> quiz -> SCORM package, in one module
pub fn workshop_course() -> Value {
    serde_json::json!({
        "id": "workshop",
        "title": "Workshop Basics",
        "pass_threshold": 70,
        "items": [
            { "id": "intro-video", "kind": "video", "title": "Intro", "position": 0,
              "duration_seconds": 300.0 },
            { "id": "intro-quiz", "kind": "quiz", "title": "Check", "position": 1,
              "questions": [
                  { "id": "q1", "correct_answers": ["a"] },
                  { "id": "q2", "correct_answers": ["b"] },
                  { "id": "q3", "kind": "multi", "correct_answers": ["a", "c"] }
              ] },
            { "id": "safety-sco", "kind": "scorm_package", "title": "Safety", "position": 2 }
        ]
    })
}

/// Answers scoring 100 on the workshop quiz
pub fn passing_answers() -> Vec<QuizAnswer> {
    [("q1", vec!["a"]), ("q2", vec!["b"]), ("q3", vec!["a", "c"])]
        .into_iter()
        .map(|(id, selected)| QuizAnswer {
            question_id: id.to_string(),
            selected: selected.into_iter().map(String::from).collect(),
        })
        .collect()
}

/// Watch the workshop video and pass its quiz, opening the SCORM item
pub fn finish_prerequisites(services: &Services, user: &str) {
    services.progress.record_progress(user, "intro-video", 300.0).unwrap();
    let result = services.quiz.submit(user, "intro-quiz", &passing_answers()).unwrap();
    assert!(result.completed);
}

pub fn zip_of(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn package_12() -> Vec<u8> {
    zip_of(&[
        ("imsmanifest.xml", MANIFEST_12),
        ("index.html", "<html><body>lesson</body></html>"),
    ])
}

pub fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}
