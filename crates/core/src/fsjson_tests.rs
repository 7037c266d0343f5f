// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde::Deserialize;
use tempfile::tempdir;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Doc {
    name: String,
    count: u32,
}

#[test]
fn missing_file_loads_as_none() {
    let dir = tempdir().unwrap();
    let loaded: Option<Doc> = load_json(&dir.path().join("absent.json")).unwrap();
    assert!(loaded.is_none());
}

#[test]
fn save_then_load_roundtrips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state").join("doc.json");
    let doc = Doc { name: "x".to_string(), count: 3 };

    save_json(&path, &doc).unwrap();
    let loaded: Option<Doc> = load_json(&path).unwrap();
    assert_eq!(loaded, Some(doc));
}

#[test]
fn save_replaces_previous_content() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("doc.json");
    save_json(&path, &Doc { name: "a".to_string(), count: 1 }).unwrap();
    save_json(&path, &Doc { name: "b".to_string(), count: 2 }).unwrap();
    let loaded: Option<Doc> = load_json(&path).unwrap();
    assert_eq!(loaded.unwrap().name, "b");
}

#[test]
fn no_temp_file_left_behind() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("doc.json");
    save_json(&path, &Doc { name: "a".to_string(), count: 1 }).unwrap();
    assert!(!path.with_extension("json.tmp").exists());
}

#[test]
fn corrupt_file_is_an_error_not_a_panic() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("doc.json");
    std::fs::write(&path, b"{broken").unwrap();
    let result: Result<Option<Doc>, _> = load_json(&path);
    assert!(matches!(result, Err(PersistError::Json(_))));
}
