use std::fs;

use tempfile::TempDir;

use super::*;

fn seeded_folder() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp directory");

    fs::write(
        dir.path().join("architecture.md"),
        "# Architecture\n\nThe system has **three** components.\n\n```\nfn main() {}\n```\n",
    )
    .unwrap();
    fs::write(dir.path().join("notes.txt"), "Plain text notes.").unwrap();
    fs::write(dir.path().join("config.json"), r#"{"key": "value"}"#).unwrap();
    fs::write(dir.path().join("deploy.yaml"), "stage: production\nreplicas: 3\n").unwrap();
    fs::write(dir.path().join("binary.bin"), [0u8, 1, 2]).unwrap();

    fs::create_dir(dir.path().join("nested")).unwrap();
    fs::write(dir.path().join("nested/guide.md"), "Step 1: install.").unwrap();

    dir
}

#[tokio::test]
async fn empty_query_returns_all_supported_files() {
    let dir = seeded_folder();
    let connector = LocalFolderConnector::new(dir.path());

    let results = connector.search("", None).await.unwrap();

    // The .bin file is skipped; the nested markdown is found.
    assert_eq!(results.len(), 5);
    assert!(results.iter().any(|r| r.title == "guide"));
    assert!(results.iter().all(|r| r.source_type == "local_folder"));
    assert!(results.iter().all(|r| !r.doc_id.is_empty()));
}

#[tokio::test]
async fn query_filters_by_title_and_content() {
    let dir = seeded_folder();
    let connector = LocalFolderConnector::new(dir.path());

    let by_content = connector.search("three components", None).await.unwrap();
    assert_eq!(by_content.len(), 1);
    assert_eq!(by_content[0].title, "architecture");

    let by_title = connector.search("notes", None).await.unwrap();
    assert_eq!(by_title.len(), 1);

    let none = connector.search("no such phrase anywhere", None).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn limit_caps_result_count() {
    let dir = seeded_folder();
    let connector = LocalFolderConnector::new(dir.path());

    let results = connector.search("", Some(2)).await.unwrap();
    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn missing_folder_yields_no_results() {
    let connector = LocalFolderConnector::new("/nonexistent/path/for/tests");
    let results = connector.search("", None).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn unreadable_root_surfaces_a_connector_error() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("not-a-directory.txt");
    fs::write(&file, "plain file").unwrap();

    // A root that exists but cannot be listed fails the scan.
    let connector = LocalFolderConnector::new(&file);
    let error = connector.search("", None).await.unwrap_err();
    assert!(matches!(
        error.downcast_ref::<HarvesterError>(),
        Some(HarvesterError::Connector(_))
    ));
}

#[tokio::test]
async fn markdown_is_flattened_to_plain_text() {
    let dir = seeded_folder();
    let connector = LocalFolderConnector::new(dir.path());

    let results = connector.search("three components", None).await.unwrap();
    let text = &results[0].raw_text;

    assert!(text.contains("Architecture"));
    assert!(text.contains("three"));
    assert!(!text.contains('#'));
    assert!(!text.contains("**"));
}

#[tokio::test]
async fn invalid_json_becomes_error_document() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("broken.json"), "{not json").unwrap();

    let connector = LocalFolderConnector::new(dir.path());
    let results = connector.search("", None).await.unwrap();

    assert_eq!(results.len(), 1);
    assert!(results[0].raw_text.starts_with("[extraction error:"));
}

#[test]
fn document_id_is_stable() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("doc.md");
    fs::write(&path, "content").unwrap();

    let first = document_id(&path);
    let second = document_id(&path);
    assert_eq!(first, second);
    assert_eq!(first.len(), 64);

    let other = dir.path().join("other.md");
    fs::write(&other, "content").unwrap();
    assert_ne!(first, document_id(&other));
}

#[tokio::test]
async fn test_connection_reflects_folder_presence() {
    let dir = seeded_folder();
    let connector = LocalFolderConnector::new(dir.path());
    assert!(connector.test_connection().await.unwrap());

    let connector = LocalFolderConnector::new("/nonexistent/path/for/tests");
    assert!(!connector.test_connection().await.unwrap());
}

#[tokio::test]
async fn fetch_document_by_id() {
    let dir = seeded_folder();
    let connector = LocalFolderConnector::new(dir.path());

    let results = connector.search("", None).await.unwrap();
    let wanted = results.iter().find(|r| r.title == "notes").unwrap();

    let fetched = connector.fetch_document(&wanted.doc_id).await.unwrap().unwrap();
    assert_eq!(fetched.title, "notes");
    assert_eq!(fetched.raw_text, "Plain text notes.");

    let missing = connector.fetch_document("0000").await.unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn snippet_is_truncated() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("long.txt"), "word ".repeat(200)).unwrap();

    let connector = LocalFolderConnector::new(dir.path());
    let results = connector.search("", None).await.unwrap();

    assert_eq!(results[0].snippet.chars().count(), 200);
}
