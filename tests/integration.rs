use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn kb_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("kb");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    let knowledge_dir = root.join("knowledge");
    fs::create_dir_all(&knowledge_dir).unwrap();
    fs::write(
        knowledge_dir.join("definitions.csv"),
        "term,definition\n\
         latency,Time taken for a request to complete\n\
         throughput,Number of requests handled per second\n\
         availability,Fraction of time the service is usable\n",
    )
    .unwrap();
    fs::write(
        knowledge_dir.join("notes.csv"),
        "topic,note\n\
         caching,Remember to tune the caching layer\n\
         deploys,Deploys happen on Tuesdays\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/kb.sqlite"

[corpus]
dir = "{}/knowledge"
include_globs = ["**/*.csv"]
authoritative_file = "definitions.csv"

[retrieval]
boost_factor = 1.2
default_limit = 5
"#,
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("kb.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_kb(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = kb_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run kb binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_kb(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data").join("kb.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_kb(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_kb(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_full_rebuild() {
    let (_tmp, config_path) = setup_test_env();

    run_kb(&config_path, &["init"]);
    let (stdout, stderr, success) = run_kb(&config_path, &["ingest"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("files seen: 2"));
    assert!(stdout.contains("full rebuild"));
    assert!(stdout.contains("documents: 5"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_ingest_reuses_existing_index() {
    let (_tmp, config_path) = setup_test_env();

    run_kb(&config_path, &["init"]);
    run_kb(&config_path, &["ingest"]);

    let (stdout, _, success) = run_kb(&config_path, &["ingest"]);
    assert!(success);
    assert!(
        stdout.contains("reused existing index"),
        "Expected reuse on unchanged corpus, got: {}",
        stdout
    );
    assert!(stdout.contains("documents: 5"));
}

#[test]
fn test_refresh_unchanged_corpus_is_noop() {
    let (_tmp, config_path) = setup_test_env();

    run_kb(&config_path, &["init"]);
    run_kb(&config_path, &["ingest"]);

    let (stdout, _, success) = run_kb(&config_path, &["refresh"]);
    assert!(success);
    assert!(stdout.contains("files added: 0"));
    assert!(stdout.contains("files re-ingested: 0"));
    assert!(stdout.contains("files removed: 0"));
}

#[test]
fn test_search_finds_row() {
    let (_tmp, config_path) = setup_test_env();

    run_kb(&config_path, &["init"]);
    run_kb(&config_path, &["ingest"]);

    let (stdout, _, success) = run_kb(&config_path, &["search", "latency"]);
    assert!(success, "search failed");
    assert!(
        stdout.contains("latency"),
        "Expected the latency row in results, got: {}",
        stdout
    );
    assert!(stdout.contains("(text)"));
}

#[test]
fn test_search_deterministic() {
    let (_tmp, config_path) = setup_test_env();

    run_kb(&config_path, &["init"]);
    run_kb(&config_path, &["ingest"]);

    let (stdout1, _, _) = run_kb(&config_path, &["search", "caching"]);
    let (stdout2, _, _) = run_kb(&config_path, &["search", "caching"]);
    assert_eq!(
        stdout1, stdout2,
        "Search results should be deterministic across runs"
    );
}

#[test]
fn test_search_no_results() {
    let (_tmp, config_path) = setup_test_env();

    run_kb(&config_path, &["init"]);
    run_kb(&config_path, &["ingest"]);

    let (stdout, _, success) = run_kb(&config_path, &["search", "xyznonexistent"]);
    assert!(success);
    assert!(stdout.contains("No results"));
}

#[test]
fn test_search_with_limit() {
    let (_tmp, config_path) = setup_test_env();

    run_kb(&config_path, &["init"]);
    run_kb(&config_path, &["ingest"]);

    let (stdout, _, success) = run_kb(&config_path, &["search", "time", "--limit", "1"]);
    assert!(success);
    // Two rows mention "time"; only one may be returned
    assert!(stdout.contains("1. "));
    assert!(!stdout.contains("2. "));
}

#[test]
fn test_status_shows_ledger() {
    let (_tmp, config_path) = setup_test_env();

    run_kb(&config_path, &["init"]);
    run_kb(&config_path, &["ingest"]);

    let (stdout, _, success) = run_kb(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("definitions.csv"));
    assert!(stdout.contains("notes.csv"));
    assert!(stdout.contains("Documents:  5"));
    assert!(stdout.contains("searches"));
}

#[test]
fn test_invalid_config_rejected() {
    let (tmp, config_path) = setup_test_env();

    let bad = format!(
        r#"[db]
path = "{}/data/kb.sqlite"

[corpus]
dir = "{}/knowledge"

[retrieval]
boost_factor = 0.5
"#,
        tmp.path().display(),
        tmp.path().display()
    );
    fs::write(&config_path, bad).unwrap();

    let (_, stderr, success) = run_kb(&config_path, &["ingest"]);
    assert!(!success, "Invalid config should fail");
    assert!(
        stderr.contains("boost_factor"),
        "Should mention boost_factor, got: {}",
        stderr
    );
}

#[test]
fn test_missing_corpus_dir_errors() {
    let (tmp, config_path) = setup_test_env();
    fs::remove_dir_all(tmp.path().join("knowledge")).unwrap();

    run_kb(&config_path, &["init"]);
    let (_, stderr, success) = run_kb(&config_path, &["ingest"]);
    assert!(!success, "Ingest without a corpus directory should fail");
    assert!(
        stderr.contains("Corpus directory"),
        "Should mention the corpus directory, got: {}",
        stderr
    );
}
