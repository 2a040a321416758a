//! Secure file reader integration tests: allow-list roots, traversal,
//! system paths, symlinks, and validation ordering ahead of any read.

mod common;

use common::TestEnv;
use second_opinion::security::{FileReader, SecurityError};
use std::path::PathBuf;

// ============================================================================
// Allow-list and traversal
// ============================================================================

#[test]
fn test_workspace_file_allowed() {
    let env = TestEnv::new();
    let file = env.sample_file();
    assert!(env.services.reader.validate(&file).is_ok());
    assert!(env.services.reader.exists(&file));
}

#[test]
fn test_relative_path_resolves_under_workspace() {
    let env = TestEnv::new();
    env.sample_file();
    let content = env.services.reader.read("src/cache.rs").unwrap();
    assert!(content.contains("pub fn lookup"));
}

#[test]
fn test_cross_workspace_read_with_extra_root() {
    // A sibling repo outside the workspace, explicitly allow-listed.
    let sibling = tempfile::tempdir().unwrap();
    let target = sibling.path().join("x.py");
    std::fs::write(&target, "def handler():\n    pass\n").unwrap();

    let workspace = tempfile::tempdir().unwrap();
    let reader = FileReader::new(
        workspace.path().to_path_buf(),
        vec![
            workspace.path().to_path_buf(),
            sibling.path().to_path_buf(),
        ],
        1024 * 1024,
    );

    let content = reader.read(target.to_str().unwrap()).unwrap();
    assert!(content.contains("def handler"));
}

#[test]
fn test_path_outside_all_roots_rejected() {
    let workspace = tempfile::tempdir().unwrap();
    let reader = FileReader::new(
        workspace.path().to_path_buf(),
        vec![workspace.path().to_path_buf()],
        1024,
    );
    let other = tempfile::tempdir().unwrap();
    let target = other.path().join("secret.rs");
    std::fs::write(&target, "x").unwrap();

    assert!(matches!(
        reader.validate(target.to_str().unwrap()),
        Err(SecurityError::OutsideAllowedRoots { .. })
    ));
}

#[test]
fn test_traversal_to_system_path_rejected() {
    let env = TestEnv::new();
    let err = env
        .services
        .reader
        .validate("../../../../../../etc/passwd")
        .unwrap_err();
    assert!(matches!(
        err,
        SecurityError::SystemPath { .. } | SecurityError::OutsideAllowedRoots { .. }
    ));
}

#[test]
fn test_system_prefixes_always_denied() {
    let env = TestEnv::new();
    for path in ["/etc/passwd", "/proc/self/environ", "/sys/class", "/dev/mem"] {
        let err = env.services.reader.validate(path).unwrap_err();
        assert_eq!(err.code(), "SYSTEM_PATH", "{path}");
    }
}

#[test]
fn test_nul_and_control_bytes_rejected() {
    let env = TestEnv::new();
    assert_eq!(
        env.services.reader.validate("src/\0evil").unwrap_err().code(),
        "ILLEGAL_PATH_CHARS"
    );
    assert_eq!(
        env.services.reader.validate("a\x1bb.rs").unwrap_err().code(),
        "ILLEGAL_PATH_CHARS"
    );
}

// ============================================================================
// Symlinks
// ============================================================================

#[cfg(unix)]
#[test]
fn test_symlink_inside_roots_allowed() {
    let env = TestEnv::new();
    let real = env.write_file("real.rs", "fn real() {}");
    let link = env.dir.path().join("link.rs");
    std::os::unix::fs::symlink(&real, &link).unwrap();

    let content = env.services.reader.read(link.to_str().unwrap()).unwrap();
    assert!(content.contains("fn real"));
}

#[cfg(unix)]
#[test]
fn test_symlink_escaping_roots_rejected() {
    let outside = tempfile::tempdir().unwrap();
    let target = outside.path().join("outside.rs");
    std::fs::write(&target, "nope").unwrap();

    let env = TestEnv::new();
    let link = env.dir.path().join("sneaky.rs");
    std::os::unix::fs::symlink(&target, &link).unwrap();

    let err = env
        .services
        .reader
        .validate(link.to_str().unwrap())
        .unwrap_err();
    assert_eq!(err.code(), "SYMLINK_ESCAPE");
}

// ============================================================================
// Sensitive files
// ============================================================================

#[test]
fn test_sensitive_files_denied_inside_roots() {
    let env = TestEnv::new();
    env.write_file(".env", "API_KEY=xyz");
    for path in [".env", "deploy/tls.key", "id_rsa"] {
        let err = env.services.reader.validate(path).unwrap_err();
        assert_eq!(err.code(), "SENSITIVE_FILE", "{path}");
    }
}

// ============================================================================
// Validation precedes reads in the runtimes
// ============================================================================

#[tokio::test]
async fn test_escalate_rejects_unvalidated_scope_before_any_provider_call() {
    let env = TestEnv::new();
    let params: second_opinion::params::EscalateParams =
        serde_json::from_value(serde_json::json!({
            "attempted_approaches": [],
            "partial_findings": [],
            "stuck_description": ["stuck"],
            "code_scope": { "files": ["/etc/passwd"] },
            "analysis_type": "hypothesis_test",
        }))
        .unwrap();
    let req = params.normalize().unwrap();

    let err = second_opinion::analysis::escalate_analysis(&env.services, req)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SYSTEM_PATH");
    assert_eq!(env.primary.calls(), 0, "provider must not be contacted");
}

#[tokio::test]
async fn test_start_conversation_validates_scope_files() {
    let env = TestEnv::new();
    let params: second_opinion::params::StartConversationParams =
        serde_json::from_value(serde_json::json!({
            "attempted_approaches": [],
            "partial_findings": [],
            "stuck_description": ["stuck"],
            "code_scope_files": ["../../outside.rs"],
            "analysis_type": "cross_system",
        }))
        .unwrap();
    let req = params.normalize().unwrap();

    let err = second_opinion::conversation::start_conversation(&env.services, req)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        second_opinion::ServerError::PathSecurity(_)
    ));
    assert_eq!(env.services.store.count(), 0, "no session may be created");
}

#[test]
fn test_validate_all_reports_first_offender() {
    let env = TestEnv::new();
    let good = env.sample_file();
    let result = env
        .services
        .reader
        .validate_all([good.as_str(), "/etc/shadow"]);
    assert!(result.is_err());
}

#[test]
fn test_reader_large_file_truncated_not_rejected() {
    let workspace = tempfile::tempdir().unwrap();
    let file = workspace.path().join("huge.rs");
    std::fs::write(&file, "a".repeat(4096)).unwrap();
    let reader = FileReader::new(
        workspace.path().to_path_buf(),
        vec![workspace.path().to_path_buf()],
        128,
    );
    let content = reader.read(file.to_str().unwrap()).unwrap();
    assert!(content.ends_with("[truncated]"));
    assert!(content.len() < 4096);
}

#[test]
fn test_nonexistent_root_still_validates_lexically() {
    let reader = FileReader::new(
        PathBuf::from("/nonexistent-workspace"),
        vec![PathBuf::from("/nonexistent-workspace")],
        1024,
    );
    assert!(reader.validate("src/main.rs").is_ok());
    assert!(reader.validate("/elsewhere/main.rs").is_err());
}
