//! Secure cross-workspace file reader.
//!
//! Provides protection against:
//! - Path traversal attacks (escaping every allow-listed root)
//! - System path access (/etc, /proc, /sys, ...)
//! - Symlinks that resolve outside the allow-list
//! - Sensitive file exposure (.env, credentials, keys)
//!
//! # Design Philosophy
//!
//! Cross-workspace analysis is a first-class feature: the server is often
//! asked to analyze a sibling repository, so a naive "must live under the
//! project root" check is wrong. Instead, access is granted by an
//! allow-list of roots (workspace, home directory, configured extras) and
//! refused by a system-path deny-list, both applied *after* path
//! normalization and symlink resolution.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Security-related errors.
#[derive(Error, Debug, Clone)]
pub enum SecurityError {
    #[error("Path outside allowed roots: '{attempted}'")]
    OutsideAllowedRoots { attempted: String },

    #[error("Access denied: '{path}' is under system prefix '{prefix}'")]
    SystemPath { path: String, prefix: &'static str },

    #[error("Path contains illegal control characters: '{path}'")]
    IllegalCharacters { path: String },

    #[error("Symlink escape: '{path}' resolves outside allowed roots")]
    SymlinkEscape { path: String },

    #[error("Access denied: '{path}' is a sensitive file ({reason})")]
    SensitiveFile { path: String, reason: &'static str },
}

impl SecurityError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::OutsideAllowedRoots { .. } => "PATH_OUTSIDE_ROOTS",
            Self::SystemPath { .. } => "SYSTEM_PATH",
            Self::IllegalCharacters { .. } => "ILLEGAL_PATH_CHARS",
            Self::SymlinkEscape { .. } => "SYMLINK_ESCAPE",
            Self::SensitiveFile { .. } => "SENSITIVE_FILE",
        }
    }
}

/// Well-known system prefixes that are never readable, regardless of the
/// allow-list. Checked against the normalized *and* the resolved path.
const DENIED_PREFIXES: &[&str] = &[
    "/etc", "/proc", "/sys", "/dev", "/boot", "/run", "/var/run",
    "C:\\Windows", "C:/Windows",
];

/// Filename patterns that are never readable even inside allowed roots.
const SENSITIVE_FILES: &[(&str, &str)] = &[
    (".env", "environment variables"),
    (".envrc", "direnv config"),
    (".netrc", "network credentials"),
    (".git-credentials", "Git credentials"),
    ("id_rsa", "SSH private key"),
    ("id_ed25519", "SSH private key"),
    ("id_ecdsa", "SSH private key"),
    ("credentials.json", "credentials file"),
    ("secrets.json", "secrets file"),
];

/// Filename suffixes that are never readable.
const SENSITIVE_SUFFIXES: &[(&str, &str)] = &[
    (".pem", "private key/certificate"),
    (".key", "private key"),
    (".p12", "PKCS#12 keystore"),
    (".kdbx", "KeePass database"),
    (".tfstate", "Terraform state"),
];

/// Path fragments that are never readable.
const SENSITIVE_PATH_FRAGMENTS: &[(&str, &str)] = &[
    (".ssh/", "SSH configuration"),
    (".aws/credentials", "AWS credentials"),
    (".kube/config", "Kubernetes config"),
    (".gnupg/", "GnuPG keyring"),
];

/// Reads files on behalf of analysis tools, enforcing the allow-list.
///
/// One instance is constructed at wiring time from [`crate::config::Config`]
/// and shared by every runtime.
#[derive(Debug, Clone)]
pub struct FileReader {
    /// Canonicalized allowed roots. Roots that do not exist are kept in
    /// lexical form so tests with synthetic paths still validate.
    roots: Vec<PathBuf>,
    /// Base for resolving project-relative paths.
    workspace_root: PathBuf,
    /// Per-file read cap; larger files are truncated with a marker.
    max_file_bytes: usize,
}

impl FileReader {
    /// Creates a reader for the given allow-listed roots.
    #[must_use]
    pub fn new(workspace_root: PathBuf, allowed_roots: Vec<PathBuf>, max_file_bytes: usize) -> Self {
        let roots = allowed_roots
            .into_iter()
            .map(|r| r.canonicalize().unwrap_or(r))
            .collect();
        let workspace_root = workspace_root.canonicalize().unwrap_or(workspace_root);
        Self {
            roots,
            workspace_root,
            max_file_bytes,
        }
    }

    /// Validates a caller-supplied path and returns the resolved form.
    ///
    /// # Security Properties
    ///
    /// 1. Rejects NUL bytes and control characters outright.
    /// 2. Resolves relative paths under the workspace root, then lexically
    ///    normalizes `.` and `..` components.
    /// 3. Refuses any path under a system prefix.
    /// 4. For existing paths, canonicalizes (resolving symlinks) and
    ///    re-checks; a symlink pointing outside the allow-list is refused.
    /// 5. The final path must sit under at least one allowed root.
    pub fn validate(&self, raw: &str) -> Result<PathBuf, SecurityError> {
        if raw.is_empty() || raw.bytes().any(|b| b == 0 || b < 0x20) {
            return Err(SecurityError::IllegalCharacters {
                path: raw.escape_default().to_string(),
            });
        }

        let candidate = Path::new(raw);
        let absolute = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.workspace_root.join(candidate)
        };
        let normalized = normalize_path(&absolute);

        // Unresolvable leading ".." can only escape the allow-list.
        if normalized
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(SecurityError::OutsideAllowedRoots {
                attempted: raw.to_string(),
            });
        }

        check_denied_prefix(&normalized, raw)?;
        check_sensitive(&normalized, raw)?;

        let lexically_allowed = self.is_under_allowed_root(&normalized);
        if !lexically_allowed {
            return Err(SecurityError::OutsideAllowedRoots {
                attempted: raw.to_string(),
            });
        }

        // Symlink resolution: an existing path must still be inside the
        // allow-list after canonicalization.
        if normalized.exists() {
            let resolved = normalized
                .canonicalize()
                .map_err(|_| SecurityError::OutsideAllowedRoots {
                    attempted: raw.to_string(),
                })?;
            check_denied_prefix(&resolved, raw)?;
            check_sensitive(&resolved, raw)?;
            if !self.is_under_allowed_root(&resolved) {
                return Err(SecurityError::SymlinkEscape {
                    path: raw.to_string(),
                });
            }
            return Ok(resolved);
        }

        Ok(normalized)
    }

    /// Validates every path in a scope, reporting the first offender.
    pub fn validate_all<'a, I>(&self, paths: I) -> Result<Vec<PathBuf>, SecurityError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        paths.into_iter().map(|p| self.validate(p)).collect()
    }

    /// Whether the path exists (after validation).
    #[must_use]
    pub fn exists(&self, raw: &str) -> bool {
        self.validate(raw).map(|p| p.exists()).unwrap_or(false)
    }

    /// Reads an entire file, truncating at the configured cap.
    pub fn read(&self, raw: &str) -> crate::error::Result<String> {
        let path = self.validate(raw)?;
        let content = std::fs::read_to_string(&path)?;
        if content.len() > self.max_file_bytes {
            let cut = floor_char_boundary(&content, self.max_file_bytes);
            let mut truncated = content[..cut].to_string();
            truncated.push_str("\n[truncated]");
            return Ok(truncated);
        }
        Ok(content)
    }

    /// Reads a window of lines centered on `line` (1-indexed).
    pub fn read_excerpt(
        &self,
        raw: &str,
        line: u32,
        context_lines: u32,
    ) -> crate::error::Result<String> {
        let content = self.read(raw)?;
        let center = line.max(1) as usize;
        let start = center.saturating_sub(context_lines as usize + 1);
        let excerpt: Vec<&str> = content
            .lines()
            .skip(start)
            .take(2 * context_lines as usize + 1)
            .collect();
        Ok(excerpt.join("\n"))
    }

    fn is_under_allowed_root(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| path.starts_with(root))
    }
}

fn check_denied_prefix(path: &Path, raw: &str) -> Result<(), SecurityError> {
    for prefix in DENIED_PREFIXES {
        if path.starts_with(prefix) {
            return Err(SecurityError::SystemPath {
                path: raw.to_string(),
                prefix,
            });
        }
    }
    Ok(())
}

fn check_sensitive(path: &Path, raw: &str) -> Result<(), SecurityError> {
    let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    for (pattern, reason) in SENSITIVE_FILES {
        if filename == *pattern {
            return Err(SecurityError::SensitiveFile {
                path: raw.to_string(),
                reason,
            });
        }
    }
    for (suffix, reason) in SENSITIVE_SUFFIXES {
        if filename.ends_with(suffix) {
            return Err(SecurityError::SensitiveFile {
                path: raw.to_string(),
                reason,
            });
        }
    }
    let path_str = path.to_string_lossy();
    for (fragment, reason) in SENSITIVE_PATH_FRAGMENTS {
        if path_str.contains(fragment) {
            return Err(SecurityError::SensitiveFile {
                path: raw.to_string(),
                reason,
            });
        }
    }
    Ok(())
}

/// Normalizes a path by resolving `.` and `..` components without
/// filesystem access. Pure function over path components.
fn normalize_path(path: &Path) -> PathBuf {
    let mut components: Vec<Component> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                match components.last() {
                    Some(Component::Normal(_)) => {
                        components.pop();
                    }
                    Some(Component::RootDir) | Some(Component::Prefix(_)) => {
                        // ".." at the filesystem root stays at the root
                    }
                    _ => components.push(component),
                }
            }
            _ => components.push(component),
        }
    }

    components.iter().collect()
}

/// Largest byte index ≤ `max` that is a char boundary.
fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut idx = max;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
