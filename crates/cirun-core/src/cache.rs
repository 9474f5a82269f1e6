//! Best-effort dependency cache keyed by project metadata.
//!
//! Entries live under `<root>/<key>/` and hold a copy of the workspace
//! `target/` directory. Keys are content-derived, so an existing entry is
//! never overwritten and racing writers converge on the same content.
//! No operation here can fail a run: errors become [`RestoreOutcome::Error`]
//! or [`SaveOutcome::Error`].

use crate::config::ToolchainConfig;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Build-output directory that is cached.
pub const TARGET_DIR: &str = "target";

const METADATA_FILES: [&str; 2] = ["Cargo.toml", "Cargo.lock"];

/// Content-derived cache key (SHA-256 hex).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(pub String);

impl CacheKey {
    /// Short key (first 12 chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RestoreOutcome {
    Hit,
    Miss,
    Disabled,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum SaveOutcome {
    Saved,
    AlreadyPresent,
    /// Nothing to save (no build output in the workspace).
    NothingToSave,
    Error(String),
}

/// Compute the cache key for a workspace.
///
/// Hashes OS, architecture, toolchain version and every `Cargo.toml` /
/// `Cargo.lock` below the workspace (sorted by relative path; hidden
/// directories and `target/` skipped).
pub fn compute_cache_key(workspace: &Path, toolchain: &ToolchainConfig) -> io::Result<CacheKey> {
    let mut hasher = Sha256::new();
    hasher.update(std::env::consts::OS.as_bytes());
    hasher.update(b"\0");
    hasher.update(std::env::consts::ARCH.as_bytes());
    hasher.update(b"\0");
    hasher.update(toolchain.version.as_bytes());
    hasher.update(b"\0");

    let mut files = Vec::new();
    collect_metadata_files(workspace, &mut files)?;
    files.sort();

    for path in files {
        let relative = path.strip_prefix(workspace).unwrap_or(&path);
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update(b"\0");
        hasher.update(std::fs::read(&path)?);
        hasher.update(b"\0");
    }

    let key = CacheKey(hex::encode(hasher.finalize()));
    debug!(key = %key.short(), "computed cache key");
    Ok(key)
}

fn collect_metadata_files(dir: &Path, files: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if name.starts_with('.') || name == TARGET_DIR {
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_metadata_files(&path, files)?;
        } else if file_type.is_file() && METADATA_FILES.iter().any(|m| name == *m) {
            files.push(path);
        }
    }
    Ok(())
}

/// Directory-backed cache store.
#[derive(Debug, Clone)]
pub struct DependencyCache {
    root: PathBuf,
}

impl DependencyCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(&key.0)
    }

    /// Copy a cached `target/` into the workspace if one exists.
    pub fn restore(&self, key: &CacheKey, workspace: &Path) -> RestoreOutcome {
        let entry = self.entry_path(key);
        if !entry.is_dir() {
            info!(key = %key.short(), "cache miss");
            return RestoreOutcome::Miss;
        }

        match copy_dir_recursive(&entry, &workspace.join(TARGET_DIR)) {
            Ok(()) => {
                info!(key = %key.short(), "cache hit, restored target directory");
                RestoreOutcome::Hit
            }
            Err(e) => RestoreOutcome::Error(e.to_string()),
        }
    }

    /// Store the workspace `target/` under `key` unless already present.
    ///
    /// The copy is staged in a unique temporary sibling and renamed into
    /// place, so readers never observe a partial entry.
    pub fn save(&self, key: &CacheKey, workspace: &Path) -> SaveOutcome {
        let entry = self.entry_path(key);
        if entry.exists() {
            return SaveOutcome::AlreadyPresent;
        }

        let source = workspace.join(TARGET_DIR);
        if !source.is_dir() {
            return SaveOutcome::NothingToSave;
        }

        let staging = self
            .root
            .join(format!(".{}.tmp-{}", key.short(), uuid::Uuid::new_v4()));

        let result = std::fs::create_dir_all(&self.root)
            .and_then(|_| copy_dir_recursive(&source, &staging))
            .and_then(|_| std::fs::rename(&staging, &entry));

        match result {
            Ok(()) => {
                info!(key = %key.short(), "saved target directory to cache");
                SaveOutcome::Saved
            }
            Err(_) if entry.is_dir() => {
                // Another writer finished first.
                let _ = std::fs::remove_dir_all(&staging);
                SaveOutcome::AlreadyPresent
            }
            Err(e) => {
                let _ = std::fs::remove_dir_all(&staging);
                SaveOutcome::Error(e.to_string())
            }
        }
    }
}

/// Recursively copy `src` into `dst`, overwriting files that exist.
fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dst)?;

    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let from = entry.path();
        let to = dst.join(entry.file_name());

        if file_type.is_dir() {
            copy_dir_recursive(&from, &to)?;
        } else if file_type.is_symlink() {
            copy_symlink(&from, &to)?;
        } else {
            std::fs::copy(&from, &to)?;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    let target = std::fs::read_link(from)?;
    if to.symlink_metadata().is_ok() {
        std::fs::remove_file(to)?;
    }
    std::os::unix::fs::symlink(target, to)
}

#[cfg(not(unix))]
fn copy_symlink(_from: &Path, _to: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn workspace_with_manifest(contents: &str) -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), contents).unwrap();
        std::fs::create_dir_all(dir.path().join("crates/a")).unwrap();
        std::fs::write(dir.path().join("crates/a/Cargo.toml"), "[package]\nname = \"a\"\n").unwrap();
        dir
    }

    #[test]
    fn test_cache_key_deterministic() {
        let ws = workspace_with_manifest("[workspace]\n");
        let toolchain = ToolchainConfig::default();

        let k1 = compute_cache_key(ws.path(), &toolchain).unwrap();
        let k2 = compute_cache_key(ws.path(), &toolchain).unwrap();
        assert_eq!(k1, k2);
        assert_eq!(k1.0.len(), 64);
        assert_eq!(k1.short().len(), 12);
    }

    #[test]
    fn test_cache_key_changes_with_manifest() {
        let ws = workspace_with_manifest("[workspace]\n");
        let toolchain = ToolchainConfig::default();
        let before = compute_cache_key(ws.path(), &toolchain).unwrap();

        std::fs::write(ws.path().join("crates/a/Cargo.toml"), "[package]\nname = \"b\"\n").unwrap();
        let after = compute_cache_key(ws.path(), &toolchain).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_cache_key_changes_with_toolchain() {
        let ws = workspace_with_manifest("[workspace]\n");
        let a = compute_cache_key(ws.path(), &ToolchainConfig::default()).unwrap();
        let b = compute_cache_key(
            ws.path(),
            &ToolchainConfig {
                version: "stable".to_string(),
                ..ToolchainConfig::default()
            },
        )
        .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_cache_key_ignores_target_and_sources() {
        let ws = workspace_with_manifest("[workspace]\n");
        let toolchain = ToolchainConfig::default();
        let before = compute_cache_key(ws.path(), &toolchain).unwrap();

        std::fs::create_dir_all(ws.path().join("target/debug")).unwrap();
        std::fs::write(ws.path().join("target/Cargo.toml"), "junk").unwrap();
        std::fs::write(ws.path().join("lib.rs"), "fn main() {}").unwrap();
        let after = compute_cache_key(ws.path(), &toolchain).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_restore_miss() {
        let cache_root = tempdir().unwrap();
        let ws = tempdir().unwrap();
        let cache = DependencyCache::new(cache_root.path());

        let outcome = cache.restore(&CacheKey("deadbeef".to_string()), ws.path());
        assert_eq!(outcome, RestoreOutcome::Miss);
        assert!(!ws.path().join(TARGET_DIR).exists());
    }

    #[test]
    fn test_save_then_restore() {
        let cache_root = tempdir().unwrap();
        let producer = tempdir().unwrap();
        let consumer = tempdir().unwrap();
        let cache = DependencyCache::new(cache_root.path().join("store"));
        let key = CacheKey("abc123abc123abc123".to_string());

        std::fs::create_dir_all(producer.path().join("target/debug/deps")).unwrap();
        std::fs::write(producer.path().join("target/debug/deps/libfoo.rlib"), b"rlib").unwrap();

        assert_eq!(cache.save(&key, producer.path()), SaveOutcome::Saved);
        assert_eq!(cache.restore(&key, consumer.path()), RestoreOutcome::Hit);

        let restored = std::fs::read(consumer.path().join("target/debug/deps/libfoo.rlib")).unwrap();
        assert_eq!(restored, b"rlib");
    }

    #[test]
    fn test_save_is_idempotent() {
        let cache_root = tempdir().unwrap();
        let ws = tempdir().unwrap();
        let cache = DependencyCache::new(cache_root.path());
        let key = CacheKey("0123456789abcdef".to_string());

        std::fs::create_dir_all(ws.path().join("target")).unwrap();
        std::fs::write(ws.path().join("target/marker"), b"one").unwrap();
        assert_eq!(cache.save(&key, ws.path()), SaveOutcome::Saved);

        std::fs::write(ws.path().join("target/marker"), b"two").unwrap();
        assert_eq!(cache.save(&key, ws.path()), SaveOutcome::AlreadyPresent);

        let stored = std::fs::read(cache_root.path().join(&key.0).join("marker")).unwrap();
        assert_eq!(stored, b"one");
    }

    #[test]
    fn test_save_without_target() {
        let cache_root = tempdir().unwrap();
        let ws = tempdir().unwrap();
        let cache = DependencyCache::new(cache_root.path());

        let outcome = cache.save(&CacheKey("k".to_string()), ws.path());
        assert_eq!(outcome, SaveOutcome::NothingToSave);
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(RestoreOutcome::Error("disk full".to_string())).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["detail"], "disk full");
    }
}
