//! C1 — Source Acquirer.
//!
//! Validates and materializes a submitted codebase (archive bytes or a
//! remote git URL) as an in-memory path -> content mapping. Archive
//! decoding uses `zip` (streaming entry iteration); remote clone uses
//! `git2` for a shallow clone into a temporary directory.

use std::collections::BTreeMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::error::AppError;

const ZIP_MAGIC_LOCAL: &[u8] = b"PK\x03\x04";
const ZIP_MAGIC_EMPTY: &[u8] = b"PK\x05\x06";

static GITHUB_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https://github\.com/[^/]+/[^/]+").unwrap());

pub struct AcquiredFile {
    pub content: String,
    pub size_bytes: u64,
}

pub type AcquiredMap = BTreeMap<String, AcquiredFile>;

pub enum Source {
    Archive(Vec<u8>),
    RemoteUrl(String),
}

/// Normalize a raw zip/walk path into the repo-relative, forward-slashed,
/// `..`-free form the rest of the pipeline expects.
fn normalize_path(raw: &str) -> Option<String> {
    let normalized = raw.replace('\\', "/");
    let mut parts = Vec::new();
    for segment in normalized.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

pub fn acquire(
    codebase_id: Uuid,
    source: Source,
    max_archive_bytes: u64,
) -> Result<AcquiredMap, AppError> {
    match source {
        Source::Archive(bytes) => acquire_archive(codebase_id, bytes, max_archive_bytes),
        Source::RemoteUrl(url) => acquire_remote(codebase_id, &url),
    }
}

fn acquire_archive(
    codebase_id: Uuid,
    bytes: Vec<u8>,
    max_archive_bytes: u64,
) -> Result<AcquiredMap, AppError> {
    if bytes.len() as u64 > max_archive_bytes {
        return Err(AppError::SizeExceeded);
    }
    let has_magic = bytes.starts_with(ZIP_MAGIC_LOCAL) || bytes.starts_with(ZIP_MAGIC_EMPTY);
    if !has_magic {
        return Err(AppError::Validation("uploaded file is not a zip archive".into()));
    }

    let reader = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(reader).map_err(|e| {
        AppError::Validation(format!("failed to parse zip archive: {e}"))
    })?;

    let mut map = AcquiredMap::new();
    for i in 0..archive.len() {
        let mut entry = match archive.by_index(i) {
            Ok(e) => e,
            Err(_) => continue,
        };
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry.enclosed_name().and_then(|p| p.to_str().map(str::to_string))
        else {
            continue;
        };
        let Some(rel_path) = normalize_path(&name) else {
            continue;
        };

        let mut buf = Vec::with_capacity(entry.size() as usize);
        if std::io::Read::read_to_end(&mut entry, &mut buf).is_err() {
            continue;
        }
        let Ok(content) = String::from_utf8(buf) else {
            // binary file — skip silently, same as the contract requires
            continue;
        };
        let size_bytes = content.len() as u64;
        map.insert(rel_path, AcquiredFile { content, size_bytes });
    }

    tracing::info!(codebase_id = %codebase_id, files = map.len(), "archive acquired");
    Ok(map)
}

fn acquire_remote(codebase_id: Uuid, url: &str) -> Result<AcquiredMap, AppError> {
    if !GITHUB_URL.is_match(url) {
        return Err(AppError::Validation(
            "repository_url must match https://github.com/<owner>/<repo>".into(),
        ));
    }

    let dest = std::env::temp_dir().join(format!("coderag-clone-{codebase_id}"));
    if dest.exists() {
        std::fs::remove_dir_all(&dest).ok();
    }

    let mut fetch_opts = git2::FetchOptions::new();
    fetch_opts.depth(1);
    let mut builder = git2::build::RepoBuilder::new();
    builder.fetch_options(fetch_opts);
    builder
        .clone(url, &dest)
        .map_err(|e| AppError::ExternalService { service: "git", message: e.to_string() })?;

    let map = walk_clone(&dest, codebase_id);
    std::fs::remove_dir_all(&dest).ok();
    Ok(map)
}

fn walk_clone(root: &Path, codebase_id: Uuid) -> AcquiredMap {
    let mut map = AcquiredMap::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else { continue };
            if file_type.is_symlink() {
                continue;
            }
            if path.file_name().and_then(|n| n.to_str()) == Some(".git") {
                continue;
            }
            if file_type.is_dir() {
                stack.push(path);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            let Ok(rel) = path.strip_prefix(root) else { continue };
            let Some(rel_str) = rel.to_str() else { continue };
            let Some(rel_path) = normalize_path(rel_str) else { continue };
            let Ok(bytes) = std::fs::read(&path) else { continue };
            let Ok(content) = String::from_utf8(bytes) else { continue };
            let size_bytes = content.len() as u64;
            map.insert(rel_path, AcquiredFile { content, size_bytes });
        }
    }
    tracing::info!(codebase_id = %codebase_id, files = map.len(), "remote repository acquired");
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zip_bytes(files: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let cursor = std::io::Cursor::new(&mut buf);
            let mut writer = zip::ZipWriter::new(cursor);
            let options: zip::write::FileOptions<()> = zip::write::FileOptions::default();
            for (name, content) in files {
                writer.start_file(*name, options).unwrap();
                std::io::Write::write_all(&mut writer, content.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        buf
    }

    #[test]
    fn rejects_oversized_archive() {
        let bytes = zip_bytes(&[("a.py", "x = 1\n")]);
        let err = acquire_archive(Uuid::new_v4(), bytes, 1);
        assert!(matches!(err, Err(AppError::SizeExceeded)));
    }

    #[test]
    fn rejects_non_zip_bytes() {
        let err = acquire_archive(Uuid::new_v4(), b"not a zip".to_vec(), 1024);
        assert!(matches!(err, Err(AppError::Validation(_))));
    }

    #[test]
    fn archive_paths_are_normalized_and_relative() {
        let bytes = zip_bytes(&[("src/main.py", "print(1)\n"), ("README.md", "hi\n")]);
        let map = acquire_archive(Uuid::new_v4(), bytes, 1024 * 1024).unwrap();
        assert!(map.contains_key("src/main.py"));
        assert!(map.contains_key("README.md"));
        assert_eq!(map.get("src/main.py").unwrap().content, "print(1)\n");
    }

    #[test]
    fn remote_url_must_match_github_pattern() {
        let err = acquire_remote(Uuid::new_v4(), "https://gitlab.com/foo/bar");
        assert!(matches!(err, Err(AppError::Validation(_))));
    }

    #[test]
    fn normalize_path_rejects_dot_dot() {
        assert_eq!(normalize_path("../../etc/passwd"), None);
        assert_eq!(normalize_path("./a/./b"), Some("a/b".to_string()));
    }
}
