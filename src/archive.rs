//! Archive download and extraction
//!
//! Bulk archives come over plain HTTPS; daily archives arrive through the
//! object store. Extraction rejects path traversal (absolute entries or `..`
//! components) before anything is written, and flattens a single root folder
//! so the payload lands directly in the target directory regardless of how
//! the publisher wrapped it.

use crate::error::{IngestError, Result};
use futures_util::StreamExt;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use zip::ZipArchive;

/// Download a zip from `url` to `dest`, streaming to disk.
pub async fn download_zip(http: &reqwest::Client, url: &str, dest: &Path) -> Result<()> {
    if url.trim().is_empty() {
        return Err(IngestError::Transfer("URL cannot be empty".to_string()));
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let response = http
        .get(url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| IngestError::Transfer(format!("downloading {}: {}", url, e)))?;

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if !content_type.to_lowercase().contains("application/zip") {
        warn!("Content-Type '{}' does not indicate a zip file", content_type);
    }

    let mut file = fs::File::create(dest)?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| IngestError::Transfer(format!("downloading {}: {}", url, e)))?;
        file.write_all(&chunk)?;
    }
    file.flush()?;
    debug!("Downloaded {} to {}", url, dest.display());
    Ok(())
}

/// Extract `zip_path` into `extract_dir`.
///
/// If the archive wraps everything in a single root folder, its contents are
/// moved up so files land directly in `extract_dir`. Entries with absolute
/// paths or `..` components fail the whole extraction before any write.
pub fn extract_zip(zip_path: &Path, extract_dir: &Path, delete_zip: bool) -> Result<()> {
    fs::create_dir_all(extract_dir)?;

    let file = fs::File::open(zip_path)?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| IngestError::Format(format!("invalid zip {}: {}", zip_path.display(), e)))?;

    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    for name in &names {
        validate_entry_path(name)?;
    }
    let root = single_root_folder(&names);

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| IngestError::Format(format!("reading zip entry: {}", e)))?;
        let relative = match root {
            Some(ref root) => match Path::new(entry.name()).strip_prefix(root) {
                Ok(stripped) if stripped.as_os_str().is_empty() => continue,
                Ok(stripped) => stripped.to_path_buf(),
                Err(_) => PathBuf::from(entry.name()),
            },
            None => PathBuf::from(entry.name()),
        };
        let out_path = extract_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
        } else {
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out_file = fs::File::create(&out_path)?;
            std::io::copy(&mut entry, &mut out_file)?;
        }
    }

    if delete_zip {
        fs::remove_file(zip_path)?;
    }
    debug!("Extracted {} to {}", zip_path.display(), extract_dir.display());
    Ok(())
}

fn validate_entry_path(name: &str) -> Result<()> {
    let path = Path::new(name);
    let traversal = path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_) | Component::RootDir));
    if traversal {
        return Err(IngestError::Format(format!(
            "malicious path in zip: {}",
            name
        )));
    }
    Ok(())
}

/// The shared top-level folder, if every entry lives under exactly one.
fn single_root_folder(names: &[String]) -> Option<String> {
    let mut root: Option<&str> = None;
    for name in names {
        let first = name.split('/').next()?;
        // A bare top-level file means there is no wrapping folder
        if !name.contains('/') {
            return None;
        }
        match root {
            None => root = Some(first),
            Some(existing) if existing == first => {}
            Some(_) => return None,
        }
    }
    root.map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use zip::write::FileOptions;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            for (name, data) in entries {
                writer.start_file(*name, FileOptions::default()).unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn extracts_flat_archive() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let zip_path = dir.path().join("a.zip");
        std::fs::write(&zip_path, build_zip(&[("one.txt", b"1"), ("two.txt", b"2")]))?;

        let out = dir.path().join("out");
        extract_zip(&zip_path, &out, false)?;
        assert_eq!(std::fs::read(out.join("one.txt"))?, b"1");
        assert!(zip_path.exists());
        Ok(())
    }

    #[test]
    fn flattens_single_root_folder_and_deletes_zip(
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let zip_path = dir.path().join("a.zip");
        std::fs::write(
            &zip_path,
            build_zip(&[("cn24/cn.txt", b"data"), ("cn24/readme.txt", b"r")]),
        )?;

        let out = dir.path().join("out");
        extract_zip(&zip_path, &out, true)?;
        assert_eq!(std::fs::read(out.join("cn.txt"))?, b"data");
        assert!(!zip_path.exists());
        Ok(())
    }

    #[test]
    fn rejects_parent_dir_traversal() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let zip_path = dir.path().join("evil.zip");
        std::fs::write(&zip_path, build_zip(&[("../escape.txt", b"x")]))?;

        let out = dir.path().join("out");
        let err = extract_zip(&zip_path, &out, false).unwrap_err();
        assert!(matches!(err, IngestError::Format(_)));
        assert!(!out.join("escape.txt").exists());
        Ok(())
    }

    #[test]
    fn mixed_roots_are_not_flattened() {
        let names = vec!["a/x.txt".to_string(), "b/y.txt".to_string()];
        assert_eq!(single_root_folder(&names), None);
        let names = vec!["a/x.txt".to_string(), "a/y/z.txt".to_string()];
        assert_eq!(single_root_folder(&names), Some("a".to_string()));
    }
}
