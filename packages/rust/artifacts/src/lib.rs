//! Packaging of crawl output directories into downloadable archives.
//!
//! A finished job's Markdown files are bundled into a single gzip-compressed
//! tarball. Entry names are relative to the output directory and written in
//! sorted order, so the same directory always produces the same entry list.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use sitekb_shared::{Result, SiteKbError};

/// File extension of produced archives.
pub const ARCHIVE_EXTENSION: &str = "tar.gz";

/// What [`pack_directory`] wrote.
#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    /// Number of files stored.
    pub files: usize,
    /// Size of the compressed archive in bytes.
    pub bytes: u64,
    /// Hex SHA-256 of the archive.
    pub sha256: String,
}

/// Archive every file under `dir` into `archive_path`.
///
/// Runs on the blocking pool; the directory is left untouched.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub async fn pack_directory(dir: &Path, archive_path: &Path) -> Result<ArchiveSummary> {
    let dir = dir.to_path_buf();
    let archive_path = archive_path.to_path_buf();

    let summary = tokio::task::spawn_blocking(move || pack_blocking(&dir, &archive_path))
        .await
        .map_err(|e| SiteKbError::Archive(format!("archive task failed: {e}")))??;

    info!(
        path = %summary.path.display(),
        files = summary.files,
        bytes = summary.bytes,
        sha256 = %summary.sha256,
        "archive written"
    );
    Ok(summary)
}

fn pack_blocking(dir: &Path, archive_path: &Path) -> Result<ArchiveSummary> {
    let files = collect_files(dir)?;

    if let Some(parent) = archive_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| SiteKbError::io(parent, e))?;
    }
    let out = File::create(archive_path).map_err(|e| SiteKbError::io(archive_path, e))?;
    let mut builder = tar::Builder::new(GzEncoder::new(BufWriter::new(out), Compression::default()));

    for rel in &files {
        let full = dir.join(rel);
        builder
            .append_path_with_name(&full, rel)
            .map_err(|e| SiteKbError::io(&full, e))?;
        debug!(entry = %rel.display(), "added to archive");
    }

    builder
        .into_inner()
        .and_then(|gz| gz.finish())
        .and_then(|mut w| std::io::Write::flush(&mut w))
        .map_err(|e| SiteKbError::io(archive_path, e))?;

    let (bytes, sha256) = hash_file(archive_path)?;
    Ok(ArchiveSummary {
        path: archive_path.to_path_buf(),
        files: files.len(),
        bytes,
        sha256,
    })
}

/// Relative paths of all regular files below `root`, sorted.
fn collect_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|e| SiteKbError::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| SiteKbError::io(&dir, e))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| SiteKbError::io(&path, e))?;
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                if let Ok(rel) = path.strip_prefix(root) {
                    files.push(rel.to_path_buf());
                }
            }
        }
    }

    files.sort();
    Ok(files)
}

fn hash_file(path: &Path) -> Result<(u64, String)> {
    let file = File::open(path).map_err(|e| SiteKbError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).map_err(|e| SiteKbError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((total, format!("{:x}", hasher.finalize())))
}

/// Entry names stored in an archive produced by [`pack_directory`].
pub fn list_archive(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).map_err(|e| SiteKbError::io(path, e))?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));

    let mut names = Vec::new();
    for entry in archive.entries().map_err(|e| SiteKbError::io(path, e))? {
        let entry = entry.map_err(|e| SiteKbError::io(path, e))?;
        let name = entry.path().map_err(|e| SiteKbError::io(path, e))?;
        names.push(name.to_string_lossy().into_owned());
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sitekb-{label}-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Contents of one entry, if present.
    fn read_entry(path: &Path, name: &str) -> Result<Option<String>> {
        let file = File::open(path).map_err(|e| SiteKbError::io(path, e))?;
        let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));

        for entry in archive.entries().map_err(|e| SiteKbError::io(path, e))? {
            let mut entry = entry.map_err(|e| SiteKbError::io(path, e))?;
            let matches = entry
                .path()
                .map(|p| p.to_string_lossy() == name)
                .unwrap_or(false);
            if matches {
                let mut content = String::new();
                entry
                    .read_to_string(&mut content)
                    .map_err(|e| SiteKbError::io(path, e))?;
                return Ok(Some(content));
            }
        }
        Ok(None)
    }

    #[tokio::test]
    async fn packs_files_in_sorted_order() {
        let root = temp_dir("pack");
        let out = root.join("output_job");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("zeta.md"), "# Zeta\n").unwrap();
        std::fs::write(out.join("alpha.md"), "# Alpha\n").unwrap();

        let archive = root.join(format!("output_job.{ARCHIVE_EXTENSION}"));
        let summary = pack_directory(&out, &archive).await.unwrap();

        assert_eq!(summary.files, 2);
        assert!(summary.bytes > 0);
        assert_eq!(summary.sha256.len(), 64);
        assert_eq!(list_archive(&archive).unwrap(), vec!["alpha.md", "zeta.md"]);
        assert_eq!(
            read_entry(&archive, "zeta.md").unwrap().as_deref(),
            Some("# Zeta\n")
        );
        assert_eq!(read_entry(&archive, "missing.md").unwrap(), None);
        // Source directory is left in place
        assert!(out.join("alpha.md").exists());

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn empty_directory_gives_empty_archive() {
        let root = temp_dir("pack-empty");
        let out = root.join("output_empty");
        std::fs::create_dir_all(&out).unwrap();

        let archive = root.join("output_empty.tar.gz");
        let summary = pack_directory(&out, &archive).await.unwrap();
        assert_eq!(summary.files, 0);
        assert!(list_archive(&archive).unwrap().is_empty());

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let root = temp_dir("pack-missing");
        let err = pack_directory(&root.join("nope"), &root.join("x.tar.gz"))
            .await
            .unwrap_err();
        assert!(matches!(err, SiteKbError::Io { .. }));
        std::fs::remove_dir_all(&root).ok();
    }
}
