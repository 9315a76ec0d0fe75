// ─────────────────────────────────────────────────────────────────────────────
//  fbuild :: downloader  —  streaming fetch + archive extraction
// ─────────────────────────────────────────────────────────────────────────────

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use xz2::read::XzDecoder;

use crate::error::{FbuildError, Result};

const CHUNK_SIZE: usize = 8 * 1024;

pub struct Downloader {
    pub show_progress: bool,
}

impl Default for Downloader {
    fn default() -> Self {
        Self { show_progress: true }
    }
}

impl Downloader {
    pub fn new(show_progress: bool) -> Self {
        Self { show_progress }
    }

    /// Stream `url` to `dest_path`, verifying a SHA-256 checksum if given.
    /// Writes to a `.tmp` sibling and atomically renames on success; the
    /// temp file is removed on every failure path.
    pub fn download(&self, url: &str, dest_path: &Path, checksum: Option<&str>) -> Result<()> {
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = sibling_tmp(dest_path);

        let result = self.download_inner(url, &tmp_path, checksum);
        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result?;

        if dest_path.exists() {
            fs::remove_file(dest_path)?;
        }
        fs::rename(&tmp_path, dest_path)?;
        Ok(())
    }

    fn download_inner(&self, url: &str, tmp_path: &Path, checksum: Option<&str>) -> Result<()> {
        if self.show_progress {
            log::info!("downloading {url}");
        }

        let resp = ureq::get(url)
            .call()
            .map_err(|e| FbuildError::Network { url: url.to_string(), source: Box::new(e) })?;

        let mut reader = resp.into_reader();
        let mut file = fs::File::create(tmp_path)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; CHUNK_SIZE];

        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n])?;
        }
        file.flush()?;
        drop(file);

        if let Some(expected) = checksum {
            let actual = hex::encode(hasher.finalize());
            let expected_norm = expected.to_lowercase();
            if actual != expected_norm {
                return Err(FbuildError::ChecksumMismatch {
                    path: tmp_path.to_path_buf(),
                    expected: expected_norm,
                    actual,
                });
            }
        }

        Ok(())
    }

    /// Download (skipping if already cached under `cache_dir`) and extract.
    pub fn download_and_extract(
        &self,
        url: &str,
        cache_dir: &Path,
        extract_dir: &Path,
        checksum: Option<&str>,
    ) -> Result<()> {
        let filename = url.rsplit('/').next().unwrap_or("download");
        let archive_path = cache_dir.join(filename);

        if archive_path.exists() {
            if self.show_progress {
                log::info!("using cached archive {}", archive_path.display());
            }
        } else {
            fs::create_dir_all(cache_dir)?;
            self.download(url, &archive_path, checksum)?;
        }

        extract_archive(&archive_path, extract_dir)
    }
}

/// Re-verify a previously downloaded file's checksum.
pub fn verify_checksum(path: &Path, expected: &str) -> Result<bool> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let actual = hex::encode(hasher.finalize());
    Ok(actual == expected.to_lowercase())
}

fn sibling_tmp(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Extract `archive_path` into `dest_dir`, dispatching on extension,
/// flattening a single top-level directory if present, and moving the
/// result into place so partial extraction is never observable.
pub fn extract_archive(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let temp_extract = dest_dir
        .parent()
        .unwrap_or(dest_dir)
        .join(format!("temp_extract_{name}"));
    fs::create_dir_all(&temp_extract)?;

    let result = (|| -> Result<()> {
        if name.ends_with(".zip") {
            extract_zip(archive_path, &temp_extract)?;
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            extract_tar(archive_path, &temp_extract, TarCodec::Gz)?;
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
            extract_tar(archive_path, &temp_extract, TarCodec::Bz2)?;
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            extract_tar(archive_path, &temp_extract, TarCodec::Xz)?;
        } else {
            return Err(FbuildError::UnsupportedArchive(archive_path.to_path_buf()));
        }
        flatten_single_root(&temp_extract, dest_dir)
    })();

    let _ = fs::remove_dir_all(&temp_extract);
    result
}

enum TarCodec {
    Gz,
    Bz2,
    Xz,
}

fn extract_tar(archive_path: &Path, out_dir: &Path, codec: TarCodec) -> Result<()> {
    let file = fs::File::open(archive_path)
        .map_err(|e| FbuildError::Extraction { path: archive_path.to_path_buf(), reason: e.to_string() })?;

    let result = match codec {
        TarCodec::Gz => tar::Archive::new(GzDecoder::new(file)).unpack(out_dir),
        TarCodec::Bz2 => tar::Archive::new(BzDecoder::new(file)).unpack(out_dir),
        TarCodec::Xz => tar::Archive::new(XzDecoder::new(file)).unpack(out_dir),
    };

    result.map_err(|e| FbuildError::Extraction {
        path: archive_path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn extract_zip(archive_path: &Path, out_dir: &Path) -> Result<()> {
    let file = fs::File::open(archive_path)
        .map_err(|e| FbuildError::Extraction { path: archive_path.to_path_buf(), reason: e.to_string() })?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| FbuildError::Extraction { path: archive_path.to_path_buf(), reason: e.to_string() })?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| FbuildError::Extraction { path: archive_path.to_path_buf(), reason: e.to_string() })?;
        let out_path = match entry.enclosed_name() {
            Some(p) => out_dir.join(p),
            None => continue,
        };

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
        } else {
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut outfile = fs::File::create(&out_path)?;
            std::io::copy(&mut entry, &mut outfile)?;
        }
    }
    Ok(())
}

/// If `src_dir` contains exactly one directory entry, treat its contents
/// as the payload; otherwise the whole of `src_dir` is the payload. Either
/// way, copy into `dest_dir` (created fresh) so extraction is atomic from
/// the caller's point of view.
fn flatten_single_root(src_dir: &Path, dest_dir: &Path) -> Result<()> {
    let entries: Vec<PathBuf> = fs::read_dir(src_dir)?
        .flatten()
        .map(|e| e.path())
        .collect();

    let payload_dir = if entries.len() == 1 && entries[0].is_dir() {
        entries[0].clone()
    } else {
        src_dir.to_path_buf()
    };

    let staging = dest_dir
        .parent()
        .unwrap_or(dest_dir)
        .join(format!(
            ".{}.staging",
            dest_dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
        ));
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    copy_dir_recursive(&payload_dir, &staging)?;

    if dest_dir.exists() {
        fs::remove_dir_all(dest_dir)?;
    }
    fs::rename(&staging, dest_dir)?;
    Ok(())
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)?.flatten() {
        let path = entry.path();
        let target = dest.join(entry.file_name());
        if path.is_dir() {
            copy_dir_recursive(&path, &target)?;
        } else {
            fs::copy(&path, &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_tmp_appends_extension() {
        let p = Path::new("/a/b/archive.tar.gz");
        assert_eq!(sibling_tmp(p), Path::new("/a/b/archive.tar.gz.tmp"));
    }

    #[test]
    fn download_rejects_checksum_mismatch_and_cleans_temp() {
        // No network in tests; exercise the checksum comparison path via
        // verify_checksum on a local file instead.
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("f.bin");
        fs::write(&path, b"hello world").unwrap();

        let mut hasher = Sha256::new();
        hasher.update(b"hello world");
        let correct = hex::encode(hasher.finalize());

        assert!(verify_checksum(&path, &correct).unwrap());
        assert!(!verify_checksum(&path, "deadbeef").unwrap());
    }

    #[test]
    fn flatten_single_root_strips_wrapping_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let extracted = tmp.path().join("extracted");
        let wrapper = extracted.join("pkg-1.0.0");
        fs::create_dir_all(wrapper.join("bin")).unwrap();
        fs::write(wrapper.join("bin").join("tool"), b"x").unwrap();

        let dest = tmp.path().join("final");
        flatten_single_root(&extracted, &dest).unwrap();

        assert!(dest.join("bin").join("tool").is_file());
        assert!(!dest.join("pkg-1.0.0").exists());
    }

    #[test]
    fn flatten_keeps_multiple_top_level_entries_as_is() {
        let tmp = tempfile::tempdir().unwrap();
        let extracted = tmp.path().join("extracted");
        fs::create_dir_all(&extracted).unwrap();
        fs::write(extracted.join("a.txt"), b"a").unwrap();
        fs::write(extracted.join("b.txt"), b"b").unwrap();

        let dest = tmp.path().join("final");
        flatten_single_root(&extracted, &dest).unwrap();

        assert!(dest.join("a.txt").is_file());
        assert!(dest.join("b.txt").is_file());
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("archive.rar");
        fs::write(&path, b"x").unwrap();
        let dest = tmp.path().join("out");
        let err = extract_archive(&path, &dest).unwrap_err();
        assert!(matches!(err, FbuildError::UnsupportedArchive(_)));
    }
}
