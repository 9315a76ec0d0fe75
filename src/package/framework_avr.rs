// ─────────────────────────────────────────────────────────────────────────────
//  fbuild :: package::framework_avr  —  ArduinoCore-avr acquisition
// ─────────────────────────────────────────────────────────────────────────────

use std::path::PathBuf;

use crate::cache::Cache;
use crate::downloader::Downloader;
use crate::error::{FbuildError, Result};

use super::PackageInfo;

const URL: &str = "https://github.com/arduino/ArduinoCore-avr/archive/refs/tags/1.8.6.tar.gz";
const VERSION: &str = "1.8.6";

pub fn ensure(cache: &Cache) -> Result<PathBuf> {
    let root = cache.platform_path(URL, VERSION);

    if !verify(&root) {
        let downloader = Downloader::new(true);
        let archive_cache = cache.platforms_dir().join("archives");
        downloader.download_and_extract(URL, &archive_cache, &root, None)?;
        if !verify(&root) {
            return Err(FbuildError::Verification {
                path: root,
                reason: "cores/arduino, variants/standard, boards.txt or platform.txt missing".to_string(),
            });
        }
    }

    Ok(root)
}

pub fn is_installed(cache: &Cache) -> bool {
    verify(&cache.platform_path(URL, VERSION))
}

pub fn info(cache: &Cache) -> Result<PackageInfo> {
    Ok(PackageInfo { name: "ArduinoCore-avr".to_string(), version: VERSION.to_string(), path: cache.platform_path(URL, VERSION) })
}

fn verify(root: &PathBuf) -> bool {
    if !root.join("cores").join("arduino").is_dir() || !root.join("variants").join("standard").is_dir() {
        return false;
    }
    if !root.join("platform.txt").is_file() {
        return false;
    }
    let Ok(boards_txt) = std::fs::read_to_string(root.join("boards.txt")) else { return false };
    boards_txt.lines().any(|l| l.trim_start().starts_with("uno.name"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_requires_uno_name_in_boards_txt() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();
        std::fs::create_dir_all(root.join("cores").join("arduino")).unwrap();
        std::fs::create_dir_all(root.join("variants").join("standard")).unwrap();
        std::fs::write(root.join("platform.txt"), b"").unwrap();
        std::fs::write(root.join("boards.txt"), b"mega.name=Arduino Mega\n").unwrap();
        assert!(!verify(&root));

        std::fs::write(root.join("boards.txt"), b"uno.name=Arduino Uno\n").unwrap();
        assert!(verify(&root));
    }
}
