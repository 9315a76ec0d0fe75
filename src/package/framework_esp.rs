// ─────────────────────────────────────────────────────────────────────────────
//  fbuild :: package::framework_esp  —  arduino-esp32 core + SDK
//
//  Two archives (the Arduino core, and the ESP-IDF-derived SDK) land under
//  one root. `sdk_includes`/`sdk_libs` then expose the SDK's own include
//  and library layout to the flag builder and linker.
// ─────────────────────────────────────────────────────────────────────────────

use std::path::{Path, PathBuf};

use crate::cache::Cache;
use crate::downloader::Downloader;
use crate::error::{FbuildError, Result};

use super::PackageInfo;

const CORE_URL: &str = "https://github.com/espressif/arduino-esp32/archive/refs/tags/3.0.0.tar.gz";
const SDK_URL: &str = "https://github.com/espressif/esp32-arduino-libs/archive/refs/tags/idf-release_v5.1.tar.gz";
const VERSION: &str = "3.0.0";

/// When a board names an MCU the SDK has no dedicated directory for yet,
/// fall back to the closest sibling that shares its toolchain ABI. Logged
/// with `log::warn!` every time it's taken, per the open question of
/// whether a silent substitution here is acceptable — it isn't.
const SDK_FALLBACK: &[(&str, &str)] = &[("esp32c2", "esp32c3")];

pub fn ensure(cache: &Cache, mcu: &str) -> Result<PathBuf> {
    let root = cache.platform_path(CORE_URL, VERSION);
    let downloader = Downloader::new(true);

    if !root.join("cores").join("esp32").is_dir() {
        let archive_cache = cache.platforms_dir().join("archives");
        downloader.download_and_extract(CORE_URL, &archive_cache, &root, None)?;
    }

    let sdk_root = root.join("tools").join("esp32-arduino-libs");
    if !sdk_dir(&sdk_root, mcu).is_dir() {
        let archive_cache = cache.platforms_dir().join("archives");
        downloader.download_and_extract(SDK_URL, &archive_cache, &sdk_root, None)?;
    }

    if !verify(&root, mcu) {
        return Err(FbuildError::Verification {
            path: root,
            reason: format!("core or SDK sources missing for mcu '{mcu}' after extraction"),
        });
    }

    Ok(root)
}

pub fn is_installed(cache: &Cache, mcu: &str) -> bool {
    verify(&cache.platform_path(CORE_URL, VERSION), mcu)
}

pub fn info(cache: &Cache, _mcu: &str) -> Result<PackageInfo> {
    Ok(PackageInfo { name: "arduino-esp32".to_string(), version: VERSION.to_string(), path: cache.platform_path(CORE_URL, VERSION) })
}

fn verify(root: &PathBuf, mcu: &str) -> bool {
    if !root.join("cores").join("esp32").is_dir() {
        return false;
    }
    sdk_dir(&root.join("tools").join("esp32-arduino-libs"), mcu).is_dir()
}

/// Resolve the effective MCU directory within the SDK tree, applying the
/// fallback table (and logging) when the exact MCU has no directory.
fn resolve_sdk_mcu(sdk_root: &Path, mcu: &str) -> String {
    if sdk_root.join(mcu).is_dir() {
        return mcu.to_string();
    }
    if let Some((_, fallback)) = SDK_FALLBACK.iter().find(|(from, _)| *from == mcu) {
        log::warn!("no SDK directory for '{mcu}', falling back to '{fallback}'");
        return fallback.to_string();
    }
    mcu.to_string()
}

fn sdk_dir(sdk_root: &Path, mcu: &str) -> PathBuf {
    sdk_root.join(resolve_sdk_mcu(sdk_root, mcu))
}

/// SDK include paths, read from the SDK's own include-flag file
/// (`-iwithprefixbefore` entries, one per line) with a recursive
/// directory-discovery fallback if that file is absent.
pub fn sdk_includes(framework_root: &Path, mcu: &str) -> Vec<PathBuf> {
    let sdk_root = framework_root.join("tools").join("esp32-arduino-libs");
    let dir = sdk_dir(&sdk_root, mcu);
    let flags_file = dir.join("include").join("flags").join("includes");

    if let Ok(data) = std::fs::read_to_string(&flags_file) {
        let includes: Vec<PathBuf> = data
            .lines()
            .filter_map(|line| line.strip_prefix("-iwithprefixbefore"))
            .map(|rest| dir.join(rest.trim()))
            .collect();
        if !includes.is_empty() {
            return includes;
        }
    }

    let mut fallback = Vec::new();
    for entry in walkdir::WalkDir::new(dir.join("include")).max_depth(2).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_dir() {
            fallback.push(entry.into_path());
        }
    }
    fallback
}

/// SDK static libraries: everything in `lib/*.a` plus the flash-mode
/// subdirectory's archives (e.g. `lib/qio_qspi/*.a`).
pub fn sdk_libs(framework_root: &Path, mcu: &str, flash_mode: &str) -> Vec<PathBuf> {
    let sdk_root = framework_root.join("tools").join("esp32-arduino-libs");
    let dir = sdk_dir(&sdk_root, mcu);
    let mut libs = glob_archives(&dir.join("lib"));
    libs.extend(glob_archives(&dir.join("lib").join(flash_mode)));
    libs
}

/// SDK `bin/` directory, holding the prebuilt bootloader ELF images
/// `generate_esp32_bootloader` picks from.
pub fn sdk_bin_dir(framework_root: &Path, mcu: &str) -> PathBuf {
    let sdk_root = framework_root.join("tools").join("esp32-arduino-libs");
    sdk_dir(&sdk_root, mcu).join("bin")
}

fn glob_archives(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else { return Vec::new() };
    entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("a"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_sdk_mcu_falls_back_when_directory_absent() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("esp32c3")).unwrap();
        assert_eq!(resolve_sdk_mcu(tmp.path(), "esp32c2"), "esp32c3");
        assert_eq!(resolve_sdk_mcu(tmp.path(), "esp32c3"), "esp32c3");
    }

    #[test]
    fn sdk_includes_parses_prefix_flag_file() {
        let tmp = tempfile::tempdir().unwrap();
        let sdk_root = tmp.path().join("tools").join("esp32-arduino-libs");
        let dir = sdk_root.join("esp32");
        std::fs::create_dir_all(dir.join("include").join("flags")).unwrap();
        std::fs::write(
            dir.join("include").join("flags").join("includes"),
            "-iwithprefixbefore include/a\n-iwithprefixbefore include/b\n",
        )
        .unwrap();

        let includes = sdk_includes(tmp.path(), "esp32");
        assert_eq!(includes.len(), 2);
        assert!(includes[0].ends_with("include/a"));
    }

    #[test]
    fn sdk_libs_includes_flash_mode_subdir() {
        let tmp = tempfile::tempdir().unwrap();
        let sdk_root = tmp.path().join("tools").join("esp32-arduino-libs");
        let dir = sdk_root.join("esp32");
        std::fs::create_dir_all(dir.join("lib").join("qio_qspi")).unwrap();
        std::fs::write(dir.join("lib").join("libfoo.a"), b"").unwrap();
        std::fs::write(dir.join("lib").join("qio_qspi").join("libbar.a"), b"").unwrap();

        let libs = sdk_libs(tmp.path(), "esp32", "qio_qspi");
        assert_eq!(libs.len(), 2);
    }
}
