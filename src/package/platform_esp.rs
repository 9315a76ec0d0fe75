// ─────────────────────────────────────────────────────────────────────────────
//  fbuild :: package::platform_esp  —  the ESP32 vendor umbrella package
//
//  A zip containing `platform.json`, which enumerates every sub-package
//  (toolchain, SDK, tools) the platform needs. `required_packages` narrows
//  that list by MCU family: RISC-V targets don't need the Xtensa toolchain
//  entry and vice versa.
// ─────────────────────────────────────────────────────────────────────────────

use std::path::PathBuf;

use serde::Deserialize;

use crate::cache::Cache;
use crate::downloader::Downloader;
use crate::error::{FbuildError, Result};

use super::PackageInfo;

const URL: &str = "https://github.com/espressif/arduino-esp32/releases/download/3.0.0/esp32-3.0.0.zip";
const VERSION: &str = "3.0.0";

#[derive(Debug, Deserialize)]
struct PlatformJson {
    packages: Vec<PlatformPackageEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlatformPackageEntry {
    pub name: String,
    #[serde(default)]
    pub families: Vec<String>,
}

pub fn ensure(cache: &Cache, mcu: &str) -> Result<PathBuf> {
    let _ = mcu; // the umbrella package itself is MCU-independent; see required_packages
    let root = cache.platform_path(URL, VERSION);

    if !verify(&root) {
        let downloader = Downloader::new(true);
        let archive_cache = cache.platforms_dir().join("archives");
        downloader.download_and_extract(URL, &archive_cache, &root, None)?;
        if !verify(&root) {
            return Err(FbuildError::Verification {
                path: root,
                reason: "platform.json missing after extraction".to_string(),
            });
        }
    }

    Ok(root)
}

pub fn is_installed(cache: &Cache, _mcu: &str) -> bool {
    verify(&cache.platform_path(URL, VERSION))
}

pub fn info(cache: &Cache, _mcu: &str) -> Result<PackageInfo> {
    Ok(PackageInfo { name: "esp32-platform".to_string(), version: VERSION.to_string(), path: cache.platform_path(URL, VERSION) })
}

/// Sub-packages this MCU family needs, read out of the umbrella's own
/// `platform.json`.
pub fn required_packages(root: &std::path::Path, mcu: &str) -> Result<Vec<PlatformPackageEntry>> {
    let family = if super::is_riscv_mcu(mcu) { "riscv32" } else { "xtensa" };
    let data = std::fs::read_to_string(root.join("platform.json"))?;
    let parsed: PlatformJson =
        serde_json::from_str(&data).map_err(|e| FbuildError::MetadataParse(e.to_string()))?;

    Ok(parsed
        .packages
        .into_iter()
        .filter(|p| p.families.is_empty() || p.families.iter().any(|f| f == family))
        .collect())
}

fn verify(root: &PathBuf) -> bool {
    root.join("platform.json").is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_packages_filters_by_family() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();
        std::fs::write(
            root.join("platform.json"),
            r#"{"packages":[
                {"name":"xtensa-esp32-elf-gcc","families":["xtensa"]},
                {"name":"riscv32-esp-elf-gcc","families":["riscv32"]},
                {"name":"esptool","families":[]}
            ]}"#,
        )
        .unwrap();

        let riscv = required_packages(&root, "esp32c6").unwrap();
        assert!(riscv.iter().any(|p| p.name == "riscv32-esp-elf-gcc"));
        assert!(!riscv.iter().any(|p| p.name == "xtensa-esp32-elf-gcc"));
        assert!(riscv.iter().any(|p| p.name == "esptool"));
    }
}
