// ─────────────────────────────────────────────────────────────────────────────
//  fbuild :: package::toolchain_esp  —  riscv32-esp-elf-gcc / xtensa-esp32-elf-gcc
//
//  Two-step acquisition: fetch a small metadata archive containing
//  `tools.json`, pick the host-matching toolchain entry out of it, then
//  fetch and extract that toolchain proper.
// ─────────────────────────────────────────────────────────────────────────────

use std::path::PathBuf;

use serde::Deserialize;

use crate::cache::Cache;
use crate::downloader::Downloader;
use crate::error::{FbuildError, Result};

use super::{binary_prefix_for_mcu, PackageInfo};

const TOOLS_INDEX_URL: &str =
    "https://raw.githubusercontent.com/espressif/arduino-esp32/master/package/package_esp32_index.template.json";

#[derive(Debug, Deserialize)]
struct ToolsJson {
    tools: Vec<ToolEntry>,
}

#[derive(Debug, Deserialize)]
struct ToolEntry {
    name: String,
    version: String,
    systems: Vec<SystemEntry>,
}

#[derive(Debug, Deserialize)]
struct SystemEntry {
    host: String,
    url: String,
    #[serde(default)]
    checksum: Option<String>,
}

fn host_triplet() -> &'static str {
    if cfg!(all(target_os = "linux", target_arch = "x86_64")) {
        "x86_64-pc-linux-gnu"
    } else if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
        "arm64-apple-darwin"
    } else if cfg!(all(target_os = "macos", target_arch = "x86_64")) {
        "x86_64-apple-darwin"
    } else if cfg!(target_os = "windows") {
        "i686-mingw32"
    } else {
        "x86_64-pc-linux-gnu"
    }
}

fn toolchain_name(mcu: &str) -> &'static str {
    if super::is_riscv_mcu(mcu) {
        "riscv32-esp-elf-gcc"
    } else {
        "xtensa-esp32-elf-gcc"
    }
}

fn required_binaries(mcu: &str) -> Vec<String> {
    let prefix = binary_prefix_for_mcu(mcu);
    let suffix = if cfg!(windows) { ".exe" } else { "" };
    ["gcc", "g++", "objcopy", "ar", "size"]
        .iter()
        .map(|tool| format!("{prefix}{tool}{suffix}"))
        .collect()
}

fn fetch_tools_json(cache: &Cache) -> Result<ToolsJson> {
    let metadata_path = cache.toolchains_dir().join("esp-package-index.json");
    if !metadata_path.exists() {
        let downloader = Downloader::new(true);
        downloader.download(TOOLS_INDEX_URL, &metadata_path, None)?;
    }
    let data = std::fs::read_to_string(&metadata_path)?;
    serde_json::from_str(&data).map_err(|e| FbuildError::MetadataParse(e.to_string()))
}

fn resolve_entry(cache: &Cache, mcu: &str) -> Result<(String, String, Option<String>)> {
    let name = toolchain_name(mcu);
    let tools = fetch_tools_json(cache)?;
    let triplet = host_triplet();

    let tool = tools
        .tools
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| FbuildError::MetadataParse(format!("tool '{name}' not present in tools.json")))?;

    let system = tool
        .systems
        .iter()
        .find(|s| s.host == triplet)
        .ok_or_else(|| FbuildError::UnsupportedHost(triplet.to_string()))?;

    Ok((tool.version.clone(), system.url.clone(), system.checksum.clone()))
}

pub fn ensure(cache: &Cache, mcu: &str) -> Result<PathBuf> {
    let (version, url, checksum) = resolve_entry(cache, mcu)?;
    let root = cache.toolchain_path(&url, &version);

    if !verify(&root, mcu) {
        let downloader = Downloader::new(true);
        let archive_cache = cache.toolchains_dir().join("archives");
        downloader.download_and_extract(&url, &archive_cache, &root, checksum.as_deref())?;
        if !verify(&root, mcu) {
            return Err(FbuildError::Verification {
                path: root,
                reason: "expected binaries not found after extraction".to_string(),
            });
        }
    }

    Ok(root)
}

pub fn is_installed(cache: &Cache, mcu: &str) -> bool {
    match resolve_entry(cache, mcu) {
        Ok((version, url, _)) => verify(&cache.toolchain_path(&url, &version), mcu),
        Err(_) => false,
    }
}

pub fn info(cache: &Cache, mcu: &str) -> Result<PackageInfo> {
    let (version, url, _) = resolve_entry(cache, mcu)?;
    Ok(PackageInfo { name: toolchain_name(mcu).to_string(), version: version.clone(), path: cache.toolchain_path(&url, &version) })
}

fn verify(root: &PathBuf, mcu: &str) -> bool {
    if !root.join("bin").is_dir() {
        return false;
    }
    required_binaries(mcu).iter().all(|bin| root.join("bin").join(bin).is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toolchain_name_dispatches_on_mcu_family() {
        assert_eq!(toolchain_name("esp32c6"), "riscv32-esp-elf-gcc");
        assert_eq!(toolchain_name("esp32"), "xtensa-esp32-elf-gcc");
    }

    #[test]
    fn required_binaries_use_correct_prefix() {
        let bins = required_binaries("esp32c3");
        assert!(bins.iter().any(|b| b.starts_with("riscv32-esp-elf-")));
    }

    #[test]
    fn verify_rejects_missing_bin_dir() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!verify(&tmp.path().to_path_buf(), "esp32"));
    }
}
