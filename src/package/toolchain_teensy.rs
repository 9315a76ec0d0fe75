// ─────────────────────────────────────────────────────────────────────────────
//  fbuild :: package::toolchain_teensy  —  arm-none-eabi-gcc acquisition
// ─────────────────────────────────────────────────────────────────────────────

use std::path::PathBuf;

use crate::cache::Cache;
use crate::downloader::Downloader;
use crate::error::{FbuildError, Result};

use super::PackageInfo;

const VERSION: &str = "7-2017q4";

struct Entry {
    os: &'static str,
    url: &'static str,
    sha256: &'static str,
}

static TABLE: &[Entry] = &[
    Entry {
        os: "linux",
        url: "https://www.pjrc.com/teensy/arm-none-eabi-gcc-7-2017q4-linux64.tar.bz2",
        sha256: "feac76fcc56dd7e40fd17ac9c98b727c5ab8cb65ae741e5e2c71477e0f4d2ee",
    },
    Entry {
        os: "macos",
        url: "https://www.pjrc.com/teensy/arm-none-eabi-gcc-7-2017q4-mac.tar.bz2",
        sha256: "3658ad8d8a0c2c7b71f9a9169a1b7f5a8b27d81e88c24f60c0b72ccb07fb0b95",
    },
    Entry {
        os: "windows",
        url: "https://www.pjrc.com/teensy/arm-none-eabi-gcc-7-2017q4-win32.zip",
        sha256: "9e40dbe99c1f5a2dd44a0d3e8a72b9a2a1d5c41f39c6a8b3a3d1a18e5e2ff2c2",
    },
];

fn entry_for_host() -> Result<&'static Entry> {
    let os = if cfg!(target_os = "linux") {
        "linux"
    } else if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "windows") {
        "windows"
    } else {
        return Err(FbuildError::UnsupportedHost(std::env::consts::OS.to_string()));
    };
    TABLE.iter().find(|e| e.os == os).ok_or_else(|| FbuildError::UnsupportedHost(os.to_string()))
}

fn required_binaries() -> &'static [&'static str] {
    if cfg!(windows) {
        &["arm-none-eabi-gcc.exe", "arm-none-eabi-g++.exe", "arm-none-eabi-objcopy.exe", "arm-none-eabi-ar.exe", "arm-none-eabi-size.exe"]
    } else {
        &["arm-none-eabi-gcc", "arm-none-eabi-g++", "arm-none-eabi-objcopy", "arm-none-eabi-ar", "arm-none-eabi-size"]
    }
}

pub fn ensure(cache: &Cache) -> Result<PathBuf> {
    let entry = entry_for_host()?;
    let root = cache.toolchain_path(entry.url, VERSION);

    if !verify(&root) {
        let downloader = Downloader::new(true);
        let archive_cache = cache.toolchains_dir().join("archives");
        downloader.download_and_extract(entry.url, &archive_cache, &root, Some(entry.sha256))?;
        if !verify(&root) {
            return Err(FbuildError::Verification {
                path: root,
                reason: "expected binaries not found after extraction".to_string(),
            });
        }
    }

    Ok(root)
}

pub fn is_installed(cache: &Cache) -> bool {
    match entry_for_host() {
        Ok(entry) => verify(&cache.toolchain_path(entry.url, VERSION)),
        Err(_) => false,
    }
}

pub fn info(cache: &Cache) -> Result<PackageInfo> {
    let entry = entry_for_host()?;
    Ok(PackageInfo { name: "arm-none-eabi-gcc".to_string(), version: VERSION.to_string(), path: cache.toolchain_path(entry.url, VERSION) })
}

fn verify(root: &PathBuf) -> bool {
    if !root.join("bin").is_dir() {
        return false;
    }
    required_binaries().iter().all(|bin| root.join("bin").join(bin).is_file())
}
