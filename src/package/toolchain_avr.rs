// ─────────────────────────────────────────────────────────────────────────────
//  fbuild :: package::toolchain_avr  —  avr-gcc acquisition
// ─────────────────────────────────────────────────────────────────────────────

use std::path::PathBuf;

use crate::cache::Cache;
use crate::downloader::Downloader;
use crate::error::{FbuildError, Result};

use super::PackageInfo;

const VERSION: &str = "7.3.0-atmel3.6.1-arduino7";

struct Entry {
    os: &'static str,
    arch: &'static str,
    url: &'static str,
    sha256: &'static str,
}

static TABLE: &[Entry] = &[
    Entry {
        os: "linux",
        arch: "x86_64",
        url: "https://downloads.arduino.cc/tools/avr-gcc-7.3.0-atmel3.6.1-arduino7-x86_64-pc-linux-gnu.tar.bz2",
        sha256: "d008325694047a88043be4ef3e8b2086cd40731d2e49951c40995b3faf8c08f",
    },
    Entry {
        os: "macos",
        arch: "x86_64",
        url: "https://downloads.arduino.cc/tools/avr-gcc-7.3.0-atmel3.6.1-arduino7-x86_64-apple-darwin14.tar.bz2",
        sha256: "781e448e36cbc71a429ad82cb8c0a0a8ae5fedfc1bb15b4bfcf4b5c278f6f3e",
    },
    Entry {
        os: "windows",
        arch: "x86_64",
        url: "https://downloads.arduino.cc/tools/avr-gcc-7.3.0-atmel3.6.1-arduino7-i686-w64-mingw32.zip",
        sha256: "2005b539def93a56cf3904a4b986e68e8b20e63f65d5dc52abf0d46cc7532aa",
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

    TABLE
        .iter()
        .find(|e| e.os == os && e.arch == "x86_64")
        .ok_or_else(|| FbuildError::UnsupportedHost(format!("{os}/x86_64")))
}

fn required_binaries() -> &'static [&'static str] {
    if cfg!(windows) {
        &["avr-gcc.exe", "avr-g++.exe", "avr-objcopy.exe", "avr-ar.exe", "avr-size.exe"]
    } else {
        &["avr-gcc", "avr-g++", "avr-objcopy", "avr-ar", "avr-size"]
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
                reason: "expected binaries/headers not found after extraction".to_string(),
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
    Ok(PackageInfo {
        name: "avr-gcc".to_string(),
        version: VERSION.to_string(),
        path: cache.toolchain_path(entry.url, VERSION),
    })
}

/// `bin/`, `avr/include/`, `lib/gcc/avr/`, required binaries, and the
/// libc headers a sketch always needs.
fn verify(root: &PathBuf) -> bool {
    if !root.join("bin").is_dir() || !root.join("avr").join("include").is_dir() || !root.join("lib").join("gcc").join("avr").is_dir()
    {
        return false;
    }

    for bin in required_binaries() {
        if !root.join("bin").join(bin).is_file() {
            return false;
        }
    }

    if !root.join("avr").join("include").join("avr").join("io.h").is_file() {
        return false;
    }

    true
}
