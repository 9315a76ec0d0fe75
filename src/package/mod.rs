// ─────────────────────────────────────────────────────────────────────────────
//  fbuild :: package  —  toolchain/framework/platform acquisition
//
//  A shared `Package` trait replaces the dynamic `IPackage`/`IToolchain`
//  hierarchy the original build system used: each family is a tagged
//  variant (`Toolchain::Avr`, `Toolchain::Esp32 { mcu }`, ...) and the
//  orchestrator matches on the variant it already knows it needs. `dyn
//  Package` is reserved for genuinely generic call sites, such as ensuring
//  every sub-package of a platform in turn.
// ─────────────────────────────────────────────────────────────────────────────

pub mod framework_avr;
pub mod framework_esp;
pub mod framework_teensy;
pub mod platform_esp;
pub mod toolchain_avr;
pub mod toolchain_esp;
pub mod toolchain_teensy;

use std::path::PathBuf;

use crate::cache::Cache;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
}

/// Implemented by every acquirable package family. `ensure` downloads,
/// extracts, and verifies if not already cached, returning the installed
/// root; `is_installed` checks without side effects; `info` describes the
/// cached package without re-verifying its contents.
pub trait Package {
    fn ensure(&self, cache: &Cache) -> Result<PathBuf>;
    fn is_installed(&self, cache: &Cache) -> bool;
    fn info(&self, cache: &Cache) -> Result<PackageInfo>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Toolchain {
    Avr,
    Esp32 { mcu: String },
    Teensy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framework {
    Avr,
    Esp32 { mcu: String },
    Teensy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Esp32Platform {
    pub mcu: String,
}

impl Package for Toolchain {
    fn ensure(&self, cache: &Cache) -> Result<PathBuf> {
        match self {
            Toolchain::Avr => toolchain_avr::ensure(cache),
            Toolchain::Esp32 { mcu } => toolchain_esp::ensure(cache, mcu),
            Toolchain::Teensy => toolchain_teensy::ensure(cache),
        }
    }

    fn is_installed(&self, cache: &Cache) -> bool {
        match self {
            Toolchain::Avr => toolchain_avr::is_installed(cache),
            Toolchain::Esp32 { mcu } => toolchain_esp::is_installed(cache, mcu),
            Toolchain::Teensy => toolchain_teensy::is_installed(cache),
        }
    }

    fn info(&self, cache: &Cache) -> Result<PackageInfo> {
        match self {
            Toolchain::Avr => toolchain_avr::info(cache),
            Toolchain::Esp32 { mcu } => toolchain_esp::info(cache, mcu),
            Toolchain::Teensy => toolchain_teensy::info(cache),
        }
    }
}

impl Package for Framework {
    fn ensure(&self, cache: &Cache) -> Result<PathBuf> {
        match self {
            Framework::Avr => framework_avr::ensure(cache),
            Framework::Esp32 { mcu } => framework_esp::ensure(cache, mcu),
            Framework::Teensy => framework_teensy::ensure(cache),
        }
    }

    fn is_installed(&self, cache: &Cache) -> bool {
        match self {
            Framework::Avr => framework_avr::is_installed(cache),
            Framework::Esp32 { mcu } => framework_esp::is_installed(cache, mcu),
            Framework::Teensy => framework_teensy::is_installed(cache),
        }
    }

    fn info(&self, cache: &Cache) -> Result<PackageInfo> {
        match self {
            Framework::Avr => framework_avr::info(cache),
            Framework::Esp32 { mcu } => framework_esp::info(cache, mcu),
            Framework::Teensy => framework_teensy::info(cache),
        }
    }
}

impl Package for Esp32Platform {
    fn ensure(&self, cache: &Cache) -> Result<PathBuf> {
        platform_esp::ensure(cache, &self.mcu)
    }

    fn is_installed(&self, cache: &Cache) -> bool {
        platform_esp::is_installed(cache, &self.mcu)
    }

    fn info(&self, cache: &Cache) -> Result<PackageInfo> {
        platform_esp::info(cache, &self.mcu)
    }
}

/// Ensure every package a platform needs, in turn. The only place a `dyn
/// Package` is warranted: the caller doesn't (and shouldn't need to) know
/// the concrete sub-package types ahead of time.
pub fn ensure_all(cache: &Cache, packages: &[&dyn Package]) -> Result<Vec<PathBuf>> {
    packages.iter().map(|p| p.ensure(cache)).collect()
}

pub fn is_riscv_mcu(mcu: &str) -> bool {
    matches!(mcu, "esp32c2" | "esp32c3" | "esp32c6" | "esp32h2")
}

pub fn binary_prefix_for_mcu(mcu: &str) -> &'static str {
    if is_riscv_mcu(mcu) {
        "riscv32-esp-elf-"
    } else {
        "xtensa-esp32-elf-"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn riscv_mcus_get_riscv_prefix() {
        assert_eq!(binary_prefix_for_mcu("esp32c6"), "riscv32-esp-elf-");
        assert_eq!(binary_prefix_for_mcu("esp32"), "xtensa-esp32-elf-");
        assert_eq!(binary_prefix_for_mcu("esp32s3"), "xtensa-esp32-elf-");
    }
}
