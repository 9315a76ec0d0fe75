// ─────────────────────────────────────────────────────────────────────────────
//  fbuild :: package::framework_teensy  —  cores-Teensy acquisition
// ─────────────────────────────────────────────────────────────────────────────

use std::path::{Path, PathBuf};

use crate::cache::Cache;
use crate::downloader::Downloader;
use crate::error::{FbuildError, Result};

use super::PackageInfo;

const URL: &str = "https://github.com/PaulStoffregen/cores/archive/refs/heads/master.tar.gz";
const VERSION: &str = "master";

pub fn ensure(cache: &Cache) -> Result<PathBuf> {
    let root = cache.platform_path(URL, VERSION);

    if !verify(&root) {
        let downloader = Downloader::new(true);
        let archive_cache = cache.platforms_dir().join("archives");
        downloader.download_and_extract(URL, &archive_cache, &root, None)?;
        if !verify(&root) {
            return Err(FbuildError::Verification {
                path: root,
                reason: "teensy4/ core directory missing after extraction".to_string(),
            });
        }
    }

    Ok(root)
}

pub fn is_installed(cache: &Cache) -> bool {
    verify(&cache.platform_path(URL, VERSION))
}

pub fn info(cache: &Cache) -> Result<PackageInfo> {
    Ok(PackageInfo { name: "cores-teensy".to_string(), version: VERSION.to_string(), path: cache.platform_path(URL, VERSION) })
}

/// The per-board core directory, e.g. `teensy4` for Teensy 4.x boards.
pub fn core_dir(framework_root: &Path, core: &str) -> PathBuf {
    framework_root.join(core)
}

/// Teensy's per-board linker script lives alongside the core sources.
pub fn linker_script(framework_root: &Path, core: &str, variant: &str) -> PathBuf {
    core_dir(framework_root, core).join(format!("{variant}.ld"))
}

fn verify(root: &PathBuf) -> bool {
    root.join("teensy4").is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_requires_teensy4_core() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!verify(&tmp.path().to_path_buf()));
        std::fs::create_dir_all(tmp.path().join("teensy4")).unwrap();
        assert!(verify(&tmp.path().to_path_buf()));
    }

    #[test]
    fn linker_script_path_is_per_variant() {
        let root = Path::new("/opt/cores");
        let path = linker_script(root, "teensy4", "teensy41");
        assert_eq!(path, Path::new("/opt/cores/teensy4/teensy41.ld"));
    }
}
