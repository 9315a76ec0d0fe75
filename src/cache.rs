// ─────────────────────────────────────────────────────────────────────────────
//  fbuild :: cache  —  content-addressed filesystem layout
//
//  .fbuild/
//  ├── cache/
//  │   ├── packages/{url-hash}/{version}/{filename}
//  │   ├── toolchains/{url-hash}/{version}/
//  │   ├── platforms/{url-hash}/{version}/
//  │   └── libraries/{url-hash}/{version}/
//  └── build/{environment}/
//      ├── core/
//      ├── src/
//      └── firmware.*
//
//  Rooted at either the project's hidden build directory or a path from
//  FBUILD_CACHE_DIR. url-hash is the first 16 hex chars of SHA-256(url),
//  which keeps two sources with different URLs but the same version name
//  from colliding.
// ─────────────────────────────────────────────────────────────────────────────

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::error::Result;

const CACHE_DIR_ENV: &str = "FBUILD_CACHE_DIR";

#[derive(Debug, Clone)]
pub struct Cache {
    pub project_dir: PathBuf,
    pub cache_root: PathBuf,
    pub build_root: PathBuf,
}

impl Cache {
    /// Construct a cache rooted at `project_dir` (or the current directory
    /// if `None`), honoring `FBUILD_CACHE_DIR` as a global override.
    pub fn new(project_dir: Option<&Path>) -> std::io::Result<Self> {
        let project_dir = match project_dir {
            Some(p) => p.to_path_buf(),
            None => std::env::current_dir()?,
        };
        let project_dir = project_dir.canonicalize().unwrap_or(project_dir);

        let cache_root = match std::env::var(CACHE_DIR_ENV) {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => project_dir.join(".fbuild").join("cache"),
        };
        let build_root = project_dir.join(".fbuild").join("build");

        Ok(Self { project_dir, cache_root, build_root })
    }

    /// First 16 hex characters of SHA-256(url) — stable, pure, and
    /// sufficient to avoid collisions between distinct sources.
    pub fn hash_url(url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        hex::encode(hasher.finalize())[..16].to_string()
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.cache_root.join("packages")
    }

    pub fn toolchains_dir(&self) -> PathBuf {
        self.cache_root.join("toolchains")
    }

    pub fn platforms_dir(&self) -> PathBuf {
        self.cache_root.join("platforms")
    }

    pub fn libraries_dir(&self) -> PathBuf {
        self.cache_root.join("libraries")
    }

    pub fn package_path(&self, url: &str, version: &str, filename: &str) -> PathBuf {
        self.packages_dir().join(Self::hash_url(url)).join(version).join(filename)
    }

    pub fn toolchain_path(&self, url: &str, version: &str) -> PathBuf {
        self.toolchains_dir().join(Self::hash_url(url)).join(version)
    }

    pub fn platform_path(&self, url: &str, version: &str) -> PathBuf {
        self.platforms_dir().join(Self::hash_url(url)).join(version)
    }

    pub fn library_path(&self, url: &str, version: &str) -> PathBuf {
        self.libraries_dir().join(Self::hash_url(url)).join(version)
    }

    pub fn is_package_cached(&self, url: &str, version: &str, filename: &str) -> bool {
        self.package_path(url, version, filename).exists()
    }

    pub fn is_toolchain_cached(&self, url: &str, version: &str) -> bool {
        let p = self.toolchain_path(url, version);
        p.exists() && p.is_dir()
    }

    pub fn is_platform_cached(&self, url: &str, version: &str) -> bool {
        let p = self.platform_path(url, version);
        p.exists() && p.is_dir()
    }

    pub fn build_dir(&self, env: &str) -> PathBuf {
        self.build_root.join(env)
    }

    pub fn core_build_dir(&self, env: &str) -> PathBuf {
        self.build_dir(env).join("core")
    }

    pub fn src_build_dir(&self, env: &str) -> PathBuf {
        self.build_dir(env).join("src")
    }

    pub fn libs_build_dir(&self, env: &str) -> PathBuf {
        self.build_dir(env).join("libs")
    }

    /// Create the four top-level cache trees. Idempotent: a second call is
    /// a no-op.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in [
            self.packages_dir(),
            self.toolchains_dir(),
            self.platforms_dir(),
            self.libraries_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn ensure_build_directories(&self, env: &str) -> std::io::Result<()> {
        for dir in [
            self.build_dir(env),
            self.core_build_dir(env),
            self.src_build_dir(env),
            self.libs_build_dir(env),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Remove the per-environment build tree. Some hosts briefly hold
    /// read-only or in-use handles on freshly-written files; retry a
    /// handful of times before giving up.
    pub fn clean_build(&self, env: &str) -> Result<()> {
        let dir = self.build_dir(env);
        if !dir.exists() {
            return Ok(());
        }

        let mut last_err = None;
        for attempt in 0..3 {
            clear_readonly(&dir);
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_err = Some(e);
                    if attempt < 2 {
                        thread::sleep(Duration::from_millis(50));
                    }
                }
            }
        }
        Err(last_err.unwrap().into())
    }
}

/// Best-effort recursive clear of the read-only bit (Windows-relevant;
/// a no-op permission change on Unix).
fn clear_readonly(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if let Ok(metadata) = path.metadata() {
            let mut perms = metadata.permissions();
            if perms.readonly() {
                perms.set_readonly(false);
                let _ = std::fs::set_permissions(&path, perms);
            }
        }
        if path.is_dir() {
            clear_readonly(&path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_url_is_deterministic() {
        let a = Cache::hash_url("https://example.com/pkg.tar.gz");
        let b = Cache::hash_url("https://example.com/pkg.tar.gz");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn hash_url_differs_for_different_urls() {
        let a = Cache::hash_url("https://example.com/a.zip");
        let b = Cache::hash_url("https://example.com/b.zip");
        assert_ne!(a, b);
    }

    #[test]
    fn package_path_is_pure() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Cache::new(Some(tmp.path())).unwrap();
        let p1 = cache.package_path("https://x.example/a", "1.0.0", "a.zip");
        let p2 = cache.package_path("https://x.example/a", "1.0.0", "a.zip");
        assert_eq!(p1, p2);
        assert!(p1.ends_with("a.zip"));
    }

    #[test]
    fn ensure_directories_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Cache::new(Some(tmp.path())).unwrap();
        cache.ensure_directories().unwrap();
        cache.ensure_directories().unwrap();
        assert!(cache.packages_dir().is_dir());
        assert!(cache.libraries_dir().is_dir());
    }

    #[test]
    fn is_cached_predicates_check_existence_only() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Cache::new(Some(tmp.path())).unwrap();
        assert!(!cache.is_package_cached("https://x.example/a", "1.0.0", "a.zip"));

        let path = cache.package_path("https://x.example/a", "1.0.0", "a.zip");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"data").unwrap();
        assert!(cache.is_package_cached("https://x.example/a", "1.0.0", "a.zip"));
    }
}
