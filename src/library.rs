// ─────────────────────────────────────────────────────────────────────────────
//  fbuild :: library  —  dependency resolution, fetch, and build
//
//  Dependency specification grammar, one of:
//    • a URL (http/https)          — optimized to a GitHub archive zip
//    • owner/name[@version-spec]
//    • name[@version-spec]         — resolved via registry search
//    • a bare name
// ─────────────────────────────────────────────────────────────────────────────

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::downloader::extract_archive;
use crate::error::{FbuildError, Result};

const REGISTRY_URL: &str = "https://downloads.arduino.cc/libraries/library_index.json";
const CACHE_TTL_SECS: u64 = 86_400;

#[derive(Debug, Deserialize)]
pub struct RegistryIndex {
    pub libraries: Vec<RegistryEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryEntry {
    pub name: String,
    pub version: String,
    pub url: String,
    pub checksum: Option<String>,
    pub dependencies: Option<Vec<RegistryDep>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryDep {
    pub name: String,
    pub version: Option<String>,
}

/// A parsed dependency spec, per the grammar in the module doc comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencySpec {
    Url(String),
    OwnerName { owner: String, name: String, version: Option<String> },
    Name { name: String, version: Option<String> },
}

pub fn parse_dependency_spec(raw: &str) -> DependencySpec {
    let raw = raw.trim();
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return DependencySpec::Url(raw.to_string());
    }

    let (body, version) = match raw.split_once('@') {
        Some((b, v)) => (b, Some(v.to_string())),
        None => (raw, None),
    };

    if let Some((owner, name)) = body.split_once('/') {
        DependencySpec::OwnerName { owner: owner.to_string(), name: name.to_string(), version }
    } else {
        DependencySpec::Name { name: body.to_string(), version }
    }
}

/// Recognize GitHub repo URLs and optimize them to an archive zip URL.
/// If the URL already points at `/archive/`, it's returned unchanged;
/// otherwise `main` then `master` are HEAD-probed to pick the default
/// branch.
pub fn optimize_github_url(url: &str) -> Result<String> {
    let trimmed = url.trim_end_matches('/').trim_end_matches(".git");
    if !trimmed.contains("github.com") {
        return Ok(url.to_string());
    }
    if trimmed.contains("/archive/") {
        return Ok(url.to_string());
    }

    for branch in ["main", "master"] {
        let probe_url = format!("{trimmed}/archive/refs/heads/{branch}.zip");
        if head_ok(&probe_url) {
            return Ok(probe_url);
        }
    }

    Err(FbuildError::Library {
        name: trimmed.to_string(),
        reason: "could not determine default branch (tried main, master)".to_string(),
    })
}

fn head_ok(url: &str) -> bool {
    ureq::head(url)
        .call()
        .map(|resp| resp.status() < 400)
        .unwrap_or(false)
}

/// A resolved, on-disk library ready for the linker.
#[derive(Debug, Clone)]
pub struct LibraryRecord {
    pub name: String,
    pub root: PathBuf,
    pub archive: PathBuf,
    pub objects: Vec<PathBuf>,
    pub include_dirs: Vec<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct LibraryInfo {
    name: String,
    origin_url: String,
    version: String,
    commit_hash: Option<String>,
    compile_command: String,
}

pub struct LibraryManager<'a> {
    pub libs_root: &'a Path,
    pub registry_cache_dir: &'a Path,
    pub verbose: bool,
}

impl<'a> LibraryManager<'a> {
    pub fn new(libs_root: &'a Path, registry_cache_dir: &'a Path, verbose: bool) -> Self {
        Self { libs_root, registry_cache_dir, verbose }
    }

    /// Resolve a dependency spec to a download URL and directory name,
    /// downloading/extracting if not already present. Does not compile;
    /// that is the caller's job once sources + include dirs are known
    /// (see `discover_sources`). Returns `(name, install_dir, url, version)`
    /// so the caller can record an accurate `info.json` after compiling.
    pub fn ensure_library(&self, spec: &str) -> Result<(String, PathBuf, String, String)> {
        let parsed = parse_dependency_spec(spec);

        let (name, url, version) = match &parsed {
            DependencySpec::Url(url) => {
                let optimized = optimize_github_url(url)?;
                let name = library_name_from_url(&optimized);
                (name, optimized, "unknown".to_string())
            }
            DependencySpec::OwnerName { owner, name, version } => {
                let repo_url = format!("https://github.com/{owner}/{name}");
                let optimized = optimize_github_url(&repo_url)?;
                (name.clone(), optimized, version.clone().unwrap_or_else(|| "unknown".to_string()))
            }
            DependencySpec::Name { name, version } => {
                let index = self.load_registry_index()?;
                let entry = self.resolve_registry_entry(&index, name, version.as_deref())?;
                (entry.name.clone(), entry.url.clone(), entry.version.clone())
            }
        };

        let install_dir = self.libs_root.join(&name);
        let src_dir = install_dir.join("src");

        if !src_dir.exists() {
            let downloader = crate::downloader::Downloader::new(self.verbose);
            let cache_dir = self.registry_cache_dir.join("archives");
            downloader.download_and_extract(&url, &cache_dir, &src_dir, None)?;
        }

        self.write_info(&install_dir, &name, &url, &version, "")?;
        Ok((name, install_dir, url, version))
    }

    /// Prefer `src/src/` (the Arduino-library convention some libraries
    /// use); otherwise `src/`. Include dirs are that root plus any
    /// top-level `include`/`Include`/`INCLUDE`.
    pub fn discover_sources(&self, install_dir: &Path) -> (Vec<PathBuf>, Vec<PathBuf>) {
        let nested = install_dir.join("src").join("src");
        let root = if nested.is_dir() { nested } else { install_dir.join("src") };

        let mut sources = Vec::new();
        for entry in walkdir::WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() {
                if let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) {
                    if matches!(ext, "c" | "cpp" | "cc" | "cxx") {
                        sources.push(entry.into_path());
                    }
                }
            }
        }
        sources.sort();

        let mut includes = vec![root.clone()];
        for candidate in ["include", "Include", "INCLUDE"] {
            let dir = install_dir.join("src").join(candidate);
            if dir.is_dir() {
                includes.push(dir);
            }
        }

        (sources, includes)
    }

    /// A library needs rebuilding iff its archive is absent, `info.json`
    /// is absent, or the current compile-flag string differs from the
    /// one recorded in `info.json`.
    pub fn needs_rebuild(&self, install_dir: &Path, archive_path: &Path, compile_flags_fingerprint: &str) -> bool {
        if !archive_path.exists() {
            return true;
        }
        let info_path = install_dir.join("info.json");
        let Ok(data) = fs::read_to_string(&info_path) else { return true };
        let Ok(info) = serde_json::from_str::<LibraryInfo>(&data) else { return true };
        info.compile_command != compile_flags_fingerprint
    }

    pub fn record_build(&self, install_dir: &Path, name: &str, url: &str, version: &str, fingerprint: &str) -> Result<()> {
        self.write_info(install_dir, name, url, version, fingerprint)
    }

    fn write_info(&self, install_dir: &Path, name: &str, url: &str, version: &str, compile_command: &str) -> Result<()> {
        fs::create_dir_all(install_dir)?;
        let info = LibraryInfo {
            name: name.to_string(),
            origin_url: url.to_string(),
            version: version.to_string(),
            commit_hash: None,
            compile_command: compile_command.to_string(),
        };
        let json = serde_json::to_string_pretty(&info).map_err(|e| FbuildError::Library {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        fs::write(install_dir.join("info.json"), json)?;
        Ok(())
    }

    fn load_registry_index(&self) -> Result<RegistryIndex> {
        let cache_path = self.registry_cache_dir.join("library_index.json");

        if let Some(age) = file_age_secs(&cache_path) {
            if age < CACHE_TTL_SECS {
                let data = fs::read_to_string(&cache_path)?;
                return serde_json::from_str(&data)
                    .map_err(|e| FbuildError::RegistryLookup { name: "index".to_string(), reason: e.to_string() });
            }
        }

        let resp = ureq::get(REGISTRY_URL)
            .call()
            .map_err(|e| FbuildError::Network { url: REGISTRY_URL.to_string(), source: Box::new(e) })?;

        let mut body = Vec::with_capacity(24 * 1024 * 1024);
        resp.into_reader().read_to_end(&mut body)?;

        if let Some(parent) = cache_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&cache_path, &body)?;

        serde_json::from_slice(&body)
            .map_err(|e| FbuildError::RegistryLookup { name: "index".to_string(), reason: e.to_string() })
    }

    /// No semver range matching (spec non-goal): case-insensitive name
    /// match, optional exact-version pin, else the latest by numeric
    /// version-vector sort.
    fn resolve_registry_entry<'b>(
        &self,
        index: &'b RegistryIndex,
        name: &str,
        pin: Option<&str>,
    ) -> Result<&'b RegistryEntry> {
        let lower = name.to_lowercase();
        let mut candidates: Vec<&RegistryEntry> =
            index.libraries.iter().filter(|e| e.name.to_lowercase() == lower).collect();

        if candidates.is_empty() {
            return Err(FbuildError::RegistryLookup {
                name: name.to_string(),
                reason: "not found in registry".to_string(),
            });
        }

        if let Some(v) = pin {
            candidates.retain(|e| e.version == v);
            if candidates.is_empty() {
                return Err(FbuildError::RegistryLookup {
                    name: name.to_string(),
                    reason: format!("version '{v}' not found"),
                });
            }
        }

        candidates.sort_by(|a, b| parse_version_vector(&b.version).cmp(&parse_version_vector(&a.version)));
        Ok(candidates[0])
    }
}

impl<'a> LibraryManager<'a> {
    /// Case-insensitive substring match over the registry index, for the
    /// CLI's `lib search`. An empty query returns the whole index.
    pub fn search_registry(&self, query: &str) -> Result<Vec<RegistryEntry>> {
        let index = self.load_registry_index()?;
        let q = query.to_lowercase();
        Ok(index.libraries.into_iter().filter(|e| q.is_empty() || e.name.to_lowercase().contains(&q)).collect())
    }
}

fn parse_version_vector(s: &str) -> Vec<u32> {
    s.split('.').map(|p| p.parse::<u32>().unwrap_or(0)).collect()
}

fn library_name_from_url(url: &str) -> String {
    let trimmed = url.trim_end_matches(".zip").trim_end_matches('/');
    trimmed
        .rsplit('/')
        .nth(0)
        .and_then(|segment| {
            // GitHub archive URLs look like .../archive/refs/heads/main.zip;
            // prefer the repo name two segments further up in that case.
            if segment == "main" || segment == "master" {
                trimmed.rsplit('/').nth(4)
            } else {
                Some(segment)
            }
        })
        .unwrap_or("library")
        .to_string()
}

fn file_age_secs(path: &Path) -> Option<u64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let age = SystemTime::now().duration_since(modified).ok()?;
    Some(age.as_secs())
}

/// Re-extract an already-downloaded archive, used by `ensure_library`
/// indirectly via `Downloader::download_and_extract`; exposed here for
/// callers that already have a local archive path.
pub fn extract_library_archive(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    extract_archive(archive_path, dest_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_name() {
        assert_eq!(
            parse_dependency_spec("Adafruit_Sensor"),
            DependencySpec::Name { name: "Adafruit_Sensor".to_string(), version: None }
        );
    }

    #[test]
    fn parses_name_with_version() {
        assert_eq!(
            parse_dependency_spec("Adafruit_Sensor@1.2.3"),
            DependencySpec::Name { name: "Adafruit_Sensor".to_string(), version: Some("1.2.3".to_string()) }
        );
    }

    #[test]
    fn parses_owner_slash_name() {
        assert_eq!(
            parse_dependency_spec("adafruit/Adafruit_Sensor@1.2.3"),
            DependencySpec::OwnerName {
                owner: "adafruit".to_string(),
                name: "Adafruit_Sensor".to_string(),
                version: Some("1.2.3".to_string()),
            }
        );
    }

    #[test]
    fn parses_url() {
        let spec = parse_dependency_spec("https://github.com/owner/repo");
        assert_eq!(spec, DependencySpec::Url("https://github.com/owner/repo".to_string()));
    }

    #[test]
    fn github_archive_url_passthrough() {
        let url = "https://github.com/owner/repo/archive/refs/heads/main.zip";
        assert_eq!(optimize_github_url(url).unwrap(), url);
    }

    #[test]
    fn non_github_url_passthrough() {
        let url = "https://example.com/lib.zip";
        assert_eq!(optimize_github_url(url).unwrap(), url);
    }

    #[test]
    fn version_vector_sorts_numerically_not_lexically() {
        let mut versions = vec!["2.9.0", "2.10.0", "2.2.0"];
        versions.sort_by(|a, b| parse_version_vector(b).cmp(&parse_version_vector(a)));
        assert_eq!(versions, vec!["2.10.0", "2.9.0", "2.2.0"]);
    }

    #[test]
    fn discover_sources_prefers_nested_src_src() {
        let tmp = tempfile::tempdir().unwrap();
        let install_dir = tmp.path().join("MyLib");
        let nested = install_dir.join("src").join("src");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("impl.cpp"), b"// impl").unwrap();

        let mgr = LibraryManager::new(tmp.path(), tmp.path(), false);
        let (sources, includes) = mgr.discover_sources(&install_dir);
        assert_eq!(sources.len(), 1);
        assert!(includes[0].ends_with("src/src"));
    }

    #[test]
    fn needs_rebuild_when_archive_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = LibraryManager::new(tmp.path(), tmp.path(), false);
        let archive = tmp.path().join("libfoo.a");
        assert!(mgr.needs_rebuild(tmp.path(), &archive, "flags"));
    }

    #[test]
    fn needs_rebuild_when_fingerprint_differs() {
        let tmp = tempfile::tempdir().unwrap();
        let install_dir = tmp.path().join("lib");
        fs::create_dir_all(&install_dir).unwrap();
        let archive = install_dir.join("lib.a");
        fs::write(&archive, b"archive").unwrap();

        let mgr = LibraryManager::new(tmp.path(), tmp.path(), false);
        mgr.record_build(&install_dir, "lib", "url", "1.0", "-Os").unwrap();

        assert!(!mgr.needs_rebuild(&install_dir, &archive, "-Os"));
        assert!(mgr.needs_rebuild(&install_dir, &archive, "-O2"));
    }
}
