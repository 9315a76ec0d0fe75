// ─────────────────────────────────────────────────────────────────────────────
//  fbuild :: trampoline  —  Windows command-line-length mitigation
//
//  GCC invocations built from deep framework/SDK trees can accumulate
//  hundreds of long -I paths. CreateProcess() on Windows enforces a hard
//  ~32 KiB command-line limit, and a compiler-cache wrapper that expands
//  response files before invoking the child process hits that limit
//  directly. This rewrites a long include-path list into short numbered
//  directories, each containing trampoline headers that #include the
//  original by absolute path, preserving include order exactly.
// ─────────────────────────────────────────────────────────────────────────────

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

#[derive(Debug, Serialize, Deserialize, Default)]
struct TrampolineMetadata {
    schema_version: u32,
    include_hash: String,
    original_paths: Vec<String>,
    generated_paths: Vec<String>,
    host_os: String,
}

const SCHEMA_VERSION: u32 = 1;
const METADATA_FILE: &str = ".metadata.json";

pub struct HeaderTrampolineCache {
    pub cache_root: PathBuf,
}

impl HeaderTrampolineCache {
    pub fn new(cache_root: Option<PathBuf>) -> Self {
        let cache_root = cache_root.unwrap_or_else(default_cache_root);
        Self { cache_root }
    }

    fn metadata_path(&self) -> PathBuf {
        self.cache_root.join(METADATA_FILE)
    }

    /// True if the cache needs regeneration: missing, or the resolved
    /// include-path list's hash doesn't match the recorded one.
    pub fn needs_regeneration(&self, include_paths: &[PathBuf]) -> bool {
        if !self.cache_root.exists() || !self.metadata_path().exists() {
            return true;
        }
        let Ok(data) = std::fs::read_to_string(self.metadata_path()) else { return true };
        let Ok(metadata) = serde_json::from_str::<TrampolineMetadata>(&data) else { return true };
        metadata.include_hash != compute_include_hash(include_paths)
    }

    /// Generate (or reuse a still-fresh) trampoline cache and return the
    /// rewritten include-path list. Paths matching any `exclude_patterns`
    /// substring remain unchanged at their original index; order and
    /// length of the returned list always match the input.
    pub fn generate_trampolines(
        &self,
        include_paths: &[PathBuf],
        exclude_patterns: &[String],
    ) -> Vec<PathBuf> {
        if !self.needs_regeneration(include_paths) {
            if let Some(cached) = self.load_generated_paths() {
                if cached.len() == include_paths.len() {
                    return cached;
                }
            }
        }

        match self.regenerate(include_paths, exclude_patterns) {
            Ok(rewritten) => rewritten,
            Err(e) => {
                log::warn!("trampoline cache regeneration failed, falling back to original include list: {e}");
                include_paths.to_vec()
            }
        }
    }

    fn load_generated_paths(&self) -> Option<Vec<PathBuf>> {
        let data = std::fs::read_to_string(self.metadata_path()).ok()?;
        let metadata: TrampolineMetadata = serde_json::from_str(&data).ok()?;
        Some(metadata.generated_paths.into_iter().map(PathBuf::from).collect())
    }

    fn regenerate(
        &self,
        include_paths: &[PathBuf],
        exclude_patterns: &[String],
    ) -> std::io::Result<Vec<PathBuf>> {
        if self.cache_root.exists() {
            std::fs::remove_dir_all(&self.cache_root)?;
        }
        std::fs::create_dir_all(&self.cache_root)?;

        let excluded: HashSet<usize> = include_paths
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                let s = p.to_string_lossy();
                exclude_patterns.iter().any(|pat| s.contains(pat.as_str()))
            })
            .map(|(i, _)| i)
            .collect();

        let mut rewritten = Vec::with_capacity(include_paths.len());
        let mut trampoline_index = 0usize;

        for (i, original) in include_paths.iter().enumerate() {
            if excluded.contains(&i) {
                rewritten.push(original.clone());
                continue;
            }

            let numbered = self.cache_root.join(format!("{trampoline_index:03}"));
            trampoline_index += 1;

            if let Err(e) = generate_trampoline_dir(original, &numbered) {
                log::warn!("failed generating trampoline for {}: {e}", original.display());
            }
            rewritten.push(numbered);
        }

        let metadata = TrampolineMetadata {
            schema_version: SCHEMA_VERSION,
            include_hash: compute_include_hash(include_paths),
            original_paths: include_paths.iter().map(|p| p.to_string_lossy().to_string()).collect(),
            generated_paths: rewritten.iter().map(|p| p.to_string_lossy().to_string()).collect(),
            host_os: std::env::consts::OS.to_string(),
        };
        let json = serde_json::to_string_pretty(&metadata).unwrap_or_default();
        std::fs::write(self.metadata_path(), json)?;

        Ok(rewritten)
    }
}

fn default_cache_root() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("C:/inc")
    } else {
        PathBuf::from("/tmp/inc")
    }
}

fn compute_include_hash(include_paths: &[PathBuf]) -> String {
    let joined = include_paths
        .iter()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .collect::<Vec<_>>()
        .join("\n");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hex::encode(hasher.finalize())
}

/// For every header found under `original_dir`, write a trampoline at the
/// matching relative path inside `trampoline_dir` whose sole content
/// `#include`s the original by absolute forward-slash path.
fn generate_trampoline_dir(original_dir: &Path, trampoline_dir: &Path) -> std::io::Result<()> {
    if !original_dir.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(trampoline_dir)?;

    for entry in WalkDir::new(original_dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let is_header = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| matches!(ext, "h" | "hpp" | "hh" | "hxx"))
            .unwrap_or(false);
        if !is_header {
            continue;
        }

        let rel = entry.path().strip_prefix(original_dir).unwrap_or(entry.path());
        let dest = trampoline_dir.join(rel);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let abs = entry.path().canonicalize().unwrap_or_else(|_| entry.path().to_path_buf());
        let abs_forward = abs.to_string_lossy().replace('\\', "/");
        let content = format!("#pragma once\n#include \"{abs_forward}\"\n");
        std::fs::write(dest, content)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_and_length_are_preserved() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        let c = tmp.path().join("c");
        for d in [&a, &b, &c] {
            std::fs::create_dir_all(d.join("sub")).unwrap();
            std::fs::write(d.join("sub").join("h.h"), "// header").unwrap();
        }

        let cache = HeaderTrampolineCache::new(Some(tmp.path().join("inc")));
        let includes = vec![a.clone(), b.clone(), c.clone()];
        let rewritten = cache.generate_trampolines(&includes, &[]);

        assert_eq!(rewritten.len(), 3);
        assert_eq!(rewritten[0], tmp.path().join("inc").join("000"));
        assert_eq!(rewritten[1], tmp.path().join("inc").join("001"));
        assert_eq!(rewritten[2], tmp.path().join("inc").join("002"));
    }

    #[test]
    fn excluded_paths_stay_at_original_index() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        let excluded = tmp.path().join("relative_includes_here");
        let c = tmp.path().join("c");
        for d in [&a, &excluded, &c] {
            std::fs::create_dir_all(d).unwrap();
        }

        let cache = HeaderTrampolineCache::new(Some(tmp.path().join("inc")));
        let includes = vec![a, excluded.clone(), c];
        let rewritten = cache.generate_trampolines(&includes, &["relative_includes".to_string()]);

        assert_eq!(rewritten.len(), 3);
        assert_eq!(rewritten[1], excluded);
    }

    #[test]
    fn invalidates_only_when_hash_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        std::fs::create_dir_all(&a).unwrap();

        let cache = HeaderTrampolineCache::new(Some(tmp.path().join("inc")));
        assert!(cache.needs_regeneration(&[a.clone()]));
        cache.generate_trampolines(&[a.clone()], &[]);
        assert!(!cache.needs_regeneration(&[a.clone()]));

        let b = tmp.path().join("b");
        std::fs::create_dir_all(&b).unwrap();
        assert!(cache.needs_regeneration(&[a, b]));
    }

    #[test]
    fn trampoline_header_contains_pragma_once_and_absolute_include() {
        let tmp = tempfile::tempdir().unwrap();
        let original = tmp.path().join("orig");
        std::fs::create_dir_all(&original).unwrap();
        std::fs::write(original.join("FreeRTOS.h"), "// original").unwrap();

        let cache = HeaderTrampolineCache::new(Some(tmp.path().join("inc")));
        let rewritten = cache.generate_trampolines(&[original.clone()], &[]);

        let generated = std::fs::read_to_string(rewritten[0].join("FreeRTOS.h")).unwrap();
        assert!(generated.starts_with("#pragma once\n"));
        assert!(generated.contains("#include \""));
        assert!(generated.contains("FreeRTOS.h"));
    }
}
