// ─────────────────────────────────────────────────────────────────────────────
//  fbuild :: compiler  —  single-translation-unit compilation
// ─────────────────────────────────────────────────────────────────────────────

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{FbuildError, Result};
use crate::trampoline::HeaderTrampolineCache;

const COMPILE_TIMEOUT: Duration = Duration::from_secs(60);
const MANIFEST_FILE: &str = ".fbuild-cache.json";

/// Per-file SHA-256 fingerprint cache, so unchanged sources are never
/// recompiled. Lives at `<build_dir>/.fbuild-cache.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CacheManifest {
    pub entries: HashMap<String, String>,
    pub flags_hash: String,
}

impl CacheManifest {
    pub fn load(build_dir: &Path) -> Self {
        let path = build_dir.join(MANIFEST_FILE);
        match fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, build_dir: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        fs::write(build_dir.join(MANIFEST_FILE), json)
    }

    pub fn is_fresh(&self, src: &Path, obj: &Path, flags_hash: &str) -> bool {
        if self.flags_hash != flags_hash || !obj.exists() {
            return false;
        }
        let key = src.to_string_lossy().to_string();
        match self.entries.get(&key) {
            Some(cached) => hash_file(src).as_deref() == Some(cached.as_str()),
            None => false,
        }
    }

    pub fn record(&mut self, src: &Path, flags_hash: &str) {
        let key = src.to_string_lossy().to_string();
        if let Some(hash) = hash_file(src) {
            self.entries.insert(key, hash);
        }
        self.flags_hash = flags_hash.to_owned();
    }
}

pub fn hash_file(path: &Path) -> Option<String> {
    let data = fs::read(path).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Some(hex::encode(hasher.finalize()))
}

pub fn hash_str(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

/// Map a source path to `<build_dir>/<shorthash>_<filename>.o`, avoiding
/// collisions between same-named files in different directories.
pub fn obj_path(build_dir: &Path, src: &Path) -> PathBuf {
    let fname = src.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| "unknown".into());
    let full = src.to_string_lossy();
    let short = &hex::encode(Sha256::digest(full.as_bytes()))[..8];
    build_dir.join(format!("{short}_{fname}.o"))
}

pub struct CompileRequest<'a> {
    pub compiler: &'a Path,
    pub source: &'a Path,
    pub object: &'a Path,
    pub flags: &'a [String],
    pub include_dirs: &'a [PathBuf],
    pub compiler_cache: Option<&'a Path>,
    pub trampolines: Option<&'a HeaderTrampolineCache>,
    pub trampoline_exclude: &'a [String],
    pub build_dir: &'a Path,
}

/// Compile one translation unit to one object file via a response file of
/// `-I` flags, an optional compiler-cache wrapper, and a bounded timeout.
pub fn compile(req: &CompileRequest) -> Result<()> {
    let is_bare_name = req.compiler.components().count() == 1;
    if !req.compiler.exists() && !is_bare_name {
        return Err(FbuildError::CompilerNotFound(req.compiler.to_path_buf()));
    }
    if !req.source.exists() {
        return Err(FbuildError::SourceNotFound(req.source.to_path_buf()));
    }
    if let Some(parent) = req.object.parent() {
        fs::create_dir_all(parent)?;
    }

    let effective_includes: Vec<PathBuf> = if cfg!(windows) {
        match req.trampolines {
            Some(cache) => cache.generate_trampolines(req.include_dirs, req.trampoline_exclude),
            None => req.include_dirs.to_vec(),
        }
    } else {
        req.include_dirs.to_vec()
    };

    let include_flags: Vec<String> = effective_includes
        .iter()
        .map(|p| format!("-I{}", p.to_string_lossy().replace('\\', "/")))
        .collect();

    let rsp_path = req.build_dir.join("includes.rsp");
    fs::create_dir_all(req.build_dir)?;
    {
        let mut f = fs::File::create(&rsp_path)?;
        for flag in &include_flags {
            writeln!(f, "{flag}")?;
        }
    }

    let mut argv: Vec<String> = Vec::new();
    if let Some(wrapper) = req.compiler_cache {
        argv.push(wrapper.to_string_lossy().to_string());
    }
    argv.push(req.compiler.to_string_lossy().replace('\\', "/"));
    argv.extend(req.flags.iter().cloned());
    argv.push(format!("@{}", rsp_path.to_string_lossy()));
    argv.push("-c".to_string());
    argv.push(req.source.to_string_lossy().to_string());
    argv.push("-o".to_string());
    argv.push(req.object.to_string_lossy().to_string());

    run_with_timeout(&argv, req.source, COMPILE_TIMEOUT)
}

fn run_with_timeout(argv: &[String], source: &Path, timeout: Duration) -> Result<()> {
    let (program, args) = argv.split_first().expect("argv always has a program");

    let mut child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|_| FbuildError::CompilerNotFound(PathBuf::from(program)))?;

    let start = Instant::now();
    loop {
        match child.try_wait()? {
            Some(status) => {
                let mut stdout = String::new();
                let mut stderr = String::new();
                if let Some(mut out) = child.stdout.take() {
                    use std::io::Read;
                    let _ = out.read_to_string(&mut stdout);
                }
                if let Some(mut err) = child.stderr.take() {
                    use std::io::Read;
                    let _ = err.read_to_string(&mut stderr);
                }

                return if status.success() {
                    Ok(())
                } else {
                    Err(FbuildError::Compilation { source: source.to_path_buf(), stdout, stderr })
                };
            }
            None => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(FbuildError::CompilationTimeout(source.to_path_buf()));
                }
                std::thread::sleep(Duration::from_millis(25));
            }
        }
    }
}

/// Prepend `#include <Arduino.h>` and two newlines to an `.ino`, writing
/// it to the ESP32-style output path (used when a project has exactly
/// one `.ino` and the caller doesn't need full multi-file preprocessing).
pub fn preprocess_single_ino(ino_path: &Path, out_path: &Path) -> Result<()> {
    let body = fs::read_to_string(ino_path)?;
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(out_path, format!("#include <Arduino.h>\n\n{body}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_manifest_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("main.cpp");
        fs::write(&src, b"int main() {}").unwrap();
        let obj = tmp.path().join("main.o");
        fs::write(&obj, b"fake object").unwrap();

        let mut manifest = CacheManifest::default();
        let flags_hash = hash_str("-O2");
        assert!(!manifest.is_fresh(&src, &obj, &flags_hash));

        manifest.record(&src, &flags_hash);
        assert!(manifest.is_fresh(&src, &obj, &flags_hash));
    }

    #[test]
    fn cache_manifest_invalidates_on_flag_change() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("main.cpp");
        fs::write(&src, b"int main() {}").unwrap();
        let obj = tmp.path().join("main.o");
        fs::write(&obj, b"fake").unwrap();

        let mut manifest = CacheManifest::default();
        manifest.record(&src, &hash_str("-O2"));
        assert!(!manifest.is_fresh(&src, &obj, &hash_str("-O3")));
    }

    #[test]
    fn cache_manifest_invalidates_on_content_change() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("main.cpp");
        fs::write(&src, b"int main() {}").unwrap();
        let obj = tmp.path().join("main.o");
        fs::write(&obj, b"fake").unwrap();

        let flags_hash = hash_str("-O2");
        let mut manifest = CacheManifest::default();
        manifest.record(&src, &flags_hash);

        fs::write(&src, b"int main() { return 1; }").unwrap();
        assert!(!manifest.is_fresh(&src, &obj, &flags_hash));
    }

    #[test]
    fn obj_path_avoids_collisions_for_same_named_files() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a").join("main.cpp");
        let b = tmp.path().join("b").join("main.cpp");
        let build = tmp.path().join("build");

        assert_ne!(obj_path(&build, &a), obj_path(&build, &b));
    }

    #[test]
    fn missing_source_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let compiler = tmp.path().join("fake-gcc");
        fs::write(&compiler, b"#!/bin/sh\n").unwrap();
        let source = tmp.path().join("missing.cpp");
        let object = tmp.path().join("missing.o");
        let build_dir = tmp.path().join("build");

        let req = CompileRequest {
            compiler: &compiler,
            source: &source,
            object: &object,
            flags: &[],
            include_dirs: &[],
            compiler_cache: None,
            trampolines: None,
            trampoline_exclude: &[],
            build_dir: &build_dir,
        };

        let err = compile(&req).unwrap_err();
        assert!(matches!(err, FbuildError::SourceNotFound(_)));
    }
}
