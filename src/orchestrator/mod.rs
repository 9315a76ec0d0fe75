// ─────────────────────────────────────────────────────────────────────────────
//  fbuild :: orchestrator  —  per-environment build pipeline
//
//  One module per platform family (avr/esp32/teensy) behind the shared
//  `build()` entry point here, dispatching on the resolved board's
//  `PlatformFamily`. Each platform module runs the same thirteen phases the
//  original `orchestrator_avr.py`/`orchestrator_esp.py` walked through by
//  hand; this module only holds what every family shares: `BuildResult`,
//  the cancellation flag, config/board resolution, and the generic
//  compile/archive/library helpers the three platform modules all call into.
// ─────────────────────────────────────────────────────────────────────────────

pub mod avr;
pub mod esp32;
pub mod teensy;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::board::{self, PlatformFamily};
use crate::cache::Cache;
use crate::compiler::{self, hash_str, obj_path, CacheManifest, CompileRequest};
use crate::config::{EnvironmentConfig, ProjectConfig};
use crate::error::{FbuildError, Result};
use crate::flags::FlagSet;
use crate::library::LibraryManager;
use crate::linker::SizeReport;

/// Outcome of one `build()` call, mirroring the original system's
/// `BuildResult` dataclass. A failed compile/link/etc. is captured here as
/// `success: false` with a message, not surfaced as an `Err` — only a user
/// interrupt propagates as an error (see `build`).
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub success: bool,
    pub environment: String,
    pub hex_path: Option<PathBuf>,
    pub bin_path: Option<PathBuf>,
    pub elf_path: Option<PathBuf>,
    pub size_report: Option<SizeReport>,
    pub build_time: Duration,
    pub message: String,
}

impl BuildResult {
    fn failure(environment: &str, message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: false,
            environment: environment.to_string(),
            hex_path: None,
            bin_path: None,
            elf_path: None,
            size_report: None,
            build_time: elapsed,
            message: message.into(),
        }
    }

    fn success(
        environment: &str,
        hex_path: Option<PathBuf>,
        bin_path: Option<PathBuf>,
        elf_path: PathBuf,
        size_report: SizeReport,
        elapsed: Duration,
    ) -> Self {
        Self {
            success: true,
            environment: environment.to_string(),
            hex_path,
            bin_path,
            elf_path: Some(elf_path),
            size_report: Some(size_report),
            build_time: elapsed,
            message: "build succeeded".to_string(),
        }
    }
}

/// Cooperative cancellation flag shared between the library and its caller.
/// The library only ever reads it, at I/O suspension points (download loop
/// iterations, subprocess wait-polls); wiring a `ctrlc` handler that sets it
/// is the CLI shell's job, never the library's.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(FbuildError::Interrupted)
        } else {
            Ok(())
        }
    }
}

/// Load a project-supplied `platform.json` if present, else fall back to
/// `default` (the board family's built-in flag set). A malformed override
/// is logged and ignored rather than failing the whole build.
pub(crate) fn load_platform_config(
    project_dir: &Path,
    default: crate::flags::PlatformConfig,
) -> crate::flags::PlatformConfig {
    let custom = project_dir.join("platform.json");
    if custom.is_file() {
        match crate::config::load_platform_config(&custom) {
            Ok(cfg) => return cfg,
            Err(e) => log::warn!("failed to parse {}, using built-in defaults: {e}", custom.display()),
        }
    }
    default
}

pub struct BuildOptions {
    pub env: Option<String>,
    pub clean: bool,
    pub verbose: bool,
}

/// Parse `platformio.ini`, resolve the requested (or default) environment
/// and its board, and dispatch to the matching platform orchestrator.
///
/// Every failure short of a user interrupt is folded into a failed
/// `BuildResult` with a descriptive message; `FbuildError::Interrupted`
/// propagates unconverted, per spec: user interrupts are never swallowed.
pub fn build(project_dir: &Path, opts: &BuildOptions, cancel: &CancelFlag) -> Result<BuildResult> {
    let start = Instant::now();
    let env_name = opts.env.clone().unwrap_or_default();

    match run(project_dir, opts, cancel) {
        Ok(result) => Ok(result),
        Err(FbuildError::Interrupted) => Err(FbuildError::Interrupted),
        Err(e) => Ok(BuildResult::failure(&env_name, e.to_string(), start.elapsed())),
    }
}

fn run(project_dir: &Path, opts: &BuildOptions, cancel: &CancelFlag) -> Result<BuildResult> {
    let start = Instant::now();
    cancel.check()?;

    // Phase 1: parse project configuration.
    let ini_path = project_dir.join("platformio.ini");
    log::info!("[1/13] parsing project configuration at {}", ini_path.display());
    let project = ProjectConfig::load(&ini_path)?;

    let requested: Vec<String> = opts.env.clone().into_iter().collect();
    let env_name = project
        .selected_envs(&requested)
        .into_iter()
        .next()
        .ok_or_else(|| FbuildError::Configuration("no environment selected and none configured".to_string()))?;
    let env = project.environment(&env_name)?.clone();

    if opts.verbose {
        println!("Building environment '{env_name}'");
    }

    // Phase 2: resolve the board and its platform family.
    log::info!("[2/13] resolving board '{}'", env.board);
    let board = board::resolve(&env.board, &env.board_build, env.platform.as_deref())?;

    let cache = Cache::new(Some(project_dir))?;
    cache.ensure_directories()?;

    let result = match board.family() {
        PlatformFamily::Avr => avr::run(&cache, &env_name, &env, &board, opts, cancel, start),
        PlatformFamily::Esp32 => esp32::run(&cache, &env_name, &env, &board, opts, cancel, start),
        PlatformFamily::Teensy => teensy::run(&cache, &env_name, &env, &board, opts, cancel, start),
    };

    result.or_else(|e| match e {
        FbuildError::Interrupted => Err(e),
        other => Ok(BuildResult::failure(&env_name, other.to_string(), start.elapsed())),
    })
}

/// Phase 7/9/etc: compile every source in `sources` into an object file
/// under `obj_dir`, reusing anything the incremental-cache manifest still
/// considers fresh. Objects come back in input order regardless of which
/// ones were recompiled, matching the ordering guarantee the spec places on
/// parallel compilation — this orchestrator compiles sequentially, which
/// gets the same guarantee for free.
pub fn compile_sources(
    sources: &[PathBuf],
    cc: &Path,
    cxx: &Path,
    extra_flags_by_ext: &FlagSet,
    include_dirs: &[PathBuf],
    obj_dir: &Path,
    cancel: &CancelFlag,
    verbose: bool,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(obj_dir)?;
    let mut manifest = CacheManifest::load(obj_dir);
    let flags_hash = hash_str(&format!(
        "{:?}|{:?}|{:?}|{:?}",
        extra_flags_by_ext.common, extra_flags_by_ext.cflags, extra_flags_by_ext.cxxflags, include_dirs
    ));

    let mut objects = Vec::with_capacity(sources.len());
    for src in sources {
        cancel.check()?;
        let obj = obj_path(obj_dir, src);

        if manifest.is_fresh(src, &obj, &flags_hash) {
            if verbose {
                println!("  [cache] {}", src.display());
            }
            objects.push(obj);
            continue;
        }

        let is_c = src.extension().and_then(|e| e.to_str()) == Some("c");
        let is_asm = src.extension().and_then(|e| e.to_str()) == Some("S");
        let compiler = if is_c || is_asm { cc } else { cxx };

        let mut file_flags = extra_flags_by_ext.common.clone();
        if is_asm {
            file_flags.push("-x".to_string());
            file_flags.push("assembler-with-cpp".to_string());
        } else if is_c {
            file_flags.extend(extra_flags_by_ext.cflags.clone());
        } else {
            file_flags.extend(extra_flags_by_ext.cxxflags.clone());
        }

        if verbose {
            println!("  [compile] {}", src.display());
        }

        let req = CompileRequest {
            compiler,
            source: src,
            object: &obj,
            flags: &file_flags,
            include_dirs,
            compiler_cache: None,
            trampolines: None,
            trampoline_exclude: &[],
            build_dir: obj_dir,
        };
        compiler::compile(&req)?;
        manifest.record(src, &flags_hash);
        objects.push(obj);
    }

    manifest.save(obj_dir)?;
    Ok(objects)
}

/// One compiled-and-archived library dependency, ready for the linker.
pub(crate) struct CompiledLibrary {
    pub archive: PathBuf,
    pub include_dirs: Vec<PathBuf>,
}

/// Phase 6: resolve and build every `lib_deps` entry into a static archive,
/// skipping the compile step entirely when the library's recorded
/// fingerprint still matches (spec §4.10's library build-freshness check).
pub(crate) fn ensure_and_compile_libraries(
    lib_deps: &[String],
    libs_root: &Path,
    registry_cache_dir: &Path,
    cc: &Path,
    cxx: &Path,
    archiver_tool: &Path,
    lib_flags: &[String],
    extra_includes: &[PathBuf],
    verbose: bool,
    cancel: &CancelFlag,
) -> Result<Vec<CompiledLibrary>> {
    let mgr = LibraryManager::new(libs_root, registry_cache_dir, verbose);
    let fingerprint = hash_str(&lib_flags.join(" "));
    let mut results = Vec::with_capacity(lib_deps.len());

    for spec in lib_deps {
        cancel.check()?;
        log::info!("resolving library dependency '{spec}'");
        let (name, install_dir, url, version) = mgr.ensure_library(spec)?;
        let (sources, lib_include_dirs) = mgr.discover_sources(&install_dir);

        let mut includes = lib_include_dirs.clone();
        includes.extend(extra_includes.iter().cloned());

        let archive_path = install_dir.join(format!("lib{name}.a"));

        if mgr.needs_rebuild(&install_dir, &archive_path, &fingerprint) {
            let obj_dir = install_dir.join("lib-obj");
            std::fs::create_dir_all(&obj_dir)?;

            let mut objects = Vec::with_capacity(sources.len());
            for src in &sources {
                cancel.check()?;
                let is_c = src.extension().and_then(|e| e.to_str()) == Some("c");
                let compiler = if is_c { cc } else { cxx };
                let stem = src.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
                let obj = obj_dir.join(format!("{stem}.o"));

                let req = CompileRequest {
                    compiler,
                    source: src,
                    object: &obj,
                    flags: lib_flags,
                    include_dirs: &includes,
                    compiler_cache: None,
                    trampolines: None,
                    trampoline_exclude: &[],
                    build_dir: &obj_dir,
                };
                compiler::compile(&req)?;
                objects.push(obj);
            }

            if !objects.is_empty() {
                crate::archiver::create(archiver_tool, &archive_path, &objects)?;
            }
            mgr.record_build(&install_dir, &name, &url, &version, &fingerprint)?;
        } else if verbose {
            println!("  [cache] library '{name}' is up to date");
        }

        results.push(CompiledLibrary { archive: archive_path, include_dirs: includes });
    }

    Ok(results)
}
