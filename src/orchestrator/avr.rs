// ─────────────────────────────────────────────────────────────────────────────
//  fbuild :: orchestrator::avr  —  AVR build pipeline
//
//  Mirrors the original orchestrator_avr.py phase-by-phase, using avr-gcc/
//  avr-g++/avr-ar/avr-objcopy/avr-size directly (no ESP32-style umbrella
//  platform package, no bootloader/partition post-processing).
// ─────────────────────────────────────────────────────────────────────────────

use std::time::Instant;

use crate::archiver;
use crate::binary;
use crate::board::Board;
use crate::cache::Cache;
use crate::config::EnvironmentConfig;
use crate::error::Result;
use crate::flags::{CompilerFlagsConfig, FlagBuilder, PlatformConfig};
use crate::linker::{self, LinkRequest};
use crate::package::{Framework, Package, Toolchain};
use crate::scanner;

use super::{ensure_and_compile_libraries, compile_sources, BuildOptions, BuildResult, CancelFlag};

/// The flags the upstream AVR Boards platform bakes into every sketch,
/// independent of project config: `-Os -w -ffunction-sections
/// -fdata-sections -flto -MMD` plus gnu11/gnu++11 dialect selection.
fn default_platform_config() -> PlatformConfig {
    PlatformConfig {
        compiler_flags: CompilerFlagsConfig {
            common: vec![
                "-Os".to_string(),
                "-w".to_string(),
                "-ffunction-sections".to_string(),
                "-fdata-sections".to_string(),
                "-flto".to_string(),
                "-MMD".to_string(),
            ],
            c: vec!["-std=gnu11".to_string()],
            cxx: vec![
                "-std=gnu++11".to_string(),
                "-fpermissive".to_string(),
                "-fno-exceptions".to_string(),
                "-fno-threadsafe-statics".to_string(),
                "-Wno-error=narrowing".to_string(),
            ],
        },
        defines: Vec::new(),
        linker_scripts: Vec::new(),
        linker_flags: Vec::new(),
    }
}

pub(crate) fn run(
    cache: &Cache,
    env_name: &str,
    env: &EnvironmentConfig,
    board: &Board,
    opts: &BuildOptions,
    cancel: &CancelFlag,
    start: Instant,
) -> Result<BuildResult> {
    cancel.check()?;

    log::info!("[3/13] ensuring avr-gcc toolchain");
    let toolchain_root = Toolchain::Avr.ensure(cache)?;
    let bin = |name: &str| toolchain_root.join("bin").join(name);
    let cc = bin("avr-gcc");
    let cxx = bin("avr-g++");
    let ar = bin("avr-ar");
    let objcopy = bin("avr-objcopy");
    let size_tool = bin("avr-size");

    cancel.check()?;
    log::info!("[4/13] ensuring ArduinoCore-avr framework");
    let framework_root = Framework::Avr.ensure(cache)?;

    log::info!("[5/13] preparing build directories for '{env_name}'");
    if opts.clean {
        cache.clean_build(env_name)?;
    }
    cache.ensure_build_directories(env_name)?;
    let build_dir = cache.build_dir(env_name);
    let core_build_dir = cache.core_build_dir(env_name);
    let src_build_dir = cache.src_build_dir(env_name);
    let libs_build_dir = cache.libs_build_dir(env_name);

    let platform = super::load_platform_config(&cache.project_dir, default_platform_config());
    let flag_set = FlagBuilder::new(&platform, board, &env.build_flags).build_flags();

    let core_dir = framework_root.join("cores").join(board.core);
    let variant_dir = framework_root.join("variants").join(board.variant);
    let core_include_dirs = vec![core_dir.clone(), variant_dir.clone()];

    cancel.check()?;
    log::info!("[6/13] resolving {} library dependencies", env.lib_deps.len());
    let mut lib_cflags = flag_set.for_library();
    lib_cflags.push(format!("-mmcu={}", board.mcu));
    let libraries = ensure_and_compile_libraries(
        &env.lib_deps,
        &libs_build_dir,
        &cache.libraries_dir(),
        &cc,
        &cxx,
        &ar,
        &lib_cflags,
        &core_include_dirs,
        opts.verbose,
        cancel,
    )?;

    log::info!("[7/13] scanning sketch and framework sources");
    let sketch = scanner::scan(&cache.project_dir, &src_build_dir, false)?;
    let framework_sources = scanner::scan_framework_sources(&core_dir, &variant_dir);

    if sketch.sketch.is_empty() {
        return Err(crate::error::FbuildError::Configuration(format!(
            "no sketch sources found under {}",
            cache.project_dir.display()
        )));
    }

    log::info!("[8/13] assembling compiler flag set");
    let mut include_dirs = core_include_dirs.clone();
    for lib in &libraries {
        include_dirs.extend(lib.include_dirs.clone());
    }

    let mut mcu_flags = flag_set.clone();
    mcu_flags.common.push(format!("-mmcu={}", board.mcu));

    cancel.check()?;
    log::info!("[9/13] compiling Arduino core");
    let core_objects = compile_sources(
        &framework_sources.core,
        &cc,
        &cxx,
        &mcu_flags,
        &core_include_dirs,
        &core_build_dir,
        cancel,
        opts.verbose,
    )?;
    let variant_objects = compile_sources(
        &framework_sources.variant,
        &cc,
        &cxx,
        &mcu_flags,
        &core_include_dirs,
        &core_build_dir,
        cancel,
        opts.verbose,
    )?;
    let mut core_all_objects = core_objects;
    core_all_objects.extend(variant_objects);

    let core_archive = core_build_dir.join("core.a");
    archiver::create(&ar, &core_archive, &core_all_objects)?;

    log::info!("[9/13] compiling sketch sources");
    let sketch_objects = compile_sources(
        &sketch.sketch,
        &cc,
        &cxx,
        &mcu_flags,
        &include_dirs,
        &src_build_dir,
        cancel,
        opts.verbose,
    )?;

    cancel.check()?;
    log::info!("[10/13] linking firmware.elf");
    let elf_path = build_dir.join("firmware.elf");
    let map_path = build_dir.join("firmware.map");
    let library_archives: Vec<_> = libraries.iter().map(|l| l.archive.clone()).collect();
    let avr_extra_flags = linker::avr_flags(board.mcu);

    linker::link(&LinkRequest {
        linker: &cxx,
        objects: &sketch_objects,
        core_archive: Some(&core_archive),
        core_objects: &[],
        library_archives: &library_archives,
        library_objects: &[],
        linker_scripts: &[],
        linker_flags: &platform.linker_flags,
        sdk_lib_dir: None,
        sdk_libs: &[],
        elf_path: &elf_path,
        map_path: &map_path,
        avr_extra_flags: &avr_extra_flags,
    })?;

    log::info!("[11/13] generating firmware.hex");
    let hex_path = build_dir.join("firmware.hex");
    binary::generate_hex(&objcopy, &elf_path, &hex_path)?;

    log::info!("[12/13] no additional post-processing for AVR targets");

    log::info!("[13/13] collecting size report");
    let size_report = linker::read_size(&size_tool, &elf_path, board.max_flash_bytes, board.max_ram_bytes)?;
    size_report.check_flash_overflow()?;

    if opts.verbose {
        println!(
            "Flash: {}/{} bytes ({:.1}%)  RAM: {}/{} bytes ({:.1}%)",
            size_report.flash_used(),
            size_report.max_flash,
            size_report.flash_percent(),
            size_report.ram_used(),
            size_report.max_ram,
            size_report.ram_percent(),
        );
    }

    Ok(BuildResult::success(env_name, Some(hex_path), None, elf_path, size_report, start.elapsed()))
}
