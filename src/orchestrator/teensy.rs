// ─────────────────────────────────────────────────────────────────────────────
//  fbuild :: orchestrator::teensy  —  Teensy 4.x build pipeline
//
//  Same shape as the AVR pipeline but against arm-none-eabi-gcc, with a
//  single combined core directory (no separate variant tree) and a
//  per-board linker script supplied by the framework package.
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
use crate::package::{framework_teensy, Framework, Package, Toolchain};
use crate::scanner;

use super::{ensure_and_compile_libraries, compile_sources, BuildOptions, BuildResult, CancelFlag};

/// Teensy 4.x is a single Cortex-M7 target; the MCU-specific flags that
/// would otherwise come from a per-board table are hardcoded here since
/// `teensy41` is the only board this crate currently resolves.
fn default_platform_config() -> PlatformConfig {
    PlatformConfig {
        compiler_flags: CompilerFlagsConfig {
            common: vec![
                "-Os".to_string(),
                "-g".to_string(),
                "-Wall".to_string(),
                "-ffunction-sections".to_string(),
                "-fdata-sections".to_string(),
                "-flto".to_string(),
                "-mcpu=cortex-m7".to_string(),
                "-mfpu=fpv5-d16".to_string(),
                "-mfloat-abi=hard".to_string(),
                "-mthumb".to_string(),
            ],
            c: vec!["-std=gnu11".to_string()],
            cxx: vec![
                "-std=gnu++14".to_string(),
                "-felide-constructors".to_string(),
                "-fno-exceptions".to_string(),
                "-fno-rtti".to_string(),
            ],
        },
        defines: Vec::new(),
        linker_scripts: Vec::new(),
        linker_flags: vec![
            "-Os".to_string(),
            "-mcpu=cortex-m7".to_string(),
            "-mfpu=fpv5-d16".to_string(),
            "-mfloat-abi=hard".to_string(),
            "-mthumb".to_string(),
            "-Wl,--gc-sections".to_string(),
        ],
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

    log::info!("[3/13] ensuring arm-none-eabi-gcc toolchain");
    let toolchain_root = Toolchain::Teensy.ensure(cache)?;
    let bin = |name: &str| toolchain_root.join("bin").join(name);
    let cc = bin("arm-none-eabi-gcc");
    let cxx = bin("arm-none-eabi-g++");
    let ar = bin("arm-none-eabi-ar");
    let objcopy = bin("arm-none-eabi-objcopy");
    let size_tool = bin("arm-none-eabi-size");

    cancel.check()?;
    log::info!("[4/13] ensuring cores-Teensy framework");
    let framework_root = Framework::Teensy.ensure(cache)?;

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

    let core_dir = framework_teensy::core_dir(&framework_root, board.core);
    let core_include_dirs = vec![core_dir.clone()];

    cancel.check()?;
    log::info!("[6/13] resolving {} library dependencies", env.lib_deps.len());
    let lib_cflags = flag_set.for_library();
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

    log::info!("[7/13] scanning sketch and core sources");
    let sketch = scanner::scan(&cache.project_dir, &src_build_dir, false)?;
    let framework_sources = scanner::scan_framework_sources(&core_dir, &cache.project_dir.join(".fbuild-nonexistent-variant"));

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

    cancel.check()?;
    log::info!("[9/13] compiling Teensy core");
    let core_objects = compile_sources(
        &framework_sources.core,
        &cc,
        &cxx,
        &flag_set,
        &core_include_dirs,
        &core_build_dir,
        cancel,
        opts.verbose,
    )?;
    let core_archive = core_build_dir.join("core.a");
    archiver::create(&ar, &core_archive, &core_objects)?;

    log::info!("[9/13] compiling sketch sources");
    let sketch_objects = compile_sources(
        &sketch.sketch,
        &cc,
        &cxx,
        &flag_set,
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
    let linker_script = framework_teensy::linker_script(&framework_root, board.core, board.variant);

    linker::link(&LinkRequest {
        linker: &cxx,
        objects: &sketch_objects,
        core_archive: Some(&core_archive),
        core_objects: &[],
        library_archives: &library_archives,
        library_objects: &[],
        linker_scripts: std::slice::from_ref(&linker_script),
        linker_flags: &platform.linker_flags,
        sdk_lib_dir: None,
        sdk_libs: &[],
        elf_path: &elf_path,
        map_path: &map_path,
        avr_extra_flags: &[],
    })?;

    log::info!("[11/13] generating firmware.hex");
    let hex_path = build_dir.join("firmware.hex");
    binary::generate_hex(&objcopy, &elf_path, &hex_path)?;

    log::info!("[12/13] no additional post-processing for Teensy targets");

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
