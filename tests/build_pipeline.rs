// Exercises the compile -> archive -> link -> post-process chain the
// orchestrator's AVR pipeline drives, against fake `avr-*` tools standing
// in for the real toolchain. Package acquisition (network) is out of
// scope for these tests; they start from an already-"installed" core.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use fbuild::archiver;
use fbuild::binary;
use fbuild::board::Board;
use fbuild::error::FbuildError;
use fbuild::flags::{FlagBuilder, PlatformConfig};
use fbuild::linker::{self, LinkRequest};
use fbuild::orchestrator::{compile_sources, CancelFlag};
use fbuild::scanner;

const BLINK_SKETCH: &str = "void setup() {\n  pinMode(13, OUTPUT);\n}\n\nvoid loop() {\n  digitalWrite(13, HIGH);\n  delay(1000);\n}\n";

/// A compiler stub that writes a token object file and counts invocations
/// in `counter_path`, so tests can assert a cache hit skipped it entirely.
fn write_counting_compiler(path: &Path, counter_path: &Path) {
    let script = format!(
        "#!/bin/sh\necho invoked >> {counter}\nfor arg in \"$@\"; do\n  if [ \"$prev\" = \"-o\" ]; then\n    echo fake object > \"$arg\"\n  fi\n  prev=\"$arg\"\ndone\n",
        counter = shell_quote(counter_path),
    );
    write_executable(path, &script);
}

/// A compiler stub that fails whenever the source contains `FAIL_MARKER`.
fn write_failing_on_marker_compiler(path: &Path) {
    let script = "#!/bin/sh\nfor arg in \"$@\"; do\n  case \"$arg\" in\n    *.cpp|*.c)\n      if grep -q FAIL_MARKER \"$arg\" 2>/dev/null; then\n        echo \"error: expected ';' before '}' token\" 1>&2\n        exit 1\n      fi\n      ;;\n  esac\ndone\nfor arg in \"$@\"; do\n  if [ \"$prev\" = \"-o\" ]; then\n    echo fake object > \"$arg\"\n  fi\n  prev=\"$arg\"\ndone\n";
    write_executable(path, script);
}

fn write_fake_ar(path: &Path) {
    let script = "#!/bin/sh\nshift\narchive=\"$1\"\nshift\necho fake archive > \"$archive\"\n";
    write_executable(path, script);
}

fn write_fake_objcopy(path: &Path) {
    // Only the `-O ihex` invocation matters here; write a minimal valid
    // Intel HEX file regardless of which format flag was passed. POSIX sh
    // has no negative array indexing, so track the last argument by hand.
    let script = "#!/bin/sh\nfor arg in \"$@\"; do out=\"$arg\"; done\nprintf ':10000000' > \"$out\"\nprintf '00000000000000000000000000000000000000\\n' >> \"$out\"\nprintf ':00000001FF\\n' >> \"$out\"\n";
    write_executable(path, script);
}

fn write_fake_size(path: &Path) {
    let script = "#!/bin/sh\nprintf '   text\\t   data\\t    bss\\t    dec\\t    hex\\tfilename\\n'\nprintf '   1942\\t      0\\t     42\\t   1984\\t    7c0\\t%s\\n' \"$1\"\n";
    write_executable(path, script);
}

fn write_executable(path: &Path, script: &str) {
    fs::write(path, script).unwrap();
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}

fn shell_quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', "'\\''"))
}

/// Compiles the scanned sketch sources into `libcore.a`-style objects,
/// links, and post-processes to `firmware.hex` — the shape of the AVR
/// orchestrator's phases 7 through 12, minus toolchain acquisition.
fn run_avr_pipeline(project_dir: &Path, build_dir: &Path, tools_dir: &Path, cancel: &CancelFlag) -> PathBuf {
    let cc = tools_dir.join("avr-gcc");
    let cxx = tools_dir.join("avr-g++");
    let ar = tools_dir.join("avr-ar");
    let objcopy = tools_dir.join("avr-objcopy");
    let counter = build_dir.join("invocations.log");

    write_counting_compiler(&cc, &counter);
    write_counting_compiler(&cxx, &counter);
    write_fake_ar(&ar);
    write_fake_objcopy(&objcopy);

    let board = Board::find("uno").unwrap();
    let platform = PlatformConfig::default();
    let flags = FlagBuilder::new(&platform, board, &[]).build_flags();

    let src_build_dir = build_dir.join("src");
    let sketch = scanner::scan(project_dir, &src_build_dir, false).unwrap();

    let objects = compile_sources(&sketch.sketch, &cc, &cxx, &flags, &[], &src_build_dir, cancel, false).unwrap();

    let core_archive = build_dir.join("core").join("core.a");
    // Synthesize one "core" object alongside the sketch so the archive step
    // has something to bundle, mirroring phase 9's core.a creation.
    let core_obj = build_dir.join("core").join("stub.o");
    fs::create_dir_all(core_obj.parent().unwrap()).unwrap();
    fs::write(&core_obj, b"fake core object").unwrap();
    archiver::create(&ar, &core_archive, &[core_obj]).unwrap();

    let elf_path = build_dir.join("firmware.elf");
    let map_path = build_dir.join("firmware.map");
    let avr_extra_flags = linker::avr_flags(board.mcu);
    let link_req = LinkRequest {
        linker: &cxx,
        objects: &objects,
        core_archive: Some(&core_archive),
        core_objects: &[],
        library_archives: &[],
        library_objects: &[],
        linker_scripts: &[],
        linker_flags: &flags.common,
        sdk_lib_dir: None,
        sdk_libs: &[],
        elf_path: &elf_path,
        map_path: &map_path,
        avr_extra_flags: &avr_extra_flags,
    };
    linker::link(&link_req).unwrap();

    let hex_path = build_dir.join("firmware.hex");
    binary::generate_hex(&objcopy, &elf_path, &hex_path).unwrap();
    hex_path
}

#[test]
fn s1_cold_build_produces_parseable_intel_hex() {
    let tmp = tempfile::tempdir().unwrap();
    let project_dir = tmp.path().join("project");
    fs::create_dir_all(project_dir.join("src")).unwrap();
    fs::write(project_dir.join("src").join("blink.ino"), BLINK_SKETCH).unwrap();

    let build_dir = tmp.path().join("build");
    let tools_dir = tmp.path().join("tools");
    fs::create_dir_all(&tools_dir).unwrap();

    let cancel = CancelFlag::new();
    let hex_path = run_avr_pipeline(&project_dir, &build_dir, &tools_dir, &cancel);

    let hex = fs::read_to_string(&hex_path).unwrap();
    assert!(hex.starts_with(':'));
    assert!(hex.contains(":00000001FF"));

    let size_tool = tools_dir.join("avr-size");
    write_fake_size(&size_tool);
    let report = linker::read_size(&size_tool, &build_dir.join("firmware.elf"), board_flash("uno"), board_ram("uno")).unwrap();
    assert!(report.flash_used() > 500 && report.flash_used() < 5_000);
    assert!(report.check_flash_overflow().is_ok());
}

#[test]
fn s2_warm_rebuild_skips_compilation_entirely() {
    let tmp = tempfile::tempdir().unwrap();
    let project_dir = tmp.path().join("project");
    fs::create_dir_all(project_dir.join("src")).unwrap();
    fs::write(project_dir.join("src").join("blink.ino"), BLINK_SKETCH).unwrap();

    let build_dir = tmp.path().join("build");
    let tools_dir = tmp.path().join("tools");
    fs::create_dir_all(&tools_dir).unwrap();
    let cancel = CancelFlag::new();

    let cc = tools_dir.join("avr-gcc");
    let cxx = tools_dir.join("avr-g++");
    let counter = build_dir.join("invocations.log");
    write_counting_compiler(&cc, &counter);
    write_counting_compiler(&cxx, &counter);

    let board = Board::find("uno").unwrap();
    let platform = PlatformConfig::default();
    let flags = FlagBuilder::new(&platform, board, &[]).build_flags();
    let src_build_dir = build_dir.join("src");
    let sketch = scanner::scan(&project_dir, &src_build_dir, false).unwrap();

    let first = compile_sources(&sketch.sketch, &cc, &cxx, &flags, &[], &src_build_dir, &cancel, false).unwrap();
    let invocations_after_first = fs::read_to_string(&counter).unwrap_or_default().lines().count();
    assert_eq!(invocations_after_first, 1);

    let second = compile_sources(&sketch.sketch, &cc, &cxx, &flags, &[], &src_build_dir, &cancel, false).unwrap();
    let invocations_after_second = fs::read_to_string(&counter).unwrap_or_default().lines().count();

    assert_eq!(invocations_after_first, invocations_after_second, "second build must not recompile anything");
    assert_eq!(first, second);
}

#[test]
fn s3_compile_error_surfaces_compiler_stderr() {
    let tmp = tempfile::tempdir().unwrap();
    let project_dir = tmp.path().join("project");
    fs::create_dir_all(project_dir.join("src")).unwrap();
    fs::write(
        project_dir.join("src").join("main.ino"),
        "void setup() {\n  pinMode(13, OUTPUT)\n}\n\nvoid loop() {\n}\n// FAIL_MARKER\n",
    )
    .unwrap();

    let build_dir = tmp.path().join("build");
    let tools_dir = tmp.path().join("tools");
    fs::create_dir_all(&tools_dir).unwrap();
    let cancel = CancelFlag::new();

    let cc = tools_dir.join("avr-gcc");
    let cxx = tools_dir.join("avr-g++");
    write_failing_on_marker_compiler(&cc);
    write_failing_on_marker_compiler(&cxx);

    let board = Board::find("uno").unwrap();
    let platform = PlatformConfig::default();
    let flags = FlagBuilder::new(&platform, board, &[]).build_flags();
    let src_build_dir = build_dir.join("src");
    let sketch = scanner::scan(&project_dir, &src_build_dir, false).unwrap();

    let err = compile_sources(&sketch.sketch, &cc, &cxx, &flags, &[], &src_build_dir, &cancel, false).unwrap_err();
    match err {
        FbuildError::Compilation { stderr, .. } => {
            assert!(stderr.contains("expected"));
        }
        other => panic!("expected a Compilation error, got {other:?}"),
    }
    assert!(!build_dir.join("firmware.hex").exists());
}

#[test]
fn s6_missing_project_file_fails_without_creating_build_dirs() {
    let tmp = tempfile::tempdir().unwrap();
    let cancel = CancelFlag::new();
    let opts = fbuild::BuildOptions { env: None, clean: false, verbose: false };

    let result = fbuild::build(tmp.path(), &opts, &cancel).unwrap();
    assert!(!result.success);
    assert!(result.message.contains("platformio.ini"));
    assert!(!tmp.path().join(".fbuild").exists());
}

fn board_flash(id: &str) -> u64 {
    Board::find(id).unwrap().max_flash_bytes
}

fn board_ram(id: &str) -> u64 {
    Board::find(id).unwrap().max_ram_bytes
}
