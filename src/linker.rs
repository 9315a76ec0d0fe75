// ─────────────────────────────────────────────────────────────────────────────
//  fbuild :: linker  —  link objects + archives into an ELF
// ─────────────────────────────────────────────────────────────────────────────

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use crate::error::{FbuildError, Result};

const LINK_TIMEOUT: Duration = Duration::from_secs(120);

pub struct LinkRequest<'a> {
    pub linker: &'a Path,
    pub objects: &'a [PathBuf],
    pub core_archive: Option<&'a Path>,
    pub core_objects: &'a [PathBuf],
    pub library_archives: &'a [PathBuf],
    pub library_objects: &'a [PathBuf],
    pub linker_scripts: &'a [PathBuf],
    pub linker_flags: &'a [String],
    pub sdk_lib_dir: Option<&'a Path>,
    pub sdk_libs: &'a [PathBuf],
    pub elf_path: &'a Path,
    pub map_path: &'a Path,
    /// AVR-specific additional flags: `-flto -fuse-linker-plugin
    /// -Wl,--gc-sections -Wl,--allow-multiple-definition -mmcu=<mcu>`.
    pub avr_extra_flags: &'a [String],
}

/// Construct and run the link command per spec §4.11: C++ driver as the
/// front end, map-file output, `-T`/`-L` for scripts, a link-group around
/// user + SDK libraries so circular references resolve, trailing
/// `-lgcc -lstdc++ -lm -lc`.
pub fn link(req: &LinkRequest) -> Result<()> {
    if let Some(parent) = req.elf_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut argv: Vec<String> = Vec::new();
    argv.push(req.linker.to_string_lossy().to_string());

    argv.extend(req.avr_extra_flags.iter().cloned());
    argv.extend(req.linker_flags.iter().cloned());
    argv.push(format!("-Wl,-Map={}", forward_slash(req.map_path)));

    for script in req.linker_scripts {
        if let Some(dir) = script.parent() {
            argv.push(format!("-L{}", forward_slash(dir)));
        }
        let name = script.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        argv.push(format!("-T{name}"));
    }

    for obj in req.objects {
        argv.push(obj.to_string_lossy().to_string());
    }
    for obj in req.core_objects {
        argv.push(obj.to_string_lossy().to_string());
    }
    if let Some(archive) = req.core_archive {
        argv.push(archive.to_string_lossy().to_string());
    }

    if let Some(dir) = req.sdk_lib_dir {
        argv.push(format!("-L{}", forward_slash(dir)));
    }

    if !req.library_archives.is_empty() || !req.library_objects.is_empty() || !req.sdk_libs.is_empty() {
        argv.push("-Wl,--start-group".to_string());
        for obj in req.library_objects {
            argv.push(obj.to_string_lossy().to_string());
        }
        for archive in req.library_archives {
            argv.push(archive.to_string_lossy().to_string());
        }
        for lib in req.sdk_libs {
            argv.push(lib.to_string_lossy().to_string());
        }
        argv.push("-Wl,--end-group".to_string());
    }

    argv.push("-lgcc".to_string());
    argv.push("-lstdc++".to_string());
    argv.push("-lm".to_string());
    argv.push("-lc".to_string());
    argv.push("-o".to_string());
    argv.push(req.elf_path.to_string_lossy().to_string());

    run_link(&argv)
}

/// AVR-specific flags the linker needs on top of `LinkRequest::avr_extra_flags`
/// (kept as a helper so orchestrator code doesn't repeat the flag string).
pub fn avr_flags(mcu: &str) -> Vec<String> {
    vec![
        "-flto".to_string(),
        "-fuse-linker-plugin".to_string(),
        "-Wl,--gc-sections".to_string(),
        "-Wl,--allow-multiple-definition".to_string(),
        format!("-mmcu={mcu}"),
    ]
}

fn forward_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn run_link(argv: &[String]) -> Result<()> {
    let (program, args) = argv.split_first().expect("argv always has a program");

    let mut child = Command::new(program)
        .args(args)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| FbuildError::Link {
            reason: format!("failed to invoke linker: {e}"),
            stdout: String::new(),
            stderr: String::new(),
        })?;

    let start = Instant::now();
    loop {
        match child.try_wait()? {
            Some(status) => {
                use std::io::Read;
                let mut stdout = String::new();
                let mut stderr = String::new();
                if let Some(mut out) = child.stdout.take() {
                    let _ = out.read_to_string(&mut stdout);
                }
                if let Some(mut err) = child.stderr.take() {
                    let _ = err.read_to_string(&mut stderr);
                }

                return if status.success() {
                    Ok(())
                } else {
                    Err(FbuildError::Link { reason: format!("linker exited with status {status}"), stdout, stderr })
                };
            }
            None => {
                if start.elapsed() > LINK_TIMEOUT {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(FbuildError::LinkTimeout(LINK_TIMEOUT));
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

/// Size report produced by a `*-size` pass over the ELF: text/data/bss
/// plus the board's usable flash/RAM and derived percentages. Exactly at
/// the limit is allowed; one byte over is a flash-overflow error.
#[derive(Debug, Clone)]
pub struct SizeReport {
    pub text: u64,
    pub data: u64,
    pub bss: u64,
    pub max_flash: u64,
    pub max_ram: u64,
}

impl SizeReport {
    pub fn flash_used(&self) -> u64 {
        self.text + self.data
    }

    pub fn ram_used(&self) -> u64 {
        self.data + self.bss
    }

    pub fn flash_percent(&self) -> f64 {
        if self.max_flash == 0 { 0.0 } else { self.flash_used() as f64 / self.max_flash as f64 * 100.0 }
    }

    pub fn ram_percent(&self) -> f64 {
        if self.max_ram == 0 { 0.0 } else { self.ram_used() as f64 / self.max_ram as f64 * 100.0 }
    }

    /// `Ok(())` if flash usage is within the budget, `Err` naming the
    /// overage otherwise. Exactly-at-max is allowed.
    pub fn check_flash_overflow(&self) -> Result<()> {
        let used = self.flash_used();
        if used > self.max_flash {
            return Err(FbuildError::FlashOverflow {
                used,
                max: self.max_flash,
                over: used - self.max_flash,
            });
        }
        Ok(())
    }
}

/// Run `<size-tool> <elf>` (GNU binutils Berkeley format: `text data bss
/// dec hex filename` on the second line) and build a `SizeReport` against
/// the board's usable flash/RAM.
pub fn read_size(size_tool: &Path, elf_path: &Path, max_flash: u64, max_ram: u64) -> Result<SizeReport> {
    let output = Command::new(size_tool).arg(elf_path).output().map_err(|e| FbuildError::BinaryGeneration {
        reason: format!("failed to invoke {} ({e})", size_tool.display()),
        stdout: String::new(),
        stderr: String::new(),
    })?;

    if !output.status.success() {
        return Err(FbuildError::BinaryGeneration {
            reason: format!("size tool exited with status {}", output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_size_output(&stdout, max_flash, max_ram)
}

fn parse_size_output(stdout: &str, max_flash: u64, max_ram: u64) -> Result<SizeReport> {
    let data_line = stdout
        .lines()
        .nth(1)
        .ok_or_else(|| FbuildError::BinaryGeneration {
            reason: "size tool produced no data line".to_string(),
            stdout: stdout.to_string(),
            stderr: String::new(),
        })?;

    let mut fields = data_line.split_whitespace();
    let parse_next = |fields: &mut std::str::SplitWhitespace| {
        fields.next().and_then(|s| s.parse::<u64>().ok())
    };

    let text = parse_next(&mut fields);
    let data = parse_next(&mut fields);
    let bss = parse_next(&mut fields);

    match (text, data, bss) {
        (Some(text), Some(data), Some(bss)) => Ok(SizeReport { text, data, bss, max_flash, max_ram }),
        _ => Err(FbuildError::BinaryGeneration {
            reason: format!("could not parse size tool output: {data_line:?}"),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_output_reads_berkeley_format() {
        let stdout = "   text\t   data\t    bss\t    dec\t    hex\tfilename\n    444\t      0\t      9\t    453\t    1c5\ta.out\n";
        let report = parse_size_output(stdout, 32_256, 2048).unwrap();
        assert_eq!(report.text, 444);
        assert_eq!(report.data, 0);
        assert_eq!(report.bss, 9);
    }

    #[test]
    fn avr_flags_include_mcu_and_gc_sections() {
        let flags = avr_flags("atmega328p");
        assert!(flags.contains(&"-mmcu=atmega328p".to_string()));
        assert!(flags.iter().any(|f| f.contains("--gc-sections")));
    }

    #[test]
    fn exactly_at_max_flash_is_allowed() {
        let report = SizeReport { text: 1000, data: 0, bss: 0, max_flash: 1000, max_ram: 2048 };
        assert!(report.check_flash_overflow().is_ok());
    }

    #[test]
    fn one_byte_over_max_flash_fails() {
        let report = SizeReport { text: 1001, data: 0, bss: 0, max_flash: 1000, max_ram: 2048 };
        let err = report.check_flash_overflow().unwrap_err();
        match err {
            FbuildError::FlashOverflow { over, .. } => assert_eq!(over, 1),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
