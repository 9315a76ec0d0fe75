// ─────────────────────────────────────────────────────────────────────────────
//  fbuild :: board  —  board identifier → concrete build configuration
// ─────────────────────────────────────────────────────────────────────────────

use std::collections::HashMap;
use std::fmt;

use crate::error::{FbuildError, Result};

/// Which platform family a board belongs to, derived from its MCU prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformFamily {
    Avr,
    Esp32,
    Teensy,
}

#[derive(Debug, Clone)]
pub struct Board {
    pub id: &'static str,
    pub name: &'static str,
    pub mcu: &'static str,
    pub f_cpu: u32,
    pub board_define: &'static str,
    pub core: &'static str,
    pub variant: &'static str,
    pub usb_vid_pid: Option<(&'static str, &'static str)>,
    pub extra_flags: &'static [&'static str],
    pub max_flash_bytes: u64,
    pub max_ram_bytes: u64,
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

impl Board {
    pub fn catalog() -> &'static [Board] {
        &BOARDS
    }

    pub fn find(id: &str) -> Option<&'static Board> {
        let lower = id.to_lowercase();
        BOARDS.iter().find(|b| b.id.eq_ignore_ascii_case(&lower))
    }

    /// Platform discriminator from the MCU prefix: `atmega*` → AVR,
    /// `esp32*` → ESP32, `imxrt*` → Teensy.
    pub fn family(&self) -> PlatformFamily {
        family_from_mcu(self.mcu)
    }

    /// `F_CPU`, `ARDUINO=<n>`, architecture macro, MCU macro, board macro.
    pub fn get_defines(&self) -> Vec<String> {
        let mut defines = vec![
            format!("F_CPU={}L", self.f_cpu),
            "ARDUINO=10819".to_string(),
        ];
        match self.family() {
            PlatformFamily::Avr => {
                defines.push("ARDUINO_ARCH_AVR".to_string());
                defines.push(format!("__AVR_{}__", mcu_macro_suffix(self.mcu)));
            }
            PlatformFamily::Esp32 => {
                defines.push("ARDUINO_ARCH_ESP32".to_string());
                defines.push("ESP32".to_string());
            }
            PlatformFamily::Teensy => {
                defines.push("ARDUINO_ARCH_TEENSY".to_string());
                defines.push(format!("__{}__", self.mcu.to_uppercase()));
            }
        }
        defines.push(format!("ARDUINO_{}", self.board_define));
        if let Some((vid, pid)) = self.usb_vid_pid {
            defines.push(format!("USB_VID={vid}"));
            defines.push(format!("USB_PID={pid}"));
        }
        for flag in self.extra_flags {
            defines.push(flag.to_string());
        }
        defines
    }

    /// `[core-dir, variant-dir]` under the given framework root.
    pub fn get_include_paths(&self, framework_root: &std::path::Path) -> Vec<std::path::PathBuf> {
        vec![
            framework_root.join("cores").join(self.core),
            framework_root.join("variants").join(self.variant),
        ]
    }
}

/// Resolve a board identifier, applying `board_build.<field>` overrides
/// from project config on top of the built-in default, or — for unknown
/// boards whose platform URL looks ESP32-flavored — synthesizing a
/// minimal record from substring matching on the id.
pub fn resolve(
    board_id: &str,
    overrides: &HashMap<String, String>,
    platform_url_hint: Option<&str>,
) -> Result<Board> {
    if let Some(board) = Board::find(board_id) {
        return Ok(apply_overrides(board.clone(), overrides));
    }

    let looks_esp32 = board_id.to_lowercase().contains("esp32")
        || platform_url_hint.map(|u| u.to_lowercase().contains("esp32")).unwrap_or(false);

    if looks_esp32 {
        return Ok(apply_overrides(synthesize_esp32_board(board_id), overrides));
    }

    Err(FbuildError::UnknownBoard(board_id.to_string()))
}

fn apply_overrides(mut board: Board, overrides: &HashMap<String, String>) -> Board {
    // Static catalog entries are &'static; overrides that need owned data
    // (MCU substitution, clock override) would require a non-static
    // variant. For the overrides this crate's config surface actually
    // exposes (f_cpu), we can mutate the numeric field directly.
    if let Some(f_cpu) = overrides.get("board_build.f_cpu") {
        if let Ok(parsed) = f_cpu.trim_end_matches(['L', 'l']).parse::<u32>() {
            board.f_cpu = parsed;
        }
    }
    board
}

fn synthesize_esp32_board(board_id: &str) -> Board {
    let lower = board_id.to_lowercase();
    let (mcu, max_flash, max_ram): (&'static str, u64, u64) = if lower.contains("c6") {
        ("esp32c6", 4 * 1024 * 1024, 512 * 1024)
    } else if lower.contains("c3") {
        ("esp32c3", 4 * 1024 * 1024, 400 * 1024)
    } else if lower.contains("c2") {
        ("esp32c2", 4 * 1024 * 1024, 272 * 1024)
    } else if lower.contains("h2") {
        ("esp32h2", 4 * 1024 * 1024, 320 * 1024)
    } else if lower.contains("s3") {
        ("esp32s3", 8 * 1024 * 1024, 512 * 1024)
    } else if lower.contains("s2") {
        ("esp32s2", 4 * 1024 * 1024, 320 * 1024)
    } else {
        ("esp32", 4 * 1024 * 1024, 520 * 1024)
    };

    Board {
        id: Box::leak(board_id.to_string().into_boxed_str()),
        name: Box::leak(format!("{board_id} (synthesized)").into_boxed_str()),
        mcu,
        f_cpu: 240_000_000,
        board_define: Box::leak(board_id.to_uppercase().replace(['-', '.'], "_").into_boxed_str()),
        core: "esp32",
        variant: mcu,
        usb_vid_pid: None,
        extra_flags: &[],
        max_flash_bytes: max_flash,
        max_ram_bytes: max_ram,
    }
}

fn family_from_mcu(mcu: &str) -> PlatformFamily {
    if mcu.starts_with("atmega") || mcu.starts_with("attiny") {
        PlatformFamily::Avr
    } else if mcu.starts_with("esp32") {
        PlatformFamily::Esp32
    } else if mcu.starts_with("imxrt") {
        PlatformFamily::Teensy
    } else {
        PlatformFamily::Avr
    }
}

fn mcu_macro_suffix(mcu: &str) -> String {
    // e.g. "atmega328p" -> "ATmega328P"
    let rest = mcu.strip_prefix("atmega").unwrap_or(mcu);
    format!("ATmega{}", rest.to_uppercase())
}

static BOARDS: &[Board] = &[
    Board {
        id: "uno",
        name: "Arduino Uno",
        mcu: "atmega328p",
        f_cpu: 16_000_000,
        board_define: "AVR_UNO",
        core: "arduino",
        variant: "standard",
        usb_vid_pid: None,
        extra_flags: &[],
        max_flash_bytes: 32_256, // 32 KiB minus 2-byte bootloader section rounding
        max_ram_bytes: 2048,
    },
    Board {
        id: "nano",
        name: "Arduino Nano",
        mcu: "atmega328p",
        f_cpu: 16_000_000,
        board_define: "AVR_NANO",
        core: "arduino",
        variant: "eightanaloginputs",
        usb_vid_pid: None,
        extra_flags: &[],
        max_flash_bytes: 30_720,
        max_ram_bytes: 2048,
    },
    Board {
        id: "mega",
        name: "Arduino Mega 2560",
        mcu: "atmega2560",
        f_cpu: 16_000_000,
        board_define: "AVR_MEGA2560",
        core: "arduino",
        variant: "mega",
        usb_vid_pid: None,
        extra_flags: &[],
        max_flash_bytes: 253_952,
        max_ram_bytes: 8192,
    },
    Board {
        id: "leonardo",
        name: "Arduino Leonardo",
        mcu: "atmega32u4",
        f_cpu: 16_000_000,
        board_define: "AVR_LEONARDO",
        core: "arduino",
        variant: "leonardo",
        usb_vid_pid: Some(("0x2341", "0x0036")),
        extra_flags: &[],
        max_flash_bytes: 28_672,
        max_ram_bytes: 2560,
    },
    Board {
        id: "esp32-devkitc",
        name: "ESP32 Dev Module",
        mcu: "esp32",
        f_cpu: 240_000_000,
        board_define: "ESP32_DEV",
        core: "esp32",
        variant: "esp32",
        usb_vid_pid: None,
        extra_flags: &[],
        max_flash_bytes: 4 * 1024 * 1024,
        max_ram_bytes: 520 * 1024,
    },
    Board {
        id: "esp32-c6-devkitm-1",
        name: "ESP32-C6 DevKitM-1",
        mcu: "esp32c6",
        f_cpu: 160_000_000,
        board_define: "ESP32_C6_DEVKITM_1",
        core: "esp32",
        variant: "esp32c6",
        usb_vid_pid: None,
        extra_flags: &[],
        max_flash_bytes: 4 * 1024 * 1024,
        max_ram_bytes: 512 * 1024,
    },
    Board {
        id: "esp32-s3-devkitc-1",
        name: "ESP32-S3 DevKitC-1",
        mcu: "esp32s3",
        f_cpu: 240_000_000,
        board_define: "ESP32_S3_DEVKITC_1",
        core: "esp32",
        variant: "esp32s3",
        usb_vid_pid: None,
        extra_flags: &[],
        max_flash_bytes: 8 * 1024 * 1024,
        max_ram_bytes: 512 * 1024,
    },
    Board {
        id: "teensy41",
        name: "Teensy 4.1",
        mcu: "imxrt1062",
        f_cpu: 600_000_000,
        board_define: "TEENSY41",
        core: "teensy4",
        variant: "teensy41",
        usb_vid_pid: Some(("0x16C0", "0x0478")),
        extra_flags: &[],
        max_flash_bytes: 8 * 1024 * 1024,
        max_ram_bytes: 1024 * 1024,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_is_case_insensitive() {
        assert!(Board::find("UNO").is_some());
        assert!(Board::find("uno").is_some());
    }

    #[test]
    fn every_board_defines_cpu_clock_and_architecture_macro() {
        for board in Board::catalog() {
            let defines = board.get_defines();
            assert!(defines.iter().any(|d| d.starts_with("F_CPU=")));
            assert!(defines.iter().any(|d| d.starts_with(&format!("ARDUINO_{}", board.board_define))));
            assert!(defines.iter().any(|d| d.starts_with("ARDUINO_ARCH_")));
        }
    }

    #[test]
    fn family_dispatches_on_mcu_prefix() {
        assert_eq!(Board::find("uno").unwrap().family(), PlatformFamily::Avr);
        assert_eq!(Board::find("esp32-devkitc").unwrap().family(), PlatformFamily::Esp32);
        assert_eq!(Board::find("teensy41").unwrap().family(), PlatformFamily::Teensy);
    }

    #[test]
    fn unknown_esp32_smelling_board_is_synthesized() {
        let overrides = HashMap::new();
        let board = resolve("esp32-c2-devkitm-1", &overrides, None).unwrap();
        assert_eq!(board.mcu, "esp32c2");
        assert_eq!(board.family(), PlatformFamily::Esp32);
    }

    #[test]
    fn unknown_non_esp32_board_is_an_error() {
        let overrides = HashMap::new();
        let err = resolve("totally-unknown-board", &overrides, None).unwrap_err();
        assert!(matches!(err, FbuildError::UnknownBoard(_)));
    }

    #[test]
    fn f_cpu_override_applies() {
        let mut overrides = HashMap::new();
        overrides.insert("board_build.f_cpu".to_string(), "8000000L".to_string());
        let board = resolve("uno", &overrides, None).unwrap();
        assert_eq!(board.f_cpu, 8_000_000);
    }
}
