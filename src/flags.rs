// ─────────────────────────────────────────────────────────────────────────────
//  fbuild :: flags  —  assemble compile/link flag sets
// ─────────────────────────────────────────────────────────────────────────────

use serde::Deserialize;

use crate::board::Board;

/// Platform configuration, per spec §6: JSON describing default
/// common/C/C++ flag lists and a defines list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlatformConfig {
    #[serde(default)]
    pub compiler_flags: CompilerFlagsConfig,
    #[serde(default)]
    pub defines: Vec<DefineEntry>,
    #[serde(default)]
    pub linker_scripts: Vec<String>,
    #[serde(default)]
    pub linker_flags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompilerFlagsConfig {
    #[serde(default)]
    pub common: Vec<String>,
    #[serde(default)]
    pub c: Vec<String>,
    #[serde(default)]
    pub cxx: Vec<String>,
}

/// A define is either a bare name (`-Dname`) or a `[name, value]` pair
/// (`-Dname=value`).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DefineEntry {
    Name(String),
    NameValue(String, String),
}

#[derive(Debug, Clone, Default)]
pub struct FlagSet {
    pub common: Vec<String>,
    pub cflags: Vec<String>,
    pub cxxflags: Vec<String>,
}

impl FlagSet {
    /// Union of common + C++ flags, suitable for library compilation.
    pub fn for_library(&self) -> Vec<String> {
        let mut flags = self.common.clone();
        flags.extend(self.cxxflags.clone());
        flags
    }

    /// The full flag set joined into one string — used as the
    /// build-freshness fingerprint for libraries (spec §4.10).
    pub fn fingerprint(&self) -> String {
        self.for_library().join(" ")
    }
}

pub struct FlagBuilder<'a> {
    pub platform: &'a PlatformConfig,
    pub board: &'a Board,
    pub user_build_flags: &'a [String],
}

impl<'a> FlagBuilder<'a> {
    pub fn new(platform: &'a PlatformConfig, board: &'a Board, user_build_flags: &'a [String]) -> Self {
        Self { platform, board, user_build_flags }
    }

    /// Parse a flag string that may contain quoted values
    /// (e.g. `-DFOO="bar baz" -DTEST`), preserving quoting.
    pub fn parse_flag_string(flag_string: &str) -> Vec<String> {
        shell_words::split(flag_string).unwrap_or_else(|_| {
            flag_string.split_whitespace().map(str::to_string).collect()
        })
    }

    pub fn build_flags(&self) -> FlagSet {
        let mut flags = FlagSet {
            common: self.platform.compiler_flags.common.clone(),
            cflags: self.platform.compiler_flags.c.clone(),
            cxxflags: self.platform.compiler_flags.cxx.clone(),
        };

        for define in &self.platform.defines {
            match define {
                DefineEntry::Name(n) => flags.common.push(format!("-D{n}")),
                DefineEntry::NameValue(n, v) => flags.common.push(format!("-D{n}={v}")),
            }
        }

        self.add_arduino_defines(&mut flags);
        self.add_board_extra_flags(&mut flags);
        self.add_user_flags(&mut flags);

        flags
    }

    fn add_arduino_defines(&self, flags: &mut FlagSet) {
        for define in self.board.get_defines() {
            flags.common.push(format!("-D{define}"));
        }
        flags.common.push(format!(
            "-DARDUINO_BOARD=\"{}\"",
            self.board.board_define
        ));
        flags.common.push(format!(
            "-DARDUINO_VARIANT=\"{}\"",
            self.board.variant
        ));
    }

    fn add_board_extra_flags(&self, flags: &mut FlagSet) {
        for flag in self.board.extra_flags {
            if flag.starts_with("-D") {
                flags.common.push(flag.to_string());
            }
        }
    }

    fn add_user_flags(&self, flags: &mut FlagSet) {
        for flag in self.user_build_flags {
            if flag.starts_with("-D") {
                flags.common.push(flag.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Board;

    #[test]
    fn parse_flag_string_preserves_quoted_values() {
        let parsed = FlagBuilder::parse_flag_string(r#"-DFOO="bar baz" -DTEST"#);
        assert_eq!(parsed, vec!["-DFOO=bar baz", "-DTEST"]);
    }

    #[test]
    fn user_flags_are_appended_last() {
        let platform = PlatformConfig::default();
        let board = Board::find("uno").unwrap();
        let user_flags = vec!["-DUSER_OVERRIDE".to_string()];
        let builder = FlagBuilder::new(&platform, board, &user_flags);
        let flags = builder.build_flags();
        assert_eq!(flags.common.last().unwrap(), "-DUSER_OVERRIDE");
    }

    #[test]
    fn library_flags_are_common_plus_cxx() {
        let mut platform = PlatformConfig::default();
        platform.compiler_flags.cxx = vec!["-std=c++11".to_string()];
        let board = Board::find("uno").unwrap();
        let builder = FlagBuilder::new(&platform, board, &[]);
        let flags = builder.build_flags();
        let lib_flags = flags.for_library();
        assert!(lib_flags.contains(&"-std=c++11".to_string()));
        assert!(lib_flags.iter().any(|f| f.starts_with("-DF_CPU=")));
    }
}
