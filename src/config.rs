// ─────────────────────────────────────────────────────────────────────────────
//  fbuild :: config  —  project (INI) and platform (JSON) configuration
// ─────────────────────────────────────────────────────────────────────────────

use std::collections::HashMap;
use std::path::Path;

use configparser::ini::Ini;

use crate::error::{FbuildError, Result};
use crate::flags::PlatformConfig;

/// One `[env:<name>]` section of `platformio.ini`: board id, library
/// dependencies, user build flags, and `board_build.*` overrides.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentConfig {
    pub name: String,
    pub platform: Option<String>,
    pub board: String,
    pub framework: Option<String>,
    pub lib_deps: Vec<String>,
    pub build_flags: Vec<String>,
    pub board_build: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectConfig {
    pub default_envs: Vec<String>,
    pub environments: HashMap<String, EnvironmentConfig>,
}

impl ProjectConfig {
    /// Load `platformio.ini`-compatible INI from `path`. `[platformio]`
    /// supplies `default_envs` (comma-separated); each `[env:<name>]`
    /// section becomes one `EnvironmentConfig`.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FbuildError::MissingProjectFile(path.to_path_buf()));
        }

        let mut ini = Ini::new();
        let map = ini
            .load(path)
            .map_err(|e| FbuildError::Configuration(format!("{}: {e}", path.display())))?;

        let default_envs = map
            .get("platformio")
            .and_then(|section| section.get("default_envs"))
            .and_then(|v| v.clone())
            .map(|raw| raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        let mut environments = HashMap::new();
        for (section_name, section) in &map {
            let Some(env_name) = section_name.strip_prefix("env:") else { continue };
            let env = parse_environment(env_name, section);
            environments.insert(env_name.to_string(), env);
        }

        Ok(Self { default_envs, environments })
    }

    /// The environments to build when none are named on the command
    /// line: `default_envs` if set, else every `[env:*]` section.
    pub fn selected_envs(&self, requested: &[String]) -> Vec<String> {
        if !requested.is_empty() {
            return requested.to_vec();
        }
        if !self.default_envs.is_empty() {
            return self.default_envs.clone();
        }
        let mut names: Vec<String> = self.environments.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn environment(&self, name: &str) -> Result<&EnvironmentConfig> {
        self.environments.get(name).ok_or_else(|| FbuildError::UnknownEnvironment(name.to_string()))
    }
}

fn parse_environment(name: &str, section: &HashMap<String, Option<String>>) -> EnvironmentConfig {
    let get = |key: &str| section.get(key).and_then(|v| v.clone());

    let lib_deps = get("lib_deps")
        .map(|raw| {
            raw.lines()
                .flat_map(|line| line.split(','))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let build_flags = get("build_flags")
        .map(|raw| crate::flags::FlagBuilder::parse_flag_string(&raw))
        .unwrap_or_default();

    let mut board_build = HashMap::new();
    for (key, value) in section {
        if let Some(field) = key.strip_prefix("board_build.") {
            if let Some(v) = value {
                board_build.insert(format!("board_build.{field}"), v.clone());
            }
        }
    }

    EnvironmentConfig {
        name: name.to_string(),
        platform: get("platform"),
        board: get("board").unwrap_or_default(),
        framework: get("framework"),
        lib_deps,
        build_flags,
        board_build,
    }
}

/// Load a platform's JSON descriptor (`compiler_flags`, `defines`,
/// `linker_scripts`, `linker_flags`) from `path`.
pub fn load_platform_config(path: &Path) -> Result<PlatformConfig> {
    let data = std::fs::read_to_string(path)?;
    serde_json::from_str(&data).map_err(|e| FbuildError::MetadataParse(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(tmp: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = tmp.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn missing_project_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = ProjectConfig::load(&tmp.path().join("platformio.ini")).unwrap_err();
        assert!(matches!(err, FbuildError::MissingProjectFile(_)));
    }

    #[test]
    fn parses_default_envs_and_sections() {
        let tmp = tempfile::tempdir().unwrap();
        let ini = "[platformio]\ndefault_envs = uno, esp32c6\n\n[env:uno]\nboard = uno\nbuild_flags = -DFOO\n\n[env:esp32c6]\nboard = esp32-c6-devkitm-1\n";
        let path = write(tmp.path(), "platformio.ini", ini);

        let config = ProjectConfig::load(&path).unwrap();
        assert_eq!(config.default_envs, vec!["uno", "esp32c6"]);
        assert_eq!(config.environments.len(), 2);
        assert_eq!(config.environment("uno").unwrap().board, "uno");
        assert_eq!(config.environment("uno").unwrap().build_flags, vec!["-DFOO"]);
    }

    #[test]
    fn selected_envs_falls_back_to_every_section_when_nothing_configured() {
        let tmp = tempfile::tempdir().unwrap();
        let ini = "[env:uno]\nboard = uno\n\n[env:nano]\nboard = nano\n";
        let path = write(tmp.path(), "platformio.ini", ini);
        let config = ProjectConfig::load(&path).unwrap();

        let mut envs = config.selected_envs(&[]);
        envs.sort();
        assert_eq!(envs, vec!["nano", "uno"]);
    }

    #[test]
    fn board_build_overrides_are_captured() {
        let tmp = tempfile::tempdir().unwrap();
        let ini = "[env:uno]\nboard = uno\nboard_build.f_cpu = 8000000L\n";
        let path = write(tmp.path(), "platformio.ini", ini);
        let config = ProjectConfig::load(&path).unwrap();
        let env = config.environment("uno").unwrap();
        assert_eq!(env.board_build.get("board_build.f_cpu").unwrap(), "8000000L");
    }

    #[test]
    fn unknown_environment_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let ini = "[env:uno]\nboard = uno\n";
        let path = write(tmp.path(), "platformio.ini", ini);
        let config = ProjectConfig::load(&path).unwrap();
        let err = config.environment("missing").unwrap_err();
        assert!(matches!(err, FbuildError::UnknownEnvironment(_)));
    }

    #[test]
    fn loads_platform_json() {
        let tmp = tempfile::tempdir().unwrap();
        let json = r#"{"compiler_flags":{"common":["-Os"]},"defines":[],"linker_scripts":[],"linker_flags":[]}"#;
        let path = write(tmp.path(), "platform.json", json);
        let platform = load_platform_config(&path).unwrap();
        assert_eq!(platform.compiler_flags.common, vec!["-Os"]);
    }
}
