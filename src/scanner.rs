// ─────────────────────────────────────────────────────────────────────────────
//  fbuild :: scanner  —  source discovery and .ino preprocessing
// ─────────────────────────────────────────────────────────────────────────────

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use walkdir::WalkDir;

use crate::error::Result;

const SKIPPED_DIRS: &[&str] = &[".fbuild", ".pio", "build", ".git", "__pycache__", "node_modules"];

const CONTROL_FLOW_KEYWORDS: &[&str] =
    &["if", "for", "while", "switch", "catch", "return", "sizeof"];

/// Four disjoint lists of absolute paths, gathered once per build.
#[derive(Debug, Default, Clone)]
pub struct SourceCollection {
    pub sketch: Vec<PathBuf>,
    pub core: Vec<PathBuf>,
    pub variant: Vec<PathBuf>,
    pub headers: Vec<PathBuf>,
}

/// Discover sources under `project_dir`'s `src/` (or the project root if
/// `src/` is absent), preprocessing any `.ino` files into a single
/// synthetic translation unit written to `build_dir`.
pub fn scan(project_dir: &Path, build_dir: &Path, esp32_style: bool) -> Result<SourceCollection> {
    let sketch_dir = {
        let src = project_dir.join("src");
        if src.is_dir() { src } else { project_dir.to_path_buf() }
    };

    let mut collection = SourceCollection::default();

    let ino_files = collect_ino_files(&sketch_dir);
    if !ino_files.is_empty() {
        let synthetic = preprocess_ino(&ino_files, build_dir, esp32_style)?;
        collection.sketch.push(synthetic);
    }

    for path in collect_sources(&sketch_dir, &["cpp", "c"]) {
        // .ino handled above; avoid double-counting a .cpp file that
        // happens to share a stem with an .ino.
        collection.sketch.push(path);
    }

    for entry in WalkDir::new(&sketch_dir).into_iter().filter_entry(|e| !is_skipped(e)) {
        let Ok(entry) = entry else { continue };
        if entry.file_type().is_file() {
            if let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) {
                if ext == "h" || ext == "hpp" {
                    collection.headers.push(entry.into_path());
                }
            }
        }
    }

    Ok(collection)
}

/// Populate `core`/`variant` from a framework's core and variant
/// directories (recursive — frameworks nest their sources more deeply
/// than a typical sketch).
pub fn scan_framework_sources(core_dir: &Path, variant_dir: &Path) -> SourceCollection {
    let mut collection = SourceCollection::default();
    collection.core = collect_sources_recursive(core_dir, &["cpp", "c", "S"]);
    collection.variant = collect_sources_recursive(variant_dir, &["cpp", "c", "S"]);
    collection
}

fn is_skipped(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| SKIPPED_DIRS.contains(&name))
        .unwrap_or(false)
}

/// `.c`/`.cpp` in the root (non-recursive) plus one level of explicit
/// subdirectories (recursive within each of those).
fn collect_sources(dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else { return out };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() {
            if has_extension(&path, extensions) {
                out.push(path);
            }
        } else if path.is_dir() && !is_skipped_name(&path) {
            out.extend(collect_sources_recursive(&path, extensions));
        }
    }
    out.sort();
    out
}

fn collect_sources_recursive(dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| !is_skipped(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && has_extension(e.path(), extensions))
        .map(|e| e.into_path())
        .collect();
    out.sort();
    out
}

fn is_skipped_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|name| SKIPPED_DIRS.contains(&name))
        .unwrap_or(false)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| extensions.contains(&ext))
        .unwrap_or(false)
}

fn collect_ino_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = collect_sources(dir, &["ino"]);
    files.sort();
    files
}

/// Sort `.ino` files alphabetically, concatenate with a blank-line
/// separator, prepend `#include <Arduino.h>` and a synthesized block of
/// forward declarations, and write the result as a single `.cpp`.
///
/// The forward-declaration detector is a line-oriented heuristic: it
/// recognizes `<return-type> <name>(<params>) {` and will misidentify
/// multi-line signatures or unusual formatting. This mirrors what a
/// simple textual `.ino` preprocessor can do without a real C++ parser;
/// it is not meant to replace one.
pub fn preprocess_ino(ino_files: &[PathBuf], build_dir: &Path, esp32_style: bool) -> Result<PathBuf> {
    let mut sorted = ino_files.to_vec();
    sorted.sort();

    let mut bodies = Vec::with_capacity(sorted.len());
    for path in &sorted {
        bodies.push(std::fs::read_to_string(path)?);
    }
    let concatenated = bodies.join("\n\n");

    let prototypes = synthesize_forward_declarations(&concatenated);

    let mut output = String::new();
    output.push_str("#include <Arduino.h>\n\n");
    for proto in &prototypes {
        output.push_str(proto);
        output.push('\n');
    }
    if !prototypes.is_empty() {
        output.push('\n');
    }
    output.push_str(&concatenated);

    let out_path = if esp32_style {
        let stem = sorted
            .first()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "sketch".to_string());
        let dir = build_dir.join("sketch");
        std::fs::create_dir_all(&dir)?;
        dir.join(format!("{stem}.ino.cpp"))
    } else {
        std::fs::create_dir_all(build_dir)?;
        build_dir.join("sketch.cpp")
    };

    std::fs::write(&out_path, output)?;
    Ok(out_path)
}

static FUNCTION_DEF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_:<>\*&\s]*[\*&\s])([A-Za-z_]\w*)\s*\(([^;]*)\)\s*\{")
        .expect("static regex is valid")
});

/// Scan `text` line by line, ignoring block comments, `//` lines, and
/// preprocessor lines, and emit a `;`-terminated prototype for every
/// top-level function definition whose name is not a control-flow
/// keyword.
fn synthesize_forward_declarations(text: &str) -> Vec<String> {
    let mut prototypes = Vec::new();
    let mut in_block_comment = false;

    for line in text.lines() {
        let trimmed = line.trim_start();

        if in_block_comment {
            if trimmed.contains("*/") {
                in_block_comment = false;
            }
            continue;
        }
        if trimmed.starts_with("/*") {
            if !trimmed.contains("*/") {
                in_block_comment = true;
            }
            continue;
        }
        if trimmed.starts_with("//") || trimmed.starts_with('#') {
            continue;
        }

        if let Some(caps) = FUNCTION_DEF_RE.captures(line) {
            let ret_type = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            let name = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            let params = caps.get(3).map(|m| m.as_str().trim()).unwrap_or("");

            if CONTROL_FLOW_KEYWORDS.contains(&name) {
                continue;
            }
            if ret_type.is_empty() || name.is_empty() {
                continue;
            }

            prototypes.push(format!("{ret_type} {name}({params});"));
        }
    }

    prototypes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_declarations_skip_control_flow_keywords() {
        let text = "if (x) {\nwhile (y) {\nvoid setup() {\n";
        let decls = synthesize_forward_declarations(text);
        assert_eq!(decls, vec!["void setup();"]);
    }

    #[test]
    fn forward_declarations_skip_comments_and_preprocessor_lines() {
        let text = "// void commented() {\n#define FOO 1\nvoid real_fn() {\n";
        let decls = synthesize_forward_declarations(text);
        assert_eq!(decls, vec!["void real_fn();"]);
    }

    #[test]
    fn block_comments_are_skipped() {
        let text = "/* void inside_comment() {\n   still inside\n*/\nvoid after() {\n";
        let decls = synthesize_forward_declarations(text);
        assert_eq!(decls, vec!["void after();"]);
    }

    #[test]
    fn no_functions_yields_empty_prototype_block() {
        let text = "int x = 1;\n";
        assert!(synthesize_forward_declarations(text).is_empty());
    }

    #[test]
    fn preprocess_ino_sorts_alphabetically_and_is_deterministic() {
        let tmp = tempfile::tempdir().unwrap();
        let build = tmp.path().join("build");

        let b = tmp.path().join("b_second.ino");
        let a = tmp.path().join("a_first.ino");
        std::fs::write(&a, "void setup() {\n  // a\n}\n").unwrap();
        std::fs::write(&b, "void loop() {\n  // b\n}\n").unwrap();

        let out1 = preprocess_ino(&[b.clone(), a.clone()], &build, false).unwrap();
        let content1 = std::fs::read_to_string(&out1).unwrap();

        let out2 = preprocess_ino(&[a, b], &build, false).unwrap();
        let content2 = std::fs::read_to_string(&out2).unwrap();

        assert_eq!(content1, content2);
        assert!(content1.starts_with("#include <Arduino.h>"));
        // a_first.ino's content should precede b_second.ino's content.
        assert!(content1.find("// a").unwrap() < content1.find("// b").unwrap());
    }

    #[test]
    fn esp32_style_path_uses_sketch_subdirectory() {
        let tmp = tempfile::tempdir().unwrap();
        let build = tmp.path().join("build");
        let ino = tmp.path().join("blink.ino");
        std::fs::write(&ino, "void setup() {}\nvoid loop() {}\n").unwrap();

        let out = preprocess_ino(&[ino], &build, true).unwrap();
        assert!(out.starts_with(build.join("sketch")));
        assert!(out.to_string_lossy().ends_with(".ino.cpp"));
    }
}
