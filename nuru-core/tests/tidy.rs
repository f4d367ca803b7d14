//! Source hygiene checks for the workspace crates.
//!
//! Library code logs through `tracing` and propagates errors; panicking
//! helpers are only allowed inside test modules.

use std::fs;
use std::path::{Path, PathBuf};

/// Anti-pattern module names.
const BANNED_MODULE_NAMES: &[&str] = &[
    "utils", "util", "helpers", "helper", "common", "shared", "misc",
];

/// Calls that must not appear outside `#[cfg(test)]` code.
const PANICKING_CALLS: &[&str] = &[".unwrap()", ".expect(", "println!(", "eprintln!(", "dbg!("];

/// Files allowed to print: the binary talks to a terminal.
const PRINT_ALLOWED: &[&str] = &["main.rs", "commands.rs"];

#[derive(Debug)]
struct Violation {
    file: PathBuf,
    line: usize,
    message: String,
}

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn rust_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            rust_files(&path, out);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            out.push(path);
        }
    }
}

fn library_sources() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();
    for krate in ["nuru-core", "nuru-web", "nuru-cli"] {
        rust_files(&root.join(krate).join("src"), &mut files);
    }
    files.sort();
    files
}

/// Lines before the first test module.
fn non_test_lines(source: &str) -> impl Iterator<Item = (usize, &str)> {
    source
        .lines()
        .enumerate()
        .take_while(|(_, line)| line.trim() != "#[cfg(test)]")
        .map(|(index, line)| (index + 1, line))
}

fn check_panicking_calls(path: &Path, source: &str, violations: &mut Vec<Violation>) {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    for (line_number, line) in non_test_lines(source) {
        let code = line.split("//").next().unwrap_or_default();
        for call in PANICKING_CALLS {
            if !code.contains(call) {
                continue;
            }
            let is_print = call.contains("println") || call.contains("eprintln");
            if is_print && PRINT_ALLOWED.contains(&file_name) {
                continue;
            }
            violations.push(Violation {
                file: path.to_path_buf(),
                line: line_number,
                message: format!("`{call}` outside test code"),
            });
        }
    }
}

fn check_module_name(path: &Path, violations: &mut Vec<Violation>) {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    if BANNED_MODULE_NAMES.contains(&stem) {
        violations.push(Violation {
            file: path.to_path_buf(),
            line: 0,
            message: format!("module name `{stem}` says nothing about its contents"),
        });
    }
}

#[test]
fn test_library_code_does_not_panic_or_print() {
    let mut violations = Vec::new();
    for path in library_sources() {
        let source = fs::read_to_string(&path).unwrap();
        check_panicking_calls(&path, &source, &mut violations);
        check_module_name(&path, &mut violations);
    }

    assert!(
        violations.is_empty(),
        "{} hygiene violations:\n{}",
        violations.len(),
        violations
            .iter()
            .map(|v| format!("  {}:{}: {}", v.file.display(), v.line, v.message))
            .collect::<Vec<_>>()
            .join("\n")
    );
}

#[test]
fn test_detector_sees_through_comments_and_tests() {
    let source = "fn a() {\n    let x = y.unwrap(); // boom\n}\n// z.unwrap()\n#[cfg(test)]\nmod tests { fn t() { q.unwrap(); } }\n";
    let mut violations = Vec::new();
    check_panicking_calls(Path::new("lib.rs"), source, &mut violations);

    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].line, 2);
}
