//! Language detection from file names, neighbouring files and contents.
//!
//! Detection runs in a fixed order: a Vim modeline wins over everything,
//! then the header and `.m` sibling rules, exact file names, extension
//! candidates (resolved by [`LANGUAGE_PRIORITIES`]) and finally a shebang.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Result of guessing the language of a file.
#[derive(Debug, Clone, PartialEq)]
pub enum LanguageGuess {
    Known(String),
    /// Two languages matched equally well; the heartbeat should be skipped.
    Ambiguous(String, String),
    Unknown,
}

impl LanguageGuess {
    pub fn name(&self) -> Option<&str> {
        match self {
            LanguageGuess::Known(name) => Some(name),
            _ => None,
        }
    }
}

lazy_static! {
    // Extension -> candidate languages, most likely first
    static ref EXTENSION_MAP: HashMap<&'static str, &'static [&'static str]> = {
        let mut m: HashMap<&'static str, &'static [&'static str]> = HashMap::new();

        // Web
        m.insert("html", &["HTML"]);
        m.insert("htm", &["HTML"]);
        m.insert("css", &["CSS"]);
        m.insert("scss", &["SCSS"]);
        m.insert("sass", &["Sass"]);
        m.insert("less", &["Less"]);
        m.insert("styl", &["Stylus"]);
        m.insert("vue", &["Vue.js"]);
        m.insert("svelte", &["Svelte"]);

        // JS/TS variants
        m.insert("js", &["JavaScript"]);
        m.insert("cjs", &["JavaScript"]);
        m.insert("mjs", &["JavaScript"]);
        m.insert("jsx", &["JavaScript"]);
        m.insert("ts", &["TypeScript", "TypoScript"]);
        m.insert("tsx", &["TypeScript"]);

        // Languages
        m.insert("py", &["Python"]);
        m.insert("pyw", &["Python"]);
        m.insert("pyi", &["Python"]);
        m.insert("java", &["Java"]);
        m.insert("jsp", &["Java Server Page"]);
        m.insert("c", &["C"]);
        m.insert("cpp", &["C++"]);
        m.insert("cc", &["C++"]);
        m.insert("cxx", &["C++"]);
        m.insert("hpp", &["C++"]);
        m.insert("hh", &["C++"]);
        m.insert("hxx", &["C++"]);
        m.insert("mm", &["Objective-C++"]);
        m.insert("cs", &["C#"]);
        m.insert("fs", &["Forth", "F#"]);
        m.insert("fsx", &["F#"]);
        m.insert("go", &["Go"]);
        m.insert("rs", &["Rust"]);
        m.insert("rb", &["Ruby"]);
        m.insert("php", &["PHP"]);
        m.insert("kt", &["Kotlin"]);
        m.insert("kts", &["Kotlin"]);
        m.insert("swift", &["Swift"]);
        m.insert("dart", &["Dart"]);
        m.insert("jl", &["Julia"]);
        m.insert("r", &["R"]);
        m.insert("hs", &["Haskell"]);
        m.insert("elm", &["Elm"]);
        m.insert("hx", &["Haxe"]);
        m.insert("ex", &["Elixir"]);
        m.insert("exs", &["Elixir"]);
        m.insert("erl", &["Erlang"]);
        m.insert("el", &["Emacs Lisp"]);
        m.insert("clj", &["Clojure"]);
        m.insert("scala", &["Scala"]);
        m.insert("lua", &["Lua"]);
        m.insert("pl", &["Prolog", "Perl"]);
        m.insert("pm", &["Perl"]);
        m.insert("p6", &["Perl6"]);
        m.insert("pro", &["Prolog"]);
        m.insert("sh", &["Bash"]);
        m.insert("bash", &["Bash"]);
        m.insert("zsh", &["Bash"]);
        m.insert("ps1", &["PowerShell"]);
        m.insert("vim", &["VimL"]);
        m.insert("zig", &["Zig"]);
        m.insert("sol", &["Solidity"]);
        m.insert("tf", &["Terraform"]);
        m.insert("ml", &["OCaml"]);
        m.insert("coffee", &["CoffeeScript"]);

        // Data / config
        m.insert("json", &["JSON"]);
        m.insert("yaml", &["YAML"]);
        m.insert("yml", &["YAML"]);
        m.insert("toml", &["TOML"]);
        m.insert("md", &["Markdown"]);
        m.insert("markdown", &["Markdown"]);
        m.insert("sql", &["SQL"]);
        m.insert("xml", &["XML"]);
        m.insert("ini", &["INI"]);
        m.insert("cfg", &["INI"]);
        m.insert("graphql", &["GraphQL"]);
        m.insert("gql", &["GraphQL"]);
        m.insert("mk", &["Makefile"]);
        m.insert("txt", &["Text only"]);

        m
    };

    // Exact file names (lowercased)
    static ref FILENAME_MAP: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("dockerfile", "Docker");
        m.insert("makefile", "Makefile");
        m.insert("gnumakefile", "Makefile");
        m.insert("cmakelists.txt", "CMake");
        m.insert("gemfile", "Ruby");
        m.insert("rakefile", "Ruby");
        m.insert("gruntfile", "JavaScript");
        m.insert("gruntfile.js", "JavaScript");
        m.insert("cargo.lock", "TOML");
        m.insert(".bashrc", "Bash");
        m.insert(".zshrc", "Bash");
        m.insert(".vimrc", "VimL");
        m
    };

    // Shebang interpreter -> language
    static ref INTERPRETER_MAP: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("python", "Python");
        m.insert("node", "JavaScript");
        m.insert("nodejs", "JavaScript");
        m.insert("bash", "Bash");
        m.insert("sh", "Bash");
        m.insert("zsh", "Bash");
        m.insert("ruby", "Ruby");
        m.insert("perl", "Perl");
        m.insert("php", "PHP");
        m.insert("lua", "Lua");
        m.insert("deno", "TypeScript");
        m
    };

    // Vim filetype -> language
    static ref VIM_FILETYPES: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("python", "Python");
        m.insert("javascript", "JavaScript");
        m.insert("typescript", "TypeScript");
        m.insert("sh", "Bash");
        m.insert("bash", "Bash");
        m.insert("zsh", "Bash");
        m.insert("c", "C");
        m.insert("cpp", "C++");
        m.insert("objc", "Objective-C");
        m.insert("objcpp", "Objective-C++");
        m.insert("cs", "C#");
        m.insert("go", "Go");
        m.insert("rust", "Rust");
        m.insert("ruby", "Ruby");
        m.insert("perl", "Perl");
        m.insert("php", "PHP");
        m.insert("java", "Java");
        m.insert("haskell", "Haskell");
        m.insert("lua", "Lua");
        m.insert("vim", "VimL");
        m.insert("markdown", "Markdown");
        m.insert("yaml", "YAML");
        m.insert("json", "JSON");
        m.insert("html", "HTML");
        m.insert("css", "CSS");
        m.insert("matlab", "Matlab");
        m.insert("make", "Makefile");
        m.insert("sql", "SQL");
        m.insert("text", "Text only");
        m
    };

    /// Tie-break weights used when several languages claim the same file.
    pub static ref LANGUAGE_PRIORITIES: HashMap<&'static str, f32> = {
        let mut m = HashMap::new();
        m.insert("typescript", 0.11);
        m.insert("perl", 0.1);
        m.insert("perl6", 0.1);
        m.insert("f#", 0.1);
        m
    };

    // Every language name we can emit, keyed by lowercase
    static ref CANONICAL_NAMES: HashMap<String, &'static str> = {
        let mut m = HashMap::new();
        for names in EXTENSION_MAP.values() {
            for name in names.iter() {
                m.insert(name.to_lowercase(), *name);
            }
        }
        for name in FILENAME_MAP.values()
            .chain(INTERPRETER_MAP.values())
            .chain(VIM_FILETYPES.values())
        {
            m.insert(name.to_lowercase(), *name);
        }
        m.insert("c".to_string(), "C");
        m.insert("objective-c".to_string(), "Objective-C");
        m.insert("matlab".to_string(), "Matlab");
        m
    };

    static ref MODELINE_RE: Regex = Regex::new(
        r"(?:^|\s)(?:vi|vim|ex)(?:[<=>]?\d+)?:.*?\b(?:ft|filetype|syn|syntax)=([\w+-]+)"
    ).expect("valid modeline regex");

    static ref SHEBANG_RE: Regex = Regex::new(
        r"^#!\s*(?:\S*/)?(?:env\s+(?:-\S+\s+)*)?([A-Za-z]+)"
    ).expect("valid shebang regex");
}

/// Maps a user supplied language name onto its canonical spelling.
pub fn canonical_language(name: &str) -> Option<String> {
    let key = name.trim().to_lowercase();
    if key.is_empty() {
        return None;
    }
    CANONICAL_NAMES.get(&key).map(|name| name.to_string())
}

/// Guesses the language of the file at `path` whose leading contents are `contents`.
pub fn guess_language(path: &Path, contents: &str) -> LanguageGuess {
    if let Some(language) = modeline_language(contents) {
        return LanguageGuess::Known(language);
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match extension.as_deref() {
        Some("h") => return LanguageGuess::Known(header_language(path)),
        Some("m") => return objective_c_or_matlab(path, contents),
        _ => {}
    }

    if let Some(filename) = path.file_name().and_then(|n| n.to_str()) {
        if let Some(language) = FILENAME_MAP.get(filename.to_lowercase().as_str()) {
            return LanguageGuess::Known(language.to_string());
        }
    }

    if let Some(candidates) = extension.as_deref().and_then(|e| EXTENSION_MAP.get(e)) {
        if let Some(language) = highest_priority(candidates) {
            return LanguageGuess::Known(language.to_string());
        }
    }

    if let Some(language) = shebang_language(contents) {
        return LanguageGuess::Known(language);
    }

    if contents.trim().is_empty() && extension.is_none() {
        return LanguageGuess::Known("Text only".to_string());
    }

    LanguageGuess::Unknown
}

/// Picks the candidate with the highest priority weight. Equal weights keep
/// the table order.
fn highest_priority<'a>(candidates: &[&'a str]) -> Option<&'a str> {
    let mut best: Option<(&str, f32)> = None;
    for candidate in candidates {
        let weight = LANGUAGE_PRIORITIES
            .get(candidate.to_lowercase().as_str())
            .copied()
            .unwrap_or(0.0);
        match best {
            Some((_, best_weight)) if best_weight >= weight => {}
            _ => best = Some((candidate, weight)),
        }
    }
    best.map(|(name, _)| name)
}

/// Looks for a Vim modeline in the first or last five lines.
pub fn modeline_language(contents: &str) -> Option<String> {
    let lines: Vec<&str> = contents.lines().collect();
    let head = lines.iter().take(5);
    let tail = lines.iter().skip(lines.len().saturating_sub(5).max(5));

    head.chain(tail).find_map(|line| {
        let filetype = MODELINE_RE.captures(line)?.get(1)?.as_str().to_lowercase();
        VIM_FILETYPES
            .get(filetype.as_str())
            .map(|name| name.to_string())
            .or_else(|| canonical_language(&filetype))
    })
}

fn shebang_language(contents: &str) -> Option<String> {
    let first_line = contents.lines().next()?;
    let interpreter = SHEBANG_RE.captures(first_line)?.get(1)?.as_str();
    let interpreter = interpreter.trim_end_matches(|c: char| c.is_ascii_digit());
    INTERPRETER_MAP.get(interpreter).map(|name| name.to_string())
}

fn sibling_extensions(path: &Path) -> HashSet<String> {
    let Some(dir) = path.parent() else {
        return HashSet::new();
    };
    let Ok(entries) = std::fs::read_dir(dir) else {
        return HashSet::new();
    };

    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|sibling| sibling != path)
        .filter_map(|sibling| {
            sibling
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
        })
        .collect()
}

/// `.h` files take the language of the sources next to them.
fn header_language(path: &Path) -> String {
    let siblings = sibling_extensions(path);
    let language = if ["cpp", "cxx", "cc", "hpp", "hh", "hxx"]
        .iter()
        .any(|ext| siblings.contains(*ext))
    {
        "C++"
    } else if siblings.contains("m") {
        "Objective-C"
    } else if siblings.contains("mm") {
        "Objective-C++"
    } else {
        "C"
    };
    language.to_string()
}

fn objective_c_or_matlab(path: &Path, contents: &str) -> LanguageGuess {
    if sibling_extensions(path).contains("mat") {
        return LanguageGuess::Known("Matlab".to_string());
    }

    let matlab = matlab_score(contents);
    let objc = objective_c_score(contents);

    if matlab > objc {
        LanguageGuess::Known("Matlab".to_string())
    } else if objc > matlab || objc == 0.0 {
        LanguageGuess::Known("Objective-C".to_string())
    } else {
        LanguageGuess::Ambiguous("Matlab".to_string(), "Objective-C".to_string())
    }
}

lazy_static! {
    static ref MATLAB_FUNCTION_RE: Regex =
        Regex::new(r"(?m)^\s*function\s+(?:\[[^\]]*\]|\w+)\s*=").expect("valid regex");
    static ref MATLAB_COMMENT_RE: Regex = Regex::new(r"(?m)^\s*%").expect("valid regex");
    static ref OBJC_DIRECTIVE_RE: Regex =
        Regex::new(r"(?m)^\s*(?:@interface|@implementation|@protocol|@import|#import)\b")
            .expect("valid regex");
    static ref OBJC_MESSAGE_RE: Regex =
        Regex::new(r"\[\s*\w+\s+\w+(?::|\s*\])").expect("valid regex");
}

fn matlab_score(contents: &str) -> f32 {
    let mut score: f32 = 0.0;
    if MATLAB_FUNCTION_RE.is_match(contents) {
        score += 0.5;
    }
    if MATLAB_COMMENT_RE.is_match(contents) {
        score += 0.2;
    }
    score.min(1.0)
}

fn objective_c_score(contents: &str) -> f32 {
    let mut score: f32 = 0.0;
    if OBJC_DIRECTIVE_RE.is_match(contents) {
        score += 0.5;
    }
    if OBJC_MESSAGE_RE.is_match(contents) {
        score += 0.2;
    }
    score.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn guess(dir: &TempDir, name: &str, contents: &str) -> LanguageGuess {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        guess_language(&path, contents)
    }

    #[test]
    fn test_language_detection() {
        let dir = TempDir::new().unwrap();
        assert_eq!(guess(&dir, "test.rs", "fn main() {}").name(), Some("Rust"));
        assert_eq!(guess(&dir, "test.js", "let a;").name(), Some("JavaScript"));
        assert_eq!(guess(&dir, "test.mjs", "export {}").name(), Some("JavaScript"));
        assert_eq!(guess(&dir, "Makefile", "all:").name(), Some("Makefile"));
        assert_eq!(guess(&dir, "test.unknown", "data"), LanguageGuess::Unknown);
    }

    #[test]
    fn test_priorities_break_extension_ties() {
        let dir = TempDir::new().unwrap();
        assert_eq!(guess(&dir, "a.ts", "let a = 1;").name(), Some("TypeScript"));
        assert_eq!(guess(&dir, "a.pl", "print 1;").name(), Some("Perl"));
        assert_eq!(guess(&dir, "a.fs", "let x = 1").name(), Some("F#"));
    }

    #[test]
    fn test_header_follows_c_siblings() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("main.c"), "int main(){}").unwrap();
        assert_eq!(guess(&dir, "main.h", "#define A 1").name(), Some("C"));
    }

    #[test]
    fn test_header_follows_cpp_siblings() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("main.c"), "").unwrap();
        fs::write(dir.path().join("impl.cpp"), "").unwrap();
        assert_eq!(guess(&dir, "main.h", "#define A 1").name(), Some("C++"));
    }

    #[test]
    fn test_header_follows_objective_c_siblings() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("view.m"), "").unwrap();
        assert_eq!(guess(&dir, "view.h", "").name(), Some("Objective-C"));

        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("view.mm"), "").unwrap();
        assert_eq!(guess(&dir, "view.h", "").name(), Some("Objective-C++"));
    }

    #[test]
    fn test_m_file_with_mat_sibling_is_matlab() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("data.mat"), "").unwrap();
        assert_eq!(guess(&dir, "script.m", "x = 1;").name(), Some("Matlab"));
    }

    #[test]
    fn test_m_file_content_scores() {
        let dir = TempDir::new().unwrap();
        let objc = "#import <UIKit/UIKit.h>\n@implementation Foo\n- (void)a { [self b:1]; }\n@end\n";
        assert_eq!(guess(&dir, "foo.m", objc).name(), Some("Objective-C"));

        let matlab = "% compute\nfunction y = double_it(x)\n  y = 2 * x;\nend\n";
        assert_eq!(guess(&dir, "double_it.m", matlab).name(), Some("Matlab"));

        assert_eq!(guess(&dir, "empty.m", "").name(), Some("Objective-C"));
    }

    #[test]
    fn test_m_file_tie_is_ambiguous() {
        let dir = TempDir::new().unwrap();
        let both = "% header\nfunction y = f(x)\n#import <Foundation/Foundation.h>\n[obj run]\n";
        assert_eq!(
            guess(&dir, "both.m", both),
            LanguageGuess::Ambiguous("Matlab".to_string(), "Objective-C".to_string())
        );
    }

    #[test]
    fn test_modeline_overrides_extension() {
        let dir = TempDir::new().unwrap();
        let contents = "print('hi')\n# vim: set ft=python :\n";
        assert_eq!(guess(&dir, "script.txt", contents).name(), Some("Python"));
        assert_eq!(guess(&dir, "noext", contents).name(), Some("Python"));
    }

    #[test]
    fn test_modeline_in_last_lines() {
        let mut contents = String::new();
        for i in 0..20 {
            contents.push_str(&format!("line {}\n", i));
        }
        contents.push_str("/* vim: filetype=javascript */\n");
        assert_eq!(modeline_language(&contents), Some("JavaScript".to_string()));
    }

    #[test]
    fn test_shebang_detection() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            guess(&dir, "run", "#!/usr/bin/env python3\nprint(1)\n").name(),
            Some("Python")
        );
        assert_eq!(guess(&dir, "build", "#!/bin/bash\necho hi\n").name(), Some("Bash"));
    }

    #[test]
    fn test_text_only() {
        let dir = TempDir::new().unwrap();
        assert_eq!(guess(&dir, "notes.txt", "hello").name(), Some("Text only"));
        assert_eq!(guess(&dir, "empty", "").name(), Some("Text only"));
    }

    #[test]
    fn test_canonical_language() {
        assert_eq!(canonical_language("JAVA"), Some("Java".to_string()));
        assert_eq!(canonical_language("python"), Some("Python".to_string()));
        assert_eq!(canonical_language("foo"), None);
    }
}
