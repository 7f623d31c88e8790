//! Per-language import scanners.
//!
//! Every parser is best effort: it works on whatever prefix of the file was
//! read and never fails, it only finds fewer tokens.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;

/// Tokens longer than this are noise (minified code, data URIs).
const MAX_TOKEN_LENGTH: usize = 200;

lazy_static! {
    static ref PY_IMPORT_RE: Regex = Regex::new(r"(?m)^\s*import\s+([\w.,\s]+?)\s*(?:#.*)?$").expect("valid regex");
    static ref PY_FROM_RE: Regex = Regex::new(r"(?m)^\s*from\s+([\w.]+)\s+import\b").expect("valid regex");

    static ref QUOTED_RE: Regex = Regex::new(r#""[^"]+""#).expect("valid regex");

    static ref JAVA_IMPORT_RE: Regex =
        Regex::new(r"(?m)^\s*import\s+(?:(?:static|package|namespace)\s+)?([\w.]+(?:\.\*)?)\s*;").expect("valid regex");

    static ref C_INCLUDE_RE: Regex =
        Regex::new(r#"(?m)^\s*#\s*include\s*[<"]([^>"]+)[>"]"#).expect("valid regex");

    static ref CSHARP_USING_RE: Regex =
        Regex::new(r"(?m)^\s*using\s+(?:static\s+)?(?:\w+\s*=\s*)?([\w.]+)\s*;").expect("valid regex");

    static ref PHP_USE_RE: Regex = Regex::new(r"(?m)^\s*use\s+(function\s+|const\s+)?([^;]+);").expect("valid regex");
    static ref PHP_REQUIRE_RE: Regex = Regex::new(
        r#"\b(?:require|require_once|include|include_once)\s*\(?\s*(?:'([^']+)'|"([^"]+)")\s*\)?\s*;"#
    ).expect("valid regex");

    static ref JS_FROM_RE: Regex = Regex::new(r#"\bfrom\s+['"]([^'"]+)['"]"#).expect("valid regex");
    static ref JS_BARE_IMPORT_RE: Regex = Regex::new(r#"\bimport\s+['"]([^'"]+)['"]"#).expect("valid regex");
    static ref JS_REQUIRE_RE: Regex = Regex::new(r#"\brequire\s*\(\s*['"]([^'"]+)['"]\s*\)"#).expect("valid regex");

    static ref SWIFT_IMPORT_RE: Regex = Regex::new(
        r"(?m)^\s*(?:@testable\s+)?import\s+(?:(?:typealias|struct|class|enum|protocol|let|var|func)\s+)?(\w+)"
    ).expect("valid regex");

    static ref OBJC_LOCAL_IMPORT_RE: Regex = Regex::new(r#"(?m)^\s*#\s*import\s*"([^"]+)""#).expect("valid regex");
    static ref OBJC_SYSTEM_IMPORT_RE: Regex = Regex::new(r"(?m)^\s*#\s*import\s*<([^>]+)>").expect("valid regex");
    static ref OBJC_MODULE_IMPORT_RE: Regex = Regex::new(r"(?m)^\s*@import\s+([\w.]+)\s*;").expect("valid regex");

    static ref SCALA_IMPORT_RE: Regex = Regex::new(r"(?m)^\s*import\s+([\w.]+)").expect("valid regex");

    static ref RUST_EXTERN_RE: Regex = Regex::new(r"(?m)^\s*extern\s+crate\s+(\w+)").expect("valid regex");
    static ref RUST_USE_RE: Regex = Regex::new(r"(?m)^\s*(?:pub(?:\([\w\s]+\))?\s+)?use\s+(?:::)?(\w+)").expect("valid regex");

    static ref HAXE_IMPORT_RE: Regex = Regex::new(r"(?m)^\s*(?:import|using)\s+([\w.]+)").expect("valid regex");
    static ref HASKELL_IMPORT_RE: Regex = Regex::new(r"(?m)^\s*import\s+(?:qualified\s+)?([\w.]+)").expect("valid regex");

    static ref HTML_SCRIPT_RE: Regex = Regex::new(
        r#"(?i)<script\b[^>]*?\bsrc\s*=\s*("[^"]*"|'[^']*')"#
    ).expect("valid regex");

    static ref C_STANDARD_HEADERS: HashSet<&'static str> = [
        "assert", "complex", "ctype", "errno", "fenv", "float", "inttypes", "iso646",
        "limits", "locale", "math", "setjmp", "signal", "stdalign", "stdarg", "stdatomic",
        "stdbool", "stddef", "stdint", "stdio", "stdlib", "stdnoreturn", "string",
        "tgmath", "threads", "time", "uchar", "wchar", "wctype", "unistd", "fcntl",
        "algorithm", "array", "atomic", "bitset", "chrono", "cmath", "cstdio", "cstdlib",
        "cstring", "deque", "exception", "fstream", "functional", "iomanip", "ios",
        "iosfwd", "iostream", "istream", "iterator", "list", "map", "memory", "mutex",
        "numeric", "optional", "ostream", "queue", "random", "set", "sstream", "stack",
        "stdexcept", "streambuf", "thread", "tuple", "type_traits", "typeinfo",
        "unordered_map", "unordered_set", "utility", "variant", "vector",
    ]
    .into_iter()
    .collect();
}

/// Scans `contents` for dependency tokens according to `language`.
///
/// Tokens keep first-seen order and are de-duplicated.
pub fn parse_dependencies(language: Option<&str>, path: &Path, contents: &str) -> Vec<String> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_lowercase();

    let tokens = if file_name.starts_with("gruntfile") {
        vec!["grunt".to_string()]
    } else if file_name.starts_with("bower") && file_name.ends_with(".json") {
        bower_dependencies(contents)
    } else {
        match language.map(|l| l.to_lowercase()) {
            Some(lang) => match lang.as_str() {
                "python" => python_dependencies(contents),
                "go" => go_dependencies(contents),
                "java" => java_dependencies(contents),
                "c" | "c++" | "objective-c++" => c_dependencies(contents),
                "c#" => csharp_dependencies(contents),
                "php" => php_dependencies(contents),
                "javascript" | "typescript" | "vue.js" | "svelte" => js_dependencies(contents),
                "swift" => swift_dependencies(contents),
                "objective-c" => objective_c_dependencies(contents),
                "scala" => scala_dependencies(contents),
                "rust" => rust_dependencies(contents),
                "kotlin" => kotlin_dependencies(contents),
                "haxe" => roots(&HAXE_IMPORT_RE, contents, '.'),
                "haskell" | "elm" => roots(&HASKELL_IMPORT_RE, contents, '.'),
                "html" => html_dependencies(contents),
                _ => {
                    tracing::debug!("Parsing dependencies not supported for {}", lang);
                    Vec::new()
                }
            },
            None => Vec::new(),
        }
    };

    dedupe(tokens)
}

fn dedupe(tokens: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tokens
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && t.len() <= MAX_TOKEN_LENGTH)
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// First `separator`-delimited segment of every capture.
fn roots(re: &Regex, contents: &str, separator: char) -> Vec<String> {
    re.captures_iter(contents)
        .filter_map(|c| c.get(1))
        .filter_map(|m| m.as_str().split(separator).next().map(str::to_string))
        .collect()
}

fn python_dependencies(contents: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut push_root = |module: &str| {
        let module = module.trim();
        if module.starts_with('.') || module.is_empty() {
            return;
        }
        if let Some(root) = module.split('.').next() {
            if root != "__future__" {
                found.push(root.to_string());
            }
        }
    };

    for line in contents.lines() {
        if let Some(c) = PY_FROM_RE.captures(line) {
            push_root(&c[1]);
        } else if let Some(c) = PY_IMPORT_RE.captures(line) {
            for item in c[1].split(',') {
                if let Some(module) = item.split_whitespace().next() {
                    push_root(module);
                }
            }
        }
    }
    found
}

fn go_dependencies(contents: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut in_block = false;

    for line in contents.lines() {
        let trimmed = line.trim();
        if in_block {
            if trimmed.starts_with(')') {
                in_block = false;
                continue;
            }
        } else if let Some(rest) = trimmed.strip_prefix("import") {
            if rest.trim_start().starts_with('(') {
                in_block = true;
                continue;
            }
        } else {
            continue;
        }

        if let Some(m) = QUOTED_RE.find(trimmed) {
            if m.as_str() != "\"fmt\"" {
                found.push(m.as_str().to_string());
            }
        }
    }
    found
}

fn java_dependencies(contents: &str) -> Vec<String> {
    JAVA_IMPORT_RE
        .captures_iter(contents)
        .filter_map(|c| {
            let path = c[1].trim_end_matches(".*");
            let mut parts: Vec<&str> = path.split('.').filter(|p| !p.is_empty()).collect();
            match parts.first() {
                Some(&"java") | Some(&"javax") | None => return None,
                Some(&"com") | Some(&"org") | Some(&"net") | Some(&"io") => {
                    parts.remove(0);
                }
                _ => {}
            }
            if parts.is_empty() {
                return None;
            }
            parts.truncate(2);
            Some(parts.join("."))
        })
        .collect()
}

fn c_dependencies(contents: &str) -> Vec<String> {
    C_INCLUDE_RE
        .captures_iter(contents)
        .filter_map(|c| {
            let header = c[1].trim();
            let root = header.split('/').next()?;
            let root = root
                .strip_suffix(".h")
                .or_else(|| root.strip_suffix(".hpp"))
                .unwrap_or(root);
            if C_STANDARD_HEADERS.contains(root) {
                None
            } else {
                Some(root.to_string())
            }
        })
        .collect()
}

fn csharp_dependencies(contents: &str) -> Vec<String> {
    roots(&CSHARP_USING_RE, contents, '.')
        .into_iter()
        .filter(|root| root != "System")
        .collect()
}

fn php_dependencies(contents: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = Vec::new();

    for c in PHP_USE_RE.captures_iter(contents) {
        if c.get(1).map(|m| m.as_str().trim()) == Some("const") {
            continue;
        }
        let Some(list) = c.get(2) else { continue };
        for item in list.as_str().split(',') {
            let name = item.trim().trim_start_matches('\\');
            let name = name.split_whitespace().next().unwrap_or_default();
            if let Some(root) = name.split('\\').next().filter(|r| !r.is_empty()) {
                found.push((list.start(), root.to_string()));
            }
        }
    }

    for c in PHP_REQUIRE_RE.captures_iter(contents) {
        if let Some(target) = c.get(1).or_else(|| c.get(2)) {
            found.push((target.start(), format!("'{}'", target.as_str())));
        }
    }

    found.sort_by_key(|(pos, _)| *pos);
    let (uses, requires): (Vec<_>, Vec<_>) = found
        .into_iter()
        .map(|(_, token)| token)
        .partition(|token| !token.starts_with('\''));
    uses.into_iter().chain(requires).collect()
}

fn js_dependencies(contents: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = Vec::new();
    for re in [&*JS_FROM_RE, &*JS_BARE_IMPORT_RE, &*JS_REQUIRE_RE] {
        for c in re.captures_iter(contents) {
            if let Some(m) = c.get(1) {
                found.push((m.start(), module_basename(m.as_str())));
            }
        }
    }
    found.sort_by_key(|(pos, _)| *pos);
    found.into_iter().map(|(_, name)| name).collect()
}

fn module_basename(module: &str) -> String {
    let name = module.rsplit('/').next().unwrap_or(module);
    for ext in [".js", ".jsx", ".mjs", ".cjs", ".ts", ".tsx"] {
        if let Some(stripped) = name.strip_suffix(ext) {
            return stripped.to_string();
        }
    }
    name.to_string()
}

fn swift_dependencies(contents: &str) -> Vec<String> {
    SWIFT_IMPORT_RE
        .captures_iter(contents)
        .map(|c| c[1].to_string())
        .collect()
}

fn objective_c_dependencies(contents: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = Vec::new();

    for c in OBJC_LOCAL_IMPORT_RE.captures_iter(contents) {
        if let Some(m) = c.get(1) {
            let name = m.as_str().rsplit('/').next().unwrap_or(m.as_str());
            let name = name.strip_suffix(".h").unwrap_or(name);
            found.push((m.start(), name.to_string()));
        }
    }
    for re in [&*OBJC_SYSTEM_IMPORT_RE, &*OBJC_MODULE_IMPORT_RE] {
        for c in re.captures_iter(contents) {
            if let Some(m) = c.get(1) {
                let root = m.as_str().split(['/', '.']).next().unwrap_or_default();
                found.push((m.start(), root.to_string()));
            }
        }
    }

    found.sort_by_key(|(pos, _)| *pos);
    found.into_iter().map(|(_, name)| name).collect()
}

fn scala_dependencies(contents: &str) -> Vec<String> {
    SCALA_IMPORT_RE
        .captures_iter(contents)
        .map(|c| {
            let path = c[1].trim_end_matches("._");
            path.trim_end_matches('.').to_string()
        })
        .collect()
}

fn rust_dependencies(contents: &str) -> Vec<String> {
    const EXCLUDED: [&str; 6] = ["std", "core", "alloc", "self", "super", "crate"];

    let mut found: Vec<(usize, String)> = Vec::new();
    for re in [&*RUST_EXTERN_RE, &*RUST_USE_RE] {
        for c in re.captures_iter(contents) {
            if let Some(m) = c.get(1) {
                if !EXCLUDED.contains(&m.as_str()) {
                    found.push((m.start(), m.as_str().to_string()));
                }
            }
        }
    }
    found.sort_by_key(|(pos, _)| *pos);
    found.into_iter().map(|(_, name)| name).collect()
}

fn kotlin_dependencies(contents: &str) -> Vec<String> {
    SCALA_IMPORT_RE
        .captures_iter(contents)
        .map(|c| {
            // `import a.b.*` names the package itself
            if let Some(package) = c[1].strip_suffix('.') {
                return package.to_string();
            }
            let path = &c[1];
            match path.rsplit_once('.') {
                Some((package, _)) => package.to_string(),
                None => path.to_string(),
            }
        })
        .collect()
}

fn html_dependencies(contents: &str) -> Vec<String> {
    HTML_SCRIPT_RE
        .captures_iter(contents)
        .map(|c| c[1].to_string())
        .filter(|src| src.len() > 2)
        .collect()
}

fn bower_dependencies(contents: &str) -> Vec<String> {
    let Ok(serde_json::Value::Object(doc)) = serde_json::from_str::<serde_json::Value>(contents)
    else {
        return Vec::new();
    };

    let keys = |section: &str| -> Vec<String> {
        doc.get(section)
            .and_then(|v| v.as_object())
            .map(|deps| deps.keys().cloned().collect())
            .unwrap_or_default()
    };

    let mut found = keys("dependencies");
    found.push("bower".to_string());
    found.extend(keys("devDependencies"));
    found
}
