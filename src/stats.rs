use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use thiserror::Error;

use crate::constants::{MAX_CONTENT_BYTES, MAX_FILE_SIZE_SUPPORTED};
use crate::dependencies::parse_dependencies;
use crate::entity::Entity;
use crate::language::{canonical_language, guess_language, LanguageGuess};

/// Derived facts about a file entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileStats {
    pub language: Option<String>,
    pub lines: Option<u64>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Unable to decide between {0} and {1}")]
pub struct AmbiguousLanguage(pub String, pub String);

/// Computes language, line count and dependencies.
///
/// An explicit `language` that names a known language wins over detection;
/// `alternate_language` is only used when nothing else produced one.
pub fn file_stats(
    entity: &Entity,
    language: Option<&str>,
    alternate_language: Option<&str>,
) -> Result<FileStats, AmbiguousLanguage> {
    let explicit = language.and_then(canonical_language);
    let alternate = alternate_language.and_then(canonical_language);

    let Some(path) = entity.path.as_deref().filter(|_| entity.is_file()) else {
        return Ok(FileStats {
            language: explicit.or(alternate),
            ..Default::default()
        });
    };

    let lines = match entity.size {
        Some(size) if size > MAX_FILE_SIZE_SUPPORTED => None,
        _ => count_lines(path),
    };

    let contents = read_head(path).unwrap_or_default();

    let detected = match explicit {
        Some(language) => Some(language),
        None => match guess_language(path, &contents) {
            LanguageGuess::Known(language) => Some(language),
            LanguageGuess::Ambiguous(a, b) => return Err(AmbiguousLanguage(a, b)),
            LanguageGuess::Unknown => None,
        },
    };
    let language = detected.or(alternate);

    let dependencies = parse_dependencies(language.as_deref(), path, &contents);

    Ok(FileStats {
        language,
        lines,
        dependencies,
    })
}

fn count_lines(path: &Path) -> Option<u64> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Unable to count lines");
            return None;
        }
    };

    let mut lines = 0;
    for line in BufReader::new(file).split(b'\n') {
        if line.is_err() {
            return None;
        }
        lines += 1;
    }
    Some(lines)
}

/// First `MAX_CONTENT_BYTES` of the file, lossily decoded.
fn read_head(path: &Path) -> Option<String> {
    let mut buffer = Vec::new();
    File::open(path)
        .and_then(|file| file.take(MAX_CONTENT_BYTES as u64).read_to_end(&mut buffer))
        .map_err(|e| tracing::debug!(path = %path.display(), error = %e, "Unable to read file contents"))
        .ok()?;
    Some(String::from_utf8_lossy(&buffer).into_owned())
}
