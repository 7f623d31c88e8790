//! Entity classification: what a heartbeat is about, and for files, where
//! the file really lives on disk.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::expand_home;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    #[default]
    File,
    Domain,
    App,
    Url,
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(EntityType::File),
            "domain" => Ok(EntityType::Domain),
            "app" => Ok(EntityType::App),
            "url" => Ok(EntityType::Url),
            other => Err(format!("unknown entity type: {}", other)),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityType::File => "file",
            EntityType::Domain => "domain",
            EntityType::App => "app",
            EntityType::Url => "url",
        };
        f.write_str(name)
    }
}

/// Classified entity, ready to be put on a heartbeat.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub name: String,
    pub entity_type: EntityType,
    /// Resolved location on disk, only for existing files.
    pub path: Option<PathBuf>,
    pub size: Option<u64>,
}

impl Entity {
    pub fn is_file(&self) -> bool {
        self.entity_type == EntityType::File
    }
}

/// Classifies `raw`. Returns `None` when a file entity does not exist.
pub fn classify(raw: &str, entity_type: EntityType) -> Option<Entity> {
    if entity_type != EntityType::File {
        return Some(Entity {
            name: raw.to_string(),
            entity_type,
            path: None,
            size: None,
        });
    }

    let expanded = expand_home(raw.trim());
    let resolved = std::fs::canonicalize(&expanded).ok()?;
    let metadata = std::fs::metadata(&resolved).ok()?;
    if !metadata.is_file() {
        return None;
    }

    Some(Entity {
        name: normalize_path(&resolved),
        entity_type,
        path: Some(resolved),
        size: Some(metadata.len()),
    })
}

/// Forward slashes, no verbatim prefix, upper-case drive letter.
pub fn normalize_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let raw = raw.strip_prefix(r"\\?\").unwrap_or(&raw);
    let mut normalized = raw.replace('\\', "/");

    let bytes = normalized.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        let drive = normalized[..1].to_uppercase();
        normalized.replace_range(..1, &drive);
    }

    normalized
}
