//! Include/exclude filtering and the hide-* redaction policies.

use regex::Regex;
use std::path::Path;

use crate::config::Settings;
use crate::entity::EntityType;
use crate::heartbeat::Heartbeat;
use crate::project::obfuscated_project_name;

/// Returns the exclude pattern that rejects `entity`, if any.
///
/// A matching include pattern always keeps the entity.
pub fn excluded_by<'a>(entity: &str, include: &[Regex], exclude: &'a [Regex]) -> Option<&'a Regex> {
    if include.iter().any(|re| re.is_match(entity)) {
        return None;
    }
    exclude.iter().find(|re| re.is_match(entity))
}

fn matches_any(patterns: &[Regex], value: &str) -> bool {
    patterns.iter().any(|re| re.is_match(value))
}

/// Produces a copy of `heartbeat` that is safe to transmit.
///
/// File names are hidden first, then project names, then branch names.
/// Applying it to an already sanitized heartbeat changes nothing.
pub fn sanitize(heartbeat: &Heartbeat, settings: &Settings) -> Heartbeat {
    let mut sanitized = heartbeat.clone();

    if heartbeat.entity_type == EntityType::File
        && !is_hidden_name(&heartbeat.entity)
        && matches_any(&settings.hide_file_names, &heartbeat.entity)
    {
        sanitized.entity = hidden_entity(&heartbeat.entity);
        sanitized.branch = None;
        sanitized.dependencies = None;
        sanitized.lines = None;
        sanitized.lineno = None;
        sanitized.cursorpos = None;
    }

    // File projects were already obfuscated during detection
    if heartbeat.entity_type != EntityType::File
        && matches_any(&settings.hide_project_names, &heartbeat.entity)
    {
        if heartbeat.project.is_some() {
            sanitized.project = Some(obfuscated_project_name(Path::new(&heartbeat.entity)));
        }
    }

    if sanitized.branch.is_some() && matches_any(&settings.hide_branch_names, &heartbeat.entity) {
        sanitized.branch = None;
    }

    sanitized
}

fn is_hidden_name(entity: &str) -> bool {
    entity.starts_with("HIDDEN") && !entity.contains('/')
}

/// `HIDDEN` plus the original extension, if any.
fn hidden_entity(entity: &str) -> String {
    let extension = Path::new(entity)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();
    format!("HIDDEN{}", extension)
}
