use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::path::Path;
use std::sync::mpsc;
use std::time::Duration;
use thiserror::Error;

use crate::cli::Cli;
use crate::config::Settings;
use crate::entity::{classify, EntityType};
use crate::project::{find_project_file, ProjectResolver};
use crate::redact::excluded_by;
use crate::stats::{file_stats, AmbiguousLanguage};
use crate::user_agent::user_agent;

/// Categories the API accepts; anything else is dropped.
pub const CATEGORIES: &[&str] = &[
    "coding",
    "building",
    "indexing",
    "debugging",
    "running tests",
    "writing tests",
    "manual testing",
    "code reviewing",
    "browsing",
    "designing",
];

/// How long to wait for the extra heartbeats line on stdin.
pub const STDIN_TIMEOUT: Duration = Duration::from_millis(250);

/// One activity event, in the shape the bulk endpoint expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub time: f64,
    pub entity: String,
    #[serde(rename = "type", default)]
    pub entity_type: EntityType,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub is_write: bool,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub dependencies: Option<Vec<String>>,
    #[serde(default)]
    pub lines: Option<u64>,
    #[serde(default)]
    pub lineno: Option<u64>,
    #[serde(default)]
    pub cursorpos: Option<u64>,
    #[serde(default)]
    pub user_agent: String,
    /// Travels in the queue's own column, not in the payload.
    #[serde(skip)]
    pub plugin: Option<String>,
}

/// Why a heartbeat was deliberately not sent. None of these are errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SkipReason {
    #[error("Skipping because matches exclude pattern: {0}")]
    Excluded(String),
    #[error("File does not exist; ignoring this heartbeat.")]
    FileMissing,
    #[error("Skipping because missing .wakatime-project file in parent path.")]
    MissingProjectFile,
    #[error("Skipping because project unknown.")]
    UnknownProject,
    #[error("Skipping because language is ambiguous: {0}")]
    AmbiguousLanguage(AmbiguousLanguage),
}

#[derive(Error, Debug)]
pub enum ExtraHeartbeatsError {
    #[error("Malformed extra heartbeats json: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Raw description of a heartbeat, from the command line or one element
/// of the extra heartbeats array.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeartbeatInput {
    #[serde(alias = "file")]
    pub entity: String,
    #[serde(rename = "type", alias = "entity_type", default)]
    pub entity_type: EntityType,
    #[serde(alias = "timestamp", default)]
    pub time: Option<f64>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub is_write: Option<bool>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub alternate_project: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub alternate_language: Option<String>,
    #[serde(default)]
    pub lines: Option<u64>,
    #[serde(default)]
    pub lineno: Option<u64>,
    #[serde(default)]
    pub cursorpos: Option<u64>,
    #[serde(skip)]
    pub plugin: Option<String>,
}

impl HeartbeatInput {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            entity: cli.entity.clone().unwrap_or_default(),
            entity_type: cli.entity_type.parse().unwrap_or_default(),
            time: cli.time,
            category: cli.category.clone(),
            is_write: cli.write,
            project: cli.project.clone(),
            alternate_project: cli.alternate_project.clone(),
            branch: None,
            language: cli.language.clone(),
            alternate_language: cli.alternate_language.clone(),
            lines: None,
            lineno: cli.lineno,
            cursorpos: cli.cursorpos,
            plugin: cli.plugin.clone(),
        }
    }
}

/// Turns inputs into heartbeats: filters, classification, stats and project.
pub struct HeartbeatBuilder<'a> {
    settings: &'a Settings,
    projects: ProjectResolver<'a>,
}

impl<'a> HeartbeatBuilder<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self {
            settings,
            projects: ProjectResolver::new(settings),
        }
    }

    pub async fn build(&self, input: HeartbeatInput) -> Result<Heartbeat, SkipReason> {
        let entity = classify(&input.entity, input.entity_type).ok_or(SkipReason::FileMissing)?;

        // Filters see the same resolved path that gets sent
        if let Some(pattern) = excluded_by(&entity.name, &self.settings.include, &self.settings.exclude) {
            return Err(SkipReason::Excluded(pattern.as_str().to_string()));
        }

        if entity.is_file() && self.settings.include_only_with_project_file {
            let has_marker = entity
                .path
                .as_deref()
                .and_then(Path::parent)
                .and_then(find_project_file)
                .is_some();
            if !has_marker {
                return Err(SkipReason::MissingProjectFile);
            }
        }

        let project = self
            .projects
            .resolve(
                &entity,
                input.project.as_deref(),
                input.alternate_project.as_deref(),
            )
            .await;
        if project.project.is_none() && self.settings.exclude_unknown_project {
            return Err(SkipReason::UnknownProject);
        }

        let stats = file_stats(
            &entity,
            input.language.as_deref(),
            input.alternate_language.as_deref(),
        )
        .map_err(SkipReason::AmbiguousLanguage)?;

        let category = input.category.and_then(|c| {
            let c = c.trim().to_lowercase();
            if CATEGORIES.contains(&c.as_str()) {
                Some(c)
            } else {
                tracing::debug!(category = %c, "Ignoring unknown category");
                None
            }
        });

        let plugin = input.plugin.or_else(|| self.settings.plugin.clone());

        Ok(Heartbeat {
            time: input.time.filter(|t| *t > 0.0).unwrap_or_else(now),
            entity: entity.name,
            entity_type: entity.entity_type,
            category,
            is_write: input.is_write.unwrap_or(false),
            project: project.project,
            branch: input.branch.or(project.branch),
            language: stats.language,
            dependencies: Some(stats.dependencies).filter(|d| !d.is_empty()),
            lines: input.lines.or(stats.lines),
            lineno: input.lineno,
            cursorpos: input.cursorpos,
            user_agent: user_agent(plugin.as_deref()),
            plugin,
        })
    }
}

fn now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Starts reading one line from stdin on a background thread.
///
/// Started before config loading so a writer never blocks on a full pipe.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut line = String::new();
        let stdin = std::io::stdin();
        if stdin.lock().read_line(&mut line).is_ok() {
            let _ = tx.send(line);
        }
    });
    rx
}

/// Waits up to `timeout` for the line; no data means no extra heartbeats.
pub fn receive_extra_heartbeats(
    rx: &mpsc::Receiver<String>,
    timeout: Duration,
) -> Result<Vec<HeartbeatInput>, ExtraHeartbeatsError> {
    match rx.recv_timeout(timeout) {
        Ok(line) => parse_extra_heartbeats(&line),
        Err(_) => {
            tracing::debug!("No extra heartbeats received on stdin");
            Ok(Vec::new())
        }
    }
}

/// Parses the JSON array line. Null members are skipped; members that do
/// not decode are skipped with a warning.
pub fn parse_extra_heartbeats(line: &str) -> Result<Vec<HeartbeatInput>, ExtraHeartbeatsError> {
    if line.trim().is_empty() {
        return Ok(Vec::new());
    }

    let values: Vec<Option<serde_json::Value>> = serde_json::from_str(line.trim())?;

    Ok(values
        .into_iter()
        .flatten()
        .filter_map(|value| match serde_json::from_value::<HeartbeatInput>(value) {
            Ok(input) => Some(input),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed extra heartbeat");
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFile;
    use clap::Parser;
    use std::fs;
    use tempfile::TempDir;

    const KEY: &str = "00000000-0000-4000-8000-000000000000";

    fn settings(args: &[&str]) -> Settings {
        let mut argv = vec!["wakatime-cli", "--entity", "/tmp/x", "--key", KEY];
        argv.extend_from_slice(args);
        Settings::resolve(&Cli::parse_from(argv), &ConfigFile::default()).unwrap()
    }

    fn file_input(path: &Path) -> HeartbeatInput {
        HeartbeatInput {
            entity: path.to_string_lossy().into_owned(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_build_file_heartbeat() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("x.py");
        fs::write(&file, "import os\nprint('hi')\n").unwrap();

        let settings = settings(&[]);
        let mut input = file_input(&file);
        input.time = Some(1_700_000_000.25);
        input.category = Some("Debugging".to_string());
        input.is_write = Some(true);
        input.lineno = Some(2);

        let heartbeat = HeartbeatBuilder::new(&settings).build(input).await.unwrap();
        assert!(heartbeat.entity.starts_with('/'));
        assert!(heartbeat.entity.ends_with("/x.py"));
        assert_eq!(heartbeat.time, 1_700_000_000.25);
        assert_eq!(heartbeat.category.as_deref(), Some("debugging"));
        assert!(heartbeat.is_write);
        assert_eq!(heartbeat.language.as_deref(), Some("Python"));
        assert_eq!(heartbeat.lines, Some(2));
        assert_eq!(heartbeat.lineno, Some(2));
        assert_eq!(heartbeat.dependencies, Some(vec!["os".to_string()]));
        assert!(heartbeat.user_agent.ends_with("Unknown/0"));
    }

    #[tokio::test]
    async fn test_missing_file_is_skipped() {
        let settings = settings(&[]);
        let result = HeartbeatBuilder::new(&settings)
            .build(file_input(Path::new("/tmp/definitely-missing/nope.txt")))
            .await;
        assert_eq!(result.unwrap_err(), SkipReason::FileMissing);
    }

    #[tokio::test]
    async fn test_exclude_and_include() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("a.py");
        fs::write(&file, "x = 1\n").unwrap();

        let excluded = settings(&["--exclude", ".*"]);
        let result = HeartbeatBuilder::new(&excluded).build(file_input(&file)).await;
        assert_eq!(result.unwrap_err(), SkipReason::Excluded(".*".to_string()));

        let included = settings(&["--exclude", ".*", "--include", "py$"]);
        assert!(HeartbeatBuilder::new(&included).build(file_input(&file)).await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exclude_matches_symlink_target() {
        let temp_dir = TempDir::new().unwrap();
        let private = temp_dir.path().join("private");
        fs::create_dir_all(&private).unwrap();
        let target = private.join("notes.py");
        fs::write(&target, "x = 1\n").unwrap();
        let link = temp_dir.path().join("notes.py");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let settings = settings(&["--exclude", "/private/"]);
        let result = HeartbeatBuilder::new(&settings).build(file_input(&link)).await;
        assert_eq!(result.unwrap_err(), SkipReason::Excluded("/private/".to_string()));
    }

    #[tokio::test]
    async fn test_include_only_with_project_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("proj/a.py");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, "x = 1\n").unwrap();

        let settings = settings(&["--include-only-with-project-file"]);
        let result = HeartbeatBuilder::new(&settings).build(file_input(&file)).await;
        assert_eq!(result.unwrap_err(), SkipReason::MissingProjectFile);

        fs::write(temp_dir.path().join("proj/.wakatime-project"), "proj\n").unwrap();
        let heartbeat = HeartbeatBuilder::new(&settings).build(file_input(&file)).await.unwrap();
        assert_eq!(heartbeat.project.as_deref(), Some("proj"));
    }

    #[tokio::test]
    async fn test_exclude_unknown_project() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("a.py");
        fs::write(&file, "x = 1\n").unwrap();

        let settings = settings(&["--exclude-unknown-project"]);
        let result = HeartbeatBuilder::new(&settings).build(file_input(&file)).await;
        assert_eq!(result.unwrap_err(), SkipReason::UnknownProject);

        let mut input = file_input(&file);
        input.alternate_project = Some("alt".to_string());
        assert!(HeartbeatBuilder::new(&settings).build(input).await.is_ok());
    }

    #[tokio::test]
    async fn test_non_file_heartbeat() {
        let settings = settings(&[]);
        let input = HeartbeatInput {
            entity: "https://example.com/page".to_string(),
            entity_type: EntityType::Url,
            category: Some("browsing".to_string()),
            project: Some("web".to_string()),
            ..Default::default()
        };
        let heartbeat = HeartbeatBuilder::new(&settings).build(input).await.unwrap();
        assert_eq!(heartbeat.entity, "https://example.com/page");
        assert_eq!(heartbeat.entity_type, EntityType::Url);
        assert_eq!(heartbeat.project.as_deref(), Some("web"));
        assert_eq!(heartbeat.lines, None);
    }

    #[tokio::test]
    async fn test_unknown_category_dropped() {
        let settings = settings(&[]);
        let input = HeartbeatInput {
            entity: "Slack".to_string(),
            entity_type: EntityType::App,
            category: Some("sleeping".to_string()),
            ..Default::default()
        };
        let heartbeat = HeartbeatBuilder::new(&settings).build(input).await.unwrap();
        assert_eq!(heartbeat.category, None);
    }

    #[test]
    fn test_plugin_falls_back_to_settings() {
        let settings = settings(&["--plugin", "vim/9.0 vim-wakatime/11.0.0"]);
        let input = HeartbeatInput {
            entity: "Slack".to_string(),
            entity_type: EntityType::App,
            ..Default::default()
        };

        let heartbeat = tokio_test::block_on(HeartbeatBuilder::new(&settings).build(input)).unwrap();

        assert_eq!(heartbeat.plugin.as_deref(), Some("vim/9.0 vim-wakatime/11.0.0"));
        assert!(heartbeat.user_agent.ends_with(" vim/9.0 vim-wakatime/11.0.0"));
        assert!(heartbeat.time > 0.0);
        assert!(!heartbeat.is_write);
    }

    #[test]
    fn test_parse_extra_heartbeats() {
        let line = r#"[{"entity":"/tmp/a.py","timestamp":1585598059,"is_write":true},null,{"file":"b.rs","type":"file","lineno":4},{"type":"folder"},"nope"]"#;
        let inputs = parse_extra_heartbeats(line).unwrap();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].entity, "/tmp/a.py");
        assert_eq!(inputs[0].time, Some(1585598059.0));
        assert_eq!(inputs[0].is_write, Some(true));
        assert_eq!(inputs[1].entity, "b.rs");
        assert_eq!(inputs[1].lineno, Some(4));
    }

    #[test]
    fn test_parse_extra_heartbeats_malformed() {
        assert!(parse_extra_heartbeats("[{foobar}]").is_err());
        assert!(parse_extra_heartbeats(r#"{"entity":"a"}"#).is_err());
        assert!(parse_extra_heartbeats("").unwrap().is_empty());
        assert!(parse_extra_heartbeats("[]\n").unwrap().is_empty());
    }

    #[test]
    fn test_receive_extra_heartbeats_timeout() {
        let (_tx, rx) = mpsc::channel::<String>();
        let inputs = receive_extra_heartbeats(&rx, Duration::from_millis(10)).unwrap();
        assert!(inputs.is_empty());
    }

    #[test]
    fn test_payload_serialization() {
        let heartbeat = Heartbeat {
            time: 1.5,
            entity: "/a.py".to_string(),
            entity_type: EntityType::File,
            category: None,
            is_write: false,
            project: None,
            branch: None,
            language: Some("Python".to_string()),
            dependencies: None,
            lines: Some(2),
            lineno: None,
            cursorpos: None,
            user_agent: "ua".to_string(),
            plugin: Some("vim/1".to_string()),
        };
        let value = serde_json::to_value(&heartbeat).unwrap();
        assert_eq!(value["type"], "file");
        assert_eq!(value["language"], "Python");
        assert!(value.get("plugin").is_none());
    }
}
