use async_trait::async_trait;
use git2::Repository;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use crate::config::{ProjectMapping, Settings};
use crate::constants::PROJECT_FILE_NAME;
use crate::entity::{normalize_path, Entity};

/// VCS subprocesses are killed after this long.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectInfo {
    pub project: Option<String>,
    pub branch: Option<String>,
    /// Top of the working copy, when the detector knows it.
    pub root: Option<PathBuf>,
}

/// One strategy in the detection chain.
#[async_trait]
pub trait ProjectDetector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Looks for a project containing `dir`.
    async fn probe(&self, dir: &Path) -> Option<ProjectInfo>;
}

/// Nearest `.wakatime-project` marker.
pub struct ProjectFileDetector;

#[async_trait]
impl ProjectDetector for ProjectFileDetector {
    fn name(&self) -> &'static str {
        "project-file"
    }

    async fn probe(&self, dir: &Path) -> Option<ProjectInfo> {
        let marker = find_project_file(dir)?;
        let contents = match std::fs::read_to_string(&marker) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::warn!(path = %marker.display(), error = %e, "Unable to read project file");
                return None;
            }
        };

        let mut lines = contents.lines().map(str::trim);
        let project = lines
            .next()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .or_else(|| folder_name(marker.parent()?));
        let branch = lines.next().filter(|l| !l.is_empty()).map(str::to_string);

        Some(ProjectInfo {
            project,
            branch,
            root: marker.parent().map(Path::to_path_buf),
        })
    }
}

/// `[projectmap]` regexes matched against the entity's folder.
pub struct ProjectMapDetector<'a> {
    pub mappings: &'a [ProjectMapping],
}

#[async_trait]
impl ProjectDetector for ProjectMapDetector<'_> {
    fn name(&self) -> &'static str {
        "projectmap"
    }

    async fn probe(&self, dir: &Path) -> Option<ProjectInfo> {
        let folder = normalize_path(dir);
        self.mappings.iter().find_map(|mapping| {
            let project = apply_mapping(mapping, &folder)?;
            Some(ProjectInfo {
                project: Some(project),
                branch: None,
                root: None,
            })
        })
    }
}

fn apply_mapping(mapping: &ProjectMapping, folder: &str) -> Option<String> {
    let captures = mapping.pattern.captures(folder)?;

    let project = if mapping.template.is_empty() {
        (1..captures.len())
            .rev()
            .filter_map(|i| captures.get(i))
            .map(|m| m.as_str().to_string())
            .find(|s| !s.is_empty())?
    } else {
        let mut project = mapping.template.clone();
        for i in 0..captures.len().saturating_sub(1) {
            let value = captures.get(i + 1).map(|m| m.as_str()).unwrap_or_default();
            project = project.replace(&format!("{{{}}}", i), value);
        }
        project
    };

    let project = project.trim().to_string();
    (!project.is_empty()).then_some(project)
}

pub struct GitDetector<'a> {
    pub submodules_disabled: &'a [regex::Regex],
}

#[async_trait]
impl ProjectDetector for GitDetector<'_> {
    fn name(&self) -> &'static str {
        "git"
    }

    async fn probe(&self, dir: &Path) -> Option<ProjectInfo> {
        let mut repo = Repository::discover(dir).ok()?;

        if is_submodule(&repo) {
            let disabled = self
                .submodules_disabled
                .iter()
                .any(|re| re.is_match(&normalize_path(dir)));
            if disabled {
                let parent = repo.workdir()?.parent()?.to_path_buf();
                repo = Repository::discover(parent).ok()?;
            }
        }

        let root = match resolve_main_repo_path(&repo) {
            Some(main) => main,
            None => repo.workdir()?.to_path_buf(),
        };

        Some(ProjectInfo {
            project: folder_name(&root),
            branch: git_branch(&repo),
            root: Some(root),
        })
    }
}

/// Submodule checkouts have a `.git` file pointing into the parent's modules dir.
fn is_submodule(repo: &Repository) -> bool {
    if repo.is_worktree() {
        return false;
    }
    normalize_path(repo.path()).contains("/.git/modules/")
}

/// For a linked worktree, the root of the main repository.
///
/// The worktree's `.git` file reads `gitdir: <main>/.git/worktrees/<name>`.
pub fn resolve_main_repo_path(repo: &Repository) -> Option<PathBuf> {
    if !repo.is_worktree() {
        return None;
    }

    let git_file = std::fs::read_to_string(repo.workdir()?.join(".git")).ok()?;
    let gitdir = git_file
        .lines()
        .find_map(|line| line.strip_prefix("gitdir:"))
        .map(str::trim)?;

    let main_git_dir = Path::new(gitdir).parent()?.parent()?;
    main_git_dir.parent().map(Path::to_path_buf)
}

fn git_branch(repo: &Repository) -> Option<String> {
    match repo.head() {
        Ok(head) if head.is_branch() => head.shorthand().map(str::to_string),
        Ok(head) => head.target().map(|oid| oid.to_string()[..7].to_string()),
        Err(_) => {
            // Unborn branch: HEAD is a symbolic ref to a branch with no commits
            let head = repo.find_reference("HEAD").ok()?;
            let target = head.symbolic_target()?;
            Some(target.strip_prefix("refs/heads/").unwrap_or(target).to_string())
        }
    }
}

pub struct MercurialDetector;

#[async_trait]
impl ProjectDetector for MercurialDetector {
    fn name(&self) -> &'static str {
        "mercurial"
    }

    async fn probe(&self, dir: &Path) -> Option<ProjectInfo> {
        let root = dir.ancestors().find(|d| d.join(".hg").is_dir())?;

        let branch = std::fs::read_to_string(root.join(".hg").join("branch"))
            .ok()
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| "default".to_string());

        Some(ProjectInfo {
            project: folder_name(root),
            branch: Some(branch),
            root: Some(root.to_path_buf()),
        })
    }
}

pub struct SubversionDetector<'a> {
    pub binary: &'a str,
}

#[async_trait]
impl ProjectDetector for SubversionDetector<'_> {
    fn name(&self) -> &'static str {
        "subversion"
    }

    async fn probe(&self, dir: &Path) -> Option<ProjectInfo> {
        // Skip spawning a process outside of working copies
        let root = dir.ancestors().find(|d| d.join(".svn").is_dir())?;

        let mut command = tokio::process::Command::new(self.binary);
        command
            .arg("info")
            .arg(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(PROBE_TIMEOUT, command.output()).await {
            Ok(Ok(output)) if output.status.success() => output,
            Ok(Ok(output)) => {
                tracing::debug!(status = ?output.status.code(), "svn info failed");
                return None;
            }
            Ok(Err(e)) => {
                tracing::debug!(binary = self.binary, error = %e, "Unable to run svn");
                return None;
            }
            Err(_) => {
                tracing::debug!(binary = self.binary, "svn info timed out");
                return None;
            }
        };

        parse_svn_info(&String::from_utf8_lossy(&output.stdout)).map(|info| ProjectInfo {
            root: Some(root.to_path_buf()),
            ..info
        })
    }
}

fn parse_svn_info(output: &str) -> Option<ProjectInfo> {
    let field = |name: &str| {
        output
            .lines()
            .find_map(|line| line.strip_prefix(name))
            .map(|value| value.trim().trim_end_matches('/').to_string())
    };

    let root = field("Repository Root:")?;
    let project = root.rsplit('/').next().filter(|s| !s.is_empty())?.to_string();
    let branch = field("URL:")
        .and_then(|url| url.rsplit('/').next().map(str::to_string))
        .filter(|b| !b.is_empty());

    Some(ProjectInfo {
        project: Some(project),
        branch,
        root: None,
    })
}

/// Runs the detection chain for one entity.
pub struct ProjectResolver<'a> {
    settings: &'a Settings,
}

impl<'a> ProjectResolver<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    fn detectors(&self) -> Vec<Box<dyn ProjectDetector + 'a>> {
        vec![
            Box::new(ProjectFileDetector),
            Box::new(ProjectMapDetector {
                mappings: &self.settings.project_map,
            }),
            Box::new(GitDetector {
                submodules_disabled: &self.settings.git_submodules_disabled,
            }),
            Box::new(MercurialDetector),
            Box::new(SubversionDetector {
                binary: &self.settings.svn_binary,
            }),
        ]
    }

    /// `project` always wins the project name; `alternate_project` is used
    /// only when nothing was detected.
    ///
    /// With `hide_project_names`, a detected name is replaced by a pseudo-name
    /// persisted in a `.wakatime-project` at the working copy root. Explicit and
    /// alternate names are left alone.
    pub async fn resolve(
        &self,
        entity: &Entity,
        project: Option<&str>,
        alternate_project: Option<&str>,
    ) -> ProjectInfo {
        let explicit = project.map(str::trim).filter(|p| !p.is_empty());
        let alternate = alternate_project.map(str::trim).filter(|p| !p.is_empty());

        let dir = match entity.path.as_deref().and_then(Path::parent) {
            Some(dir) if entity.is_file() => dir,
            _ => {
                return ProjectInfo {
                    project: explicit.or(alternate).map(str::to_string),
                    ..ProjectInfo::default()
                }
            }
        };

        let mut detected = ProjectInfo::default();
        let mut from_marker = false;
        for detector in self.detectors() {
            let Some(info) = detector.probe(dir).await else {
                continue;
            };
            if detected.project.is_none() && info.project.is_some() {
                tracing::debug!(detector = detector.name(), project = ?info.project, "Detected project");
                from_marker = detector.name() == "project-file";
                detected.project = info.project;
                detected.branch = info.branch;
                detected.root = info.root;
            } else if detected.branch.is_none() && detector.name() != "projectmap" {
                detected.branch = info.branch;
            }
            if detected.project.is_some() && detected.branch.is_some() {
                break;
            }
        }

        if explicit.is_none() && !from_marker {
            if let Some(name) = detected.project.as_deref() {
                let hide = self
                    .settings
                    .hide_project_names
                    .iter()
                    .any(|re| re.is_match(&entity.name) || re.is_match(name));
                if hide {
                    let root = detected.root.clone().unwrap_or_else(|| dir.to_path_buf());
                    let pseudo = obfuscated_project_name(&root);
                    if let Err(e) = write_project_file(&root, &pseudo) {
                        tracing::warn!(dir = %root.display(), error = %e, "Unable to write project file");
                    }
                    detected.project = Some(pseudo);
                }
            }
        }

        ProjectInfo {
            project: explicit
                .map(str::to_string)
                .or(detected.project)
                .or_else(|| alternate.map(str::to_string)),
            branch: detected.branch,
            root: detected.root,
        }
    }
}

/// Nearest ancestor of `dir` (inclusive) holding a `.wakatime-project` file.
pub fn find_project_file(dir: &Path) -> Option<PathBuf> {
    dir.ancestors()
        .map(|d| d.join(PROJECT_FILE_NAME))
        .find(|marker| marker.is_file())
}

fn folder_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .filter(|n| !n.is_empty())
}

const ADJECTIVES: &[&str] = &[
    "aged", "ancient", "autumn", "billowing", "bitter", "black", "blue", "bold", "broad",
    "broken", "calm", "cold", "cool", "crimson", "curly", "damp", "dark", "dawn", "delicate",
    "divine", "dry", "empty", "falling", "fancy", "flat", "floral", "fragrant", "frosty",
    "gentle", "green", "hidden", "holy", "icy", "jolly", "late", "lingering", "little",
    "lively", "long", "lucky", "misty", "morning", "muddy", "mute", "nameless", "noisy",
    "odd", "old", "orange", "patient", "plain", "polished", "proud", "purple", "quiet",
    "rapid", "raspy", "red", "restless", "rough", "round", "royal", "shiny", "shrill",
    "shy", "silent", "small", "snowy", "soft", "solitary", "sparkling", "spring", "square",
    "steep", "still", "summer", "super", "sweet", "throbbing", "tight", "tiny", "twilight",
    "wandering", "weathered", "white", "wild", "winter", "wispy", "withered", "yellow",
    "young",
];

const NOUNS: &[&str] = &[
    "art", "band", "bar", "base", "bird", "block", "boat", "bonus", "bread", "breeze",
    "brook", "bush", "butterfly", "cake", "cell", "cherry", "cloud", "credit", "darkness",
    "dawn", "dew", "disk", "dream", "dust", "feather", "field", "fire", "firefly", "flower",
    "fog", "forest", "frog", "frost", "glade", "glitter", "grass", "hall", "hat", "haze",
    "heart", "hill", "king", "lab", "lake", "leaf", "limit", "math", "meadow", "mode",
    "moon", "morning", "mountain", "mouse", "mud", "night", "paper", "pine", "poetry",
    "pond", "queen", "rain", "recipe", "resonance", "rice", "river", "salad", "scene",
    "sea", "shadow", "shape", "silence", "sky", "smoke", "snow", "snowflake", "sound",
    "star", "sun", "sunset", "surf", "term", "thunder", "tooth", "tree", "truth", "union",
    "unit", "violet", "voice", "water", "waterfall", "wave", "wildflower", "wind", "wood",
];

/// Stable pseudo-name for the project containing `dir`, like `misty-river-42`.
pub fn obfuscated_project_name(dir: &Path) -> String {
    let mut rng = StdRng::seed_from_u64(fnv1a(normalize_path(dir).as_bytes()));
    let adjective = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.gen_range(0..NOUNS.len())];
    let number: u32 = rng.gen_range(10..100);
    format!("{}-{}-{}", adjective, noun, number)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(0x0100_0000_01b3)
    })
}

/// Writes the marker through a temp file and rename so readers never see a partial file.
fn write_project_file(dir: &Path, project: &str) -> std::io::Result<()> {
    let target = dir.join(PROJECT_FILE_NAME);
    let temp = dir.join(format!("{}.{}.tmp", PROJECT_FILE_NAME, uuid::Uuid::new_v4()));
    std::fs::write(&temp, format!("{}\n", project))?;
    std::fs::rename(&temp, &target).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        e
    })
}
