use clap::Parser;

/// Command line heartbeat agent for text editor plugins
#[derive(Parser, Debug, Clone)]
#[command(name = "wakatime-cli", version, about, long_about = None)]
pub struct Cli {
    /// Absolute path to file for the heartbeat. Can also be a url, domain or app when --entity-type is not file. (alias: --file)
    #[arg(long, alias = "file", required_unless_present_any = ["today", "today_goal"])]
    pub entity: Option<String>,

    /// Entity type for this heartbeat. Can be "file", "domain", "url", or "app". Defaults to "file".
    #[arg(long, default_value = "file", value_parser = ["file", "domain", "app", "url"])]
    pub entity_type: String,

    /// Your api key; uses api_key from ~/.wakatime.cfg by default.
    #[arg(long)]
    pub key: Option<String>,

    /// When set, tells api this heartbeat was triggered from writing to a file.
    #[arg(long, value_parser = clap::value_parser!(bool), value_name = "true|false", num_args = 0..=1, default_missing_value = "true")]
    pub write: Option<bool>,

    /// Optional text editor plugin name and version for User-Agent header.
    #[arg(long)]
    pub plugin: Option<String>,

    /// Optional floating-point unix epoch timestamp. Uses current time by default.
    #[arg(long)]
    pub time: Option<f64>,

    /// Optional line number. This is the current line being edited.
    #[arg(long)]
    pub lineno: Option<u64>,

    /// Optional cursor position in the current file.
    #[arg(long)]
    pub cursorpos: Option<u64>,

    /// Category of this heartbeat activity. Can be "coding", "building", "indexing", "debugging", "running tests", "writing tests", "manual testing", "code reviewing", "browsing", or "designing".
    #[arg(long)]
    pub category: Option<String>,

    /// Optional language name. If valid, takes priority over auto-detected language.
    #[arg(long)]
    pub language: Option<String>,

    /// Optional language name used only when no language can be detected.
    #[arg(long)]
    pub alternate_language: Option<String>,

    /// Override auto-detected project. Use --alternate-project to supply a fallback project if one can't be auto-detected.
    #[arg(long)]
    pub project: Option<String>,

    /// Optional alternate project name. Auto-detected project takes priority.
    #[arg(long)]
    pub alternate_project: Option<String>,

    /// Optional name of local machine. Defaults to local machine name read from system.
    #[arg(long)]
    pub hostname: Option<String>,

    /// Optional proxy configuration. Supports HTTPS, SOCKS and NTLM proxies.
    #[arg(long)]
    pub proxy: Option<String>,

    /// Disables SSL certificate verification for HTTPS requests. By default, SSL certificates are verified.
    #[arg(long, alias = "nosslverify")]
    pub no_ssl_verify: bool,

    /// Override the bundled CA certs file. By default, uses system ca certs.
    #[arg(long)]
    pub ssl_certs_file: Option<String>,

    /// Disables offline time logging instead of queuing logged time.
    #[arg(long, alias = "disableoffline")]
    pub disable_offline: bool,

    /// Obfuscate filenames. Will not send file names to api.
    #[arg(long, alias = "hidefilenames")]
    pub hide_file_names: bool,

    /// Obfuscate project names. A .wakatime-project file is created with a random project name.
    #[arg(long)]
    pub hide_project_names: bool,

    /// Obfuscate branch names. Will not send revision control branch names to api.
    #[arg(long)]
    pub hide_branch_names: bool,

    /// Filename patterns to exclude from logging. POSIX regex syntax. Can be used more than once.
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Filename patterns to log. When used in combination with --exclude, files matching include will still be logged. Can be used more than once.
    #[arg(long)]
    pub include: Vec<String>,

    /// Disables tracking folders unless they contain a .wakatime-project file.
    #[arg(long)]
    pub include_only_with_project_file: bool,

    /// When set, any activity where the project cannot be detected will be ignored.
    #[arg(long)]
    pub exclude_unknown_project: bool,

    /// Reads extra heartbeats from STDIN as a single line JSON array.
    #[arg(long)]
    pub extra_heartbeats: bool,

    /// Optional log file. Defaults to '~/.wakatime.log'.
    #[arg(long, alias = "log-file")]
    pub logfile: Option<String>,

    /// API base url used when sending heartbeats. Defaults to https://api.wakatime.com/api/v1.
    #[arg(long, alias = "api-url")]
    pub apiurl: Option<String>,

    /// Number of seconds to wait when sending heartbeats to api. Defaults to 60 seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Amount of offline activity to sync from the local queue to the api before exiting. Set to 0 to disable.
    #[arg(long)]
    pub sync_offline_activity: Option<usize>,

    /// Optional config file. Defaults to '~/.wakatime.cfg'.
    #[arg(long)]
    pub config: Option<String>,

    /// Turns on debug messages in log file.
    #[arg(long)]
    pub verbose: bool,

    /// Prints dashboard time for today, then exits.
    #[arg(long)]
    pub today: bool,

    /// Prints time for the given goal id today, then exits.
    #[arg(long)]
    pub today_goal: Option<String>,

    /// With --today, prints only the total without the category breakdown.
    #[arg(long)]
    pub today_hide_categories: bool,
}
