use anyhow::Result;
use clap::Parser;
use std::process;
use std::sync::mpsc::Receiver;

use wakatime_cli::api::ApiClient;
use wakatime_cli::cli::Cli;
use wakatime_cli::config::{self, ConfigFile, ConfigError, Settings};
use wakatime_cli::constants::{exit_code_name, MALFORMED_HEARTBEAT_ERROR, UNKNOWN_ERROR};
use wakatime_cli::heartbeat::{
    receive_extra_heartbeats, spawn_stdin_reader, HeartbeatInput, STDIN_TIMEOUT,
};
use wakatime_cli::logger;
use wakatime_cli::manager::HeartbeatManager;

#[tokio::main]
async fn main() {
    // Invalid arguments exit with code 2 from clap
    let cli = Cli::parse();

    // Drain stdin early so the editor never blocks writing to us
    let stdin = cli.extra_heartbeats.then(spawn_stdin_reader);

    let config = match ConfigFile::load(&config::config_path(&cli)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(e.exit_code());
        }
    };

    let verbose = config::is_verbose(&cli, &config);
    let guard = match logger::setup_logging(&config::log_file_path(&cli, &config), verbose) {
        Ok(guard) => guard,
        Err(e) => {
            let guard = logger::setup_stderr_logging(verbose);
            tracing::warn!(error = %e, "Unable to open log file, logging to stderr");
            guard
        }
    };
    install_panic_hook(verbose);

    let code = match run(&cli, &config, stdin).await {
        Ok(code) => code,
        Err(e) => {
            if verbose {
                tracing::debug!(error = ?e, "Unhandled error");
            } else {
                tracing::error!(error = %e, "Unhandled error");
            }
            UNKNOWN_ERROR
        }
    };

    tracing::debug!(exit_code = code, status = exit_code_name(code), "Finished");
    drop(guard);
    process::exit(code);
}

async fn run(cli: &Cli, config: &ConfigFile, stdin: Option<Receiver<String>>) -> Result<i32> {
    let settings = match Settings::resolve(cli, config) {
        Ok(settings) => settings,
        Err(e) => return Ok(report_config_error(&e)),
    };

    if cli.today || cli.today_goal.is_some() {
        let (text, code) = ApiClient::new(&settings)
            .today(cli.today_goal.as_deref(), cli.today_hide_categories)
            .await;
        if let Some(text) = text {
            println!("{}", text);
        }
        return Ok(code);
    }

    let extras = match stdin {
        Some(rx) => match receive_extra_heartbeats(&rx, STDIN_TIMEOUT) {
            Ok(extras) => extras,
            Err(e) => {
                tracing::error!("{}", e);
                return Ok(MALFORMED_HEARTBEAT_ERROR);
            }
        },
        None => Vec::new(),
    };

    let primary = HeartbeatInput::from_cli(cli);

    // A panic in the pipeline surfaces here as a join error
    let pipeline = tokio::spawn(async move {
        let manager = HeartbeatManager::new(&settings);
        manager.process(primary, extras).await
    });
    Ok(pipeline.await?)
}

fn report_config_error(error: &ConfigError) -> i32 {
    match error {
        ConfigError::InvalidProxy(proxy) => {
            eprintln!("{}", error);
            tracing::error!(proxy = %proxy, "{}", error);
        }
        _ => tracing::error!("{}", error),
    }
    error.exit_code()
}

fn install_panic_hook(verbose: bool) {
    std::panic::set_hook(Box::new(move |info| {
        let backtrace = std::backtrace::Backtrace::force_capture();
        if verbose {
            tracing::debug!(panic = %info, backtrace = %backtrace, "Unhandled panic");
        } else {
            tracing::error!(panic = %info, backtrace = %backtrace, "Unhandled panic");
        }
    }));
}
