//! User agent strings sent with every request and stamped on heartbeats.
//!
//! Format: `wakatime/{version} ({os}-{core}-{platform}) {runtime} {plugin}`

use std::env;
use sysinfo::System;

/// Placeholder plugin token when the caller did not identify itself.
pub const UNKNOWN_PLUGIN: &str = "Unknown/0";

/// Builds the user agent for `plugin`, falling back to `Unknown/0`.
pub fn user_agent(plugin: Option<&str>) -> String {
    let version = env!("CARGO_PKG_VERSION");
    let os_info = get_os_info();

    let plugin_part = plugin
        .map(sanitize_plugin_string)
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| UNKNOWN_PLUGIN.to_string());

    format!(
        "wakatime/{} ({}-{}-{}) {} {}",
        version,
        os_info.os,
        os_info.core,
        os_info.platform,
        get_runtime_info(),
        plugin_part
    )
}

/// Strips one pair of surrounding double quotes.
fn sanitize_plugin_string(plugin: &str) -> String {
    if plugin.starts_with('"') && plugin.ends_with('"') && plugin.len() >= 2 {
        plugin[1..plugin.len() - 1].to_string()
    } else {
        plugin.to_string()
    }
}

struct OsInfo {
    os: String,
    core: String,
    platform: String,
}

fn get_os_info() -> OsInfo {
    let os_name = System::name().unwrap_or_else(|| env::consts::OS.to_string());
    let kernel_version = System::kernel_version().unwrap_or_else(|| "unknown".to_string());

    let platform = match env::consts::ARCH {
        "aarch64" => "arm64".to_string(),
        arch => arch.to_string(),
    };

    OsInfo {
        os: os_name.to_lowercase().replace(' ', "_"),
        core: kernel_version.to_lowercase(),
        platform,
    }
}

fn get_runtime_info() -> String {
    let rustc_version = option_env!("RUSTC_VERSION").unwrap_or("1.75.0");
    format!("rustc/{}", rustc_version)
}
