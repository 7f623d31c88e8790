//! Exit codes and fixed limits shared across the pipeline.
//!
//! The numeric exit codes are part of the command line contract that editor
//! plugins rely on, so they never change between releases.

pub const SUCCESS: i32 = 0;
pub const UNKNOWN_ERROR: i32 = 1;
pub const ARG_ERROR: i32 = 2;
pub const API_ERROR: i32 = 102;
pub const CONFIG_FILE_PARSE_ERROR: i32 = 103;
pub const AUTH_ERROR: i32 = 104;
pub const MALFORMED_HEARTBEAT_ERROR: i32 = 105;

/// Heartbeats sent per bulk request.
pub const HEARTBEATS_PER_REQUEST: usize = 25;

/// Files larger than this are not line-counted.
pub const MAX_FILE_SIZE_SUPPORTED: u64 = 2 * 1024 * 1024;

/// Bytes of file content handed to language and dependency detection.
pub const MAX_CONTENT_BYTES: usize = 512_000;

pub const DEFAULT_API_URL: &str = "https://api.wakatime.com/api/v1";
pub const HEARTBEATS_BULK_PATH: &str = "/users/current/heartbeats.bulk";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SYNC_OFFLINE_ACTIVITY: usize = 100;

pub const CONFIG_FILE_NAME: &str = ".wakatime.cfg";
pub const QUEUE_FILE_NAME: &str = ".wakatime.bdb";
pub const SESSION_FILE_NAME: &str = ".wakatime_session";
pub const LOG_FILE_NAME: &str = ".wakatime.log";
pub const PROJECT_FILE_NAME: &str = ".wakatime-project";

/// Returns the symbolic name for an exit code, used in log lines.
pub fn exit_code_name(code: i32) -> &'static str {
    match code {
        SUCCESS => "SUCCESS",
        ARG_ERROR => "ARG_ERROR",
        API_ERROR => "API_ERROR",
        CONFIG_FILE_PARSE_ERROR => "CONFIG_FILE_PARSE_ERROR",
        AUTH_ERROR => "AUTH_ERROR",
        MALFORMED_HEARTBEAT_ERROR => "MALFORMED_HEARTBEAT_ERROR",
        _ => "UNKNOWN_ERROR",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_names() {
        assert_eq!(exit_code_name(0), "SUCCESS");
        assert_eq!(exit_code_name(104), "AUTH_ERROR");
        assert_eq!(exit_code_name(42), "UNKNOWN_ERROR");
    }
}
