//! CLI 参数、环境变量与运行期共享配置。

use clap::Parser;
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const ARCHIVE_PREFIX: &str = "dir_";
pub const ARCHIVE_SUFFIX: &str = ".zip";
pub const SCRATCH_PREFIX: &str = "hprbwzr";
pub const SCRATCH_SUFFIX: &str = "temp";
pub const SCRATCH_MODE: u32 = 0o700;
pub const ARCHIVE_LOCK_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_FILE_MODE: u32 = 0o644;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "justfiles", version = VERSION_INFO, about = "Directory sharing server")]
pub struct Args {
    #[arg(
        short = 'r',
        long,
        env = "SHARED",
        default_value = "/tmp",
        help = "Directory to share"
    )]
    pub root_dir: String,
    #[arg(
        short = 's',
        long,
        env = "STATIC",
        default_value = "dist",
        help = "Static frontend assets directory"
    )]
    pub static_dir: String,
    #[arg(
        short = 'b',
        long,
        env = "JUSTFILES_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "JUSTFILES_PORT",
        default_value_t = 8000,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "JUSTFILES_KEEP_ARCHIVES",
        default_value_t = true,
        action = clap::ArgAction::Set,
        help = "Keep generated archives until shutdown instead of deleting them after download"
    )]
    pub keep_archives: bool,
    #[arg(
        long,
        env = "JUSTFILES_FILE_MODE",
        default_value = "644",
        value_parser = parse_file_mode,
        help = "Octal permission mode applied to uploaded files"
    )]
    pub file_mode: u32,
    #[arg(
        long,
        env = "JUSTFILES_SHOW_HIDDEN",
        default_value_t = false,
        action = clap::ArgAction::Set,
        help = "List entries whose name starts with a dot"
    )]
    pub show_hidden: bool,
    #[arg(
        long,
        env = "JUSTFILES_CORS_ORIGINS",
        help = "Comma separated CORS origins"
    )]
    pub cors_origins: Option<String>,
}

impl Args {
    /// 提取运行期只读配置。
    pub fn share_config(&self) -> ShareConfig {
        ShareConfig {
            keep_archives: self.keep_archives,
            file_mode: self.file_mode,
            show_hidden: self.show_hidden,
        }
    }
}

/// Settings fixed at startup and shared read-only with every handler.
#[derive(Clone, Copy, Debug)]
pub struct ShareConfig {
    pub keep_archives: bool,
    pub file_mode: u32,
    pub show_hidden: bool,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            keep_archives: true,
            file_mode: DEFAULT_FILE_MODE,
            show_hidden: false,
        }
    }
}

/// 解析八进制权限，例如 `644` 或 `0o600`。
fn parse_file_mode(value: &str) -> Result<u32, String> {
    let digits = value.trim().trim_start_matches("0o");
    let mode = u32::from_str_radix(digits, 8).map_err(|err| format!("invalid octal mode: {err}"))?;
    if mode > 0o7777 {
        return Err(format!("mode {value} out of range"));
    }
    Ok(mode)
}
