mod file_config;

pub use file_config::{FileConfig, MailConfig};

use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ALIGNER_PATH: &str = "minimap2";
pub const DEFAULT_WRAPPER_PATH: &str = "run_minimap2.sh";
pub const DEFAULT_THREADS: u32 = 4;
pub const DEFAULT_WEB_URL: &str = "http://localhost:5000";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub data_dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub aligner_path: Option<String>,
    pub wrapper_path: Option<String>,
    pub threads: Option<u32>,
    pub web_url: Option<String>,
}

/// Execution backend selected by `batch_system_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BatchSystem {
    Local,
}

impl BatchSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchSystem::Local => "local",
        }
    }
}

/// How completion notifications leave the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MailMode {
    /// Hand the message to an in-process mailer.
    Direct,
    /// Ask the web application to send it through a keyed callback.
    Callback,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub aligner_path: String,
    pub wrapper_path: String,
    pub threads: u32,
    pub web_url: String,
    pub batch_system: BatchSystem,

    // Timing
    pub start_delay: Duration,
    pub download_timeout: Duration,
    /// `None` waits for the aligner without a bound.
    pub aligner_timeout: Option<Duration>,

    pub mail: MailSettings,
}

#[derive(Debug, Clone)]
pub struct MailSettings {
    pub enabled: bool,
    pub mode: MailMode,
    pub status_sender: Option<String>,
    pub reply_to: Option<String>,
    pub org: Option<String>,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: MailMode::Callback,
            status_sender: None,
            reply_to: None,
            org: None,
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .or_else(|| cli.data_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("data_dir must be specified via --data-dir or in config file")
            })?;

        if !data_dir.exists() {
            bail!("Data directory does not exist: {:?}", data_dir);
        }
        if !data_dir.is_dir() {
            bail!("data_dir is not a directory: {:?}", data_dir);
        }

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .unwrap_or_else(|| data_dir.join("jobs.db"));

        let aligner_path = file
            .aligner_path
            .or_else(|| cli.aligner_path.clone())
            .unwrap_or_else(|| DEFAULT_ALIGNER_PATH.to_string());
        let wrapper_path = file
            .wrapper_path
            .or_else(|| cli.wrapper_path.clone())
            .unwrap_or_else(|| DEFAULT_WRAPPER_PATH.to_string());

        let threads = file.threads.or(cli.threads).unwrap_or(DEFAULT_THREADS);
        if threads == 0 {
            bail!("threads must be at least 1");
        }

        let web_url = file
            .web_url
            .or_else(|| cli.web_url.clone())
            .unwrap_or_else(|| DEFAULT_WEB_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let batch_system = match file.batch_system_type {
            Some(value) => parse_batch_system(&value)
                .ok_or_else(|| anyhow::anyhow!("Unsupported batch_system_type: {}", value))?,
            None => BatchSystem::Local,
        };

        let start_delay = Duration::from_millis(file.start_delay_ms.unwrap_or(1000));
        let download_timeout = Duration::from_secs(file.download_timeout_secs.unwrap_or(3600));
        let aligner_timeout = match file.aligner_timeout_secs.unwrap_or(172_800) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        // Mail settings - merge file config with defaults
        let mail_file = file.mail.unwrap_or_default();
        let mail = MailSettings {
            enabled: mail_file.enabled.unwrap_or(false),
            mode: match mail_file.mode {
                Some(value) => parse_mail_mode(&value)
                    .ok_or_else(|| anyhow::anyhow!("Unsupported mail mode: {}", value))?,
                None => MailMode::Callback,
            },
            status_sender: mail_file.status_sender,
            reply_to: mail_file.reply_to,
            org: mail_file.org,
        };

        Ok(Self {
            data_dir,
            db_path,
            aligner_path,
            wrapper_path,
            threads,
            web_url,
            batch_system,
            start_delay,
            download_timeout,
            aligner_timeout,
            mail,
        })
    }
}

/// Uses clap's ValueEnum trait for parsing.
fn parse_batch_system(s: &str) -> Option<BatchSystem> {
    BatchSystem::from_str(s, true).ok()
}

fn parse_mail_mode(s: &str) -> Option<MailMode> {
    MailMode::from_str(s, true).ok()
}
