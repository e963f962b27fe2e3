use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub data_dir: Option<String>,
    pub db_path: Option<String>,
    pub aligner_path: Option<String>,
    pub wrapper_path: Option<String>,
    pub threads: Option<u32>,
    pub web_url: Option<String>,
    pub batch_system_type: Option<String>,

    // Timing
    pub start_delay_ms: Option<u64>,
    pub download_timeout_secs: Option<u64>,
    pub aligner_timeout_secs: Option<u64>,

    // Feature configs
    pub mail: Option<MailConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct MailConfig {
    pub enabled: Option<bool>,
    /// Delivery mode: "direct" or "callback"
    pub mode: Option<String>,
    pub status_sender: Option<String>,
    pub reply_to: Option<String>,
    pub org: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_file() {
        let config: FileConfig = toml::from_str(
            r#"
            data_dir = "/srv/dgenies"
            aligner_path = "/opt/minimap2"
            threads = 8
            web_url = "https://dgenies.example.org/"

            [mail]
            enabled = true
            mode = "direct"
            status_sender = "noreply@example.org"
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir.as_deref(), Some("/srv/dgenies"));
        assert_eq!(config.threads, Some(8));
        assert!(config.db_path.is_none());
        let mail = config.mail.unwrap();
        assert_eq!(mail.enabled, Some(true));
        assert_eq!(mail.mode.as_deref(), Some("direct"));
        assert!(mail.reply_to.is_none());
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert!(config.data_dir.is_none());
        assert!(config.mail.is_none());
    }
}
