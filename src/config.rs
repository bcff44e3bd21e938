use std::{env, path::PathBuf};

/// Runtime settings, read from the environment once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_path: PathBuf,
    pub webhook_url: Option<String>,
    pub digest_enabled: bool,
    pub digest_hour: u32,
    pub report_timezone: String,
    pub default_user_id: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            data_path: PathBuf::from("data/state.json"),
            webhook_url: None,
            digest_enabled: true,
            digest_hour: 9,
            report_timezone: "Asia/Seoul".to_string(),
            default_user_id: "anonymous".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|value| value.parse::<u16>().ok())
                .unwrap_or(defaults.port),
            data_path: env::var("APP_DATA_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_path),
            webhook_url: env::var("DIGEST_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            digest_enabled: env::var("DIGEST_ENABLED")
                .map(|value| !matches!(value.trim(), "0" | "false" | "off"))
                .unwrap_or(defaults.digest_enabled),
            digest_hour: env::var("DIGEST_HOUR")
                .ok()
                .and_then(|value| value.parse::<u32>().ok())
                .filter(|hour| *hour < 24)
                .unwrap_or(defaults.digest_hour),
            report_timezone: env::var("REPORT_TIMEZONE").unwrap_or(defaults.report_timezone),
            default_user_id: env::var("DEFAULT_USER_ID")
                .ok()
                .filter(|id| !id.trim().is_empty())
                .unwrap_or(defaults.default_user_id),
        }
    }
}
