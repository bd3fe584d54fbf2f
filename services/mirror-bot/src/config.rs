use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use mirror_core::{Policy, RetryPolicy, Settings};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub telegram_token: String,

    pub aria_rpc_url: String,
    pub aria_secret: Option<String>,
    pub download_location: PathBuf,
    pub filtered_domains: Vec<String>,
    pub filtered_filenames: Option<Vec<String>>,

    pub sudo_users: Vec<i64>,
    pub authorized_chats: Vec<i64>,
    pub commands_bot_name: Option<String>,

    pub gdrive_parent_dir_id: String,
    pub gdrive_client_id: String,
    pub gdrive_client_secret: String,
    pub gdrive_refresh_token: String,

    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,

    pub status_interval: Duration,
    pub event_retry: RetryPolicy,
    pub bind_addr: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let telegram_token = get("TELEGRAM_TOKEN")?;

        let aria_rpc_url =
            std::env::var("ARIA_RPC_URL").unwrap_or_else(|_| "http://localhost:8210/jsonrpc".to_string());
        let aria_secret = optional("ARIA_SECRET");
        let download_location = PathBuf::from(get("ARIA_DOWNLOAD_LOCATION")?);
        let filtered_domains = optional("ARIA_FILTERED_DOMAINS").map(|v| parse_list(&v)).unwrap_or_default();
        let filtered_filenames = optional("ARIA_FILTERED_FILENAMES").map(|v| parse_list(&v));

        let sudo_users = optional("SUDO_USERS")
            .map(|v| parse_ids(&v).context("SUDO_USERS must be a comma separated list of user ids"))
            .transpose()?
            .unwrap_or_default();
        let authorized_chats = optional("AUTHORIZED_CHATS")
            .map(|v| parse_ids(&v).context("AUTHORIZED_CHATS must be a comma separated list of chat ids"))
            .transpose()?
            .unwrap_or_default();
        let commands_bot_name =
            optional("COMMANDS_BOT_NAME").map(|n| n.trim_start_matches('@').to_string());

        let gdrive_parent_dir_id = get("GDRIVE_PARENT_DIR_ID")?;
        let gdrive_client_id = get("GDRIVE_CLIENT_ID")?;
        let gdrive_client_secret = get("GDRIVE_CLIENT_SECRET")?;
        let gdrive_refresh_token = get("GDRIVE_REFRESH_TOKEN")?;

        let webhook_url = optional("NOTIFY_WEBHOOK_URL");
        let webhook_secret = optional("NOTIFY_WEBHOOK_SECRET");

        let status_interval = Duration::from_millis(number("STATUS_INTERVAL_MS", 4000)?);
        let event_retry = RetryPolicy {
            attempts: number("EVENT_RETRY_ATTEMPTS", 8)? as u32,
            delay: Duration::from_millis(number("EVENT_RETRY_DELAY_MS", 500)?),
        };
        let bind_addr = std::env::var("DEBUG_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8089".to_string());

        // Tiny sanity checks (fail fast, fail loud)
        if !aria_rpc_url.starts_with("http://") && !aria_rpc_url.starts_with("https://") {
            bail!("ARIA_RPC_URL must start with http:// or https://");
        }
        if let Some(url) = &webhook_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                bail!("NOTIFY_WEBHOOK_URL must start with http:// or https://");
            }
        }
        if status_interval.is_zero() {
            bail!("STATUS_INTERVAL_MS must be greater than 0");
        }

        Ok(Self {
            telegram_token,
            aria_rpc_url,
            aria_secret,
            download_location,
            filtered_domains,
            filtered_filenames,
            sudo_users,
            authorized_chats,
            commands_bot_name,
            gdrive_parent_dir_id,
            gdrive_client_id,
            gdrive_client_secret,
            gdrive_refresh_token,
            webhook_url,
            webhook_secret,
            status_interval,
            event_retry,
            bind_addr,
        })
    }

    /// Coordinator knobs derived from this config.
    pub fn settings(&self) -> Settings {
        let mut settings = Settings::new(self.download_location.clone(), self.gdrive_parent_dir_id.clone());
        settings.policy = Policy {
            filtered_domains: self.filtered_domains.clone(),
            filtered_filenames: self.filtered_filenames.clone(),
        };
        settings.event_retry = self.event_retry;
        settings.status_interval = self.status_interval;
        settings
    }
}

fn get(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Missing required env var: {key}"))
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn number(key: &str, default: u64) -> Result<u64> {
    match optional(key) {
        Some(v) => v.trim().parse().with_context(|| format!("{key} must be a number, got {v:?}")),
        None => Ok(default),
    }
}

pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_ids(raw: &str) -> Result<Vec<i64>> {
    parse_list(raw)
        .iter()
        .map(|s| s.parse::<i64>().with_context(|| format!("invalid id: {s}")))
        .collect()
}
