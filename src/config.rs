use anyhow::{Context, Result};

use crate::core::alerts::MailConfig;
use crate::core::github::GitHubConfig;
use crate::core::workspace::WorkspaceConfig;
use crate::interfaces::scheduler::CronConfig;

/// Everything the process needs, resolved once at startup from the
/// environment. Missing required variables fail fast with their name.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub webhook_secret: String,
    pub workspace: WorkspaceConfig,
    pub github: GitHubConfig,
    pub mail: MailConfig,
    pub server_url: String,
    pub cron: CronConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let port: u16 = optional("PORT", "3000")
            .parse()
            .context("PORT must be a number")?;
        let server_url = optional("SERVER_URL", &format!("http://127.0.0.1:{port}"));

        Ok(Self {
            port,
            webhook_secret: required("WEBHOOK_SECRET")?,
            workspace: WorkspaceConfig {
                api_url: optional("WORKSPACE_API_URL", "https://api.notion.com/v1"),
                token: required("WORKSPACE_TOKEN")?,
                database_id: required("WORKSPACE_DATABASE_ID")?,
            },
            github: GitHubConfig {
                api_url: optional("GITHUB_API_URL", "https://api.github.com"),
                token: required("GITHUB_TOKEN")?,
                owner: required("GITHUB_OWNER")?,
                repo: required("GITHUB_REPO")?,
            },
            mail: MailConfig {
                relay_url: optional("MAIL_RELAY_URL", ""),
                relay_token: optional("MAIL_RELAY_TOKEN", ""),
                from: optional("MAIL_FROM", "ledgersync@localhost"),
                alert_recipient: optional("ALERT_EMAIL", ""),
            },
            server_url,
            cron: CronConfig {
                daily: optional("DAILY_CRON", "0 0 9 * * *"),
                monthly: optional("MONTHLY_CRON", "0 0 0 1 * *"),
                health: optional("HEALTH_CRON", "0 */5 * * * *"),
            },
        })
    }
}

fn required(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("missing required environment variable {name}"))
}

fn optional(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}
