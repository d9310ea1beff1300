use dotenvy::dotenv;
use serde::Deserialize;
use std::env;

#[derive(Clone, Deserialize)]
pub struct Config {
    pub discord_token: String,
    pub database_url: String,
    /// Custom emoji used for the acknowledge reaction; unicode fallback when unset.
    pub trigger_emoji_id: Option<u64>,
    pub react_timeout_ms: u64,
    pub guild_fetch_timeout_ms: u64,
    /// Pause between softban and unban so the platform-side purge can finish.
    pub softban_settle_secs: u64,
    /// Throttle between guilds during the daily experiment sweep.
    pub experiment_gap_secs: u64,
    pub status_message: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        Ok(Config {
            discord_token: env::var("DISCORD_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN must be set"))?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "data/honeytrap.db".to_string()),
            trigger_emoji_id: env::var("TRIGGER_EMOJI_ID").ok().and_then(|id| id.parse().ok()),
            react_timeout_ms: env::var("REACT_TIMEOUT_MS")
                .unwrap_or_else(|_| "1500".to_string())
                .parse()
                .unwrap_or(1500),
            guild_fetch_timeout_ms: env::var("GUILD_FETCH_TIMEOUT_MS")
                .unwrap_or_else(|_| "1500".to_string())
                .parse()
                .unwrap_or(1500),
            softban_settle_secs: env::var("SOFTBAN_SETTLE_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            experiment_gap_secs: env::var("EXPERIMENT_GAP_SECS")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .unwrap_or(2),
            status_message: env::var("STATUS_MESSAGE")
                .unwrap_or_else(|_| "Watching the honeypot".to_string()),
        })
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("database_url", &self.database_url)
            .field("trigger_emoji_id", &self.trigger_emoji_id)
            .field("react_timeout_ms", &self.react_timeout_ms)
            .field("guild_fetch_timeout_ms", &self.guild_fetch_timeout_ms)
            .field("softban_settle_secs", &self.softban_settle_secs)
            .field("experiment_gap_secs", &self.experiment_gap_secs)
            .field("status_message", &self.status_message)
            .finish()
    }
}
