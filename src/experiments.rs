use crate::db::{Database, GuildConfig};
use crate::messages;
use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;
use rand::seq::SliceRandom;
use serenity::{ChannelId, EditChannel, Http};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};

/// Names the rename experiments cycle through. Deliberately bait-flavored.
pub const CHANNEL_NAMES: &[&str] = &[
    "honeypot",
    "free-nitro",
    "nitro-giveaway",
    "click-here",
    "verify-here",
    "general-2",
];

/// The fixed daily boundary the sweep fires at: next 00:00 UTC.
pub fn next_daily_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive().succ_opt().unwrap_or(now.date_naive());
    tomorrow
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc()
}

/// The next name in the rotation; unrecognized current names restart the cycle.
pub fn next_rotation_name(current: &str) -> &'static str {
    match CHANNEL_NAMES.iter().position(|n| *n == current) {
        Some(i) => CHANNEL_NAMES[(i + 1) % CHANNEL_NAMES.len()],
        None => CHANNEL_NAMES[0],
    }
}

/// Drives the opt-in periodic experiments across all guilds, once per day.
/// Guilds run strictly sequentially with a fixed gap: a self-throttle
/// against the platform's call-rate limits, not a correctness requirement.
pub struct ExperimentSweep {
    db: Database,
    http: Arc<Http>,
    gap: Duration,
}

impl ExperimentSweep {
    pub fn new(db: Database, http: Arc<Http>, gap_secs: u64) -> Self {
        Self {
            db,
            http,
            gap: Duration::from_secs(gap_secs),
        }
    }

    pub async fn run(self) {
        loop {
            let now = Utc::now();
            let next = next_daily_boundary(now);
            let wait = (next - now).to_std().unwrap_or_default();
            info!("Next experiment sweep at {} (in {:?})", next, wait);
            sleep(wait).await;
            self.sweep().await;
        }
    }

    async fn sweep(&self) {
        let configs = match self.db.list_configs() {
            Ok(configs) => configs,
            Err(e) => {
                error!("Experiment sweep could not list configs: {}", e);
                return;
            }
        };

        for config in configs
            .into_iter()
            .filter(|c| c.experiments.any_periodic())
        {
            if let Err(e) = run_guild(&self.http, &config).await {
                error!("Experiment run failed for guild {}: {}", config.guild_id, e);
            }
            sleep(self.gap).await;
        }
    }
}

/// One guild's worth of periodic experiments. Also fired once immediately
/// when an admin enables a flag, so they see it working.
pub async fn run_guild(http: &Http, config: &GuildConfig) -> anyhow::Result<()> {
    let Some(channel_id) = config
        .honeypot_channel_id
        .as_deref()
        .and_then(|id| id.parse::<u64>().ok())
    else {
        return Ok(());
    };
    let channel_id = ChannelId::new(channel_id);

    if config.experiments.keep_alive {
        keep_alive(http, channel_id).await?;
    }
    if config.experiments.rotate_name || config.experiments.chaos_rename {
        rename(http, channel_id, config.experiments.chaos_rename).await?;
    }
    Ok(())
}

/// Posts and immediately removes a short message so the channel stays warm.
async fn keep_alive(http: &Http, channel_id: ChannelId) -> anyhow::Result<()> {
    let msg = channel_id
        .send_message(http, messages::notice_create("🍯"))
        .await?;
    channel_id.delete_message(http, msg.id).await?;
    debug!("Keep-alive posted in {}", channel_id);
    Ok(())
}

async fn rename(http: &Http, channel_id: ChannelId, chaos: bool) -> anyhow::Result<()> {
    let channel = channel_id
        .to_channel(http)
        .await?
        .guild()
        .ok_or_else(|| anyhow::anyhow!("channel {} is not a guild channel", channel_id))?;

    let new_name = if chaos {
        CHANNEL_NAMES
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(CHANNEL_NAMES[0])
    } else {
        next_rotation_name(&channel.name)
    };
    if new_name == channel.name {
        return Ok(());
    }

    channel_id
        .edit(http, EditChannel::new().name(new_name))
        .await?;
    info!("Renamed honeypot channel {} to {}", channel_id, new_name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_next_daily_boundary() {
        let now = Utc.with_ymd_and_hms(2026, 8, 7, 15, 30, 45).unwrap();
        let next = next_daily_boundary(now);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 8, 0, 0, 0).unwrap());

        // Just before midnight still lands on the next boundary.
        let now = Utc.with_ymd_and_hms(2026, 8, 7, 23, 59, 59).unwrap();
        assert_eq!(
            next_daily_boundary(now),
            Utc.with_ymd_and_hms(2026, 8, 8, 0, 0, 0).unwrap()
        );

        // Month rollover.
        let now = Utc.with_ymd_and_hms(2026, 8, 31, 12, 0, 0).unwrap();
        assert_eq!(
            next_daily_boundary(now),
            Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_rotation_cycles_through_names() {
        let mut name = CHANNEL_NAMES[0];
        for _ in 0..CHANNEL_NAMES.len() {
            name = next_rotation_name(name);
        }
        // Full cycle returns to the start.
        assert_eq!(name, CHANNEL_NAMES[0]);
    }

    #[test]
    fn test_rotation_handles_custom_names() {
        assert_eq!(next_rotation_name("my-custom-channel"), CHANNEL_NAMES[0]);
    }
}
