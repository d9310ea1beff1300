use crate::cache::GuildInfo;
use crate::db::{Database, GuildConfig};
use crate::messages;
use crate::Data;
use poise::serenity_prelude as serenity;
use serenity::{
    ChannelId, ChannelType, CreateChannel, GetMessages, Guild, GuildId, MessageId, PartialGuild,
    UnavailableGuild,
};
use tracing::{debug, info, warn};

pub const HONEYPOT_CHANNEL_NAME: &str = "honeypot";

/// First contact with a guild: set up the honeypot channel and warning
/// message, then persist whatever succeeded. GuildCreate also fires on every
/// reconnect, so an existing config row means there is nothing to do.
pub async fn guild_created(
    ctx: &serenity::Context,
    data: &Data,
    guild: &Guild,
) -> anyhow::Result<()> {
    data.guild_cache.insert(
        guild.id,
        GuildInfo {
            name: guild.name.clone(),
            owner_id: guild.owner_id,
            vanity_code: guild.vanity_url_code.clone(),
            preferred_locale: guild.preferred_locale.clone(),
        },
    );

    let guild_key = guild.id.to_string();
    if data.db.get_config(&guild_key)?.is_some() {
        return Ok(());
    }

    info!("Setting up honeypot for new guild {} ({})", guild.name, guild.id);
    let mut config = GuildConfig::defaults(&guild_key);

    let channel_id = match find_or_create_channel(ctx, guild.id).await {
        Ok(id) => {
            data.channel_probe.clear();
            Some(id)
        }
        Err(e) => {
            warn!("Could not find or create a honeypot channel in {}: {}", guild.id, e);
            None
        }
    };

    let mut message_id = None;
    if let Some(channel) = channel_id {
        match adopt_or_post_warning(ctx, data, channel, &config, &guild.preferred_locale).await {
            Ok(id) => message_id = Some(id),
            Err(e) => warn!("Could not post the warning message in {}: {}", channel, e),
        }
    }

    config.honeypot_channel_id = channel_id.map(|id| id.to_string());
    config.honeypot_message_id = message_id.map(|id: MessageId| id.to_string());
    // Partial setup is persisted as nulls so the admin command can finish
    // the job later.
    data.db.set_config(&config)?;

    if config.honeypot_message_id.is_none() {
        if let Some(system_channel) = guild.system_channel_id {
            let text = "👋 Thanks for adding the honeypot bot! Run /honeypot to finish setup.\n\
                        -# The warning message couldn't be created automatically.";
            if let Err(e) = system_channel
                .send_message(&ctx.http, messages::notice_create(text))
                .await
            {
                debug!("Setup pointer to {} undeliverable: {}", system_channel, e);
            }
        }
    }
    Ok(())
}

/// Reuses a text channel literally named "honeypot" when one exists,
/// otherwise creates it.
async fn find_or_create_channel(
    ctx: &serenity::Context,
    guild_id: GuildId,
) -> anyhow::Result<ChannelId> {
    let channels = guild_id.channels(&ctx.http).await?;
    if let Some((id, _)) = channels
        .iter()
        .find(|(_, c)| c.name == HONEYPOT_CHANNEL_NAME && c.kind == ChannelType::Text)
    {
        return Ok(*id);
    }

    let builder = CreateChannel::new(HONEYPOT_CHANNEL_NAME)
        .kind(ChannelType::Text)
        .audit_log_reason("Honeypot channel for the trap bot");
    let channel = guild_id.create_channel(&ctx.http, builder).await?;
    Ok(channel.id)
}

/// Posts the warning message, adopting an existing bot-authored message when
/// one is already in the channel: the newest is edited in place and any
/// duplicates are deleted best-effort.
async fn adopt_or_post_warning(
    ctx: &serenity::Context,
    data: &Data,
    channel_id: ChannelId,
    config: &GuildConfig,
    locale: &str,
) -> anyhow::Result<MessageId> {
    let count = data.db.moderation_count(&config.guild_id).unwrap_or(0);
    let warning = messages::warning_message(count, config.action, locale, None);

    let history = channel_id
        .messages(&ctx.http, GetMessages::new().limit(50))
        .await
        .unwrap_or_default();
    let own: Vec<&serenity::Message> = history
        .iter()
        .filter(|m| m.author.id == data.bot_id)
        .collect();

    if let Some(newest) = own.first() {
        match channel_id
            .edit_message(&ctx.http, newest.id, messages::warning_edit(&warning))
            .await
        {
            Ok(_) => {
                for dup in &own[1..] {
                    let _ = channel_id.delete_message(&ctx.http, dup.id).await;
                }
                return Ok(newest.id);
            }
            Err(e) => {
                debug!("Could not adopt existing warning message: {}", e);
                let msg = channel_id
                    .send_message(&ctx.http, messages::warning_create(&warning))
                    .await?;
                for dup in &own {
                    let _ = channel_id.delete_message(&ctx.http, dup.id).await;
                }
                return Ok(msg.id);
            }
        }
    }

    let msg = channel_id
        .send_message(&ctx.http, messages::warning_create(&warning))
        .await?;
    Ok(msg.id)
}

/// True departures tear down all per-guild state. The outage signal
/// (unavailable = true) is not a departure and must leave everything intact.
pub fn guild_deleted(data: &Data, incomplete: &UnavailableGuild) -> anyhow::Result<()> {
    if incomplete.unavailable {
        return Ok(());
    }
    let guild_key = incomplete.id.to_string();
    info!("Left guild {}, clearing stored state", guild_key);
    data.db.delete_config(&guild_key)?;
    data.db.forget_guild_messages(&guild_key)?;
    data.guild_cache.invalidate(incomplete.id);
    data.channel_probe.clear();
    Ok(())
}

pub fn guild_updated(data: &Data, new_data: &PartialGuild) {
    data.guild_cache.insert(new_data.id, GuildInfo::from(new_data));
}

/// Both checks are independent: a single deletion may clear the honeypot
/// channel (plus its message) and the log channel.
pub fn channel_deleted(
    db: &Database,
    guild_id: GuildId,
    channel_id: ChannelId,
) -> anyhow::Result<()> {
    let guild_key = guild_id.to_string();
    let channel_key = channel_id.to_string();
    if db.clear_honeypot_channel_if_matches(&guild_key, &channel_key)? {
        info!(
            "Honeypot channel {} deleted in guild {}; configuration cleared",
            channel_key, guild_key
        );
    }
    if db.clear_log_channel_if_matches(&guild_key, &channel_key)? {
        info!(
            "Log channel {} deleted in guild {}; configuration cleared",
            channel_key, guild_key
        );
    }
    Ok(())
}

/// Clears only the tracked-message field; the channel stays configured and
/// the admin command recreates the message on the next update.
pub fn message_deleted(
    db: &Database,
    guild_id: Option<GuildId>,
    message_id: MessageId,
) -> anyhow::Result<()> {
    db.forget_cached_message(&message_id.to_string())?;
    if let Some(guild_id) = guild_id {
        if db.clear_message_if_matches(&guild_id.to_string(), &message_id.to_string())? {
            info!(
                "Tracked warning message deleted externally in guild {}",
                guild_id
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn test_db() -> Database {
        let db = Database::open(":memory:").unwrap();
        db.execute_init().unwrap();
        db
    }

    fn stored_config(db: &Database) -> GuildConfig {
        let config = GuildConfig {
            honeypot_channel_id: Some("10".to_string()),
            honeypot_message_id: Some("20".to_string()),
            log_channel_id: Some("30".to_string()),
            ..GuildConfig::defaults("1")
        };
        db.set_config(&config).unwrap();
        config
    }

    #[test]
    fn test_honeypot_channel_delete_clears_channel_and_message() {
        let db = test_db();
        stored_config(&db);

        channel_deleted(&db, GuildId::new(1), ChannelId::new(10)).unwrap();
        let config = db.get_config("1").unwrap().unwrap();
        assert_eq!(config.honeypot_channel_id, None);
        assert_eq!(config.honeypot_message_id, None);
        assert_eq!(config.log_channel_id.as_deref(), Some("30"));
    }

    #[test]
    fn test_log_channel_delete_clears_only_log() {
        let db = test_db();
        stored_config(&db);

        channel_deleted(&db, GuildId::new(1), ChannelId::new(30)).unwrap();
        let config = db.get_config("1").unwrap().unwrap();
        assert_eq!(config.log_channel_id, None);
        assert_eq!(config.honeypot_channel_id.as_deref(), Some("10"));
    }

    #[test]
    fn test_unrelated_channel_delete_is_noop() {
        let db = test_db();
        let before = stored_config(&db);

        channel_deleted(&db, GuildId::new(1), ChannelId::new(99)).unwrap();
        assert_eq!(db.get_config("1").unwrap().unwrap(), before);
    }

    #[test]
    fn test_warning_message_delete_keeps_channel() {
        let db = test_db();
        stored_config(&db);

        message_deleted(&db, Some(GuildId::new(1)), MessageId::new(20)).unwrap();
        let config = db.get_config("1").unwrap().unwrap();
        assert_eq!(config.honeypot_message_id, None);
        assert_eq!(config.honeypot_channel_id.as_deref(), Some("10"));
    }

    #[test]
    fn test_unrelated_message_delete_is_noop() {
        let db = test_db();
        let before = stored_config(&db);

        message_deleted(&db, Some(GuildId::new(1)), MessageId::new(99)).unwrap();
        assert_eq!(db.get_config("1").unwrap().unwrap(), before);
    }
}
