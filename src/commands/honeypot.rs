use crate::db::GuildConfig;
use crate::error::ConfigError;
use crate::moderation::{Experiments, ModAction};
use crate::{messages, Context, Error};
use poise::serenity_prelude as serenity;
use serenity::{ChannelId, GuildChannel, MessageId, Permissions};
use tracing::{debug, info, warn};

const HONEYPOT_CHANNEL_PERMS: Permissions = Permissions::VIEW_CHANNEL
    .union(Permissions::SEND_MESSAGES)
    .union(Permissions::MANAGE_MESSAGES)
    .union(Permissions::MANAGE_CHANNELS);
const LOG_CHANNEL_PERMS: Permissions =
    Permissions::VIEW_CHANNEL.union(Permissions::SEND_MESSAGES);

/// View or update the honeypot configuration for this server
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD",
    ephemeral
)]
#[allow(clippy::too_many_arguments)]
pub async fn honeypot(
    ctx: Context<'_>,
    #[description = "Channel that traps spam bots"]
    #[channel_types("Text")]
    channel: Option<GuildChannel>,
    #[description = "Channel where moderation outcomes are reported"]
    #[channel_types("Text")]
    log_channel: Option<GuildChannel>,
    #[description = "Action taken when the honeypot is triggered"] action: Option<ModAction>,
    #[description = "Don't DM moderated users"] suppress_dm: Option<bool>,
    #[description = "Don't post or maintain the warning message"] suppress_warning: Option<bool>,
    #[description = "Post a daily keep-alive message in the honeypot channel"] keep_alive: Option<
        bool,
    >,
    #[description = "Rotate the honeypot channel name daily"] rotate_name: Option<bool>,
    #[description = "Pick a random honeypot channel name daily"] chaos_rename: Option<bool>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?;
    let guild_key = guild_id.to_string();
    let data = ctx.data();

    let old = data
        .db
        .get_config(&guild_key)?
        .unwrap_or_else(|| GuildConfig::defaults(&guild_key));

    let no_selection = channel.is_none()
        && log_channel.is_none()
        && action.is_none()
        && suppress_dm.is_none()
        && suppress_warning.is_none()
        && keep_alive.is_none()
        && rotate_name.is_none()
        && chaos_rename.is_none();
    if no_selection {
        ctx.send(poise::CreateReply::default().embed(config_embed(&old)))
            .await?;
        return Ok(());
    }

    // Merge the selections into a candidate config; nothing persists until
    // every check and side effect below has gone through.
    let mut new = old.clone();
    if let Some(ch) = &channel {
        new.honeypot_channel_id = Some(ch.id.to_string());
    }
    if let Some(ch) = &log_channel {
        new.log_channel_id = Some(ch.id.to_string());
    }
    if let Some(action) = action {
        new.action = action;
    }
    let mut experiments = old.experiments;
    if let Some(v) = suppress_dm {
        experiments.no_dm = v;
    }
    if let Some(v) = suppress_warning {
        experiments.no_warning_message = v;
    }
    if let Some(v) = keep_alive {
        experiments.keep_alive = v;
    }
    if let Some(v) = rotate_name {
        experiments.rotate_name = v;
    }
    if let Some(v) = chaos_rename {
        experiments.chaos_rename = v;
    }
    new.experiments = experiments;

    if new.honeypot_channel_id.is_none() {
        ctx.send(err_reply(ConfigError::MissingChannel)).await?;
        return Ok(());
    }

    let channel_changed = new.honeypot_channel_id != old.honeypot_channel_id;
    let log_changed = new.log_channel_id != old.log_channel_id && new.log_channel_id.is_some();
    let warning_reenabled = old.experiments.no_warning_message && !new.experiments.no_warning_message;
    let rotate_newly = new.experiments.rotate_name && !old.experiments.rotate_name;
    let chaos_newly = new.experiments.chaos_rename && !old.experiments.chaos_rename;
    let keep_alive_newly = new.experiments.keep_alive && !old.experiments.keep_alive;

    // Permission preflight: all-or-nothing, before any mutation.
    if let Err(e) = preflight(
        &ctx,
        &new,
        channel.as_ref().filter(|_| channel_changed),
        log_channel.as_ref().filter(|_| log_changed),
        rotate_newly || chaos_newly,
    )
    .await
    {
        ctx.send(err_reply(e)).await?;
        return Ok(());
    }

    let new_channel_id = ChannelId::new(
        new.honeypot_channel_id
            .as_deref()
            .and_then(|id| id.parse::<u64>().ok())
            .ok_or("Invalid channel id")?,
    );

    // (Re)establish the warning message.
    let count = data.db.moderation_count(&guild_key).unwrap_or(0);
    let locale = data
        .guild_cache
        .get(guild_id)
        .map(|i| i.preferred_locale)
        .unwrap_or_else(|| "en".to_string());
    let warning = messages::warning_message(count, new.action, &locale, None);

    let mut created_message: Option<MessageId> = None;
    if !new.experiments.no_warning_message {
        let needs_fresh =
            channel_changed || old.honeypot_message_id.is_none() || warning_reenabled;
        if needs_fresh {
            match new_channel_id
                .send_message(ctx.http(), messages::warning_create(&warning))
                .await
            {
                Ok(msg) => {
                    created_message = Some(msg.id);
                    new.honeypot_message_id = Some(msg.id.to_string());
                }
                Err(e) => {
                    warn!("Warning message creation failed in {}: {}", new_channel_id, e);
                    ctx.send(err_reply(ConfigError::WarningMessageFailed)).await?;
                    return Ok(());
                }
            }
        } else if let Some(existing) = old
            .honeypot_message_id
            .as_deref()
            .and_then(|id| id.parse::<u64>().ok())
        {
            let existing = MessageId::new(existing);
            if let Err(e) = new_channel_id
                .edit_message(ctx.http(), existing, messages::warning_edit(&warning))
                .await
            {
                // Externally deleted message: fall back to a fresh one.
                debug!("Warning message edit failed ({}), recreating", e);
                match new_channel_id
                    .send_message(ctx.http(), messages::warning_create(&warning))
                    .await
                {
                    Ok(msg) => {
                        created_message = Some(msg.id);
                        new.honeypot_message_id = Some(msg.id.to_string());
                    }
                    Err(e) => {
                        warn!("Warning message recreation failed in {}: {}", new_channel_id, e);
                        ctx.send(err_reply(ConfigError::WarningMessageFailed)).await?;
                        return Ok(());
                    }
                }
            }
        }
    } else if channel_changed {
        // The tracked message must always live in the honeypot channel; with
        // the warning suppressed there is no replacement to point at.
        new.honeypot_message_id = None;
    }

    // A changed log channel gets a confirmation post; if even that fails the
    // whole update is rolled back.
    if log_changed {
        if let Some(log_id) = new
            .log_channel_id
            .as_deref()
            .and_then(|id| id.parse::<u64>().ok())
        {
            let text = format!("✅ Honeypot is set up in <#{}>!", new_channel_id);
            if let Err(e) = ChannelId::new(log_id)
                .send_message(ctx.http(), messages::notice_create(&text))
                .await
            {
                warn!("Log channel confirmation failed in {}: {}", log_id, e);
                if let Some(mid) = created_message {
                    let _ = new_channel_id.delete_message(ctx.http(), mid).await;
                }
                ctx.send(err_reply(ConfigError::LogChannelUnreachable)).await?;
                return Ok(());
            }
        }
    }

    data.db.set_config(&new)?;
    data.channel_probe.clear();
    info!("Guild {} honeypot configuration updated", guild_key);

    ctx.send(
        poise::CreateReply::default()
            .content("✅ Honeypot configuration updated.")
            .embed(config_embed(&new)),
    )
    .await?;

    // Best-effort cleanup of the superseded warning message, after the reply.
    if channel_changed {
        if let (Some(old_channel), Some(old_message)) = (
            old.honeypot_channel_id
                .as_deref()
                .and_then(|id| id.parse::<u64>().ok()),
            old.honeypot_message_id
                .as_deref()
                .and_then(|id| id.parse::<u64>().ok()),
        ) {
            if let Err(e) = ChannelId::new(old_channel)
                .delete_message(ctx.http(), MessageId::new(old_message))
                .await
            {
                debug!("Old warning message cleanup failed: {}", e);
            }
        }
    }

    // Newly-enabled periodic experiments run once immediately so the admin
    // sees them working without waiting for the daily sweep.
    let fresh_flags = Experiments {
        keep_alive: keep_alive_newly,
        rotate_name: rotate_newly,
        chaos_rename: chaos_newly,
        ..Default::default()
    };
    if fresh_flags.any_periodic() {
        let mut preview = new.clone();
        preview.experiments = fresh_flags;
        if let Err(e) = crate::experiments::run_guild(ctx.http(), &preview).await {
            warn!("Immediate experiment run failed for guild {}: {}", guild_key, e);
        }
    }

    Ok(())
}

/// Every check must pass before any mutation happens.
async fn preflight(
    ctx: &Context<'_>,
    new: &GuildConfig,
    changed_channel: Option<&GuildChannel>,
    changed_log_channel: Option<&GuildChannel>,
    rename_newly_enabled: bool,
) -> Result<(), ConfigError> {
    // A banning action requires the invoker to hold ban rights themselves.
    if matches!(new.action, ModAction::Ban | ModAction::Softban) {
        let invoker_perms = ctx
            .author_member()
            .await
            .and_then(|m| m.permissions)
            .unwrap_or(Permissions::empty());
        if !invoker_perms.contains(Permissions::BAN_MEMBERS) {
            return Err(ConfigError::InvokerCannotBan);
        }
    }

    if changed_channel.is_none() && changed_log_channel.is_none() && !rename_newly_enabled {
        return Ok(());
    }

    let guild = ctx
        .guild()
        .map(|g| g.clone())
        .ok_or(ConfigError::GuildUnavailable)?;
    let bot_member = guild
        .id
        .member(ctx.http(), ctx.data().bot_id)
        .await
        .map_err(|_| ConfigError::GuildUnavailable)?;

    if let Some(target) = changed_channel {
        let perms = guild.user_permissions_in(target, &bot_member);
        if !perms.contains(HONEYPOT_CHANNEL_PERMS) {
            return Err(ConfigError::BotMissingHoneypotPerms(format!(
                "<#{}>",
                target.id
            )));
        }
    }

    if let Some(target) = changed_log_channel {
        let perms = guild.user_permissions_in(target, &bot_member);
        if !perms.contains(LOG_CHANNEL_PERMS) {
            return Err(ConfigError::BotMissingLogPerms(format!("<#{}>", target.id)));
        }
    }

    if rename_newly_enabled {
        let guild_perms = guild.member_permissions(&bot_member);
        if !guild_perms.contains(Permissions::MANAGE_CHANNELS) {
            return Err(ConfigError::BotCannotRename);
        }
    }

    Ok(())
}

fn err_reply(e: ConfigError) -> poise::CreateReply {
    poise::CreateReply::default().content(format!("❌ {}", e))
}

fn config_embed(config: &GuildConfig) -> serenity::CreateEmbed {
    let channel = config
        .honeypot_channel_id
        .as_deref()
        .map(|id| format!("<#{}>", id))
        .unwrap_or_else(|| "not set".to_string());
    let log_channel = config
        .log_channel_id
        .as_deref()
        .map(|id| format!("<#{}>", id))
        .unwrap_or_else(|| "honeypot channel".to_string());
    let experiments = {
        let names = config.experiments.enabled_names();
        if names.is_empty() {
            "none".to_string()
        } else {
            names.join(", ")
        }
    };

    serenity::CreateEmbed::new()
        .title("🍯 Honeypot Configuration")
        .field("Honeypot Channel", channel, true)
        .field("Log Channel", log_channel, true)
        .field("Action", config.action.as_str(), true)
        .field("Experiments", experiments, false)
        .color(0xFFD700)
}
