use crate::db::{CachedMessage, GuildConfig};
use crate::messages;
use crate::moderation::{Experiments, ModAction};
use crate::Data;
use poise::serenity_prelude as serenity;
use serenity::{ChannelId, EmojiId, GuildId, Message, MessageId, ReactionType, UserId};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// How far back a moderation reaches when purging the user's history.
pub const HISTORY_WINDOW_SECS: i64 = 3600;

/// What happened to one step of the trigger pipeline. Steps never throw past
/// their own boundary; the report is the only place failures surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    Skipped(&'static str),
    Failed(String),
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, StepOutcome::Succeeded)
    }

    pub fn failed(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }
}

impl Default for StepOutcome {
    fn default() -> Self {
        StepOutcome::Skipped("not reached")
    }
}

/// Structured record of one trigger's handling, consumed by the final
/// outcome-reporting step.
#[derive(Debug, Default)]
pub struct TriggerReport {
    pub is_owner: bool,
    pub react: StepOutcome,
    pub dm: StepOutcome,
    pub moderation: StepOutcome,
    pub recorded: StepOutcome,
    pub warning_refresh: StepOutcome,
    pub notice: StepOutcome,
}

/// Who a message counts against. Human authors count as themselves; bot
/// messages only count when they proxy a human's slash-command invocation.
pub fn trigger_target(
    author_id: UserId,
    author_is_bot: bool,
    interaction_user: Option<UserId>,
) -> Option<UserId> {
    if author_is_bot {
        interaction_user
    } else {
        Some(author_id)
    }
}

/// Outcome of the config-resolution gate (step 1).
#[derive(Debug, PartialEq, Eq)]
pub enum Gate {
    /// No config row for this guild; nothing to do, nothing to cache.
    Unconfigured,
    /// Configured, but this isn't the honeypot channel; cacheable negative.
    NotHoneypot,
    /// The message is in the configured honeypot channel.
    Armed(Box<GuildConfig>),
}

pub fn config_gate(config: Option<GuildConfig>, channel_id: &str) -> Gate {
    match config {
        None => Gate::Unconfigured,
        Some(config) => match config.honeypot_channel_id.as_deref() {
            Some(stored) if stored == channel_id => Gate::Armed(Box::new(config)),
            _ => Gate::NotHoneypot,
        },
    }
}

/// Which notice the reporting step should post, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Success,
    OwnerExempt,
    ActionFailed,
}

pub fn select_notice(report: &TriggerReport, experiments: Experiments) -> Option<Notice> {
    if report.is_owner {
        if experiments.no_warning_message {
            None
        } else {
            Some(Notice::OwnerExempt)
        }
    } else if report.moderation.succeeded() {
        Some(Notice::Success)
    } else if report.moderation.failed() {
        if experiments.no_warning_message {
            None
        } else {
            Some(Notice::ActionFailed)
        }
    } else {
        None
    }
}

/// Entry point for every message-create event. Ordered pipeline; each step is
/// fault-isolated so a failure never prevents later steps from attempting.
pub async fn handle_message(
    ctx: &serenity::Context,
    data: &Data,
    message: &Message,
) -> anyhow::Result<()> {
    let Some(guild_id) = message.guild_id else {
        return Ok(());
    };
    let interaction_user = message.interaction.as_ref().map(|ix| ix.user.id);
    let Some(target) = trigger_target(message.author.id, message.author.bot, interaction_user)
    else {
        return Ok(());
    };

    // Track every attributable message so a later moderation can purge the
    // trailing hour of history.
    let entry = CachedMessage {
        message_id: message.id.to_string(),
        guild_id: guild_id.to_string(),
        channel_id: message.channel_id.to_string(),
        user_id: target.to_string(),
        timestamp: message.timestamp.unix_timestamp(),
    };
    if let Err(e) = data.db.cache_message(&entry) {
        debug!("Failed to cache message {}: {}", message.id, e);
    }

    if data.channel_probe.contains(message.channel_id) {
        return Ok(());
    }

    // 1. Resolve config.
    let config = match config_gate(
        data.db.get_config(&guild_id.to_string())?,
        &message.channel_id.to_string(),
    ) {
        Gate::Unconfigured => return Ok(()),
        Gate::NotHoneypot => {
            data.channel_probe.remember(message.channel_id);
            return Ok(());
        }
        Gate::Armed(config) => *config,
    };

    let mut report = TriggerReport::default();

    // 2. Acknowledge, best-effort and bounded; never blocks the pipeline.
    report.react = ack_react(ctx, data, message).await;

    // 3. Disabled short-circuit: react only, nothing else.
    if config.action.is_disabled() {
        debug!("Honeypot trigger in guild {} ignored: action disabled", guild_id);
        return Ok(());
    }

    // 4. Resolve guild context; owner can never be moderated by a bot, so
    // the attempt is skipped outright rather than allowed to fail.
    let info = data.guild_cache.get_or_fetch(&ctx.http, guild_id).await;
    report.is_owner = info.as_ref().is_some_and(|i| i.owner_id == target);
    let locale = info
        .as_ref()
        .map(|i| i.preferred_locale.clone())
        .unwrap_or_else(|| "en".to_string());
    let guild_display = match &info {
        Some(i) => match &i.vanity_code {
            Some(code) => format!("[{}](https://discord.gg/{})", i.name, code),
            None => i.name.clone(),
        },
        None => "this server".to_string(),
    };
    let message_link = format!(
        "https://discord.com/channels/{}/{}/{}",
        guild_id, message.channel_id, message.id
    );

    // 5. DM before moderating. A banned user may no longer be reachable, so
    // this ordering is policy, not an accident.
    report.dm = if config.experiments.no_dm {
        StepOutcome::Skipped("no_dm experiment")
    } else {
        send_dm(
            ctx,
            target,
            &messages::user_dm(
                config.action,
                &guild_display,
                &message_link,
                report.is_owner,
                &locale,
                None,
            ),
        )
        .await
    };

    // 6. Moderate.
    report.moderation = if report.is_owner {
        StepOutcome::Skipped("server owner is exempt")
    } else {
        moderate(ctx, data, &config, guild_id, target).await
    };

    // 7. Count only successful non-owner moderations.
    report.recorded = if report.moderation.succeeded() && !report.is_owner {
        match data
            .db
            .log_moderation(&guild_id.to_string(), &target.to_string())
        {
            Ok(()) => StepOutcome::Succeeded,
            Err(e) => {
                warn!("Failed to record moderation event: {}", e);
                StepOutcome::Failed(e.to_string())
            }
        }
    } else {
        StepOutcome::Skipped("moderation not performed")
    };

    // 8. Refresh the warning message with the new aggregate count.
    report.warning_refresh = refresh_warning(ctx, data, &config, &locale).await;

    // 9. Report the outcome.
    report.notice = post_notice(ctx, data, &config, &report, target).await;

    debug!(guild = %guild_id, user = %target, ?report, "Honeypot trigger handled");
    Ok(())
}

async fn ack_react(ctx: &serenity::Context, data: &Data, message: &Message) -> StepOutcome {
    let reaction = match data.config.trigger_emoji_id {
        Some(id) => ReactionType::Custom {
            animated: false,
            id: EmojiId::new(id),
            name: Some("honeypot".to_string()),
        },
        None => ReactionType::Unicode("🍯".to_string()),
    };
    let timeout = Duration::from_millis(data.config.react_timeout_ms);
    match tokio::time::timeout(timeout, message.react(&ctx.http, reaction)).await {
        Ok(Ok(_)) => StepOutcome::Succeeded,
        Ok(Err(e)) => {
            debug!("Acknowledge react failed: {}", e);
            StepOutcome::Failed(e.to_string())
        }
        Err(_) => {
            debug!("Acknowledge react timed out");
            StepOutcome::Failed("timed out".to_string())
        }
    }
}

async fn send_dm(
    ctx: &serenity::Context,
    target: UserId,
    dm: &messages::RenderedDm,
) -> StepOutcome {
    // Closed DMs and blocks are routine; swallow them entirely.
    let result = async {
        let channel = target.create_dm_channel(&ctx.http).await?;
        channel
            .id
            .send_message(&ctx.http, messages::dm_create(dm))
            .await
    }
    .await;
    match result {
        Ok(_) => StepOutcome::Succeeded,
        Err(e) => {
            debug!("DM to {} undeliverable: {}", target, e);
            StepOutcome::Failed(e.to_string())
        }
    }
}

async fn moderate(
    ctx: &serenity::Context,
    data: &Data,
    config: &GuildConfig,
    guild_id: GuildId,
    target: UserId,
) -> StepOutcome {
    let result = match config.action {
        ModAction::Ban => ban_and_purge(ctx, data, guild_id, target, "Triggered the honeypot").await,
        ModAction::Softban => softban(ctx, data, guild_id, target).await,
        ModAction::Disabled => return StepOutcome::Skipped("action disabled"),
    };
    match result {
        Ok(()) => StepOutcome::Succeeded,
        Err(e) => {
            warn!(
                "Failed to {} user {} in guild {}: {}",
                config.action.as_str(),
                target,
                guild_id,
                e
            );
            StepOutcome::Failed(e.to_string())
        }
    }
}

async fn ban_and_purge(
    ctx: &serenity::Context,
    data: &Data,
    guild_id: GuildId,
    target: UserId,
    reason: &str,
) -> anyhow::Result<()> {
    guild_id.ban_with_reason(&ctx.http, target, 0, reason).await?;
    purge_recent_history(ctx, data, guild_id, target).await;
    Ok(())
}

async fn softban(
    ctx: &serenity::Context,
    data: &Data,
    guild_id: GuildId,
    target: UserId,
) -> anyhow::Result<()> {
    ban_and_purge(ctx, data, guild_id, target, "Triggered the honeypot (softban)").await?;
    // The platform purges asynchronously; lifting the ban too early races the
    // purge and leaves messages behind.
    tokio::time::sleep(Duration::from_secs(data.config.softban_settle_secs)).await;
    guild_id.unban(&ctx.http, target).await?;
    Ok(())
}

/// Bulk-deletes the user's cached messages from the trailing hour, grouped by
/// channel. Best-effort throughout; the platform's own delete window is
/// day-granular, the cache is what gives us the one-hour cut.
async fn purge_recent_history(
    ctx: &serenity::Context,
    data: &Data,
    guild_id: GuildId,
    target: UserId,
) {
    let since = chrono::Utc::now().timestamp() - HISTORY_WINDOW_SECS;
    let entries = match data
        .db
        .recent_messages_for_user(&guild_id.to_string(), &target.to_string(), since)
    {
        Ok(entries) => entries,
        Err(e) => {
            warn!("History lookup failed for {}: {}", target, e);
            return;
        }
    };

    let mut by_channel: HashMap<u64, Vec<MessageId>> = HashMap::new();
    for entry in entries {
        let (Ok(channel), Ok(message)) = (
            entry.channel_id.parse::<u64>(),
            entry.message_id.parse::<u64>(),
        ) else {
            continue;
        };
        by_channel.entry(channel).or_default().push(MessageId::new(message));
    }

    for (channel, ids) in by_channel {
        let channel = ChannelId::new(channel);
        if ids.len() == 1 {
            if let Err(e) = channel.delete_message(&ctx.http, ids[0]).await {
                debug!("History delete in {} failed: {}", channel, e);
            }
        } else {
            for chunk in ids.chunks(100) {
                if let Err(e) = channel.delete_messages(&ctx.http, chunk.iter().copied()).await {
                    debug!("Bulk history delete in {} failed: {}", channel, e);
                }
            }
        }
    }
}

async fn refresh_warning(
    ctx: &serenity::Context,
    data: &Data,
    config: &GuildConfig,
    locale: &str,
) -> StepOutcome {
    if config.experiments.no_warning_message {
        return StepOutcome::Skipped("no_warning_message experiment");
    }
    let Some(message_id) = config
        .honeypot_message_id
        .as_deref()
        .and_then(|id| id.parse::<u64>().ok())
    else {
        return StepOutcome::Skipped("no warning message tracked");
    };
    let Some(channel_id) = config
        .honeypot_channel_id
        .as_deref()
        .and_then(|id| id.parse::<u64>().ok())
    else {
        return StepOutcome::Skipped("no honeypot channel");
    };

    let count = match data.db.moderation_count(&config.guild_id) {
        Ok(count) => count,
        Err(e) => return StepOutcome::Failed(e.to_string()),
    };
    let warning = messages::warning_message(count, config.action, locale, None);
    match ChannelId::new(channel_id)
        .edit_message(
            &ctx.http,
            MessageId::new(message_id),
            messages::warning_edit(&warning),
        )
        .await
    {
        Ok(_) => StepOutcome::Succeeded,
        Err(e) => {
            // Externally deleted or unreachable; the reconciler and the admin
            // command take care of recreation.
            debug!("Warning message refresh failed: {}", e);
            StepOutcome::Failed(e.to_string())
        }
    }
}

async fn post_notice(
    ctx: &serenity::Context,
    data: &Data,
    config: &GuildConfig,
    report: &TriggerReport,
    target: UserId,
) -> StepOutcome {
    let Some(kind) = select_notice(report, config.experiments) else {
        return StepOutcome::Skipped("nothing to report");
    };
    let Some(honeypot_channel) = config
        .honeypot_channel_id
        .as_deref()
        .and_then(|id| id.parse::<u64>().ok())
    else {
        return StepOutcome::Skipped("no honeypot channel");
    };
    // Log channel when configured, honeypot channel otherwise.
    let destination = config
        .log_channel_id
        .as_deref()
        .and_then(|id| id.parse::<u64>().ok())
        .unwrap_or(honeypot_channel);

    let text = match kind {
        Notice::Success => {
            messages::log_success(target.get(), honeypot_channel, config.action, None)
        }
        Notice::OwnerExempt => messages::log_owner_exempt(target.get(), honeypot_channel),
        Notice::ActionFailed => messages::log_failure(target.get(), honeypot_channel),
    };
    match ChannelId::new(destination)
        .send_message(&ctx.http, messages::notice_create(&text))
        .await
    {
        Ok(_) => StepOutcome::Succeeded,
        Err(e) => {
            debug!("Outcome notice undeliverable: {}", e);
            StepOutcome::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::GuildConfig;
    use crate::moderation::ModAction;

    fn armed_config(channel: &str) -> GuildConfig {
        GuildConfig {
            honeypot_channel_id: Some(channel.to_string()),
            ..GuildConfig::defaults("g1")
        }
    }

    #[test]
    fn test_trigger_target_attribution() {
        let human = UserId::new(1);
        let bot = UserId::new(2);
        let invoker = UserId::new(3);

        // Humans count as themselves.
        assert_eq!(trigger_target(human, false, None), Some(human));
        // Plain bot messages never count.
        assert_eq!(trigger_target(bot, true, None), None);
        // Slash-command responses count against the invoking human.
        assert_eq!(trigger_target(bot, true, Some(invoker)), Some(invoker));
    }

    #[test]
    fn test_config_gate() {
        assert_eq!(config_gate(None, "100"), Gate::Unconfigured);

        // Configured but unarmed (no channel stored).
        let config = GuildConfig::defaults("g1");
        assert_eq!(config_gate(Some(config), "100"), Gate::NotHoneypot);

        // Wrong channel.
        assert_eq!(
            config_gate(Some(armed_config("200")), "100"),
            Gate::NotHoneypot
        );

        // Exact channel match arms the pipeline.
        match config_gate(Some(armed_config("100")), "100") {
            Gate::Armed(config) => {
                assert_eq!(config.honeypot_channel_id.as_deref(), Some("100"))
            }
            other => panic!("expected Armed, got {:?}", other),
        }
    }

    #[test]
    fn test_select_notice_success() {
        let report = TriggerReport {
            moderation: StepOutcome::Succeeded,
            ..Default::default()
        };
        assert_eq!(
            select_notice(&report, Experiments::default()),
            Some(Notice::Success)
        );
        // Success notices are not suppressed by the warning-message flag.
        let suppressed = Experiments {
            no_warning_message: true,
            ..Default::default()
        };
        assert_eq!(select_notice(&report, suppressed), Some(Notice::Success));
    }

    #[test]
    fn test_select_notice_owner_exempt() {
        let report = TriggerReport {
            is_owner: true,
            moderation: StepOutcome::Skipped("server owner is exempt"),
            ..Default::default()
        };
        assert_eq!(
            select_notice(&report, Experiments::default()),
            Some(Notice::OwnerExempt)
        );
        let suppressed = Experiments {
            no_warning_message: true,
            ..Default::default()
        };
        assert_eq!(select_notice(&report, suppressed), None);
    }

    #[test]
    fn test_select_notice_failure() {
        let report = TriggerReport {
            moderation: StepOutcome::Failed("missing permission".to_string()),
            ..Default::default()
        };
        assert_eq!(
            select_notice(&report, Experiments::default()),
            Some(Notice::ActionFailed)
        );
        let suppressed = Experiments {
            no_warning_message: true,
            ..Default::default()
        };
        assert_eq!(select_notice(&report, suppressed), None);
    }

    #[test]
    fn test_select_notice_nothing_happened() {
        // Moderation never ran (e.g. disabled short-circuit): no notice.
        let report = TriggerReport::default();
        assert_eq!(select_notice(&report, Experiments::default()), None);
    }

    #[test]
    fn test_step_outcome_default_is_unreached() {
        let outcome = StepOutcome::default();
        assert!(!outcome.succeeded());
        assert!(!outcome.failed());
    }
}
