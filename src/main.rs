use honeytrap::commands::{honeypot, stats};
use honeytrap::{cache, config::Config, db, experiments, lifecycle, trigger, Data};
use poise::serenity_prelude as serenity;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let discord_token = config.discord_token.clone();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![honeypot::honeypot(), stats::stats()],
            event_handler: |ctx, event, _framework, data| {
                Box::pin(async move {
                    dispatch_event(ctx, event, data).await;
                    Ok(())
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    if let Err(e) = poise::builtins::on_error(error).await {
                        error!("Error while handling command error: {}", e);
                    }
                })
            },
            ..Default::default()
        })
        .setup(|ctx, ready, framework| {
            Box::pin(async move {
                info!("{} is ready", ready.user.name);
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                ctx.set_activity(Some(serenity::ActivityData::custom(
                    config.status_message.clone(),
                )));

                let db = db::Database::open(&config.database_url)?;
                db.execute_init()?;

                // Daily experiment sweep.
                let sweep = experiments::ExperimentSweep::new(
                    db.clone(),
                    ctx.http.clone(),
                    config.experiment_gap_secs,
                );
                tokio::spawn(sweep.run());

                // Hourly retention pass over the recent-message cache.
                let retention_db = db.clone();
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(Duration::from_secs(3600));
                    loop {
                        ticker.tick().await;
                        let cutoff = chrono::Utc::now().timestamp() - trigger::HISTORY_WINDOW_SECS;
                        match retention_db.purge_cached_before(cutoff) {
                            Ok(n) if n > 0 => {
                                tracing::debug!("Purged {} stale cached messages", n)
                            }
                            Ok(_) => {}
                            Err(e) => error!("Message cache purge failed: {}", e),
                        }
                    }
                });

                Ok(Data {
                    guild_cache: cache::GuildInfoCache::new(Duration::from_millis(
                        config.guild_fetch_timeout_ms,
                    )),
                    channel_probe: cache::ChannelProbeCache::new(4096),
                    bot_id: ready.user.id,
                    db,
                    config,
                })
            })
        })
        .build();

    let intents = serenity::GatewayIntents::GUILDS | serenity::GatewayIntents::GUILD_MESSAGES;

    let mut client = serenity::ClientBuilder::new(&discord_token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    info!("Starting bot...");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}

/// Every arm is isolated: one event's failure is logged and never affects
/// another event's handling.
async fn dispatch_event(ctx: &serenity::Context, event: &serenity::FullEvent, data: &Data) {
    match event {
        serenity::FullEvent::Message { new_message } => {
            if let Err(e) = trigger::handle_message(ctx, data, new_message).await {
                error!("Trigger handler failed: {:#}", e);
            }
        }
        serenity::FullEvent::GuildCreate { guild, .. } => {
            if let Err(e) = lifecycle::guild_created(ctx, data, guild).await {
                error!("Guild setup failed for {}: {:#}", guild.id, e);
            }
        }
        serenity::FullEvent::GuildDelete { incomplete, .. } => {
            if let Err(e) = lifecycle::guild_deleted(data, incomplete) {
                error!("Guild teardown failed for {}: {:#}", incomplete.id, e);
            }
        }
        serenity::FullEvent::GuildUpdate { new_data, .. } => {
            lifecycle::guild_updated(data, new_data);
        }
        serenity::FullEvent::ChannelDelete { channel, .. } => {
            if let Err(e) = lifecycle::channel_deleted(&data.db, channel.guild_id, channel.id) {
                error!("Channel-delete reconciliation failed: {:#}", e);
            }
        }
        serenity::FullEvent::MessageDelete {
            deleted_message_id,
            guild_id,
            ..
        } => {
            if let Err(e) = lifecycle::message_deleted(&data.db, *guild_id, *deleted_message_id) {
                error!("Message-delete reconciliation failed: {:#}", e);
            }
        }
        _ => {}
    }
}
