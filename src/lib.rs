pub mod cache;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod experiments;
pub mod lifecycle;
pub mod messages;
pub mod moderation;
pub mod trigger;

use poise::serenity_prelude as serenity;

/// Shared state handed to every command and event handler.
pub struct Data {
    pub config: config::Config,
    pub db: db::Database,
    pub guild_cache: cache::GuildInfoCache,
    pub channel_probe: cache::ChannelProbeCache,
    /// Bot's own user id, for self-message filtering and warning-message dedup.
    pub bot_id: serenity::UserId,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
