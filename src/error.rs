use thiserror::Error;

/// Failures surfaced to the invoking admin as ephemeral replies during the
/// configuration command. Any of these aborts the whole update; nothing is
/// persisted once one fires.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Pick a honeypot channel first — nothing is configured for this server yet.")]
    MissingChannel,
    #[error("You need the **Ban Members** permission to select a banning action.")]
    InvokerCannotBan,
    #[error("I couldn't resolve this server from the cache. Try again in a moment.")]
    GuildUnavailable,
    #[error("I need **View Channel**, **Send Messages**, **Manage Messages** and **Manage Channels** in {0}.")]
    BotMissingHoneypotPerms(String),
    #[error("I need **View Channel** and **Send Messages** in {0}.")]
    BotMissingLogPerms(String),
    #[error("I need the server-wide **Manage Channels** permission to rename the honeypot channel.")]
    BotCannotRename,
    #[error("I couldn't create the warning message there. Check my permissions and try again.")]
    WarningMessageFailed,
    #[error("I couldn't post in the selected log channel, so nothing was changed.")]
    LogChannelUnreachable,
}
