use crate::{Context, Error};
use poise::serenity_prelude as serenity;

/// Honeypot statistics across all servers
#[poise::command(slash_command, dm_only)]
pub async fn stats(
    ctx: Context<'_>,
    #[description = "User to look up"] user: Option<serenity::User>,
) -> Result<(), Error> {
    let stats = ctx.data().db.global_stats()?;

    let mut embed = serenity::CreateEmbed::new()
        .title("🍯 Honeypot Stats")
        .field("Servers", stats.guilds.to_string(), true)
        .field("Bots caught", stats.moderated.to_string(), true)
        .color(0xFFD700);

    if let Some(user) = &user {
        let count = ctx.data().db.user_moderation_count(&user.id.to_string())?;
        embed = embed.field(
            format!("Times {} was caught", user.name),
            count.to_string(),
            false,
        );
    }

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}
