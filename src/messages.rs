use crate::moderation::ModAction;
use poise::serenity_prelude as serenity;
use serenity::{
    ButtonStyle, CreateActionRow, CreateAllowedMentions, CreateButton, CreateEmbed, CreateMessage,
    EditMessage,
};

pub const HONEY_POT_ICON: &str =
    "https://raw.githubusercontent.com/microsoft/fluentui-emoji/refs/heads/main/assets/Honey%20pot/3D/honey_pot_3d.png";
const HONEY_COLOR: u32 = 0xFFD700;

pub const TOKEN_USER: &str = "{{user:ping}}";
pub const TOKEN_ACTION: &str = "{{action:text}}";
pub const TOKEN_CHANNEL: &str = "{{honeypot:channel:ping}}";
pub const TOKEN_GUILD: &str = "{{guild:name}}";
pub const TOKEN_LINK: &str = "{{message:link}}";

/// Replaces every occurrence of each recognized token. Unknown placeholders
/// are left verbatim.
pub fn substitute(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (token, value) in vars {
        out = out.replace(token, value);
    }
    out
}

/// Named template strings for one locale.
pub struct LocaleStrings {
    pub ban_full: &'static str,
    pub ban_label: &'static str,
    pub ban_past: &'static str,
    pub softban_full: &'static str,
    pub softban_label: &'static str,
    pub softban_past: &'static str,
    pub disabled_full: &'static str,
    pub disabled_label: &'static str,
    pub warning_title: &'static str,
    pub warning_body: &'static str,
    pub dm_title: &'static str,
    pub dm_intro: &'static str,
    pub dm_footer: &'static str,
    pub dm_owner_note: &'static str,
}

static EN: LocaleStrings = LocaleStrings {
    ban_full: "an immediate ban",
    ban_label: "Bans",
    ban_past: "banned",
    softban_full: "a softban",
    softban_label: "Kicks",
    softban_past: "kicked",
    disabled_full: "no action (honeypot is disabled)",
    disabled_label: "Triggers",
    warning_title: "DO NOT SEND MESSAGES IN THIS CHANNEL",
    warning_body: "This channel is used to catch spam bots. Any messages sent here will result in {{action:text}}.",
    dm_title: "Honeypot Triggered",
    dm_intro: "You have been **{{action:text}}** from {{guild:name}} for sending a message in the [honeypot]({{message:link}}) channel.",
    dm_footer: "-# This is an automated message. Replies are not monitored.",
    dm_owner_note: "-# This is an example message: as the owner you can't be {{action:text}}.",
};

static DE: LocaleStrings = LocaleStrings {
    ban_full: "ein sofortiger Bann",
    ban_label: "Bannt",
    ban_past: "gebannt",
    softban_full: "ein Kick",
    softban_label: "Kickt",
    softban_past: "gekickt",
    disabled_full: "keine Aktion (Honeypot ist deaktiviert)",
    disabled_label: "Löst aus",
    warning_title: "KEINE NACHRICHTEN IN DIESEM KANAL SENDEN",
    warning_body: "Dieser Kanal wird verwendet, um Spam-Bots zu fangen. Nachrichten hier führen zu {{action:text}}.",
    dm_title: "Honeypot Ausgelöst",
    dm_intro: "Du wurdest **{{action:text}}** aus {{guild:name}} für das Senden einer Nachricht im [Honeypot]({{message:link}})-Kanal.",
    dm_footer: "-# Dies ist eine automatische Nachricht. Antworten werden nicht überwacht.",
    dm_owner_note: "-# Dies ist eine Beispielnachricht: Als Besitzer kannst du nicht {{action:text}} werden.",
};

static ES: LocaleStrings = LocaleStrings {
    ban_full: "un baneo inmediato",
    ban_label: "Banea",
    ban_past: "baneado",
    softban_full: "una expulsión",
    softban_label: "Expulsa",
    softban_past: "expulsado",
    disabled_full: "sin acción (honeypot desactivado)",
    disabled_label: "Activa",
    warning_title: "NO ENVÍES MENSAJES EN ESTE CANAL",
    warning_body: "Este canal se usa para atrapar bots de spam. Cualquier mensaje enviado aquí resultará en {{action:text}}.",
    dm_title: "Honeypot Activado",
    dm_intro: "Has sido **{{action:text}}** de {{guild:name}} por enviar un mensaje en el canal de [honeypot]({{message:link}}).",
    dm_footer: "-# Este es un mensaje automático. Las respuestas no se revisan.",
    dm_owner_note: "-# Este es un mensaje de ejemplo: como propietario no puedes ser {{action:text}}.",
};

static FR: LocaleStrings = LocaleStrings {
    ban_full: "une exclusion immédiate",
    ban_label: "Bannit",
    ban_past: "banni",
    softban_full: "une exclusion temporaire",
    softban_label: "Expulse",
    softban_past: "expulsé",
    disabled_full: "aucune action (honeypot désactivé)",
    disabled_label: "Déclenche",
    warning_title: "NE PAS ENVOYER DE MESSAGES DANS CE SALON",
    warning_body: "Ce salon est utilisé pour piéger les bots de spam. Tout message envoyé ici entraînera {{action:text}}.",
    dm_title: "Honeypot Déclenché",
    dm_intro: "Vous avez été **{{action:text}}** de {{guild:name}} pour avoir envoyé un message dans le salon [honeypot]({{message:link}}).",
    dm_footer: "-# Ceci est un message automatique. Les réponses ne sont pas surveillées.",
    dm_owner_note: "-# Ceci est un message d'exemple : en tant que propriétaire, vous ne pouvez pas être {{action:text}}.",
};

static PT_BR: LocaleStrings = LocaleStrings {
    ban_full: "um banimento imediato",
    ban_label: "Bane",
    ban_past: "banido",
    softban_full: "uma expulsão",
    softban_label: "Expulsa",
    softban_past: "expulso",
    disabled_full: "nenhuma ação (honeypot desativado)",
    disabled_label: "Aciona",
    warning_title: "NÃO ENVIE MENSAGENS NESTE CANAL",
    warning_body: "Este canal é usado para capturar bots de spam. Qualquer mensagem enviada aqui resultará em {{action:text}}.",
    dm_title: "Honeypot Ativado",
    dm_intro: "Você foi **{{action:text}}** de {{guild:name}} por enviar uma mensagem no canal [honeypot]({{message:link}}).",
    dm_footer: "-# Esta é uma mensagem automática. As respostas não são monitoradas.",
    dm_owner_note: "-# Esta é uma mensagem de exemplo: como proprietário você não pode ser {{action:text}}.",
};

static JA: LocaleStrings = LocaleStrings {
    ban_full: "即時のBAN",
    ban_label: "BAN",
    ban_past: "BAN",
    softban_full: "一時的なキック",
    softban_label: "キック",
    softban_past: "キック",
    disabled_full: "処理なし（ハニーポットは無効）",
    disabled_label: "トリガー",
    warning_title: "このチャンネルでメッセージを送信しないでください",
    warning_body: "このチャンネルはスパムボットを捕まえるために使用されます。ここで送信されたメッセージは{{action:text}}となります。",
    dm_title: "ハニーポットが発動しました",
    dm_intro: "[honeypot]({{message:link}})チャンネルでメッセージを送信したため、{{guild:name}}から**{{action:text}}**されました。",
    dm_footer: "-# これは自動メッセージです。返信は確認されません。",
    dm_owner_note: "-# これは例のメッセージです。所有者として{{action:text}}されることはありません。",
};

/// Resolves a locale tag: exact match, then base language, then English.
/// Never fails on unknown tags.
pub fn strings_for(locale: &str) -> &'static LocaleStrings {
    fn exact(tag: &str) -> Option<&'static LocaleStrings> {
        match tag {
            "en" | "en-US" | "en-GB" => Some(&EN),
            "de" => Some(&DE),
            "es" | "es-ES" | "es-419" => Some(&ES),
            "fr" => Some(&FR),
            "pt" | "pt-BR" => Some(&PT_BR),
            "ja" => Some(&JA),
            _ => None,
        }
    }

    if let Some(strings) = exact(locale) {
        return strings;
    }
    let base = locale.split('-').next().unwrap_or("en");
    exact(base).unwrap_or(&EN)
}

pub fn action_full(action: ModAction, strings: &LocaleStrings) -> &'static str {
    match action {
        ModAction::Ban => strings.ban_full,
        ModAction::Softban => strings.softban_full,
        ModAction::Disabled => strings.disabled_full,
    }
}

pub fn action_label(action: ModAction, strings: &LocaleStrings) -> &'static str {
    match action {
        ModAction::Ban => strings.ban_label,
        ModAction::Softban => strings.softban_label,
        ModAction::Disabled => strings.disabled_label,
    }
}

pub fn action_past(action: ModAction, strings: &LocaleStrings) -> &'static str {
    match action {
        ModAction::Ban => strings.ban_past,
        ModAction::Softban => strings.softban_past,
        ModAction::Disabled => strings.disabled_label,
    }
}

/// The tracked warning message, rendered to plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub title: String,
    pub body: String,
    /// Counter button label; the visible count always equals the aggregate.
    pub counter_label: String,
}

pub fn warning_message(
    count: u64,
    action: ModAction,
    locale: &str,
    custom_text: Option<&str>,
) -> Warning {
    let strings = strings_for(locale);
    let template = custom_text.unwrap_or(strings.warning_body);
    let body = substitute(template, &[(TOKEN_ACTION, action_full(action, strings))]);
    Warning {
        title: strings.warning_title.to_string(),
        body,
        counter_label: format!("{}: {}", action_label(action, strings), count),
    }
}

/// The direct message shown to a moderated user, or the owner's preview of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDm {
    pub title: String,
    pub body: String,
}

pub fn user_dm(
    action: ModAction,
    guild_name: &str,
    message_link: &str,
    is_owner: bool,
    locale: &str,
    custom_text: Option<&str>,
) -> RenderedDm {
    let strings = strings_for(locale);
    let template = custom_text.unwrap_or(strings.dm_intro);
    let past = action_past(action, strings);
    let mut body = substitute(
        template,
        &[
            (TOKEN_ACTION, past),
            (TOKEN_GUILD, guild_name),
            (TOKEN_LINK, message_link),
        ],
    );
    body.push_str("\n\n");
    body.push_str(strings.dm_footer);
    if is_owner {
        body.push('\n');
        body.push_str(&substitute(strings.dm_owner_note, &[(TOKEN_ACTION, past)]));
    }
    RenderedDm {
        title: strings.dm_title.to_string(),
        body,
    }
}

const LOG_SUCCESS: &str =
    "User {{user:ping}} was {{action:text}} for triggering the honeypot in {{honeypot:channel:ping}}.";
const LOG_FAILURE: &str = "⚠️ User {{user:ping}} triggered the honeypot in {{honeypot:channel:ping}}, but I **failed** to act. \
Check that my role is above theirs and that I have the Ban Members permission.";
const LOG_OWNER_EXEMPT: &str = "🍯 {{user:ping}} triggered the honeypot in {{honeypot:channel:ping}}, but server owners are \
exempt — no action was taken. A bot can never moderate the server owner, regardless of role hierarchy.";

pub fn log_success(
    user_id: u64,
    channel_id: u64,
    action: ModAction,
    custom_text: Option<&str>,
) -> String {
    let template = custom_text.unwrap_or(LOG_SUCCESS);
    substitute(
        template,
        &[
            (TOKEN_USER, &format!("<@{}>", user_id)),
            (TOKEN_ACTION, action_past(action, &EN)),
            (TOKEN_CHANNEL, &format!("<#{}>", channel_id)),
        ],
    )
}

pub fn log_failure(user_id: u64, channel_id: u64) -> String {
    substitute(
        LOG_FAILURE,
        &[
            (TOKEN_USER, &format!("<@{}>", user_id)),
            (TOKEN_CHANNEL, &format!("<#{}>", channel_id)),
        ],
    )
}

pub fn log_owner_exempt(user_id: u64, channel_id: u64) -> String {
    substitute(
        LOG_OWNER_EXEMPT,
        &[
            (TOKEN_USER, &format!("<@{}>", user_id)),
            (TOKEN_CHANNEL, &format!("<#{}>", channel_id)),
        ],
    )
}

// --- serenity builders ---

fn warning_embed(warning: &Warning) -> CreateEmbed {
    CreateEmbed::new()
        .title(&warning.title)
        .description(&warning.body)
        .thumbnail(HONEY_POT_ICON)
        .color(HONEY_COLOR)
}

fn counter_row(warning: &Warning) -> CreateActionRow {
    CreateActionRow::Buttons(vec![CreateButton::new("trigger_count")
        .style(ButtonStyle::Secondary)
        .label(&warning.counter_label)
        .emoji('🍯')
        .disabled(true)])
}

pub fn warning_create(warning: &Warning) -> CreateMessage {
    CreateMessage::new()
        .embed(warning_embed(warning))
        .components(vec![counter_row(warning)])
        .allowed_mentions(CreateAllowedMentions::new())
}

pub fn warning_edit(warning: &Warning) -> EditMessage {
    EditMessage::new()
        .embed(warning_embed(warning))
        .components(vec![counter_row(warning)])
}

pub fn dm_create(dm: &RenderedDm) -> CreateMessage {
    let embed = CreateEmbed::new()
        .title(&dm.title)
        .description(&dm.body)
        .thumbnail(HONEY_POT_ICON)
        .color(HONEY_COLOR);
    CreateMessage::new()
        .embed(embed)
        .allowed_mentions(CreateAllowedMentions::new())
}

pub fn notice_create(text: &str) -> CreateMessage {
    CreateMessage::new()
        .content(text)
        .allowed_mentions(CreateAllowedMentions::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_replaces_all_occurrences() {
        let out = substitute(
            "{{user:ping}} and {{user:ping}} again",
            &[(TOKEN_USER, "<@1>")],
        );
        assert_eq!(out, "<@1> and <@1> again");
    }

    #[test]
    fn test_substitute_leaves_unknown_tokens() {
        let out = substitute("hello {{mystery:token}}", &[(TOKEN_USER, "<@1>")]);
        assert_eq!(out, "hello {{mystery:token}}");
    }

    #[test]
    fn test_custom_log_template() {
        let out = log_success(
            42,
            7,
            ModAction::Ban,
            Some("Hi {{user:ping}} - {{action:text}} in {{honeypot:channel:ping}}"),
        );
        assert_eq!(out, "Hi <@42> - banned in <#7>");
    }

    #[test]
    fn test_warning_counter_matches_count() {
        let warning = warning_message(17, ModAction::Softban, "en", None);
        assert_eq!(warning.counter_label, "Kicks: 17");
        assert!(warning.body.contains("a softban"));

        let warning = warning_message(0, ModAction::Ban, "en", None);
        assert_eq!(warning.counter_label, "Bans: 0");
        assert!(warning.body.contains("an immediate ban"));

        let warning = warning_message(3, ModAction::Disabled, "en", None);
        assert_eq!(warning.counter_label, "Triggers: 3");
    }

    #[test]
    fn test_locale_fallback_chain() {
        // Exact regional tag.
        assert_eq!(strings_for("pt-BR").ban_past, "banido");
        // Regional tag falls back to its base language.
        assert_eq!(strings_for("de-AT").ban_past, "gebannt");
        assert_eq!(strings_for("fr-CA").ban_past, "banni");
        // Unknown language falls back to English.
        assert_eq!(strings_for("xx-YY").ban_past, "banned");
        assert_eq!(strings_for("").ban_past, "banned");
    }

    #[test]
    fn test_dm_owner_variant() {
        let dm = user_dm(
            ModAction::Ban,
            "Test Guild",
            "https://discord.com/channels/1/2/3",
            true,
            "en",
            None,
        );
        assert!(dm.body.contains("**banned** from Test Guild"));
        assert!(dm.body.contains("as the owner you can't be banned"));
        assert!(dm.body.contains("Replies are not monitored"));

        let dm = user_dm(
            ModAction::Softban,
            "Test Guild",
            "https://discord.com/channels/1/2/3",
            false,
            "en",
            None,
        );
        assert!(dm.body.contains("**kicked**"));
        assert!(!dm.body.contains("example message"));
    }

    #[test]
    fn test_dm_includes_message_link() {
        let link = "https://discord.com/channels/10/20/30";
        let dm = user_dm(ModAction::Ban, "G", link, false, "en", None);
        assert!(dm.body.contains(link));
    }

    #[test]
    fn test_localized_warning() {
        let warning = warning_message(5, ModAction::Ban, "de", None);
        assert_eq!(warning.title, "KEINE NACHRICHTEN IN DIESEM KANAL SENDEN");
        assert!(warning.body.contains("ein sofortiger Bann"));
        assert_eq!(warning.counter_label, "Bannt: 5");
    }

    #[test]
    fn test_failure_and_exempt_lines() {
        let failure = log_failure(42, 7);
        assert!(failure.contains("<@42>"));
        assert!(failure.contains("<#7>"));
        assert!(failure.contains("Ban Members"));

        let exempt = log_owner_exempt(42, 7);
        assert!(exempt.contains("exempt"));
        assert!(exempt.contains("<@42>"));
    }
}
