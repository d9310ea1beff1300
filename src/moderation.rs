use tracing::warn;

/// What happens to a user who posts in the honeypot channel.
///
/// Earlier deployments also knew `kick` and `timeout`; both collapse to
/// [`ModAction::Softban`] when loaded from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, poise::ChoiceParameter)]
pub enum ModAction {
    #[name = "ban"]
    Ban,
    #[name = "softban"]
    Softban,
    #[name = "disabled"]
    Disabled,
}

impl Default for ModAction {
    fn default() -> Self {
        ModAction::Softban
    }
}

impl ModAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ModAction::Ban => "ban",
            ModAction::Softban => "softban",
            ModAction::Disabled => "disabled",
        }
    }

    /// Parses a stored action string, collapsing legacy synonyms.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "ban" => ModAction::Ban,
            "softban" | "kick" | "timeout" => ModAction::Softban,
            "disabled" => ModAction::Disabled,
            other => {
                warn!("Unknown stored action '{}', treating as softban", other);
                ModAction::Softban
            }
        }
    }

    pub fn is_disabled(self) -> bool {
        self == ModAction::Disabled
    }
}

/// Per-guild opt-in feature flags. Orthogonal toggles; unknown flags in
/// storage are ignored so older rows survive upgrades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Experiments {
    /// Skip the direct message to the moderated user.
    pub no_dm: bool,
    /// Skip posting/updating the warning message and the exempt/failure notices.
    pub no_warning_message: bool,
    /// Daily throwaway post in the honeypot channel.
    pub keep_alive: bool,
    /// Daily rotation through the channel-name list.
    pub rotate_name: bool,
    /// Daily random pick from the channel-name list.
    pub chaos_rename: bool,
}

impl Experiments {
    pub const NO_DM: &'static str = "no_dm";
    pub const NO_WARNING_MESSAGE: &'static str = "no_warning_message";
    pub const KEEP_ALIVE: &'static str = "keep_alive";
    pub const ROTATE_NAME: &'static str = "rotate_name";
    pub const CHAOS_RENAME: &'static str = "chaos_rename";

    /// Parses the stored JSON array of flag names. Malformed input yields the
    /// empty set rather than an error.
    pub fn from_json(raw: &str) -> Self {
        let names: Vec<String> = serde_json::from_str(raw).unwrap_or_default();
        let mut flags = Self::default();
        for name in &names {
            match name.as_str() {
                Self::NO_DM => flags.no_dm = true,
                Self::NO_WARNING_MESSAGE => flags.no_warning_message = true,
                Self::KEEP_ALIVE => flags.keep_alive = true,
                Self::ROTATE_NAME => flags.rotate_name = true,
                Self::CHAOS_RENAME => flags.chaos_rename = true,
                _ => {}
            }
        }
        flags
    }

    pub fn to_json(self) -> String {
        serde_json::to_string(&self.enabled_names()).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn enabled_names(self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.no_dm {
            names.push(Self::NO_DM);
        }
        if self.no_warning_message {
            names.push(Self::NO_WARNING_MESSAGE);
        }
        if self.keep_alive {
            names.push(Self::KEEP_ALIVE);
        }
        if self.rotate_name {
            names.push(Self::ROTATE_NAME);
        }
        if self.chaos_rename {
            names.push(Self::CHAOS_RENAME);
        }
        names
    }

    /// Whether the daily sweep has anything to do for this guild.
    pub fn any_periodic(self) -> bool {
        self.keep_alive || self.rotate_name || self.chaos_rename
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_round_trip() {
        for action in [ModAction::Ban, ModAction::Softban, ModAction::Disabled] {
            assert_eq!(ModAction::parse(action.as_str()), action);
        }
    }

    #[test]
    fn test_legacy_actions_collapse_to_softban() {
        assert_eq!(ModAction::parse("kick"), ModAction::Softban);
        assert_eq!(ModAction::parse("timeout"), ModAction::Softban);
        assert_eq!(ModAction::parse("something_new"), ModAction::Softban);
    }

    #[test]
    fn test_experiments_round_trip() {
        let flags = Experiments {
            no_dm: true,
            keep_alive: true,
            ..Default::default()
        };
        let parsed = Experiments::from_json(&flags.to_json());
        assert_eq!(parsed, flags);
    }

    #[test]
    fn test_experiments_tolerate_unknown_and_garbage() {
        let parsed = Experiments::from_json(r#"["no_dm", "flux_capacitor"]"#);
        assert!(parsed.no_dm);
        assert!(!parsed.keep_alive);

        assert_eq!(Experiments::from_json("not json"), Experiments::default());
        assert_eq!(Experiments::from_json("[]"), Experiments::default());
    }

    #[test]
    fn test_any_periodic() {
        assert!(!Experiments { no_dm: true, ..Default::default() }.any_periodic());
        assert!(Experiments { rotate_name: true, ..Default::default() }.any_periodic());
        assert!(Experiments { chaos_rename: true, ..Default::default() }.any_periodic());
    }
}
