use crate::moderation::{Experiments, ModAction};
use rusqlite::{Connection, OptionalExtension, Result};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// One configuration row per guild. All reads yield a structurally valid
/// config; partial-field updates go through the conditional clears below,
/// never through `set_config` with guessed fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildConfig {
    pub guild_id: String,
    pub honeypot_channel_id: Option<String>,
    /// Tracked warning message; only set when `honeypot_channel_id` is set.
    pub honeypot_message_id: Option<String>,
    pub log_channel_id: Option<String>,
    pub action: ModAction,
    pub experiments: Experiments,
}

impl GuildConfig {
    pub fn defaults(guild_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            honeypot_channel_id: None,
            honeypot_message_id: None,
            log_channel_id: None,
            action: ModAction::Softban,
            experiments: Experiments::default(),
        }
    }
}

/// A recently-seen message, tracked so a moderation can bulk-delete the
/// trailing hour of the user's history.
#[derive(Debug, Clone)]
pub struct CachedMessage {
    pub message_id: String,
    pub guild_id: String,
    pub channel_id: String,
    pub user_id: String,
    /// Seconds since epoch.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct GlobalStats {
    pub guilds: u64,
    /// Approximate: MAX(id) over the append-only event log.
    pub moderated: u64,
}

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn execute_init(&self) -> anyhow::Result<()> {
        info!("Database: Initializing schema...");
        let sql = "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS guild_configs (
                guild_id TEXT PRIMARY KEY,
                honeypot_channel_id TEXT,
                honeypot_message_id TEXT,
                log_channel_id TEXT,
                action TEXT NOT NULL DEFAULT 'softban',
                experiments TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS moderation_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (guild_id) REFERENCES guild_configs(guild_id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_events_guild ON moderation_events (guild_id);
            CREATE INDEX IF NOT EXISTS idx_events_user ON moderation_events (user_id);

            CREATE TABLE IF NOT EXISTS message_cache (
                message_id TEXT PRIMARY KEY,
                guild_id TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cache_guild_user ON message_cache (guild_id, user_id, timestamp);
        ";
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(sql)?;
        debug!("Database: Schema initialized successfully");
        Ok(())
    }

    // --- Guild configuration ---

    pub fn get_config(&self, guild_id: &str) -> anyhow::Result<Option<GuildConfig>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT honeypot_channel_id, honeypot_message_id, log_channel_id, action, experiments
             FROM guild_configs WHERE guild_id = ?1",
        )?;
        let config = stmt
            .query_row([guild_id], |row| {
                let action: String = row.get(3)?;
                let experiments: String = row.get(4)?;
                Ok(GuildConfig {
                    guild_id: guild_id.to_string(),
                    honeypot_channel_id: row.get(0)?,
                    honeypot_message_id: row.get(1)?,
                    log_channel_id: row.get(2)?,
                    action: ModAction::parse(&action),
                    experiments: Experiments::from_json(&experiments),
                })
            })
            .optional()?;
        Ok(config)
    }

    /// Full-row upsert. Idempotent: storing an identical config is a no-op.
    pub fn set_config(&self, config: &GuildConfig) -> anyhow::Result<()> {
        debug!("Database: Storing config for guild {}", config.guild_id);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO guild_configs (guild_id, honeypot_channel_id, honeypot_message_id, log_channel_id, action, experiments)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(guild_id) DO UPDATE SET
                honeypot_channel_id = excluded.honeypot_channel_id,
                honeypot_message_id = excluded.honeypot_message_id,
                log_channel_id = excluded.log_channel_id,
                action = excluded.action,
                experiments = excluded.experiments",
            (
                &config.guild_id,
                &config.honeypot_channel_id,
                &config.honeypot_message_id,
                &config.log_channel_id,
                config.action.as_str(),
                config.experiments.to_json(),
            ),
        )?;
        Ok(())
    }

    pub fn delete_config(&self, guild_id: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM guild_configs WHERE guild_id = ?1", [guild_id])?;
        Ok(())
    }

    pub fn list_configs(&self) -> anyhow::Result<Vec<GuildConfig>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT guild_id, honeypot_channel_id, honeypot_message_id, log_channel_id, action, experiments
             FROM guild_configs",
        )?;
        let rows = stmt.query_map([], |row| {
            let action: String = row.get(4)?;
            let experiments: String = row.get(5)?;
            Ok(GuildConfig {
                guild_id: row.get(0)?,
                honeypot_channel_id: row.get(1)?,
                honeypot_message_id: row.get(2)?,
                log_channel_id: row.get(3)?,
                action: ModAction::parse(&action),
                experiments: Experiments::from_json(&experiments),
            })
        })?;

        let mut configs = Vec::new();
        for row in rows {
            configs.push(row?);
        }
        Ok(configs)
    }

    /// Compare-and-clear: nulls the honeypot channel (and its message) only
    /// when the stored id still equals `channel_id`, so a racing
    /// reconfiguration is never clobbered. Returns whether a row changed.
    pub fn clear_honeypot_channel_if_matches(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE guild_configs SET honeypot_channel_id = NULL, honeypot_message_id = NULL
             WHERE guild_id = ?1 AND honeypot_channel_id = ?2",
            [guild_id, channel_id],
        )?;
        Ok(changed > 0)
    }

    pub fn clear_log_channel_if_matches(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE guild_configs SET log_channel_id = NULL
             WHERE guild_id = ?1 AND log_channel_id = ?2",
            [guild_id, channel_id],
        )?;
        Ok(changed > 0)
    }

    pub fn clear_message_if_matches(
        &self,
        guild_id: &str,
        message_id: &str,
    ) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE guild_configs SET honeypot_message_id = NULL
             WHERE guild_id = ?1 AND honeypot_message_id = ?2",
            [guild_id, message_id],
        )?;
        Ok(changed > 0)
    }

    // --- Moderation event log ---

    pub fn log_moderation(&self, guild_id: &str, user_id: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO moderation_events (guild_id, user_id) VALUES (?1, ?2)",
            [guild_id, user_id],
        )?;
        Ok(())
    }

    pub fn moderation_count(&self, guild_id: &str) -> anyhow::Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM moderation_events WHERE guild_id = ?1",
            [guild_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn user_moderation_count(&self, user_id: &str) -> anyhow::Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM moderation_events WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn global_stats(&self) -> anyhow::Result<GlobalStats> {
        let conn = self.conn.lock().unwrap();
        let (guilds, moderated): (u64, Option<u64>) = conn.query_row(
            "SELECT (SELECT COUNT(*) FROM guild_configs),
                    (SELECT MAX(id) FROM moderation_events)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(GlobalStats {
            guilds,
            moderated: moderated.unwrap_or(0),
        })
    }

    // --- Recent-message cache ---

    pub fn cache_message(&self, entry: &CachedMessage) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO message_cache (message_id, guild_id, channel_id, user_id, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            (
                &entry.message_id,
                &entry.guild_id,
                &entry.channel_id,
                &entry.user_id,
                entry.timestamp,
            ),
        )?;
        Ok(())
    }

    pub fn recent_messages_for_user(
        &self,
        guild_id: &str,
        user_id: &str,
        since: i64,
    ) -> anyhow::Result<Vec<CachedMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT message_id, channel_id, timestamp FROM message_cache
             WHERE guild_id = ?1 AND user_id = ?2 AND timestamp >= ?3",
        )?;
        let rows = stmt.query_map((guild_id, user_id, since), |row| {
            Ok(CachedMessage {
                message_id: row.get(0)?,
                guild_id: guild_id.to_string(),
                channel_id: row.get(1)?,
                user_id: user_id.to_string(),
                timestamp: row.get(2)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn purge_cached_before(&self, cutoff: i64) -> anyhow::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute("DELETE FROM message_cache WHERE timestamp < ?1", [cutoff])?;
        Ok(count)
    }

    pub fn forget_guild_messages(&self, guild_id: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM message_cache WHERE guild_id = ?1", [guild_id])?;
        Ok(())
    }

    pub fn forget_cached_message(&self, message_id: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM message_cache WHERE message_id = ?1", [message_id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open(":memory:").unwrap();
        db.execute_init().unwrap();
        db
    }

    fn sample_config(guild_id: &str) -> GuildConfig {
        GuildConfig {
            guild_id: guild_id.to_string(),
            honeypot_channel_id: Some("100".to_string()),
            honeypot_message_id: Some("200".to_string()),
            log_channel_id: Some("300".to_string()),
            action: ModAction::Ban,
            experiments: Experiments {
                no_dm: true,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_config_round_trip() {
        let db = test_db();
        assert!(db.get_config("g1").unwrap().is_none());

        let config = sample_config("g1");
        db.set_config(&config).unwrap();
        assert_eq!(db.get_config("g1").unwrap().unwrap(), config);
    }

    #[test]
    fn test_set_config_is_idempotent() {
        let db = test_db();
        let config = sample_config("g1");
        db.set_config(&config).unwrap();
        db.set_config(&config).unwrap();
        assert_eq!(db.get_config("g1").unwrap().unwrap(), config);
        assert_eq!(db.list_configs().unwrap().len(), 1);
    }

    #[test]
    fn test_legacy_action_collapses_on_load() {
        let db = test_db();
        {
            let conn = db.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO guild_configs (guild_id, action) VALUES ('g1', 'kick')",
                [],
            )
            .unwrap();
        }
        let config = db.get_config("g1").unwrap().unwrap();
        assert_eq!(config.action, ModAction::Softban);
    }

    #[test]
    fn test_conditional_clears() {
        let db = test_db();
        db.set_config(&sample_config("g1")).unwrap();

        // Wrong id: nothing changes.
        assert!(!db.clear_honeypot_channel_if_matches("g1", "999").unwrap());
        let config = db.get_config("g1").unwrap().unwrap();
        assert_eq!(config.honeypot_channel_id.as_deref(), Some("100"));

        // Matching id: channel and message are both cleared.
        assert!(db.clear_honeypot_channel_if_matches("g1", "100").unwrap());
        let config = db.get_config("g1").unwrap().unwrap();
        assert_eq!(config.honeypot_channel_id, None);
        assert_eq!(config.honeypot_message_id, None);
        // Log channel untouched.
        assert_eq!(config.log_channel_id.as_deref(), Some("300"));

        assert!(db.clear_log_channel_if_matches("g1", "300").unwrap());
        let config = db.get_config("g1").unwrap().unwrap();
        assert_eq!(config.log_channel_id, None);
    }

    #[test]
    fn test_clear_message_leaves_channel() {
        let db = test_db();
        db.set_config(&sample_config("g1")).unwrap();

        assert!(db.clear_message_if_matches("g1", "200").unwrap());
        let config = db.get_config("g1").unwrap().unwrap();
        assert_eq!(config.honeypot_message_id, None);
        assert_eq!(config.honeypot_channel_id.as_deref(), Some("100"));

        // Second clear is a no-op.
        assert!(!db.clear_message_if_matches("g1", "200").unwrap());
    }

    #[test]
    fn test_moderation_counts() {
        let db = test_db();
        db.set_config(&sample_config("g1")).unwrap();
        db.set_config(&sample_config("g2")).unwrap();

        assert_eq!(db.moderation_count("g1").unwrap(), 0);

        db.log_moderation("g1", "u1").unwrap();
        db.log_moderation("g1", "u2").unwrap();
        db.log_moderation("g2", "u1").unwrap();

        assert_eq!(db.moderation_count("g1").unwrap(), 2);
        assert_eq!(db.moderation_count("g2").unwrap(), 1);
        assert_eq!(db.user_moderation_count("u1").unwrap(), 2);

        let stats = db.global_stats().unwrap();
        assert_eq!(stats.guilds, 2);
        assert_eq!(stats.moderated, 3);
    }

    #[test]
    fn test_guild_delete_cascades_events() {
        let db = test_db();
        db.set_config(&sample_config("g1")).unwrap();
        db.log_moderation("g1", "u1").unwrap();

        db.delete_config("g1").unwrap();
        assert!(db.get_config("g1").unwrap().is_none());

        let conn = db.conn.lock().unwrap();
        let remaining: u64 = conn
            .query_row("SELECT COUNT(*) FROM moderation_events", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn test_message_cache() {
        let db = test_db();
        let entry = CachedMessage {
            message_id: "m1".to_string(),
            guild_id: "g1".to_string(),
            channel_id: "c1".to_string(),
            user_id: "u1".to_string(),
            timestamp: 1000,
        };
        db.cache_message(&entry).unwrap();
        db.cache_message(&CachedMessage {
            message_id: "m2".to_string(),
            timestamp: 2000,
            ..entry.clone()
        })
        .unwrap();
        db.cache_message(&CachedMessage {
            message_id: "m3".to_string(),
            user_id: "u2".to_string(),
            timestamp: 2000,
            ..entry.clone()
        })
        .unwrap();

        let recent = db.recent_messages_for_user("g1", "u1", 1500).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].message_id, "m2");

        assert_eq!(db.purge_cached_before(1500).unwrap(), 1);

        db.forget_cached_message("m2").unwrap();
        assert!(db.recent_messages_for_user("g1", "u1", 0).unwrap().is_empty());

        db.forget_guild_messages("g1").unwrap();
        assert!(db.recent_messages_for_user("g1", "u2", 0).unwrap().is_empty());
    }

    #[test]
    fn test_empty_stats() {
        let db = test_db();
        let stats = db.global_stats().unwrap();
        assert_eq!(stats.guilds, 0);
        assert_eq!(stats.moderated, 0);
    }
}
