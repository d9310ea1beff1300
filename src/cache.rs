use lru::LruCache;
use poise::serenity_prelude as serenity;
use serenity::{ChannelId, GuildId, Http, PartialGuild, UserId};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tracing::debug;

/// The slice of guild metadata the trigger pipeline needs without a network
/// round-trip: owner identity for the exemption rule, name/invite/locale for
/// the DM. Staleness is fine; guild-update events refresh entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildInfo {
    pub name: String,
    pub owner_id: UserId,
    pub vanity_code: Option<String>,
    pub preferred_locale: String,
}

impl From<&PartialGuild> for GuildInfo {
    fn from(guild: &PartialGuild) -> Self {
        Self {
            name: guild.name.clone(),
            owner_id: guild.owner_id,
            vanity_code: guild.vanity_url_code.clone(),
            preferred_locale: guild.preferred_locale.clone(),
        }
    }
}

pub struct GuildInfoCache {
    inner: RwLock<HashMap<GuildId, GuildInfo>>,
    fetch_timeout: Duration,
}

impl GuildInfoCache {
    pub fn new(fetch_timeout: Duration) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            fetch_timeout,
        }
    }

    pub fn get(&self, guild_id: GuildId) -> Option<GuildInfo> {
        self.inner.read().unwrap().get(&guild_id).cloned()
    }

    pub fn insert(&self, guild_id: GuildId, info: GuildInfo) {
        self.inner.write().unwrap().insert(guild_id, info);
    }

    pub fn invalidate(&self, guild_id: GuildId) {
        self.inner.write().unwrap().remove(&guild_id);
    }

    /// Cache-first lookup with a bounded live fetch on miss. A miss that also
    /// fails (or times out) the fetch yields None; callers degrade gracefully.
    pub async fn get_or_fetch(&self, http: &Http, guild_id: GuildId) -> Option<GuildInfo> {
        if let Some(info) = self.get(guild_id) {
            return Some(info);
        }

        let fetched =
            tokio::time::timeout(self.fetch_timeout, guild_id.to_partial_guild(http)).await;
        match fetched {
            Ok(Ok(guild)) => {
                let info = GuildInfo::from(&guild);
                self.insert(guild_id, info.clone());
                Some(info)
            }
            Ok(Err(e)) => {
                debug!("Guild info fetch failed for {}: {}", guild_id, e);
                None
            }
            Err(_) => {
                debug!("Guild info fetch timed out for {}", guild_id);
                None
            }
        }
    }
}

/// Bounded negative cache of channel ids already known not to be a honeypot
/// channel, so ordinary chatter skips the config lookup. Cleared whenever any
/// guild's honeypot channel may have changed.
pub struct ChannelProbeCache {
    inner: Mutex<LruCache<ChannelId, ()>>,
}

impl ChannelProbeCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1024).unwrap());
        Self {
            inner: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn contains(&self, channel_id: ChannelId) -> bool {
        self.inner.lock().unwrap().get(&channel_id).is_some()
    }

    pub fn remember(&self, channel_id: ChannelId) {
        self.inner.lock().unwrap().put(channel_id, ());
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(owner: u64) -> GuildInfo {
        GuildInfo {
            name: "Test".to_string(),
            owner_id: UserId::new(owner),
            vanity_code: None,
            preferred_locale: "en-US".to_string(),
        }
    }

    #[test]
    fn test_guild_cache_insert_get_invalidate() {
        let cache = GuildInfoCache::new(Duration::from_millis(100));
        let guild = GuildId::new(1);

        assert!(cache.get(guild).is_none());

        cache.insert(guild, info(42));
        assert_eq!(cache.get(guild).unwrap().owner_id, UserId::new(42));

        // Updates overwrite.
        cache.insert(guild, info(43));
        assert_eq!(cache.get(guild).unwrap().owner_id, UserId::new(43));

        cache.invalidate(guild);
        assert!(cache.get(guild).is_none());
    }

    #[test]
    fn test_probe_cache_bounds_and_clear() {
        let probe = ChannelProbeCache::new(2);
        let c1 = ChannelId::new(1);
        let c2 = ChannelId::new(2);
        let c3 = ChannelId::new(3);

        probe.remember(c1);
        probe.remember(c2);
        assert!(probe.contains(c1));
        assert!(probe.contains(c2));

        // Capacity 2: inserting a third evicts the least recently used.
        probe.remember(c3);
        let held = [c1, c2, c3].iter().filter(|c| probe.contains(**c)).count();
        assert_eq!(held, 2);

        probe.clear();
        assert!(!probe.contains(c3));
    }
}
