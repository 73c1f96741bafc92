//! Effective-settings resolution.
//!
//! A channel's effective settings are the shallow merge of four layers,
//! left to right: system defaults, the guild's default channel settings,
//! guild-wide overrides, channel overrides. The md5 of the canonical
//! (sorted-key) JSON of the result is stored on every clip so a later pass
//! can tell whether the clip was processed under the current configuration.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use db::repositories::SettingsRepository;
use serde_json::{Map, Value};
use sqlx::PgPool;
use tracing::warn;

pub const DEFAULT_ALLOWED_MIME_TYPES: &[&str] = &[
    "video/mp4",
    "video/quicktime",
    "video/webm",
    "video/x-msvideo",
];

const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Merged view of the settings layers for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSettings {
    merged: Map<String, Value>,
}

impl ResolvedSettings {
    pub fn from_layers(layers: &[&Value]) -> Self {
        let mut merged = system_defaults();
        for layer in layers {
            if let Value::Object(map) = layer {
                for (key, value) in map {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        Self { merged }
    }

    pub fn allowed_mime_types(&self) -> Vec<String> {
        match self.merged.get("allowed_mime_types") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => DEFAULT_ALLOWED_MIME_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn match_regex(&self) -> Option<&str> {
        self.merged.get("match_regex").and_then(|v| v.as_str())
    }

    pub fn enable_message_content_storage(&self) -> bool {
        self.merged
            .get("enable_message_content_storage")
            .and_then(|v| v.as_bool())
            .unwrap_or(true)
    }

    /// md5 over the canonical JSON rendering. serde_json's default map is
    /// ordered by key, so equal settings hash identically on every worker.
    pub fn settings_hash(&self) -> String {
        let canonical = serde_json::to_string(&Value::Object(self.merged.clone()))
            .expect("settings map serializes");
        format!("{:x}", md5::compute(canonical.as_bytes()))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.merged
    }
}

/// Hardcoded base layer, optionally extended from `DEFAULT_SETTINGS_PATH`.
fn system_defaults() -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(
        "allowed_mime_types".into(),
        Value::Array(
            DEFAULT_ALLOWED_MIME_TYPES
                .iter()
                .map(|s| Value::String(s.to_string()))
                .collect(),
        ),
    );
    map.insert("match_regex".into(), Value::Null);
    map.insert("enable_message_content_storage".into(), Value::Bool(true));
    map
}

fn load_default_overrides() -> Value {
    let Ok(path) = std::env::var("DEFAULT_SETTINGS_PATH") else {
        return Value::Null;
    };
    match std::fs::read_to_string(&path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                warn!("Ignoring malformed settings file {}: {}", path, err);
                Value::Null
            }
        },
        Err(err) => {
            warn!("Could not read settings file {}: {}", path, err);
            Value::Null
        }
    }
}

struct CachedEntry {
    resolved: ResolvedSettings,
    cached_at: Instant,
}

/// Process-local TTL cache keyed by `(guild_id, channel_id)`.
///
/// All operations hold the single mutex only long enough to copy or prune
/// entries; misses never block other callers, so concurrent misses on the
/// same key may each fetch. The results are equal, which makes that safe.
pub struct SettingsCache {
    ttl: Duration,
    entries: Mutex<HashMap<(String, String), CachedEntry>>,
}

impl SettingsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, guild_id: &str, channel_id: &str) -> Option<ResolvedSettings> {
        let entries = self.entries.lock().expect("settings cache poisoned");
        let entry = entries.get(&(guild_id.to_string(), channel_id.to_string()))?;
        if entry.cached_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.resolved.clone())
    }

    pub fn insert(&self, guild_id: &str, channel_id: &str, resolved: ResolvedSettings) {
        let mut entries = self.entries.lock().expect("settings cache poisoned");
        entries.insert(
            (guild_id.to_string(), channel_id.to_string()),
            CachedEntry {
                resolved,
                cached_at: Instant::now(),
            },
        );
    }

    pub fn invalidate_channel(&self, guild_id: &str, channel_id: &str) {
        let mut entries = self.entries.lock().expect("settings cache poisoned");
        entries.remove(&(guild_id.to_string(), channel_id.to_string()));
    }

    pub fn invalidate_guild(&self, guild_id: &str) {
        let mut entries = self.entries.lock().expect("settings cache poisoned");
        entries.retain(|(g, _), _| g != guild_id);
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock().expect("settings cache poisoned");
        entries.clear();
    }
}

/// Resolver over the settings tables with the TTL cache in front.
pub struct SettingsResolver {
    pool: PgPool,
    cache: SettingsCache,
    default_overrides: Value,
}

impl SettingsResolver {
    pub fn new(pool: PgPool) -> Self {
        let ttl_secs = std::env::var("SETTINGS_CACHE_TTL_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_CACHE_TTL_SECS);
        Self {
            pool,
            cache: SettingsCache::new(Duration::from_secs(ttl_secs)),
            default_overrides: load_default_overrides(),
        }
    }

    pub async fn resolve(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<ResolvedSettings, sqlx::Error> {
        if let Some(cached) = self.cache.get(guild_id, channel_id) {
            return Ok(cached);
        }

        let guild_row = SettingsRepository::guild_settings(&self.pool, guild_id).await?;
        let channel_row = SettingsRepository::channel_settings(&self.pool, channel_id).await?;

        let guild_defaults = guild_row
            .as_ref()
            .map(|r| r.default_channel_settings.0.clone())
            .unwrap_or(Value::Null);
        let guild_overrides = guild_row
            .as_ref()
            .map(|r| r.settings.0.clone())
            .unwrap_or(Value::Null);
        let channel_overrides = channel_row
            .as_ref()
            .map(|r| r.settings.0.clone())
            .unwrap_or(Value::Null);

        let resolved = ResolvedSettings::from_layers(&[
            &self.default_overrides,
            &guild_defaults,
            &guild_overrides,
            &channel_overrides,
        ]);

        self.cache.insert(guild_id, channel_id, resolved.clone());
        Ok(resolved)
    }

    pub fn invalidate_channel(&self, guild_id: &str, channel_id: &str) {
        self.cache.invalidate_channel(guild_id, channel_id);
    }

    pub fn invalidate_guild(&self, guild_id: &str) {
        self.cache.invalidate_guild(guild_id);
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_apply_when_no_layers_set_keys() {
        let resolved = ResolvedSettings::from_layers(&[]);
        assert_eq!(
            resolved.allowed_mime_types(),
            DEFAULT_ALLOWED_MIME_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
        );
        assert_eq!(resolved.match_regex(), None);
        assert!(resolved.enable_message_content_storage());
    }

    #[test]
    fn later_layers_override_earlier_ones() {
        let guild_defaults = json!({"match_regex": "clip", "enable_message_content_storage": false});
        let guild = json!({"match_regex": "video"});
        let channel = json!({"allowed_mime_types": ["video/webm"]});
        let resolved = ResolvedSettings::from_layers(&[&guild_defaults, &guild, &channel]);

        assert_eq!(resolved.match_regex(), Some("video"));
        assert!(!resolved.enable_message_content_storage());
        assert_eq!(resolved.allowed_mime_types(), vec!["video/webm".to_string()]);
    }

    #[test]
    fn hash_is_stable_across_layer_expression_order() {
        // Two equal merged maps built from differently ordered inputs.
        let a = ResolvedSettings::from_layers(&[
            &json!({"match_regex": "x"}),
            &json!({"enable_message_content_storage": false}),
        ]);
        let b = ResolvedSettings::from_layers(&[
            &json!({"enable_message_content_storage": false}),
            &json!({"match_regex": "x"}),
        ]);
        assert_eq!(a.settings_hash(), b.settings_hash());
    }

    #[test]
    fn hash_changes_when_a_setting_changes() {
        let a = ResolvedSettings::from_layers(&[&json!({"match_regex": "x"})]);
        let b = ResolvedSettings::from_layers(&[&json!({"match_regex": "y"})]);
        assert_ne!(a.settings_hash(), b.settings_hash());
    }

    #[test]
    fn hash_is_md5_of_canonical_json() {
        let resolved = ResolvedSettings::from_layers(&[]);
        let canonical =
            serde_json::to_string(&Value::Object(resolved.as_map().clone())).unwrap();
        let expected = format!("{:x}", md5::compute(canonical.as_bytes()));
        assert_eq!(resolved.settings_hash(), expected);
    }

    #[test]
    fn canonical_json_round_trips() {
        let resolved = ResolvedSettings::from_layers(&[&json!({
            "allowed_mime_types": ["video/webm", "video/mp4"],
            "match_regex": "clip",
            "custom_option": {"nested": [1, 2, 3]}
        })]);
        let canonical =
            serde_json::to_string(&Value::Object(resolved.as_map().clone())).unwrap();
        let reparsed: Value = serde_json::from_str(&canonical).unwrap();
        assert_eq!(reparsed, Value::Object(resolved.as_map().clone()));
    }

    #[test]
    fn cache_hit_and_expiry() {
        let cache = SettingsCache::new(Duration::from_millis(50));
        let resolved = ResolvedSettings::from_layers(&[]);

        cache.insert("g1", "c1", resolved.clone());
        assert_eq!(cache.get("g1", "c1"), Some(resolved));

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get("g1", "c1"), None);
    }

    #[test]
    fn guild_invalidation_removes_all_channels() {
        let cache = SettingsCache::new(Duration::from_secs(60));
        let resolved = ResolvedSettings::from_layers(&[]);

        cache.insert("g1", "c1", resolved.clone());
        cache.insert("g1", "c2", resolved.clone());
        cache.insert("g2", "c3", resolved.clone());

        cache.invalidate_guild("g1");
        assert!(cache.get("g1", "c1").is_none());
        assert!(cache.get("g1", "c2").is_none());
        assert!(cache.get("g2", "c3").is_some());

        cache.invalidate_channel("g2", "c3");
        assert!(cache.get("g2", "c3").is_none());
    }
}
