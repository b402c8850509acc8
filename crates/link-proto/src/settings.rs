use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub const KEY_SPOTIFY_INTERCEPT: &str = "spotifyInterceptEnabled";
pub const KEY_APPLE_MUSIC_INTERCEPT: &str = "appleMusicInterceptEnabled";

/// Navigation-intercept toggles.  The only state that outlives a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterceptSettings {
    #[serde(default = "enabled")]
    pub spotify_intercept_enabled: bool,
    #[serde(default = "enabled")]
    pub apple_music_intercept_enabled: bool,
}

fn enabled() -> bool {
    true
}

impl Default for InterceptSettings {
    fn default() -> Self {
        Self {
            spotify_intercept_enabled: true,
            apple_music_intercept_enabled: true,
        }
    }
}

impl InterceptSettings {
    /// Apply a host storage-change map.  Unknown keys and non-boolean values
    /// are ignored.  Returns true if anything changed.
    pub fn apply_changes(&mut self, changes: &Map<String, Value>) -> bool {
        let before = *self;
        for (key, value) in changes {
            // change records may be either the bare value or {newValue: ..}
            let new_value = value.get("newValue").unwrap_or(value);
            let Some(flag) = new_value.as_bool() else {
                continue;
            };
            match key.as_str() {
                KEY_SPOTIFY_INTERCEPT => self.spotify_intercept_enabled = flag,
                KEY_APPLE_MUSIC_INTERCEPT => self.apple_music_intercept_enabled = flag,
                _ => {}
            }
        }
        *self != before
    }
}

/// JSON-file persistence for `InterceptSettings`.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable files fall back to defaults.
    pub fn load(&self) -> InterceptSettings {
        if let Ok(content) = std::fs::read_to_string(&self.path) {
            if let Ok(settings) = serde_json::from_str::<InterceptSettings>(&content) {
                return settings;
            }
        }
        InterceptSettings::default()
    }

    pub async fn save(&self, settings: InterceptSettings) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&settings)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_changes() {
        let mut settings = InterceptSettings::default();
        let changes = json!({
            "spotifyInterceptEnabled": {"oldValue": true, "newValue": false},
            "theme": "dark"
        });
        assert!(settings.apply_changes(changes.as_object().unwrap()));
        assert!(!settings.spotify_intercept_enabled);
        assert!(settings.apple_music_intercept_enabled);

        let changes = json!({"appleMusicInterceptEnabled": "nope"});
        assert!(!settings.apply_changes(changes.as_object().unwrap()));

        let changes = json!({"appleMusicInterceptEnabled": false});
        assert!(settings.apply_changes(changes.as_object().unwrap()));
        assert!(!settings.apple_music_intercept_enabled);
    }

    #[tokio::test]
    async fn test_store_roundtrip_and_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("nested").join("settings.json"));
        assert_eq!(store.load(), InterceptSettings::default());

        let settings = InterceptSettings {
            spotify_intercept_enabled: false,
            apple_music_intercept_enabled: true,
        };
        store.save(settings).await.unwrap();
        assert_eq!(store.load(), settings);

        std::fs::write(store.path(), "{ broken").unwrap();
        assert_eq!(store.load(), InterceptSettings::default());
    }
}
