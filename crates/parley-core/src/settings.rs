use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::config::{ClientOptions, DEFAULT_LOCALE, DEFAULT_REGION};
use crate::session::{JoinRequest, Role};

const SETTINGS_FILE: &str = "settings.json";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub last_room: Option<String>,
    #[serde(default)]
    pub join_as_host: bool,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_locale() -> String {
    DEFAULT_LOCALE.to_string()
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            display_name: None,
            last_room: None,
            join_as_host: false,
            locale: default_locale(),
            region: default_region(),
        }
    }
}

impl Settings {
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            locale: self.locale.clone(),
            region: self.region.clone(),
            ..ClientOptions::default()
        }
    }

    /// Prefill for the room-entry form from the last successful entry.
    pub fn last_join_request(&self) -> Option<JoinRequest> {
        Some(JoinRequest {
            room: self.last_room.clone()?,
            display_name: self.display_name.clone()?,
            role: if self.join_as_host { Role::Host } else { Role::Guest },
        })
    }
}

pub struct SettingsStore {
    settings: Mutex<Settings>,
    file_path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let file_path = data_dir.as_ref().join(SETTINGS_FILE);
        let settings = Self::load(&file_path);
        Self {
            settings: Mutex::new(settings),
            file_path,
        }
    }

    pub fn get(&self) -> Settings {
        self.lock().clone()
    }

    pub fn set_display_name(&self, name: Option<String>) {
        self.lock().display_name = name;
        self.save();
    }

    pub fn set_locale(&self, locale: String) {
        self.lock().locale = locale;
        self.save();
    }

    pub fn set_region(&self, region: String) {
        self.lock().region = region;
        self.save();
    }

    /// Persist the entry data of a join so the form can be prefilled next time.
    pub fn remember(&self, request: &JoinRequest) {
        {
            let mut settings = self.lock();
            settings.display_name = Some(request.display_name.clone());
            settings.last_room = Some(request.room.clone());
            settings.join_as_host = request.role == Role::Host;
        }
        self.save();
    }

    fn lock(&self) -> MutexGuard<'_, Settings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self) {
        let settings = self.get();
        if let Some(parent) = self.file_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(path = %parent.display(), "cannot create settings dir: {e}");
                return;
            }
        }
        match serde_json::to_string_pretty(&settings) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.file_path, json) {
                    tracing::warn!(path = %self.file_path.display(), "cannot write settings: {e}");
                }
            }
            Err(e) => tracing::warn!("cannot serialize settings: {e}"),
        }
    }

    fn load(path: &Path) -> Settings {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), "corrupt settings, using defaults: {e}");
                Settings::default()
            }),
            Err(_) => Settings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn test_default_settings() {
        let s = Settings::default();
        assert_eq!(s.display_name, None);
        assert_eq!(s.last_room, None);
        assert!(!s.join_as_host);
        assert_eq!(s.locale, "en-US");
        assert_eq!(s.region, "Global");
    }

    #[test]
    fn test_new_creates_defaults_when_no_file() {
        let dir = temp_dir();
        let store = SettingsStore::new(dir.path());
        assert_eq!(store.get(), Settings::default());
    }

    #[test]
    fn test_remember_persists_entry() {
        let dir = temp_dir();
        {
            let store = SettingsStore::new(dir.path());
            store.remember(&JoinRequest {
                room: "Room1".to_string(),
                display_name: "Alice".to_string(),
                role: Role::Host,
            });
        }
        let store = SettingsStore::new(dir.path());
        let request = store.get().last_join_request().unwrap();
        assert_eq!(request.room, "Room1");
        assert_eq!(request.display_name, "Alice");
        assert_eq!(request.role, Role::Host);
    }

    #[test]
    fn test_no_prefill_without_room() {
        let dir = temp_dir();
        let store = SettingsStore::new(dir.path());
        store.set_display_name(Some("Bob".to_string()));
        assert!(store.get().last_join_request().is_none());
    }

    #[test]
    fn test_locale_and_region_feed_client_options() {
        let dir = temp_dir();
        let store = SettingsStore::new(dir.path());
        store.set_locale("fr-FR".to_string());
        store.set_region("EU".to_string());

        let options = SettingsStore::new(dir.path()).get().client_options();
        assert_eq!(options.locale, "fr-FR");
        assert_eq!(options.region, "EU");
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = temp_dir();
        fs::write(dir.path().join(SETTINGS_FILE), "not json!!!").unwrap();
        let store = SettingsStore::new(dir.path());
        assert_eq!(store.get(), Settings::default());
    }

    #[test]
    fn test_partial_json_uses_serde_defaults() {
        let dir = temp_dir();
        fs::write(dir.path().join(SETTINGS_FILE), r#"{"display_name":"Eve"}"#).unwrap();
        let store = SettingsStore::new(dir.path());
        let s = store.get();
        assert_eq!(s.display_name, Some("Eve".to_string()));
        assert_eq!(s.locale, "en-US");
        assert!(!s.join_as_host);
    }
}
