//! Settings persisted as a JSON extension-settings file.

use anyhow::{Context, Result};
use log::{debug, warn};
use polisher_core::{PolisherSettings, SettingsPersistence};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "ai-polisher";
const SETTINGS_FILE: &str = "settings.json";

pub fn default_settings_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("No configuration directory available on this system")?;
    Ok(base.join(APP_DIR).join(SETTINGS_FILE))
}

/// `{ "<module>": { ...settings } }` on disk. Other top-level keys are preserved.
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_root(&self) -> Result<Value> {
        if !self.path.exists() {
            return Ok(Value::Object(Map::new()));
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings file {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("Settings file {} is not valid JSON", self.path.display()))
    }

    fn write_root(&self, root: &Value) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let body = serde_json::to_string_pretty(root)?;
        fs::write(&self.path, body)
            .with_context(|| format!("Failed to write settings file {}", self.path.display()))
    }

    /// Load with per-key defaults and write the merged record back.
    pub fn load(&self) -> Result<PolisherSettings> {
        let mut root = self.read_root()?;
        let settings = PolisherSettings::load_from_extension_settings(&mut root);
        self.write_root(&root)?;
        debug!("Settings loaded: path={}", self.path.display());
        Ok(settings)
    }

    fn save_module(&self, module: &str, settings: &Value) -> Result<()> {
        let mut root = self.read_root()?;
        if !root.is_object() {
            root = Value::Object(Map::new());
        }
        if let Value::Object(sections) = &mut root {
            sections.insert(module.to_string(), settings.clone());
        }
        self.write_root(&root)
    }
}

impl SettingsPersistence for SettingsFile {
    fn save_settings_debounced(&self, module: &str, settings: &Value) {
        if let Err(e) = self.save_module(module, settings) {
            warn!("Failed to persist settings: path={}, error={:#}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polisher_core::MODULE_NAME;
    use serde_json::json;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("polisher-cli-test-{}-{}", std::process::id(), name))
            .join(SETTINGS_FILE)
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let path = scratch_path("missing");
        let _ = fs::remove_file(&path);
        let file = SettingsFile::new(&path);

        let settings = file.load().unwrap();

        assert_eq!(settings, PolisherSettings::default());
        let written: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written[MODULE_NAME]["model"], "gpt-4o-mini");
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn saving_keeps_other_sections() {
        let path = scratch_path("sections");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"other": {"keep": 1}}"#).unwrap();
        let file = SettingsFile::new(&path);

        file.save_settings_debounced(MODULE_NAME, &json!({ "enabled": true }));

        let written: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["other"]["keep"], 1);
        assert_eq!(written[MODULE_NAME]["enabled"], true);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
