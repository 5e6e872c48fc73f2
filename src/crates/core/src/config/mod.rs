//! Polisher settings
//!
//! Stored by the host under [`MODULE_NAME`] in its extension-settings object. Loaded once at startup,
//! mutated in place through [`SettingsHandle`], persisted by the host.

use crate::util::errors::{PolishError, PolishResult};
use log::{debug, warn};
use polisher_ai_adapters::ApiTarget;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, PoisonError, RwLock};

pub const MODULE_NAME: &str = "ai_polisher";
pub const DEFAULT_API_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_RENDER_SETTLE_MS: u64 = 300;
pub const MAX_TEMPERATURE: f32 = 2.0;

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a professional text-polishing assistant. Your task is to polish the [Text to polish] section so that it reads more fluently, vividly and expressively.

## Important rules

### Special formats that must be kept verbatim (output them unchanged):
- Double-brace macros: {{user}}, {{char}}, {{random}}, {{roll}}, {{input}} and similar
- XML-style tags: <thinking>, </thinking>, <hidden>, </hidden> and any other tag
- Bracketed content: [OOC: ...], [scene notes] and similar
- Code blocks wrapped in ```
- Structured content marked with symbols such as ★, ● or ■
- Roleplay formatting: *actions*, **emphasis** and similar

### Polishing requirements:
1. Only polish the [Text to polish] section; the [Context] section is reference for the storyline only
2. Keep the core meaning, plot and character personalities unchanged
3. Improve fluency and readability
4. Make descriptions more vivid and engaging
5. Output the polished text directly, without explanations or notes
6. Do not repeat anything already present in the [Context] section"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolisherSettings {
    /// Automatic polishing of newly arrived assistant messages.
    pub enabled: bool,
    pub api_endpoint: String,
    pub api_key: String,
    pub model: String,
    pub system_prompt: String,
    pub stream_enabled: bool,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Prior assistant messages sent as continuity context; 0 disables context.
    pub context_messages: u32,
    pub show_placeholder: bool,
    /// Fallback delay between arrival and polishing for hosts without a rendered notification.
    pub render_settle_ms: u64,
    /// Last fetched model list.
    pub available_models: Vec<String>,
}

impl Default for PolisherSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            stream_enabled: true,
            max_tokens: 4096,
            temperature: 0.7,
            context_messages: 3,
            show_placeholder: true,
            render_settle_ms: DEFAULT_RENDER_SETTLE_MS,
            available_models: Vec::new(),
        }
    }
}

impl PolisherSettings {
    /// Read the module's object out of the host's extension settings.
    ///
    /// Missing keys take their default; a key whose value does not fit its type is ignored with a
    /// warning. The merged object is written back so the host persists a complete record.
    pub fn load_from_extension_settings(root: &mut Value) -> Self {
        let defaults = Self::default();
        let Ok(Value::Object(mut merged)) = serde_json::to_value(&defaults) else {
            return defaults;
        };

        if let Some(Value::Object(stored)) = root.get(MODULE_NAME) {
            for (key, value) in stored {
                if !merged.contains_key(key) {
                    debug!("Keeping unknown polisher setting untouched: key={}", key);
                    continue;
                }
                if Self::accepts(&merged, key, value) {
                    merged.insert(key.clone(), value.clone());
                } else {
                    warn!("Ignoring invalid polisher setting, using default: key={}", key);
                }
            }
        }

        let settings = serde_json::from_value::<Self>(Value::Object(merged))
            .unwrap_or(defaults)
            .normalized();
        settings.store_into(root);
        settings
    }

    fn accepts(base: &Map<String, Value>, key: &str, value: &Value) -> bool {
        let mut candidate = base.clone();
        candidate.insert(key.to_string(), value.clone());
        serde_json::from_value::<Self>(Value::Object(candidate)).is_ok()
    }

    /// Write every field into `root[MODULE_NAME]`, keeping keys this version does not know.
    pub fn store_into(&self, root: &mut Value) {
        if !root.is_object() {
            *root = Value::Object(Map::new());
        }
        let Value::Object(sections) = root else {
            return;
        };

        let entry = sections
            .entry(MODULE_NAME)
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }

        match (entry, serde_json::to_value(self)) {
            (Value::Object(target), Ok(Value::Object(fields))) => {
                for (key, value) in fields {
                    target.insert(key, value);
                }
            }
            (_, Err(e)) => warn!("Failed to serialize polisher settings: {}", e),
            _ => {}
        }
    }

    pub fn normalized(mut self) -> Self {
        self.temperature = if self.temperature.is_finite() {
            self.temperature.clamp(0.0, MAX_TEMPERATURE)
        } else {
            Self::default().temperature
        };
        self.max_tokens = self.max_tokens.max(1);
        self
    }

    /// Endpoint and credential, or `PolishError::Config` when either is missing.
    pub fn api_target(&self) -> PolishResult<ApiTarget> {
        ApiTarget::new(&self.api_endpoint, &self.api_key).map_err(PolishError::from)
    }

    /// Set one field by its camelCase key from a JSON value.
    pub fn apply_field(&mut self, key: &str, value: Value) -> PolishResult<()> {
        let Value::Object(mut fields) = serde_json::to_value(&*self)? else {
            return Err(PolishError::Unexpected(
                "settings did not serialize to an object".to_string(),
            ));
        };
        if !fields.contains_key(key) {
            return Err(PolishError::Config(format!("Unknown setting: {}", key)));
        }

        fields.insert(key.to_string(), value);
        let updated: Self = serde_json::from_value(Value::Object(fields))
            .map_err(|e| PolishError::Config(format!("Invalid value for {}: {}", key, e)))?;
        *self = updated.normalized();
        Ok(())
    }
}

/// Host-side persistence of the settings object.
pub trait SettingsPersistence: Send + Sync {
    /// Hosts are free to debounce; the latest call wins.
    fn save_settings_debounced(&self, module: &str, settings: &Value);
}

/// Process-wide settings, mutated in place and persisted after every change.
#[derive(Clone)]
pub struct SettingsHandle {
    inner: Arc<RwLock<PolisherSettings>>,
    persistence: Arc<dyn SettingsPersistence>,
}

impl SettingsHandle {
    pub fn new(settings: PolisherSettings, persistence: Arc<dyn SettingsPersistence>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings.normalized())),
            persistence,
        }
    }

    pub fn snapshot(&self) -> PolisherSettings {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update<F>(&self, apply: F) -> PolisherSettings
    where
        F: FnOnce(&mut PolisherSettings),
    {
        let updated = {
            let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            apply(&mut guard);
            *guard = guard.clone().normalized();
            guard.clone()
        };
        self.persist(&updated);
        updated
    }

    pub fn apply_field(&self, key: &str, value: Value) -> PolishResult<PolisherSettings> {
        let updated = {
            let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            guard.apply_field(key, value)?;
            guard.clone()
        };
        self.persist(&updated);
        Ok(updated)
    }

    fn persist(&self, settings: &PolisherSettings) {
        match serde_json::to_value(settings) {
            Ok(value) => self.persistence.save_settings_debounced(MODULE_NAME, &value),
            Err(e) => warn!("Failed to serialize polisher settings: {}", e),
        }
    }
}
