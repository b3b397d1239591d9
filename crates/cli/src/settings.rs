use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use deepres_llm::{
    DEFAULT_GEMINI_MODEL, DEFAULT_OPENAI_MODEL, GEMINI_PROVIDER_ID, ProviderConfig,
    RIG_OPENAI_PROVIDER_ID,
};
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "deepres";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "DEEPRES_";

const REDACTED: &str = "<redacted>";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    /// Empty means the provider's own endpoint.
    #[serde(default)]
    pub endpoint: String,
    /// Empty means the provider's default model.
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_search_grounding")]
    pub search_grounding: bool,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: String::new(),
            model: String::new(),
            search_grounding: default_search_grounding(),
            temperature: None,
            max_tokens: None,
        }
    }
}

impl Settings {
    pub fn normalized(mut self) -> Self {
        self.provider_id = self.provider_id.trim().to_ascii_lowercase();
        if self.provider_id.is_empty() {
            self.provider_id = default_provider_id();
        }
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = self.endpoint.trim().to_string();
        self.model = self.model.trim().to_string();
        self
    }

    /// Fills an empty API key from the provider's conventional environment variables.
    pub fn with_env_api_key(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if !self.api_key.is_empty() {
            return self;
        }

        let candidates: &[&str] = match self.provider_id.as_str() {
            RIG_OPENAI_PROVIDER_ID | "rig-openai" => &["OPENAI_API_KEY"],
            _ => &["GEMINI_API_KEY", "API_KEY"],
        };
        if let Some(key) = candidates
            .iter()
            .filter_map(|name| lookup(*name))
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
        {
            self.api_key = key;
        }
        self
    }

    pub fn to_provider_config(&self) -> ProviderConfig {
        ProviderConfig::new(&self.provider_id, &self.api_key, &self.endpoint)
    }

    pub fn model_id(&self) -> String {
        if !self.model.is_empty() {
            return self.model.clone();
        }
        match self.provider_id.as_str() {
            RIG_OPENAI_PROVIDER_ID | "rig-openai" => DEFAULT_OPENAI_MODEL.to_string(),
            _ => DEFAULT_GEMINI_MODEL.to_string(),
        }
    }

    pub fn redacted(&self) -> Self {
        let mut settings = self.clone();
        if !settings.api_key.is_empty() {
            settings.api_key = REDACTED.to_string();
        }
        settings
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<Settings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".deepres"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    /// Loads the settings file at `config_path`, layered under `DEEPRES_*` variables.
    pub fn new(config_path: PathBuf) -> Self {
        let figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Json::file(&config_path))
            .merge(Env::prefixed(ENV_PREFIX));
        let settings = Self::extract(figment, &config_path)
            .with_env_api_key(|name| std::env::var(name).ok());
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: Settings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn extract(figment: Figment, path: &Path) -> Settings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
        }

        match figment.extract::<Settings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                Settings::default()
            }
        }
    }

    fn persist(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_provider_id() -> String {
    GEMINI_PROVIDER_ID.to_string()
}

fn default_search_grounding() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default())).merge(Json::file(path))
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join(SETTINGS_FILE_NAME);

        let settings = SettingsStore::extract(file_figment(&path), &path);
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.model_id(), DEFAULT_GEMINI_MODEL);
    }

    #[test]
    fn partial_file_is_layered_over_defaults_and_normalized() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(
            &path,
            r#"{"provider_id": " OpenAI ", "api_key": " sk-test ", "temperature": 0.3}"#,
        )
        .expect("write settings");

        let settings = SettingsStore::extract(file_figment(&path), &path);
        assert_eq!(settings.provider_id, "openai");
        assert_eq!(settings.api_key, "sk-test");
        assert_eq!(settings.temperature, Some(0.3));
        assert!(settings.search_grounding);
        assert_eq!(settings.model_id(), DEFAULT_OPENAI_MODEL);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, "{ not json").expect("write settings");

        let settings = SettingsStore::extract(file_figment(&path), &path);
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn env_key_fallback_respects_provider_and_explicit_key() {
        let lookup = |name: &str| match name {
            "GEMINI_API_KEY" => Some("  ".to_string()),
            "API_KEY" => Some("from-api-key".to_string()),
            "OPENAI_API_KEY" => Some("from-openai".to_string()),
            _ => None,
        };

        let gemini = Settings::default().with_env_api_key(lookup);
        assert_eq!(gemini.api_key, "from-api-key");

        let openai = Settings {
            provider_id: "openai".to_string(),
            ..Settings::default()
        }
        .with_env_api_key(lookup);
        assert_eq!(openai.api_key, "from-openai");

        let explicit = Settings {
            api_key: "explicit".to_string(),
            ..Settings::default()
        }
        .with_env_api_key(lookup);
        assert_eq!(explicit.api_key, "explicit");
    }

    #[test]
    fn update_persists_atomically_and_reloads() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join(SETTINGS_FILE_NAME);
        let store = SettingsStore {
            settings: Arc::new(ArcSwap::from_pointee(Settings::default())),
            config_path: path.clone(),
        };

        store
            .update(Settings {
                model: " gemini-2.5-pro ".to_string(),
                max_tokens: Some(4096),
                ..Settings::default()
            })
            .expect("settings should persist");

        assert_eq!(store.settings().model, "gemini-2.5-pro");
        assert!(!path.with_extension("json.tmp").exists());

        let reloaded = SettingsStore::extract(file_figment(&path), &path);
        assert_eq!(reloaded.model, "gemini-2.5-pro");
        assert_eq!(reloaded.max_tokens, Some(4096));
    }

    #[test]
    fn redaction_hides_only_present_keys() {
        let with_key = Settings {
            api_key: "secret".to_string(),
            ..Settings::default()
        };
        assert_eq!(with_key.redacted().api_key, REDACTED);
        assert_eq!(Settings::default().redacted().api_key, "");
    }
}
