use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use color_eyre::{
    Result,
    eyre::{WrapErr as _, eyre},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    image_model::{
        Model,
        replicate::{DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT},
    },
    llm::open_ai_chat::{GEMINI_BASE_URL, GEMINI_MODEL},
    prompt_templates::DEFAULT_TEMPLATES_PATH,
};

pub const CONFIG_FILE_NAME: &str = "sticker_engine.ron";
pub const REPLICATE_TOKEN_VAR: &str = "REPLICATE_API_TOKEN";
pub const GEMINI_KEY_VAR: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub replicate_token: Option<String>,
    pub llm: Option<LlmConfig>,
    pub default_model: Model,
    pub poll_interval_ms: u64,
    pub generation_timeout_secs: u64,
    pub templates_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            replicate_token: None,
            llm: None,
            default_model: Model::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            generation_timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            templates_path: DEFAULT_TEMPLATES_PATH.into(),
        }
    }
}

/// Any OpenAI-compatible chat endpoint, Gemini's by default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    pub api_key: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
}

fn default_llm_base_url() -> String {
    GEMINI_BASE_URL.into()
}

fn default_llm_model() -> String {
    GEMINI_MODEL.into()
}

impl LlmConfig {
    pub fn gemini(api_key: String) -> Self {
        Self {
            api_key,
            base_url: default_llm_base_url(),
            model: default_llm_model(),
        }
    }
}

impl Config {
    pub fn replicate_token(&self) -> Result<String> {
        self.replicate_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(eyre!(
                "No Replicate API token configured, set {REPLICATE_TOKEN_VAR} or add it to {}",
                CONFIG_FILE_NAME
            ))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    /// Applies `REPLICATE_API_TOKEN` and `GEMINI_API_KEY` from the process
    /// environment on top of the file values.
    pub fn with_env_overrides(self) -> Self {
        self.apply_env(|name| std::env::var(name).ok())
    }

    fn apply_env(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(token) = var(REPLICATE_TOKEN_VAR).filter(|t| !t.is_empty()) {
            self.replicate_token = Some(token);
        }

        if let Some(key) = var(GEMINI_KEY_VAR).filter(|k| !k.is_empty()) {
            match &mut self.llm {
                Some(llm) => llm.api_key = key,
                None => self.llm = Some(LlmConfig::gemini(key)),
            }
        }
        self
    }
}

pub fn load_ron_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let src = fs::read_to_string(path)?;
    Ok(ron::from_str(&src).with_context(|| format!("parsing {path:?}"))?)
}

pub fn save_ron_file<T: Serialize>(path: &Path, x: &T) -> Result<()> {
    let src = ron::ser::to_string_pretty(x, ron::ser::PrettyConfig::default())?;
    Ok(fs::write(path, src)?)
}

pub fn config_path() -> Result<PathBuf> {
    Ok(dirs::config_local_dir()
        .ok_or(eyre!("Couldn't get config dir"))?
        .join(CONFIG_FILE_NAME))
}

pub fn load_config() -> Result<Option<Config>> {
    let path = config_path()?;
    if !path.exists() {
        Ok(None)
    } else {
        load_ron_file(&path).map(Some)
    }
}

pub fn save_config(cfg: &Config) -> Result<()> {
    save_config_to(&config_path()?, cfg)
}

fn save_config_to(path: &Path, cfg: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {parent:?}"))?;
    }
    save_ron_file(path, cfg)
}

/// The config file if there is one, defaults otherwise, with environment
/// overrides applied in both cases.
pub fn load_config_or_default() -> Result<Config> {
    Ok(load_config()?.unwrap_or_default().with_env_overrides())
}
