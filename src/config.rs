//! Settings from `~/.asc/config.json` and `ASC_*` environment variables.
//! Environment variables win over the file.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::asc::DEFAULT_BASE_URL;
use crate::asc::auth::Credentials;
use crate::asc::error::AscError;
use crate::asc::retry::RetryPolicy;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// On-disk form. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    pub key_id: Option<String>,
    pub issuer_id: Option<String>,
    pub private_key_path: Option<PathBuf>,
    pub app_id: Option<String>,
    pub base_url: Option<String>,
    pub timeout: Option<String>,
    pub max_retries: Option<u32>,
    pub base_delay: Option<String>,
    pub max_delay: Option<String>,
    pub retry_log: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, AscError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AscError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text)
            .map_err(|e| AscError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub base_url: Url,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid"),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub credentials: Option<Credentials>,
    pub default_app_id: Option<String>,
    pub settings: ClientSettings,
}

impl Config {
    /// Reads the config file (if present) and the process environment.
    pub fn load() -> Result<Self, AscError> {
        let lookup = |key: &str| env::var(key).ok();
        let path = lookup("ASC_CONFIG_PATH")
            .map(PathBuf::from)
            .or_else(default_config_path);
        let file = match path {
            Some(path) if path.exists() => {
                tracing::debug!(path = %path.display(), "loading config file");
                Some(FileConfig::load(&path)?)
            }
            _ => None,
        };
        Self::from_sources(file.unwrap_or_default(), lookup)
    }

    /// Merges `file` with variables resolved through `lookup`.
    pub fn from_sources<F>(file: FileConfig, lookup: F) -> Result<Self, AscError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut settings = ClientSettings::default();
        if let Some(raw) = var("ASC_BASE_URL").or(file.base_url) {
            settings.base_url = Url::parse(&raw)
                .map_err(|e| AscError::Config(format!("invalid base URL {:?}: {}", raw, e)))?;
        }
        if let Some(raw) = var("ASC_TIMEOUT").or(file.timeout) {
            settings.timeout = parse_duration(&raw)?;
        }
        if let Some(raw) = var("ASC_MAX_RETRIES") {
            settings.retry.max_retries = raw
                .parse()
                .map_err(|_| AscError::Config(format!("invalid ASC_MAX_RETRIES {:?}", raw)))?;
        } else if let Some(n) = file.max_retries {
            settings.retry.max_retries = n;
        }
        if let Some(raw) = var("ASC_BASE_DELAY").or(file.base_delay) {
            settings.retry.base_delay = parse_duration(&raw)?;
        }
        if let Some(raw) = var("ASC_MAX_DELAY").or(file.max_delay) {
            settings.retry.max_delay = parse_duration(&raw)?;
        }
        if settings.retry.max_delay < settings.retry.base_delay {
            settings.retry.max_delay = settings.retry.base_delay;
        }
        settings.retry.log_retries = match var("ASC_RETRY_LOG") {
            Some(raw) => parse_flag(&raw),
            None => file.retry_log.unwrap_or(false),
        };

        let key_id = var("ASC_KEY_ID").or(file.key_id);
        let issuer_id = var("ASC_ISSUER_ID").or(file.issuer_id);
        let key_path = var("ASC_PRIVATE_KEY_PATH")
            .map(PathBuf::from)
            .or(file.private_key_path);
        let inline_key = var("ASC_PRIVATE_KEY");
        let encoded_key = var("ASC_PRIVATE_KEY_B64");
        let has_key = inline_key.is_some() || encoded_key.is_some() || key_path.is_some();

        let credentials = match (key_id, issuer_id) {
            (None, None) if !has_key => None,
            (Some(key_id), Some(issuer_id)) => {
                let creds = if let Some(pem) = inline_key {
                    Credentials::new(issuer_id, key_id, pem.replace("\\n", "\n"))
                } else if let Some(encoded) = encoded_key {
                    Credentials::from_base64_key(issuer_id, key_id, &encoded)?
                } else if let Some(path) = key_path {
                    Credentials::from_key_file(issuer_id, key_id, &expand_home(&path))?
                } else {
                    return Err(AscError::Config(
                        "missing private key: set ASC_PRIVATE_KEY_PATH, ASC_PRIVATE_KEY or ASC_PRIVATE_KEY_B64"
                            .to_string(),
                    ));
                };
                Some(creds)
            }
            (None, _) => return Err(AscError::Config("missing ASC_KEY_ID".to_string())),
            (_, None) => return Err(AscError::Config("missing ASC_ISSUER_ID".to_string())),
        };

        Ok(Self {
            credentials,
            default_app_id: var("ASC_APP_ID").or(file.app_id),
            settings,
        })
    }

    pub fn require_credentials(&self) -> Result<&Credentials, AscError> {
        self.credentials.as_ref().ok_or_else(|| {
            AscError::Config(
                "missing credentials: set ASC_KEY_ID, ASC_ISSUER_ID and ASC_PRIVATE_KEY_PATH"
                    .to_string(),
            )
        })
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".asc").join("config.json"))
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Parses `250ms`, `2s`, `5m`, `1h`, or bare seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, AscError> {
    let raw = raw.trim();
    let invalid = || AscError::Config(format!("invalid duration {:?}", raw));
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits.parse().map_err(|_| invalid())?;
    let duration = match unit.trim() {
        "" | "s" => Duration::from_secs(value),
        "ms" => Duration::from_millis(value),
        "m" => Duration::from_secs(value * 60),
        "h" => Duration::from_secs(value * 3600),
        _ => return Err(invalid()),
    };
    Ok(duration)
}
