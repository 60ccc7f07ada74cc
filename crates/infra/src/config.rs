//! Service configuration, loaded from environment variables at startup.
//!
//! Every setting has a default so the service runs with no environment at
//! all: in-memory record store, placeholder collaborators. Secrets may be
//! supplied indirectly: when `NAME` is unset and `NAME_FILE` points at a
//! file, the trimmed file contents are used.

use std::path::PathBuf;
use std::time::Duration;

use crate::queue::{Lane, QueueConfig, RetryPolicy};

pub const DEFAULT_SERVER_PORT: u16 = 8000;
pub const DEFAULT_SUNO_BASE_URL: &str = "https://api.sunoapi.org";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {name} from {path}: {source}")]
    SecretFile {
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: String, value: String },
}

/// Music generation API credentials.
#[derive(Clone)]
pub struct SunoConfig {
    pub api_key: String,
    pub base_url: String,
}

impl std::fmt::Debug for SunoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SunoConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AudioServiceConfig {
    pub url: String,
    pub timeout: Duration,
}

/// Worker pool sizing and delivery policy.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub render_concurrency: usize,
    pub master_concurrency: usize,
    pub max_retry: u32,
    pub lease: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            render_concurrency: 6,
            master_concurrency: 4,
            max_retry: 3,
            lease: Duration::from_secs(1800),
        }
    }
}

impl QueueSettings {
    pub fn queue_config(&self) -> QueueConfig {
        let retry = RetryPolicy {
            max_retry: self.max_retry,
            ..RetryPolicy::default()
        };
        QueueConfig::default()
            .with_concurrency(Lane::Render, self.render_concurrency)
            .with_concurrency(Lane::Master, self.master_concurrency)
            .with_retry_policy(retry)
            .with_lease(self.lease)
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_port: u16,
    /// Unset: in-memory record store.
    pub redis_url: Option<String>,
    /// Unset: placeholder music generation.
    pub suno: Option<SunoConfig>,
    /// Unset: placeholder mastering.
    pub audio_service: Option<AudioServiceConfig>,
    /// Unset: placeholder storage.
    pub r2_public_url: Option<String>,
    pub queue: QueueSettings,
    /// Simulated latency of each placeholder collaborator call.
    pub placeholder_step_delay: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_port: DEFAULT_SERVER_PORT,
            redis_url: None,
            suno: None,
            audio_service: None,
            r2_public_url: None,
            queue: QueueSettings::default(),
            placeholder_step_delay: Duration::ZERO,
        }
    }
}

impl AppConfig {
    /// Build from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let defaults = QueueSettings::default();

        let suno = env.secret("SUNO_API_KEY")?.map(|api_key| SunoConfig {
            api_key,
            base_url: env
                .string("SUNO_BASE_URL")
                .unwrap_or_else(|| DEFAULT_SUNO_BASE_URL.to_string()),
        });

        let audio_service = match env.string("AUDIO_SERVICE_URL") {
            Some(url) => Some(AudioServiceConfig {
                url,
                timeout: Duration::from_secs(env.parse("AUDIO_SERVICE_TIMEOUT", 120)?),
            }),
            None => None,
        };

        Ok(Self {
            server_port: env.parse("SERVER_PORT", DEFAULT_SERVER_PORT)?,
            redis_url: env.secret("REDIS_URL")?,
            suno,
            audio_service,
            r2_public_url: env.string("R2_PUBLIC_URL"),
            queue: QueueSettings {
                render_concurrency: env.positive("RENDER_CONCURRENCY", defaults.render_concurrency)?,
                master_concurrency: env.positive("MASTER_CONCURRENCY", defaults.master_concurrency)?,
                max_retry: env.parse("TASK_MAX_RETRY", defaults.max_retry)?,
                lease: Duration::from_secs(env.positive("TASK_LEASE_SECS", defaults.lease.as_secs())?),
            },
            placeholder_step_delay: Duration::from_millis(env.parse("PLACEHOLDER_STEP_DELAY_MS", 0)?),
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty value, trimmed.
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// `NAME`, falling back to the contents of the file named by `NAME_FILE`.
    fn secret(&self, name: &str) -> Result<Option<String>, ConfigError> {
        if let Some(value) = self.string(name) {
            return Ok(Some(value));
        }
        let Some(path) = self.string(&format!("{name}_FILE")) else {
            return Ok(None);
        };
        let path = PathBuf::from(path);
        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::SecretFile {
            name: name.to_string(),
            path: path.clone(),
            source,
        })?;
        let contents = contents.trim();
        Ok((!contents.is_empty()).then(|| contents.to_string()))
    }

    fn parse<T: std::str::FromStr>(&self, name: &str, default: T) -> Result<T, ConfigError> {
        match self.string(name) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                name: name.to_string(),
                value: raw,
            }),
        }
    }

    fn positive<T>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr + PartialOrd + Default,
    {
        let value = self.parse(name, default)?;
        if value > T::default() {
            Ok(value)
        } else {
            Err(ConfigError::Invalid {
                name: name.to_string(),
                value: "must be positive".to_string(),
            })
        }
    }
}
