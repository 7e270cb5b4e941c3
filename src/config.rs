//! # config — อ่าน Config จาก Environment Variables
//!
//! `.env` is loaded by `main` through `dotenvy`; this module only reads the
//! resulting process environment.  Required keys are collected first so a
//! half-configured deployment fails once, listing everything that is missing.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Serialize;

use crate::engine::classifier::RetryPolicy;
use crate::engine::executor::ExecutorSettings;

const REQUIRED_KEYS: &[&str] = &[
    "TELEGRAM_BOT_TOKEN",
    "TELEGRAM_SOURCE_CHANNEL_ID",
    "AI_API_KEY",
    "MT5_LOGIN",
    "MT5_PASSWORD",
    "MT5_SERVER",
];

// ─── AI Provider ──────────────────────────────────────────────────────────────

/// AI Provider ที่รองรับ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiProvider {
    /// Together — OpenAI-compatible chat completions, Llama 3.1 405B
    Together,
    /// OpenAI GPT-4o
    OpenAi,
    /// Anthropic Claude 3.5 Sonnet
    Claude,
}

impl AiProvider {
    pub fn default_model(self) -> &'static str {
        match self {
            AiProvider::Together => "meta-llama/Meta-Llama-3.1-405B-Instruct-Turbo",
            AiProvider::OpenAi   => "gpt-4o",
            AiProvider::Claude   => "claude-3-5-sonnet-20241022",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            AiProvider::Together => "https://api.together.xyz/v1",
            AiProvider::OpenAi   => "https://api.openai.com/v1",
            AiProvider::Claude   => "https://api.anthropic.com/v1",
        }
    }
}

impl std::fmt::Display for AiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AiProvider::Together => write!(f, "Together"),
            AiProvider::OpenAi   => write!(f, "OpenAI"),
            AiProvider::Claude   => write!(f, "Claude"),
        }
    }
}

// ─── Sections ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token:         String,
    /// Channel whose posts are treated as signals
    pub source_channel_id: i64,
    /// Where execution outcomes are reported (optional)
    pub notify_chat_id:    Option<i64>,
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub provider: AiProvider,
    pub api_key:  String,
    pub model:    String,
    pub base_url: String,
}

/// Terminal login, sent once to the bridge's `/initialize`.
#[derive(Clone, Serialize)]
pub struct Mt5Credentials {
    pub login:    u64,
    pub password: String,
    pub server:   String,
}

impl std::fmt::Debug for Mt5Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mt5Credentials")
            .field("login", &self.login)
            .field("password", &"***")
            .field("server", &self.server)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Mt5Config {
    /// URL ของ MT5 bridge EA, หรือ "mock" สำหรับ paper terminal
    pub base_url:    String,
    pub credentials: Mt5Credentials,
}

impl Mt5Config {
    pub fn is_mock(&self) -> bool {
        self.base_url.eq_ignore_ascii_case("mock")
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub bind_addr:     SocketAddr,
    /// None = dev mode, every request allowed
    pub api_key:       Option<String>,
    pub poll_interval: Duration,
}

/// Config ทั้งหมดที่ระบบต้องการ
#[derive(Debug, Clone)]
pub struct Config {
    pub telegram:               TelegramConfig,
    pub ai:                     AiConfig,
    pub mt5:                    Mt5Config,
    pub executor:               ExecutorSettings,
    pub retry:                  RetryPolicy,
    pub listener_restart_delay: Duration,
    pub monitor:                MonitorConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key → value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let missing: Vec<&str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| get(key).is_none())
            .collect();
        if !missing.is_empty() {
            bail!("Missing configuration values for: {}", missing.join(", "));
        }
        let required = |key: &str| get(key).unwrap_or_default();

        let provider = match get("AI_PROVIDER").unwrap_or_else(|| "together".to_string()).to_lowercase().as_str() {
            "together" => AiProvider::Together,
            "openai"   => AiProvider::OpenAi,
            "claude"   => AiProvider::Claude,
            other => bail!("Unknown AI_PROVIDER: '{other}'. Use 'together', 'openai' or 'claude'"),
        };

        let source_channel_id: i64 = required("TELEGRAM_SOURCE_CHANNEL_ID")
            .parse()
            .context("TELEGRAM_SOURCE_CHANNEL_ID must be a numeric chat id")?;
        let notify_chat_id = get("TELEGRAM_NOTIFY_CHAT_ID")
            .map(|v| v.parse::<i64>())
            .transpose()
            .context("TELEGRAM_NOTIFY_CHAT_ID must be a numeric chat id")?;

        let login: u64 = required("MT5_LOGIN")
            .parse()
            .context("MT5_LOGIN must be a number")?;

        let defaults = ExecutorSettings::default();
        let executor = ExecutorSettings {
            lot_size:                 parse_or(&get, "TRADE_LOT_SIZE", defaults.lot_size)?,
            batch_size:               parse_or(&get, "TRADE_BATCH_SIZE", defaults.batch_size)?,
            breakeven_buffer_points:  parse_or(&get, "BREAKEVEN_BUFFER_POINTS", defaults.breakeven_buffer_points)?,
            magic:                    parse_or(&get, "TRADE_MAGIC", defaults.magic)?,
            deviation:                parse_or(&get, "TRADE_DEVIATION", defaults.deviation)?,
            adjust_on_duplicate_open: parse_or(&get, "ADJUST_ON_DUPLICATE_OPEN", defaults.adjust_on_duplicate_open)?,
            ..defaults
        };
        if executor.batch_size == 0 || executor.lot_size <= 0.0 {
            bail!("TRADE_BATCH_SIZE and TRADE_LOT_SIZE must be positive");
        }

        let retry = RetryPolicy {
            max_attempts: parse_or(&get, "CLASSIFIER_MAX_ATTEMPTS", 3u32)?.max(1),
            delay:        Duration::from_secs(parse_or(&get, "CLASSIFIER_RETRY_DELAY_SECS", 5u64)?),
        };

        let bind_addr: SocketAddr = get("MONITOR_BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:3000".to_string())
            .parse()
            .context("MONITOR_BIND_ADDR must be host:port")?;

        Ok(Self {
            telegram: TelegramConfig {
                bot_token: required("TELEGRAM_BOT_TOKEN"),
                source_channel_id,
                notify_chat_id,
            },
            ai: AiConfig {
                provider,
                api_key:  required("AI_API_KEY"),
                model:    get("AI_MODEL").unwrap_or_else(|| provider.default_model().to_string()),
                base_url: get("AI_BASE_URL").unwrap_or_else(|| provider.default_base_url().to_string()),
            },
            mt5: Mt5Config {
                base_url: get("MT5_BASE_URL").unwrap_or_else(|| "http://localhost:8081".to_string()),
                credentials: Mt5Credentials {
                    login,
                    password: required("MT5_PASSWORD"),
                    server:   required("MT5_SERVER"),
                },
            },
            executor,
            retry,
            listener_restart_delay: Duration::from_secs(parse_or(&get, "LISTENER_RESTART_DELAY_SECS", 60u64)?),
            monitor: MonitorConfig {
                bind_addr,
                api_key:       get("MONITOR_API_KEY"),
                poll_interval: Duration::from_secs(parse_or(&get, "ACCOUNT_POLL_SECS", 10u64)?.max(1)),
            },
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} has invalid value '{raw}': {e}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_SOURCE_CHANNEL_ID", "-1001234567890"),
            ("AI_API_KEY", "key"),
            ("MT5_LOGIN", "5550123"),
            ("MT5_PASSWORD", "pw"),
            ("MT5_SERVER", "Broker-Demo"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> anyhow::Result<Config> {
        Config::from_lookup(|key| env.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_apply_when_only_required_keys_are_set() {
        let config = load(&base_env()).unwrap();

        assert_eq!(config.telegram.source_channel_id, -1001234567890);
        assert_eq!(config.telegram.notify_chat_id, None);
        assert_eq!(config.ai.provider, AiProvider::Together);
        assert_eq!(config.ai.base_url, "https://api.together.xyz/v1");
        assert_eq!(config.mt5.base_url, "http://localhost:8081");
        assert!(!config.mt5.is_mock());
        assert_eq!(config.executor.lot_size, 0.02);
        assert_eq!(config.executor.batch_size, 4);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.delay, Duration::from_secs(5));
        assert_eq!(config.listener_restart_delay, Duration::from_secs(60));
        assert_eq!(config.monitor.bind_addr.port(), 3000);
    }

    #[test]
    fn every_missing_required_key_is_reported() {
        let mut env = base_env();
        env.remove("AI_API_KEY");
        env.insert("MT5_SERVER", "   ");

        let err = load(&env).unwrap_err().to_string();
        assert!(err.contains("AI_API_KEY"), "{err}");
        assert!(err.contains("MT5_SERVER"), "{err}");
        assert!(!err.contains("MT5_LOGIN"), "{err}");
    }

    #[test]
    fn overrides_and_bad_values() {
        let mut env = base_env();
        env.insert("AI_PROVIDER", "Claude");
        env.insert("MT5_BASE_URL", "mock");
        env.insert("TRADE_BATCH_SIZE", "6");
        env.insert("ADJUST_ON_DUPLICATE_OPEN", "true");
        let config = load(&env).unwrap();
        assert_eq!(config.ai.provider, AiProvider::Claude);
        assert_eq!(config.ai.model, "claude-3-5-sonnet-20241022");
        assert!(config.mt5.is_mock());
        assert_eq!(config.executor.batch_size, 6);
        assert!(config.executor.adjust_on_duplicate_open);

        env.insert("MT5_LOGIN", "not-a-number");
        assert!(load(&env).is_err());
    }

    #[test]
    fn password_is_redacted_in_debug_output() {
        let config = load(&base_env()).unwrap();
        let rendered = format!("{:?}", config.mt5.credentials);
        assert!(!rendered.contains("pw\""));
        assert!(rendered.contains("***"));
    }
}
