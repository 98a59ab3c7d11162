use std::path::Path;

use serde::Deserialize;

use crate::error::BridgeError;

/// Discord credentials and gateway intents.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    /// Bot token, including the `"Bot "` prefix.
    pub token: String,
    /// Gateway intent bitmask. 513 = GUILDS | GUILD_MESSAGES.
    #[serde(default = "default_intents")]
    pub intents: u64,
}

/// Tuning for the HTTP forwarder.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    /// Additional attempts after the initial try.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Base delay between attempts in seconds; scales linearly with the
    /// attempt number.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_delay: default_retry_delay(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Directive string for `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Result<Self, BridgeError> {
        match value.to_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            other => Err(BridgeError::Config(format!("unknown log level '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Console,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// One entry of the route table: which endpoints receive an event.
#[derive(Debug, Clone, Deserialize)]
pub struct Route {
    /// Discord event name, e.g. `MESSAGE_CREATE`.
    pub event_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub endpoints: Vec<String>,
}

/// Immutable configuration snapshot. Loaded and validated once at startup;
/// everything downstream consumes it read-only.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    pub discord: DiscordConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub routes: Vec<Route>,
}

impl BridgeConfig {
    /// Load from a YAML file, then apply environment overrides and validate.
    pub fn from_yaml(path: &Path) -> Result<Self, BridgeError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let mut config: BridgeConfig = serde_yaml::from_str(&raw).map_err(|e| {
            BridgeError::Config(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Build purely from environment variables. `DISCORD_TOKEN` is required;
    /// everything else falls back to defaults. No routes can be configured
    /// this way.
    pub fn from_env() -> Result<Self, BridgeError> {
        let token = std::env::var("DISCORD_TOKEN")
            .map_err(|_| BridgeError::Config("DISCORD_TOKEN is required".to_string()))?;

        let mut config = Self {
            discord: DiscordConfig {
                token,
                intents: default_intents(),
            },
            http: HttpConfig::default(),
            logging: LoggingConfig::default(),
            routes: Vec::new(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Recognized overrides: `DISCORD_TOKEN`, `DISCORD_INTENTS`,
    /// `HTTP_TIMEOUT`, `HTTP_RETRY_ATTEMPTS`, `HTTP_RETRY_DELAY`,
    /// `LOG_LEVEL`, `LOG_FORMAT`.
    fn apply_env_overrides(&mut self) -> Result<(), BridgeError> {
        if let Ok(token) = std::env::var("DISCORD_TOKEN") {
            self.discord.token = token;
        }
        if let Some(intents) = env_parse("DISCORD_INTENTS")? {
            self.discord.intents = intents;
        }
        if let Some(timeout) = env_parse("HTTP_TIMEOUT")? {
            self.http.timeout = timeout;
        }
        if let Some(attempts) = env_parse("HTTP_RETRY_ATTEMPTS")? {
            self.http.retry_attempts = attempts;
        }
        if let Some(delay) = env_parse("HTTP_RETRY_DELAY")? {
            self.http.retry_delay = delay;
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = LogLevel::parse(&level)?;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "console" => LogFormat::Console,
                other => {
                    return Err(BridgeError::Config(format!("unknown log format '{other}'")))
                }
            };
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), BridgeError> {
        if self.discord.token.len() < 10 {
            return Err(BridgeError::Config(
                "discord token must be provided and valid".to_string(),
            ));
        }
        if self.http.timeout <= 0.0 {
            return Err(BridgeError::Config("http.timeout must be positive".to_string()));
        }
        if self.http.retry_delay < 0.0 {
            return Err(BridgeError::Config(
                "http.retry_delay must not be negative".to_string(),
            ));
        }
        for route in &self.routes {
            if route.event_name.is_empty() {
                return Err(BridgeError::Config("route event_name must not be empty".to_string()));
            }
            for endpoint in &route.endpoints {
                let url = reqwest::Url::parse(endpoint).map_err(|e| {
                    BridgeError::Config(format!("invalid endpoint url '{endpoint}': {e}"))
                })?;
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(BridgeError::Config(format!(
                        "endpoint '{endpoint}' must use http or https"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, BridgeError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| BridgeError::Config(format!("invalid {name} '{raw}': {e}"))),
        Err(_) => Ok(None),
    }
}

fn default_intents() -> u64 {
    513
}

fn default_timeout() -> f64 {
    30.0
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    1.0
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

fn default_true() -> bool {
    true
}
