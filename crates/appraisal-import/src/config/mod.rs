use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::workflows::import::{
    AiProvider, ControllerSettings, LookupFailurePolicy, PriorityCredentialPolicy, ProviderSetting,
};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }

    /// Default log layout when `APP_LOG_FORMAT` is not set.
    fn log_format(self) -> LogFormat {
        match self {
            Self::Development => LogFormat::Pretty,
            Self::Test | Self::Production => LogFormat::Compact,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub import: ImportConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let format = match env::var("APP_LOG_FORMAT") {
            Ok(value) => LogFormat::from_code(&value)
                .ok_or(ConfigError::InvalidLogFormat { value })?,
            Err(_) => environment.log_format(),
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level, format },
            import: ImportConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Pretty,
}

impl LogFormat {
    fn from_code(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub format: LogFormat,
}

/// Import pipeline settings read from `IMPORT_*` variables.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub redirect_delay: Duration,
    pub redirect_target: String,
    pub lookup_failure_policy: LookupFailurePolicy,
    pub extraction_endpoint: Option<String>,
    pub provider_priority: Vec<AiProvider>,
    pub use_personal_keys: bool,
    pub providers: Vec<(AiProvider, ProviderSetting)>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            redirect_delay: Duration::from_millis(2000),
            redirect_target: "/properties".to_string(),
            lookup_failure_policy: LookupFailurePolicy::Isolate,
            extraction_endpoint: None,
            provider_priority: AiProvider::ordered().to_vec(),
            use_personal_keys: false,
            providers: Vec::new(),
        }
    }
}

impl ImportConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let redirect_delay = match non_blank_var("IMPORT_REDIRECT_DELAY_MS") {
            Some(value) => value
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidRedirectDelay { value })?,
            None => defaults.redirect_delay,
        };

        let lookup_failure_policy = match non_blank_var("IMPORT_LOOKUP_FAILURE_POLICY") {
            Some(value) => LookupFailurePolicy::from_code(&value)
                .ok_or(ConfigError::InvalidLookupPolicy { value })?,
            None => defaults.lookup_failure_policy,
        };

        let provider_priority = match non_blank_var("IMPORT_PROVIDER_PRIORITY") {
            Some(value) => parse_priority(&value)?,
            None => defaults.provider_priority,
        };

        let use_personal_keys = match non_blank_var("IMPORT_USE_PERSONAL_KEYS") {
            Some(value) => parse_flag(&value).ok_or(ConfigError::InvalidFlag {
                name: "IMPORT_USE_PERSONAL_KEYS",
                value,
            })?,
            None => defaults.use_personal_keys,
        };

        let providers = AiProvider::ordered()
            .into_iter()
            .filter_map(|provider| {
                let prefix = format!("IMPORT_{}", provider.code().to_ascii_uppercase());
                let setting = ProviderSetting {
                    api_key: non_blank_var(&format!("{prefix}_API_KEY")),
                    model: non_blank_var(&format!("{prefix}_MODEL")),
                };
                (setting != ProviderSetting::default()).then_some((provider, setting))
            })
            .collect();

        Ok(Self {
            redirect_delay,
            redirect_target: non_blank_var("IMPORT_REDIRECT_TARGET")
                .unwrap_or(defaults.redirect_target),
            lookup_failure_policy,
            extraction_endpoint: non_blank_var("IMPORT_EXTRACTION_ENDPOINT"),
            provider_priority,
            use_personal_keys,
            providers,
        })
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            redirect_target: self.redirect_target.clone(),
            redirect_delay: self.redirect_delay,
            lookup_failure_policy: self.lookup_failure_policy,
        }
    }

    pub fn credential_policy(&self) -> PriorityCredentialPolicy {
        self.providers.iter().fold(
            PriorityCredentialPolicy::new(self.provider_priority.clone(), self.use_personal_keys),
            |policy, (provider, setting)| policy.with_setting(*provider, setting.clone()),
        )
    }
}

fn non_blank_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_priority(value: &str) -> Result<Vec<AiProvider>, ConfigError> {
    let mut priority = Vec::new();
    for code in value.split(',').map(str::trim).filter(|code| !code.is_empty()) {
        let provider = AiProvider::from_code(code).ok_or_else(|| ConfigError::InvalidProvider {
            value: code.to_string(),
        })?;
        if !priority.contains(&provider) {
            priority.push(provider);
        }
    }
    Ok(priority)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidLogFormat { value: String },
    InvalidRedirectDelay { value: String },
    InvalidLookupPolicy { value: String },
    InvalidProvider { value: String },
    InvalidFlag { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidLogFormat { value } => {
                write!(f, "APP_LOG_FORMAT must be compact or pretty, got '{}'", value)
            }
            ConfigError::InvalidRedirectDelay { value } => write!(
                f,
                "IMPORT_REDIRECT_DELAY_MS must be a number of milliseconds, got '{}'",
                value
            ),
            ConfigError::InvalidLookupPolicy { value } => write!(
                f,
                "IMPORT_LOOKUP_FAILURE_POLICY must be isolate or abort, got '{}'",
                value
            ),
            ConfigError::InvalidProvider { value } => {
                write!(f, "IMPORT_PROVIDER_PRIORITY names unknown provider '{}'", value)
            }
            ConfigError::InvalidFlag { name, value } => {
                write!(f, "{} must be true or false, got '{}'", name, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::import::CredentialPolicy;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    const IMPORT_VARS: [&str; 12] = [
        "IMPORT_REDIRECT_DELAY_MS",
        "IMPORT_REDIRECT_TARGET",
        "IMPORT_LOOKUP_FAILURE_POLICY",
        "IMPORT_EXTRACTION_ENDPOINT",
        "IMPORT_PROVIDER_PRIORITY",
        "IMPORT_USE_PERSONAL_KEYS",
        "IMPORT_OPENAI_API_KEY",
        "IMPORT_OPENAI_MODEL",
        "IMPORT_ANTHROPIC_API_KEY",
        "IMPORT_ANTHROPIC_MODEL",
        "IMPORT_GEMINI_API_KEY",
        "IMPORT_GEMINI_MODEL",
    ];

    fn reset_env() {
        env::remove_var("APP_ENV");
        env::remove_var("APP_HOST");
        env::remove_var("APP_PORT");
        env::remove_var("APP_LOG_LEVEL");
        env::remove_var("APP_LOG_FORMAT");
        for name in IMPORT_VARS {
            env::remove_var(name);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.telemetry.format, LogFormat::Pretty);
        assert_eq!(config.import.redirect_delay, Duration::from_millis(2000));
        assert_eq!(config.import.redirect_target, "/properties");
        assert_eq!(
            config.import.lookup_failure_policy,
            LookupFailurePolicy::Isolate
        );
        assert_eq!(config.import.extraction_endpoint, None);
        assert_eq!(config.import.provider_priority, AiProvider::ordered().to_vec());
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
    }

    #[test]
    fn reads_import_settings() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_ENV", "production");
        env::set_var("IMPORT_REDIRECT_DELAY_MS", "500");
        env::set_var("IMPORT_LOOKUP_FAILURE_POLICY", "abort");
        env::set_var("IMPORT_PROVIDER_PRIORITY", "gemini, anthropic, gemini");
        env::set_var("IMPORT_USE_PERSONAL_KEYS", "yes");
        env::set_var("IMPORT_ANTHROPIC_API_KEY", "sk-personal");

        let config = AppConfig::load().expect("config loads");
        reset_env();

        assert_eq!(config.telemetry.format, LogFormat::Compact);
        let settings = config.import.controller_settings();
        assert_eq!(settings.redirect_delay, Duration::from_millis(500));
        assert_eq!(settings.lookup_failure_policy, LookupFailurePolicy::Abort);
        assert_eq!(
            config.import.provider_priority,
            vec![AiProvider::Gemini, AiProvider::Anthropic]
        );

        let credentials = config.import.credential_policy().resolve_provider_and_key();
        assert_eq!(credentials.provider, AiProvider::Anthropic);
        assert_eq!(credentials.api_key, "sk-personal");
    }

    #[test]
    fn rejects_unknown_policy_and_provider() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("IMPORT_LOOKUP_FAILURE_POLICY", "retry");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidLookupPolicy { .. })
        ));

        reset_env();
        env::set_var("IMPORT_PROVIDER_PRIORITY", "openai,mistral");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidProvider { value }) if value == "mistral"
        ));
        reset_env();
    }
}
