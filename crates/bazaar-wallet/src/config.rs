use std::time::Duration;

use url::Url;

use crate::error::ConfigError;
use crate::zarinpal;

/// Execution environment. Controls HTTPS enforcement on the callback URL and
/// how much error detail leaves the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnv {
    Development,
    Production,
    Test,
}

impl RunEnv {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunEnv::Development => "development",
            RunEnv::Production => "production",
            RunEnv::Test => "test",
        }
    }

    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" => Ok(RunEnv::Development),
            "production" => Ok(RunEnv::Production),
            "test" => Ok(RunEnv::Test),
            other => Err(ConfigError::invalid(
                "APP_ENV",
                format!("unknown environment '{other}'"),
            )),
        }
    }
}

/// Signing settings for access tokens.
#[derive(Debug, Clone)]
pub struct JwtSettings {
    pub secret: String,
    pub expires_in: Duration,
}

/// Zarinpal merchant settings.
#[derive(Debug, Clone)]
pub struct ZarinpalSettings {
    /// Merchant id issued by the gateway (UUID format).
    pub merchant_id: String,
    /// Route payment requests through the sandbox endpoints.
    pub sandbox: bool,
    /// Where the gateway sends the shopper back after payment.
    pub callback_url: String,
    /// Shared secret for callback signature verification.
    pub webhook_secret: String,
}

/// General API throttling policy inputs. The login policy derives from the
/// same window with its own cap.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub window: Duration,
    pub max: u32,
}

/// Immutable application configuration, built once at process start and
/// passed explicitly into every component constructor.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: RunEnv,
    pub port: u16,
    pub jwt: JwtSettings,
    pub zarinpal: ZarinpalSettings,
    pub rate_limit: RateLimitSettings,
    /// JSON body ceiling; requests above it are answered 413.
    pub max_body_bytes: usize,
    /// Bearer token for /metrics. Metrics stay closed when unset.
    pub metrics_token: Option<String>,
    /// CORS origins. Empty means localhost-only.
    pub allowed_origins: Vec<String>,
}

const MIN_SECRET_LEN: usize = 32;
const MIN_WINDOW_MS: u64 = 60_000;
const MIN_REQUEST_CAP: u32 = 10;

impl AppConfig {
    /// Read and validate configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) but with an injectable variable
    /// source, so validation is testable without touching the process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = match lookup("APP_ENV") {
            Some(v) => RunEnv::parse(v.trim())?,
            None => RunEnv::Development,
        };

        let port = parse_or("PORT", &lookup, 3000u16)?;

        let secret = require("JWT_SECRET", &lookup)?;
        if secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::invalid(
                "JWT_SECRET",
                format!("must be at least {MIN_SECRET_LEN} characters"),
            ));
        }
        let expires_in = match lookup("JWT_EXPIRES_IN") {
            Some(v) => parse_expiry(v.trim()).ok_or_else(|| {
                ConfigError::invalid("JWT_EXPIRES_IN", "expected <number><s|m|h|d>, e.g. 7d")
            })?,
            None => Duration::from_secs(7 * 24 * 3600),
        };

        let merchant_id = require("ZARINPAL_MERCHANT_ID", &lookup)?;
        if uuid::Uuid::parse_str(&merchant_id).is_err() {
            return Err(ConfigError::invalid(
                "ZARINPAL_MERCHANT_ID",
                "must be a UUID merchant identifier",
            ));
        }

        let sandbox = match lookup("ZARINPAL_SANDBOX") {
            Some(v) => v == "true" || v == "1",
            None => true,
        };

        let callback_url = require("ZARINPAL_CALLBACK_URL", &lookup)?;
        validate_callback_url(&callback_url, env)?;

        let webhook_secret = require("ZARINPAL_WEBHOOK_SECRET", &lookup)?;
        if webhook_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::invalid(
                "ZARINPAL_WEBHOOK_SECRET",
                format!("must be at least {MIN_SECRET_LEN} characters"),
            ));
        }

        let window_ms = parse_or("RATE_LIMIT_WINDOW_MS", &lookup, 900_000u64)?;
        if window_ms < MIN_WINDOW_MS {
            return Err(ConfigError::invalid(
                "RATE_LIMIT_WINDOW_MS",
                format!("must be at least {MIN_WINDOW_MS}"),
            ));
        }
        let max = parse_or("RATE_LIMIT_MAX_REQUESTS", &lookup, 100u32)?;
        if max < MIN_REQUEST_CAP {
            return Err(ConfigError::invalid(
                "RATE_LIMIT_MAX_REQUESTS",
                format!("must be at least {MIN_REQUEST_CAP}"),
            ));
        }

        let max_body_bytes = parse_or("MAX_BODY_BYTES", &lookup, 65_536usize)?;
        if max_body_bytes < 1024 {
            return Err(ConfigError::invalid("MAX_BODY_BYTES", "must be at least 1024"));
        }

        let metrics_token = lookup("METRICS_TOKEN").filter(|s| !s.is_empty());

        let allowed_origins = lookup("ALLOWED_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(AppConfig {
            env,
            port,
            jwt: JwtSettings { secret, expires_in },
            zarinpal: ZarinpalSettings {
                merchant_id,
                sandbox,
                callback_url,
                webhook_secret,
            },
            rate_limit: RateLimitSettings {
                window: Duration::from_millis(window_ms),
                max,
            },
            max_body_bytes,
            metrics_token,
            allowed_origins,
        })
    }

    /// Startup-log view with every secret-bearing field masked.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "env": self.env.as_str(),
            "port": self.port,
            "jwt": {
                "secret": "***",
                "expiresInSecs": self.jwt.expires_in.as_secs(),
            },
            "zarinpal": {
                "merchantId": zarinpal::mask(&self.zarinpal.merchant_id),
                "sandbox": self.zarinpal.sandbox,
                "callbackUrl": self.zarinpal.callback_url,
                "webhookSecret": "***",
            },
            "rateLimit": {
                "windowMs": self.rate_limit.window.as_millis() as u64,
                "max": self.rate_limit.max,
            },
            "maxBodyBytes": self.max_body_bytes,
            "metricsProtected": self.metrics_token.is_some(),
        })
    }
}

fn require(name: &'static str, lookup: &impl Fn(&str) -> Option<String>) -> Result<String, ConfigError> {
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    lookup: &impl Fn(&str) -> Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid(name, format!("could not parse '{}'", v.trim()))),
        None => Ok(default),
    }
}

/// Parse a compact expiry like `7d`, `12h`, `30m`, `45s`.
fn parse_expiry(value: &str) -> Option<Duration> {
    if value.len() < 2 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    let count: u64 = digits.parse().ok()?;
    let secs = match unit {
        "s" => count,
        "m" => count.checked_mul(60)?,
        "h" => count.checked_mul(3600)?,
        "d" => count.checked_mul(86_400)?,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

fn validate_callback_url(raw: &str, env: RunEnv) -> Result<(), ConfigError> {
    let parsed = Url::parse(raw)
        .map_err(|_| ConfigError::invalid("ZARINPAL_CALLBACK_URL", "invalid URL format"))?;

    match parsed.scheme() {
        "https" => Ok(()),
        "http" if env != RunEnv::Production => Ok(()),
        "http" => Err(ConfigError::invalid(
            "ZARINPAL_CALLBACK_URL",
            "must use HTTPS in production",
        )),
        other => Err(ConfigError::invalid(
            "ZARINPAL_CALLBACK_URL",
            format!("unsupported scheme '{other}'"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_vars() -> HashMap<&'static str, String> {
        HashMap::from([
            ("JWT_SECRET", "0123456789abcdef0123456789abcdef".to_string()),
            (
                "ZARINPAL_MERCHANT_ID",
                "3f2a1b4c-9d8e-4f10-a2b3-c4d5e6f70812".to_string(),
            ),
            (
                "ZARINPAL_CALLBACK_URL",
                "https://shop.example.com/api/wallet/callback".to_string(),
            ),
            (
                "ZARINPAL_WEBHOOK_SECRET",
                "fedcba9876543210fedcba9876543210".to_string(),
            ),
        ])
    }

    fn load(vars: &HashMap<&'static str, String>) -> Result<AppConfig, ConfigError> {
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn loads_with_defaults() {
        let config = load(&base_vars()).unwrap();
        assert_eq!(config.env, RunEnv::Development);
        assert_eq!(config.port, 3000);
        assert!(config.zarinpal.sandbox);
        assert_eq!(config.rate_limit.max, 100);
        assert_eq!(config.rate_limit.window, Duration::from_millis(900_000));
        assert_eq!(config.jwt.expires_in, Duration::from_secs(7 * 24 * 3600));
    }

    #[test]
    fn missing_secret_fails() {
        let mut vars = base_vars();
        vars.remove("JWT_SECRET");
        assert!(matches!(load(&vars), Err(ConfigError::Missing("JWT_SECRET"))));
    }

    #[test]
    fn short_secret_fails() {
        let mut vars = base_vars();
        vars.insert("JWT_SECRET", "too-short".to_string());
        assert!(load(&vars).is_err());
    }

    #[test]
    fn merchant_id_must_be_uuid() {
        let mut vars = base_vars();
        vars.insert("ZARINPAL_MERCHANT_ID", "not-a-uuid".to_string());
        assert!(load(&vars).is_err());
    }

    #[test]
    fn production_requires_https_callback() {
        let mut vars = base_vars();
        vars.insert("APP_ENV", "production".to_string());
        vars.insert(
            "ZARINPAL_CALLBACK_URL",
            "http://shop.example.com/callback".to_string(),
        );
        assert!(load(&vars).is_err());

        vars.insert("APP_ENV", "development".to_string());
        assert!(load(&vars).is_ok());
    }

    #[test]
    fn rate_limit_window_floor() {
        let mut vars = base_vars();
        vars.insert("RATE_LIMIT_WINDOW_MS", "1000".to_string());
        assert!(load(&vars).is_err());
    }

    #[test]
    fn expiry_units() {
        assert_eq!(parse_expiry("45s"), Some(Duration::from_secs(45)));
        assert_eq!(parse_expiry("30m"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_expiry("12h"), Some(Duration::from_secs(43_200)));
        assert_eq!(parse_expiry("7d"), Some(Duration::from_secs(604_800)));
        assert_eq!(parse_expiry("7w"), None);
        assert_eq!(parse_expiry(""), None);
    }

    #[test]
    fn summary_masks_secrets() {
        let config = load(&base_vars()).unwrap();
        let summary = config.summary();
        assert_eq!(summary["jwt"]["secret"], "***");
        assert_eq!(summary["zarinpal"]["webhookSecret"], "***");
        let merchant = summary["zarinpal"]["merchantId"].as_str().unwrap();
        assert!(merchant.starts_with('*'));
        assert!(merchant.ends_with("0812"));
    }
}
