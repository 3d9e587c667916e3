//! Configuration types.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Identity used when a message request has neither a sender nor a creator.
pub const DEFAULT_SEND_FROM: &str = "ESP Web Site <esp@mit.edu>";

/// Which outbound mail transport to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailBackend {
    /// Deliver via SMTP relay.
    Smtp,
    /// Log outgoing mail instead of sending it (development).
    Log,
}

/// SMTP relay settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

/// Site configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Path to the libSQL database file.
    pub db_path: PathBuf,
    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Fallback `From` identity for outgoing mail.
    pub default_from: String,
    pub mail_backend: MailBackend,
    /// Required when `mail_backend` is `Smtp`.
    pub smtp: Option<SmtpConfig>,
    /// How long a login session stays valid.
    pub session_ttl: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/esp-site.db"),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            default_from: DEFAULT_SEND_FROM.to_string(),
            mail_backend: MailBackend::Log,
            smtp: None,
            session_ttl: Duration::from_secs(14 * 24 * 3600), // two weeks
        }
    }
}

impl AppConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let db_path = lookup("ESP_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let bind_addr = match lookup("ESP_BIND_ADDR") {
            Some(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
                key: "ESP_BIND_ADDR".into(),
                message: format!("{e}"),
            })?,
            None => defaults.bind_addr,
        };

        let default_from = lookup("ESP_DEFAULT_FROM")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.default_from);

        let mail_backend = match lookup("ESP_MAIL_BACKEND").as_deref() {
            None | Some("log") => MailBackend::Log,
            Some("smtp") => MailBackend::Smtp,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "ESP_MAIL_BACKEND".into(),
                    message: format!("expected 'smtp' or 'log', got '{other}'"),
                });
            }
        };

        let smtp = match lookup("SMTP_HOST") {
            Some(host) => {
                let port = match lookup("SMTP_PORT") {
                    Some(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
                        key: "SMTP_PORT".into(),
                        message: format!("{e}"),
                    })?,
                    None => 587,
                };
                Some(SmtpConfig {
                    host,
                    port,
                    username: lookup("SMTP_USERNAME").unwrap_or_default(),
                    password: SecretString::from(lookup("SMTP_PASSWORD").unwrap_or_default()),
                })
            }
            None => None,
        };

        if mail_backend == MailBackend::Smtp && smtp.is_none() {
            return Err(ConfigError::MissingEnvVar("SMTP_HOST".into()));
        }

        let session_ttl = match lookup("ESP_SESSION_TTL_HOURS") {
            Some(raw) => {
                let hours: u64 = raw.parse().map_err(|e| ConfigError::InvalidValue {
                    key: "ESP_SESSION_TTL_HOURS".into(),
                    message: format!("{e}"),
                })?;
                Duration::from_secs(hours * 3600)
            }
            None => defaults.session_ttl,
        };

        Ok(Self {
            db_path,
            bind_addr,
            default_from,
            mail_backend,
            smtp,
            session_ttl,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_env_empty() {
        let config = AppConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.default_from, DEFAULT_SEND_FROM);
        assert_eq!(config.mail_backend, MailBackend::Log);
        assert_eq!(config.bind_addr.port(), 8000);
        assert!(config.smtp.is_none());
    }

    #[test]
    fn smtp_backend_requires_host() {
        let err = AppConfig::from_lookup(lookup_from(&[("ESP_MAIL_BACKEND", "smtp")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "SMTP_HOST"));
    }

    #[test]
    fn smtp_settings_are_read() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("ESP_MAIL_BACKEND", "smtp"),
            ("SMTP_HOST", "mail.example.org"),
            ("SMTP_PORT", "2525"),
            ("SMTP_USERNAME", "relay"),
        ]))
        .unwrap();
        let smtp = config.smtp.unwrap();
        assert_eq!(smtp.host, "mail.example.org");
        assert_eq!(smtp.port, 2525);
        assert_eq!(smtp.username, "relay");
    }

    #[test]
    fn rejects_unknown_backend() {
        let err = AppConfig::from_lookup(lookup_from(&[("ESP_MAIL_BACKEND", "pigeon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn blank_default_from_falls_back() {
        let config = AppConfig::from_lookup(lookup_from(&[("ESP_DEFAULT_FROM", "   ")])).unwrap();
        assert_eq!(config.default_from, DEFAULT_SEND_FROM);
    }
}
