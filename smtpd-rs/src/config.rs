use crate::error::{Result, SmtpdError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub smtp: SmtpConfig,
    pub limits: RateLimitConfig,
    pub greylist: GreylistConfig,
    pub dnsbl: DnsblConfig,
    pub webhook: WebhookConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Hostname advertised in the greeting banner and EHLO reply
    pub hostname: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SmtpConfig {
    pub listen_addr: String,
    pub max_connections: usize,
    pub enable_tls: bool,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
    pub enable_auth: bool,
    pub auth_database_url: Option<String>,
    pub max_message_size: usize,
    pub max_recipients: usize,
    pub greeting_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub data_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Commands per window for an unauthenticated client IP
    pub per_ip: u32,
    /// Commands per window for an authenticated identity
    pub per_user: u32,
    pub window_secs: u64,
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GreylistConfig {
    pub enabled: bool,
    /// Minimum age of a triplet before it is accepted
    pub delay_secs: i64,
    /// Triplets older than this are forgotten and start over
    pub expiry_secs: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DnsblConfig {
    pub enabled: bool,
    pub zones: Vec<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub maildir_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub level: String,
    pub format: String,
    pub service_name: String,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SmtpdError::Config(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| SmtpdError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the rest of the server relies on: every numeric
    /// limit strictly positive, the listen address parseable (which also
    /// bounds the port to 16 bits), and feature toggles backed by the
    /// settings they need.
    pub fn validate(&self) -> Result<()> {
        self.smtp
            .listen_addr
            .parse::<SocketAddr>()
            .map_err(|e| SmtpdError::Config(format!("invalid listen_addr: {}", e)))?;

        let positives: [(&str, u64); 9] = [
            ("smtp.max_connections", self.smtp.max_connections as u64),
            ("smtp.max_message_size", self.smtp.max_message_size as u64),
            ("smtp.max_recipients", self.smtp.max_recipients as u64),
            ("smtp.greeting_timeout_secs", self.smtp.greeting_timeout_secs),
            ("smtp.command_timeout_secs", self.smtp.command_timeout_secs),
            ("smtp.data_timeout_secs", self.smtp.data_timeout_secs),
            ("limits.per_ip", self.limits.per_ip as u64),
            ("limits.per_user", self.limits.per_user as u64),
            ("limits.window_secs", self.limits.window_secs),
        ];
        for (name, value) in positives {
            if value == 0 {
                return Err(SmtpdError::Config(format!("{} must be positive", name)));
            }
        }
        if self.limits.cleanup_interval_secs == 0 {
            return Err(SmtpdError::Config(
                "limits.cleanup_interval_secs must be positive".to_string(),
            ));
        }

        if self.smtp.enable_tls
            && (self.smtp.tls_cert_path.is_none() || self.smtp.tls_key_path.is_none())
        {
            return Err(SmtpdError::Config(
                "enable_tls requires tls_cert_path and tls_key_path".to_string(),
            ));
        }
        if self.smtp.enable_auth && self.smtp.auth_database_url.is_none() {
            return Err(SmtpdError::Config(
                "enable_auth requires auth_database_url".to_string(),
            ));
        }

        if self.greylist.enabled {
            if self.greylist.delay_secs <= 0 || self.greylist.expiry_secs <= 0 {
                return Err(SmtpdError::Config(
                    "greylist delay_secs and expiry_secs must be positive".to_string(),
                ));
            }
            if self.greylist.delay_secs >= self.greylist.expiry_secs {
                return Err(SmtpdError::Config(
                    "greylist delay_secs must be below expiry_secs".to_string(),
                ));
            }
        }
        if self.dnsbl.enabled {
            if self.dnsbl.zones.is_empty() {
                return Err(SmtpdError::Config(
                    "dnsbl.enabled requires at least one zone".to_string(),
                ));
            }
            if self.dnsbl.timeout_ms == 0 {
                return Err(SmtpdError::Config(
                    "dnsbl.timeout_ms must be positive".to_string(),
                ));
            }
        }
        if self.webhook.enabled && self.webhook.url.is_none() {
            return Err(SmtpdError::Config(
                "webhook.enabled requires webhook.url".to_string(),
            ));
        }

        Ok(())
    }

    pub fn default() -> Self {
        Self {
            server: ServerConfig {
                hostname: "mail.localhost".to_string(),
            },
            smtp: SmtpConfig {
                listen_addr: "0.0.0.0:2525".to_string(),
                max_connections: 256,
                enable_tls: false,
                tls_cert_path: None,
                tls_key_path: None,
                enable_auth: false,
                auth_database_url: None,
                max_message_size: 10 * 1024 * 1024, // 10MB
                max_recipients: 100,
                greeting_timeout_secs: 30,
                command_timeout_secs: 300,
                data_timeout_secs: 600,
            },
            limits: RateLimitConfig {
                per_ip: 60,
                per_user: 100,
                window_secs: 60,
                cleanup_interval_secs: 300,
            },
            greylist: GreylistConfig {
                enabled: false,
                delay_secs: 300,
                expiry_secs: 86400,
            },
            dnsbl: DnsblConfig {
                enabled: false,
                zones: vec!["zen.spamhaus.org".to_string()],
                timeout_ms: 3000,
            },
            webhook: WebhookConfig {
                enabled: false,
                url: None,
            },
            storage: StorageConfig {
                maildir_path: "/tmp/maildir".to_string(),
            },
            logging: LoggingConfig {
                enabled: true,
                level: "info".to_string(),
                format: "pretty".to_string(),
                service_name: "smtpd-rs".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_listen_addr() {
        let mut config = Config::default();
        config.smtp.listen_addr = "0.0.0.0:99999".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_limits() {
        let mut config = Config::default();
        config.smtp.max_message_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.limits.per_ip = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn tls_requires_cert_and_key() {
        let mut config = Config::default();
        config.smtp.enable_tls = true;
        assert!(config.validate().is_err());

        config.smtp.tls_cert_path = Some("cert.pem".to_string());
        config.smtp.tls_key_path = Some("key.pem".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn greylist_delay_must_precede_expiry() {
        let mut config = Config::default();
        config.greylist.enabled = true;
        config.greylist.delay_secs = 600;
        config.greylist.expiry_secs = 600;
        assert!(config.validate().is_err());
    }

    #[test]
    fn webhook_requires_url() {
        let mut config = Config::default();
        config.webhook.enabled = true;
        assert!(config.validate().is_err());

        config.webhook.url = Some("http://127.0.0.1:9000/events".to_string());
        assert!(config.validate().is_ok());
    }
}
