//! 统一配置中心
//!
//! 加载顺序：内置默认值 -> YAML 文件（`MARKET_CONFIG`，缺省为 `config.yaml`）
//! -> `MARKET__SECTION__KEY` 环境变量。

use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 配置文件路径环境变量
pub const CONFIG_PATH_ENV: &str = "MARKET_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const ENV_PREFIX: &str = "MARKET__";

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AppConfig {
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,
    #[serde(default)]
    #[validate(nested)]
    pub jwt: JwtConfig,
    #[serde(default)]
    #[validate(nested)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    #[validate(nested)]
    pub notifications: NotificationsConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JwtConfig {
    /// 至少 32 个字符
    #[validate(length(min = 32, message = "JWT secret must be at least 32 characters long"))]
    pub secret: String,
    #[validate(range(min = 1))]
    pub expiration_hours: i64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            expiration_hours: 24,
        }
    }
}

/// 实时层配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RealtimeConfig {
    #[validate(range(min = 1))]
    pub idle_timeout_secs: u64,
    #[validate(range(min = 1))]
    pub idle_sweep_interval_secs: u64,
    #[validate(range(min = 1))]
    pub heartbeat_interval_secs: u64,
    #[validate(range(min = 1, max = 500))]
    pub chat_history_limit: usize,
    #[validate(range(min = 1, max = 200))]
    pub recent_notifications_limit: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 300,
            idle_sweep_interval_secs: 600,
            heartbeat_interval_secs: 30,
            chat_history_limit: 50,
            recent_notifications_limit: 20,
        }
    }
}

impl RealtimeConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn idle_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.idle_sweep_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

/// 通知配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NotificationsConfig {
    #[validate(range(min = 1))]
    pub expiry_sweep_interval_secs: u64,
    #[validate(range(min = 1))]
    pub cleanup_after_days: u32,
    #[serde(default)]
    #[validate(nested)]
    pub channels: ChannelEndpoints,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            expiry_sweep_interval_secs: 3600,
            cleanup_after_days: 30,
            channels: ChannelEndpoints::default(),
        }
    }
}

impl NotificationsConfig {
    pub fn expiry_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_sweep_interval_secs)
    }
}

/// 外部投递通道的 webhook 地址，未配置时只记录日志
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ChannelEndpoints {
    #[serde(default)]
    #[validate(url)]
    pub email_endpoint: Option<String>,
    #[serde(default)]
    #[validate(url)]
    pub sms_endpoint: Option<String>,
    #[serde(default)]
    #[validate(url)]
    pub push_endpoint: Option<String>,
    #[validate(range(min = 1))]
    pub request_timeout_ms: u64,
}

impl Default for ChannelEndpoints {
    fn default() -> Self {
        Self {
            email_endpoint: None,
            sms_endpoint: None,
            push_endpoint: None,
            request_timeout_ms: 5000,
        }
    }
}

impl ChannelEndpoints {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

impl From<figment::Error> for ConfigError {
    fn from(error: figment::Error) -> Self {
        ConfigError::Load(Box::new(error))
    }
}

impl AppConfig {
    /// 组装配置来源，不做提取
    pub fn figment() -> Figment {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// 加载并校验配置
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        Validate::validate(self)?;
        Ok(())
    }

    /// 日志用的脱敏表示
    pub fn sanitize(&self) -> String {
        let mut redacted = self.clone();
        redacted.jwt.secret = "[REDACTED]".into();
        format!("{redacted:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    const SECRET: &str = "production-secret-key-with-at-least-32-characters";

    #[test]
    fn defaults_apply_when_nothing_is_configured() {
        Jail::expect_with(|jail| {
            jail.set_env("MARKET__JWT__SECRET", SECRET);
            let config = AppConfig::load().expect("config");

            assert_eq!(config.server.bind_address(), "127.0.0.1:8080");
            assert_eq!(config.jwt.expiration_hours, 24);
            assert_eq!(config.realtime.idle_timeout(), Duration::from_secs(300));
            assert_eq!(config.realtime.idle_sweep_interval(), Duration::from_secs(600));
            assert_eq!(config.realtime.chat_history_limit, 50);
            assert_eq!(config.notifications.cleanup_after_days, 30);
            assert!(config.notifications.channels.email_endpoint.is_none());
            Ok(())
        });
    }

    #[test]
    fn yaml_file_is_overridden_by_environment() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "market.yaml",
                r#"
server:
  host: 0.0.0.0
  port: 9000
jwt:
  secret: yaml-secret-key-that-is-long-enough-for-hs256
  expiration_hours: 12
notifications:
  expiry_sweep_interval_secs: 60
  cleanup_after_days: 7
  channels:
    email_endpoint: http://mailer.internal/send
    request_timeout_ms: 1500
"#,
            )?;
            jail.set_env(CONFIG_PATH_ENV, "market.yaml");
            jail.set_env("MARKET__SERVER__PORT", "9100");
            jail.set_env("MARKET__REALTIME__HEARTBEAT_INTERVAL_SECS", "10");

            let config = AppConfig::load().expect("config");
            assert_eq!(config.server.host, "0.0.0.0");
            assert_eq!(config.server.port, 9100);
            assert_eq!(config.jwt.expiration_hours, 12);
            assert_eq!(config.realtime.heartbeat_interval(), Duration::from_secs(10));
            assert_eq!(config.realtime.idle_timeout_secs, 300);
            assert_eq!(config.notifications.cleanup_after_days, 7);
            assert_eq!(
                config.notifications.channels.email_endpoint.as_deref(),
                Some("http://mailer.internal/send")
            );
            assert_eq!(
                config.notifications.channels.request_timeout(),
                Duration::from_millis(1500)
            );
            Ok(())
        });
    }

    #[test]
    fn short_jwt_secret_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("MARKET__JWT__SECRET", "too-short");
            let err = AppConfig::load().unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)));
            Ok(())
        });
    }

    #[test]
    fn malformed_endpoint_is_rejected() {
        let mut config = AppConfig::default();
        config.jwt.secret = SECRET.into();
        config.notifications.channels.sms_endpoint = Some("not a url".into());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn sanitize_hides_secret() {
        let mut config = AppConfig::default();
        config.jwt.secret = SECRET.into();
        let text = config.sanitize();
        assert!(!text.contains(SECRET));
        assert!(text.contains("[REDACTED]"));
    }
}
