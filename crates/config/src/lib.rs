//! 统一配置中心
//!
//! 加载顺序：内置默认值 → `APP_CONFIG_FILE` 指定的文件（toml / yaml / json）→ `APP_*` 环境变量。
//! 环境变量使用 `__` 表示嵌套，例如 `APP_REALTIME__OUTBOUND_BUFFER=512`。

use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub database: DatabaseConfig,
    #[validate(nested)]
    pub realtime: RealtimeConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
}

/// 数据库配置。未配置 `url` 时使用内存持久化。
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    #[validate(url)]
    pub url: Option<String>,
    #[validate(range(min = 1))]
    pub max_connections: u32,
    /// 启动时执行内嵌迁移
    #[serde(default)]
    pub run_migrations: bool,
}

/// 实时分发配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RealtimeConfig {
    /// 定向推送（重连回放、命令回复）等待发送队列的超时（毫秒）
    #[validate(range(min = 1))]
    pub delivery_timeout_ms: u64,
    /// 每个连接的发送队列长度
    #[validate(range(min = 1))]
    pub outbound_buffer: usize,
    /// 事件桥分区数量
    #[validate(range(min = 1, max = 1024))]
    pub bridge_partitions: usize,
    /// 每个分区的队列容量
    #[validate(range(min = 1))]
    pub bridge_queue_capacity: usize,
}

impl RealtimeConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                run_migrations: false,
            },
            realtime: RealtimeConfig {
                delivery_timeout_ms: 5_000,
                outbound_buffer: 256,
                bridge_partitions: 8,
                bridge_queue_capacity: 1024,
            },
        }
    }
}

impl AppConfig {
    /// 按 默认值 → 配置文件 → 环境变量 的顺序加载并校验
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var("APP_CONFIG_FILE") {
            figment = if path.ends_with(".yml") || path.ends_with(".yaml") {
                figment.merge(Yaml::file(path))
            } else if path.ends_with(".json") {
                figment.merge(Json::file(path))
            } else {
                figment.merge(Toml::file(path))
            };
        }
        Self::extract(figment.merge(Env::prefixed("APP_").split("__")))
    }

    /// 从字符串解析（toml / yaml / json，按内容简单判断），未给出的字段使用默认值
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        let figment = Figment::from(Serialized::defaults(AppConfig::default()));
        let trimmed = s.trim_start();
        let figment = if trimmed.starts_with('{') {
            figment.merge(Json::string(s))
        } else if trimmed.starts_with('[') || s.contains('=') {
            figment.merge(Toml::string(s))
        } else {
            figment.merge(Yaml::string(s))
        };
        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 用于日志输出的配置描述，数据库凭据被隐藏
    pub fn sanitize(&self) -> String {
        let mut text = format!("{:?}", self);
        if let Some(url) = &self.database.url {
            text = text.replace(url, &redact_url(url));
        }
        text
    }
}

fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://[REDACTED]{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
