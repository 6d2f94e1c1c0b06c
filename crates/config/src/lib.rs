//! txkit-config - 配置加载库
//!
//! 加载顺序：`{dir}/default.toml` → `{dir}/{APP_ENV}.toml` → `TXKIT_` 前缀环境变量
//! （层级用 `__` 分隔，例如 `TXKIT_RETRY__MAX_RETRIES=5`）。

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::Deserialize;
use thiserror::Error;
use txkit_ports::{ReadConcern, WriteConcern};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// 遥测配置
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 输出 JSON 格式日志
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
            metrics_enabled: false,
        }
    }
}

/// 事务默认选项
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionConfig {
    #[serde(default)]
    pub read_concern: ReadConcern,
    /// "majority" 或确认节点数
    #[serde(default = "default_write_concern")]
    pub write_concern: String,
    #[serde(default = "default_true")]
    pub write_journal: bool,
    #[serde(default = "default_max_commit_time_ms")]
    pub max_commit_time_ms: u64,
    /// 提交时对瞬时错误的额外重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_write_concern() -> String {
    "majority".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_commit_time_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            read_concern: ReadConcern::default(),
            write_concern: default_write_concern(),
            write_journal: true,
            max_commit_time_ms: default_max_commit_time_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl TransactionConfig {
    /// 解析写关注配置
    pub fn write_concern(&self) -> Result<WriteConcern, ConfigError> {
        let mut concern = match self.write_concern.trim() {
            "majority" => WriteConcern::majority(),
            other => {
                let nodes: u32 = other.parse().map_err(|_| {
                    ConfigError::Invalid(format!(
                        "transaction.write_concern must be \"majority\" or a node count, got {:?}",
                        other
                    ))
                })?;
                WriteConcern::nodes(nodes)
            }
        };
        concern.journal = self.write_journal;
        Ok(concern)
    }
}

/// 重试执行器配置
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// 单次尝试超时
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub jitter: bool,
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_attempt_timeout_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            jitter: true,
        }
    }
}

/// 断路器配置
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_threshold")]
    pub threshold: u32,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

fn default_threshold() -> u32 {
    5
}

fn default_window_ms() -> u64 {
    60_000
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            window_ms: default_window_ms(),
        }
    }
}

/// 回滚服务配置
#[derive(Debug, Clone, Deserialize)]
pub struct RollbackConfig {
    /// 回滚历史最多保留条数
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_history_limit() -> usize {
    1_000
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_app_env")]
    pub app_env: String,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub transaction: TransactionConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub rollback: RollbackConfig,
}

fn default_app_name() -> String {
    "txkit".to_string()
}

fn default_app_env() -> String {
    "development".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            app_env: default_app_env(),
            telemetry: TelemetryConfig::default(),
            transaction: TransactionConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rollback: RollbackConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| default_app_env());

        let figment = Figment::new()
            .merge(Serialized::default("app_env", &env))
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(Env::prefixed("TXKIT_").split("__"));

        Self::from_figment(figment)
    }

    /// 从任意 provider 组合加载并校验
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.circuit_breaker.threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.threshold must be greater than 0".to_string(),
            ));
        }
        if self.circuit_breaker.window_ms == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.window_ms must be greater than 0".to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        if self.retry.attempt_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "retry.attempt_timeout_ms must be greater than 0".to_string(),
            ));
        }
        self.transaction.write_concern()?;
        Ok(())
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    /// 是否为开发环境
    pub fn is_development(&self) -> bool {
        self.app_env == "development"
    }
}
