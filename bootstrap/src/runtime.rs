//! 事务运行时

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;
use txkit_config::{AppConfig, ConfigError};
use txkit_ports::SessionProvider;
use txkit_resilience::{CircuitBreakerConfig, RetryPolicy, TransactionErrorHandler};
use txkit_saga::{RollbackService, RollbackServiceConfig};
use txkit_telemetry::{init_metrics, init_tracing, init_tracing_json};
use txkit_unit_of_work::{TransactionOptions, UnitOfWorkFactory};

/// 加载配置：先读取 `.env`，再按层合并配置文件和环境变量
pub fn load_config(config_dir: &str) -> anyhow::Result<AppConfig> {
    dotenvy::dotenv().ok();
    AppConfig::load(config_dir).with_context(|| format!("Failed to load config from {}", config_dir))
}

/// 初始化日志和 metrics
///
/// 生产环境或 `telemetry.json = true` 时输出 JSON 日志。开启 metrics 时返回 Prometheus handle。
pub fn init_observability(config: &AppConfig) -> anyhow::Result<Option<PrometheusHandle>> {
    if config.is_production() || config.telemetry.json {
        init_tracing_json(&config.telemetry.log_level);
    } else {
        init_tracing(&config.telemetry.log_level);
    }

    let handle = if config.telemetry.metrics_enabled {
        Some(init_metrics().context("Failed to install Prometheus recorder")?)
    } else {
        None
    };

    info!(
        app_name = %config.app_name,
        app_env = %config.app_env,
        metrics = handle.is_some(),
        "Observability initialized"
    );
    Ok(handle)
}

pub fn transaction_options(config: &AppConfig) -> Result<TransactionOptions, ConfigError> {
    let tx = &config.transaction;
    Ok(TransactionOptions {
        read_concern: tx.read_concern,
        write_concern: tx.write_concern()?,
        max_commit_time: Duration::from_millis(tx.max_commit_time_ms),
        max_retries: tx.max_retries,
    })
}

pub fn retry_policy(config: &AppConfig) -> RetryPolicy {
    let retry = &config.retry;
    RetryPolicy {
        max_retries: retry.max_retries,
        base_delay: Duration::from_millis(retry.base_delay_ms),
        max_delay: Duration::from_millis(retry.max_delay_ms),
        attempt_timeout: Duration::from_millis(retry.attempt_timeout_ms),
        jitter: retry.jitter,
    }
}

pub fn circuit_breaker_config(config: &AppConfig) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: config.circuit_breaker.threshold,
        window: Duration::from_millis(config.circuit_breaker.window_ms),
    }
}

pub fn rollback_service_config(config: &AppConfig) -> RollbackServiceConfig {
    RollbackServiceConfig {
        history_limit: config.rollback.history_limit,
        ..Default::default()
    }
}

/// 事务层运行时
///
/// 一个进程通常只持有一个实例，工厂可以被克隆到各个调用方。
pub struct TransactionRuntime<S: SessionProvider> {
    config: AppConfig,
    factory: UnitOfWorkFactory<S>,
    rollback_service: Arc<RollbackService>,
    error_handler: Arc<TransactionErrorHandler>,
}

impl<S: SessionProvider> TransactionRuntime<S> {
    /// 从配置装配
    pub fn from_config(config: &AppConfig, store: Arc<S>) -> anyhow::Result<Self> {
        config.validate().context("Invalid transaction configuration")?;

        let options = transaction_options(config)?;
        let rollback_service = Arc::new(RollbackService::new(rollback_service_config(config)));
        let error_handler = Arc::new(TransactionErrorHandler::new(
            retry_policy(config),
            circuit_breaker_config(config),
            Arc::clone(&rollback_service),
        ));

        info!(
            read_concern = options.read_concern.as_str(),
            commit_retries = options.max_retries,
            retry_max = config.retry.max_retries,
            breaker_threshold = config.circuit_breaker.threshold,
            "Transaction runtime initialized"
        );

        Ok(Self {
            config: config.clone(),
            factory: UnitOfWorkFactory::new(store, options),
            rollback_service,
            error_handler,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn factory(&self) -> &UnitOfWorkFactory<S> {
        &self.factory
    }

    pub fn rollback_service(&self) -> &Arc<RollbackService> {
        &self.rollback_service
    }

    pub fn error_handler(&self) -> &Arc<TransactionErrorHandler> {
        &self.error_handler
    }
}
