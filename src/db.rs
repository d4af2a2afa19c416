//! 数据库连接池与迁移
//!
//! 池参数来自配置；迁移在启动时执行，隔离策略校验紧随其后
//! （见 rls 模块）。错误统一折叠进 AppError，与其余代码同一条
//! 传播路径。

use crate::{config::DatabaseConfig, error::AppError};
use secrecy::ExposeSecret;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

/// 创建连接池。
/// 轮换与刷新路径会在持有事务连接的同时从池里取第二个连接做
/// 主体查询，max_connections 必须至少为 2。
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, AppError> {
    if config.max_connections < 2 {
        return Err(AppError::Config(
            "database.max_connections must be at least 2".to_string(),
        ));
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
        .test_before_acquire(true)
        .connect(config.url.expose_secret())
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database pool created"
    );

    Ok(pool)
}

/// 运行数据库迁移（建表 + 安装行隔离策略）
pub async fn run_migrations(pool: &PgPool) -> Result<(), AppError> {
    sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
        tracing::error!(error = %e, "Migration failed");
        AppError::Internal
    })?;

    tracing::info!("Migrations completed");
    Ok(())
}

/// 连接探活（就绪探针用）
pub async fn ping(pool: &PgPool) -> Result<(), AppError> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// 记录连接池指标，按连接状态打标签
pub fn record_pool_metrics(pool: &PgPool) {
    let size = pool.size() as f64;
    let idle = pool.num_idle() as f64;

    metrics::gauge!("db.pool_connections", "state" => "idle").set(idle);
    metrics::gauge!("db.pool_connections", "state" => "busy").set(size - idle);
}
