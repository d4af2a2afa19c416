use commerce_core::{
    config::AppConfig,
    context::{run_with_seed_bypass, seed_bypass_allowed, SeedBypass},
    db, rls, routes, telemetry,
};
use futures::FutureExt;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    telemetry::init_telemetry(&config);
    telemetry::init_metrics();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        "Commerce core starting..."
    );

    let db_pool = db::create_pool(&config.database).await?;
    db::run_migrations(&db_pool).await?;

    tracing::info!("Database initialized");

    // 启动即校验隔离策略矩阵：缺了策略的表直接拒绝启动
    let report = rls::verify_policies(&db_pool).await?;
    if !report.is_clean() {
        anyhow::bail!("Row isolation policy verification failed");
    }

    let config = Arc::new(config);

    if seed_bypass_allowed(&config) {
        seed_dev_data(&db_pool, &config).await?;
    }

    let state = routes::build_state(config.clone(), db_pool.clone())?;
    let app = routes::create_router(state.clone());

    spawn_cleanup_task(state, db_pool);

    let addr = &config.server.addr;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(addr = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// 开发环境种子数据：一个租户、一个已验证用户及其成员关系、
/// 一个商品、一个管理账户。受策略约束的表只能经种子旁路写入。
async fn seed_dev_data(pool: &sqlx::PgPool, config: &AppConfig) -> anyhow::Result<()> {
    use commerce_core::auth::password::PasswordHasher;

    tracing::warn!("Seed mode enabled, writing development seed data");

    let hasher = PasswordHasher::new();
    let password_hash = hasher.hash("dev-password-123")?;

    run_with_seed_bypass(pool, config, SeedBypass::Confirmed, move |tx| {
        async move {
            let tenant_id: uuid::Uuid = sqlx::query_scalar(
                r#"
                INSERT INTO tenants (name, slug)
                VALUES ('Demo Tenant', 'demo')
                ON CONFLICT (slug) DO UPDATE SET name = EXCLUDED.name
                RETURNING id
                "#,
            )
            .fetch_one(&mut **tx)
            .await?;

            let user_id: uuid::Uuid = sqlx::query_scalar(
                r#"
                INSERT INTO users (email, password_hash, display_name, email_verified_at)
                VALUES ('demo@example.com', $1, 'Demo User', NOW())
                ON CONFLICT (email) DO UPDATE SET display_name = EXCLUDED.display_name
                RETURNING id
                "#,
            )
            .bind(&password_hash)
            .fetch_one(&mut **tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO tenant_memberships (tenant_id, user_id, role)
                VALUES ($1, $2, 'owner')
                ON CONFLICT (tenant_id, user_id) DO NOTHING
                "#,
            )
            .bind(tenant_id)
            .bind(user_id)
            .execute(&mut **tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO products (tenant_id, sku, name, price_cents)
                VALUES ($1, 'DEMO-001', 'Demo Product', 1999)
                ON CONFLICT (tenant_id, sku) DO NOTHING
                "#,
            )
            .bind(tenant_id)
            .execute(&mut **tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO admin_users (email, password_hash, display_name)
                VALUES ('admin@example.com', $1, 'Demo Admin')
                ON CONFLICT (email) DO NOTHING
                "#,
            )
            .bind(&password_hash)
            .execute(&mut **tx)
            .await?;

            tracing::info!(%tenant_id, %user_id, "Seed data written");
            Ok(())
        }
        .boxed()
    })
    .await?;

    Ok(())
}

/// 每小时清理过期的刷新凭证与尝试记录
fn spawn_cleanup_task(state: Arc<commerce_core::middleware::AppState>, pool: sqlx::PgPool) {
    use commerce_core::repository::AttemptRepository;

    tokio::spawn(async move {
        let attempts = AttemptRepository::new(pool);
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            interval.tick().await;
            match state.token_service.cleanup_expired().await {
                Ok(n) if n > 0 => tracing::info!(removed = n, "Expired refresh credentials cleaned up"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Refresh credential cleanup failed"),
            }
            match attempts.cleanup_expired().await {
                Ok(n) if n > 0 => tracing::info!(removed = n, "Expired login attempts cleaned up"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Login attempt cleanup failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
    }
}
