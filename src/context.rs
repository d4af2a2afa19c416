//! 安全上下文代理（Tenant Context Broker）
//! 为每个操作建立一次性的安全上下文，并在单个事务的生命周期内
//! 将其投影到数据库会话变量中。
//!
//! 会话投影使用事务级 set_config（is_local = true）：无论提交、回滚
//! 还是请求中途取消，变量都随事务结束而消失。连接池复用物理连接时
//! 不会把上一个上下文泄漏给下一个作用域。

use crate::{config::AppConfig, error::AppError};
use futures::future::BoxFuture;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// 认证域：租户域与管理域各自独立签名与存储
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Realm {
    Tenant,
    Admin,
}

impl Realm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Realm::Tenant => "tenant",
            Realm::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tenant" => Some(Realm::Tenant),
            "admin" => Some(Realm::Admin),
            _ => None,
        }
    }
}

/// 每次操作的安全上下文，只存在于内存中，绝不落库
#[derive(Debug, Clone)]
pub struct SecurityContext {
    pub tenant_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub realm: Realm,
    pub request_id: Uuid,
}

impl SecurityContext {
    /// 租户域上下文（登录前 actor 可以为空）
    pub fn tenant(tenant_id: Uuid, actor_id: Option<Uuid>, request_id: Uuid) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            actor_id,
            realm: Realm::Tenant,
            request_id,
        }
    }

    /// 管理域上下文（不携带租户）
    pub fn admin(actor_id: Option<Uuid>, request_id: Uuid) -> Self {
        Self {
            tenant_id: None,
            actor_id,
            realm: Realm::Admin,
            request_id,
        }
    }

    pub fn has_tenant(&self) -> bool {
        self.tenant_id.is_some()
    }

    /// 打开作用域前的快速失败检查：租户域上下文必须携带租户 id。
    /// 数据库层的 RESTRICTIVE 策略是最终防线，这里只是提前拒绝。
    pub fn ensure_scoped(&self) -> Result<(), AppError> {
        if self.realm == Realm::Tenant && self.tenant_id.is_none() {
            tracing::error!(
                request_id = %self.request_id,
                "Tenant-realm context without tenant id rejected before opening scope"
            );
            return Err(AppError::Forbidden);
        }
        Ok(())
    }
}

/// 种子旁路的显式调用方确认。三重条件之一：
/// seed_mode 配置 + 非生产环境 + 调用点传入本确认值。
#[derive(Debug, Clone, Copy)]
pub enum SeedBypass {
    Confirmed,
}

/// 种子旁路是否被配置允许（不含调用方确认那一条）
pub fn seed_bypass_allowed(config: &AppConfig) -> bool {
    config.security.seed_mode && !config.is_production()
}

tokio::task_local! {
    // 每个逻辑请求同一时刻只允许一个活跃上下文作用域
    static SCOPE_ACTIVE: ();
}

/// 在一个安全上下文作用域内执行 `f`。
///
/// 打开一个事务，把上下文投影为事务级会话变量，随后执行 `f`；
/// `f` 成功则提交，失败则回滚（包括其中已写入的审计记录）。
/// 同一请求内嵌套第二个作用域会被拒绝。
pub async fn run_with_context<T, F>(
    pool: &PgPool,
    ctx: &SecurityContext,
    f: F,
) -> Result<T, AppError>
where
    F: for<'t> FnOnce(&'t mut Transaction<'static, Postgres>) -> BoxFuture<'t, Result<T, AppError>>,
{
    ctx.ensure_scoped()?;

    if SCOPE_ACTIVE.try_with(|_| ()).is_ok() {
        tracing::error!(
            request_id = %ctx.request_id,
            "Nested security context scope rejected"
        );
        return Err(AppError::Internal);
    }

    SCOPE_ACTIVE
        .scope((), async move {
            let mut tx = pool.begin().await?;

            project_context(
                &mut tx,
                ctx.tenant_id,
                ctx.actor_id,
                ctx.realm.as_str(),
                ctx.request_id,
                false,
            )
            .await?;

            match f(&mut tx).await {
                Ok(value) => {
                    tx.commit().await?;
                    Ok(value)
                }
                Err(e) => {
                    // 回滚失败仅记录：原始错误优先返回
                    if let Err(rollback_err) = tx.rollback().await {
                        tracing::warn!(
                            request_id = %ctx.request_id,
                            error = %rollback_err,
                            "Rollback after scope failure also failed"
                        );
                    }
                    Err(e)
                }
            }
        })
        .await
}

/// 在种子旁路作用域内执行 `f`（仅用于系统初始化数据写入）。
///
/// 三重条件缺一即拒绝：seed_mode 配置开启、环境标记非生产、
/// 调用点传入 [`SeedBypass::Confirmed`]。
pub async fn run_with_seed_bypass<T, F>(
    pool: &PgPool,
    config: &AppConfig,
    _confirmed: SeedBypass,
    f: F,
) -> Result<T, AppError>
where
    F: for<'t> FnOnce(&'t mut Transaction<'static, Postgres>) -> BoxFuture<'t, Result<T, AppError>>,
{
    if !seed_bypass_allowed(config) {
        tracing::warn!(
            seed_mode = config.security.seed_mode,
            environment = %config.environment,
            "Seed bypass denied"
        );
        return Err(AppError::Forbidden);
    }

    if SCOPE_ACTIVE.try_with(|_| ()).is_ok() {
        tracing::error!("Nested security context scope rejected (seed bypass)");
        return Err(AppError::Internal);
    }

    let request_id = Uuid::new_v4();
    metrics::counter!("security.seed_bypass_scopes_total").increment(1);

    SCOPE_ACTIVE
        .scope((), async move {
            let mut tx = pool.begin().await?;

            project_context(&mut tx, None, None, "bypass", request_id, true).await?;

            match f(&mut tx).await {
                Ok(value) => {
                    tx.commit().await?;
                    Ok(value)
                }
                Err(e) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        tracing::warn!(
                            request_id = %request_id,
                            error = %rollback_err,
                            "Rollback after seed bypass failure also failed"
                        );
                    }
                    Err(e)
                }
            }
        })
        .await
}

/// 把上下文投影为事务级会话变量（is_local = true）
async fn project_context(
    tx: &mut Transaction<'static, Postgres>,
    tenant_id: Option<Uuid>,
    actor_id: Option<Uuid>,
    realm: &str,
    request_id: Uuid,
    bypass: bool,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        SELECT
            set_config('app.tenant_id', $1, true),
            set_config('app.actor_id', $2, true),
            set_config('app.realm', $3, true),
            set_config('app.request_id', $4, true),
            set_config('app.bypass_rls', $5, true)
        "#,
    )
    .bind(tenant_id.map(|id| id.to_string()).unwrap_or_default())
    .bind(actor_id.map(|id| id.to_string()).unwrap_or_default())
    .bind(realm)
    .bind(request_id.to_string())
    .bind(if bypass { "on" } else { "off" })
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realm_roundtrip() {
        assert_eq!(Realm::parse("tenant"), Some(Realm::Tenant));
        assert_eq!(Realm::parse("admin"), Some(Realm::Admin));
        assert_eq!(Realm::parse("bypass"), None);
        assert_eq!(Realm::Tenant.as_str(), "tenant");
        assert_eq!(Realm::Admin.as_str(), "admin");
    }

    #[test]
    fn test_tenant_context_requires_tenant_id() {
        let mut ctx = SecurityContext::tenant(Uuid::new_v4(), None, Uuid::new_v4());
        assert!(ctx.ensure_scoped().is_ok());

        ctx.tenant_id = None;
        assert!(matches!(ctx.ensure_scoped(), Err(AppError::Forbidden)));
    }

    #[test]
    fn test_admin_context_has_no_tenant() {
        let ctx = SecurityContext::admin(Some(Uuid::new_v4()), Uuid::new_v4());
        assert!(!ctx.has_tenant());
        assert!(ctx.ensure_scoped().is_ok());
    }

    fn test_app_config() -> crate::config::AppConfig {
        use crate::config::*;
        use secrecy::Secret;

        AppConfig {
            environment: "development".to_string(),
            server: ServerConfig {
                addr: "127.0.0.1:0".to_string(),
                graceful_shutdown_timeout_secs: 5,
            },
            database: DatabaseConfig {
                url: Secret::new("postgresql://localhost/test".to_string()),
                max_connections: 5,
                min_connections: 1,
                acquire_timeout_secs: 5,
                idle_timeout_secs: 300,
                max_lifetime_secs: 1800,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: "pretty".to_string(),
            },
            security: SecurityConfig {
                tenant_jwt_secret: Secret::new(
                    "tenant-test-secret-key-min-32-characters".to_string(),
                ),
                admin_jwt_secret: Secret::new(
                    "admin-test-secret-key-min-32-characters!".to_string(),
                ),
                access_token_exp_secs: 300,
                refresh_token_exp_secs: 3600,
                rate_limit_window_secs: 300,
                rate_limit_max_attempts: 5,
                rate_limit_enforce: false,
                password_min_length: 8,
                seed_mode: false,
                trust_proxy: false,
            },
        }
    }

    #[test]
    fn test_seed_bypass_requires_all_conditions() {
        let mut config = test_app_config();

        // 默认 seed_mode=false
        assert!(!seed_bypass_allowed(&config));

        config.security.seed_mode = true;
        assert!(seed_bypass_allowed(&config));

        config.environment = "production".to_string();
        assert!(!seed_bypass_allowed(&config));
    }
}
