//! 主体数据访问（租户域用户、管理域用户、租户、成员关系）

use crate::{
    error::AppError,
    models::{
        tenant::Tenant,
        user::{AdminUser, TenantMembership, User},
    },
};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

pub struct UserRepository {
    db: PgPool,
}

impl UserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// 根据邮箱查找租户域用户（全局账户表，不受行隔离策略约束）
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.db)
            .await?;

        Ok(user)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(user)
    }

    /// 根据邮箱查找管理域用户（独立表，与租户域绝不共享凭证）
    pub async fn find_admin_by_email(&self, email: &str) -> Result<Option<AdminUser>, AppError> {
        let admin = sqlx::query_as::<_, AdminUser>("SELECT * FROM admin_users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.db)
            .await?;

        Ok(admin)
    }

    pub async fn find_admin_by_id(&self, id: Uuid) -> Result<Option<AdminUser>, AppError> {
        let admin = sqlx::query_as::<_, AdminUser>("SELECT * FROM admin_users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(admin)
    }

    pub async fn find_tenant(&self, id: Uuid) -> Result<Option<Tenant>, AppError> {
        let tenant = sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(tenant)
    }

    /// 查找成员关系。tenant_memberships 受行隔离策略约束，
    /// 必须在已投影租户上下文的事务内调用。
    pub async fn find_membership(
        tx: &mut Transaction<'static, Postgres>,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<TenantMembership>, AppError> {
        let membership = sqlx::query_as::<_, TenantMembership>(
            "SELECT * FROM tenant_memberships WHERE tenant_id = $1 AND user_id = $2",
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(membership)
    }
}
